//! Blocking waits built on subscriptions.
//!
//! [`Waiter`] is a one-shot flag plus condition variable. [`Wait`] adds the
//! timeout policy and an optional start delegate. [`ConditionWait`] arms a
//! subscription and resolves when a delivery satisfies a predicate;
//! [`ActionFinishedWait`] resolves on the first "action finished" delivery.
//!
//! A timed-out wait does not unregister anything. The subscription behind a
//! `ConditionWait` lives until the wait object is destroyed or dropped.

use std::fmt;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use tracing::warn;

use crate::config::WaitConfig;
use crate::element::{AccessContext, ChangeKind, ElementId};
use crate::error::EventResult;
use crate::events::{Callback, EventSubscription, EventSystem, Outcome, Registration};

/// Change kind signalling that an action element finished: an incoming
/// connection was added to it.
pub const ACTION_FINISHED_KIND: ChangeKind = ChangeKind::AddInputEdge;

/// One-shot synchronization point.
#[derive(Debug, Default)]
pub struct Waiter {
    resolved: Mutex<bool>,
    cond: Condvar,
}

impl Waiter {
    /// Creates an unresolved waiter.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, bool> {
        self.resolved.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Marks the waiter resolved and wakes every blocked thread. Idempotent.
    pub fn resolve(&self) {
        let mut resolved = self.state();
        *resolved = true;
        drop(resolved);
        self.cond.notify_all();
    }

    /// Returns true once [`Waiter::resolve`] has been called.
    #[must_use]
    pub fn is_resolved(&self) -> bool {
        *self.state()
    }

    /// Blocks until resolved or `deadline` passes. Returns whether it resolved.
    pub fn wait_until(&self, deadline: Instant) -> bool {
        let mut resolved = self.state();
        while !*resolved {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            let (next, _) = self
                .cond
                .wait_timeout(resolved, deadline - now)
                .unwrap_or_else(PoisonError::into_inner);
            resolved = next;
        }
        true
    }

    /// Blocks for at most `timeout`. Returns whether it resolved.
    ///
    /// A timeout too large to express as a deadline waits without one.
    pub fn wait(&self, timeout: Duration) -> bool {
        match Instant::now().checked_add(timeout) {
            Some(deadline) => self.wait_until(deadline),
            None => {
                let mut resolved = self.state();
                while !*resolved {
                    resolved = self.cond.wait(resolved).unwrap_or_else(PoisonError::into_inner);
                }
                true
            }
        }
    }
}

type StartDelegate = Box<dyn Fn() + Send + Sync>;

/// A waiter with a timeout policy and an optional start delegate.
pub struct Wait {
    waiter: Arc<Waiter>,
    on_wait_start: Option<StartDelegate>,
    config: WaitConfig,
}

impl Wait {
    /// Creates an unresolved wait using `config` for its timeouts.
    #[must_use]
    pub fn new(config: WaitConfig) -> Self {
        Self {
            waiter: Arc::new(Waiter::new()),
            on_wait_start: None,
            config,
        }
    }

    /// The shared waiter, for wiring into whatever will resolve it.
    #[must_use]
    pub fn waiter(&self) -> &Arc<Waiter> {
        &self.waiter
    }

    /// Resolves the wait, waking any blocked thread.
    pub fn resolve(&self) {
        self.waiter.resolve();
    }

    /// Returns true once resolved.
    #[must_use]
    pub fn is_resolved(&self) -> bool {
        self.waiter.is_resolved()
    }

    /// Sets a delegate run on the waiting thread right before it blocks.
    ///
    /// Whatever it does happens-before the wait begins, so it may trigger the
    /// very change being waited for.
    pub fn set_on_wait_start<F>(&mut self, delegate: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.on_wait_start = Some(Box::new(delegate));
    }

    /// Waits for the configured default timeout.
    pub fn wait(&self) -> bool {
        self.wait_for(self.config.default_timeout())
    }

    /// Waits for at most `timeout`, clamped to the configured ceiling.
    ///
    /// Returns false on timeout; that is an expected outcome, not an error.
    pub fn wait_for(&self, timeout: Duration) -> bool {
        let ceiling = self.config.max_timeout();
        let timeout = if timeout > ceiling {
            warn!(
                requested_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
                max_ms = self.config.max_timeout_ms,
                "wait timeout above ceiling, clamping"
            );
            ceiling
        } else {
            timeout
        };

        if let Some(delegate) = &self.on_wait_start {
            delegate();
        }
        self.waiter.wait(timeout)
    }
}

impl fmt::Debug for Wait {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Wait")
            .field("waiter", &self.waiter)
            .field("on_wait_start", &self.on_wait_start.is_some())
            .field("config", &self.config)
            .finish()
    }
}

/// Waits until a delivery on an element satisfies a predicate.
///
/// The predicate receives `(watched, edge, other)`. A delivery that passes
/// resolves the wait and is reported as consumed; others are ignored and the
/// subscription stays armed.
pub struct ConditionWait {
    wait: Wait,
    subscription: EventSubscription,
}

impl ConditionWait {
    /// Registers a subscription on `element` for `kind` that resolves the
    /// wait once `predicate` accepts a delivery.
    ///
    /// Fails like [`EventSystem::register`].
    pub fn new<P>(
        system: &EventSystem,
        ctx: &AccessContext,
        element: ElementId,
        kind: ChangeKind,
        predicate: P,
    ) -> EventResult<Self>
    where
        P: Fn(ElementId, ElementId, ElementId) -> bool + Send + Sync + 'static,
    {
        let wait = Wait::new(system.config().wait);
        let waiter = Arc::clone(wait.waiter());
        let callback = Callback::extended(move |_, delivery| {
            if predicate(delivery.watched, delivery.edge, delivery.other) {
                waiter.resolve();
                Ok(Outcome::Consumed)
            } else {
                Ok(Outcome::Ignored)
            }
        });
        let subscription = system.register(ctx, Registration::new(element, kind, callback))?;
        Ok(Self { wait, subscription })
    }

    /// The subscription feeding this wait.
    #[must_use]
    pub fn subscription(&self) -> &EventSubscription {
        &self.subscription
    }

    /// Returns true once a delivery satisfied the predicate.
    #[must_use]
    pub fn is_resolved(&self) -> bool {
        self.wait.is_resolved()
    }

    /// Resolves the wait directly, without a delivery.
    pub fn resolve(&self) {
        self.wait.resolve();
    }

    /// See [`Wait::set_on_wait_start`].
    pub fn set_on_wait_start<F>(&mut self, delegate: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.wait.set_on_wait_start(delegate);
    }

    /// Waits for the default timeout. Returns whether it resolved.
    pub fn wait(&self) -> bool {
        self.wait.wait()
    }

    /// Waits for at most `timeout`. Returns whether it resolved.
    pub fn wait_for(&self, timeout: Duration) -> bool {
        self.wait.wait_for(timeout)
    }

    /// Destroys the underlying subscription, reporting any error.
    pub fn destroy(self) -> EventResult<()> {
        self.subscription.destroy()
    }
}

impl fmt::Debug for ConditionWait {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConditionWait")
            .field("wait", &self.wait)
            .field("subscription", &self.subscription)
            .finish()
    }
}

/// Blocks until an action element is marked finished.
#[derive(Debug)]
pub struct ActionFinishedWait {
    action: ElementId,
    inner: ConditionWait,
}

impl ActionFinishedWait {
    /// Arms a wait for `action` to be marked finished.
    pub fn new(system: &EventSystem, ctx: &AccessContext, action: ElementId) -> EventResult<Self> {
        let inner = ConditionWait::new(system, ctx, action, ACTION_FINISHED_KIND, |_, _, _| true)?;
        Ok(Self { action, inner })
    }

    /// The watched action element.
    #[must_use]
    pub const fn action(&self) -> ElementId {
        self.action
    }

    /// Returns true once the action finished.
    #[must_use]
    pub fn is_resolved(&self) -> bool {
        self.inner.is_resolved()
    }

    /// See [`Wait::set_on_wait_start`].
    pub fn set_on_wait_start<F>(&mut self, delegate: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.inner.set_on_wait_start(delegate);
    }

    /// Waits for the default timeout. Returns whether the action finished.
    pub fn wait(&self) -> bool {
        self.inner.wait()
    }

    /// Waits for at most `timeout`. Returns whether the action finished.
    pub fn wait_for(&self, timeout: Duration) -> bool {
        self.inner.wait_for(timeout)
    }

    /// Destroys the underlying subscription.
    pub fn destroy(self) -> EventResult<()> {
        self.inner.destroy()
    }
}
