//! Subscription records and their reference-counted lifecycle.
//!
//! A subscription starts with one implicit "alive" reference. Every delivery
//! in flight holds one more. The high bit of the counter is the
//! destroy-requested flag: once it is set no new delivery reference can be
//! taken, and the destroying thread waits for the live count to reach zero
//! before finalizing.
//!
//! All transitions of the counter and callback slot happen under the
//! subscription's own [`OwnerLock`], never under the registry lock.

use std::any::Any;
use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use tracing::warn;

use crate::element::{AccessLevels, ChangeKind, ElementId};
use crate::error::CallbackError;

use super::delivery::DeliveryContext;
use super::lock::{OwnerGuard, OwnerLock};
use super::SubscriptionId;

/// Destroy-requested flag, packed above the live reference count.
pub(crate) const DESTROY_REQUESTED: u32 = 1 << 31;
/// Bits holding the live reference count.
pub(crate) const LIVE_MASK: u32 = DESTROY_REQUESTED - 1;

/// What a callback did with a delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// The delivery was handled.
    Consumed,
    /// The delivery did not satisfy the subscriber; it stays armed.
    Ignored,
}

/// Result of a callback invocation.
pub type CallbackResult = Result<Outcome, CallbackError>;

type SimpleFn = dyn Fn(&Subscription, ElementId) -> CallbackResult + Send + Sync;
type ExtendedFn = dyn Fn(&Subscription, &DeliveryContext) -> CallbackResult + Send + Sync;

/// Subscriber callback.
///
/// `Simple` receives only the related edge; `Extended` receives the full
/// delivery context.
pub enum Callback {
    /// Called with the subscription and the related edge.
    Simple(Box<SimpleFn>),
    /// Called with the subscription and the whole delivery context.
    Extended(Box<ExtendedFn>),
}

impl Callback {
    /// Wraps an edge-only callback.
    pub fn simple<F>(f: F) -> Self
    where
        F: Fn(&Subscription, ElementId) -> CallbackResult + Send + Sync + 'static,
    {
        Self::Simple(Box::new(f))
    }

    /// Wraps a callback that wants the full [`DeliveryContext`].
    pub fn extended<F>(f: F) -> Self
    where
        F: Fn(&Subscription, &DeliveryContext) -> CallbackResult + Send + Sync + 'static,
    {
        Self::Extended(Box::new(f))
    }

    pub(crate) fn invoke(&self, subscription: &Subscription, ctx: &DeliveryContext) -> CallbackResult {
        match self {
            Self::Simple(f) => f(subscription, ctx.edge),
            Self::Extended(f) => f(subscription, ctx),
        }
    }
}

impl fmt::Debug for Callback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Simple(_) => f.write_str("Callback::Simple"),
            Self::Extended(_) => f.write_str("Callback::Extended"),
        }
    }
}

/// Cleanup hook run once the subscription is fully drained.
pub type OnDestroy = Box<dyn FnOnce(&Subscription) + Send>;

/// Opaque data attached at registration.
pub type UserData = Arc<dyn Any + Send + Sync>;

/// One registered interest in changes of `kind` on `element`.
pub struct Subscription {
    id: SubscriptionId,
    element: ElementId,
    kind: ChangeKind,
    access_levels: AccessLevels,
    user_data: Option<UserData>,
    lock: OwnerLock,
    refs: AtomicU32,
    callback: Mutex<Option<Arc<Callback>>>,
    on_destroy: Mutex<Option<OnDestroy>>,
    drain: Mutex<()>,
    drained: Condvar,
}

fn relock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Subscription {
    pub(crate) fn new(
        element: ElementId,
        kind: ChangeKind,
        access_levels: AccessLevels,
        callback: Callback,
        on_destroy: Option<OnDestroy>,
        user_data: Option<UserData>,
    ) -> Self {
        Self {
            id: SubscriptionId::new(),
            element,
            kind,
            access_levels,
            user_data,
            lock: OwnerLock::new(),
            refs: AtomicU32::new(1),
            callback: Mutex::new(Some(Arc::new(callback))),
            on_destroy: Mutex::new(on_destroy),
            drain: Mutex::new(()),
            drained: Condvar::new(),
        }
    }

    /// Unique id, used in logs.
    #[must_use]
    pub const fn id(&self) -> SubscriptionId {
        self.id
    }

    /// The watched element.
    #[must_use]
    pub const fn element(&self) -> ElementId {
        self.element
    }

    /// The change kind this subscription reacts to.
    #[must_use]
    pub const fn kind(&self) -> ChangeKind {
        self.kind
    }

    /// Access levels captured from the registering context.
    #[must_use]
    pub const fn access_levels(&self) -> AccessLevels {
        self.access_levels
    }

    /// Attached user data, if it has type `T`.
    #[must_use]
    pub fn user_data<T: Any>(&self) -> Option<&T> {
        self.user_data.as_deref().and_then(|d| d.downcast_ref::<T>())
    }

    /// Attached user data, untyped.
    #[must_use]
    pub fn raw_user_data(&self) -> Option<&UserData> {
        self.user_data.as_ref()
    }

    /// Returns true once destroy or element deletion has flagged it.
    #[must_use]
    pub fn is_destroy_requested(&self) -> bool {
        self.refs.load(Ordering::Acquire) & DESTROY_REQUESTED != 0
    }

    /// References currently held, including the implicit one while alive.
    #[must_use]
    pub fn live_references(&self) -> u32 {
        self.refs.load(Ordering::Acquire) & LIVE_MASK
    }

    pub(crate) fn lock(&self) -> OwnerGuard<'_> {
        self.lock.acquire()
    }

    /// Takes a delivery reference unless destroy was requested.
    pub(crate) fn try_acquire(self: &Arc<Self>) -> Option<DeliveryRef> {
        let _held = self.lock();
        let refs = self.refs.load(Ordering::Acquire);
        if refs & DESTROY_REQUESTED != 0 {
            return None;
        }
        assert!(
            refs & LIVE_MASK < LIVE_MASK,
            "subscription {} reference count overflow",
            self.id
        );
        self.refs.store(refs + 1, Ordering::Release);
        Some(DeliveryRef {
            subscription: Arc::clone(self),
        })
    }

    /// Drops one live reference and wakes a waiting destroyer.
    pub(crate) fn release(&self) {
        {
            let _held = self.lock();
            let refs = self.refs.load(Ordering::Acquire);
            assert!(refs & LIVE_MASK > 0, "subscription {} released below zero", self.id);
            self.refs.store(refs - 1, Ordering::Release);
        }
        let _drain = relock(&self.drain);
        self.drained.notify_all();
    }

    /// Sets the destroy-requested flag. Returns false if it was already set.
    ///
    /// The caller must hold this subscription's lock.
    pub(crate) fn mark_destroy_requested(&self, _held: &OwnerGuard<'_>) -> bool {
        let prev = self.refs.fetch_or(DESTROY_REQUESTED, Ordering::AcqRel);
        prev & DESTROY_REQUESTED == 0
    }

    /// Empties the callback slot so stale in-flight deliveries are skipped.
    pub(crate) fn clear_callback(&self, _held: &OwnerGuard<'_>) {
        relock(&self.callback).take();
    }

    pub(crate) fn callback(&self) -> Option<Arc<Callback>> {
        let _held = self.lock();
        relock(&self.callback).clone()
    }

    fn is_drained(&self) -> bool {
        let _held = self.lock();
        self.refs.load(Ordering::Acquire) == DESTROY_REQUESTED
    }

    /// Blocks until destroy is requested and no live reference remains.
    ///
    /// There is no upper bound: a callback that never returns keeps this
    /// waiting forever. A warning is logged once `warn_after` has elapsed.
    pub(crate) fn wait_drained(&self, warn_after: Duration) {
        let started = Instant::now();
        let mut warned = false;
        let mut guard = relock(&self.drain);
        while !self.is_drained() {
            let step = if warned {
                Duration::from_secs(1)
            } else {
                warn_after.saturating_sub(started.elapsed()).max(Duration::from_millis(1))
            };
            let (next, _timed_out) = self
                .drained
                .wait_timeout(guard, step)
                .unwrap_or_else(PoisonError::into_inner);
            guard = next;
            if !warned && started.elapsed() >= warn_after {
                warned = true;
                warn!(
                    subscription = %self.id,
                    element = %self.element,
                    live = self.live_references(),
                    "destroy still waiting for in-flight deliveries"
                );
            }
        }
    }

    pub(crate) fn take_on_destroy(&self) -> Option<OnDestroy> {
        let _held = self.lock();
        relock(&self.on_destroy).take()
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("element", &self.element)
            .field("kind", &self.kind)
            .field("access_levels", &self.access_levels)
            .field("live_references", &self.live_references())
            .field("destroy_requested", &self.is_destroy_requested())
            .finish_non_exhaustive()
    }
}

/// One delivery reference on a subscription, released on drop.
///
/// Whoever holds it keeps the subscription from finalizing. Dropping it is
/// the only way to release, so the release happens exactly once whether the
/// callback ran, failed, panicked or was never invoked.
#[derive(Debug)]
pub struct DeliveryRef {
    subscription: Arc<Subscription>,
}

impl DeliveryRef {
    /// The referenced subscription.
    #[must_use]
    pub fn subscription(&self) -> &Arc<Subscription> {
        &self.subscription
    }
}

impl Drop for DeliveryRef {
    fn drop(&mut self) {
        self.subscription.release();
    }
}
