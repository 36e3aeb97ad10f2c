//! The event system: registration, destroy, emit and lifecycle.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use tracing::{debug, error, warn};

use crate::config::EventSystemConfig;
use crate::element::{AccessContext, AccessLevels, ChangeKind, ElementId};
use crate::error::{EventError, EventResult};
use crate::storage::{ElementStore, StorageError};

use super::delivery::Delivery;
use super::queue::{DeliveryQueue, QueueStats, WorkerQueue};
use super::registry::Registry;
use super::subscription::{Callback, OnDestroy, Subscription, UserData};
use super::SubscriptionId;

/// Everything needed to register a subscription.
///
/// ```
/// use graphwatch::{Callback, ChangeKind, ElementId, Outcome, Registration};
///
/// let reg = Registration::new(
///     ElementId::new(7),
///     ChangeKind::AddOutputEdge,
///     Callback::simple(|_, _edge| Ok(Outcome::Consumed)),
/// )
/// .with_user_data(42u32);
/// assert_eq!(reg.element(), ElementId::new(7));
/// ```
pub struct Registration {
    element: ElementId,
    kind: ChangeKind,
    callback: Callback,
    on_destroy: Option<OnDestroy>,
    user_data: Option<UserData>,
}

impl Registration {
    /// Interest in `kind` changes on `element`, delivered to `callback`.
    #[must_use]
    pub fn new(element: ElementId, kind: ChangeKind, callback: Callback) -> Self {
        Self {
            element,
            kind,
            callback,
            on_destroy: None,
            user_data: None,
        }
    }

    /// Attaches opaque data retrievable through [`Subscription::user_data`].
    #[must_use]
    pub fn with_user_data<T: Any + Send + Sync>(mut self, data: T) -> Self {
        self.user_data = Some(Arc::new(data));
        self
    }

    /// Runs `f` once the subscription has been destroyed and fully drained.
    #[must_use]
    pub fn on_destroy<F>(mut self, f: F) -> Self
    where
        F: FnOnce(&Subscription) + Send + 'static,
    {
        self.on_destroy = Some(Box::new(f));
        self
    }

    /// The element to watch.
    #[must_use]
    pub const fn element(&self) -> ElementId {
        self.element
    }

    /// The change kind to react to.
    #[must_use]
    pub const fn kind(&self) -> ChangeKind {
        self.kind
    }
}

impl fmt::Debug for Registration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registration")
            .field("element", &self.element)
            .field("kind", &self.kind)
            .field("callback", &self.callback)
            .field("on_destroy", &self.on_destroy.is_some())
            .field("user_data", &self.user_data.is_some())
            .finish()
    }
}

/// What one emit did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EmitReport {
    /// Subscriptions in the registry snapshot matching kind and access.
    pub matched: usize,
    /// Deliveries handed to the queue.
    pub queued: usize,
}

/// State shared between the system and outstanding subscription handles.
struct EventCore {
    registry: Registry,
    store: Arc<dyn ElementStore>,
    config: EventSystemConfig,
}

impl EventCore {
    fn destroy(&self, sub: &Subscription) -> EventResult<()> {
        {
            let mut registry = self.registry.lock();
            let held = sub.lock();
            // Already flagged by an element-deleted notification: only the
            // implicit reference is left to release.
            if !sub.is_destroy_requested() {
                if let Err(err) = registry.remove(sub) {
                    error!(
                        subscription = %sub.id(),
                        element = %sub.element(),
                        "subscription missing from registry on destroy"
                    );
                    return Err(err);
                }
                sub.mark_destroy_requested(&held);
                sub.clear_callback(&held);
            }
        }

        sub.release();
        sub.wait_drained(self.config.drain_warn_after());

        self.store.release_reference(sub.element());
        if let Some(on_destroy) = sub.take_on_destroy() {
            on_destroy(sub);
        }
        debug!(subscription = %sub.id(), element = %sub.element(), "subscription destroyed");
        Ok(())
    }
}

/// In-process event subscription engine for one graph store.
///
/// Construct it with [`EventSystem::initialize`]; dropping it shuts the
/// delivery queue down after draining pending deliveries.
pub struct EventSystem {
    core: Arc<EventCore>,
    queue: Arc<dyn DeliveryQueue>,
}

impl EventSystem {
    /// Creates the registry and starts the default worker queue.
    pub fn initialize(config: EventSystemConfig, store: Arc<dyn ElementStore>) -> EventResult<Self> {
        let queue = WorkerQueue::start(config.delivery_workers, config.delivery_queue_capacity)?;
        Ok(Self::with_queue(config, store, Arc::new(queue)))
    }

    /// Creates the registry over a caller-provided delivery queue.
    pub fn with_queue(
        config: EventSystemConfig,
        store: Arc<dyn ElementStore>,
        queue: Arc<dyn DeliveryQueue>,
    ) -> Self {
        Self {
            core: Arc::new(EventCore {
                registry: Registry::new(),
                store,
                config,
            }),
            queue,
        }
    }

    /// The configuration the system was built with.
    #[must_use]
    pub fn config(&self) -> &EventSystemConfig {
        &self.core.config
    }

    /// Registers a subscription on behalf of `ctx`.
    ///
    /// Fails if the element is empty or absent, or if `ctx` may not read it.
    /// On success the element is pinned in the store until the subscription
    /// is destroyed.
    pub fn register(&self, ctx: &AccessContext, registration: Registration) -> EventResult<EventSubscription> {
        let Registration {
            element,
            kind,
            callback,
            on_destroy,
            user_data,
        } = registration;

        if element.is_empty() {
            return Err(EventError::InvalidElement { element });
        }

        let store = &self.core.store;
        let required = store.access_levels(element).map_err(storage_err)?;
        let granted = ctx.levels();
        if !granted.can_read(required) {
            return Err(EventError::AccessDenied {
                element,
                required,
                granted,
            });
        }
        store.add_reference(element).map_err(storage_err)?;

        let subscription = Arc::new(Subscription::new(element, kind, granted, callback, on_destroy, user_data));
        self.core.registry.insert(Arc::clone(&subscription));
        debug!(subscription = %subscription.id(), element = %element, kind = ?kind, "subscription registered");

        Ok(EventSubscription {
            core: Arc::clone(&self.core),
            subscription,
            destroyed: false,
        })
    }

    /// Notifies subscribers of `element` that a change of `kind` happened.
    ///
    /// Every subscription with a matching kind whose captured access levels
    /// can read `change_access` gets one delivery queued. The candidate list
    /// is a single registry snapshot; delivery references are taken after the
    /// registry lock is released. Never waits for a callback.
    ///
    /// # Panics
    ///
    /// Panics if `element` is empty.
    pub fn emit(
        &self,
        element: ElementId,
        change_access: AccessLevels,
        kind: ChangeKind,
        edge: ElementId,
        other: ElementId,
    ) -> EmitReport {
        assert!(!element.is_empty(), "emit called for the empty element");

        let mut report = EmitReport::default();
        let candidates = self.core.registry.snapshot(element);
        for sub in candidates {
            if sub.kind() != kind || !sub.access_levels().can_read(change_access) {
                continue;
            }
            report.matched += 1;
            let Some(reference) = sub.try_acquire() else {
                continue;
            };
            match self.queue.enqueue(Delivery::new(reference, edge, other)) {
                Ok(()) => report.queued += 1,
                Err(err) => {
                    warn!(subscription = %sub.id(), element = %element, error = %err, "delivery dropped");
                }
            }
        }
        report
    }

    /// Detaches every subscription on a deleted element and blocks new
    /// deliveries to them. Returns how many were detached.
    ///
    /// Handles stay valid; destroying them completes the cleanup.
    pub fn notify_element_deleted(&self, element: ElementId) -> usize {
        let detached = {
            let mut registry = self.core.registry.lock();
            let detached = registry.detach(element);
            for sub in &detached {
                let held = sub.lock();
                sub.mark_destroy_requested(&held);
            }
            detached
        };
        if !detached.is_empty() {
            debug!(element = %element, count = detached.len(), "element deleted, subscriptions detached");
        }
        detached.len()
    }

    /// Number of registered subscriptions.
    #[must_use]
    pub fn subscription_count(&self) -> usize {
        self.core.registry.len()
    }

    /// Delivery counters from the queue.
    #[must_use]
    pub fn stats(&self) -> QueueStats {
        self.queue.stats()
    }

    /// Stops the delivery queue after running pending deliveries.
    pub fn shutdown(&self) {
        self.queue.shutdown();
    }

    /// Stops the delivery queue, discarding pending deliveries.
    pub fn stop_processing(&self) {
        self.queue.stop_processing();
    }
}

impl Drop for EventSystem {
    fn drop(&mut self) {
        self.queue.shutdown();
    }
}

impl fmt::Debug for EventSystem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventSystem")
            .field("config", &self.core.config)
            .field("subscriptions", &self.core.registry.len())
            .finish_non_exhaustive()
    }
}

fn storage_err(err: StorageError) -> EventError {
    match err {
        StorageError::ElementNotFound(element) => EventError::ElementNotFound { element },
        other => EventError::Storage(other),
    }
}

/// Owning handle to a registered subscription.
///
/// Dropping the handle destroys the subscription, blocking until in-flight
/// deliveries finish. Do not drop or destroy it from inside its own callback:
/// the callback's delivery reference would never be released.
pub struct EventSubscription {
    core: Arc<EventCore>,
    subscription: Arc<Subscription>,
    destroyed: bool,
}

impl EventSubscription {
    /// Id of the underlying subscription.
    #[must_use]
    pub fn id(&self) -> SubscriptionId {
        self.subscription.id()
    }

    /// The watched change kind.
    #[must_use]
    pub fn kind(&self) -> ChangeKind {
        self.subscription.kind()
    }

    /// The watched element.
    #[must_use]
    pub fn element(&self) -> ElementId {
        self.subscription.element()
    }

    /// Attached user data, if it has type `T`.
    #[must_use]
    pub fn user_data<T: Any>(&self) -> Option<&T> {
        self.subscription.user_data::<T>()
    }

    /// The shared subscription record.
    #[must_use]
    pub fn subscription(&self) -> &Arc<Subscription> {
        &self.subscription
    }

    /// Unregisters the subscription and waits for in-flight deliveries.
    ///
    /// After this returns no callback for it is running or will run, and
    /// the `on_destroy` hook (if any) has been called.
    pub fn destroy(mut self) -> EventResult<()> {
        self.destroyed = true;
        self.core.destroy(&self.subscription)
    }
}

impl Drop for EventSubscription {
    fn drop(&mut self) {
        if self.destroyed {
            return;
        }
        self.destroyed = true;
        if let Err(err) = self.core.destroy(&self.subscription) {
            warn!(subscription = %self.subscription.id(), error = %err, "destroy on drop failed");
        }
    }
}

impl fmt::Debug for EventSubscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventSubscription")
            .field("subscription", &self.subscription)
            .field("destroyed", &self.destroyed)
            .finish_non_exhaustive()
    }
}
