//! Event subscription and notification engine.
//!
//! Clients register interest in a [`ChangeKind`](crate::ChangeKind) on one
//! element; producers of changes call [`EventSystem::emit`], which hands a
//! [`Delivery`] for every matching live subscription to the delivery queue
//! and returns without running any callback. Destroying a subscription
//! blocks until its in-flight deliveries have finished.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Delivery units and their outcome.
pub mod delivery;
/// Per-subscription reentrant lock.
pub mod lock;
/// Callback execution off the emitting thread.
pub mod queue;
/// Element → subscription table.
pub mod registry;
/// Subscription records and reference counting.
pub mod subscription;
/// Registration, destroy, emit and lifecycle.
pub mod system;

pub use delivery::{Delivery, DeliveryContext, DeliveryStatus};
pub use queue::{DeliveryQueue, EnqueueError, QueueStats, WorkerQueue};
pub use registry::Registry;
pub use subscription::{Callback, CallbackResult, DeliveryRef, OnDestroy, Outcome, Subscription, UserData};
pub use system::{EmitReport, EventSubscription, EventSystem, Registration};

/// Unique identifier for a subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubscriptionId(Uuid);

impl SubscriptionId {
    /// Create a new random subscription id.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Wrap an existing UUID.
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl Default for SubscriptionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
