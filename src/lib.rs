//! # graphwatch - Event subscriptions for a graph memory store
//!
//! graphwatch lets clients register interest in structural changes on
//! elements of a graph store and be notified asynchronously when those
//! changes happen. Callbacks run on delivery worker threads, never on the
//! thread that produced the change, and destroying a subscription waits for
//! any delivery already in flight.
//!
//! ## Core Concepts
//!
//! - **Element**: an opaque node identity owned by the storage engine
//! - **Subscription**: interest in one [`ChangeKind`] on one element
//! - **Emit**: fan a change out to every matching, still-live subscription
//! - **Wait**: block until a subscription observes a condition, or time out
//!
//! ## Usage
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use graphwatch::{
//!     AccessContext, AccessLevels, Callback, ChangeKind, ElementId, EventSystem,
//!     EventSystemConfig, InMemoryElementStore, Outcome, Registration,
//! };
//!
//! let store = Arc::new(InMemoryElementStore::new());
//! let node = ElementId::new(1);
//! store.insert(node, AccessLevels::FULL)?;
//!
//! let events = EventSystem::initialize(EventSystemConfig::default(), store)?;
//! let sub = events.register(
//!     &AccessContext::full(),
//!     Registration::new(node, ChangeKind::AddOutputEdge, Callback::simple(|_, edge| {
//!         println!("new edge {edge}");
//!         Ok(Outcome::Consumed)
//!     })),
//! )?;
//!
//! events.emit(node, AccessLevels::FULL, ChangeKind::AddOutputEdge, ElementId::new(2), ElementId::new(3));
//! sub.destroy()?;
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod element;
pub mod error;
pub mod events;
pub mod storage;
pub mod wait;

// Re-export primary types at crate root for convenience
pub use config::{EventSystemConfig, WaitConfig};
pub use element::{AccessContext, AccessLevels, ChangeKind, ElementId};
pub use error::{CallbackError, EventError, EventResult};
pub use events::{
    Callback, CallbackResult, Delivery, DeliveryContext, DeliveryQueue, DeliveryStatus, EmitReport, EnqueueError,
    EventSubscription, EventSystem, Outcome, QueueStats, Registration, Subscription, SubscriptionId,
    WorkerQueue,
};
pub use storage::{ElementStore, InMemoryElementStore, StorageError};
pub use wait::{ActionFinishedWait, ConditionWait, Wait, Waiter, ACTION_FINISHED_KIND};
