//! Error types for graphwatch.
//!
//! Recoverable failures are strongly typed using thiserror. Conditions that
//! indicate a broken invariant (lock released by a thread that does not own
//! it, reference count overflow, emitting on the empty element) are not
//! represented here: they panic.

use thiserror::Error;

use crate::element::{AccessLevels, ElementId};
use crate::events::SubscriptionId;
use crate::storage::StorageError;

/// Errors reported by the event system.
#[derive(Debug, Error)]
pub enum EventError {
    /// The empty element was passed where a real one is required
    #[error("Invalid element: {element}")]
    InvalidElement {
        /// Offending element
        element: ElementId,
    },

    /// The element is not present in the store
    #[error("Element not found: {element}")]
    ElementNotFound {
        /// Missing element
        element: ElementId,
    },

    /// The caller's read level is below the element's requirement
    #[error("Access denied to {element}: requires {required}, caller has {granted}")]
    AccessDenied {
        /// Element the caller tried to watch
        element: ElementId,
        /// Levels the element demands
        required: AccessLevels,
        /// Levels the caller holds
        granted: AccessLevels,
    },

    /// A subscription being destroyed was not in the registry
    #[error("Subscription {subscription} is not registered on {element}")]
    RegistryInconsistency {
        /// Element the subscription watches
        element: ElementId,
        /// The missing subscription
        subscription: SubscriptionId,
    },

    /// Storage backend error
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// Internal error
    #[error("Internal error: {message}")]
    Internal {
        /// What went wrong
        message: String,
    },
}

impl EventError {
    /// Creates an internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Returns true if the watched element was empty or absent.
    #[must_use]
    pub const fn is_invalid_element(&self) -> bool {
        matches!(self, Self::InvalidElement { .. } | Self::ElementNotFound { .. })
    }

    /// Returns true if the caller lacked read access.
    #[must_use]
    pub const fn is_access_denied(&self) -> bool {
        matches!(self, Self::AccessDenied { .. })
    }

    /// Returns true if this error points at a bookkeeping defect rather than bad input.
    #[must_use]
    pub const fn is_inconsistency(&self) -> bool {
        matches!(self, Self::RegistryInconsistency { .. } | Self::Internal { .. })
    }
}

/// Error returned by a subscription callback.
///
/// The delivery still counts as consumed; the failure is logged and counted.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("callback failed: {message}")]
pub struct CallbackError {
    message: String,
}

impl CallbackError {
    /// Creates a callback error with a message.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    /// The failure message.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }
}

/// Result type alias for event system operations.
pub type EventResult<T> = Result<T, EventError>;
