//! Abstract storage trait consumed by the event core.

use thiserror::Error;

use crate::element::{AccessLevels, ElementId};

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Element not found.
    #[error("Element not found: {0}")]
    ElementNotFound(ElementId),

    /// Backend error.
    #[error("Storage backend error: {0}")]
    BackendError(String),
}

/// The parts of the graph store the event core depends on.
///
/// # Safety Considerations
/// - Implementations are called from registration, destroy and emitter
///   threads concurrently
/// - `add_reference`/`release_reference` must be balanced by the store
pub trait ElementStore: Send + Sync {
    /// Returns the access levels guarding `element`.
    fn access_levels(&self, element: ElementId) -> Result<AccessLevels, StorageError>;

    /// Pins `element` so it is not freed while something watches it.
    fn add_reference(&self, element: ElementId) -> Result<(), StorageError>;

    /// Releases a pin taken with [`ElementStore::add_reference`].
    fn release_reference(&self, element: ElementId);
}
