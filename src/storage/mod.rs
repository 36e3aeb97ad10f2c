//! Storage collaborator interface.
//!
//! The event core does not own graph elements. It asks the store for access
//! levels and pins watched elements with an external reference while a
//! subscription is alive. `InMemoryElementStore` is the reference backend.

mod memory;
mod traits;

pub use memory::InMemoryElementStore;
pub use traits::{ElementStore, StorageError};
