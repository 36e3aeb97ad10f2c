//! In-memory storage backend.
//!
//! Thread-safe element table with access levels and external reference
//! counts. It is intended for embedded usage, tests, and as a reference
//! implementation of [`ElementStore`].

use std::collections::HashMap;
use std::sync::RwLock;

use tracing::warn;

use crate::element::{AccessLevels, ElementId};
use crate::storage::traits::{ElementStore, StorageError};

fn lock_err(context: &'static str) -> StorageError {
    StorageError::BackendError(format!("poisoned lock: {context}"))
}

#[derive(Debug, Clone, Copy)]
struct ElementRecord {
    levels: AccessLevels,
    refs: u32,
}

/// In-memory element table.
#[derive(Debug, Default)]
pub struct InMemoryElementStore {
    elements: RwLock<HashMap<ElementId, ElementRecord>>,
}

impl InMemoryElementStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds (or replaces) an element guarded by `levels`.
    pub fn insert(&self, element: ElementId, levels: AccessLevels) -> Result<(), StorageError> {
        if element.is_empty() {
            return Err(StorageError::BackendError("cannot insert the empty element".to_string()));
        }
        let mut elements = self.elements.write().map_err(|_| lock_err("element.insert"))?;
        let refs = elements.get(&element).map_or(0, |r| r.refs);
        elements.insert(element, ElementRecord { levels, refs });
        Ok(())
    }

    /// Removes an element. Returns the external references still held on it.
    ///
    /// The caller is expected to notify the event system afterwards.
    pub fn remove(&self, element: ElementId) -> Result<u32, StorageError> {
        let mut elements = self.elements.write().map_err(|_| lock_err("element.remove"))?;
        elements
            .remove(&element)
            .map(|r| r.refs)
            .ok_or(StorageError::ElementNotFound(element))
    }

    /// Returns true if `element` is present.
    #[must_use]
    pub fn contains(&self, element: ElementId) -> bool {
        self.elements
            .read()
            .map(|elements| elements.contains_key(&element))
            .unwrap_or(false)
    }

    /// Current external reference count, or `None` for an absent element.
    #[must_use]
    pub fn reference_count(&self, element: ElementId) -> Option<u32> {
        self.elements
            .read()
            .ok()
            .and_then(|elements| elements.get(&element).map(|r| r.refs))
    }
}

impl ElementStore for InMemoryElementStore {
    fn access_levels(&self, element: ElementId) -> Result<AccessLevels, StorageError> {
        let elements = self.elements.read().map_err(|_| lock_err("element.access_levels"))?;
        elements
            .get(&element)
            .map(|r| r.levels)
            .ok_or(StorageError::ElementNotFound(element))
    }

    fn add_reference(&self, element: ElementId) -> Result<(), StorageError> {
        let mut elements = self.elements.write().map_err(|_| lock_err("element.add_reference"))?;
        let record = elements
            .get_mut(&element)
            .ok_or(StorageError::ElementNotFound(element))?;
        record.refs = record
            .refs
            .checked_add(1)
            .ok_or_else(|| StorageError::BackendError(format!("reference overflow on {element}")))?;
        Ok(())
    }

    fn release_reference(&self, element: ElementId) {
        let Ok(mut elements) = self.elements.write() else {
            warn!(element = %element, "poisoned element table, reference not released");
            return;
        };
        // Removed elements have no record left to update.
        if let Some(record) = elements.get_mut(&element) {
            record.refs = record.refs.saturating_sub(1);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn references_are_counted_per_element() {
        let store = InMemoryElementStore::new();
        let a = ElementId::new(1);
        store.insert(a, AccessLevels::FULL).unwrap();

        store.add_reference(a).unwrap();
        store.add_reference(a).unwrap();
        assert_eq!(store.reference_count(a), Some(2));

        store.release_reference(a);
        assert_eq!(store.reference_count(a), Some(1));
    }

    #[test]
    fn missing_element_reports_not_found() {
        let store = InMemoryElementStore::new();
        let err = store.access_levels(ElementId::new(5)).unwrap_err();
        assert!(matches!(err, StorageError::ElementNotFound(id) if id == ElementId::new(5)));
        assert!(store.add_reference(ElementId::new(5)).is_err());
    }

    #[test]
    fn reinsert_keeps_references_and_updates_levels() {
        let store = InMemoryElementStore::new();
        let a = ElementId::new(2);
        store.insert(a, AccessLevels::NONE).unwrap();
        store.add_reference(a).unwrap();
        store.insert(a, AccessLevels::new(3, 3)).unwrap();
        assert_eq!(store.reference_count(a), Some(1));
        assert_eq!(store.access_levels(a).unwrap(), AccessLevels::new(3, 3));
    }

    #[test]
    fn remove_returns_outstanding_references() {
        let store = InMemoryElementStore::new();
        let a = ElementId::new(3);
        store.insert(a, AccessLevels::FULL).unwrap();
        store.add_reference(a).unwrap();
        assert_eq!(store.remove(a).unwrap(), 1);
        assert!(!store.contains(a));
        // Releasing after removal is a no-op.
        store.release_reference(a);
        assert!(store.insert(ElementId::EMPTY, AccessLevels::FULL).is_err());
    }
}
