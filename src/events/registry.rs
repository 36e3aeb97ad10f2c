//! Element → subscriptions table.
//!
//! One coarse mutex guards all structural changes and the lookup snapshot.
//! When both are needed the registry lock is taken before a subscription's
//! own lock, never the other way around.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::element::ElementId;
use crate::error::{EventError, EventResult};

use super::subscription::Subscription;

type Table = HashMap<ElementId, Vec<Arc<Subscription>>>;

/// Registered subscriptions keyed by watched element.
#[derive(Debug, Default)]
pub struct Registry {
    table: Mutex<Table>,
}

impl Registry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Takes the registry lock for a sequence of operations.
    pub fn lock(&self) -> RegistryGuard<'_> {
        RegistryGuard {
            table: self.table.lock().unwrap_or_else(PoisonError::into_inner),
        }
    }

    /// Appends `subscription` under the registry lock.
    pub fn insert(&self, subscription: Arc<Subscription>) {
        self.lock().insert(subscription);
    }

    /// Removes `subscription` under the registry lock.
    pub fn remove(&self, subscription: &Subscription) -> EventResult<()> {
        self.lock().remove(subscription)
    }

    /// Subscriptions registered on `element` at this instant.
    #[must_use]
    pub fn snapshot(&self, element: ElementId) -> Vec<Arc<Subscription>> {
        self.lock().snapshot(element)
    }

    /// Removes and returns every subscription on `element` in one step.
    pub fn detach(&self, element: ElementId) -> Vec<Arc<Subscription>> {
        self.lock().detach(element)
    }

    /// Total registered subscriptions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Returns true if nothing is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Number of elements with at least one subscription.
    #[must_use]
    pub fn element_count(&self) -> usize {
        self.lock().table.len()
    }
}

/// Registry lock held; see [`Registry::lock`].
#[derive(Debug)]
pub struct RegistryGuard<'a> {
    table: MutexGuard<'a, Table>,
}

impl RegistryGuard<'_> {
    /// Appends `subscription` to its element's list.
    pub fn insert(&mut self, subscription: Arc<Subscription>) {
        self.table.entry(subscription.element()).or_default().push(subscription);
    }

    /// Removes `subscription`, dropping the element's entry once it is empty.
    pub fn remove(&mut self, subscription: &Subscription) -> EventResult<()> {
        let element = subscription.element();
        let inconsistent = || EventError::RegistryInconsistency {
            element,
            subscription: subscription.id(),
        };

        let list = self.table.get_mut(&element).ok_or_else(inconsistent)?;
        let pos = list
            .iter()
            .position(|s| std::ptr::eq(Arc::as_ptr(s), subscription))
            .ok_or_else(inconsistent)?;
        list.remove(pos);
        if list.is_empty() {
            self.table.remove(&element);
        }
        Ok(())
    }

    /// Subscriptions registered on `element`.
    #[must_use]
    pub fn snapshot(&self, element: ElementId) -> Vec<Arc<Subscription>> {
        self.table.get(&element).cloned().unwrap_or_default()
    }

    /// Removes and returns every subscription on `element`.
    pub fn detach(&mut self, element: ElementId) -> Vec<Arc<Subscription>> {
        self.table.remove(&element).unwrap_or_default()
    }

    /// Total registered subscriptions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.table.values().map(Vec::len).sum()
    }

    /// Returns true if nothing is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::element::{AccessLevels, ChangeKind};
    use crate::events::subscription::{Callback, Outcome};

    fn sub(element: u64) -> Arc<Subscription> {
        Arc::new(Subscription::new(
            ElementId::new(element),
            ChangeKind::AddOutputEdge,
            AccessLevels::FULL,
            Callback::simple(|_, _| Ok(Outcome::Consumed)),
            None,
            None,
        ))
    }

    #[test]
    fn insert_keeps_registration_order() {
        let reg = Registry::new();
        let a = sub(1);
        let b = sub(1);
        reg.insert(Arc::clone(&a));
        reg.insert(Arc::clone(&b));

        let snap = reg.snapshot(ElementId::new(1));
        assert_eq!(snap.len(), 2);
        assert_eq!(snap[0].id(), a.id());
        assert_eq!(snap[1].id(), b.id());
        assert!(reg.snapshot(ElementId::new(2)).is_empty());
    }

    #[test]
    fn removing_last_subscription_drops_element_entry() {
        let reg = Registry::new();
        let a = sub(1);
        let b = sub(1);
        reg.insert(Arc::clone(&a));
        reg.insert(Arc::clone(&b));
        assert_eq!(reg.element_count(), 1);

        reg.remove(&a).unwrap();
        assert_eq!(reg.len(), 1);
        reg.remove(&b).unwrap();
        assert_eq!(reg.element_count(), 0);
        assert!(reg.is_empty());
    }

    #[test]
    fn removing_unknown_subscription_is_inconsistency() {
        let reg = Registry::new();
        let a = sub(1);
        let stranger = sub(1);
        reg.insert(Arc::clone(&a));

        let err = reg.remove(&stranger).unwrap_err();
        assert!(matches!(err, EventError::RegistryInconsistency { subscription, .. } if subscription == stranger.id()));
        let err = reg.remove(&sub(7)).unwrap_err();
        assert!(err.is_inconsistency());
        assert_eq!(reg.len(), 1);
    }

    #[test]
    fn detach_takes_whole_list() {
        let reg = Registry::new();
        for _ in 0..3 {
            reg.insert(sub(5));
        }
        reg.insert(sub(6));

        let detached = reg.detach(ElementId::new(5));
        assert_eq!(detached.len(), 3);
        assert!(reg.snapshot(ElementId::new(5)).is_empty());
        assert_eq!(reg.len(), 1);
        assert!(reg.detach(ElementId::new(5)).is_empty());
    }
}
