//! Change detection after the reducer phase.
//!
//! The detector records the value of each state type the first time a
//! reducer targets it in a cycle. States are only mutated during the
//! reducer phase, so that first look is the cycle-start value. After the
//! phase, each touched state is compared against its recorded value and
//! at most one [`ChangeEvent`] is produced per state type.

use indexmap::IndexMap;
use reflux_core::{CycleId, Priority, SharedState, StateStore, TypeKey};
use reflux_pipeline::Registry;

use crate::notify::{ChangeEvent, NotificationQueue};

/// Tracks reduction targets for one cycle.
#[derive(Debug, Default)]
pub struct ChangeDetector {
    touched: IndexMap<TypeKey, Option<SharedState>>,
}

impl ChangeDetector {
    /// Create an idle detector.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `state` as a reduction target, capturing its value on first touch.
    pub fn touch(&mut self, state: TypeKey, store: &dyn StateStore) {
        self.touched
            .entry(state)
            .or_insert_with(|| store.get_erased(state).cloned());
    }

    /// State types touched so far this cycle, in first-touch order.
    pub fn touched(&self) -> impl Iterator<Item = TypeKey> + '_ {
        self.touched.keys().copied()
    }

    /// Compare touched states with their recorded values and enqueue events.
    ///
    /// Resets the detector. Returns the number of events enqueued.
    pub fn detect(
        &mut self,
        cycle: CycleId,
        registry: &Registry,
        store: &dyn StateStore,
        queue: &mut NotificationQueue,
    ) -> usize {
        let mut enqueued = 0;
        for (key, before) in self.touched.drain(..) {
            let Some(after) = store.get_erased(key) else {
                continue;
            };
            let entry = registry.state(key);
            let changed = match (&before, entry) {
                (None, _) => true,
                (Some(before), Some(entry)) => !entry.values_equal(before, after),
                (Some(before), None) => !SharedState::ptr_eq(before, after),
            };
            if !changed {
                continue;
            }
            let priority = entry.map_or(Priority::default(), |e| e.priority());
            tracing::trace!(state = %key, %priority, "state changed");
            queue.push(ChangeEvent {
                state: key,
                priority,
                cycle,
                new: SharedState::clone(after),
                old: before,
            });
            enqueued += 1;
        }
        enqueued
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reflux_core::{MemoryStore, StateStoreExt};

    #[derive(Clone, Debug, PartialEq)]
    struct Health(i32);

    #[derive(Clone, Debug, PartialEq)]
    struct Mana(i32);

    fn registry() -> Registry {
        Registry::builder()
            .state::<Health>(Priority::Critical)
            .state::<Mana>(Priority::Normal)
            .build()
            .unwrap()
    }

    #[test]
    fn one_event_per_state_regardless_of_touches() {
        let registry = registry();
        let mut store = MemoryStore::new();
        store.create_singleton(Health(10)).unwrap();
        let mut detector = ChangeDetector::new();
        let mut queue = NotificationQueue::new();

        detector.touch(TypeKey::of::<Health>(), &store);
        store.set_singleton(Health(8)).unwrap();
        detector.touch(TypeKey::of::<Health>(), &store);
        store.set_singleton(Health(5)).unwrap();

        assert_eq!(detector.detect(CycleId(1), &registry, &store, &mut queue), 1);
        let event = queue.pop().unwrap();
        assert_eq!(event.priority, Priority::Critical);
        assert_eq!(event.old_value::<Health>(), Some(&Health(10)));
        assert_eq!(event.new_value::<Health>(), Some(&Health(5)));
        assert!(queue.is_empty());
    }

    #[test]
    fn equal_value_produces_no_event() {
        let registry = registry();
        let mut store = MemoryStore::new();
        store.create_singleton(Mana(3)).unwrap();
        let mut detector = ChangeDetector::new();
        let mut queue = NotificationQueue::new();

        detector.touch(TypeKey::of::<Mana>(), &store);
        store.set_singleton(Mana(3)).unwrap();
        assert_eq!(detector.detect(CycleId(1), &registry, &store, &mut queue), 0);
        assert!(queue.is_empty());
        assert_eq!(detector.touched().count(), 0);
    }

    #[test]
    fn missing_singleton_is_ignored() {
        let registry = registry();
        let store = MemoryStore::new();
        let mut detector = ChangeDetector::new();
        let mut queue = NotificationQueue::new();
        detector.touch(TypeKey::of::<Health>(), &store);
        assert_eq!(detector.detect(CycleId(1), &registry, &store, &mut queue), 0);
    }
}
