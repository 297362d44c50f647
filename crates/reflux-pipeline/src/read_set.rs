//! Per-cycle read sets for precompiled handlers.
//!
//! A [`ReadSet`] is captured once at the start of a cycle from the union
//! of states declared by precompiled handlers. Values are shared
//! snapshots (`Arc` clones), so building one never copies state data and
//! later writes to the store do not affect it.

use indexmap::IndexMap;
use reflux_core::{SharedState, State, StateStore, TypeKey};

/// Cycle-start snapshot of the states precompiled handlers may read.
#[derive(Default)]
pub struct ReadSet {
    values: IndexMap<TypeKey, SharedState>,
}

impl ReadSet {
    /// An empty read set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Capture the current values of `keys` from `store`.
    ///
    /// States that do not exist yet are left out; reads of them return
    /// `None` for the whole cycle.
    pub fn capture(store: &dyn StateStore, keys: &[TypeKey]) -> Self {
        let mut values = IndexMap::with_capacity(keys.len());
        for &key in keys {
            if let Some(value) = store.get_erased(key) {
                values.insert(key, SharedState::clone(value));
            }
        }
        Self { values }
    }

    /// Borrow a captured state.
    pub fn get<S: State>(&self) -> Option<&S> {
        self.values
            .get(&TypeKey::of::<S>())
            .and_then(|value| value.downcast_ref::<S>())
    }

    /// Number of captured states.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether nothing was captured.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl std::fmt::Debug for ReadSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_set()
            .entries(self.values.keys().map(|k| k.short_name()))
            .finish()
    }
}

/// A [`ReadSet`] filtered to the states one handler declared.
#[derive(Clone, Copy)]
pub struct ReadView<'a> {
    set: &'a ReadSet,
    declared: &'a [TypeKey],
}

impl<'a> ReadView<'a> {
    /// Restrict `set` to `declared`.
    pub fn new(set: &'a ReadSet, declared: &'a [TypeKey]) -> Self {
        Self { set, declared }
    }

    /// Borrow a declared, captured state.
    ///
    /// Returns `None` if `S` was not declared or did not exist at cycle start.
    pub fn get<S: State>(&self) -> Option<&'a S> {
        let key = TypeKey::of::<S>();
        if !self.declared.contains(&key) {
            return None;
        }
        self.set.get::<S>()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reflux_core::{MemoryStore, StateStoreExt};

    #[derive(Clone, Debug, PartialEq)]
    struct Armor(i32);

    #[derive(Clone, Debug, PartialEq)]
    struct Weather(u8);

    #[test]
    fn capture_is_a_snapshot() {
        let mut store = MemoryStore::new();
        store.create_singleton(Armor(3)).unwrap();
        let set = ReadSet::capture(&store, &[TypeKey::of::<Armor>()]);
        store.set_singleton(Armor(9)).unwrap();
        assert_eq!(set.get::<Armor>(), Some(&Armor(3)));
    }

    #[test]
    fn missing_states_are_skipped() {
        let store = MemoryStore::new();
        let set = ReadSet::capture(&store, &[TypeKey::of::<Armor>()]);
        assert!(set.is_empty());
        assert!(set.get::<Armor>().is_none());
    }

    #[test]
    fn view_hides_undeclared_states() {
        let mut store = MemoryStore::new();
        store.create_singleton(Armor(1)).unwrap();
        store.create_singleton(Weather(2)).unwrap();
        let set = ReadSet::capture(
            &store,
            &[TypeKey::of::<Armor>(), TypeKey::of::<Weather>()],
        );
        let declared = [TypeKey::of::<Armor>()];
        let view = ReadView::new(&set, &declared);
        assert_eq!(view.get::<Armor>(), Some(&Armor(1)));
        assert!(view.get::<Weather>().is_none());
    }
}
