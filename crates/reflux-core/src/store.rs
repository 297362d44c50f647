//! The state store boundary.
//!
//! The engine only needs three operations against the store: create,
//! get, and set a singleton. [`StateStore`] expresses them over
//! type-erased values so the engine can hold `Box<dyn StateStore>`;
//! [`StateStoreExt`] layers the typed API on top. [`MemoryStore`] is the
//! in-process implementation used by default.

use std::any::Any;
use std::marker::PhantomData;
use std::sync::Arc;

use indexmap::IndexMap;

use crate::action::State;
use crate::error::StoreError;
use crate::id::TypeKey;

/// A shared, type-erased state value.
pub type SharedState = Arc<dyn Any + Send + Sync>;

/// Storage for one singleton record per state type.
pub trait StateStore: Send {
    /// Insert the first value for `key`.
    ///
    /// Fails with [`StoreError::AlreadyExists`] if a value is present.
    fn create_erased(&mut self, key: TypeKey, value: SharedState) -> Result<(), StoreError>;

    /// The current value for `key`, if the singleton exists.
    fn get_erased(&self, key: TypeKey) -> Option<&SharedState>;

    /// Replace the value for `key`.
    ///
    /// Fails with [`StoreError::Missing`] if the singleton was never created.
    fn set_erased(&mut self, key: TypeKey, value: SharedState) -> Result<(), StoreError>;

    /// Whether a singleton exists for `key`.
    fn contains(&self, key: TypeKey) -> bool {
        self.get_erased(key).is_some()
    }

    /// Number of singletons stored.
    fn len(&self) -> usize;

    /// Whether the store is empty.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Typed handle returned by [`StateStoreExt::create_singleton`].
#[derive(Debug)]
pub struct SingletonHandle<T> {
    key: TypeKey,
    _marker: PhantomData<fn() -> T>,
}

impl<T: State> SingletonHandle<T> {
    fn new() -> Self {
        Self {
            key: TypeKey::of::<T>(),
            _marker: PhantomData,
        }
    }

    /// The state type this handle refers to.
    pub fn key(&self) -> TypeKey {
        self.key
    }

    /// Read the singleton through the handle.
    pub fn get<'s, S: StateStore + ?Sized>(&self, store: &'s S) -> Option<&'s T> {
        store.get_singleton::<T>()
    }
}

impl<T> Clone for SingletonHandle<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for SingletonHandle<T> {}

/// Typed convenience methods over any [`StateStore`].
pub trait StateStoreExt: StateStore {
    /// Create the singleton for `T` with its initial value.
    fn create_singleton<T: State>(&mut self, initial: T) -> Result<SingletonHandle<T>, StoreError> {
        self.create_erased(TypeKey::of::<T>(), Arc::new(initial))?;
        Ok(SingletonHandle::new())
    }

    /// Borrow the singleton for `T`, if it exists.
    fn get_singleton<T: State>(&self) -> Option<&T> {
        self.get_erased(TypeKey::of::<T>())
            .and_then(|value| value.downcast_ref::<T>())
    }

    /// Replace the singleton for `T`.
    fn set_singleton<T: State>(&mut self, value: T) -> Result<(), StoreError> {
        self.set_erased(TypeKey::of::<T>(), Arc::new(value))
    }
}

impl<S: StateStore + ?Sized> StateStoreExt for S {}

/// In-memory singleton store keyed by state type.
///
/// Iteration order is creation order.
#[derive(Default)]
pub struct MemoryStore {
    values: IndexMap<TypeKey, SharedState>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// State types in creation order.
    pub fn keys(&self) -> impl Iterator<Item = TypeKey> + '_ {
        self.values.keys().copied()
    }
}

impl StateStore for MemoryStore {
    fn create_erased(&mut self, key: TypeKey, value: SharedState) -> Result<(), StoreError> {
        if self.values.contains_key(&key) {
            return Err(StoreError::AlreadyExists { state: key.name() });
        }
        self.values.insert(key, value);
        Ok(())
    }

    fn get_erased(&self, key: TypeKey) -> Option<&SharedState> {
        self.values.get(&key)
    }

    fn set_erased(&mut self, key: TypeKey, value: SharedState) -> Result<(), StoreError> {
        match self.values.get_mut(&key) {
            Some(slot) => {
                *slot = value;
                Ok(())
            }
            None => Err(StoreError::Missing { state: key.name() }),
        }
    }

    fn len(&self) -> usize {
        self.values.len()
    }
}

impl std::fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryStore")
            .field(
                "states",
                &self.values.keys().map(|k| k.short_name()).collect::<Vec<_>>(),
            )
            .finish()
    }
}
