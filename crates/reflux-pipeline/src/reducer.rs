//! The [`Reducer`] and [`BatchReducer`] traits and the reduction context.
//!
//! A reducer is a pure transformation from `(current state, action)` to a
//! new state. The engine owns the store; reducers never write to it. A
//! reducer whose target singleton does not exist yet is a no-op for that
//! record.

use reflux_core::{Action, CycleId, HandlerError, State, StateStore, StateStoreExt, TypeKey};

use crate::read_set::ReadView;

/// Read access for general-mode reducers.
///
/// Reads go to the live store, so a reducer sees the writes of reducers
/// that ran earlier in the same cycle. Only declared states may be read.
pub struct ReduceContext<'a> {
    store: &'a dyn StateStore,
    declared: &'a [TypeKey],
    handler: &'a str,
    cycle: CycleId,
}

impl<'a> ReduceContext<'a> {
    /// Construct a context. Typically called by the engine.
    pub fn new(
        store: &'a dyn StateStore,
        declared: &'a [TypeKey],
        handler: &'a str,
        cycle: CycleId,
    ) -> Self {
        Self {
            store,
            declared,
            handler,
            cycle,
        }
    }

    /// The cycle being processed.
    pub fn cycle(&self) -> CycleId {
        self.cycle
    }

    /// Borrow a declared state.
    ///
    /// # Errors
    ///
    /// [`HandlerError::UndeclaredRead`] if `S` is not in the reducer's
    /// [`reads()`](Reducer::reads), [`HandlerError::MissingContext`] if the
    /// singleton does not exist.
    pub fn require<S: State>(&self) -> Result<&'a S, HandlerError> {
        let key = TypeKey::of::<S>();
        if !self.declared.contains(&key) {
            return Err(HandlerError::UndeclaredRead {
                handler: self.handler.to_string(),
                state: key.name(),
            });
        }
        self.store
            .get_singleton::<S>()
            .ok_or(HandlerError::MissingContext { state: key.name() })
    }
}

/// A pure state transformation for state `S` and action `A`.
///
/// # Contract
///
/// - `reduce()` must not have side effects; its only output is the
///   returned state.
/// - Returning `Err` (or panicking) leaves the state unchanged for this
///   record; later records still run.
/// - `reads()` is called once at registration.
///
/// # Examples
///
/// ```
/// use reflux_core::HandlerError;
/// use reflux_pipeline::{ReduceContext, Reducer};
///
/// #[derive(Clone, PartialEq)]
/// struct Health { hp: i32 }
/// struct ApplyDamage { amount: i32 }
///
/// struct DamageReducer;
///
/// impl Reducer<Health, ApplyDamage> for DamageReducer {
///     fn name(&self) -> &str { "damage" }
///
///     fn reduce(
///         &self,
///         state: &Health,
///         action: &ApplyDamage,
///         _ctx: &ReduceContext<'_>,
///     ) -> Result<Health, HandlerError> {
///         Ok(Health { hp: state.hp - action.amount })
///     }
/// }
/// ```
pub trait Reducer<S: State, A: Action>: Send + Sync + 'static {
    /// Human-readable name for logs and introspection.
    fn name(&self) -> &str;

    /// Other states this reducer reads through [`ReduceContext::require`].
    ///
    /// Default: none.
    fn reads(&self) -> Vec<TypeKey> {
        Vec::new()
    }

    /// Produce the next state.
    fn reduce(&self, state: &S, action: &A, ctx: &ReduceContext<'_>) -> Result<S, HandlerError>;
}

/// A precompiled reducer applied to runs of records in bulk.
///
/// The engine applies a whole run of consecutive records of type `A` to
/// one working copy of `S` and commits once. `apply` is infallible; if it
/// panics the engine replays the run one record at a time to isolate the
/// faulting record.
pub trait BatchReducer<S: State, A: Action>: Send + Sync + 'static {
    /// Human-readable name for logs and introspection.
    fn name(&self) -> &str;

    /// States this reducer reads from the per-cycle read set.
    ///
    /// Default: none.
    fn reads(&self) -> Vec<TypeKey> {
        Vec::new()
    }

    /// Fold one action into the working state.
    fn apply(&self, state: &mut S, action: &A, reads: ReadView<'_>);
}

#[cfg(test)]
mod tests {
    use super::*;
    use reflux_core::MemoryStore;

    #[derive(Clone, Debug, PartialEq)]
    struct Armor(i32);

    #[derive(Clone, Debug, PartialEq)]
    struct Weather(u8);

    #[test]
    fn require_checks_declaration_before_presence() {
        let mut store = MemoryStore::new();
        store.create_singleton(Armor(4)).unwrap();
        store.create_singleton(Weather(1)).unwrap();
        let declared = [TypeKey::of::<Armor>()];
        let ctx = ReduceContext::new(&store, &declared, "damage", CycleId(2));

        assert_eq!(ctx.require::<Armor>().unwrap(), &Armor(4));
        match ctx.require::<Weather>() {
            Err(HandlerError::UndeclaredRead { handler, .. }) => assert_eq!(handler, "damage"),
            other => panic!("expected UndeclaredRead, got {other:?}"),
        }
        assert_eq!(ctx.cycle(), CycleId(2));
    }

    #[test]
    fn require_reports_missing_declared_state() {
        let store = MemoryStore::new();
        let declared = [TypeKey::of::<Armor>()];
        let ctx = ReduceContext::new(&store, &declared, "damage", CycleId(0));
        assert!(ctx.require::<Armor>().unwrap_err().is_missing_context());
    }
}
