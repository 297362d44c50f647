//! Handler registration and startup validation.
//!
//! A [`RegistryBuilder`] collects state types, action types, middleware,
//! and reducers; [`RegistryBuilder::build`] validates the declarations
//! once and freezes them into a [`Registry`]. The registry is immutable
//! and can be shared between dispatch contexts behind an `Arc`.

use std::any::Any;
use std::error::Error;
use std::fmt;

use indexmap::IndexMap;
use reflux_core::{
    Action, ExecutionMode, HandlerError, OrderKey, Priority, SharedState, State, StateStore,
    TypeKey,
};
use smallvec::SmallVec;

use crate::erased::{
    invoke_isolated, state_eq, ErasedMiddleware, ErasedReducer, GeneralMiddleware, GeneralReducer,
    PrecompiledMiddleware, PrecompiledReducer, ReduceHost, RunOutcome,
};
use crate::middleware::{BatchMiddleware, Flow, Middleware, MiddlewareHost};
use crate::reducer::{BatchReducer, Reducer};

type EqFn = fn(&(dyn Any + Send + Sync), &(dyn Any + Send + Sync)) -> bool;

// ── Entries ────────────────────────────────────────────────────────

/// A registered state type.
pub struct StateEntry {
    key: TypeKey,
    priority: Priority,
    eq: EqFn,
}

impl StateEntry {
    /// The state type.
    pub fn key(&self) -> TypeKey {
        self.key
    }

    /// Notification tier for change events of this type.
    pub fn priority(&self) -> Priority {
        self.priority
    }

    /// Whether two values of this state type are equal.
    ///
    /// Identical allocations compare equal without calling `PartialEq`.
    pub fn values_equal(&self, a: &SharedState, b: &SharedState) -> bool {
        SharedState::ptr_eq(a, b) || (self.eq)(&**a, &**b)
    }
}

impl fmt::Debug for StateEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StateEntry")
            .field("key", &self.key.short_name())
            .field("priority", &self.priority)
            .finish()
    }
}

/// A middleware handler in an action type's chain.
pub struct MiddlewareEntry {
    order: OrderKey,
    declared_at: usize,
    mode: ExecutionMode,
    handler: Box<dyn ErasedMiddleware>,
}

impl MiddlewareEntry {
    /// Handler name.
    pub fn name(&self) -> &str {
        self.handler.name()
    }

    /// Explicit ordering key.
    pub fn order(&self) -> OrderKey {
        self.order
    }

    /// Execution strategy.
    pub fn mode(&self) -> ExecutionMode {
        self.mode
    }

    /// Declared reads (precompiled handlers only).
    pub fn reads(&self) -> &[TypeKey] {
        self.handler.reads()
    }

    /// Run the handler on one payload.
    ///
    /// Errors and panics are caught and returned as `Err`; actions the
    /// handler emitted before faulting are discarded.
    pub fn invoke(
        &self,
        payload: &mut (dyn Any + Send),
        host: &mut MiddlewareHost<'_>,
    ) -> Result<Flow, HandlerError> {
        invoke_isolated(self.handler.as_ref(), payload, host)
    }
}

impl fmt::Debug for MiddlewareEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MiddlewareEntry")
            .field("name", &self.name())
            .field("order", &self.order)
            .field("mode", &self.mode)
            .finish()
    }
}

/// A reducer bound to one `(state, action)` pair.
pub struct ReducerEntry {
    state: TypeKey,
    mode: ExecutionMode,
    handler: Box<dyn ErasedReducer>,
}

impl ReducerEntry {
    /// Handler name.
    pub fn name(&self) -> &str {
        self.handler.name()
    }

    /// The state type this reducer writes.
    pub fn state(&self) -> TypeKey {
        self.state
    }

    /// Execution strategy.
    pub fn mode(&self) -> ExecutionMode {
        self.mode
    }

    /// Declared reads.
    pub fn reads(&self) -> &[TypeKey] {
        self.handler.reads()
    }

    /// Apply the reducer to a run of consecutive payloads of its action type.
    ///
    /// Never panics; per-record failures are reported in the outcome.
    pub fn apply_run(
        &self,
        store: &mut dyn StateStore,
        run: &[&(dyn Any + Send)],
        host: ReduceHost<'_>,
    ) -> RunOutcome {
        self.handler.apply_run(store, run, host)
    }
}

impl fmt::Debug for ReducerEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReducerEntry")
            .field("name", &self.name())
            .field("state", &self.state.short_name())
            .field("mode", &self.mode)
            .finish()
    }
}

/// A registered action type with its middleware chain and reducers.
pub struct ActionEntry {
    key: TypeKey,
    index: usize,
    chain: SmallVec<[MiddlewareEntry; 4]>,
    reducers: SmallVec<[ReducerEntry; 2]>,
}

impl ActionEntry {
    /// The action type.
    pub fn key(&self) -> TypeKey {
        self.key
    }

    /// Registration index; action types are processed in this order.
    pub fn index(&self) -> usize {
        self.index
    }

    /// Middleware in execution order.
    pub fn chain(&self) -> &[MiddlewareEntry] {
        &self.chain
    }

    /// Reducers in registration order.
    pub fn reducers(&self) -> &[ReducerEntry] {
        &self.reducers
    }
}

impl fmt::Debug for ActionEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActionEntry")
            .field("key", &self.key.short_name())
            .field("index", &self.index)
            .field("chain", &self.chain)
            .field("reducers", &self.reducers)
            .finish()
    }
}

// ── Errors ─────────────────────────────────────────────────────────

/// Errors from registry validation (startup-time, not per-cycle).
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RegistryError {
    /// A state type was registered twice.
    DuplicateState {
        /// The state type.
        state: &'static str,
    },
    /// Two reducers target the same `(state, action)` pair.
    DuplicateReducer {
        /// The state type.
        state: &'static str,
        /// The action type.
        action: &'static str,
        /// Name of the reducer registered first.
        first: String,
        /// Name of the reducer registered second.
        second: String,
    },
    /// A reducer targets a state type that was never registered.
    UndefinedState {
        /// The reducer.
        reducer: String,
        /// The missing state type.
        state: &'static str,
    },
    /// A handler declares a read of a state type that was never registered.
    UndefinedRead {
        /// The handler.
        handler: String,
        /// The missing state type.
        state: &'static str,
    },
}

impl fmt::Display for RegistryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DuplicateState { state } => write!(f, "state '{state}' registered twice"),
            Self::DuplicateReducer {
                state,
                action,
                first,
                second,
            } => write!(
                f,
                "reducers '{first}' and '{second}' both reduce '{action}' into '{state}'"
            ),
            Self::UndefinedState { reducer, state } => {
                write!(f, "reducer '{reducer}' targets unregistered state '{state}'")
            }
            Self::UndefinedRead { handler, state } => {
                write!(f, "handler '{handler}' reads unregistered state '{state}'")
            }
        }
    }
}

impl Error for RegistryError {}

// ── Registry ───────────────────────────────────────────────────────

/// Validated, immutable set of registered states and handlers.
pub struct Registry {
    states: IndexMap<TypeKey, StateEntry>,
    actions: IndexMap<TypeKey, ActionEntry>,
    precompiled_reads: Vec<TypeKey>,
}

impl Registry {
    /// Start a new registration.
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::default()
    }

    /// Look up a state type.
    pub fn state(&self, key: TypeKey) -> Option<&StateEntry> {
        self.states.get(&key)
    }

    /// Registered state types in registration order.
    pub fn states(&self) -> impl Iterator<Item = &StateEntry> {
        self.states.values()
    }

    /// Look up an action type.
    pub fn action(&self, key: TypeKey) -> Option<&ActionEntry> {
        self.actions.get(&key)
    }

    /// Registered action types in processing order.
    pub fn actions(&self) -> impl Iterator<Item = &ActionEntry> {
        self.actions.values()
    }

    /// Processing rank of an action type; unregistered types sort last.
    pub fn action_rank(&self, key: TypeKey) -> usize {
        self.actions
            .get_index_of(&key)
            .unwrap_or(self.actions.len())
    }

    /// Union of all states read by precompiled handlers.
    ///
    /// The engine captures these into a read set once per cycle.
    pub fn precompiled_reads(&self) -> &[TypeKey] {
        &self.precompiled_reads
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry")
            .field("states", &self.states.values().collect::<Vec<_>>())
            .field("actions", &self.actions.values().collect::<Vec<_>>())
            .finish()
    }
}

struct PendingActionType {
    chain: Vec<MiddlewareEntry>,
    reducers: Vec<ReducerEntry>,
}

/// Collects registrations for a [`Registry`].
///
/// Registration never fails eagerly; all structural problems are
/// reported by [`build`](RegistryBuilder::build).
#[derive(Default)]
pub struct RegistryBuilder {
    states: Vec<StateEntry>,
    actions: IndexMap<TypeKey, PendingActionType>,
    declared: usize,
}

impl RegistryBuilder {
    /// Register a state type with its notification priority.
    pub fn state<S: State>(mut self, priority: Priority) -> Self {
        self.states.push(StateEntry {
            key: TypeKey::of::<S>(),
            priority,
            eq: state_eq::<S>,
        });
        self
    }

    /// Register an action type.
    ///
    /// Action types are processed in registration order. Registering a
    /// handler for an action type registers the type implicitly.
    pub fn action<A: Action>(mut self) -> Self {
        self.action_slot(TypeKey::of::<A>());
        self
    }

    /// Add a general-mode middleware to the chain for `A`.
    pub fn middleware<A: Action, M: Middleware<A>>(
        self,
        order: impl Into<OrderKey>,
        middleware: M,
    ) -> Self {
        self.push_middleware(
            TypeKey::of::<A>(),
            order.into(),
            ExecutionMode::General,
            Box::new(GeneralMiddleware::new(middleware)),
        )
    }

    /// Add a precompiled middleware to the chain for `A`.
    pub fn batch_middleware<A: Action, M: BatchMiddleware<A>>(
        self,
        order: impl Into<OrderKey>,
        middleware: M,
    ) -> Self {
        self.push_middleware(
            TypeKey::of::<A>(),
            order.into(),
            ExecutionMode::Precompiled,
            Box::new(PrecompiledMiddleware::new(middleware)),
        )
    }

    /// Bind a general-mode reducer to `(S, A)`.
    pub fn reducer<S: State, A: Action, R: Reducer<S, A>>(self, reducer: R) -> Self {
        self.push_reducer(
            TypeKey::of::<A>(),
            ReducerEntry {
                state: TypeKey::of::<S>(),
                mode: ExecutionMode::General,
                handler: Box::new(GeneralReducer::new(reducer)),
            },
        )
    }

    /// Bind a precompiled reducer to `(S, A)`.
    pub fn batch_reducer<S: State, A: Action, R: BatchReducer<S, A>>(self, reducer: R) -> Self {
        self.push_reducer(
            TypeKey::of::<A>(),
            ReducerEntry {
                state: TypeKey::of::<S>(),
                mode: ExecutionMode::Precompiled,
                handler: Box::new(PrecompiledReducer::new(reducer)),
            },
        )
    }

    fn action_slot(&mut self, key: TypeKey) -> &mut PendingActionType {
        self.actions.entry(key).or_insert_with(|| PendingActionType {
            chain: Vec::new(),
            reducers: Vec::new(),
        })
    }

    fn push_middleware(
        mut self,
        action: TypeKey,
        order: OrderKey,
        mode: ExecutionMode,
        handler: Box<dyn ErasedMiddleware>,
    ) -> Self {
        let declared_at = self.declared;
        self.declared += 1;
        self.action_slot(action).chain.push(MiddlewareEntry {
            order,
            declared_at,
            mode,
            handler,
        });
        self
    }

    fn push_reducer(mut self, action: TypeKey, entry: ReducerEntry) -> Self {
        self.action_slot(action).reducers.push(entry);
        self
    }

    /// Validate all registrations and freeze them.
    ///
    /// Checks performed:
    ///
    /// 1. No state type is registered twice.
    /// 2. Every reducer targets a registered state.
    /// 3. At most one reducer per `(state, action)` pair.
    /// 4. Every declared read names a registered state.
    pub fn build(self) -> Result<Registry, RegistryError> {
        // 1. Duplicate states
        let mut states: IndexMap<TypeKey, StateEntry> = IndexMap::with_capacity(self.states.len());
        for entry in self.states {
            if states.contains_key(&entry.key) {
                return Err(RegistryError::DuplicateState {
                    state: entry.key.name(),
                });
            }
            states.insert(entry.key, entry);
        }

        for (&action, pending) in &self.actions {
            // 2. Reducer targets exist
            for reducer in &pending.reducers {
                if !states.contains_key(&reducer.state) {
                    return Err(RegistryError::UndefinedState {
                        reducer: reducer.name().to_string(),
                        state: reducer.state.name(),
                    });
                }
            }

            // 3. One reducer per (state, action)
            let mut owner: IndexMap<TypeKey, &ReducerEntry> = IndexMap::new();
            for reducer in &pending.reducers {
                if let Some(first) = owner.insert(reducer.state, reducer) {
                    return Err(RegistryError::DuplicateReducer {
                        state: reducer.state.name(),
                        action: action.name(),
                        first: first.name().to_string(),
                        second: reducer.name().to_string(),
                    });
                }
            }

            // 4. Declared reads exist
            let reads = pending
                .chain
                .iter()
                .map(|m| (m.name(), m.reads()))
                .chain(pending.reducers.iter().map(|r| (r.name(), r.reads())));
            for (handler, declared) in reads {
                if let Some(missing) = declared.iter().find(|k| !states.contains_key(*k)) {
                    return Err(RegistryError::UndefinedRead {
                        handler: handler.to_string(),
                        state: missing.name(),
                    });
                }
            }
        }

        let mut precompiled_reads: Vec<TypeKey> = Vec::new();
        let mut actions = IndexMap::with_capacity(self.actions.len());
        for (index, (key, pending)) in self.actions.into_iter().enumerate() {
            let mut chain = pending.chain;
            chain.sort_by_key(|m| (m.order, m.declared_at));

            let precompiled = chain
                .iter()
                .filter(|m| m.mode == ExecutionMode::Precompiled)
                .flat_map(|m| m.reads().iter())
                .chain(
                    pending
                        .reducers
                        .iter()
                        .filter(|r| r.mode == ExecutionMode::Precompiled)
                        .flat_map(|r| r.reads().iter()),
                );
            for &read in precompiled {
                if !precompiled_reads.contains(&read) {
                    precompiled_reads.push(read);
                }
            }

            actions.insert(
                key,
                ActionEntry {
                    key,
                    index,
                    chain: chain.into_iter().collect(),
                    reducers: pending.reducers.into_iter().collect(),
                },
            );
        }

        Ok(Registry {
            states,
            actions,
            precompiled_reads,
        })
    }
}
