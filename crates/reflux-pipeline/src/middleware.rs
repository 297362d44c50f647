//! The [`Middleware`] and [`BatchMiddleware`] traits and their contexts.
//!
//! Middleware are ordered interceptors run before reduction. Each handler
//! sees a mutable payload and returns a [`Flow`]: `Continue` passes the
//! action to the next handler (and eventually the reducers), `Veto`
//! consumes it. Emitting a more specific action and vetoing the original
//! is the standard enrichment pattern.

use reflux_core::{
    Action, ActionId, CleanupTag, CycleId, HandlerError, Lane, PendingAction, SortKey, State,
    StateStore, StateStoreExt, TypeKey,
};

use crate::read_set::{ReadSet, ReadView};

/// Outcome of a single middleware invocation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[must_use]
pub enum Flow {
    /// Pass the action on to the rest of the chain.
    Continue,
    /// Consume the action. Later handlers and all reducers are skipped.
    Veto,
}

impl Flow {
    /// Whether the action continues downstream.
    pub fn is_continue(self) -> bool {
        matches!(self, Self::Continue)
    }
}

/// Actions emitted by middleware while processing one record.
///
/// `now` is processed in a later middleware pass of the current cycle;
/// `next` is carried to the following cycle.
#[derive(Debug, Default)]
pub struct Emissions {
    /// Actions for the current cycle.
    pub now: Vec<PendingAction>,
    /// Actions for the next cycle.
    pub next: Vec<PendingAction>,
}

impl Emissions {
    /// Create empty emission lists.
    pub fn new() -> Self {
        Self::default()
    }

    /// Total number of emitted actions.
    pub fn len(&self) -> usize {
        self.now.len() + self.next.len()
    }

    /// Whether nothing was emitted.
    pub fn is_empty(&self) -> bool {
        self.now.is_empty() && self.next.is_empty()
    }

    /// Current lengths, used to roll back a faulted handler's emissions.
    pub fn mark(&self) -> (usize, usize) {
        (self.now.len(), self.next.len())
    }

    /// Drop everything emitted after `mark`.
    pub fn rollback(&mut self, mark: (usize, usize)) {
        self.now.truncate(mark.0);
        self.next.truncate(mark.1);
    }
}

/// Everything the engine hands to a middleware invocation.
///
/// Built by the engine per record; adapters turn it into a
/// [`MiddlewareContext`] or [`BatchContext`] depending on the handler's
/// execution mode.
pub struct MiddlewareHost<'a> {
    /// The cycle being processed.
    pub cycle: CycleId,
    /// The record being processed.
    pub record: ActionId,
    /// Lane of the record; inherited by emitted actions.
    pub lane: Lane,
    /// Sort key of the record; inherited by emitted actions.
    pub sort_key: SortKey,
    /// The state store, read-only.
    pub store: &'a dyn StateStore,
    /// The read set prepared at cycle start.
    pub read_set: &'a ReadSet,
    /// Where emitted actions are collected.
    pub emissions: &'a mut Emissions,
}

/// Context for general-mode middleware.
///
/// Provides store reads and emission into the current or next cycle.
/// Emitted actions inherit the lane and sort key of the record being
/// processed; the reducer phase orders them by that key, not by the pass
/// they ran in.
pub struct MiddlewareContext<'a> {
    cycle: CycleId,
    record: ActionId,
    lane: Lane,
    sort_key: SortKey,
    store: &'a dyn StateStore,
    emissions: &'a mut Emissions,
}

impl<'a> MiddlewareContext<'a> {
    /// Construct a context. Typically called by the engine.
    pub fn new(
        cycle: CycleId,
        record: ActionId,
        lane: Lane,
        sort_key: SortKey,
        store: &'a dyn StateStore,
        emissions: &'a mut Emissions,
    ) -> Self {
        Self {
            cycle,
            record,
            lane,
            sort_key,
            store,
            emissions,
        }
    }

    /// The cycle being processed.
    pub fn cycle(&self) -> CycleId {
        self.cycle
    }

    /// The record being processed.
    pub fn record(&self) -> ActionId {
        self.record
    }

    /// Sort key of the record being processed.
    pub fn sort_key(&self) -> SortKey {
        self.sort_key
    }

    /// Read a state singleton.
    pub fn state<S: State>(&self) -> Option<&S> {
        self.store.get_singleton::<S>()
    }

    /// Read a state singleton, failing with [`HandlerError::MissingContext`].
    pub fn require<S: State>(&self) -> Result<&S, HandlerError> {
        self.state::<S>().ok_or(HandlerError::MissingContext {
            state: std::any::type_name::<S>(),
        })
    }

    /// Emit an action processed later in this cycle.
    pub fn emit<A: Action>(&mut self, action: A) {
        let pending = self.derive(action);
        self.emissions.now.push(pending);
    }

    /// Emit an action processed in the next cycle.
    pub fn emit_next_cycle<A: Action>(&mut self, action: A) {
        let pending = self.derive(action);
        self.emissions.next.push(pending);
    }

    fn derive<A: Action>(&self, action: A) -> PendingAction {
        PendingAction::new(
            action,
            self.lane,
            self.sort_key,
            CleanupTag {
                submitted_in: self.cycle,
            },
        )
        .with_parent(self.record)
    }
}

/// Context for precompiled (batch) middleware.
///
/// Restricted to the read set prepared at cycle start and to deferring
/// derived actions into the next cycle.
pub struct BatchContext<'a> {
    cycle: CycleId,
    record: ActionId,
    lane: Lane,
    sort_key: SortKey,
    reads: ReadView<'a>,
    deferred: &'a mut Vec<PendingAction>,
}

impl<'a> BatchContext<'a> {
    /// Construct a context. Typically called by the engine.
    pub fn new(
        cycle: CycleId,
        record: ActionId,
        lane: Lane,
        sort_key: SortKey,
        reads: ReadView<'a>,
        deferred: &'a mut Vec<PendingAction>,
    ) -> Self {
        Self {
            cycle,
            record,
            lane,
            sort_key,
            reads,
            deferred,
        }
    }

    /// The cycle being processed.
    pub fn cycle(&self) -> CycleId {
        self.cycle
    }

    /// Read a declared state from the cycle-start read set.
    pub fn read<S: State>(&self) -> Option<&S> {
        self.reads.get::<S>()
    }

    /// Defer a derived action to the next cycle.
    pub fn defer<A: Action>(&mut self, action: A) {
        self.deferred.push(
            PendingAction::new(
                action,
                self.lane,
                self.sort_key,
                CleanupTag {
                    submitted_in: self.cycle,
                },
            )
            .with_parent(self.record),
        );
    }
}

/// An ordered interceptor for actions of type `A`.
///
/// # Contract
///
/// - Handlers run in ordering-key order; the first `Veto` ends the chain.
/// - Returning `Err` (or panicking) is treated as an implicit veto for
///   this record only, and any actions the handler emitted are discarded.
///
/// # Examples
///
/// Enrichment: turn a raw attack into a self-contained damage action.
///
/// ```
/// use reflux_core::HandlerError;
/// use reflux_pipeline::{Flow, Middleware, MiddlewareContext};
///
/// struct Attack { target: u32, base: i32 }
/// struct ApplyDamage { target: u32, amount: i32 }
///
/// struct ResolveAttack;
///
/// impl Middleware<Attack> for ResolveAttack {
///     fn name(&self) -> &str { "resolve_attack" }
///
///     fn handle(
///         &self,
///         attack: &mut Attack,
///         ctx: &mut MiddlewareContext<'_>,
///     ) -> Result<Flow, HandlerError> {
///         ctx.emit(ApplyDamage { target: attack.target, amount: attack.base });
///         Ok(Flow::Veto)
///     }
/// }
/// ```
pub trait Middleware<A: Action>: Send + Sync + 'static {
    /// Human-readable name for logs and introspection.
    fn name(&self) -> &str;

    /// Inspect, mutate, or consume one action.
    fn handle(&self, action: &mut A, ctx: &mut MiddlewareContext<'_>) -> Result<Flow, HandlerError>;
}

/// A precompiled interceptor for actions of type `A`.
///
/// Infallible and restricted to the states it declares in
/// [`reads()`](BatchMiddleware::reads); it cannot reach the store or
/// emit into the current cycle.
pub trait BatchMiddleware<A: Action>: Send + Sync + 'static {
    /// Human-readable name for logs and introspection.
    fn name(&self) -> &str;

    /// State types this handler reads from the per-cycle read set.
    ///
    /// Called once at registration. Default: none.
    fn reads(&self) -> Vec<TypeKey> {
        Vec::new()
    }

    /// Inspect, mutate, or consume one action.
    fn handle(&self, action: &mut A, ctx: &mut BatchContext<'_>) -> Flow;
}

#[cfg(test)]
mod tests {
    use super::*;
    use reflux_core::MemoryStore;

    #[derive(Clone, Debug, PartialEq)]
    struct Armor(i32);

    struct Ping;

    #[test]
    fn emitted_actions_inherit_order_and_parent() {
        let store = MemoryStore::new();
        let mut emissions = Emissions::new();
        let mut ctx = MiddlewareContext::new(
            CycleId(3),
            ActionId(11),
            Lane::Parallel,
            SortKey(42),
            &store,
            &mut emissions,
        );
        ctx.emit(Ping);
        ctx.emit_next_cycle(Ping);
        assert_eq!(emissions.len(), 2);
        let now = &emissions.now[0];
        assert_eq!(now.lane, Lane::Parallel);
        assert_eq!(now.sort_key, SortKey(42));
        assert_eq!(now.parent, Some(ActionId(11)));
        assert_eq!(now.cleanup.submitted_in, CycleId(3));
        assert_eq!(now.action_type, TypeKey::of::<Ping>());
    }

    #[test]
    fn rollback_discards_later_emissions() {
        let mut emissions = Emissions::new();
        emissions.now.push(PendingAction::new(
            Ping,
            Lane::Local,
            SortKey(0),
            CleanupTag {
                submitted_in: CycleId(0),
            },
        ));
        let mark = emissions.mark();
        emissions.next.push(PendingAction::new(
            Ping,
            Lane::Local,
            SortKey(1),
            CleanupTag {
                submitted_in: CycleId(0),
            },
        ));
        emissions.rollback(mark);
        assert_eq!(emissions.now.len(), 1);
        assert!(emissions.next.is_empty());
    }

    #[test]
    fn require_reports_missing_state() {
        let store = MemoryStore::new();
        let mut emissions = Emissions::new();
        let ctx = MiddlewareContext::new(
            CycleId(1),
            ActionId(0),
            Lane::Local,
            SortKey(0),
            &store,
            &mut emissions,
        );
        assert!(ctx.require::<Armor>().unwrap_err().is_missing_context());
    }
}
