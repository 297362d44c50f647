//! Type-erased adapters between typed handlers and the engine.
//!
//! The registry stores handlers behind these object-safe traits so the
//! engine can drive them over `Box<dyn Any + Send>` payloads without
//! knowing the concrete action or state types.

use std::any::{type_name, Any};
use std::marker::PhantomData;
use std::panic::{catch_unwind, AssertUnwindSafe};

use reflux_core::{Action, HandlerError, State, StateStore, StateStoreExt, TypeKey};

use crate::middleware::{
    BatchContext, BatchMiddleware, Flow, Middleware, MiddlewareContext, MiddlewareHost,
};
use crate::read_set::{ReadSet, ReadView};
use crate::reducer::{BatchReducer, ReduceContext, Reducer};

// ── Middleware ─────────────────────────────────────────────────────

pub(crate) trait ErasedMiddleware: Send + Sync {
    fn name(&self) -> &str;

    fn reads(&self) -> &[TypeKey];

    fn invoke(
        &self,
        payload: &mut (dyn Any + Send),
        host: &mut MiddlewareHost<'_>,
    ) -> Result<Flow, HandlerError>;
}

pub(crate) struct GeneralMiddleware<A, M> {
    inner: M,
    _action: PhantomData<fn(A)>,
}

impl<A: Action, M: Middleware<A>> GeneralMiddleware<A, M> {
    pub(crate) fn new(inner: M) -> Self {
        Self {
            inner,
            _action: PhantomData,
        }
    }
}

impl<A: Action, M: Middleware<A>> ErasedMiddleware for GeneralMiddleware<A, M> {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn reads(&self) -> &[TypeKey] {
        &[]
    }

    fn invoke(
        &self,
        payload: &mut (dyn Any + Send),
        host: &mut MiddlewareHost<'_>,
    ) -> Result<Flow, HandlerError> {
        let action = payload
            .downcast_mut::<A>()
            .ok_or(HandlerError::TypeMismatch {
                expected: type_name::<A>(),
            })?;
        let mut ctx = MiddlewareContext::new(
            host.cycle,
            host.record,
            host.lane,
            host.sort_key,
            host.store,
            &mut *host.emissions,
        );
        self.inner.handle(action, &mut ctx)
    }
}

pub(crate) struct PrecompiledMiddleware<A, M> {
    inner: M,
    reads: Vec<TypeKey>,
    _action: PhantomData<fn(A)>,
}

impl<A: Action, M: BatchMiddleware<A>> PrecompiledMiddleware<A, M> {
    pub(crate) fn new(inner: M) -> Self {
        let reads = inner.reads();
        Self {
            inner,
            reads,
            _action: PhantomData,
        }
    }
}

impl<A: Action, M: BatchMiddleware<A>> ErasedMiddleware for PrecompiledMiddleware<A, M> {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn reads(&self) -> &[TypeKey] {
        &self.reads
    }

    fn invoke(
        &self,
        payload: &mut (dyn Any + Send),
        host: &mut MiddlewareHost<'_>,
    ) -> Result<Flow, HandlerError> {
        let action = payload
            .downcast_mut::<A>()
            .ok_or(HandlerError::TypeMismatch {
                expected: type_name::<A>(),
            })?;
        let mut ctx = BatchContext::new(
            host.cycle,
            host.record,
            host.lane,
            host.sort_key,
            ReadView::new(host.read_set, &self.reads),
            &mut host.emissions.next,
        );
        Ok(self.inner.handle(action, &mut ctx))
    }
}

/// Run a middleware with fault isolation.
///
/// A returned error or a caught panic rolls back everything the handler
/// emitted for this record.
pub(crate) fn invoke_isolated(
    handler: &dyn ErasedMiddleware,
    payload: &mut (dyn Any + Send),
    host: &mut MiddlewareHost<'_>,
) -> Result<Flow, HandlerError> {
    let mark = host.emissions.mark();
    let result = catch_unwind(AssertUnwindSafe(|| handler.invoke(payload, host)))
        .unwrap_or_else(|panic| Err(HandlerError::from_panic(panic)));
    if result.is_err() {
        host.emissions.rollback(mark);
    }
    result
}

// ── Reducers ───────────────────────────────────────────────────────

/// Per-cycle inputs for a reducer run.
#[derive(Clone, Copy, Debug)]
pub struct ReduceHost<'a> {
    /// The cycle being processed.
    pub cycle: reflux_core::CycleId,
    /// The read set prepared at cycle start.
    pub read_set: &'a ReadSet,
}

/// A fault attributed to one record of a reducer run.
#[derive(Clone, Debug, PartialEq)]
pub struct RecordFault {
    /// Position of the record within the run.
    pub index: usize,
    /// What went wrong.
    pub error: HandlerError,
}

/// Result of applying one reducer to a run of records.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RunOutcome {
    /// Records whose result was committed.
    pub applied: usize,
    /// Records that were skipped, in run order.
    pub faults: Vec<RecordFault>,
}

impl RunOutcome {
    fn fault(&mut self, index: usize, error: HandlerError) {
        self.faults.push(RecordFault { index, error });
    }
}

pub(crate) trait ErasedReducer: Send + Sync {
    fn name(&self) -> &str;

    fn reads(&self) -> &[TypeKey];

    fn apply_run(
        &self,
        store: &mut dyn StateStore,
        run: &[&(dyn Any + Send)],
        host: ReduceHost<'_>,
    ) -> RunOutcome;
}

pub(crate) struct GeneralReducer<S, A, R> {
    inner: R,
    reads: Vec<TypeKey>,
    _types: PhantomData<fn(S, A)>,
}

impl<S: State, A: Action, R: Reducer<S, A>> GeneralReducer<S, A, R> {
    pub(crate) fn new(inner: R) -> Self {
        let reads = inner.reads();
        Self {
            inner,
            reads,
            _types: PhantomData,
        }
    }
}

impl<S: State, A: Action, R: Reducer<S, A>> ErasedReducer for GeneralReducer<S, A, R> {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn reads(&self) -> &[TypeKey] {
        &self.reads
    }

    fn apply_run(
        &self,
        store: &mut dyn StateStore,
        run: &[&(dyn Any + Send)],
        host: ReduceHost<'_>,
    ) -> RunOutcome {
        let mut outcome = RunOutcome::default();
        for (index, &payload) in run.iter().enumerate() {
            let Some(action) = payload.downcast_ref::<A>() else {
                outcome.fault(
                    index,
                    HandlerError::TypeMismatch {
                        expected: type_name::<A>(),
                    },
                );
                continue;
            };
            let result = {
                let reader: &dyn StateStore = &*store;
                let Some(current) = reader.get_singleton::<S>() else {
                    outcome.fault(
                        index,
                        HandlerError::MissingContext {
                            state: type_name::<S>(),
                        },
                    );
                    continue;
                };
                let ctx = ReduceContext::new(reader, &self.reads, self.inner.name(), host.cycle);
                catch_unwind(AssertUnwindSafe(|| {
                    self.inner.reduce(current, action, &ctx)
                }))
            };
            match result {
                Ok(Ok(next)) => match store.set_singleton(next) {
                    Ok(()) => outcome.applied += 1,
                    Err(e) => outcome.fault(index, HandlerError::failed(e.to_string())),
                },
                Ok(Err(err)) => outcome.fault(index, err),
                Err(panic) => outcome.fault(index, HandlerError::from_panic(panic)),
            }
        }
        outcome
    }
}

pub(crate) struct PrecompiledReducer<S, A, R> {
    inner: R,
    reads: Vec<TypeKey>,
    _types: PhantomData<fn(S, A)>,
}

impl<S: State, A: Action, R: BatchReducer<S, A>> PrecompiledReducer<S, A, R> {
    pub(crate) fn new(inner: R) -> Self {
        let reads = inner.reads();
        Self {
            inner,
            reads,
            _types: PhantomData,
        }
    }
}

impl<S: State, A: Action, R: BatchReducer<S, A>> ErasedReducer for PrecompiledReducer<S, A, R> {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn reads(&self) -> &[TypeKey] {
        &self.reads
    }

    fn apply_run(
        &self,
        store: &mut dyn StateStore,
        run: &[&(dyn Any + Send)],
        host: ReduceHost<'_>,
    ) -> RunOutcome {
        let mut outcome = RunOutcome::default();
        let view = ReadView::new(host.read_set, &self.reads);

        let mut actions: Vec<(usize, &A)> = Vec::with_capacity(run.len());
        for (index, &payload) in run.iter().enumerate() {
            match payload.downcast_ref::<A>() {
                Some(action) => actions.push((index, action)),
                None => outcome.fault(
                    index,
                    HandlerError::TypeMismatch {
                        expected: type_name::<A>(),
                    },
                ),
            }
        }

        let Some(start) = store.get_singleton::<S>().cloned() else {
            for (index, _) in actions {
                outcome.fault(
                    index,
                    HandlerError::MissingContext {
                        state: type_name::<S>(),
                    },
                );
            }
            return outcome;
        };

        let mut working = start.clone();
        let bulk = catch_unwind(AssertUnwindSafe(|| {
            for &(_, action) in &actions {
                self.inner.apply(&mut working, action, view);
            }
        }));

        let committed = match bulk {
            Ok(()) => {
                outcome.applied = actions.len();
                working
            }
            Err(_) => {
                // Replay from the start value one record at a time to find
                // the faulting records.
                let mut working = start;
                for &(index, action) in &actions {
                    let mut trial = working.clone();
                    match catch_unwind(AssertUnwindSafe(|| {
                        self.inner.apply(&mut trial, action, view)
                    })) {
                        Ok(()) => {
                            working = trial;
                            outcome.applied += 1;
                        }
                        Err(panic) => outcome.fault(index, HandlerError::from_panic(panic)),
                    }
                }
                outcome.faults.sort_by_key(|f| f.index);
                working
            }
        };

        if outcome.applied > 0 {
            if let Err(e) = store.set_singleton(committed) {
                outcome.applied = 0;
                outcome.fault(0, HandlerError::failed(e.to_string()));
            }
        }
        outcome
    }
}

/// Equality over erased state values of type `S`.
pub(crate) fn state_eq<S: State>(a: &(dyn Any + Send + Sync), b: &(dyn Any + Send + Sync)) -> bool {
    match (a.downcast_ref::<S>(), b.downcast_ref::<S>()) {
        (Some(a), Some(b)) => a == b,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::middleware::Emissions;
    use reflux_core::{ActionId, CycleId, Lane, MemoryStore, SortKey};

    #[derive(Clone, Debug, PartialEq)]
    struct Counter(i64);

    struct Add(i64);

    struct AddReducer;

    impl Reducer<Counter, Add> for AddReducer {
        fn name(&self) -> &str {
            "add"
        }

        fn reduce(
            &self,
            state: &Counter,
            action: &Add,
            _ctx: &ReduceContext<'_>,
        ) -> Result<Counter, HandlerError> {
            if action.0 < 0 {
                return Err(HandlerError::failed("negative"));
            }
            Ok(Counter(state.0 + action.0))
        }
    }

    struct BatchAdd;

    impl BatchReducer<Counter, Add> for BatchAdd {
        fn name(&self) -> &str {
            "batch_add"
        }

        fn apply(&self, state: &mut Counter, action: &Add, _reads: ReadView<'_>) {
            assert!(action.0 != 13, "unlucky");
            state.0 += action.0;
        }
    }

    struct EchoThenFail;

    impl Middleware<Add> for EchoThenFail {
        fn name(&self) -> &str {
            "echo_then_fail"
        }

        fn handle(
            &self,
            action: &mut Add,
            ctx: &mut MiddlewareContext<'_>,
        ) -> Result<Flow, HandlerError> {
            ctx.emit(Add(action.0));
            Err(HandlerError::failed("after emit"))
        }
    }

    fn run_of(actions: &[Add]) -> Vec<&(dyn Any + Send)> {
        actions.iter().map(|a| a as &(dyn Any + Send)).collect()
    }

    #[test]
    fn general_reducer_skips_failed_records() {
        let mut store = MemoryStore::new();
        store.create_singleton(Counter(0)).unwrap();
        let reducer = GeneralReducer::new(AddReducer);
        let actions = [Add(1), Add(-5), Add(2)];
        let read_set = ReadSet::new();
        let outcome = reducer.apply_run(
            &mut store,
            &run_of(&actions),
            ReduceHost {
                cycle: CycleId(1),
                read_set: &read_set,
            },
        );
        assert_eq!(outcome.applied, 2);
        assert_eq!(outcome.faults.len(), 1);
        assert_eq!(outcome.faults[0].index, 1);
        assert_eq!(store.get_singleton::<Counter>(), Some(&Counter(3)));
    }

    #[test]
    fn missing_singleton_is_a_no_op() {
        let mut store = MemoryStore::new();
        let reducer = GeneralReducer::new(AddReducer);
        let actions = [Add(1)];
        let read_set = ReadSet::new();
        let outcome = reducer.apply_run(
            &mut store,
            &run_of(&actions),
            ReduceHost {
                cycle: CycleId(1),
                read_set: &read_set,
            },
        );
        assert_eq!(outcome.applied, 0);
        assert!(outcome.faults[0].error.is_missing_context());
        assert!(store.is_empty());
    }

    #[test]
    fn batch_reducer_isolates_panicking_record() {
        let mut store = MemoryStore::new();
        store.create_singleton(Counter(0)).unwrap();
        let reducer = PrecompiledReducer::new(BatchAdd);
        let actions = [Add(1), Add(13), Add(2)];
        let read_set = ReadSet::new();
        let outcome = reducer.apply_run(
            &mut store,
            &run_of(&actions),
            ReduceHost {
                cycle: CycleId(1),
                read_set: &read_set,
            },
        );
        assert_eq!(outcome.applied, 2);
        assert_eq!(outcome.faults.len(), 1);
        assert_eq!(outcome.faults[0].index, 1);
        assert!(matches!(
            outcome.faults[0].error,
            HandlerError::Panicked { .. }
        ));
        assert_eq!(store.get_singleton::<Counter>(), Some(&Counter(3)));
    }

    #[test]
    fn faulted_middleware_emissions_are_rolled_back() {
        let store = MemoryStore::new();
        let read_set = ReadSet::new();
        let mut emissions = Emissions::new();
        let mut host = MiddlewareHost {
            cycle: CycleId(1),
            record: ActionId(1),
            lane: Lane::Local,
            sort_key: SortKey(0),
            store: &store,
            read_set: &read_set,
            emissions: &mut emissions,
        };
        let handler = GeneralMiddleware::new(EchoThenFail);
        let mut payload: Box<dyn Any + Send> = Box::new(Add(4));
        let result = invoke_isolated(&handler, payload.as_mut(), &mut host);
        assert!(result.is_err());
        assert!(emissions.is_empty());
    }

    #[test]
    fn wrong_payload_type_is_reported() {
        let store = MemoryStore::new();
        let read_set = ReadSet::new();
        let mut emissions = Emissions::new();
        let mut host = MiddlewareHost {
            cycle: CycleId(1),
            record: ActionId(1),
            lane: Lane::Local,
            sort_key: SortKey(0),
            store: &store,
            read_set: &read_set,
            emissions: &mut emissions,
        };
        let handler = GeneralMiddleware::new(EchoThenFail);
        let mut payload: Box<dyn Any + Send> = Box::new(7u32);
        assert!(matches!(
            invoke_isolated(&handler, payload.as_mut(), &mut host),
            Err(HandlerError::TypeMismatch { .. })
        ));
    }

    #[test]
    fn erased_equality_compares_values() {
        let a = Counter(1);
        let b = Counter(1);
        let c = Counter(2);
        assert!(state_eq::<Counter>(&a, &b));
        assert!(!state_eq::<Counter>(&a, &c));
        assert!(!state_eq::<Counter>(&a, &5u8));
    }
}
