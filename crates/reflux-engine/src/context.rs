//! One isolated action pipeline.
//!
//! [`DispatchContext`] owns a state store, the dispatch gateway, the
//! ledger of visible action records, the change detector, the
//! notification queue and the observers for one simulation. Each call to
//! [`run_cycle()`](DispatchContext::run_cycle) executes one complete
//! cycle on the calling thread:
//!
//! 1. rotate the action buffers (blocking on registered completions),
//! 2. run the middleware chains over every visible record,
//! 3. apply reducers to the survivors,
//! 4. enqueue change events for states whose value changed,
//! 5. deliver events within the notification budget,
//! 6. destroy every record visible in the cycle.
//!
//! No handler fault aborts a cycle: every cycle ends with the sweep.
//!
//! # Ownership model
//!
//! `DispatchContext` is [`Send`] but all mutating methods take
//! `&mut self`. Parallel producers never touch the context directly; they
//! hold a [`ParallelWriter`] obtained from
//! [`acquire_parallel_writer()`](DispatchContext::acquire_parallel_writer).

use std::sync::Arc;
use std::time::Instant;

use reflux_core::{
    Action, ContextId, CycleId, DispatchError, MemoryStore, Priority, SingletonHandle, SortKey,
    State, StateStore, StateStoreExt, StoreError, TypeKey,
};
use reflux_pipeline::{ReadSet, Registry, RegistryBuilder};

use crate::buffer::ParallelWriter;
use crate::chain::{run_middleware_phase, PhaseInputs};
use crate::change::ChangeDetector;
use crate::completion::CompletionHandle;
use crate::config::{ConfigError, EngineConfig};
use crate::dispatcher::{EventDispatcher, ObserverId};
use crate::gateway::DispatchGateway;
use crate::ledger::ActionLedger;
use crate::metrics::CycleMetrics;
use crate::notify::{ChangeEvent, NotificationQueue};
use crate::reduce::run_reducer_phase;

// Compile-time assertion: DispatchContext can move between threads.
const _: () = {
    #[allow(dead_code)]
    fn assert_send<T: Send>() {}
    #[allow(dead_code)]
    fn check() {
        assert_send::<DispatchContext>();
    }
};

/// Result of one [`DispatchContext::run_cycle()`] call.
#[derive(Clone, Debug, PartialEq)]
pub struct CycleReport {
    /// The cycle that was executed.
    pub cycle: CycleId,
    /// Counts and timings for the cycle.
    pub metrics: CycleMetrics,
}

/// What [`DispatchContext::shutdown()`] discarded.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ShutdownReport {
    /// Buffered actions that never became visible.
    pub discarded_actions: usize,
    /// Undelivered change events.
    pub discarded_events: usize,
}

/// A single-threaded cycle orchestrator with its own state and buffers.
pub struct DispatchContext {
    id: ContextId,
    config: EngineConfig,
    registry: Arc<Registry>,
    store: Box<dyn StateStore>,
    gateway: DispatchGateway,
    ledger: ActionLedger,
    detector: ChangeDetector,
    queue: NotificationQueue,
    dispatcher: EventDispatcher,
    cycle: CycleId,
    last_metrics: CycleMetrics,
}

impl DispatchContext {
    /// Create a context backed by a fresh [`MemoryStore`].
    ///
    /// Accepts an owned [`Registry`] or an `Arc` shared with other contexts.
    pub fn new(
        registry: impl Into<Arc<Registry>>,
        config: EngineConfig,
    ) -> Result<Self, ConfigError> {
        Self::with_store(registry, config, MemoryStore::new())
    }

    /// Validate `builder` and create a context from the resulting registry.
    ///
    /// Registry errors surface as [`ConfigError::Registry`].
    pub fn from_builder(
        builder: RegistryBuilder,
        config: EngineConfig,
    ) -> Result<Self, ConfigError> {
        Self::new(builder.build()?, config)
    }

    /// Create a context backed by a caller-provided store.
    pub fn with_store(
        registry: impl Into<Arc<Registry>>,
        config: EngineConfig,
        store: impl StateStore + 'static,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self::assemble(registry.into(), config, Box::new(store)))
    }

    /// Build a context from an already-validated configuration.
    pub(crate) fn assemble(
        registry: Arc<Registry>,
        config: EngineConfig,
        store: Box<dyn StateStore>,
    ) -> Self {
        let id = ContextId::next();
        tracing::debug!(
            context = %id,
            actions = registry.actions().count(),
            states = registry.states().count(),
            "dispatch context created"
        );
        Self {
            id,
            gateway: DispatchGateway::new(CycleId(1), config.initial_buffer_capacity),
            config,
            registry,
            store,
            ledger: ActionLedger::new(),
            detector: ChangeDetector::new(),
            queue: NotificationQueue::new(),
            dispatcher: EventDispatcher::new(),
            cycle: CycleId(0),
            last_metrics: CycleMetrics::default(),
        }
    }

    // ── State ──────────────────────────────────────────────────

    /// Create the singleton for `S` and announce its initial value.
    ///
    /// The change event carries no old value and is delivered during the
    /// next cycle's notification drain.
    pub fn create_singleton<S: State>(
        &mut self,
        initial: S,
    ) -> Result<SingletonHandle<S>, StoreError> {
        let handle = self.store.create_singleton(initial)?;
        let key = TypeKey::of::<S>();
        if let Some(value) = self.store.get_erased(key).cloned() {
            let event = ChangeEvent {
                state: key,
                priority: self.priority_of(key),
                cycle: self.gateway.open_cycle(),
                new: value,
                old: None,
            };
            self.queue.push(event);
        }
        Ok(handle)
    }

    /// Borrow the singleton for `S`, if it exists.
    pub fn get_singleton<S: State>(&self) -> Option<&S> {
        self.store.get_singleton::<S>()
    }

    fn priority_of(&self, key: TypeKey) -> Priority {
        self.registry
            .state(key)
            .map_or(Priority::default(), |entry| entry.priority())
    }

    // ── Submission ─────────────────────────────────────────────

    /// Submit an action from the orchestrating thread.
    ///
    /// The action becomes visible in the next cycle. Returns its sort key.
    pub fn submit<A: Action>(&mut self, action: A) -> SortKey {
        self.gateway.submit(action)
    }

    /// Submit an action through a parallel writer.
    pub fn submit_parallel<A: Action>(
        &self,
        writer: &ParallelWriter,
        sort_key: SortKey,
        action: A,
    ) -> Result<(), DispatchError> {
        self.gateway.submit_parallel(writer, sort_key, action)
    }

    /// A writer for the live multi-writer buffer.
    pub fn acquire_parallel_writer(&self) -> ParallelWriter {
        self.gateway.acquire_parallel_writer()
    }

    /// Make the next buffer rotation wait for `handle`.
    pub fn register_completion(&mut self, handle: impl Into<CompletionHandle>) {
        self.gateway.register_completion(handle);
    }

    // ── Observers ──────────────────────────────────────────────

    /// Register a callback for changes to `S`.
    pub fn on_change<S, F>(&mut self, callback: F) -> ObserverId
    where
        S: State,
        F: FnMut(&S, Option<&S>) + Send + 'static,
    {
        self.dispatcher.on_change::<S, F>(callback)
    }

    /// Unregister an observer. Returns whether it was registered.
    pub fn remove_observer(&mut self, id: ObserverId) -> bool {
        self.dispatcher.remove_observer(id)
    }

    // ── Cycle ──────────────────────────────────────────────────

    /// Execute one complete cycle.
    ///
    /// Blocks first on every completion handle registered since the last
    /// cycle. Handler faults are logged and counted in the returned
    /// metrics; they never abort the cycle.
    pub fn run_cycle(&mut self) -> CycleReport {
        let cycle = self.gateway.open_cycle();
        let span = tracing::debug_span!("cycle", context = %self.id, cycle = %cycle);
        let _entered = span.enter();
        let cycle_start = Instant::now();

        // 1. Rotate buffers and make their contents visible.
        let rotation = self.gateway.refresh();
        let mut batch = Vec::with_capacity(rotation.actions.len());
        for pending in rotation.actions {
            batch.push(self.ledger.admit(pending, cycle));
        }
        let visible = batch.len();

        // 2. Snapshot what precompiled handlers declared.
        let read_set = ReadSet::capture(&*self.store, self.registry.precompiled_reads());

        // 3. Middleware.
        let middleware_start = Instant::now();
        let inputs = PhaseInputs {
            registry: &self.registry,
            store: &*self.store,
            read_set: &read_set,
            cycle,
            max_passes: self.config.max_middleware_passes,
        };
        let middleware = run_middleware_phase(&inputs, &mut self.ledger, &mut self.gateway, batch);
        let middleware_us = middleware_start.elapsed().as_micros() as u64;

        // 4. Reducers.
        let reducer_start = Instant::now();
        let reducers = run_reducer_phase(
            &self.registry,
            &mut *self.store,
            &self.ledger,
            &middleware.survivors,
            &read_set,
            cycle,
            &mut self.detector,
        );
        let reducer_us = reducer_start.elapsed().as_micros() as u64;
        drop(read_set);

        // 5. Change detection.
        let detect_start = Instant::now();
        let change_events = self
            .detector
            .detect(cycle, &self.registry, &*self.store, &mut self.queue);
        let change_detection_us = detect_start.elapsed().as_micros() as u64;

        // 6. Notifications.
        let notify_start = Instant::now();
        let drained = self
            .dispatcher
            .drain(&mut self.queue, self.config.notification_budget);
        let notification_us = notify_start.elapsed().as_micros() as u64;

        // 7. Cleanup sweep.
        let cleanup_start = Instant::now();
        let destroyed = self.ledger.sweep(cycle);
        let cleanup_us = cleanup_start.elapsed().as_micros() as u64;

        let metrics = CycleMetrics {
            total_us: cycle_start.elapsed().as_micros() as u64,
            rotation_wait_us: rotation.wait_time.as_micros() as u64,
            middleware_us,
            reducer_us,
            change_detection_us,
            notification_us,
            cleanup_us,
            visible,
            vetoed: middleware.vetoed,
            middleware_faults: middleware.faults,
            reducer_faults: reducers.faults,
            reduced: reducers.reduced,
            carried_over: middleware.carried_over,
            deferred: middleware.deferred,
            middleware_passes: middleware.passes,
            change_events,
            delivered: drained.delivered,
            observer_faults: drained.observer_faults,
            pending_events: self.queue.len(),
            destroyed,
            stale_writer_drops: self.gateway.stale_writer_drops(),
        };
        tracing::debug!(
            visible,
            survivors = middleware.survivors.len(),
            reduced = metrics.reduced,
            change_events,
            delivered = metrics.delivered,
            destroyed,
            total_us = metrics.total_us,
            "cycle complete"
        );

        self.cycle = cycle;
        self.last_metrics = metrics.clone();
        CycleReport { cycle, metrics }
    }

    // ── Introspection ──────────────────────────────────────────

    /// Process-unique identifier of this context.
    pub fn id(&self) -> ContextId {
        self.id
    }

    /// The last completed cycle, or `CycleId(0)` before the first.
    pub fn current_cycle(&self) -> CycleId {
        self.cycle
    }

    /// Metrics from the last completed cycle.
    pub fn last_metrics(&self) -> &CycleMetrics {
        &self.last_metrics
    }

    /// Change events waiting for delivery.
    pub fn pending_events(&self) -> usize {
        self.queue.len()
    }

    /// Actions that will become visible in the next cycle.
    pub fn pending_actions(&self) -> usize {
        self.gateway.pending_actions()
    }

    /// The handler registry.
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Read-only access to the state store.
    pub fn store(&self) -> &dyn StateStore {
        &*self.store
    }

    /// The configuration this context was created with.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// The dispatch gateway, for generation and handle introspection.
    pub fn gateway(&self) -> &DispatchGateway {
        &self.gateway
    }

    // ── Shutdown ───────────────────────────────────────────────

    /// Wait for outstanding producers and discard buffered actions and
    /// undelivered events.
    ///
    /// The context stays usable; state and observers are kept.
    pub fn shutdown(&mut self) -> ShutdownReport {
        let discarded_actions = self.gateway.shutdown();
        let discarded_events = self.queue.clear();
        let orphans = self.ledger.sweep(self.cycle);
        if orphans > 0 {
            tracing::warn!(context = %self.id, orphans, "records outlived their cycle");
        }
        tracing::debug!(
            context = %self.id,
            discarded_actions,
            discarded_events,
            "dispatch context shut down"
        );
        ShutdownReport {
            discarded_actions,
            discarded_events,
        }
    }
}

impl std::fmt::Debug for DispatchContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DispatchContext")
            .field("id", &self.id)
            .field("cycle", &self.cycle)
            .field("store", &self.store.len())
            .field("pending_actions", &self.gateway.pending_actions())
            .field("pending_events", &self.queue.len())
            .finish()
    }
}
