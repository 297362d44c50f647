//! The dispatch gateway: the single entry point for submitting actions.
//!
//! [`DispatchGateway`] owns a context's two buffer flavors, the carryover
//! buffer for actions deferred to the next cycle, and the combined
//! completion handle. [`refresh()`](DispatchGateway::refresh) rotates the
//! parallel buffer at cycle start.
//!
//! # Rotation ordering
//!
//! Rotation first blocks on every completion handle registered since the
//! previous rotation, and only then retires the live parallel buffer and
//! allocates the next generation. A registered producer therefore never
//! sees its writer invalidated mid-write.

use std::sync::Arc;
use std::time::{Duration, Instant};

use reflux_core::{
    Action, CleanupTag, CycleId, DispatchError, GenerationId, Lane, PendingAction, SortKey,
};

use crate::buffer::{ActionSink, LocalBuffer, ParallelBuffer, ParallelWriter, WriterShared};
use crate::completion::{CombinedHandle, CompletionHandle};

/// Everything a rotation made visible.
#[derive(Debug)]
pub struct Rotation {
    /// Actions in buffer order: carried over, then local, then parallel.
    pub actions: Vec<PendingAction>,
    /// Completion handles that were waited on.
    pub waited: usize,
    /// Time spent blocked on completion handles.
    pub wait_time: Duration,
    /// Generation of the parallel buffer that was retired.
    pub retired: GenerationId,
}

/// Per-context submission front end.
pub struct DispatchGateway {
    local: LocalBuffer,
    carryover: LocalBuffer,
    parallel: Arc<ParallelBuffer>,
    shared: Arc<WriterShared>,
    pending: CombinedHandle,
    next_local_key: u64,
    open_cycle: CycleId,
    capacity: usize,
}

impl DispatchGateway {
    /// Create a gateway whose submissions are visible in `open_cycle`.
    pub fn new(open_cycle: CycleId, capacity: usize) -> Self {
        let generation = GenerationId(0);
        Self {
            local: LocalBuffer::with_capacity(capacity),
            carryover: LocalBuffer::default(),
            parallel: Arc::new(ParallelBuffer::new(generation, open_cycle, capacity)),
            shared: Arc::new(WriterShared::new(generation)),
            pending: CombinedHandle::new(),
            next_local_key: 0,
            open_cycle,
            capacity,
        }
    }

    /// Submit from the orchestrating thread.
    ///
    /// Always succeeds. Returns the monotonically assigned sort key.
    pub fn submit<A: Action>(&mut self, action: A) -> SortKey {
        let sort_key = SortKey(self.next_local_key);
        self.next_local_key += 1;
        let pending = PendingAction::new(action, Lane::Local, sort_key, self.cleanup_tag());
        append(&mut self.local, pending);
        sort_key
    }

    /// Submit through a previously acquired parallel writer.
    ///
    /// # Errors
    ///
    /// [`DispatchError::StaleWriter`] if `writer` was rotated away; the
    /// action is dropped.
    pub fn submit_parallel<A: Action>(
        &self,
        writer: &ParallelWriter,
        sort_key: SortKey,
        action: A,
    ) -> Result<(), DispatchError> {
        writer.submit(sort_key, action)
    }

    /// Obtain a writer for the live parallel buffer.
    ///
    /// Register a completion handle covering the writes before the next
    /// rotation, or they may land in a retired buffer and be dropped.
    pub fn acquire_parallel_writer(&self) -> ParallelWriter {
        ParallelWriter::new(Arc::clone(&self.parallel), Arc::clone(&self.shared))
    }

    /// Make the next rotation wait for `handle`.
    pub fn register_completion(&mut self, handle: impl Into<CompletionHandle>) {
        self.pending.combine(handle.into());
    }

    /// Queue an action for the next cycle, keeping its lane and sort key.
    pub(crate) fn defer(&mut self, action: PendingAction) {
        append(&mut self.carryover, action);
    }

    /// Rotate buffers for the cycle about to run.
    ///
    /// Blocks on the combined completion handle, retires the live parallel
    /// buffer, allocates the next generation, and returns every buffered
    /// action. Submissions made after this call are visible in the
    /// following cycle.
    pub fn refresh(&mut self) -> Rotation {
        let wait_start = Instant::now();
        let waited = self.pending.wait_and_reset();
        let wait_time = wait_start.elapsed();

        let retired = self.parallel.generation();
        let parallel = self.parallel.retire();
        let next = GenerationId(retired.0 + 1);
        self.open_cycle = self.open_cycle.next();
        self.parallel = Arc::new(ParallelBuffer::new(next, self.open_cycle, self.capacity));
        self.shared.set_live(next);

        let mut actions = self.carryover.take();
        actions.append(&mut self.local.take());
        actions.extend(parallel);

        tracing::trace!(
            retired = %retired,
            live = %next,
            waited,
            visible = actions.len(),
            "rotated action buffers"
        );

        Rotation {
            actions,
            waited,
            wait_time,
            retired,
        }
    }

    /// Generation of the live parallel buffer.
    pub fn generation(&self) -> GenerationId {
        self.parallel.generation()
    }

    /// The cycle current submissions will be visible in.
    pub fn open_cycle(&self) -> CycleId {
        self.open_cycle
    }

    /// Actions waiting for the next rotation, across all buffers.
    pub fn pending_actions(&self) -> usize {
        self.local.len() + self.carryover.len() + self.parallel.len()
    }

    /// Completion handles registered since the last rotation.
    pub fn outstanding_handles(&self) -> usize {
        self.pending.len()
    }

    /// Cumulative number of writes dropped through stale writers.
    pub fn stale_writer_drops(&self) -> u64 {
        self.shared.stale_drops()
    }

    /// Wait for outstanding producers and discard everything buffered.
    ///
    /// Returns how many actions were discarded.
    pub(crate) fn shutdown(&mut self) -> usize {
        self.pending.wait_and_reset();
        let retired = self.parallel.retire().len();
        self.local.clear() + self.carryover.clear() + retired
    }

    fn cleanup_tag(&self) -> CleanupTag {
        CleanupTag {
            submitted_in: self.open_cycle,
        }
    }
}

fn append(sink: &mut impl ActionSink, action: PendingAction) {
    // Local sinks never reject.
    if let Err(e) = sink.append(action) {
        tracing::error!(error = %e, "local buffer rejected an action");
    }
}

impl std::fmt::Debug for DispatchGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DispatchGateway")
            .field("generation", &self.parallel.generation())
            .field("open_cycle", &self.open_cycle)
            .field("pending_actions", &self.pending_actions())
            .field("outstanding_handles", &self.pending.len())
            .finish()
    }
}
