//! Action buffers: deferred append logs between submission and admission.
//!
//! Two flavors sit behind one [`ActionSink`] interface:
//!
//! - [`LocalBuffer`]: single writer, owned by the orchestrating thread.
//! - [`ParallelBuffer`]: many writers, reached through cloneable
//!   [`ParallelWriter`] handles. Each rotation retires the live buffer and
//!   allocates a fresh one with the next [`GenerationId`]; writes through
//!   a writer for a retired buffer are rejected as stale.
//!
//! Both flavors assign a per-buffer arrival sequence, which breaks ties
//! between equal sort keys.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use reflux_core::{
    Action, CleanupTag, CycleId, DispatchError, GenerationId, Lane, PendingAction, SortKey,
};

/// Anything pending actions can be appended to.
pub trait ActionSink {
    /// Append one action.
    ///
    /// The sink assigns the arrival sequence; lane, sort key, and cleanup
    /// tag are kept as given.
    fn append(&mut self, action: PendingAction) -> Result<(), DispatchError>;
}

// ── LocalBuffer ────────────────────────────────────────────────────

/// Single-writer append log for the orchestrating thread.
#[derive(Debug, Default)]
pub struct LocalBuffer {
    actions: Vec<PendingAction>,
    next_seq: u64,
}

impl LocalBuffer {
    /// Create a buffer with room for `capacity` actions.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            actions: Vec::with_capacity(capacity),
            next_seq: 0,
        }
    }

    /// Number of buffered actions.
    pub fn len(&self) -> usize {
        self.actions.len()
    }

    /// Whether the buffer is empty.
    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    /// Remove and return every buffered action in arrival order.
    pub fn take(&mut self) -> Vec<PendingAction> {
        std::mem::take(&mut self.actions)
    }

    /// Discard every buffered action. Returns how many were dropped.
    pub fn clear(&mut self) -> usize {
        let n = self.actions.len();
        self.actions.clear();
        n
    }
}

impl ActionSink for LocalBuffer {
    fn append(&mut self, mut action: PendingAction) -> Result<(), DispatchError> {
        action.seq = self.next_seq;
        self.next_seq += 1;
        self.actions.push(action);
        Ok(())
    }
}

// ── ParallelBuffer ─────────────────────────────────────────────────

/// Counters shared by every generation of a gateway's parallel buffers.
#[derive(Debug)]
pub(crate) struct WriterShared {
    live_generation: AtomicU64,
    stale_drops: AtomicU64,
}

impl WriterShared {
    pub(crate) fn new(generation: GenerationId) -> Self {
        Self {
            live_generation: AtomicU64::new(generation.0),
            stale_drops: AtomicU64::new(0),
        }
    }

    pub(crate) fn set_live(&self, generation: GenerationId) {
        self.live_generation.store(generation.0, Ordering::Release);
    }

    pub(crate) fn live(&self) -> GenerationId {
        GenerationId(self.live_generation.load(Ordering::Acquire))
    }

    pub(crate) fn stale_drops(&self) -> u64 {
        self.stale_drops.load(Ordering::Relaxed)
    }
}

/// Multi-writer append log for one generation.
///
/// `None` in the slot means the buffer has been retired by a rotation.
pub struct ParallelBuffer {
    generation: GenerationId,
    opened_for: CycleId,
    slot: Mutex<Option<Vec<PendingAction>>>,
}

impl ParallelBuffer {
    pub(crate) fn new(generation: GenerationId, opened_for: CycleId, capacity: usize) -> Self {
        Self {
            generation,
            opened_for,
            slot: Mutex::new(Some(Vec::with_capacity(capacity))),
        }
    }

    /// Generation of this buffer.
    pub fn generation(&self) -> GenerationId {
        self.generation
    }

    /// Number of buffered actions (zero once retired).
    pub fn len(&self) -> usize {
        self.lock().as_ref().map_or(0, Vec::len)
    }

    /// Whether the buffer holds no actions.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether a rotation has retired this buffer.
    pub fn is_retired(&self) -> bool {
        self.lock().is_none()
    }

    /// Close the buffer and take its contents.
    pub(crate) fn retire(&self) -> Vec<PendingAction> {
        self.lock().take().unwrap_or_default()
    }

    fn push(&self, mut action: PendingAction) -> Result<(), PendingAction> {
        let mut guard = self.lock();
        match guard.as_mut() {
            Some(actions) => {
                action.seq = actions.len() as u64;
                actions.push(action);
                Ok(())
            }
            None => Err(action),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Option<Vec<PendingAction>>> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for ParallelBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ParallelBuffer")
            .field("generation", &self.generation)
            .field("opened_for", &self.opened_for)
            .field("len", &self.len())
            .finish()
    }
}

/// Cloneable handle for submitting into one generation of the parallel buffer.
///
/// Obtained from
/// [`DispatchGateway::acquire_parallel_writer`](crate::DispatchGateway::acquire_parallel_writer).
/// Producers choose their own sort keys and must keep them non-colliding
/// within their batch.
#[derive(Clone)]
pub struct ParallelWriter {
    buffer: Arc<ParallelBuffer>,
    shared: Arc<WriterShared>,
}

impl ParallelWriter {
    pub(crate) fn new(buffer: Arc<ParallelBuffer>, shared: Arc<WriterShared>) -> Self {
        Self { buffer, shared }
    }

    /// Generation of the buffer this writer appends to.
    pub fn generation(&self) -> GenerationId {
        self.buffer.generation
    }

    /// Whether the buffer behind this writer has been rotated away.
    pub fn is_stale(&self) -> bool {
        self.buffer.is_retired()
    }

    /// Submit an action under a producer-chosen sort key.
    ///
    /// # Errors
    ///
    /// [`DispatchError::StaleWriter`] if the buffer was retired. The action
    /// is dropped and the gateway's stale-drop counter is incremented.
    pub fn submit<A: Action>(&self, sort_key: SortKey, action: A) -> Result<(), DispatchError> {
        let pending = PendingAction::new(
            action,
            Lane::Parallel,
            sort_key,
            CleanupTag {
                submitted_in: self.buffer.opened_for,
            },
        );
        self.push(pending)
    }

    fn push(&self, pending: PendingAction) -> Result<(), DispatchError> {
        match self.buffer.push(pending) {
            Ok(()) => Ok(()),
            Err(dropped) => {
                self.shared.stale_drops.fetch_add(1, Ordering::Relaxed);
                let current = self.shared.live();
                tracing::error!(
                    writer = %self.buffer.generation,
                    live = %current,
                    action = %dropped.action_type,
                    sort_key = %dropped.sort_key,
                    "submission through stale parallel writer dropped"
                );
                Err(DispatchError::StaleWriter {
                    writer: self.buffer.generation,
                    current: Some(current),
                })
            }
        }
    }
}

impl ActionSink for ParallelWriter {
    fn append(&mut self, mut action: PendingAction) -> Result<(), DispatchError> {
        action.lane = Lane::Parallel;
        self.push(action)
    }
}

impl std::fmt::Debug for ParallelWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ParallelWriter")
            .field("generation", &self.buffer.generation)
            .field("stale", &self.is_stale())
            .finish()
    }
}
