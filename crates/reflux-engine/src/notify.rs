//! Change events and the priority-partitioned notification queue.

use std::collections::VecDeque;
use std::fmt;

use reflux_core::{CycleId, Priority, SharedState, State, TypeKey};

/// An observed change to one state singleton.
///
/// Carries shared references to the new value and, unless the singleton
/// was just created, the value it had at the start of the cycle.
#[derive(Clone)]
pub struct ChangeEvent {
    /// The state type that changed.
    pub state: TypeKey,
    /// Notification tier.
    pub priority: Priority,
    /// Cycle in which the change was detected.
    pub cycle: CycleId,
    /// Value after the change.
    pub new: SharedState,
    /// Value before the change, if there was one.
    pub old: Option<SharedState>,
}

impl ChangeEvent {
    /// The new value as `S`.
    pub fn new_value<S: State>(&self) -> Option<&S> {
        self.new.downcast_ref::<S>()
    }

    /// The old value as `S`, if present.
    pub fn old_value<S: State>(&self) -> Option<&S> {
        self.old.as_ref().and_then(|v| v.downcast_ref::<S>())
    }

    /// Whether an old value is present.
    pub fn has_old_value(&self) -> bool {
        self.old.is_some()
    }
}

impl fmt::Debug for ChangeEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChangeEvent")
            .field("state", &self.state.short_name())
            .field("priority", &self.priority)
            .field("cycle", &self.cycle)
            .field("has_old_value", &self.has_old_value())
            .finish()
    }
}

/// Three FIFO tiers drained highest priority first.
#[derive(Debug, Default)]
pub struct NotificationQueue {
    tiers: [VecDeque<ChangeEvent>; 3],
}

impl NotificationQueue {
    /// Create an empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an event to the tail of its tier.
    pub fn push(&mut self, event: ChangeEvent) {
        self.tiers[event.priority.index()].push_back(event);
    }

    /// Remove the oldest event of the highest non-empty tier.
    pub fn pop(&mut self) -> Option<ChangeEvent> {
        self.tiers.iter_mut().find_map(VecDeque::pop_front)
    }

    /// Events waiting in one tier.
    pub fn len_of(&self, priority: Priority) -> usize {
        self.tiers[priority.index()].len()
    }

    /// Events waiting across all tiers.
    pub fn len(&self) -> usize {
        self.tiers.iter().map(VecDeque::len).sum()
    }

    /// Whether every tier is empty.
    pub fn is_empty(&self) -> bool {
        self.tiers.iter().all(VecDeque::is_empty)
    }

    /// Discard every pending event. Returns how many were discarded.
    ///
    /// The only way events leave the queue without being delivered.
    pub fn clear(&mut self) -> usize {
        let n = self.len();
        for tier in &mut self.tiers {
            tier.clear();
        }
        n
    }
}
