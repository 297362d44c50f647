//! Action and state marker traits, pending actions, and action records.
//!
//! An action travels through two shapes. A [`PendingAction`] sits in an
//! action buffer between submission and the start of the cycle that reads
//! it. At cycle start it becomes an [`ActionRecord`]: it gains an
//! [`ActionId`] and a [`CleanupTag`] naming the cycle whose sweep destroys it.

use std::any::Any;
use std::fmt;

use crate::id::{ActionId, CycleId, Lane, SortKey, TypeKey};

/// A one-shot command payload describing an intended mutation.
///
/// Implemented for every `Send + 'static` type; registering the type with
/// the registry is what makes it part of the pipeline.
pub trait Action: Any + Send + 'static {}

impl<T: Any + Send + 'static> Action for T {}

/// A singleton state record.
///
/// Must be cloneable (reducers produce new values), comparable (change
/// detection), and shareable across threads (observers receive shared
/// references to old and new values).
pub trait State: Any + Clone + PartialEq + Send + Sync + 'static {}

impl<T: Any + Clone + PartialEq + Send + Sync + 'static> State for T {}

/// Marker stamped on every submission by the dispatch gateway.
///
/// Records which cycle was open when the action was submitted so the
/// sweep can attribute it. Every action carries exactly one.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CleanupTag {
    /// Cycle that was open (not yet run) when the action was submitted.
    pub submitted_in: CycleId,
}

/// An action waiting in a buffer for the next cycle.
pub struct PendingAction {
    /// Runtime type of the payload.
    pub action_type: TypeKey,
    /// The payload, type-erased.
    pub payload: Box<dyn Any + Send>,
    /// Which buffer flavor the action entered through.
    pub lane: Lane,
    /// Replay order key within the lane.
    pub sort_key: SortKey,
    /// Arrival sequence within the buffer; tiebreaker for equal sort keys.
    pub seq: u64,
    /// Cleanup marker stamped at submission.
    pub cleanup: CleanupTag,
    /// Record emitted by the middleware that produced this action, if any.
    pub parent: Option<ActionId>,
    /// Identity kept by a record carried over from an earlier cycle.
    pub carried_id: Option<ActionId>,
}

impl PendingAction {
    /// Wrap a typed action.
    pub fn new<A: Action>(action: A, lane: Lane, sort_key: SortKey, cleanup: CleanupTag) -> Self {
        Self {
            action_type: TypeKey::of::<A>(),
            payload: Box::new(action),
            lane,
            sort_key,
            seq: 0,
            cleanup,
            parent: None,
            carried_id: None,
        }
    }

    /// Mark this action as derived from `parent`.
    pub fn with_parent(mut self, parent: ActionId) -> Self {
        self.parent = Some(parent);
        self
    }
}

impl fmt::Debug for PendingAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingAction")
            .field("action_type", &self.action_type.short_name())
            .field("lane", &self.lane)
            .field("sort_key", &self.sort_key)
            .field("seq", &self.seq)
            .field("parent", &self.parent)
            .finish()
    }
}

/// An action visible to the pipeline during one cycle.
///
/// Owned by the cycle's ledger from admission until the cleanup sweep.
pub struct ActionRecord {
    /// Unique record identity within the context.
    pub id: ActionId,
    /// Runtime type of the payload.
    pub action_type: TypeKey,
    /// The payload. Middleware may mutate it in place.
    pub payload: Box<dyn Any + Send>,
    /// Which buffer flavor the action entered through.
    pub lane: Lane,
    /// Replay order key within the lane.
    pub sort_key: SortKey,
    /// Arrival sequence within the originating buffer.
    pub seq: u64,
    /// Cleanup marker stamped at submission.
    pub cleanup: CleanupTag,
    /// The cycle whose sweep destroys this record.
    pub destroy_in: CycleId,
    /// The record whose middleware emitted this one, if any.
    pub parent: Option<ActionId>,
}

impl ActionRecord {
    /// Admit a pending action into `cycle` under the given identity.
    pub fn admit(pending: PendingAction, id: ActionId, cycle: CycleId) -> Self {
        Self {
            id,
            action_type: pending.action_type,
            payload: pending.payload,
            lane: pending.lane,
            sort_key: pending.sort_key,
            seq: pending.seq,
            cleanup: pending.cleanup,
            destroy_in: cycle,
            parent: pending.parent,
        }
    }

    /// Turn the record back into a pending action, keeping its identity.
    ///
    /// Used when a record's processing is deferred to the next cycle.
    pub fn into_pending(self) -> PendingAction {
        PendingAction {
            action_type: self.action_type,
            payload: self.payload,
            lane: self.lane,
            sort_key: self.sort_key,
            seq: self.seq,
            cleanup: self.cleanup,
            parent: self.parent,
            carried_id: Some(self.id),
        }
    }

    /// Borrow the payload as `A`.
    pub fn payload<A: Action>(&self) -> Option<&A> {
        self.payload.downcast_ref::<A>()
    }

    /// Mutably borrow the payload as `A`.
    pub fn payload_mut<A: Action>(&mut self) -> Option<&mut A> {
        self.payload.downcast_mut::<A>()
    }

    /// Ordering key within an action type: `(lane, sort_key, seq)`.
    pub fn replay_key(&self) -> (Lane, SortKey, u64) {
        (self.lane, self.sort_key, self.seq)
    }
}

impl fmt::Debug for ActionRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActionRecord")
            .field("id", &self.id)
            .field("action_type", &self.action_type.short_name())
            .field("lane", &self.lane)
            .field("sort_key", &self.sort_key)
            .field("seq", &self.seq)
            .field("destroy_in", &self.destroy_in)
            .field("parent", &self.parent)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq)]
    struct Attack {
        base: u32,
    }

    fn tag() -> CleanupTag {
        CleanupTag {
            submitted_in: CycleId(1),
        }
    }

    #[test]
    fn admitted_record_keeps_payload_and_order() {
        let mut pending = PendingAction::new(Attack { base: 10 }, Lane::Local, SortKey(4), tag());
        pending.seq = 9;
        let mut rec = ActionRecord::admit(pending, ActionId(1), CycleId(1));
        assert_eq!(rec.action_type, TypeKey::of::<Attack>());
        assert_eq!(rec.replay_key(), (Lane::Local, SortKey(4), 9));
        assert_eq!(rec.payload::<Attack>(), Some(&Attack { base: 10 }));
        rec.payload_mut::<Attack>().unwrap().base = 12;
        assert_eq!(rec.payload::<Attack>().unwrap().base, 12);
        assert!(rec.payload::<u32>().is_none());
    }

    #[test]
    fn carried_record_keeps_identity() {
        let pending = PendingAction::new(Attack { base: 1 }, Lane::Parallel, SortKey(0), tag())
            .with_parent(ActionId(7));
        let rec = ActionRecord::admit(pending, ActionId(3), CycleId(1));
        let carried = rec.into_pending();
        assert_eq!(carried.carried_id, Some(ActionId(3)));
        assert_eq!(carried.parent, Some(ActionId(7)));
        assert_eq!(carried.lane, Lane::Parallel);
    }
}
