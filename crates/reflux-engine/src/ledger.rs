//! The action ledger and the cleanup sweep.
//!
//! [`ActionLedger`] owns every [`ActionRecord`] visible to the pipeline in
//! the current cycle. Records are admitted at rotation (or when middleware
//! emits into the current cycle) and destroyed by [`sweep()`](ActionLedger::sweep)
//! once the cycle's notification drain has completed. Dropping a record
//! drops its payload; a record leaves the ledger exactly once, either by
//! the sweep or by being carried to the next cycle.

use indexmap::IndexMap;
use reflux_core::{ActionId, ActionRecord, CycleId, PendingAction};

/// Owner of the current cycle's action records.
#[derive(Debug, Default)]
pub struct ActionLedger {
    records: IndexMap<ActionId, ActionRecord>,
    next_id: u64,
    destroyed_total: u64,
}

impl ActionLedger {
    /// Create an empty ledger.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make a pending action visible in `cycle`.
    ///
    /// Carried actions keep their identity; everything else gets a fresh ID.
    pub fn admit(&mut self, pending: PendingAction, cycle: CycleId) -> ActionId {
        let id = match pending.carried_id {
            Some(id) => id,
            None => {
                let id = ActionId(self.next_id);
                self.next_id += 1;
                id
            }
        };
        self.records
            .insert(id, ActionRecord::admit(pending, id, cycle));
        id
    }

    /// Borrow a record.
    pub fn get(&self, id: ActionId) -> Option<&ActionRecord> {
        self.records.get(&id)
    }

    /// Mutably borrow a record.
    pub fn get_mut(&mut self, id: ActionId) -> Option<&mut ActionRecord> {
        self.records.get_mut(&id)
    }

    /// Remove a record so it can be processed in the next cycle.
    ///
    /// The returned pending action keeps the record's identity.
    pub fn carry(&mut self, id: ActionId) -> Option<PendingAction> {
        self.records
            .shift_remove(&id)
            .map(ActionRecord::into_pending)
    }

    /// Records currently owned.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether no record is owned.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Total records destroyed over the ledger's lifetime.
    pub fn destroyed_total(&self) -> u64 {
        self.destroyed_total
    }

    /// Destroy every record visible in `cycle`.
    ///
    /// Records from earlier cycles cannot normally remain; if any do they
    /// are destroyed as well and logged. Sweeping an empty ledger is a
    /// no-op. Returns the number of records destroyed.
    pub fn sweep(&mut self, cycle: CycleId) -> usize {
        let destroyed = self.records.len();
        for (id, record) in self.records.drain(..) {
            if record.destroy_in < cycle {
                tracing::warn!(
                    %id,
                    action = %record.action_type,
                    destroy_in = %record.destroy_in,
                    %cycle,
                    "sweeping record left over from an earlier cycle"
                );
            }
        }
        self.destroyed_total += destroyed as u64;
        destroyed
    }
}
