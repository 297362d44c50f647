//! The reducer phase.
//!
//! Surviving records are applied in visible order, `(action type rank,
//! lane, sort key, arrival)`, whichever middleware pass they survived.
//! Records of the same action type form a run; each of the type's reducers
//! is applied to the whole run before the next reducer, so precompiled
//! reducers see the full batch at once. Every state type targeted by a
//! reducer is reported to the change detector before its first write.

use std::any::Any;

use reflux_core::{ActionId, ActionRecord, CycleId, StateStore};
use reflux_pipeline::{ReadSet, ReduceHost, Registry};

use crate::chain::log_fault;
use crate::change::ChangeDetector;
use crate::ledger::ActionLedger;

/// Counts from one reducer phase.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub(crate) struct ReducerPhase {
    pub reduced: usize,
    pub faults: usize,
}

pub(crate) fn run_reducer_phase(
    registry: &Registry,
    store: &mut dyn StateStore,
    ledger: &ActionLedger,
    survivors: &[ActionId],
    read_set: &ReadSet,
    cycle: CycleId,
    detector: &mut ChangeDetector,
) -> ReducerPhase {
    let mut phase = ReducerPhase::default();
    let mut records: Vec<&ActionRecord> =
        survivors.iter().filter_map(|id| ledger.get(*id)).collect();
    // Derived records survive in later passes but sort by their inherited key.
    records.sort_by_key(|r| {
        let (lane, sort_key, seq) = r.replay_key();
        (registry.action_rank(r.action_type), lane, sort_key, seq)
    });
    let host = ReduceHost { cycle, read_set };

    for run in records.chunk_by(|a, b| a.action_type == b.action_type) {
        let action = run[0].action_type;
        let Some(entry) = registry.action(action) else {
            continue;
        };
        if entry.reducers().is_empty() {
            continue;
        }
        let payloads: Vec<&(dyn Any + Send)> = run.iter().map(|r| &*r.payload).collect();
        for reducer in entry.reducers() {
            detector.touch(reducer.state(), &*store);
            let outcome = reducer.apply_run(&mut *store, &payloads, host);
            phase.reduced += outcome.applied;
            for fault in &outcome.faults {
                log_fault("reducer", reducer.name(), action, run[fault.index].id, &fault.error);
            }
            phase.faults += outcome.faults.len();
        }
    }
    phase
}
