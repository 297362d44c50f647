//! The middleware phase.
//!
//! Visible records are sorted by `(action type rank, lane, sort key,
//! arrival)` and run through their action type's chain. Actions emitted
//! into the current cycle are admitted immediately and processed in the
//! next pass; passes repeat until nothing new was emitted or the pass
//! limit is reached, at which point the unprocessed records are carried
//! to the next cycle.

use reflux_core::{ActionId, ActionRecord, CycleId, HandlerError, StateStore, TypeKey};
use reflux_pipeline::{ActionEntry, Emissions, Flow, MiddlewareHost, ReadSet, Registry};

use crate::gateway::DispatchGateway;
use crate::ledger::ActionLedger;

/// What happened to one record in its chain.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Verdict {
    Continue,
    Vetoed,
    Faulted,
}

/// Counts and survivors of one middleware phase.
#[derive(Debug, Default)]
pub(crate) struct MiddlewarePhase {
    /// Records that reached the end of their chain, in the order they did.
    /// The reducer phase re-sorts them into visible order.
    pub survivors: Vec<ActionId>,
    pub vetoed: usize,
    pub faults: usize,
    pub passes: u32,
    pub carried_over: usize,
    pub deferred: usize,
}

/// Log a handler fault: missing context at debug, everything else at warn.
pub(crate) fn log_fault(
    phase: &'static str,
    handler: &str,
    action: TypeKey,
    record: ActionId,
    error: &HandlerError,
) {
    if error.is_missing_context() {
        tracing::debug!(phase, handler, %action, %record, %error, "handler skipped");
    } else {
        tracing::warn!(phase, handler, %action, %record, %error, "handler faulted");
    }
}

/// Run one record through its chain.
pub(crate) fn run_chain(
    entry: Option<&ActionEntry>,
    record: &mut ActionRecord,
    store: &dyn StateStore,
    read_set: &ReadSet,
    cycle: CycleId,
    emissions: &mut Emissions,
) -> Verdict {
    let Some(entry) = entry else {
        tracing::trace!(
            action = %record.action_type,
            record = %record.id,
            "no handlers registered"
        );
        return Verdict::Continue;
    };
    for middleware in entry.chain() {
        let mut host = MiddlewareHost {
            cycle,
            record: record.id,
            lane: record.lane,
            sort_key: record.sort_key,
            store,
            read_set,
            emissions: &mut *emissions,
        };
        match middleware.invoke(&mut *record.payload, &mut host) {
            Ok(Flow::Continue) => {}
            Ok(Flow::Veto) => {
                tracing::trace!(
                    handler = middleware.name(),
                    action = %record.action_type,
                    record = %record.id,
                    "vetoed"
                );
                return Verdict::Vetoed;
            }
            Err(error) => {
                log_fault("middleware", middleware.name(), record.action_type, record.id, &error);
                return Verdict::Faulted;
            }
        }
    }
    Verdict::Continue
}

/// Inputs shared by every pass of a middleware phase.
pub(crate) struct PhaseInputs<'a> {
    pub registry: &'a Registry,
    pub store: &'a dyn StateStore,
    pub read_set: &'a ReadSet,
    pub cycle: CycleId,
    pub max_passes: u32,
}

/// Run middleware passes over `batch` until no record is left.
pub(crate) fn run_middleware_phase(
    inputs: &PhaseInputs<'_>,
    ledger: &mut ActionLedger,
    gateway: &mut DispatchGateway,
    mut batch: Vec<ActionId>,
) -> MiddlewarePhase {
    let mut phase = MiddlewarePhase::default();
    let mut emissions = Emissions::new();

    while !batch.is_empty() {
        if phase.passes == inputs.max_passes {
            for id in batch {
                if let Some(pending) = ledger.carry(id) {
                    gateway.defer(pending);
                    phase.carried_over += 1;
                }
            }
            tracing::warn!(
                cycle = %inputs.cycle,
                carried = phase.carried_over,
                max_passes = inputs.max_passes,
                "middleware pass limit reached; carrying records to next cycle"
            );
            break;
        }
        phase.passes += 1;

        batch.sort_by_cached_key(|id| {
            ledger.get(*id).map(|r| {
                let (lane, sort_key, seq) = r.replay_key();
                (inputs.registry.action_rank(r.action_type), lane, sort_key, seq)
            })
        });

        let mut next = Vec::new();
        let mut emitted_seq = 0u64;
        for id in batch {
            let Some(record) = ledger.get_mut(id) else {
                continue;
            };
            let entry = inputs.registry.action(record.action_type);
            match run_chain(
                entry,
                record,
                inputs.store,
                inputs.read_set,
                inputs.cycle,
                &mut emissions,
            ) {
                Verdict::Continue => phase.survivors.push(id),
                Verdict::Vetoed => phase.vetoed += 1,
                Verdict::Faulted => phase.faults += 1,
            }
            for mut pending in emissions.now.drain(..) {
                pending.seq = emitted_seq;
                emitted_seq += 1;
                next.push(ledger.admit(pending, inputs.cycle));
            }
            for pending in emissions.next.drain(..) {
                gateway.defer(pending);
                phase.deferred += 1;
            }
        }
        batch = next;
    }
    phase
}
