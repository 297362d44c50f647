//! Per-cycle performance metrics for a dispatch context.
//!
//! [`CycleMetrics`] captures timing and record counts for a single cycle,
//! for telemetry, profiling, and development tooling.

/// Timing and count metrics collected during a single cycle.
///
/// All durations are in microseconds. The context populates these fields
/// at the end of each [`run_cycle()`](crate::DispatchContext::run_cycle);
/// consumers read them from the most recent cycle.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CycleMetrics {
    /// Wall-clock time for the entire cycle, in microseconds.
    pub total_us: u64,
    /// Time spent waiting on completion handles during rotation, in microseconds.
    pub rotation_wait_us: u64,
    /// Time spent in the middleware phase, in microseconds.
    pub middleware_us: u64,
    /// Time spent in the reducer phase, in microseconds.
    pub reducer_us: u64,
    /// Time spent in change detection, in microseconds.
    pub change_detection_us: u64,
    /// Time spent delivering notifications, in microseconds.
    pub notification_us: u64,
    /// Time spent in the cleanup sweep, in microseconds.
    pub cleanup_us: u64,
    /// Records made visible to the pipeline this cycle.
    pub visible: usize,
    /// Records consumed by a middleware veto.
    pub vetoed: usize,
    /// Records dropped because a middleware faulted.
    pub middleware_faults: usize,
    /// Reducer applications that failed or were skipped for missing context.
    pub reducer_faults: usize,
    /// Reducer applications committed.
    pub reduced: usize,
    /// Records carried to the next cycle after the last middleware pass.
    pub carried_over: usize,
    /// Actions emitted by middleware for the next cycle.
    pub deferred: usize,
    /// Middleware passes run this cycle.
    pub middleware_passes: u32,
    /// Change events enqueued this cycle.
    pub change_events: usize,
    /// Change events delivered this cycle.
    pub delivered: usize,
    /// Observer invocations that panicked during delivery.
    pub observer_faults: usize,
    /// Change events left in the queue after the drain.
    pub pending_events: usize,
    /// Records destroyed by this cycle's sweep.
    pub destroyed: usize,
    /// Cumulative number of writes dropped through stale parallel writers.
    pub stale_writer_drops: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_metrics_are_zero() {
        let m = CycleMetrics::default();
        assert_eq!(m.total_us, 0);
        assert_eq!(m.visible, 0);
        assert_eq!(m.delivered, 0);
        assert_eq!(m.stale_writer_drops, 0);
    }
}
