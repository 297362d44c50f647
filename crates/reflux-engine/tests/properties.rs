//! Property tests for cycle-level guarantees.
//!
//! - veto short-circuits the rest of a chain and every reducer,
//! - records of one type are reduced in sort-key order,
//! - at most one change event per state per cycle,
//! - every record is destroyed exactly once.

use proptest::prelude::*;

use reflux_core::{HandlerError, Priority, SortKey};
use reflux_engine::{DispatchContext, EngineConfig};
use reflux_pipeline::{ReduceContext, Reducer, Registry};
use reflux_test_utils::fixtures::{combat_registry, ApplyDamage, Health, RecordingMiddleware};
use reflux_test_utils::{CallLog, DropCounter, Tracked};

#[derive(Clone, Debug, Default, PartialEq)]
struct Seen(Vec<u64>);

struct Mark(u64);

struct RecordMark;

impl Reducer<Seen, Mark> for RecordMark {
    fn name(&self) -> &str {
        "record_mark"
    }

    fn reduce(
        &self,
        seen: &Seen,
        mark: &Mark,
        _: &ReduceContext<'_>,
    ) -> Result<Seen, HandlerError> {
        let mut next = seen.clone();
        next.0.push(mark.0);
        Ok(next)
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn veto_skips_later_handlers_and_reducers(len in 1usize..6, veto_at in 0usize..6) {
        let veto_at = veto_at % len;
        let log = CallLog::new();
        let mut builder = Registry::builder()
            .state::<Seen>(Priority::Normal)
            .reducer::<Seen, Mark, _>(RecordMark);
        for i in 0..len {
            let name = format!("m{i}");
            let middleware = if i == veto_at {
                RecordingMiddleware::vetoing(name, &log)
            } else {
                RecordingMiddleware::new(name, &log)
            };
            builder = builder.middleware::<Mark, _>(i as i32, middleware);
        }
        let mut ctx =
            DispatchContext::new(builder.build().unwrap(), EngineConfig::default()).unwrap();
        ctx.create_singleton(Seen::default()).unwrap();
        ctx.submit(Mark(1));
        let report = ctx.run_cycle();

        let expected: Vec<String> = (0..=veto_at).map(|i| format!("m{i}:1")).collect();
        prop_assert_eq!(log.entries(), expected);
        prop_assert_eq!(report.metrics.vetoed, 1);
        prop_assert_eq!(report.metrics.reduced, 0);
        prop_assert!(ctx.get_singleton::<Seen>().unwrap().0.is_empty());
    }

    #[test]
    fn parallel_records_reduce_in_sort_key_order(
        keys in proptest::collection::hash_set(0u64..10_000, 0..200),
    ) {
        let registry = Registry::builder()
            .state::<Seen>(Priority::Normal)
            .reducer::<Seen, Mark, _>(RecordMark)
            .build()
            .unwrap();
        let mut ctx = DispatchContext::new(registry, EngineConfig::default()).unwrap();
        ctx.create_singleton(Seen::default()).unwrap();
        let writer = ctx.acquire_parallel_writer();
        for &key in &keys {
            writer.submit(SortKey(key), Mark(key)).unwrap();
        }
        ctx.run_cycle();

        let mut expected: Vec<u64> = keys.into_iter().collect();
        expected.sort_unstable();
        prop_assert_eq!(&ctx.get_singleton::<Seen>().unwrap().0, &expected);
    }

    #[test]
    fn at_most_one_change_event_per_state(
        hits in proptest::collection::vec((0usize..4, 0i32..20), 0..50),
    ) {
        let registry = combat_registry().build().unwrap();
        let mut ctx = DispatchContext::new(registry, EngineConfig::default()).unwrap();
        ctx.create_singleton(Health::uniform(4, 100)).unwrap();
        ctx.run_cycle();

        for &(target, amount) in &hits {
            ctx.submit(ApplyDamage { target, amount });
        }
        let report = ctx.run_cycle();
        let changed = hits.iter().any(|&(_, amount)| amount > 0);
        prop_assert_eq!(report.metrics.change_events, usize::from(changed));
        prop_assert_eq!(report.metrics.reduced, hits.len());
    }

    #[test]
    fn every_record_is_destroyed_once(
        local in 0u64..40,
        parallel in 0u64..40,
        veto in any::<bool>(),
        cycles in 1usize..4,
    ) {
        let log = CallLog::new();
        let middleware = if veto {
            RecordingMiddleware::vetoing("gate", &log)
        } else {
            RecordingMiddleware::new("gate", &log)
        };
        let registry = Registry::builder()
            .middleware::<Tracked, _>(0, middleware)
            .build()
            .unwrap();
        let mut ctx = DispatchContext::new(registry, EngineConfig::default()).unwrap();
        let counter = DropCounter::new();

        let mut destroyed = 0;
        for _ in 0..cycles {
            for i in 0..local {
                ctx.submit(counter.track(i));
            }
            let writer = ctx.acquire_parallel_writer();
            for i in 0..parallel {
                writer.submit(SortKey(i), counter.track(i)).unwrap();
            }
            destroyed += ctx.run_cycle().metrics.destroyed;
            prop_assert_eq!(counter.live(), 0);
        }
        prop_assert_eq!(counter.dropped(), counter.issued());
        prop_assert_eq!(destroyed, counter.issued());
        prop_assert_eq!(log.len(), counter.issued());
    }
}
