//! Reflux quickstart: a minimal combat pipeline from scratch.
//!
//! Demonstrates:
//!   1. Registering states, an enrichment middleware and a reducer
//!   2. Creating singletons and observing their changes
//!   3. Submitting from the main thread and from parallel workers
//!   4. Running cycles and reading their metrics
//!
//! Run with:
//!   RUST_LOG=reflux_engine=debug cargo run --example quickstart

use std::thread;

use reflux_core::{HandlerError, Priority, SortKey};
use reflux_engine::{DispatchContext, EngineConfig};
use reflux_pipeline::{Flow, Middleware, MiddlewareContext, ReduceContext, Reducer, Registry};
use tracing_subscriber::EnvFilter;

// ─── States ─────────────────────────────────────────────────────

const COMBATANTS: usize = 4;

#[derive(Clone, Debug, PartialEq)]
struct Health {
    hp: [i32; COMBATANTS],
}

#[derive(Clone, Debug, PartialEq)]
struct Morale(i32);

// ─── Actions ────────────────────────────────────────────────────

struct Attack {
    attacker: usize,
    target: usize,
    base: i32,
}

struct ApplyDamage {
    target: usize,
    amount: i32,
}

struct Rally(i32);

// ─── Middleware: resolve attacks ────────────────────────────────
//
// Dead attackers do nothing; otherwise morale scales the damage. The
// resolved hit is emitted as its own action and the attack is consumed.

struct ResolveAttack;

impl Middleware<Attack> for ResolveAttack {
    fn name(&self) -> &str {
        "resolve_attack"
    }

    fn handle(
        &self,
        attack: &mut Attack,
        ctx: &mut MiddlewareContext<'_>,
    ) -> Result<Flow, HandlerError> {
        let health = ctx.require::<Health>()?;
        if health.hp[attack.attacker] == 0 {
            return Ok(Flow::Veto);
        }
        let morale = ctx.state::<Morale>().map_or(0, |m| m.0);
        let amount = attack.base + morale / 10;
        ctx.emit(ApplyDamage {
            target: attack.target,
            amount,
        });
        Ok(Flow::Veto)
    }
}

// ─── Reducers ───────────────────────────────────────────────────

struct Damage;

impl Reducer<Health, ApplyDamage> for Damage {
    fn name(&self) -> &str {
        "damage"
    }

    fn reduce(
        &self,
        health: &Health,
        hit: &ApplyDamage,
        _: &ReduceContext<'_>,
    ) -> Result<Health, HandlerError> {
        let mut next = health.clone();
        next.hp[hit.target] = (next.hp[hit.target] - hit.amount).max(0);
        Ok(next)
    }
}

struct RaiseMorale;

impl Reducer<Morale, Rally> for RaiseMorale {
    fn name(&self) -> &str {
        "raise_morale"
    }

    fn reduce(
        &self,
        morale: &Morale,
        rally: &Rally,
        _: &ReduceContext<'_>,
    ) -> Result<Morale, HandlerError> {
        Ok(Morale(morale.0 + rally.0))
    }
}

// ─── Main ───────────────────────────────────────────────────────

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let registry = Registry::builder()
        .state::<Health>(Priority::Critical)
        .state::<Morale>(Priority::Normal)
        .action::<Rally>()
        .middleware::<Attack, _>(0, ResolveAttack)
        .reducer::<Health, ApplyDamage, _>(Damage)
        .reducer::<Morale, Rally, _>(RaiseMorale)
        .build()?;

    let mut ctx = DispatchContext::new(registry, EngineConfig::default())?;
    ctx.on_change::<Health, _>(|new, old| match old {
        Some(old) => println!("  health {:?} -> {:?}", old.hp, new.hp),
        None => println!("  health starts at {:?}", new.hp),
    });
    ctx.on_change::<Morale, _>(|new, _| println!("  morale is now {}", new.0));

    ctx.create_singleton(Health {
        hp: [30; COMBATANTS],
    })?;
    ctx.create_singleton(Morale(0))?;

    // Cycle 1: a rally and a single attack from the main thread.
    ctx.submit(Rally(20));
    ctx.submit(Attack {
        attacker: 0,
        target: 1,
        base: 5,
    });
    println!("cycle 1");
    let report = ctx.run_cycle();
    println!(
        "  visible={} vetoed={} reduced={} events={}",
        report.metrics.visible,
        report.metrics.vetoed,
        report.metrics.reduced,
        report.metrics.change_events
    );

    // Cycle 2: two workers attack in parallel with disjoint sort keys.
    for worker in 0..2u64 {
        let writer = ctx.acquire_parallel_writer();
        let handle = thread::spawn(move || {
            for i in 0..3u64 {
                let key = SortKey(worker * 100 + i);
                let attack = Attack {
                    attacker: worker as usize,
                    target: 2 + worker as usize,
                    base: 3,
                };
                if let Err(e) = writer.submit(key, attack) {
                    eprintln!("worker {worker}: {e}");
                }
            }
        });
        ctx.register_completion(handle);
    }
    println!("cycle 2");
    let report = ctx.run_cycle();
    println!(
        "  visible={} passes={} reduced={} total={}us",
        report.metrics.visible,
        report.metrics.middleware_passes,
        report.metrics.reduced,
        report.metrics.total_us
    );

    println!("final health: {:?}", ctx.get_singleton::<Health>().map(|h| h.hp));
    Ok(())
}
