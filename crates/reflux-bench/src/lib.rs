//! Benchmark profiles and utilities for the Reflux action pipeline.
//!
//! Provides pre-built combat profiles for benchmarking:
//!
//! - [`reference_profile`]: 10K combatants, attack enrichment plus damage
//!   reduction with the chosen reducer strategy
//! - [`attack_wave`]: a deterministic batch of attacks via seed

#![forbid(unsafe_code)]
#![deny(rustdoc::broken_intra_doc_links)]

use std::error::Error;

use reflux_core::ExecutionMode;
use reflux_engine::{DispatchContext, EngineConfig};
use reflux_test_utils::fixtures::{batch_combat_registry, combat_registry, Attack, Health};

/// Combatants in the reference profile.
pub const REFERENCE_COMBATANTS: usize = 10_000;

/// Starting hit points for every combatant.
pub const REFERENCE_HP: i32 = 1_000_000;

/// Build a context with the reference combat pipeline and its singletons.
///
/// `mode` selects the damage reducer strategy. The creation events are
/// already drained, so the first measured cycle only does real work.
pub fn reference_profile(mode: ExecutionMode) -> Result<DispatchContext, Box<dyn Error>> {
    let builder = match mode {
        ExecutionMode::General => combat_registry(),
        ExecutionMode::Precompiled => batch_combat_registry(),
    };
    let mut ctx = DispatchContext::new(builder.build()?, EngineConfig::default())?;
    ctx.create_singleton(Health::uniform(REFERENCE_COMBATANTS, REFERENCE_HP))?;
    ctx.run_cycle();
    Ok(ctx)
}

/// Generate `n` deterministic attacks against `combatants` targets.
///
/// Roughly one attack in eight is a crit.
pub fn attack_wave(n: usize, combatants: usize, seed: u64) -> Vec<Attack> {
    let mut state = seed;
    (0..n)
        .map(|_| {
            state = state
                .wrapping_mul(6364136223846793005)
                .wrapping_add(1442695040888963407);
            let bits = state >> 33;
            Attack {
                target: (bits % combatants as u64) as usize,
                base: 1 + (bits % 7) as i32,
                crit: bits % 8 == 0,
            }
        })
        .collect()
}
