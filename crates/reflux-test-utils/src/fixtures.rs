//! Reusable combat-domain fixtures.
//!
//! States, actions and handlers for pipeline and engine tests:
//!
//! - [`Health`] / [`Armor`]: state singletons.
//! - [`Attack`] / [`ApplyDamage`]: the raw and enriched actions.
//! - [`EnrichAttack`]: resolves an attack into damage and vetoes it.
//! - [`DamageReducer`] / [`BatchDamageReducer`]: the two reducer strategies.
//! - [`ArmoredDamageReducer`]: needs `Armor`, a no-op without it.
//! - [`RecordingMiddleware`], [`FailingMiddleware`], [`PanickingMiddleware`],
//!   [`FailingReducer`]: handlers with scripted behaviour.

use std::sync::atomic::{AtomicUsize, Ordering};

use reflux_core::{Action, HandlerError, Priority, TypeKey};
use reflux_pipeline::{
    BatchReducer, Flow, Middleware, MiddlewareContext, ReadView, ReduceContext, Reducer,
    RegistryBuilder,
};

use crate::CallLog;

// ── States ─────────────────────────────────────────────────────────

/// Hit points per combatant, indexed by combatant.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Health {
    pub hp: Vec<i32>,
}

impl Health {
    /// `count` combatants with `hp` hit points each.
    pub fn uniform(count: usize, hp: i32) -> Self {
        Self { hp: vec![hp; count] }
    }
}

/// Flat damage reduction applied to every hit.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Armor(pub i32);

// ── Actions ────────────────────────────────────────────────────────

/// A raw attack, before modifiers are resolved.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Attack {
    pub target: usize,
    pub base: i32,
    pub crit: bool,
}

/// Resolved damage, ready for the reducer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ApplyDamage {
    pub target: usize,
    pub amount: i32,
}

// ── Middleware ─────────────────────────────────────────────────────

/// Resolves an [`Attack`] into an [`ApplyDamage`] and vetoes the original.
///
/// Crits double the base damage.
pub struct EnrichAttack;

impl Middleware<Attack> for EnrichAttack {
    fn name(&self) -> &str {
        "enrich_attack"
    }

    fn handle(
        &self,
        attack: &mut Attack,
        ctx: &mut MiddlewareContext<'_>,
    ) -> Result<Flow, HandlerError> {
        let amount = if attack.crit {
            attack.base * 2
        } else {
            attack.base
        };
        ctx.emit(ApplyDamage {
            target: attack.target,
            amount,
        });
        Ok(Flow::Veto)
    }
}

/// Logs `"{name}:{cycle}"` for every action it sees, then continues or vetoes.
pub struct RecordingMiddleware {
    pub name: String,
    pub log: CallLog,
    pub veto: bool,
}

impl RecordingMiddleware {
    pub fn new(name: impl Into<String>, log: &CallLog) -> Self {
        Self {
            name: name.into(),
            log: log.clone(),
            veto: false,
        }
    }

    /// Same, but vetoes everything it sees.
    pub fn vetoing(name: impl Into<String>, log: &CallLog) -> Self {
        Self {
            veto: true,
            ..Self::new(name, log)
        }
    }
}

impl<A: Action> Middleware<A> for RecordingMiddleware {
    fn name(&self) -> &str {
        &self.name
    }

    fn handle(&self, _: &mut A, ctx: &mut MiddlewareContext<'_>) -> Result<Flow, HandlerError> {
        self.log.push(format!("{}:{}", self.name, ctx.cycle()));
        Ok(if self.veto { Flow::Veto } else { Flow::Continue })
    }
}

/// Always returns an error.
pub struct FailingMiddleware;

impl<A: Action> Middleware<A> for FailingMiddleware {
    fn name(&self) -> &str {
        "failing"
    }

    fn handle(&self, _: &mut A, _: &mut MiddlewareContext<'_>) -> Result<Flow, HandlerError> {
        Err(HandlerError::failed("deliberate middleware failure"))
    }
}

/// Emits an [`Orphan`], then panics.
///
/// The emission must be rolled back by the engine.
pub struct PanickingMiddleware;

/// Emitted by [`PanickingMiddleware`] right before it panics.
#[derive(Debug)]
pub struct Orphan;

impl<A: Action> Middleware<A> for PanickingMiddleware {
    fn name(&self) -> &str {
        "panicking"
    }

    fn handle(&self, _: &mut A, ctx: &mut MiddlewareContext<'_>) -> Result<Flow, HandlerError> {
        ctx.emit(Orphan);
        panic!("deliberate middleware panic");
    }
}

// ── Reducers ───────────────────────────────────────────────────────

/// General-strategy damage reducer.
///
/// Health never drops below zero. An out-of-range target is a fault.
pub struct DamageReducer;

impl Reducer<Health, ApplyDamage> for DamageReducer {
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
        let slot = next.hp.get_mut(hit.target).ok_or_else(|| {
            HandlerError::failed(format!("no combatant {}", hit.target))
        })?;
        *slot = (*slot - hit.amount).max(0);
        Ok(next)
    }
}

/// Precompiled-strategy damage reducer, observably identical to
/// [`DamageReducer`] for in-range targets.
pub struct BatchDamageReducer;

impl BatchReducer<Health, ApplyDamage> for BatchDamageReducer {
    fn name(&self) -> &str {
        "batch_damage"
    }

    fn apply(&self, health: &mut Health, hit: &ApplyDamage, _: ReadView<'_>) {
        if let Some(slot) = health.hp.get_mut(hit.target) {
            *slot = (*slot - hit.amount).max(0);
        }
    }
}

/// Damage reduced by the [`Armor`] singleton, which it declares as a read.
pub struct ArmoredDamageReducer;

impl Reducer<Health, ApplyDamage> for ArmoredDamageReducer {
    fn name(&self) -> &str {
        "armored_damage"
    }

    fn reads(&self) -> Vec<TypeKey> {
        vec![TypeKey::of::<Armor>()]
    }

    fn reduce(
        &self,
        health: &Health,
        hit: &ApplyDamage,
        ctx: &ReduceContext<'_>,
    ) -> Result<Health, HandlerError> {
        let armor = ctx.require::<Armor>()?;
        let mut next = health.clone();
        if let Some(slot) = next.hp.get_mut(hit.target) {
            *slot = (*slot - (hit.amount - armor.0).max(0)).max(0);
        }
        Ok(next)
    }
}

/// Fails after a configurable number of successful calls.
pub struct FailingReducer {
    pub succeed_count: usize,
    call_count: AtomicUsize,
}

impl FailingReducer {
    /// A reducer that succeeds `succeed_count` times, then fails.
    pub fn new(succeed_count: usize) -> Self {
        Self {
            succeed_count,
            call_count: AtomicUsize::new(0),
        }
    }

    /// How many times `reduce()` has been called.
    pub fn calls(&self) -> usize {
        self.call_count.load(Ordering::Relaxed)
    }
}

impl Reducer<Health, ApplyDamage> for FailingReducer {
    fn name(&self) -> &str {
        "failing_damage"
    }

    fn reduce(
        &self,
        health: &Health,
        hit: &ApplyDamage,
        ctx: &ReduceContext<'_>,
    ) -> Result<Health, HandlerError> {
        let n = self.call_count.fetch_add(1, Ordering::Relaxed);
        if n >= self.succeed_count {
            return Err(HandlerError::failed(format!(
                "deliberate failure after {} successful calls",
                self.succeed_count
            )));
        }
        DamageReducer.reduce(health, hit, ctx)
    }
}

// ── Registries ─────────────────────────────────────────────────────

/// States, enrichment middleware and the general damage reducer.
///
/// Health is critical priority, armor normal.
pub fn combat_registry() -> RegistryBuilder {
    combat_states()
        .middleware::<Attack, _>(0, EnrichAttack)
        .reducer::<Health, ApplyDamage, _>(DamageReducer)
}

/// Same as [`combat_registry`] with the precompiled reducer.
pub fn batch_combat_registry() -> RegistryBuilder {
    combat_states()
        .middleware::<Attack, _>(0, EnrichAttack)
        .batch_reducer::<Health, ApplyDamage, _>(BatchDamageReducer)
}

/// Just the combat state types, with action order `Attack` then `ApplyDamage`.
pub fn combat_states() -> RegistryBuilder {
    reflux_pipeline::Registry::builder()
        .state::<Health>(Priority::Critical)
        .state::<Armor>(Priority::Normal)
        .action::<Attack>()
        .action::<ApplyDamage>()
}
