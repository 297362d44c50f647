//! Reflux: a deterministic action pipeline for simulations.
//!
//! Producers submit actions; once per cycle each action passes through an
//! ordered middleware chain, surviving actions are applied to state
//! singletons by pure reducers, changed states raise prioritized change
//! events for observers, and every action record is destroyed.
//!
//! This is the top-level facade crate that re-exports the public API from
//! all Reflux sub-crates.
//!
//! # Quick start
//!
//! ```rust
//! use reflux::prelude::*;
//!
//! #[derive(Clone, Debug, PartialEq)]
//! struct Score(u32);
//!
//! struct AddPoints(u32);
//!
//! struct Points;
//! impl Reducer<Score, AddPoints> for Points {
//!     fn name(&self) -> &str { "points" }
//!     fn reduce(
//!         &self,
//!         s: &Score,
//!         a: &AddPoints,
//!         _: &ReduceContext<'_>,
//!     ) -> Result<Score, HandlerError> {
//!         Ok(Score(s.0 + a.0))
//!     }
//! }
//!
//! let registry = Registry::builder()
//!     .state::<Score>(Priority::Normal)
//!     .reducer::<Score, AddPoints, _>(Points)
//!     .build()
//!     .unwrap();
//! let mut ctx = DispatchContext::new(registry, EngineConfig::default()).unwrap();
//! ctx.create_singleton(Score(0)).unwrap();
//! ctx.submit(AddPoints(3));
//! let report = ctx.run_cycle();
//! assert_eq!(report.metrics.reduced, 1);
//! assert_eq!(ctx.get_singleton::<Score>(), Some(&Score(3)));
//! ```
//!
//! # Modules
//!
//! | Module | Sub-crate | Contents |
//! |--------|-----------|----------|
//! | [`types`] | `reflux-core` | IDs, action records, the state store, errors |
//! | [`pipeline`] | `reflux-pipeline` | Middleware and reducer traits, the registry |
//! | [`engine`] | `reflux-engine` | Buffers, gateway, dispatch contexts, notifications |

#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
#![forbid(unsafe_code)]

/// Core types, traits, and IDs (`reflux-core`).
///
/// Contains action records, the [`types::StateStore`] boundary with its
/// in-memory implementation, and the error enums.
pub use reflux_core as types;

/// Handler traits and the registry (`reflux-pipeline`).
///
/// [`pipeline::Middleware`] and [`pipeline::Reducer`] are the main
/// extension points for user-defined logic.
pub use reflux_pipeline as pipeline;

/// Cycle orchestration (`reflux-engine`).
///
/// [`engine::DispatchContext`] for one pipeline, [`engine::Runtime`] for
/// several isolated ones.
pub use reflux_engine as engine;

/// Common imports for typical Reflux usage.
///
/// ```rust
/// use reflux::prelude::*;
/// ```
pub mod prelude {
    // Core types and traits
    pub use reflux_core::{
        Action, ContextId, CycleId, ExecutionMode, Priority, SortKey, State, StateStore,
        StateStoreExt, TypeKey,
    };

    // Errors
    pub use reflux_core::{DispatchError, HandlerError, StoreError};
    pub use reflux_pipeline::RegistryError;

    // Handlers
    pub use reflux_pipeline::{
        BatchContext, BatchMiddleware, BatchReducer, Flow, Middleware, MiddlewareContext,
        ReadView, ReduceContext, Reducer, Registry,
    };

    // Engine
    pub use reflux_engine::{
        completion_pair, ChangeEvent, CompletionHandle, ConfigError, CycleMetrics, CycleReport,
        DispatchContext, EngineConfig, ObserverId, ParallelWriter, Runtime,
    };
}
