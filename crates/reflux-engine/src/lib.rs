//! Cycle orchestration for the Reflux action pipeline.
//!
//! Provides [`DispatchContext`], which owns the action buffers, the
//! ledger of visible action records, change detection, the notification
//! queue and observers for one simulation, and runs one deterministic
//! cycle per [`run_cycle()`](DispatchContext::run_cycle) call.
//! [`Runtime`] holds several isolated contexts behind one registry.

#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
#![forbid(unsafe_code)]

pub mod buffer;
mod chain;
pub mod change;
pub mod completion;
pub mod config;
pub mod context;
pub mod dispatcher;
pub mod gateway;
pub mod ledger;
pub mod metrics;
pub mod notify;
mod reduce;
pub mod runtime;

pub use buffer::{ActionSink, LocalBuffer, ParallelBuffer, ParallelWriter};
pub use change::ChangeDetector;
pub use completion::{completion_pair, CombinedHandle, CompletionHandle, CompletionToken};
pub use config::{ConfigError, EngineConfig};
pub use context::{CycleReport, DispatchContext, ShutdownReport};
pub use dispatcher::{DrainOutcome, EventDispatcher, ObserverId};
pub use gateway::{DispatchGateway, Rotation};
pub use ledger::ActionLedger;
pub use metrics::CycleMetrics;
pub use notify::{ChangeEvent, NotificationQueue};
pub use runtime::Runtime;
