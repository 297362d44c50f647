//! Middleware and reducer traits plus the handler registry for Reflux.
//!
//! Handlers are registered against concrete action and state types and
//! validated once into a [`Registry`]. The engine drives them through the
//! type-erased [`MiddlewareEntry`] and [`ReducerEntry`] wrappers.

#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
#![forbid(unsafe_code)]

mod erased;
pub mod middleware;
pub mod read_set;
pub mod reducer;
pub mod registry;

pub use erased::{RecordFault, ReduceHost, RunOutcome};
pub use middleware::{
    BatchContext, BatchMiddleware, Emissions, Flow, Middleware, MiddlewareContext, MiddlewareHost,
};
pub use read_set::{ReadSet, ReadView};
pub use reducer::{BatchReducer, ReduceContext, Reducer};
pub use registry::{
    ActionEntry, MiddlewareEntry, ReducerEntry, Registry, RegistryBuilder, RegistryError,
    StateEntry,
};
