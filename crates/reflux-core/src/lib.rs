//! Core types and traits for the Reflux action pipeline.
//!
//! This is the leaf crate with zero internal dependencies. It defines
//! the fundamental abstractions used throughout the Reflux workspace:
//! identifiers, action records, the state store boundary, and error types.

#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
#![forbid(unsafe_code)]

pub mod action;
pub mod error;
pub mod id;
pub mod store;

pub use action::{Action, ActionRecord, CleanupTag, PendingAction, State};
pub use error::{DispatchError, HandlerError, StoreError};
pub use id::{
    ActionId, ContextId, CycleId, ExecutionMode, GenerationId, Lane, OrderKey, Priority, SortKey,
    TypeKey,
};
pub use store::{MemoryStore, SharedState, SingletonHandle, StateStore, StateStoreExt};
