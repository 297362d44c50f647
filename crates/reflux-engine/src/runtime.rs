//! Several isolated dispatch contexts sharing one registry.
//!
//! [`Runtime`] owns a default [`DispatchContext`] plus any number of
//! additional ones, keyed by [`ContextId`]. Contexts share the immutable
//! handler [`Registry`] but nothing else: each has its own store, buffers,
//! queue and observers. Operations that take an `Option<ContextId>` route
//! to the default context when given `None`.

use std::sync::Arc;

use indexmap::IndexMap;
use reflux_core::{Action, ContextId, DispatchError, SortKey, StateStore};
use reflux_pipeline::Registry;

use crate::buffer::ParallelWriter;
use crate::completion::CompletionHandle;
use crate::config::{ConfigError, EngineConfig};
use crate::context::{CycleReport, DispatchContext, ShutdownReport};

/// A set of isolated dispatch contexts.
pub struct Runtime {
    registry: Arc<Registry>,
    config: EngineConfig,
    contexts: IndexMap<ContextId, DispatchContext>,
    default: ContextId,
}

impl Runtime {
    /// Create a runtime with a default context backed by a memory store.
    pub fn new(
        registry: impl Into<Arc<Registry>>,
        config: EngineConfig,
    ) -> Result<Self, ConfigError> {
        let registry = registry.into();
        let default_context = DispatchContext::new(Arc::clone(&registry), config.clone())?;
        let default = default_context.id();
        let mut contexts = IndexMap::new();
        contexts.insert(default, default_context);
        Ok(Self {
            registry,
            config,
            contexts,
            default,
        })
    }

    /// Add a context backed by a fresh memory store.
    pub fn create_context(&mut self) -> ContextId {
        self.insert(DispatchContext::assemble(
            Arc::clone(&self.registry),
            self.config.clone(),
            Box::new(reflux_core::MemoryStore::new()),
        ))
    }

    /// Add a context backed by `store`.
    pub fn create_context_with_store(&mut self, store: impl StateStore + 'static) -> ContextId {
        self.insert(DispatchContext::assemble(
            Arc::clone(&self.registry),
            self.config.clone(),
            Box::new(store),
        ))
    }

    fn insert(&mut self, context: DispatchContext) -> ContextId {
        let id = context.id();
        self.contexts.insert(id, context);
        id
    }

    /// The context used when no ID is given.
    pub fn default_context(&self) -> ContextId {
        self.default
    }

    /// Borrow a context.
    pub fn context(&self, id: ContextId) -> Option<&DispatchContext> {
        self.contexts.get(&id)
    }

    /// Mutably borrow a context.
    pub fn context_mut(&mut self, id: ContextId) -> Option<&mut DispatchContext> {
        self.contexts.get_mut(&id)
    }

    /// Remove a context and return it.
    ///
    /// The default context cannot be removed; asking for it returns `None`.
    pub fn remove_context(&mut self, id: ContextId) -> Option<DispatchContext> {
        if id == self.default {
            return None;
        }
        self.contexts.shift_remove(&id)
    }

    /// IDs of every context, default first, then in creation order.
    pub fn context_ids(&self) -> impl Iterator<Item = ContextId> + '_ {
        self.contexts.keys().copied()
    }

    /// Number of contexts, including the default.
    pub fn len(&self) -> usize {
        self.contexts.len()
    }

    /// Always false: the default context cannot be removed.
    pub fn is_empty(&self) -> bool {
        false
    }

    /// The shared handler registry.
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    fn resolve(
        &mut self,
        context: Option<ContextId>,
    ) -> Result<&mut DispatchContext, DispatchError> {
        let id = context.unwrap_or(self.default);
        self.contexts
            .get_mut(&id)
            .ok_or(DispatchError::UnknownContext { context: id })
    }

    /// Submit an action from the orchestrating thread.
    pub fn submit<A: Action>(
        &mut self,
        action: A,
        context: Option<ContextId>,
    ) -> Result<SortKey, DispatchError> {
        Ok(self.resolve(context)?.submit(action))
    }

    /// Submit through a parallel writer.
    ///
    /// Writers are bound to the context they were acquired from.
    pub fn submit_parallel<A: Action>(
        &self,
        writer: &ParallelWriter,
        sort_key: SortKey,
        action: A,
    ) -> Result<(), DispatchError> {
        writer.submit(sort_key, action)
    }

    /// A writer for a context's live multi-writer buffer.
    pub fn acquire_parallel_writer(
        &mut self,
        context: Option<ContextId>,
    ) -> Result<ParallelWriter, DispatchError> {
        Ok(self.resolve(context)?.acquire_parallel_writer())
    }

    /// Make a context's next rotation wait for `handle`.
    pub fn register_completion(
        &mut self,
        handle: impl Into<CompletionHandle>,
        context: Option<ContextId>,
    ) -> Result<(), DispatchError> {
        self.resolve(context)?.register_completion(handle);
        Ok(())
    }

    /// Run one cycle of a context.
    pub fn run_cycle(&mut self, context: Option<ContextId>) -> Result<CycleReport, DispatchError> {
        Ok(self.resolve(context)?.run_cycle())
    }

    /// Run one cycle of every context, in creation order.
    pub fn run_cycle_all(&mut self) -> Vec<(ContextId, CycleReport)> {
        self.contexts
            .iter_mut()
            .map(|(id, ctx)| (*id, ctx.run_cycle()))
            .collect()
    }

    /// Shut every context down, summing what was discarded.
    pub fn shutdown(&mut self) -> ShutdownReport {
        let mut total = ShutdownReport::default();
        for ctx in self.contexts.values_mut() {
            let report = ctx.shutdown();
            total.discarded_actions += report.discarded_actions;
            total.discarded_events += report.discarded_events;
        }
        total
    }
}

impl std::fmt::Debug for Runtime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runtime")
            .field("default", &self.default)
            .field("contexts", &self.contexts.len())
            .finish()
    }
}
