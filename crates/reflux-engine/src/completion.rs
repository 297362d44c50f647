//! Completion handles for parallel producers.
//!
//! A producer that writes through a [`ParallelWriter`](crate::ParallelWriter)
//! registers a [`CompletionHandle`] with the gateway before its writes are
//! in flight. Buffer rotation blocks on the [`CombinedHandle`] of every
//! handle registered since the last rotation, so a writer is never retired
//! while a registered producer may still use it.
//!
//! Handles come from [`completion_pair()`] (resolved when every clone of the
//! paired [`CompletionToken`] is dropped) or from a worker thread's
//! [`JoinHandle`].

use std::fmt;
use std::thread::JoinHandle;

use crossbeam_channel::{Receiver, Sender, TryRecvError};

/// Held by a producer while its parallel work is in flight.
///
/// Dropping the last clone resolves the paired [`CompletionHandle`].
#[derive(Clone)]
pub struct CompletionToken {
    _tx: Sender<()>,
}

impl CompletionToken {
    /// Resolve explicitly. Equivalent to dropping the token.
    pub fn complete(self) {}
}

impl fmt::Debug for CompletionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompletionToken").finish_non_exhaustive()
    }
}

enum Inner {
    Resolved,
    Token(Receiver<()>),
    Thread(JoinHandle<()>),
}

/// A dependency that buffer rotation must wait for.
pub struct CompletionHandle {
    inner: Inner,
}

/// Create a token/handle pair.
///
/// The handle resolves once every clone of the token is dropped.
pub fn completion_pair() -> (CompletionToken, CompletionHandle) {
    let (tx, rx) = crossbeam_channel::bounded(0);
    (
        CompletionToken { _tx: tx },
        CompletionHandle {
            inner: Inner::Token(rx),
        },
    )
}

impl CompletionHandle {
    /// A handle that is already resolved.
    pub fn resolved() -> Self {
        Self {
            inner: Inner::Resolved,
        }
    }

    /// Whether waiting would return immediately.
    pub fn is_resolved(&self) -> bool {
        match &self.inner {
            Inner::Resolved => true,
            Inner::Token(rx) => matches!(rx.try_recv(), Err(TryRecvError::Disconnected)),
            Inner::Thread(handle) => handle.is_finished(),
        }
    }

    /// Block until the handle resolves.
    ///
    /// A worker thread that panicked still counts as resolved: its writes
    /// are over either way. The panic is logged.
    pub fn wait(self) {
        match self.inner {
            Inner::Resolved => {}
            Inner::Token(rx) => while rx.recv().is_ok() {},
            Inner::Thread(handle) => {
                let name = handle.thread().name().map(str::to_string);
                if handle.join().is_err() {
                    tracing::warn!(
                        thread = name.as_deref().unwrap_or("<unnamed>"),
                        "parallel producer panicked before completing"
                    );
                }
            }
        }
    }
}

impl From<JoinHandle<()>> for CompletionHandle {
    fn from(handle: JoinHandle<()>) -> Self {
        Self {
            inner: Inner::Thread(handle),
        }
    }
}

impl fmt::Debug for CompletionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self.inner {
            Inner::Resolved => "resolved",
            Inner::Token(_) => "token",
            Inner::Thread(_) => "thread",
        };
        f.debug_struct("CompletionHandle")
            .field("kind", &kind)
            .finish()
    }
}

/// The set of handles registered since the last rotation.
#[derive(Debug, Default)]
pub struct CombinedHandle {
    handles: Vec<CompletionHandle>,
}

impl CombinedHandle {
    /// An empty ("none") combined handle.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a dependency.
    pub fn combine(&mut self, handle: CompletionHandle) {
        self.handles.push(handle);
    }

    /// Number of registered dependencies.
    pub fn len(&self) -> usize {
        self.handles.len()
    }

    /// Whether no dependency is registered.
    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Whether every registered dependency has resolved.
    pub fn is_resolved(&self) -> bool {
        self.handles.iter().all(CompletionHandle::is_resolved)
    }

    /// Block on every dependency and reset to "none".
    ///
    /// Returns how many handles were waited on.
    pub fn wait_and_reset(&mut self) -> usize {
        let handles = std::mem::take(&mut self.handles);
        let count = handles.len();
        for handle in handles {
            handle.wait();
        }
        count
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn pair_resolves_when_all_tokens_drop() {
        let (token, handle) = completion_pair();
        let clone = token.clone();
        assert!(!handle.is_resolved());
        drop(token);
        assert!(!handle.is_resolved());
        clone.complete();
        assert!(handle.is_resolved());
        handle.wait();
    }

    #[test]
    fn wait_blocks_until_worker_finishes() {
        let (token, handle) = completion_pair();
        let done = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&done);
        let worker = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            flag.store(true, Ordering::SeqCst);
            drop(token);
        });
        handle.wait();
        assert!(done.load(Ordering::SeqCst));
        worker.join().unwrap();
    }

    #[test]
    fn panicked_thread_still_resolves() {
        let worker: JoinHandle<()> = thread::spawn(|| panic!("worker failed"));
        CompletionHandle::from(worker).wait();
    }

    #[test]
    fn combined_handle_resets_after_wait() {
        let mut combined = CombinedHandle::new();
        assert!(combined.is_resolved());
        let (token, handle) = completion_pair();
        combined.combine(handle);
        combined.combine(CompletionHandle::resolved());
        assert_eq!(combined.len(), 2);
        assert!(!combined.is_resolved());
        drop(token);
        assert_eq!(combined.wait_and_reset(), 2);
        assert!(combined.is_empty());
    }
}
