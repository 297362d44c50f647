//! Error types for the Reflux action pipeline.
//!
//! Organized by subsystem: handler execution (middleware and reducers),
//! dispatch (action submission), and the state store boundary.

use std::any::Any;
use std::error::Error;
use std::fmt;

use crate::id::{ContextId, GenerationId};

/// Errors raised by a middleware or reducer for a single action record.
///
/// Never escapes the cycle: the engine logs the error and demotes it to
/// an implicit veto (middleware) or a no-op (reducer).
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum HandlerError {
    /// The handler could not complete for this record.
    ExecutionFailed {
        /// Human-readable description of the failure.
        reason: String,
    },
    /// A state singleton the handler needs does not exist yet.
    ///
    /// Common during startup ordering races; logged at low severity.
    MissingContext {
        /// Name of the missing state type.
        state: &'static str,
    },
    /// The handler read a state type it did not declare.
    UndeclaredRead {
        /// Name of the handler.
        handler: String,
        /// Name of the state type that was read.
        state: &'static str,
    },
    /// The handler panicked; the panic was caught at the chain level.
    Panicked {
        /// The panic payload, if it was a string.
        message: String,
    },
    /// The record payload did not have the type the handler was registered for.
    TypeMismatch {
        /// Name of the expected payload type.
        expected: &'static str,
    },
}

impl HandlerError {
    /// Shorthand for [`HandlerError::ExecutionFailed`].
    pub fn failed(reason: impl Into<String>) -> Self {
        Self::ExecutionFailed {
            reason: reason.into(),
        }
    }

    /// Convert a payload caught by `catch_unwind` into [`HandlerError::Panicked`].
    pub fn from_panic(payload: Box<dyn Any + Send>) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "non-string panic payload".to_string()
        };
        Self::Panicked { message }
    }

    /// Whether this is a [`HandlerError::MissingContext`].
    pub fn is_missing_context(&self) -> bool {
        matches!(self, Self::MissingContext { .. })
    }
}

impl fmt::Display for HandlerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ExecutionFailed { reason } => write!(f, "execution failed: {reason}"),
            Self::MissingContext { state } => write!(f, "state '{state}' does not exist"),
            Self::UndeclaredRead { handler, state } => {
                write!(f, "handler '{handler}' read undeclared state '{state}'")
            }
            Self::Panicked { message } => write!(f, "handler panicked: {message}"),
            Self::TypeMismatch { expected } => {
                write!(f, "payload is not of type '{expected}'")
            }
        }
    }
}

impl Error for HandlerError {}

/// Errors from the dispatch gateway.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DispatchError {
    /// A producer submitted through a writer that was rotated away.
    ///
    /// A programmer error: the producer did not register a completion
    /// handle covering the write. The action is dropped.
    StaleWriter {
        /// Generation of the writer used.
        writer: GenerationId,
        /// Generation of the live buffer at the time of the write, if known.
        current: Option<GenerationId>,
    },
    /// No dispatch context with the given ID exists.
    UnknownContext {
        /// The requested context.
        context: ContextId,
    },
}

impl fmt::Display for DispatchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::StaleWriter { writer, current } => {
                write!(f, "parallel writer generation {writer} is stale")?;
                if let Some(current) = current {
                    write!(f, " (live generation {current})")?;
                }
                Ok(())
            }
            Self::UnknownContext { context } => write!(f, "unknown dispatch context {context}"),
        }
    }
}

impl Error for DispatchError {}

/// Errors from the state store boundary.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StoreError {
    /// `create_singleton` was called twice for the same type.
    AlreadyExists {
        /// Name of the state type.
        state: &'static str,
    },
    /// `set_singleton` was called before `create_singleton`.
    Missing {
        /// Name of the state type.
        state: &'static str,
    },
    /// The stored value does not have the requested type.
    TypeMismatch {
        /// Name of the state type.
        state: &'static str,
    },
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AlreadyExists { state } => write!(f, "singleton '{state}' already exists"),
            Self::Missing { state } => write!(f, "singleton '{state}' has not been created"),
            Self::TypeMismatch { state } => {
                write!(f, "stored value for '{state}' has the wrong type")
            }
        }
    }
}

impl Error for StoreError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stale_writer_display_includes_generations() {
        let err = DispatchError::StaleWriter {
            writer: GenerationId(3),
            current: Some(GenerationId(5)),
        };
        let msg = format!("{err}");
        assert!(msg.contains("generation 3"));
        assert!(msg.contains("live generation 5"));
    }

    #[test]
    fn missing_context_is_classified() {
        let err = HandlerError::MissingContext { state: "Health" };
        assert!(err.is_missing_context());
        assert!(!HandlerError::failed("boom").is_missing_context());
        assert_eq!(format!("{err}"), "state 'Health' does not exist");
    }

    #[test]
    fn panic_payloads_become_messages() {
        let caught = std::panic::catch_unwind(|| panic!("reducer {} blew up", 7)).unwrap_err();
        assert_eq!(
            HandlerError::from_panic(caught),
            HandlerError::Panicked {
                message: "reducer 7 blew up".to_string()
            }
        );
        let caught = std::panic::catch_unwind(|| std::panic::panic_any(42u8)).unwrap_err();
        assert!(matches!(
            HandlerError::from_panic(caught),
            HandlerError::Panicked { .. }
        ));
    }
}
