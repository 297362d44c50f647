//! Engine configuration, validation, and error types.
//!
//! [`EngineConfig`] tunes a dispatch context. [`validate()`](EngineConfig::validate)
//! checks structural invariants at startup; [`DispatchContext::new`](crate::DispatchContext::new)
//! calls it before allocating buffers.

use std::error::Error;
use std::fmt;
use std::time::Duration;

use reflux_pipeline::RegistryError;

// ── ConfigError ────────────────────────────────────────────────────

/// Errors detected during [`EngineConfig::validate()`] or context setup.
#[derive(Debug, PartialEq)]
pub enum ConfigError {
    /// Handler registry validation failed.
    Registry(RegistryError),
    /// The notification budget is zero; nothing would ever be delivered.
    ZeroNotificationBudget,
    /// `max_middleware_passes` is zero; no action would ever be processed.
    ZeroMiddlewarePasses,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Registry(e) => write!(f, "registry: {e}"),
            Self::ZeroNotificationBudget => {
                write!(f, "notification_budget must be greater than zero")
            }
            Self::ZeroMiddlewarePasses => {
                write!(f, "max_middleware_passes must be at least 1")
            }
        }
    }
}

impl Error for ConfigError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Registry(e) => Some(e),
            _ => None,
        }
    }
}

impl From<RegistryError> for ConfigError {
    fn from(e: RegistryError) -> Self {
        Self::Registry(e)
    }
}

// ── EngineConfig ───────────────────────────────────────────────────

/// Tuning parameters for a [`DispatchContext`](crate::DispatchContext).
#[derive(Clone, Debug)]
pub struct EngineConfig {
    /// Wall-clock allowance for notification delivery per cycle. Default: 500µs.
    pub notification_budget: Duration,
    /// Maximum middleware passes per cycle. Default: 8.
    ///
    /// Actions emitted into the current cycle are processed in a later
    /// pass. Records still pending after the last pass are carried to the
    /// next cycle under the same identity.
    pub max_middleware_passes: u32,
    /// Initial capacity of the action buffers. Default: 256.
    pub initial_buffer_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            notification_budget: Duration::from_micros(500),
            max_middleware_passes: 8,
            initial_buffer_capacity: 256,
        }
    }
}

impl EngineConfig {
    /// Check structural invariants.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.notification_budget.is_zero() {
            return Err(ConfigError::ZeroNotificationBudget);
        }
        if self.max_middleware_passes == 0 {
            return Err(ConfigError::ZeroMiddlewarePasses);
        }
        Ok(())
    }

    /// Replace the notification budget.
    pub fn with_notification_budget(mut self, budget: Duration) -> Self {
        self.notification_budget = budget;
        self
    }

    /// Replace the middleware pass limit.
    pub fn with_max_middleware_passes(mut self, passes: u32) -> Self {
        self.max_middleware_passes = passes;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = EngineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.notification_budget, Duration::from_micros(500));
        assert_eq!(config.max_middleware_passes, 8);
    }

    #[test]
    fn zero_budget_rejected() {
        let config = EngineConfig::default().with_notification_budget(Duration::ZERO);
        assert_eq!(config.validate(), Err(ConfigError::ZeroNotificationBudget));
    }

    #[test]
    fn zero_passes_rejected() {
        let config = EngineConfig::default().with_max_middleware_passes(0);
        assert_eq!(config.validate(), Err(ConfigError::ZeroMiddlewarePasses));
    }
}
