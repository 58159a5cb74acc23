//! Context construction options.

use ds_core::ensure_finite;

use crate::error::{FrameworkError, FrameworkResult};

/// Initial settings applied to a newly created context.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ContextConfig {
    /// Start time in seconds.
    pub initial_time: f64,
    /// Integration accuracy, `None` to leave unspecified.
    pub accuracy: Option<f64>,
    /// Whether cache entries memoize their values.
    pub caching_enabled: bool,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            initial_time: 0.0,
            accuracy: None,
            caching_enabled: true,
        }
    }
}

impl ContextConfig {
    pub fn validate(&self) -> FrameworkResult<()> {
        ensure_finite(self.initial_time, "initial time")?;
        if let Some(accuracy) = self.accuracy {
            ensure_finite(accuracy, "accuracy")?;
            if accuracy <= 0.0 {
                return Err(FrameworkError::InvalidArg {
                    what: "accuracy must be positive",
                });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_is_valid() {
        let config = ContextConfig::default();
        assert!(config.validate().is_ok());
        assert!(config.caching_enabled);
    }

    #[test]
    fn rejects_bad_values() {
        let config = ContextConfig {
            initial_time: f64::NAN,
            ..ContextConfig::default()
        };
        assert!(config.validate().is_err());

        let config = ContextConfig {
            accuracy: Some(0.0),
            ..ContextConfig::default()
        };
        assert!(matches!(config.validate(), Err(FrameworkError::InvalidArg { .. })));
    }
}
