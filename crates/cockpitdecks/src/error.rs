//! Configuration errors.

use thiserror::Error;

use crate::formula::EvaluationError;

/// Problems found while turning a layout into controls.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A stepped control with no position
    #[error("control {control}: stops must be at least 1")]
    InvalidStops {
        /// Control id
        control: String,
    },
    /// Fewer commands than the activation needs
    #[error("control {control}: {activation} needs {expected} commands, found {found}")]
    MissingCommands {
        /// Control id
        control: String,
        /// Activation type name
        activation: &'static str,
        /// Commands needed
        expected: usize,
        /// Commands configured
        found: usize,
    },
    /// `min` not below `max`
    #[error("control {control}: min must be below max")]
    InvalidRange {
        /// Control id
        control: String,
    },
    /// A formula that does not parse
    #[error("control {control}: bad formula")]
    Formula {
        /// Control id
        control: String,
        /// Parse failure
        #[source]
        source: EvaluationError,
    },
    /// Two controls with the same id in one layout
    #[error("duplicate control {0}")]
    DuplicateControl(String),
    /// Any other inconsistency
    #[error("control {control}: {reason}")]
    Invalid {
        /// Control id
        control: String,
        /// What is wrong
        reason: String,
    },
}

/// Layout validation result
pub type ConfigResult<T> = Result<T, ConfigError>;
