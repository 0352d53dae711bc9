//! The simulator as seen from the cockpit: read a variable, write a variable, fire a command.

use std::{
    collections::{HashMap, HashSet},
    sync::{Mutex, PoisonError},
};

use async_trait::async_trait;
use thiserror::Error;

use crate::activation::Dispatch;
use crate::variables::Value;

/// Failures reported by the simulator collaborator
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SimulatorError {
    /// The simulator refused the request
    #[error("'{command}' rejected: {reason}")]
    Rejected {
        /// Command or variable name
        command: String,
        /// Why
        reason: String,
    },
    /// No answer in time
    #[error("'{command}' timed out")]
    Timeout {
        /// Command or variable name
        command: String,
    },
    /// The simulator cannot be reached at all
    #[error("simulator unavailable: {0}")]
    Unavailable(String),
}

/// Remote simulator calls. All of them are fallible and may take time.
#[async_trait]
pub trait Simulator: Send + Sync + 'static {
    /// Current value of a simulator variable
    async fn read(&self, variable: &str) -> Result<Value, SimulatorError>;

    /// Set a simulator variable
    async fn write(&self, variable: &str, value: Value) -> Result<(), SimulatorError>;

    /// Fire a named command, optionally carrying a value
    async fn invoke(&self, command: &str, value: Option<f64>) -> Result<(), SimulatorError>;
}

/// Send one [`Dispatch`] to the simulator
pub async fn execute(simulator: &dyn Simulator, dispatch: &Dispatch) -> Result<(), SimulatorError> {
    match dispatch {
        Dispatch::Command(command) => simulator.invoke(command, None).await,
        Dispatch::CommandWithValue(command, value) => {
            simulator.invoke(command, Some(*value)).await
        }
        Dispatch::Write(variable, value) => simulator.write(variable, value.clone()).await,
    }
}

/// In-memory simulator that records every request.
///
/// Useful to exercise layouts without a simulator running. Commands listed with
/// [`RecordingSimulator::reject`] fail with [`SimulatorError::Rejected`].
#[derive(Default, Debug)]
pub struct RecordingSimulator {
    dispatched: Mutex<Vec<Dispatch>>,
    values: Mutex<HashMap<String, Value>>,
    rejected: Mutex<HashSet<String>>,
}

impl RecordingSimulator {
    /// Preset the value returned by `read`
    pub fn set_value(&self, variable: &str, value: Value) {
        self.values
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(variable.to_string(), value);
    }

    /// Make `command` fail from now on
    pub fn reject(&self, command: &str) {
        self.rejected
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(command.to_string());
    }

    /// Everything dispatched so far, in order
    pub fn dispatched(&self) -> Vec<Dispatch> {
        self.dispatched
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn check(&self, command: &str) -> Result<(), SimulatorError> {
        if self
            .rejected
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(command)
        {
            return Err(SimulatorError::Rejected {
                command: command.to_string(),
                reason: "rejected by test simulator".to_string(),
            });
        }
        Ok(())
    }

    fn record(&self, dispatch: Dispatch) {
        self.dispatched
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(dispatch);
    }
}

#[async_trait]
impl Simulator for RecordingSimulator {
    async fn read(&self, variable: &str) -> Result<Value, SimulatorError> {
        Ok(self
            .values
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(variable)
            .cloned()
            .unwrap_or_default())
    }

    async fn write(&self, variable: &str, value: Value) -> Result<(), SimulatorError> {
        self.check(variable)?;
        self.set_value(variable, value.clone());
        self.record(Dispatch::Write(variable.to_string(), value));
        Ok(())
    }

    async fn invoke(&self, command: &str, value: Option<f64>) -> Result<(), SimulatorError> {
        self.check(command)?;
        self.record(match value {
            Some(value) => Dispatch::CommandWithValue(command.to_string(), value),
            None => Dispatch::Command(command.to_string()),
        });
        Ok(())
    }
}
