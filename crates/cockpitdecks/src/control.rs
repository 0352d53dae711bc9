//! One control: an activation, a representation and what binds them to the simulator.

use std::{sync::Arc, time::Instant};

use tracing::{debug, warn};

use crate::activation::{Activation, ActivationState, Dispatch, InputEvent};
use crate::config::{ControlConfig, DeckSettings};
use crate::error::{ConfigError, ConfigResult};
use crate::formula::{EvaluationError, Formula, NumberFormat, OperatorTable, evaluate};
use crate::render::{DisplayParams, RenderedFrame, Representation, ResolveContext};
use crate::simulator::SimulatorError;
use crate::variables::{Value, VariableStore};

/// A key, encoder or slider with its input state machine and its face.
///
/// Only the worker of the deck owning the control ever touches it.
#[derive(Debug)]
pub struct Control {
    id: String,
    activation: Activation,
    representation: Representation,
    formula: Option<Formula>,
    format: Option<NumberFormat>,
    variables: Vec<String>,
    key_size: (u32, u32),
    last_frame: Option<Arc<RenderedFrame>>,
    last_error: Option<EvaluationError>,
    last_failure: Option<(Dispatch, SimulatorError)>,
}

impl Control {
    /// Build and validate a control for a deck of the given family
    pub fn from_config(config: &ControlConfig, settings: &DeckSettings) -> ConfigResult<Self> {
        let id = config.id.clone();
        let formula = config
            .formula
            .as_deref()
            .map(|text| {
                Formula::parse(text).map_err(|source| ConfigError::Formula {
                    control: id.clone(),
                    source,
                })
            })
            .transpose()?;
        let format = match config.format.as_deref() {
            Some(spec) => Some(NumberFormat::parse(spec).ok_or_else(|| ConfigError::Invalid {
                control: id.clone(),
                reason: format!("bad number format {spec}"),
            })?),
            None => None,
        };
        let activation = Activation::from_config(
            &id,
            &config.activation,
            &config.commands,
            settings.gesture_timeout,
        )?;
        let representation = Representation::from_config(&id, &config.representation)?;

        let mut variables: Vec<String> = Vec::new();
        let formula_variables = formula
            .iter()
            .flat_map(|f| f.variables())
            .map(str::to_string);
        let candidates = formula_variables
            .chain(representation.variables())
            .chain(activation.variable().map(str::to_string))
            .chain(config.variables.iter().cloned());
        for name in candidates {
            if !variables.contains(&name) {
                variables.push(name);
            }
        }

        debug!(
            "Control {} ({} activation) bound to {:?}",
            id,
            activation.name(),
            variables
        );
        Ok(Self {
            id,
            activation,
            representation,
            formula,
            format,
            variables,
            key_size: settings.key_size,
            last_frame: None,
            last_error: None,
            last_failure: None,
        })
    }

    /// Key the control sits on
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Pixel size of the key
    pub fn key_size(&self) -> (u32, u32) {
        self.key_size
    }

    /// Variables whose changes may change the face or the activation
    pub fn bound_variables(&self) -> &[String] {
        &self.variables
    }

    /// Feed one input event
    pub fn handle(&mut self, event: InputEvent, now: Instant) -> Vec<Dispatch> {
        self.activation.handle(event, now)
    }

    /// Timer work: activation timers and chart sampling
    pub fn tick(&mut self, now: Instant, store: &VariableStore, operators: &OperatorTable) -> Vec<Dispatch> {
        let driver = self.formula.as_ref().map(|formula| {
            evaluate(formula, store, operators)
                .ok()
                .and_then(|value| value.as_number())
                .unwrap_or(0.0)
        });
        self.representation.tick(now, store, operators);
        self.activation.tick(now, driver)
    }

    /// Display parameters for the current state
    pub fn resolve(
        &mut self,
        store: &VariableStore,
        operators: &OperatorTable,
    ) -> Result<DisplayParams, EvaluationError> {
        let value = match &self.formula {
            Some(formula) => match evaluate(formula, store, operators) {
                Ok(value) => Some(value),
                Err(err) => return Err(self.note_error(err)),
            },
            None => None,
        };
        let state = self.activation.state();
        let resolved = self.representation.resolve(&ResolveContext {
            store,
            operators,
            formula_value: value.as_ref(),
            format: self.format.as_ref(),
            state: &state,
            key_size: self.key_size,
        });
        match resolved {
            Ok(params) => {
                if self.last_error.take().is_some() {
                    debug!("{} resolves again", self.id);
                }
                Ok(params)
            }
            Err(err) => Err(self.note_error(err)),
        }
    }

    /// Log each distinct resolution failure once
    fn note_error(&mut self, err: EvaluationError) -> EvaluationError {
        if self.last_error.as_ref() != Some(&err) {
            warn!("{} cannot be resolved: {}", self.id, err);
            self.last_error = Some(err.clone());
        }
        err
    }

    /// Keep the last good frame
    pub fn remember_frame(&mut self, frame: Arc<RenderedFrame>) {
        self.last_frame = Some(frame);
    }

    /// Last good frame
    pub fn last_frame(&self) -> Option<&Arc<RenderedFrame>> {
        self.last_frame.as_ref()
    }

    /// The simulator refused or missed a dispatch. The state is kept as is.
    pub fn dispatch_failed(&mut self, dispatch: Dispatch, error: SimulatorError) {
        warn!("{}: {:?} failed: {}", self.id, dispatch, error);
        self.last_failure = Some((dispatch, error));
    }

    /// Last dispatch the simulator did not accept
    pub fn last_failure(&self) -> Option<&(Dispatch, SimulatorError)> {
        self.last_failure.as_ref()
    }

    /// A bound variable changed
    pub fn variable_changed(&mut self, name: &str, value: &Value) {
        if self.activation.variable() == Some(name) {
            self.activation.reconcile(value);
        }
    }

    /// Activation snapshot
    pub fn state(&self) -> ActivationState {
        self.activation.state()
    }

    /// Logical activations so far
    pub fn activation_count(&self) -> u64 {
        self.activation.count()
    }
}
