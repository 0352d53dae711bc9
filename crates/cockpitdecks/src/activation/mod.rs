//! Per-control input state machines.
//!
//! An [`Activation`] turns input events (and timer ticks) into [`Dispatch`]es
//! for the simulator. The variants form a closed set; [`Activation::handle`] and
//! [`Activation::tick`] switch over them once, and each variant owns its
//! transition rules.
//!
//! Every variant feeds one shared counter, [`ActivationState::count`], bumped on
//! each logical activation, so representations can blink or alternate on parity
//! without knowing how the control got there.

use std::time::{Duration, Instant};

use cockpitdecks_common::{DeviceEvent, EventData};
use tracing::{debug, trace};

mod animate;
mod config;
mod cursor;
mod encoder;
mod guard;
mod push;
mod stepped;

pub use config::{ActivationConfig, AutoRepeatConfig, EncoderPushMode, LongPressConfig};

use animate::{Animate, Swipe};
use cursor::Cursor;
use encoder::{Encoder, EncoderValue};
use guard::Guarded;
use push::{BeginEnd, OnOff, Push};
use stepped::Stepped;

use crate::error::ConfigError;
use crate::variables::Value;

/// Input as seen by activations.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum InputEvent {
    /// Key or button down
    Press,
    /// Key or button up
    Release,
    /// Encoder detent, clockwise
    Clockwise,
    /// Encoder detent, counter-clockwise
    CounterClockwise,
    /// Encoder pulled, or the dedicated guard input
    Pull,
    /// Slider or cursor moved to a raw position
    Slide(f64),
    /// Finger down on a touch surface, with the position when known
    TouchStart(Option<f64>),
    /// Finger up
    TouchEnd,
    /// Swipe on a touch strip
    Swipe,
    /// Tap on a touch strip
    Tap,
}

impl InputEvent {
    /// Translate a wire event; `None` for codes activations do not consume
    pub fn from_device(event: DeviceEvent, data: &EventData) -> Option<Self> {
        Some(match event {
            DeviceEvent::Release => InputEvent::Release,
            DeviceEvent::Press => InputEvent::Press,
            DeviceEvent::Clockwise => InputEvent::Clockwise,
            DeviceEvent::CounterClockwise => InputEvent::CounterClockwise,
            DeviceEvent::Pull => InputEvent::Pull,
            DeviceEvent::Slide => InputEvent::Slide(data.value?),
            DeviceEvent::TouchStart => InputEvent::TouchStart(data.value),
            DeviceEvent::TouchEnd => InputEvent::TouchEnd,
            DeviceEvent::Swipe => InputEvent::Swipe,
            DeviceEvent::Tap => InputEvent::Tap,
            DeviceEvent::Other(_) => return None,
        })
    }
}

/// A request for the simulator produced by an activation.
#[derive(Clone, Debug, PartialEq)]
pub enum Dispatch {
    /// Fire a command
    Command(String),
    /// Fire a command carrying a value
    CommandWithValue(String, f64),
    /// Set a variable
    Write(String, Value),
}

/// Result of one transition
#[derive(Debug, Default)]
pub(crate) struct Outcome {
    pub(crate) dispatches: Vec<Dispatch>,
    /// Counts as a logical activation
    pub(crate) activated: bool,
    /// False when the event means nothing in the current state
    pub(crate) handled: bool,
}

impl Outcome {
    pub(crate) fn ignored() -> Self {
        Self::default()
    }

    pub(crate) fn handled() -> Self {
        Self {
            handled: true,
            ..Default::default()
        }
    }

    pub(crate) fn activated(dispatches: Vec<Dispatch>) -> Self {
        Self {
            dispatches,
            activated: true,
            handled: true,
        }
    }
}

/// Snapshot of an activation, the input of representations.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ActivationState {
    /// Logical activations so far
    pub count: u64,
    /// A press is in progress
    pub pressed: bool,
    /// On/off state for toggling variants
    pub on: Option<bool>,
    /// Current step of stepped variants
    pub step: Option<usize>,
    /// Current value of value-producing variants
    pub value: Option<f64>,
    /// Guard state of guarded controls
    pub guard_open: Option<bool>,
    /// Animation frame
    pub frame: Option<usize>,
    /// Animation running
    pub running: bool,
    /// Encoder push sub-state
    pub pushed: Option<bool>,
    /// Net encoder turns, clockwise positive
    pub turns: Option<i64>,
}

#[derive(Debug)]
pub(crate) enum ActivationKind {
    None,
    Push(Push),
    BeginEnd(BeginEnd),
    OnOff(OnOff),
    Stepped(Stepped),
    Encoder(Encoder),
    EncoderValue(EncoderValue),
    Cursor(Cursor),
    Guarded(Guarded),
    Animate(Animate),
    Swipe(Swipe),
}

fn require_commands(
    control: &str,
    activation: &'static str,
    commands: &[String],
    expected: usize,
) -> Result<(), ConfigError> {
    if commands.len() < expected {
        return Err(ConfigError::MissingCommands {
            control: control.to_string(),
            activation,
            expected,
            found: commands.len(),
        });
    }
    Ok(())
}

fn check_range(control: &str, min: f64, max: f64) -> Result<(), ConfigError> {
    if !(min < max) {
        return Err(ConfigError::InvalidRange {
            control: control.to_string(),
        });
    }
    Ok(())
}

impl ActivationKind {
    fn from_config(
        control: &str,
        config: &ActivationConfig,
        commands: &[String],
        gesture_timeout: Duration,
    ) -> Result<Self, ConfigError> {
        Ok(match config {
            ActivationConfig::None => ActivationKind::None,
            ActivationConfig::Push {
                long_press,
                auto_repeat,
            } => {
                let expected = if long_press.is_some() { 2 } else { 1 };
                require_commands(control, "push", commands, expected)?;
                ActivationKind::Push(Push::new(
                    commands,
                    long_press.as_ref().map(|l| l.threshold),
                    auto_repeat.clone(),
                ))
            }
            ActivationConfig::BeginEndCommand => {
                require_commands(control, "begin-end-command", commands, 2)?;
                ActivationKind::BeginEnd(BeginEnd::new(&commands[0], &commands[1]))
            }
            ActivationConfig::Onoff { initial_on } => {
                require_commands(control, "onoff", commands, 2)?;
                ActivationKind::OnOff(OnOff::new(&commands[0], &commands[1], *initial_on))
            }
            ActivationConfig::Updown {
                stops,
                cycle,
                initial,
                variable,
            } => {
                if *stops == 0 {
                    return Err(ConfigError::InvalidStops {
                        control: control.to_string(),
                    });
                }
                if variable.is_none() {
                    require_commands(control, "updown", commands, 1)?;
                }
                ActivationKind::Stepped(Stepped::new(
                    *stops,
                    *cycle,
                    (*initial).min(stops - 1),
                    commands.to_vec(),
                    variable.clone(),
                ))
            }
            ActivationConfig::Encoder { push } => {
                let expected = match push {
                    EncoderPushMode::None => 2,
                    EncoderPushMode::Command => 3,
                    EncoderPushMode::Toggle => 4,
                };
                require_commands(control, "encoder", commands, expected)?;
                ActivationKind::Encoder(Encoder::new(commands, *push))
            }
            ActivationConfig::EncoderValue {
                variable,
                step,
                step_xl,
                min,
                max,
                initial,
            } => {
                check_range(control, *min, *max)?;
                ActivationKind::EncoderValue(EncoderValue::new(
                    variable,
                    *step,
                    *step_xl,
                    *min,
                    *max,
                    initial.unwrap_or(*min),
                ))
            }
            ActivationConfig::Cursor {
                min,
                max,
                step,
                input_range,
                variable,
                gesture_timeout: timeout,
            } => {
                check_range(control, *min, *max)?;
                if variable.is_none() {
                    require_commands(control, "cursor", commands, 1)?;
                }
                ActivationKind::Cursor(Cursor::new(
                    *min,
                    *max,
                    *step,
                    *input_range,
                    commands.first().cloned(),
                    variable.clone(),
                    timeout.unwrap_or(gesture_timeout),
                ))
            }
            ActivationConfig::Guarded { inner, hold } => {
                let inner = ActivationKind::from_config(control, inner, commands, gesture_timeout)?;
                ActivationKind::Guarded(Guarded::new(inner, *hold))
            }
            ActivationConfig::Animate { speed, frames } => {
                ActivationKind::Animate(Animate::new(*speed, (*frames).max(1)))
            }
            ActivationConfig::Swipe => ActivationKind::Swipe(Swipe),
        })
    }

    fn name(&self) -> &'static str {
        match self {
            ActivationKind::None => "none",
            ActivationKind::Push(_) => "push",
            ActivationKind::BeginEnd(_) => "begin-end-command",
            ActivationKind::OnOff(_) => "onoff",
            ActivationKind::Stepped(_) => "updown",
            ActivationKind::Encoder(_) => "encoder",
            ActivationKind::EncoderValue(_) => "encoder-value",
            ActivationKind::Cursor(_) => "cursor",
            ActivationKind::Guarded(_) => "guarded",
            ActivationKind::Animate(_) => "animate",
            ActivationKind::Swipe(_) => "swipe",
        }
    }

    pub(crate) fn handle(&mut self, event: InputEvent, now: Instant) -> Outcome {
        match self {
            ActivationKind::None => Outcome::ignored(),
            ActivationKind::Push(push) => push.handle(event, now),
            ActivationKind::BeginEnd(begin_end) => begin_end.handle(event),
            ActivationKind::OnOff(onoff) => onoff.handle(event),
            ActivationKind::Stepped(stepped) => stepped.handle(event),
            ActivationKind::Encoder(encoder) => encoder.handle(event),
            ActivationKind::EncoderValue(value) => value.handle(event),
            ActivationKind::Cursor(cursor) => cursor.handle(event, now),
            ActivationKind::Guarded(guarded) => guarded.handle(event, now),
            ActivationKind::Animate(animate) => animate.handle(event),
            ActivationKind::Swipe(swipe) => swipe.handle(event),
        }
    }

    pub(crate) fn tick(&mut self, now: Instant, driver: Option<f64>) -> Outcome {
        match self {
            ActivationKind::Push(push) => push.tick(now),
            ActivationKind::Cursor(cursor) => cursor.tick(now),
            ActivationKind::Guarded(guarded) => guarded.tick(now, driver),
            ActivationKind::Animate(animate) => animate.tick(now, driver),
            _ => Outcome::handled(),
        }
    }

    fn reconcile(&mut self, current: f64) {
        match self {
            ActivationKind::EncoderValue(value) => value.reconcile(current),
            ActivationKind::Cursor(cursor) => cursor.reconcile(current),
            ActivationKind::Stepped(stepped) => stepped.reconcile(current),
            ActivationKind::Guarded(guarded) => guarded.inner_mut().reconcile(current),
            _ => {}
        }
    }

    fn variable(&self) -> Option<&str> {
        match self {
            ActivationKind::EncoderValue(value) => Some(value.variable()),
            ActivationKind::Cursor(cursor) => cursor.variable(),
            ActivationKind::Stepped(stepped) => stepped.variable(),
            ActivationKind::Guarded(guarded) => guarded.inner().variable(),
            _ => None,
        }
    }

    pub(crate) fn fill_state(&self, state: &mut ActivationState) {
        match self {
            ActivationKind::None => {}
            ActivationKind::Push(push) => state.pressed = push.is_pressed(),
            ActivationKind::BeginEnd(begin_end) => state.pressed = begin_end.is_pressed(),
            ActivationKind::OnOff(onoff) => state.on = Some(onoff.is_on()),
            ActivationKind::Stepped(stepped) => state.step = Some(stepped.step()),
            ActivationKind::Encoder(encoder) => {
                state.turns = Some(encoder.turns());
                state.pushed = encoder.pushed();
            }
            ActivationKind::EncoderValue(value) => state.value = Some(value.value()),
            ActivationKind::Cursor(cursor) => {
                state.value = Some(cursor.value());
                state.pressed = cursor.in_gesture();
            }
            ActivationKind::Guarded(guarded) => {
                guarded.inner().fill_state(state);
                state.guard_open = Some(guarded.is_open());
            }
            ActivationKind::Animate(animate) => {
                state.frame = Some(animate.frame());
                state.running = animate.is_running();
            }
            ActivationKind::Swipe(_) => {}
        }
    }
}

/// The input state machine of one control.
#[derive(Debug)]
pub struct Activation {
    kind: ActivationKind,
    count: u64,
}

impl Activation {
    /// Build from configuration, checking that enough commands are provided.
    ///
    /// `gesture_timeout` is the deck default for cursors that do not set their own.
    pub fn from_config(
        control: &str,
        config: &ActivationConfig,
        commands: &[String],
        gesture_timeout: Duration,
    ) -> Result<Self, ConfigError> {
        Ok(Self {
            kind: ActivationKind::from_config(control, config, commands, gesture_timeout)?,
            count: 0,
        })
    }

    /// Configuration name of the variant
    pub fn name(&self) -> &'static str {
        self.kind.name()
    }

    /// Feed one input event; returns what to send to the simulator.
    ///
    /// Events that mean nothing in the current state are dropped.
    pub fn handle(&mut self, event: InputEvent, now: Instant) -> Vec<Dispatch> {
        let outcome = self.kind.handle(event, now);
        self.settle(outcome, Some(event))
    }

    /// Advance timers (long press, auto repeat, gesture end, guard hold, animation).
    ///
    /// `driver` is the control's formula result, used by animations.
    pub fn tick(&mut self, now: Instant, driver: Option<f64>) -> Vec<Dispatch> {
        let outcome = self.kind.tick(now, driver);
        self.settle(outcome, None)
    }

    fn settle(&mut self, outcome: Outcome, event: Option<InputEvent>) -> Vec<Dispatch> {
        if !outcome.handled
            && let Some(event) = event
        {
            debug!("{:?} ignored by {} activation", event, self.kind.name());
        }
        if outcome.activated {
            self.count += 1;
            trace!("{} activation #{}", self.kind.name(), self.count);
        }
        outcome.dispatches
    }

    /// Adopt the value the simulator reports for the variable this activation drives
    pub fn reconcile(&mut self, current: &Value) {
        if let Some(current) = current.as_number() {
            self.kind.reconcile(current);
        }
    }

    /// Variable this activation writes, if any
    pub fn variable(&self) -> Option<&str> {
        self.kind.variable()
    }

    /// Logical activations so far
    pub fn count(&self) -> u64 {
        self.count
    }

    /// Snapshot for rendering
    pub fn state(&self) -> ActivationState {
        let mut state = ActivationState {
            count: self.count,
            ..Default::default()
        };
        self.kind.fill_state(&mut state);
        state
    }
}
