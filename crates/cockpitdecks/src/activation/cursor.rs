use std::time::{Duration, Instant};

use super::{Dispatch, InputEvent, Outcome};
use crate::variables::Value;

/// Continuous position control.
///
/// Moves update the value without emitting anything. The value goes out at an
/// explicit touch start and once more when the gesture ends.
#[derive(Debug)]
pub(crate) struct Cursor {
    min: f64,
    max: f64,
    step: Option<f64>,
    input_range: Option<(f64, f64)>,
    command: Option<String>,
    variable: Option<String>,
    timeout: Duration,
    value: f64,
    /// Last movement of the gesture in progress
    gesture: Option<Instant>,
}

impl Cursor {
    pub(crate) fn new(
        min: f64,
        max: f64,
        step: Option<f64>,
        input_range: Option<(f64, f64)>,
        command: Option<String>,
        variable: Option<String>,
        timeout: Duration,
    ) -> Self {
        Self {
            min,
            max,
            step,
            input_range,
            command,
            variable,
            timeout,
            value: min,
            gesture: None,
        }
    }

    pub(crate) fn value(&self) -> f64 {
        self.value
    }

    pub(crate) fn in_gesture(&self) -> bool {
        self.gesture.is_some()
    }

    pub(crate) fn variable(&self) -> Option<&str> {
        self.variable.as_deref()
    }

    fn map(&self, raw: f64) -> f64 {
        let mut value = match self.input_range {
            Some((low, high)) if high != low => {
                self.min + (raw - low) / (high - low) * (self.max - self.min)
            }
            _ => raw,
        };
        if let Some(step) = self.step.filter(|s| *s > 0.0) {
            value = self.min + ((value - self.min) / step).round() * step;
        }
        value.clamp(self.min, self.max)
    }

    fn emit(&self) -> Vec<Dispatch> {
        if let Some(variable) = &self.variable {
            vec![Dispatch::Write(variable.clone(), Value::Number(self.value))]
        } else if let Some(command) = &self.command {
            vec![Dispatch::CommandWithValue(command.clone(), self.value)]
        } else {
            Vec::new()
        }
    }

    pub(crate) fn handle(&mut self, event: InputEvent, now: Instant) -> Outcome {
        match event {
            InputEvent::Slide(raw) if raw.is_finite() => {
                self.value = self.map(raw);
                self.gesture = Some(now);
                Outcome::handled()
            }
            InputEvent::TouchStart(position) => {
                if let Some(raw) = position.filter(|p| p.is_finite()) {
                    self.value = self.map(raw);
                }
                let started = self.gesture.replace(now).is_none();
                Outcome {
                    dispatches: if started { self.emit() } else { Vec::new() },
                    activated: false,
                    handled: true,
                }
            }
            InputEvent::TouchEnd | InputEvent::Release => self.end(),
            _ => Outcome::ignored(),
        }
    }

    fn end(&mut self) -> Outcome {
        match self.gesture.take() {
            Some(_) => Outcome::activated(self.emit()),
            None => Outcome::ignored(),
        }
    }

    /// Ends a gesture that has been still for longer than the timeout
    pub(crate) fn tick(&mut self, now: Instant) -> Outcome {
        match self.gesture {
            Some(last) if now.duration_since(last) >= self.timeout => self.end(),
            _ => Outcome::handled(),
        }
    }

    pub(crate) fn reconcile(&mut self, current: f64) {
        if self.gesture.is_none() && current.is_finite() {
            self.value = current.clamp(self.min, self.max);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, Instant};

    use crate::activation::{Activation, ActivationConfig, Dispatch, InputEvent};
    use crate::error::ConfigError;

    fn cursor(input_range: Option<(f64, f64)>, step: Option<f64>) -> Activation {
        Activation::from_config(
            "throttle",
            &ActivationConfig::Cursor {
                min: 0.0,
                max: 100.0,
                step,
                input_range,
                variable: None,
                gesture_timeout: None,
            },
            &["sim/throttle".to_string()],
            Duration::from_millis(500),
        )
        .unwrap()
    }

    #[test]
    fn moves_update_value_but_only_gesture_end_emits() {
        let mut activation = cursor(None, None);
        let now = Instant::now();

        for value in [10.0, 30.0, 42.0] {
            assert!(activation.handle(InputEvent::Slide(value), now).is_empty());
        }
        assert_eq!(activation.state().value, Some(42.0));
        assert!(activation.state().pressed);
        assert_eq!(activation.count(), 0);

        assert_eq!(
            activation.handle(InputEvent::TouchEnd, now),
            vec![Dispatch::CommandWithValue("sim/throttle".into(), 42.0)]
        );
        assert_eq!(activation.count(), 1);
        assert!(activation.handle(InputEvent::TouchEnd, now).is_empty());
    }

    #[test]
    fn explicit_touch_start_emits_current_value() {
        let mut activation = cursor(None, None);
        let now = Instant::now();
        assert_eq!(
            activation.handle(InputEvent::TouchStart(Some(20.0)), now),
            vec![Dispatch::CommandWithValue("sim/throttle".into(), 20.0)]
        );
        assert!(activation.handle(InputEvent::Slide(25.0), now).is_empty());
        assert!(activation.handle(InputEvent::TouchStart(None), now).is_empty());
        assert_eq!(activation.handle(InputEvent::Release, now).len(), 1);
    }

    #[test]
    fn gesture_times_out_on_tick() {
        let mut activation = cursor(None, None);
        let start = Instant::now();
        activation.handle(InputEvent::Slide(70.0), start);
        assert!(activation.tick(start + Duration::from_millis(200), None).is_empty());
        assert_eq!(
            activation.tick(start + Duration::from_millis(600), None),
            vec![Dispatch::CommandWithValue("sim/throttle".into(), 70.0)]
        );
        assert!(!activation.state().pressed);
    }

    #[test]
    fn maps_input_range_and_quantizes() {
        let mut activation = cursor(Some((0.0, 1.0)), Some(5.0));
        let now = Instant::now();
        activation.handle(InputEvent::Slide(0.42), now);
        assert_eq!(activation.state().value, Some(40.0));
        activation.handle(InputEvent::Slide(3.0), now);
        assert_eq!(activation.state().value, Some(100.0));
    }

    #[test]
    fn inverted_range_is_rejected() {
        let result = Activation::from_config(
            "bad",
            &ActivationConfig::Cursor {
                min: 10.0,
                max: 0.0,
                step: None,
                input_range: None,
                variable: None,
                gesture_timeout: None,
            },
            &["c".to_string()],
            Duration::from_millis(500),
        );
        assert!(matches!(result, Err(ConfigError::InvalidRange { .. })));
    }
}
