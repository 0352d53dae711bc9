use super::{Dispatch, InputEvent, Outcome};
use crate::variables::Value;

/// Multi-position switch
#[derive(Debug)]
pub(crate) struct Stepped {
    stops: usize,
    cycle: bool,
    step: usize,
    commands: Vec<String>,
    variable: Option<String>,
}

impl Stepped {
    pub(crate) fn new(
        stops: usize,
        cycle: bool,
        initial: usize,
        commands: Vec<String>,
        variable: Option<String>,
    ) -> Self {
        Self {
            stops,
            cycle,
            step: initial,
            commands,
            variable,
        }
    }

    pub(crate) fn step(&self) -> usize {
        self.step
    }

    pub(crate) fn variable(&self) -> Option<&str> {
        self.variable.as_deref()
    }

    pub(crate) fn handle(&mut self, event: InputEvent) -> Outcome {
        match event {
            InputEvent::Press | InputEvent::Clockwise => self.move_by(true),
            InputEvent::CounterClockwise | InputEvent::Pull => self.move_by(false),
            InputEvent::Release => Outcome::handled(),
            _ => Outcome::ignored(),
        }
    }

    fn move_by(&mut self, forward: bool) -> Outcome {
        let last = self.stops - 1;
        let next = match (forward, self.step) {
            (true, step) if step < last => step + 1,
            (true, _) if self.cycle => 0,
            (false, step) if step > 0 => step - 1,
            (false, _) if self.cycle => last,
            // saturated
            _ => return Outcome::handled(),
        };
        self.step = next;

        let mut dispatches = Vec::with_capacity(2);
        match self.commands.len() {
            n if n == self.stops => dispatches.push(Dispatch::Command(self.commands[next].clone())),
            2 => {
                let index = if forward { 0 } else { 1 };
                dispatches.push(Dispatch::Command(self.commands[index].clone()));
            }
            1 => dispatches.push(Dispatch::CommandWithValue(
                self.commands[0].clone(),
                next as f64,
            )),
            _ => {}
        }
        if let Some(variable) = &self.variable {
            dispatches.push(Dispatch::Write(variable.clone(), Value::Number(next as f64)));
        }
        Outcome::activated(dispatches)
    }

    pub(crate) fn reconcile(&mut self, current: f64) {
        if current.is_finite() {
            self.step = (current.round().max(0.0) as usize).min(self.stops - 1);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, Instant};

    use proptest::prelude::*;

    use crate::activation::{Activation, ActivationConfig, Dispatch, InputEvent};
    use crate::error::ConfigError;
    use crate::variables::Value;

    fn stepped(stops: usize, cycle: bool, commands: &[&str]) -> Activation {
        let commands: Vec<String> = commands.iter().map(|c| c.to_string()).collect();
        Activation::from_config(
            "switch",
            &ActivationConfig::Updown {
                stops,
                cycle,
                initial: 0,
                variable: None,
            },
            &commands,
            Duration::from_millis(500),
        )
        .unwrap()
    }

    fn advance_sequence(activation: &mut Activation, presses: usize) -> Vec<usize> {
        let now = Instant::now();
        let mut seen = vec![activation.state().step.unwrap()];
        for _ in 0..presses {
            activation.handle(InputEvent::Press, now);
            activation.handle(InputEvent::Release, now);
            seen.push(activation.state().step.unwrap());
        }
        seen
    }

    #[test]
    fn saturates_without_cycle() {
        let mut activation = stepped(3, false, &["pos0", "pos1", "pos2"]);
        assert_eq!(advance_sequence(&mut activation, 5), vec![0, 1, 2, 2, 2, 2]);
        // only the two real moves count
        assert_eq!(activation.count(), 2);
    }

    #[test]
    fn wraps_with_cycle() {
        let mut activation = stepped(3, true, &["pos0", "pos1", "pos2"]);
        assert_eq!(advance_sequence(&mut activation, 6), vec![0, 1, 2, 0, 1, 2, 0]);
    }

    #[test]
    fn emits_command_at_step() {
        let mut activation = stepped(3, false, &["pos0", "pos1", "pos2"]);
        let now = Instant::now();
        assert_eq!(
            activation.handle(InputEvent::Clockwise, now),
            vec![Dispatch::Command("pos1".into())]
        );
        assert_eq!(
            activation.handle(InputEvent::CounterClockwise, now),
            vec![Dispatch::Command("pos0".into())]
        );
        assert!(activation.handle(InputEvent::CounterClockwise, now).is_empty());
    }

    #[test]
    fn up_down_command_pair() {
        let mut activation = stepped(5, false, &["flaps/down", "flaps/up"]);
        let now = Instant::now();
        assert_eq!(
            activation.handle(InputEvent::Press, now),
            vec![Dispatch::Command("flaps/down".into())]
        );
        assert_eq!(
            activation.handle(InputEvent::Pull, now),
            vec![Dispatch::Command("flaps/up".into())]
        );
    }

    #[test]
    fn writes_variable_and_reconciles() {
        let mut activation = Activation::from_config(
            "mode",
            &ActivationConfig::Updown {
                stops: 4,
                cycle: false,
                initial: 1,
                variable: Some("data:mode".into()),
            },
            &[],
            Duration::from_millis(500),
        )
        .unwrap();
        assert_eq!(activation.variable(), Some("data:mode"));
        assert_eq!(
            activation.handle(InputEvent::Press, Instant::now()),
            vec![Dispatch::Write("data:mode".into(), Value::Number(2.0))]
        );

        activation.reconcile(&Value::Number(9.0));
        assert_eq!(activation.state().step, Some(3));
    }

    #[test]
    fn zero_stops_is_rejected() {
        let result = Activation::from_config(
            "bad",
            &ActivationConfig::Updown {
                stops: 0,
                cycle: false,
                initial: 0,
                variable: None,
            },
            &["a".to_string()],
            Duration::from_millis(500),
        );
        assert!(matches!(result, Err(ConfigError::InvalidStops { .. })));
    }

    proptest! {
        #[test]
        fn step_stays_in_range(stops in 1usize..8, cycle in any::<bool>(), moves in prop::collection::vec(any::<bool>(), 0..40)) {
            let commands: Vec<String> = (0..stops).map(|i| format!("pos{i}")).collect();
            let mut activation = Activation::from_config(
                "switch",
                &ActivationConfig::Updown { stops, cycle, initial: 0, variable: None },
                &commands,
                Duration::from_millis(500),
            ).unwrap();
            let now = Instant::now();
            for forward in moves {
                let event = if forward { InputEvent::Clockwise } else { InputEvent::CounterClockwise };
                activation.handle(event, now);
                prop_assert!(activation.state().step.unwrap() < stops);
            }
        }
    }
}
