use super::{Dispatch, EncoderPushMode, InputEvent, Outcome};
use crate::variables::Value;

/// Rotary encoder firing turn commands
#[derive(Debug)]
pub(crate) struct Encoder {
    commands: Vec<String>,
    push: EncoderPushMode,
    pushed: bool,
    turns: i64,
}

impl Encoder {
    pub(crate) fn new(commands: &[String], push: EncoderPushMode) -> Self {
        Self {
            commands: commands.to_vec(),
            push,
            pushed: false,
            turns: 0,
        }
    }

    pub(crate) fn turns(&self) -> i64 {
        self.turns
    }

    pub(crate) fn pushed(&self) -> Option<bool> {
        (self.push == EncoderPushMode::Toggle).then_some(self.pushed)
    }

    fn command(&self, index: usize) -> Vec<Dispatch> {
        self.commands
            .get(index)
            .map(|c| Dispatch::Command(c.clone()))
            .into_iter()
            .collect()
    }

    pub(crate) fn handle(&mut self, event: InputEvent) -> Outcome {
        match (event, self.push) {
            (InputEvent::Clockwise, _) => {
                self.turns += 1;
                let base = if self.pushed { 2 } else { 0 };
                Outcome::activated(self.command(base + 1))
            }
            (InputEvent::CounterClockwise, _) => {
                self.turns -= 1;
                let base = if self.pushed { 2 } else { 0 };
                Outcome::activated(self.command(base))
            }
            (InputEvent::Press, EncoderPushMode::Command) => Outcome::activated(self.command(2)),
            (InputEvent::Press, EncoderPushMode::Toggle) => {
                self.pushed = !self.pushed;
                Outcome::activated(Vec::new())
            }
            (InputEvent::Release, EncoderPushMode::Command | EncoderPushMode::Toggle) => {
                Outcome::handled()
            }
            _ => Outcome::ignored(),
        }
    }
}

/// Rotary encoder adjusting a variable
#[derive(Debug)]
pub(crate) struct EncoderValue {
    variable: String,
    step: f64,
    step_xl: Option<f64>,
    coarse: bool,
    min: f64,
    max: f64,
    value: f64,
}

impl EncoderValue {
    pub(crate) fn new(
        variable: &str,
        step: f64,
        step_xl: Option<f64>,
        min: f64,
        max: f64,
        initial: f64,
    ) -> Self {
        Self {
            variable: variable.to_string(),
            step,
            step_xl,
            coarse: false,
            min,
            max,
            value: initial.clamp(min, max),
        }
    }

    pub(crate) fn variable(&self) -> &str {
        &self.variable
    }

    pub(crate) fn value(&self) -> f64 {
        self.value
    }

    pub(crate) fn handle(&mut self, event: InputEvent) -> Outcome {
        match event {
            InputEvent::Clockwise => self.change(1.0),
            InputEvent::CounterClockwise => self.change(-1.0),
            InputEvent::Press if self.step_xl.is_some() => {
                self.coarse = !self.coarse;
                Outcome::activated(Vec::new())
            }
            InputEvent::Release if self.step_xl.is_some() => Outcome::handled(),
            _ => Outcome::ignored(),
        }
    }

    fn change(&mut self, direction: f64) -> Outcome {
        let step = match self.step_xl {
            Some(xl) if self.coarse => xl,
            _ => self.step,
        };
        let next = (self.value + direction * step).clamp(self.min, self.max);
        if next == self.value {
            return Outcome::handled();
        }
        self.value = next;
        Outcome::activated(vec![Dispatch::Write(
            self.variable.clone(),
            Value::Number(next),
        )])
    }

    pub(crate) fn reconcile(&mut self, current: f64) {
        if current.is_finite() {
            self.value = current.clamp(self.min, self.max);
        }
    }
}
