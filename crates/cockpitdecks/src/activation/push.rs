use std::time::{Duration, Instant};

use super::{AutoRepeatConfig, Dispatch, InputEvent, Outcome};

/// Momentary button
#[derive(Debug)]
pub(crate) struct Push {
    command: String,
    long_command: Option<String>,
    long_press: Option<Duration>,
    auto_repeat: Option<AutoRepeatConfig>,
    pressed_at: Option<Instant>,
    next_repeat: Option<Instant>,
}

impl Push {
    pub(crate) fn new(
        commands: &[String],
        long_press: Option<Duration>,
        auto_repeat: Option<AutoRepeatConfig>,
    ) -> Self {
        Self {
            command: commands.first().cloned().unwrap_or_default(),
            long_command: long_press.and(commands.get(1).cloned()),
            long_press,
            auto_repeat,
            pressed_at: None,
            next_repeat: None,
        }
    }

    pub(crate) fn is_pressed(&self) -> bool {
        self.pressed_at.is_some()
    }

    pub(crate) fn handle(&mut self, event: InputEvent, now: Instant) -> Outcome {
        match event {
            InputEvent::Press => {
                if self.pressed_at.is_some() {
                    return Outcome::ignored();
                }
                self.pressed_at = Some(now);
                if self.long_press.is_some() {
                    // decided on release
                    return Outcome::handled();
                }
                self.next_repeat = self.auto_repeat.as_ref().map(|r| now + r.delay);
                Outcome::activated(vec![Dispatch::Command(self.command.clone())])
            }
            InputEvent::Release => {
                let Some(pressed_at) = self.pressed_at.take() else {
                    return Outcome::ignored();
                };
                self.next_repeat = None;
                match (self.long_press, &self.long_command) {
                    (Some(threshold), Some(long)) if now.duration_since(pressed_at) >= threshold => {
                        Outcome::activated(vec![Dispatch::Command(long.clone())])
                    }
                    (Some(_), _) => Outcome::activated(vec![Dispatch::Command(self.command.clone())]),
                    (None, _) => Outcome::handled(),
                }
            }
            _ => Outcome::ignored(),
        }
    }

    /// Auto repeat while held. Repeats are not logical activations.
    pub(crate) fn tick(&mut self, now: Instant) -> Outcome {
        let (Some(next), Some(repeat)) = (self.next_repeat, &self.auto_repeat) else {
            return Outcome::handled();
        };
        if now < next {
            return Outcome::handled();
        }
        self.next_repeat = Some(now + repeat.speed);
        Outcome {
            dispatches: vec![Dispatch::Command(self.command.clone())],
            activated: false,
            handled: true,
        }
    }
}

/// `commands[0]` on press, `commands[1]` on release
#[derive(Debug)]
pub(crate) struct BeginEnd {
    begin: String,
    end: String,
    pressed: bool,
}

impl BeginEnd {
    pub(crate) fn new(begin: &str, end: &str) -> Self {
        Self {
            begin: begin.to_string(),
            end: end.to_string(),
            pressed: false,
        }
    }

    pub(crate) fn is_pressed(&self) -> bool {
        self.pressed
    }

    pub(crate) fn handle(&mut self, event: InputEvent) -> Outcome {
        match event {
            InputEvent::Press if !self.pressed => {
                self.pressed = true;
                Outcome::activated(vec![Dispatch::Command(self.begin.clone())])
            }
            InputEvent::Release if self.pressed => {
                self.pressed = false;
                Outcome {
                    dispatches: vec![Dispatch::Command(self.end.clone())],
                    activated: false,
                    handled: true,
                }
            }
            _ => Outcome::ignored(),
        }
    }
}

/// Toggle between two commands
#[derive(Debug)]
pub(crate) struct OnOff {
    on_command: String,
    off_command: String,
    on: bool,
}

impl OnOff {
    pub(crate) fn new(on_command: &str, off_command: &str, initial_on: bool) -> Self {
        Self {
            on_command: on_command.to_string(),
            off_command: off_command.to_string(),
            on: initial_on,
        }
    }

    pub(crate) fn is_on(&self) -> bool {
        self.on
    }

    pub(crate) fn handle(&mut self, event: InputEvent) -> Outcome {
        match event {
            InputEvent::Press => {
                self.on = !self.on;
                let command = if self.on {
                    &self.on_command
                } else {
                    &self.off_command
                };
                Outcome::activated(vec![Dispatch::Command(command.clone())])
            }
            InputEvent::Release => Outcome::handled(),
            _ => Outcome::ignored(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::activation::{Activation, ActivationConfig, LongPressConfig};

    fn commands(names: &[&str]) -> Vec<String> {
        names.iter().map(|n| n.to_string()).collect()
    }

    fn push(config: ActivationConfig, names: &[&str]) -> Activation {
        Activation::from_config("test", &config, &commands(names), Duration::from_millis(500))
            .unwrap()
    }

    #[test]
    fn press_release_fires_once() {
        let mut activation = push(
            ActivationConfig::Push {
                long_press: None,
                auto_repeat: None,
            },
            &["sim/lights/beacon"],
        );
        let now = Instant::now();
        assert_eq!(activation.count(), 0);

        let mut sent = activation.handle(InputEvent::Press, now);
        sent.extend(activation.handle(InputEvent::Release, now + Duration::from_millis(80)));

        assert_eq!(sent, vec![Dispatch::Command("sim/lights/beacon".into())]);
        assert_eq!(activation.count(), 1);
    }

    #[test]
    fn duplicate_press_is_ignored() {
        let mut activation = push(
            ActivationConfig::Push {
                long_press: None,
                auto_repeat: None,
            },
            &["cmd"],
        );
        let now = Instant::now();
        assert_eq!(activation.handle(InputEvent::Press, now).len(), 1);
        assert!(activation.handle(InputEvent::Press, now).is_empty());
        assert!(activation.handle(InputEvent::Release, now).is_empty());
        assert!(activation.handle(InputEvent::Release, now).is_empty());
        assert_eq!(activation.count(), 1);
    }

    #[test]
    fn long_press_picks_command_on_release() {
        let mut activation = push(
            ActivationConfig::Push {
                long_press: Some(LongPressConfig::default()),
                auto_repeat: None,
            },
            &["short", "long"],
        );
        let now = Instant::now();

        assert!(activation.handle(InputEvent::Press, now).is_empty());
        assert_eq!(
            activation.handle(InputEvent::Release, now + Duration::from_millis(300)),
            vec![Dispatch::Command("short".into())]
        );

        activation.handle(InputEvent::Press, now);
        assert_eq!(
            activation.handle(InputEvent::Release, now + Duration::from_secs(3)),
            vec![Dispatch::Command("long".into())]
        );
        assert_eq!(activation.count(), 2);
    }

    #[test]
    fn long_press_needs_two_commands() {
        let result = Activation::from_config(
            "ap",
            &ActivationConfig::Push {
                long_press: Some(LongPressConfig::default()),
                auto_repeat: None,
            },
            &commands(&["short"]),
            Duration::from_millis(500),
        );
        assert!(result.is_err());
    }

    #[test]
    fn auto_repeat_fires_while_held() {
        let mut activation = push(
            ActivationConfig::Push {
                long_press: None,
                auto_repeat: Some(AutoRepeatConfig::default()),
            },
            &["trim/up"],
        );
        let start = Instant::now();
        assert_eq!(activation.handle(InputEvent::Press, start).len(), 1);
        assert!(activation.tick(start + Duration::from_millis(500), None).is_empty());
        assert_eq!(activation.tick(start + Duration::from_secs(1), None).len(), 1);
        assert!(activation.tick(start + Duration::from_millis(1100), None).is_empty());
        assert_eq!(activation.tick(start + Duration::from_millis(1200), None).len(), 1);

        activation.handle(InputEvent::Release, start + Duration::from_millis(1250));
        assert!(activation.tick(start + Duration::from_secs(5), None).is_empty());
        assert_eq!(activation.count(), 1);
    }

    #[test]
    fn begin_end_and_onoff() {
        let now = Instant::now();
        let mut begin_end = push(ActivationConfig::BeginEndCommand, &["starter/begin", "starter/end"]);
        assert_eq!(
            begin_end.handle(InputEvent::Press, now),
            vec![Dispatch::Command("starter/begin".into())]
        );
        assert!(begin_end.state().pressed);
        assert_eq!(
            begin_end.handle(InputEvent::Release, now),
            vec![Dispatch::Command("starter/end".into())]
        );

        let mut onoff = push(ActivationConfig::Onoff { initial_on: false }, &["on", "off"]);
        assert_eq!(onoff.handle(InputEvent::Press, now), vec![Dispatch::Command("on".into())]);
        onoff.handle(InputEvent::Release, now);
        assert_eq!(onoff.state().on, Some(true));
        assert_eq!(onoff.handle(InputEvent::Press, now), vec![Dispatch::Command("off".into())]);
        assert_eq!(onoff.state().on, Some(false));
        assert_eq!(onoff.count(), 2);
    }
}
