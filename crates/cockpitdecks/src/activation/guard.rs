use std::time::{Duration, Instant};

use super::{ActivationKind, InputEvent, Outcome};

/// Cover over another activation.
///
/// Pull toggles the cover, and so does a press held for `hold`. While the cover
/// is closed nothing reaches the covered activation.
#[derive(Debug)]
pub(crate) struct Guarded {
    inner: Box<ActivationKind>,
    hold: Duration,
    open: bool,
    press_started: Option<Instant>,
    toggled_by_hold: bool,
    /// The press in progress reached the inner activation
    forwarded_press: bool,
}

impl Guarded {
    pub(crate) fn new(inner: ActivationKind, hold: Duration) -> Self {
        Self {
            inner: Box::new(inner),
            hold,
            open: false,
            press_started: None,
            toggled_by_hold: false,
            forwarded_press: false,
        }
    }

    pub(crate) fn is_open(&self) -> bool {
        self.open
    }

    pub(crate) fn inner(&self) -> &ActivationKind {
        &self.inner
    }

    pub(crate) fn inner_mut(&mut self) -> &mut ActivationKind {
        &mut self.inner
    }

    fn toggle(&mut self) -> Outcome {
        self.open = !self.open;
        Outcome::activated(Vec::new())
    }

    pub(crate) fn handle(&mut self, event: InputEvent, now: Instant) -> Outcome {
        match event {
            InputEvent::Pull => self.toggle(),
            InputEvent::Press => {
                if self.press_started.is_some() {
                    return Outcome::ignored();
                }
                self.press_started = Some(now);
                self.toggled_by_hold = false;
                if self.open {
                    self.forwarded_press = true;
                    self.inner.handle(event, now)
                } else {
                    Outcome::handled()
                }
            }
            InputEvent::Release => {
                let Some(started) = self.press_started.take() else {
                    return self.forward(event, now);
                };
                let mut outcome = Outcome::handled();
                if std::mem::take(&mut self.forwarded_press) {
                    outcome = self.inner.handle(event, now);
                    if !self.open {
                        outcome.dispatches.clear();
                    }
                }
                if !self.toggled_by_hold && now.duration_since(started) >= self.hold {
                    outcome.dispatches.clear();
                    let toggled = self.toggle();
                    outcome.activated |= toggled.activated;
                }
                outcome
            }
            _ => self.forward(event, now),
        }
    }

    fn forward(&mut self, event: InputEvent, now: Instant) -> Outcome {
        if self.open {
            self.inner.handle(event, now)
        } else {
            Outcome::ignored()
        }
    }

    pub(crate) fn tick(&mut self, now: Instant, driver: Option<f64>) -> Outcome {
        if let Some(started) = self.press_started
            && !self.toggled_by_hold
            && now.duration_since(started) >= self.hold
        {
            self.toggled_by_hold = true;
            return self.toggle();
        }
        if self.open {
            self.inner.tick(now, driver)
        } else {
            Outcome::handled()
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, Instant};

    use proptest::prelude::*;

    use crate::activation::{Activation, ActivationConfig, Dispatch, InputEvent};

    fn guarded_push() -> Activation {
        Activation::from_config(
            "fire",
            &ActivationConfig::Guarded {
                inner: Box::new(ActivationConfig::Push {
                    long_press: None,
                    auto_repeat: None,
                }),
                hold: Duration::from_secs(2),
            },
            &["engine/fire_ext".to_string()],
            Duration::from_millis(500),
        )
        .unwrap()
    }

    #[test]
    fn closed_guard_swallows_presses() {
        let mut activation = guarded_push();
        let now = Instant::now();
        assert_eq!(activation.state().guard_open, Some(false));
        assert!(activation.handle(InputEvent::Press, now).is_empty());
        assert!(activation.handle(InputEvent::Release, now).is_empty());

        activation.handle(InputEvent::Pull, now);
        assert_eq!(activation.state().guard_open, Some(true));
        assert_eq!(
            activation.handle(InputEvent::Press, now),
            vec![Dispatch::Command("engine/fire_ext".into())]
        );
    }

    #[test]
    fn long_hold_toggles_guard_on_tick() {
        let mut activation = guarded_push();
        let start = Instant::now();
        activation.handle(InputEvent::Press, start);
        activation.tick(start + Duration::from_secs(1), None);
        assert_eq!(activation.state().guard_open, Some(false));
        activation.tick(start + Duration::from_millis(2100), None);
        assert_eq!(activation.state().guard_open, Some(true));
        // the hold was used up by the guard
        assert!(activation.handle(InputEvent::Release, start + Duration::from_secs(3)).is_empty());
        assert_eq!(activation.state().guard_open, Some(true));
    }

    #[test]
    fn long_hold_toggles_guard_on_release() {
        let mut activation = guarded_push();
        let start = Instant::now();
        activation.handle(InputEvent::Press, start);
        activation.handle(InputEvent::Release, start + Duration::from_secs(3));
        assert_eq!(activation.state().guard_open, Some(true));
    }

    fn event() -> impl Strategy<Value = InputEvent> {
        prop_oneof![
            Just(InputEvent::Press),
            Just(InputEvent::Release),
            Just(InputEvent::Pull),
            Just(InputEvent::Clockwise),
            Just(InputEvent::CounterClockwise),
            (0.0f64..100.0).prop_map(InputEvent::Slide),
            Just(InputEvent::TouchEnd),
        ]
    }

    proptest! {
        #[test]
        fn nothing_leaks_through_a_closed_guard(
            steps in prop::collection::vec((event(), 0u64..3000), 1..60)
        ) {
            let mut activation = guarded_push();
            let mut now = Instant::now();
            for (event, delay) in steps {
                now += Duration::from_millis(delay);
                let open_before = activation.state().guard_open == Some(true);
                let sent = activation.tick(now, None);
                prop_assert!(sent.is_empty() || open_before);

                let open_before = activation.state().guard_open == Some(true);
                let sent = activation.handle(event, now);
                prop_assert!(sent.is_empty() || open_before);
            }
        }
    }
}
