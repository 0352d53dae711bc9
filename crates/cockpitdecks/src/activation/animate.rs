use std::time::{Duration, Instant};

use super::{InputEvent, Outcome};

/// Timer driven frame counter
#[derive(Debug)]
pub(crate) struct Animate {
    speed: Duration,
    frames: usize,
    frame: usize,
    running: bool,
    /// Press toggle, used when there is no driving formula
    toggled: bool,
    last_step: Option<Instant>,
}

impl Animate {
    pub(crate) fn new(speed: Duration, frames: usize) -> Self {
        Self {
            speed,
            frames,
            frame: 0,
            running: false,
            toggled: false,
            last_step: None,
        }
    }

    pub(crate) fn frame(&self) -> usize {
        self.frame
    }

    pub(crate) fn is_running(&self) -> bool {
        self.running
    }

    pub(crate) fn handle(&mut self, event: InputEvent) -> Outcome {
        match event {
            InputEvent::Press => {
                self.toggled = !self.toggled;
                Outcome::activated(Vec::new())
            }
            InputEvent::Release => Outcome::handled(),
            _ => Outcome::ignored(),
        }
    }

    pub(crate) fn tick(&mut self, now: Instant, driver: Option<f64>) -> Outcome {
        let running = match driver {
            Some(value) => value != 0.0,
            None => self.toggled,
        };
        if running != self.running {
            self.running = running;
            self.last_step = Some(now);
            if !running {
                self.frame = 0;
            }
            return Outcome::handled();
        }
        if let Some(last) = self.last_step
            && running
            && now.duration_since(last) >= self.speed
        {
            self.frame = (self.frame + 1) % self.frames;
            self.last_step = Some(now);
        }
        Outcome::handled()
    }
}

/// Touch strip gestures, counted only
#[derive(Debug)]
pub(crate) struct Swipe;

impl Swipe {
    pub(crate) fn handle(&self, event: InputEvent) -> Outcome {
        match event {
            InputEvent::Swipe | InputEvent::Tap => Outcome::activated(Vec::new()),
            _ => Outcome::ignored(),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, Instant};

    use crate::activation::{Activation, ActivationConfig, InputEvent};

    fn animate() -> Activation {
        Activation::from_config(
            "master_caution",
            &ActivationConfig::Animate {
                speed: Duration::from_millis(500),
                frames: 2,
            },
            &[],
            Duration::from_millis(500),
        )
        .unwrap()
    }

    #[test]
    fn runs_while_driver_is_non_zero() {
        let mut activation = animate();
        let start = Instant::now();
        activation.tick(start, Some(1.0));
        assert!(activation.state().running);
        assert_eq!(activation.state().frame, Some(0));

        activation.tick(start + Duration::from_millis(500), Some(1.0));
        assert_eq!(activation.state().frame, Some(1));
        activation.tick(start + Duration::from_millis(1000), Some(1.0));
        assert_eq!(activation.state().frame, Some(0));
        activation.tick(start + Duration::from_millis(1500), Some(1.0));
        assert_eq!(activation.state().frame, Some(1));

        activation.tick(start + Duration::from_millis(1600), Some(0.0));
        assert!(!activation.state().running);
        assert_eq!(activation.state().frame, Some(0));
    }

    #[test]
    fn press_toggles_without_driver() {
        let mut activation = animate();
        let start = Instant::now();
        activation.handle(InputEvent::Press, start);
        activation.tick(start, None);
        assert!(activation.state().running);
        activation.handle(InputEvent::Release, start);
        activation.handle(InputEvent::Press, start);
        activation.tick(start, None);
        assert!(!activation.state().running);
    }

    #[test]
    fn swipes_count_as_activations() {
        let mut activation = Activation::from_config(
            "strip",
            &ActivationConfig::Swipe,
            &[],
            Duration::from_millis(500),
        )
        .unwrap();
        let now = Instant::now();
        assert!(activation.handle(InputEvent::Swipe, now).is_empty());
        assert!(activation.handle(InputEvent::Tap, now).is_empty());
        assert!(activation.handle(InputEvent::Press, now).is_empty());
        assert_eq!(activation.count(), 2);
    }
}
