use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::{opt_seconds, seconds};

fn default_long_press() -> Duration {
    Duration::from_secs(2)
}

fn default_repeat_delay() -> Duration {
    Duration::from_secs(1)
}

fn default_repeat_speed() -> Duration {
    Duration::from_millis(200)
}

fn default_stops() -> usize {
    2
}

fn default_step() -> f64 {
    1.0
}

fn default_cursor_max() -> f64 {
    100.0
}

fn default_animation_speed() -> Duration {
    Duration::from_millis(500)
}

fn default_frames() -> usize {
    2
}

/// Hold-to-fire-another-command option of `push`
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LongPressConfig {
    /// Minimum hold for the long command (`commands[1]`)
    #[serde(with = "seconds", default = "default_long_press")]
    pub threshold: Duration,
}

impl Default for LongPressConfig {
    fn default() -> Self {
        Self {
            threshold: default_long_press(),
        }
    }
}

/// Auto repeat option of `push`
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AutoRepeatConfig {
    /// Hold before the first repeat
    #[serde(with = "seconds", default = "default_repeat_delay")]
    pub delay: Duration,
    /// Interval between repeats
    #[serde(with = "seconds", default = "default_repeat_speed")]
    pub speed: Duration,
}

impl Default for AutoRepeatConfig {
    fn default() -> Self {
        Self {
            delay: default_repeat_delay(),
            speed: default_repeat_speed(),
        }
    }
}

/// What pressing an encoder does
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EncoderPushMode {
    /// Presses are not part of this control
    #[default]
    None,
    /// Press fires `commands[2]`
    Command,
    /// Press flips between `commands[0..2]` and `commands[2..4]` for turns
    Toggle,
}

/// How a control interprets input, as found in the layout configuration.
///
/// Tagged by `type`:
///
/// ```rust
/// use cockpitdecks::activation::ActivationConfig;
///
/// let config: ActivationConfig = serde_json::from_str(
///     r#"{"type": "updown", "stops": 3, "cycle": true}"#,
/// ).unwrap();
/// assert!(matches!(config, ActivationConfig::Updown { stops: 3, cycle: true, .. }));
/// ```
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ActivationConfig {
    /// Display only
    #[default]
    None,
    /// Command on press
    Push {
        /// Long press variant
        #[serde(default)]
        long_press: Option<LongPressConfig>,
        /// Repeat while held
        #[serde(default)]
        auto_repeat: Option<AutoRepeatConfig>,
    },
    /// `commands[0]` on press, `commands[1]` on release
    BeginEndCommand,
    /// Alternates `commands[0]` and `commands[1]`
    Onoff {
        /// Start in the on state
        #[serde(default)]
        initial_on: bool,
    },
    /// Integer step in `[0, stops - 1]`
    #[serde(alias = "stepped")]
    Updown {
        /// Number of positions
        #[serde(default = "default_stops")]
        stops: usize,
        /// Wrap around instead of saturating
        #[serde(default)]
        cycle: bool,
        /// Starting step
        #[serde(default)]
        initial: usize,
        /// Variable receiving the step
        #[serde(default)]
        variable: Option<String>,
    },
    /// Turn commands
    #[serde(alias = "knob")]
    Encoder {
        /// Press behaviour
        #[serde(default)]
        push: EncoderPushMode,
    },
    /// Turns change a variable
    EncoderValue {
        /// Variable written on each turn
        variable: String,
        /// Change per detent
        #[serde(default = "default_step")]
        step: f64,
        /// Coarse change, toggled by pressing
        #[serde(default)]
        step_xl: Option<f64>,
        /// Lower bound
        #[serde(default)]
        min: f64,
        /// Upper bound
        #[serde(default = "default_cursor_max")]
        max: f64,
        /// Starting value, `min` when absent
        #[serde(default)]
        initial: Option<f64>,
    },
    /// Continuous position mapped to a value
    #[serde(alias = "slider")]
    Cursor {
        /// Lower bound
        #[serde(default)]
        min: f64,
        /// Upper bound
        #[serde(default = "default_cursor_max")]
        max: f64,
        /// Quantization step
        #[serde(default)]
        step: Option<f64>,
        /// Range of the raw position reported by the device, identity when absent
        #[serde(default)]
        input_range: Option<(f64, f64)>,
        /// Variable written instead of firing `commands[0]`
        #[serde(default)]
        variable: Option<String>,
        /// Inactivity that ends a gesture, the deck default when absent
        #[serde(default, with = "opt_seconds")]
        gesture_timeout: Option<Duration>,
    },
    /// Another activation behind a cover
    Guarded {
        /// The covered activation
        inner: Box<ActivationConfig>,
        /// Hold that lifts or closes the cover
        #[serde(with = "seconds", default = "default_long_press")]
        hold: Duration,
    },
    /// Timer driven frame counter
    Animate {
        /// Time per frame
        #[serde(with = "seconds", default = "default_animation_speed")]
        speed: Duration,
        /// Frame count
        #[serde(default = "default_frames")]
        frames: usize,
    },
    /// Records swipes and taps
    Swipe,
}
