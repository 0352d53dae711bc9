//! Parsed layout configuration.
//!
//! Loading files is the host's business; these structures only describe what a
//! loader hands over. Durations are written in seconds, as floats.

use std::{
    collections::{HashMap, HashSet},
    time::Duration,
};

use serde::{Deserialize, Serialize};

use crate::activation::ActivationConfig;
use crate::error::{ConfigError, ConfigResult};
use crate::render::RepresentationConfig;
use crate::variables::VariableSpec;

/// `Duration` as floating point seconds
pub mod seconds {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer, de::Error};

    /// Serialize as seconds
    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(duration.as_secs_f64())
    }

    /// Deserialize from seconds; negative or non-finite values are rejected
    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs).map_err(D::Error::custom)
    }
}

/// `Option<Duration>` as floating point seconds
pub mod opt_seconds {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer, de::Error};

    /// Serialize as seconds or null
    pub fn serialize<S: Serializer>(
        duration: &Option<Duration>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match duration {
            Some(duration) => serializer.serialize_some(&duration.as_secs_f64()),
            None => serializer.serialize_none(),
        }
    }

    /// Deserialize from seconds or null
    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Duration>, D::Error> {
        Option::<f64>::deserialize(deserializer)?
            .map(|secs| Duration::try_from_secs_f64(secs).map_err(D::Error::custom))
            .transpose()
    }
}

/// Server wide settings
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CockpitSettings {
    /// Interval between keepalives sent to each deck
    #[serde(with = "seconds")]
    pub keepalive_interval: Duration,
    /// Fingerprints remembered per control by the frame cache
    pub frame_cache_per_control: usize,
}

impl Default for CockpitSettings {
    fn default() -> Self {
        Self {
            keepalive_interval: Duration::from_secs(10),
            frame_cache_per_control: 32,
        }
    }
}

/// Settings shared by all decks of one family
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeckSettings {
    /// Family name, e.g. `virtual` or `streamdeck`
    pub family: String,
    /// Key image size in pixels, width then height
    pub key_size: (u32, u32),
    /// Re-evaluation period
    #[serde(with = "seconds")]
    pub tick_period: Duration,
    /// Default inactivity that ends a cursor gesture
    #[serde(with = "seconds")]
    pub gesture_timeout: Duration,
}

impl Default for DeckSettings {
    fn default() -> Self {
        Self {
            family: "virtual".to_string(),
            key_size: (96, 96),
            tick_period: Duration::from_millis(100),
            gesture_timeout: Duration::from_millis(500),
        }
    }
}

/// One control as found in a layout. Its `id` is the key it sits on.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControlConfig {
    /// Key name
    pub id: String,
    /// Input behaviour
    pub activation: ActivationConfig,
    /// Feedback behaviour
    pub representation: RepresentationConfig,
    /// RPN formula driving the representation
    pub formula: Option<String>,
    /// Number format applied to the formula result, e.g. `{:.1f}`
    pub format: Option<String>,
    /// Simulator commands
    pub commands: Vec<String>,
    /// Additional variables whose changes refresh this control
    pub variables: Vec<String>,
}

/// Everything needed to drive one deck.
///
/// ```rust
/// use cockpitdecks::config::DeckLayout;
///
/// let layout: DeckLayout = serde_json::from_str(r#"{
///     "deck": "left",
///     "keys": ["0", "1"],
///     "controls": [
///         {"id": "0", "activation": {"type": "push"}, "commands": ["sim/lights/taxi"]}
///     ]
/// }"#).unwrap();
/// layout.validate().unwrap();
/// assert_eq!(layout.settings.key_size, (96, 96));
/// ```
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeckLayout {
    /// Deck name, as sent in handshakes
    pub deck: String,
    /// Family settings
    pub settings: DeckSettings,
    /// Every key of the device; keys without a control show a blank frame
    pub keys: Vec<String>,
    /// Controls, one per key at most
    pub controls: Vec<ControlConfig>,
    /// Variable policies
    pub variables: HashMap<String, VariableSpec>,
}

impl DeckLayout {
    /// Reject layouts with duplicate controls or controls on unknown keys
    pub fn validate(&self) -> ConfigResult<()> {
        let mut seen = HashSet::new();
        for control in &self.controls {
            if !seen.insert(control.id.as_str()) {
                return Err(ConfigError::DuplicateControl(control.id.clone()));
            }
            if !self.keys.is_empty() && !self.keys.contains(&control.id) {
                return Err(ConfigError::Invalid {
                    control: control.id.clone(),
                    reason: format!("no key named {} on deck {}", control.id, self.deck),
                });
            }
        }
        Ok(())
    }

    /// Keys to keep in sync: the declared keys, or the controls when none are declared
    pub fn key_names(&self) -> Vec<String> {
        if self.keys.is_empty() {
            self.controls.iter().map(|c| c.id.clone()).collect()
        } else {
            self.keys.clone()
        }
    }
}
