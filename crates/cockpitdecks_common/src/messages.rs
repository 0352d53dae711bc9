//! Tagged messages exchanged with decks.
//!
//! ## Server to deck
//! | code | meaning | fields |
//! |------|---------|--------|
//! | 0 | key image update | `deck`, `key`, `image` |
//! | 2 | play a sound | `deck`, `sound`, `type` |
//! | 8 | full reload of the deck layout | `deck` |
//! | 99 | keepalive | `deck` |
//!
//! ## Deck to server
//! | code | meaning | fields |
//! |------|---------|--------|
//! | 0 | input event | `deck`, `key`, `event`, `data` |
//! | 1 | handshake | `deck` |
//! | 2 | deck closing | `deck` |
//! | 99 | keepalive reply | `deck` (optional) |

use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::error::NetworkError;

/// Integer codes carried by every frame.
pub mod codes {
    /// Server: key image. Deck: input event.
    pub const IMAGE_OR_EVENT: u8 = 0;
    /// Deck handshake.
    pub const HANDSHAKE: u8 = 1;
    /// Server: play sound. Deck: closing.
    pub const SOUND_OR_CLOSE: u8 = 2;
    /// Server asks the deck to reload its layout.
    pub const RELOAD: u8 = 8;
    /// Keepalive, both directions.
    pub const KEEPALIVE: u8 = 99;
}

/// Raster carried by a code 0 image update.
#[derive(Serialize, Deserialize, Clone, PartialEq, Eq, Hash)]
pub struct ImagePayload {
    /// Width in pixels
    pub width: u32,
    /// Height in pixels
    pub height: u32,
    /// Pixel layout of `data`, currently always `"rgb888"`
    pub encoding: String,
    /// Row-major pixel bytes, base64 text in JSON
    #[serde(with = "pixel_bytes")]
    pub data: Vec<u8>,
}

/// Base64 in self-describing text formats, plain bytes in binary ones.
mod pixel_bytes {
    use base64::{Engine, engine::general_purpose::STANDARD};
    use serde::{Deserialize, Deserializer, Serialize, Serializer, de::Error};

    pub fn serialize<S: Serializer>(data: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        if serializer.is_human_readable() {
            serializer.serialize_str(&STANDARD.encode(data))
        } else {
            data.serialize(serializer)
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        if deserializer.is_human_readable() {
            let text = String::deserialize(deserializer)?;
            STANDARD.decode(text.trim_end()).map_err(D::Error::custom)
        } else {
            Vec::deserialize(deserializer)
        }
    }
}

impl ImagePayload {
    /// Pixel layout name for packed 8-bit red, green, blue triplets
    pub const RGB888: &'static str = "rgb888";

    /// Wrap packed RGB888 bytes
    pub fn rgb888(width: u32, height: u32, data: Vec<u8>) -> Self {
        Self {
            width,
            height,
            encoding: Self::RGB888.to_string(),
            data,
        }
    }
}

impl std::fmt::Debug for ImagePayload {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImagePayload")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("encoding", &self.encoding)
            .field("data_len", &self.data.len())
            .finish()
    }
}

/// Optional payload of an input event.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq)]
#[serde(default)]
pub struct EventData {
    /// Position of a slider or value of a continuous control
    pub value: Option<f64>,
    /// Touch x coordinate
    pub x: Option<f64>,
    /// Touch y coordinate
    pub y: Option<f64>,
}

impl EventData {
    /// Event data carrying only a value
    pub fn value(value: f64) -> Self {
        Self {
            value: Some(value),
            ..Default::default()
        }
    }
}

/// Informational block attached to every server frame.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq)]
#[serde(default)]
pub struct Meta {
    /// Seconds since the unix epoch when the frame was produced
    pub ts: f64,
}

impl Meta {
    /// Stamp with the current wall clock
    pub fn now() -> Self {
        let ts = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs_f64())
            .unwrap_or_default();
        Self { ts }
    }
}

/// Input event codes sent by decks.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DeviceEvent {
    /// 0
    Release,
    /// 1
    Press,
    /// 2
    Clockwise,
    /// 3
    CounterClockwise,
    /// 4
    Pull,
    /// 9, `data.value` carries the position
    Slide,
    /// 10
    TouchStart,
    /// 11
    TouchEnd,
    /// 12
    Swipe,
    /// 14
    Tap,
    /// A code this server does not know; dropped by the receiving side.
    Other(u8),
}

impl DeviceEvent {
    /// Decode the integer event code
    pub fn from_code(code: u8) -> Self {
        match code {
            0 => Self::Release,
            1 => Self::Press,
            2 => Self::Clockwise,
            3 => Self::CounterClockwise,
            4 => Self::Pull,
            9 => Self::Slide,
            10 => Self::TouchStart,
            11 => Self::TouchEnd,
            12 => Self::Swipe,
            14 => Self::Tap,
            other => Self::Other(other),
        }
    }

    /// The integer event code
    pub fn code(self) -> u8 {
        match self {
            Self::Release => 0,
            Self::Press => 1,
            Self::Clockwise => 2,
            Self::CounterClockwise => 3,
            Self::Pull => 4,
            Self::Slide => 9,
            Self::TouchStart => 10,
            Self::TouchEnd => 11,
            Self::Swipe => 12,
            Self::Tap => 14,
            Self::Other(code) => code,
        }
    }
}

/// Flat on-wire record. Every field except `code` is optional so that all
/// message kinds share one layout in self-describing and binary formats alike.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct RawFrame {
    /// Message code, see [`codes`]
    pub code: u8,
    /// Deck name
    #[serde(default)]
    pub deck: Option<String>,
    /// Key name on the deck
    #[serde(default)]
    pub key: Option<String>,
    /// Input event code
    #[serde(default)]
    pub event: Option<u8>,
    /// Input event payload
    #[serde(default)]
    pub data: Option<EventData>,
    /// Key image
    #[serde(default)]
    pub image: Option<ImagePayload>,
    /// Sound name
    #[serde(default)]
    pub sound: Option<String>,
    /// Sound type
    #[serde(default, rename = "type")]
    pub sound_type: Option<String>,
    /// Frame metadata
    #[serde(default)]
    pub meta: Option<Meta>,
}

fn required<T>(field: Option<T>, name: &'static str) -> Result<T, NetworkError> {
    field.ok_or(NetworkError::MissingField(name))
}

/// Frames sent from the server to a deck.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(into = "RawFrame", try_from = "RawFrame")]
pub enum ServerMessage {
    /// Code 0: replace the image shown on one key
    Image {
        /// Deck name
        deck: String,
        /// Key name
        key: String,
        /// New image
        image: ImagePayload,
    },
    /// Code 2: play a sound
    Sound {
        /// Deck name
        deck: String,
        /// Sound name
        sound: String,
        /// Sound type, e.g. `wav`
        kind: String,
    },
    /// Code 8: the deck must reload its whole layout
    Reload {
        /// Deck name
        deck: String,
    },
    /// Code 99: liveness check
    Keepalive {
        /// Deck name
        deck: String,
    },
}

impl ServerMessage {
    /// The integer code of this message
    pub fn code(&self) -> u8 {
        match self {
            Self::Image { .. } => codes::IMAGE_OR_EVENT,
            Self::Sound { .. } => codes::SOUND_OR_CLOSE,
            Self::Reload { .. } => codes::RELOAD,
            Self::Keepalive { .. } => codes::KEEPALIVE,
        }
    }

    /// The deck this message addresses
    pub fn deck(&self) -> &str {
        match self {
            Self::Image { deck, .. }
            | Self::Sound { deck, .. }
            | Self::Reload { deck }
            | Self::Keepalive { deck } => deck,
        }
    }
}

impl From<ServerMessage> for RawFrame {
    fn from(message: ServerMessage) -> Self {
        let mut frame = RawFrame {
            code: message.code(),
            meta: Some(Meta::now()),
            ..Default::default()
        };
        match message {
            ServerMessage::Image { deck, key, image } => {
                frame.deck = Some(deck);
                frame.key = Some(key);
                frame.image = Some(image);
            }
            ServerMessage::Sound { deck, sound, kind } => {
                frame.deck = Some(deck);
                frame.sound = Some(sound);
                frame.sound_type = Some(kind);
            }
            ServerMessage::Reload { deck } | ServerMessage::Keepalive { deck } => {
                frame.deck = Some(deck);
            }
        }
        frame
    }
}

impl TryFrom<RawFrame> for ServerMessage {
    type Error = NetworkError;

    fn try_from(frame: RawFrame) -> Result<Self, Self::Error> {
        let deck = required(frame.deck, "deck")?;
        match frame.code {
            codes::IMAGE_OR_EVENT => Ok(Self::Image {
                deck,
                key: required(frame.key, "key")?,
                image: required(frame.image, "image")?,
            }),
            codes::SOUND_OR_CLOSE => Ok(Self::Sound {
                deck,
                sound: required(frame.sound, "sound")?,
                kind: frame.sound_type.unwrap_or_default(),
            }),
            codes::RELOAD => Ok(Self::Reload { deck }),
            codes::KEEPALIVE => Ok(Self::Keepalive { deck }),
            other => Err(NetworkError::UnknownCode(other)),
        }
    }
}

/// Frames sent from a deck to the server.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(into = "RawFrame", try_from = "RawFrame")]
pub enum DeviceMessage {
    /// Code 0: something happened on a key
    Event {
        /// Deck name
        deck: String,
        /// Key name
        key: String,
        /// What happened
        event: DeviceEvent,
        /// Event payload
        data: EventData,
    },
    /// Code 1: a deck announces itself on this connection
    Handshake {
        /// Deck name
        deck: String,
    },
    /// Code 2: the deck goes away
    Close {
        /// Deck name
        deck: String,
    },
    /// Code 99: reply to a keepalive
    Keepalive {
        /// Deck name, when the deck fills it in
        deck: Option<String>,
    },
}

impl DeviceMessage {
    /// Shorthand for an input event without payload
    pub fn event(deck: impl Into<String>, key: impl Into<String>, event: DeviceEvent) -> Self {
        Self::Event {
            deck: deck.into(),
            key: key.into(),
            event,
            data: EventData::default(),
        }
    }

    /// The integer code of this message
    pub fn code(&self) -> u8 {
        match self {
            Self::Event { .. } => codes::IMAGE_OR_EVENT,
            Self::Handshake { .. } => codes::HANDSHAKE,
            Self::Close { .. } => codes::SOUND_OR_CLOSE,
            Self::Keepalive { .. } => codes::KEEPALIVE,
        }
    }
}

impl From<DeviceMessage> for RawFrame {
    fn from(message: DeviceMessage) -> Self {
        let mut frame = RawFrame {
            code: message.code(),
            ..Default::default()
        };
        match message {
            DeviceMessage::Event {
                deck,
                key,
                event,
                data,
            } => {
                frame.deck = Some(deck);
                frame.key = Some(key);
                frame.event = Some(event.code());
                frame.data = Some(data);
            }
            DeviceMessage::Handshake { deck } | DeviceMessage::Close { deck } => {
                frame.deck = Some(deck);
            }
            DeviceMessage::Keepalive { deck } => frame.deck = deck,
        }
        frame
    }
}

impl TryFrom<RawFrame> for DeviceMessage {
    type Error = NetworkError;

    fn try_from(frame: RawFrame) -> Result<Self, Self::Error> {
        match frame.code {
            codes::IMAGE_OR_EVENT => Ok(Self::Event {
                deck: required(frame.deck, "deck")?,
                key: required(frame.key, "key")?,
                event: DeviceEvent::from_code(required(frame.event, "event")?),
                data: frame.data.unwrap_or_default(),
            }),
            codes::HANDSHAKE => Ok(Self::Handshake {
                deck: required(frame.deck, "deck")?,
            }),
            codes::SOUND_OR_CLOSE => Ok(Self::Close {
                deck: required(frame.deck, "deck")?,
            }),
            codes::KEEPALIVE => Ok(Self::Keepalive { deck: frame.deck }),
            other => Err(NetworkError::UnknownCode(other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slide_event_from_virtual_deck_json() {
        let text = r#"{"code":0,"deck":"D1","key":"5","event":9,"data":{"value":42}}"#;
        let message: DeviceMessage = serde_json::from_str(text).unwrap();
        assert_eq!(
            message,
            DeviceMessage::Event {
                deck: "D1".to_string(),
                key: "5".to_string(),
                event: DeviceEvent::Slide,
                data: EventData::value(42.0),
            }
        );
    }

    #[test]
    fn handshake_needs_a_deck() {
        let err = serde_json::from_str::<DeviceMessage>(r#"{"code":1}"#).unwrap_err();
        assert!(err.to_string().contains("deck"));
    }

    #[test]
    fn unknown_codes_are_rejected() {
        let frame = RawFrame {
            code: 42,
            deck: Some("D1".into()),
            ..Default::default()
        };
        assert!(matches!(
            DeviceMessage::try_from(frame.clone()),
            Err(NetworkError::UnknownCode(42))
        ));
        assert!(matches!(
            ServerMessage::try_from(frame),
            Err(NetworkError::UnknownCode(42))
        ));
    }

    #[test]
    fn unknown_event_codes_survive_decoding() {
        let text = r#"{"code":0,"deck":"D1","key":"1","event":7}"#;
        let message: DeviceMessage = serde_json::from_str(text).unwrap();
        match message {
            DeviceMessage::Event { event, data, .. } => {
                assert_eq!(event, DeviceEvent::Other(7));
                assert_eq!(data, EventData::default());
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn image_frame_carries_code_zero_and_timestamp() {
        let message = ServerMessage::Image {
            deck: "D1".into(),
            key: "3".into(),
            image: ImagePayload::rgb888(1, 1, vec![255, 0, 0]),
        };
        let value = serde_json::to_value(&message).unwrap();
        assert_eq!(value["code"], 0);
        assert_eq!(value["key"], "3");
        assert_eq!(value["image"]["encoding"], "rgb888");
        assert_eq!(value["image"]["data"], "/wAA");
        assert!(value["meta"]["ts"].as_f64().unwrap() > 0.0);
    }

    #[test]
    fn image_pixels_travel_as_base64_text() {
        let text = r#"{"code":0,"deck":"D1","key":"3","image":{"width":2,"height":1,"encoding":"rgb888","data":"AQIDBAUG"}}"#;
        let message: ServerMessage = serde_json::from_str(text).unwrap();
        match message {
            ServerMessage::Image { image, .. } => assert_eq!(image.data, [1, 2, 3, 4, 5, 6]),
            other => panic!("unexpected {other:?}"),
        }

        let bad = text.replace("AQIDBAUG", "not base64!");
        assert!(serde_json::from_str::<ServerMessage>(&bad).is_err());
    }

    #[test]
    fn event_codes_map_both_ways() {
        for code in [0u8, 1, 2, 3, 4, 9, 10, 11, 12, 14, 200] {
            assert_eq!(DeviceEvent::from_code(code).code(), code);
        }
    }
}
