use codee::{Decoder, Encoder};
use serde::{Serialize, de::DeserializeOwned};

use crate::error::NetworkError;

/// Text codec used by virtual decks: one JSON object per WebSocket text frame.
///
/// ```rust
/// use cockpitdecks_common::codec::{Decoder, JsonFrameCodec};
/// use cockpitdecks_common::DeviceMessage;
///
/// let message: DeviceMessage = JsonFrameCodec::decode(r#"{"code":1,"deck":"web"}"#).unwrap();
/// assert_eq!(message, DeviceMessage::Handshake { deck: "web".into() });
/// ```
pub struct JsonFrameCodec;

impl<T: Serialize> Encoder<T> for JsonFrameCodec {
    type Error = NetworkError;
    type Encoded = String;

    fn encode(val: &T) -> Result<Self::Encoded, Self::Error> {
        serde_json::to_string(val).map_err(|_| NetworkError::Serialization)
    }
}

impl<T: DeserializeOwned> Decoder<T> for JsonFrameCodec {
    type Error = NetworkError;
    type Encoded = str;

    fn decode(val: &Self::Encoded) -> Result<T, Self::Error> {
        serde_json::from_str(val).map_err(|err| match err.classify() {
            serde_json::error::Category::Data => NetworkError::Error(err.to_string()),
            _ => NetworkError::Serialization,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{DeviceMessage, ServerMessage};

    #[test]
    fn keepalive_is_a_bare_code() {
        let text = JsonFrameCodec::encode(&ServerMessage::Keepalive {
            deck: "web".to_string(),
        })
        .unwrap();
        let value: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value["code"], 99);
        assert_eq!(value["deck"], "web");
    }

    #[test]
    fn garbage_is_a_serialization_error() {
        let res: Result<DeviceMessage, _> = JsonFrameCodec::decode("{not json");
        assert!(matches!(res, Err(NetworkError::Serialization)));
    }

    #[test]
    fn missing_fields_are_reported() {
        let res: Result<DeviceMessage, _> = JsonFrameCodec::decode(r#"{"code":0,"deck":"x"}"#);
        match res {
            Err(NetworkError::Error(message)) => assert!(message.contains("key")),
            other => panic!("unexpected {other:?}"),
        }
    }
}
