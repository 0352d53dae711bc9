use codee::{Decoder, Encoder};
use serde::{Serialize, de::DeserializeOwned};

use crate::error::NetworkError;

/// Size of the little-endian length header in front of every binary frame.
pub const LENGTH_PREFIX: usize = 8;

/// Binary codec for stream transports (TCP bridges to local hardware).
///
/// Wire layout of one frame:
/// - 8-byte little-endian length of the body
/// - bincode-serialized [`RawFrame`](crate::RawFrame) body
///
/// ## Usage
///
/// ```rust
/// use cockpitdecks_common::codec::{BincodeFrameCodec, Decoder, Encoder};
/// use cockpitdecks_common::DeviceMessage;
///
/// let hello = DeviceMessage::Handshake { deck: "left".into() };
/// let bytes = BincodeFrameCodec::encode(&hello).unwrap();
/// let back: DeviceMessage = BincodeFrameCodec::decode(&bytes).unwrap();
/// assert_eq!(back, hello);
/// ```
pub struct BincodeFrameCodec;

impl BincodeFrameCodec {
    /// Decode a frame body whose length header has already been consumed
    pub fn decode_body<T: DeserializeOwned>(body: &[u8]) -> Result<T, NetworkError> {
        bincode::serde::decode_from_slice(body, bincode::config::standard())
            .map(|(message, _)| message)
            .map_err(|_| NetworkError::Serialization)
    }

    /// Encode a frame body without its length header
    pub fn encode_body<T: Serialize>(message: &T) -> Result<Vec<u8>, NetworkError> {
        bincode::serde::encode_to_vec(message, bincode::config::standard())
            .map_err(|_| NetworkError::Serialization)
    }
}

impl<T: Serialize> Encoder<T> for BincodeFrameCodec {
    type Error = NetworkError;
    type Encoded = Vec<u8>;

    fn encode(val: &T) -> Result<Self::Encoded, Self::Error> {
        let body = Self::encode_body(val)?;

        let len = body.len() as u64;
        let mut buffer = Vec::with_capacity(LENGTH_PREFIX + body.len());
        buffer.extend_from_slice(&len.to_le_bytes());
        buffer.extend_from_slice(&body);

        Ok(buffer)
    }
}

impl<T: DeserializeOwned> Decoder<T> for BincodeFrameCodec {
    type Error = NetworkError;
    type Encoded = [u8];

    fn decode(val: &Self::Encoded) -> Result<T, Self::Error> {
        if val.len() < LENGTH_PREFIX {
            return Err(NetworkError::Serialization);
        }

        let length_bytes: [u8; LENGTH_PREFIX] = val[..LENGTH_PREFIX]
            .try_into()
            .map_err(|_| NetworkError::Serialization)?;
        let length = u64::from_le_bytes(length_bytes) as usize;

        let body = &val[LENGTH_PREFIX..];
        if body.len() != length {
            return Err(NetworkError::Serialization);
        }

        Self::decode_body(body)
    }
}
