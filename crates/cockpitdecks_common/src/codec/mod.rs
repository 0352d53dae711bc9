//! Frame codecs.
//!
//! Both codecs implement the [`codee`] `Encoder` / `Decoder` traits for any
//! serde message, so the same codec serves [`ServerMessage`](crate::ServerMessage)
//! on the server and [`DeviceMessage`](crate::DeviceMessage) on a deck.

mod binary;
mod json;

pub use binary::{BincodeFrameCodec, LENGTH_PREFIX};
pub use json::JsonFrameCodec;

pub use codee::{Decoder, Encoder};
