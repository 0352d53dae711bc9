#![deny(
    missing_docs,
    trivial_casts,
    trivial_numeric_casts,
    unstable_features,
    unused_import_braces,
    clippy::unwrap_used
)]

//! Wire level types shared between the cockpitdecks server and the decks it drives.
//!
//! Every message on the wire is a flat record carrying an integer `code`. The
//! typed views are [`ServerMessage`] (server to deck) and [`DeviceMessage`]
//! (deck to server); both go through [`messages::RawFrame`] so that JSON and
//! bincode see the same shape.

pub mod messages;
pub use messages::*;

pub mod codec;

pub mod error;

use serde::{Deserialize, Serialize};

use std::fmt::Display;

#[derive(Serialize, Deserialize, Hash, PartialEq, Eq, Clone, Copy, Debug, PartialOrd, Ord)]
/// A [`ConnectionId`] denotes a single transport connection.
///
/// One connection may carry several decks (a browser page hosting more than one
/// virtual deck registers each of them over the same socket).
pub struct ConnectionId {
    /// The key of the connection.
    pub id: u32,
}

impl ConnectionId {
    /// Reserved for frames originating from the server itself
    pub const SERVER: Self = ConnectionId { id: 0 };

    /// Returns true if this ConnectionId represents the server
    pub fn is_server(&self) -> bool {
        self.id == Self::SERVER.id
    }
}

impl Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_fmt(format_args!("Connection with ID={0}", self.id))
    }
}
