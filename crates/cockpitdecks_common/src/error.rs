//! Transport and protocol errors.

use thiserror::Error;

use crate::ConnectionId;

/// Internal errors used by cockpitdecks networking
#[derive(Error, Debug)]
pub enum NetworkError {
    /// Binding the listening socket failed
    #[error("An error occured when accepting a new connection: {0}")]
    Listen(std::io::Error),

    /// Connecting to a remote peer failed
    #[error("An error occured when trying to connect: {0}")]
    Connection(std::io::Error),

    /// A connection id was not (or no longer) known
    #[error("Could not find connection with id: {0}")]
    ConnectionNotFound(ConnectionId),

    /// A deck name has no live session
    #[error("No session for deck '{0}'")]
    DeckNotFound(String),

    /// The outgoing queue of a connection is closed
    #[error("Connection closed with id: {0}")]
    ChannelClosed(ConnectionId),

    /// A frame could not be encoded or decoded
    #[error("Failed to serialize or deserialize a frame")]
    Serialization,

    /// A frame carried a code this side does not understand
    #[error("Unknown message code {0}")]
    UnknownCode(u8),

    /// A frame was missing a field its code requires
    #[error("Frame is missing the '{0}' field")]
    MissingField(&'static str),

    /// Anything a provider reports that has no dedicated variant
    #[error("{0}")]
    Error(String),
}
