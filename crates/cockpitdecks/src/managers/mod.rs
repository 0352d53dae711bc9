//! Device synchronization: connections, deck sessions and their workers.
//!
//! A [`DeviceServer`] accepts connections through a [`NetworkProvider`]. Each
//! connection gets a receive task, a routing task and a send task fed by a
//! bounded FIFO. A deck announcing itself with a handshake gets a
//! [`DeviceSession`]: a worker owning the deck's controls, a ticker and a
//! dispatcher talking to the simulator.

use async_channel::{Receiver, Sender};
use async_trait::async_trait;
use cockpitdecks_common::{DeviceMessage, ServerMessage, error::NetworkError};
use futures_lite::Stream;

mod server;
mod session;

pub use server::{Cockpit, DeviceServer, ServerEvent, SessionInfo};
pub use session::{Deck, DeviceSession};

/// A trait used to drive the network. This is responsible
/// for generating the futures that carry frames between the server and decks.
#[cfg_attr(not(target_arch = "wasm32"), async_trait)]
#[cfg_attr(target_arch = "wasm32", async_trait(?Send))]
pub trait NetworkProvider: 'static + Send + Sync {
    /// Name used in logs
    const PROVIDER_NAME: &'static str;

    /// This is to configure particular protocols
    type NetworkSettings: Send + Sync + Clone + 'static;

    /// The type that acts as a combined sender and reciever for a deck.
    /// This type needs to be able to be split.
    type Socket: Send;

    /// The read half of the given socket type.
    type ReadHalf: Send;

    /// The write half of the given socket type.
    type WriteHalf: Send;

    /// Info necessary to start a connection, an [`std::net::SocketAddr`] for instance
    type ConnectInfo: Send;

    /// Info necessary to start a connection, an [`std::net::SocketAddr`] for instance
    type AcceptInfo: Send;

    /// The output type of [`accept_loop`](NetworkProvider::accept_loop)
    type AcceptStream: Stream<Item = Self::Socket> + Unpin + Send;

    /// This will be spawned as a background operation to continuously add new connections.
    async fn accept_loop(
        accept_info: Self::AcceptInfo,
        network_settings: Self::NetworkSettings,
    ) -> Result<Self::AcceptStream, NetworkError>;

    /// Attach to a deck bridge that is itself listening, local hardware for instance.
    async fn connect_task(
        connect_info: Self::ConnectInfo,
        network_settings: Self::NetworkSettings,
    ) -> Result<Self::Socket, NetworkError>;

    /// Read frames until the connection ends, forwarding them to `messages`.
    async fn recv_loop(
        read_half: Self::ReadHalf,
        messages: Sender<DeviceMessage>,
        settings: Self::NetworkSettings,
    );

    /// Write every frame of `messages`, in order, until the channel or the connection closes.
    async fn send_loop(
        write_half: Self::WriteHalf,
        messages: Receiver<ServerMessage>,
        settings: Self::NetworkSettings,
    );

    /// Split the socket into a read and write half, so that the two actions
    /// can be handled concurrently.
    fn split(combined: Self::Socket) -> (Self::ReadHalf, Self::WriteHalf);

    /// Capacity of the outgoing FIFO of each connection
    fn channel_capacity(settings: &Self::NetworkSettings) -> usize;
}
