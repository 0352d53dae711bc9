//! In-process transport. Decks live in the same process as the server and
//! exchange typed messages over channels, with no encoding at all.
//!
//! Handy for tests and for embedding a virtual deck next to the server:
//!
//! ```rust
//! use cockpitdecks::loopback::LoopbackListener;
//!
//! let listener = LoopbackListener::new();
//! let connector = listener.connector();
//! let _device = connector.connect().unwrap();
//! ```

use std::{pin::Pin, time::Duration};

use async_channel::{Receiver, Sender, TryRecvError, unbounded};
use cockpitdecks_common::{DeviceMessage, ServerMessage, error::NetworkError};
use futures_lite::FutureExt;
use tracing::{debug, trace};

use crate::{async_trait, managers::NetworkProvider};

/// Server side of an in-process connection
#[derive(Debug)]
pub struct LoopbackSocket {
    incoming: Receiver<DeviceMessage>,
    outgoing: Sender<ServerMessage>,
}

/// Deck side of an in-process connection
#[derive(Debug, Clone)]
pub struct LoopbackDevice {
    to_server: Sender<DeviceMessage>,
    from_server: Receiver<ServerMessage>,
}

/// A connected socket and device
pub fn pair() -> (LoopbackSocket, LoopbackDevice) {
    let (to_server, incoming) = unbounded();
    let (outgoing, from_server) = unbounded();
    (
        LoopbackSocket { incoming, outgoing },
        LoopbackDevice {
            to_server,
            from_server,
        },
    )
}

impl LoopbackDevice {
    /// Send a frame to the server
    pub async fn send(&self, message: DeviceMessage) -> Result<(), NetworkError> {
        self.to_server
            .send(message)
            .await
            .map_err(|_| NetworkError::Error("loopback connection closed".to_string()))
    }

    /// Wait for the next server frame
    pub async fn recv(&self) -> Result<ServerMessage, NetworkError> {
        self.from_server
            .recv()
            .await
            .map_err(|_| NetworkError::Error("loopback connection closed".to_string()))
    }

    /// Wait at most `timeout` for the next server frame
    pub async fn recv_timeout(&self, timeout: Duration) -> Option<ServerMessage> {
        async { self.from_server.recv().await.ok() }
            .or(async {
                async_std::task::sleep(timeout).await;
                None
            })
            .await
    }

    /// The next server frame if one is already queued
    pub fn try_recv(&self) -> Option<ServerMessage> {
        match self.from_server.try_recv() {
            Ok(message) => Some(message),
            Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => None,
        }
    }

    /// Hang up, as a deck losing its transport would
    pub fn hang_up(&self) {
        self.to_server.close();
        self.from_server.close();
    }
}

/// Where a [`LoopbackProvider`] server accepts devices
#[derive(Debug)]
pub struct LoopbackListener {
    sockets: Sender<LoopbackSocket>,
    accepted: Receiver<LoopbackSocket>,
}

impl Default for LoopbackListener {
    fn default() -> Self {
        Self::new()
    }
}

impl LoopbackListener {
    /// A listener with no pending devices
    pub fn new() -> Self {
        let (sockets, accepted) = unbounded();
        Self { sockets, accepted }
    }

    /// A handle creating devices that connect to this listener
    pub fn connector(&self) -> LoopbackConnector {
        LoopbackConnector {
            sockets: self.sockets.clone(),
        }
    }
}

/// Creates devices connected to a [`LoopbackListener`]
#[derive(Debug, Clone)]
pub struct LoopbackConnector {
    sockets: Sender<LoopbackSocket>,
}

impl LoopbackConnector {
    /// Connect a new device
    pub fn connect(&self) -> Result<LoopbackDevice, NetworkError> {
        let (socket, device) = pair();
        self.sockets
            .try_send(socket)
            .map_err(|_| NetworkError::Error("loopback listener is gone".to_string()))?;
        Ok(device)
    }
}

/// Settings of the loopback provider
#[derive(Clone, Debug)]
pub struct LoopbackSettings {
    /// Frames queued per connection before the worker waits (default: 500)
    pub channel_capacity: usize,
}

impl Default for LoopbackSettings {
    fn default() -> Self {
        Self {
            channel_capacity: 500,
        }
    }
}

/// Channels in place of sockets
#[derive(Default, Debug)]
pub struct LoopbackProvider;

#[cfg_attr(not(target_arch = "wasm32"), async_trait)]
#[cfg_attr(target_arch = "wasm32", async_trait(?Send))]
impl NetworkProvider for LoopbackProvider {
    const PROVIDER_NAME: &'static str = "Loopback";

    type NetworkSettings = LoopbackSettings;

    type Socket = LoopbackSocket;

    type ReadHalf = Receiver<DeviceMessage>;

    type WriteHalf = Sender<ServerMessage>;

    type ConnectInfo = LoopbackSocket;

    type AcceptInfo = LoopbackListener;

    type AcceptStream = Pin<Box<Receiver<LoopbackSocket>>>;

    async fn accept_loop(
        accept_info: Self::AcceptInfo,
        _: Self::NetworkSettings,
    ) -> Result<Self::AcceptStream, NetworkError> {
        Ok(Box::pin(accept_info.accepted))
    }

    async fn connect_task(
        connect_info: Self::ConnectInfo,
        _: Self::NetworkSettings,
    ) -> Result<Self::Socket, NetworkError> {
        Ok(connect_info)
    }

    async fn recv_loop(
        read_half: Self::ReadHalf,
        messages: Sender<DeviceMessage>,
        _: Self::NetworkSettings,
    ) {
        while let Ok(message) = read_half.recv().await {
            trace!("Loopback frame {}", message.code());
            if messages.send(message).await.is_err() {
                break;
            }
        }
        debug!("Loopback device hung up");
    }

    async fn send_loop(
        write_half: Self::WriteHalf,
        messages: Receiver<ServerMessage>,
        _: Self::NetworkSettings,
    ) {
        while let Ok(message) = messages.recv().await {
            if write_half.send(message).await.is_err() {
                break;
            }
        }
    }

    fn split(combined: Self::Socket) -> (Self::ReadHalf, Self::WriteHalf) {
        (combined.incoming, combined.outgoing)
    }

    fn channel_capacity(settings: &Self::NetworkSettings) -> usize {
        settings.channel_capacity
    }
}

#[cfg(test)]
mod tests {
    use futures_lite::{StreamExt, future::block_on};

    use super::*;

    #[test]
    fn pair_carries_both_directions() {
        let (socket, device) = pair();
        let (read_half, write_half) = LoopbackProvider::split(socket);
        block_on(async {
            device
                .send(DeviceMessage::Handshake { deck: "D1".into() })
                .await
                .unwrap();
            assert_eq!(
                read_half.recv().await.unwrap(),
                DeviceMessage::Handshake { deck: "D1".into() }
            );
            write_half
                .send(ServerMessage::Keepalive { deck: "D1".into() })
                .await
                .unwrap();
            assert_eq!(
                device.recv().await.unwrap(),
                ServerMessage::Keepalive { deck: "D1".into() }
            );
        });
        assert!(device.try_recv().is_none());
    }

    #[test]
    fn connector_feeds_the_accept_stream() {
        let listener = LoopbackListener::new();
        let connector = listener.connector();
        let _first = connector.connect().unwrap();
        let _second = connector.connect().unwrap();
        block_on(async {
            let mut accepted =
                LoopbackProvider::accept_loop(listener, LoopbackSettings::default())
                    .await
                    .unwrap();
            assert!(accepted.next().await.is_some());
            assert!(accepted.next().await.is_some());
        });
    }

    #[test]
    fn hang_up_ends_the_receive_loop() {
        let (socket, device) = pair();
        let (read_half, _write_half) = LoopbackProvider::split(socket);
        let (tx, rx) = unbounded();
        device.hang_up();
        block_on(LoopbackProvider::recv_loop(
            read_half,
            tx,
            LoopbackSettings::default(),
        ));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn recv_timeout_gives_up() {
        let (_socket, device) = pair();
        let started = std::time::Instant::now();
        assert!(block_on(device.recv_timeout(Duration::from_millis(20))).is_none());
        assert!(started.elapsed() >= Duration::from_millis(20));
    }
}
