use std::{
    future::Future,
    net::SocketAddr,
    pin::Pin,
    task::{Context, Poll},
};

use async_net::{TcpListener, TcpStream};
use cockpitdecks_common::{
    DeviceMessage, ServerMessage,
    codec::{BincodeFrameCodec, Encoder, LENGTH_PREFIX},
    error::NetworkError,
};
use futures_lite::{AsyncReadExt, AsyncWriteExt, FutureExt, Stream};
use tracing::{debug, error, info, trace, warn};

use crate::{
    async_channel::{Receiver, Sender},
    async_trait,
    managers::NetworkProvider,
};

#[derive(Default, Debug)]
/// Length-prefixed bincode frames over TCP, for bridges to local hardware decks.
pub struct TcpProvider;

#[cfg_attr(not(target_arch = "wasm32"), async_trait)]
#[cfg_attr(target_arch = "wasm32", async_trait(?Send))]
impl NetworkProvider for TcpProvider {
    const PROVIDER_NAME: &'static str = "TCP";

    type NetworkSettings = NetworkSettings;

    type Socket = TcpStream;

    type ReadHalf = TcpStream;

    type WriteHalf = TcpStream;

    type ConnectInfo = SocketAddr;

    type AcceptInfo = SocketAddr;

    type AcceptStream = OwnedIncoming;

    async fn accept_loop(
        accept_info: Self::AcceptInfo,
        _: Self::NetworkSettings,
    ) -> Result<Self::AcceptStream, NetworkError> {
        let listener = TcpListener::bind(accept_info)
            .await
            .map_err(NetworkError::Listen)?;
        info!("Listening on {}", accept_info);

        Ok(OwnedIncoming::new(listener))
    }

    async fn connect_task(
        connect_info: Self::ConnectInfo,
        _: Self::NetworkSettings,
    ) -> Result<Self::Socket, NetworkError> {
        info!("Connecting to deck bridge at {}", connect_info);
        let stream = TcpStream::connect(connect_info)
            .await
            .map_err(NetworkError::Connection)?;

        let addr = stream.peer_addr().map_err(NetworkError::Connection)?;
        debug!("Connected to: {:?}", addr);
        Ok(stream)
    }

    async fn recv_loop(
        mut read_half: Self::ReadHalf,
        messages: Sender<DeviceMessage>,
        settings: Self::NetworkSettings,
    ) {
        let mut header = [0u8; LENGTH_PREFIX];
        let mut buffer = Vec::new();
        loop {
            trace!("Reading frame length");
            match read_half.read_exact(&mut header).await {
                Ok(()) => (),
                Err(err) if err.kind() == std::io::ErrorKind::UnexpectedEof => {
                    // EOF, the deck bridge closed the stream
                    debug!("Deck bridge disconnected");
                    break;
                }
                Err(err) => {
                    error!("Encountered error while fetching length: {}", err);
                    break;
                }
            }
            let length = u64::from_le_bytes(header) as usize;
            trace!("Frame length: {}", length);

            if length > settings.max_packet_length {
                error!(
                    "Received too large frame: {} > {}",
                    length, settings.max_packet_length
                );
                break;
            }

            buffer.resize(length, 0);
            if let Err(err) = read_half.read_exact(&mut buffer).await {
                error!(
                    "Encountered error while fetching stream of length {}: {}",
                    length, err
                );
                break;
            }

            let message: DeviceMessage = match BincodeFrameCodec::decode_body(&buffer) {
                Ok(message) => message,
                Err(err) => {
                    error!("Failed to decode deck frame: {}", err);
                    break;
                }
            };

            if messages.send(message).await.is_err() {
                error!("Failed to hand decoded frame to the server");
                break;
            }
        }
    }

    async fn send_loop(
        mut write_half: Self::WriteHalf,
        messages: Receiver<ServerMessage>,
        settings: Self::NetworkSettings,
    ) {
        let warning_threshold = settings.channel_warning_threshold;
        let channel_capacity = settings.channel_capacity;

        while let Ok(first_message) = messages.recv().await {
            // Collect whatever else is queued into one write
            let mut batch = vec![first_message];
            while let Ok(message) = messages.try_recv() {
                batch.push(message);
            }

            let batch_size = batch.len();

            let capacity = messages.capacity().unwrap_or(channel_capacity).max(1);
            let current_depth = messages.len();
            let depth_percentage = (current_depth * 100 / capacity) as u8;

            if depth_percentage >= warning_threshold {
                warn!(
                    "Channel depth at {}% ({}/{} frames). Deck may be too slow to keep up!",
                    depth_percentage, current_depth, capacity
                );
            }

            if batch_size > 1 {
                debug!("Batching {} frames into single write", batch_size);
            }

            let mut combined_buffer = Vec::new();
            for message in batch {
                match BincodeFrameCodec::encode(&message) {
                    Ok(encoded) => combined_buffer.extend_from_slice(&encoded),
                    Err(err) => error!("Could not encode frame {:?}: {}", message.code(), err),
                }
            }

            if combined_buffer.is_empty() {
                continue;
            }

            trace!("Sending {} bytes ({} frames)", combined_buffer.len(), batch_size);

            if let Err(err) = write_half.write_all(&combined_buffer).await {
                error!("Could not send batch of {} frames: {}", batch_size, err);
                break;
            }
        }
    }

    fn split(combined: Self::Socket) -> (Self::ReadHalf, Self::WriteHalf) {
        (combined.clone(), combined)
    }

    fn channel_capacity(settings: &Self::NetworkSettings) -> usize {
        settings.channel_capacity
    }
}

#[derive(Clone, Debug)]
#[allow(missing_copy_implementations)]
/// Settings of the TCP provider
pub struct NetworkSettings {
    /// Maximum frame size in bytes. A deck exceeding it is disconnected
    ///
    /// ## Default
    /// The default is set to 10MiB
    pub max_packet_length: usize,
    /// Frames queued per connection before the worker waits (default: 500)
    pub channel_capacity: usize,
    /// Warn when channel depth exceeds this percentage (default: 80)
    pub channel_warning_threshold: u8,
}

impl Default for NetworkSettings {
    fn default() -> Self {
        Self {
            max_packet_length: 10 * 1024 * 1024,
            channel_capacity: 500,
            channel_warning_threshold: 80,
        }
    }
}

type PendingAccept = Pin<Box<dyn Future<Output = Option<TcpStream>> + Send>>;

/// A stream of accepted tcp connections
pub struct OwnedIncoming {
    listener: TcpListener,
    pending: Option<PendingAccept>,
}

impl OwnedIncoming {
    fn new(listener: TcpListener) -> Self {
        Self {
            listener,
            pending: None,
        }
    }
}

impl Stream for OwnedIncoming {
    type Item = TcpStream;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let incoming = self.get_mut();
        if incoming.pending.is_none() {
            // async-net listeners are cheap handles to the same socket
            let listener = incoming.listener.clone();
            incoming.pending = Some(Box::pin(async move {
                match listener.accept().await {
                    Ok((stream, addr)) => {
                        debug!("Accepted {}", addr);
                        Some(stream)
                    }
                    Err(err) => {
                        error!("Accept failed: {}", err);
                        None
                    }
                }
            }));
        }
        if let Some(pending) = &mut incoming.pending
            && let Poll::Ready(stream) = pending.poll(cx)
        {
            incoming.pending = None;
            return Poll::Ready(stream);
        }
        Poll::Pending
    }
}
