#![deny(missing_docs, clippy::unwrap_used)]

//! WebSocket transport for virtual decks.
//!
//! Every frame is one JSON object in one text message, as produced by
//! [`JsonFrameCodec`]. Browser decks connect to the server;
//! [`WebSocketProvider`] can also dial out to a deck host that listens itself.

use std::{
    io,
    net::SocketAddr,
    pin::Pin,
    sync::Arc,
    task::{Context, Poll},
};

use async_channel::{Receiver, Sender};
use async_std::net::{TcpListener, TcpStream};
use async_trait::async_trait;
use async_tungstenite::{
    WebSocketStream,
    tungstenite::{self, Message, protocol::WebSocketConfig},
};
use cockpitdecks::managers::NetworkProvider;
use cockpitdecks_common::{
    DeviceMessage, ServerMessage,
    codec::{Decoder, Encoder, JsonFrameCodec},
    error::NetworkError,
};
use futures::{
    SinkExt, StreamExt,
    stream::{FuturesUnordered, SplitSink, SplitStream},
};
use futures_lite::{Future, Stream};
use tracing::{debug, error, info, trace, warn};

/// A provider for WebSockets
#[derive(Default, Debug)]
pub struct WebSocketProvider;

#[async_trait]
impl NetworkProvider for WebSocketProvider {
    const PROVIDER_NAME: &'static str = "WebSocket";

    type NetworkSettings = NetworkSettings;

    type Socket = WebSocketStream<TcpStream>;

    type ReadHalf = SplitStream<WebSocketStream<TcpStream>>;

    type WriteHalf = SplitSink<WebSocketStream<TcpStream>, Message>;

    type ConnectInfo = url::Url;

    type AcceptInfo = SocketAddr;

    type AcceptStream = OwnedIncoming;

    async fn accept_loop(
        accept_info: Self::AcceptInfo,
        network_settings: Self::NetworkSettings,
    ) -> Result<Self::AcceptStream, NetworkError> {
        let listener = TcpListener::bind(accept_info)
            .await
            .map_err(NetworkError::Listen)?;
        info!("Accepting virtual decks on {}", accept_info);
        Ok(OwnedIncoming::new(listener, network_settings.websocket_config))
    }

    async fn connect_task(
        connect_info: Self::ConnectInfo,
        network_settings: Self::NetworkSettings,
    ) -> Result<Self::Socket, NetworkError> {
        if connect_info.scheme() == "wss" {
            return Err(NetworkError::Error(
                "WSS deck hosts are not supported, use a ws:// url".to_string(),
            ));
        }
        let addrs = connect_info
            .socket_addrs(|| Some(80))
            .map_err(NetworkError::Connection)?;
        info!("Connecting to deck host {}", connect_info);
        let stream = TcpStream::connect(&*addrs)
            .await
            .map_err(NetworkError::Connection)?;
        let (socket, _response) = async_tungstenite::client_async_with_config(
            connect_info.as_str(),
            stream,
            Some(network_settings.websocket_config),
        )
        .await
        .map_err(to_network_error)?;
        debug!("Connected to {}", connect_info);
        Ok(socket)
    }

    async fn recv_loop(
        mut read_half: Self::ReadHalf,
        messages: Sender<DeviceMessage>,
        _: Self::NetworkSettings,
    ) {
        while let Some(frame) = read_half.next().await {
            let text = match frame {
                Ok(Message::Text(text)) => text,
                Ok(Message::Close(close)) => {
                    debug!("Virtual deck closed the socket: {:?}", close);
                    break;
                }
                Ok(Message::Binary(bytes)) => {
                    warn!("Ignoring {} byte binary frame", bytes.len());
                    continue;
                }
                // pings are answered by tungstenite itself
                Ok(_) => continue,
                Err(err) => {
                    error!("WebSocket read failed: {}", err);
                    break;
                }
            };

            // framing survives a bad payload, so only this frame is lost
            let message: DeviceMessage = match JsonFrameCodec::decode(text.as_str()) {
                Ok(message) => message,
                Err(err) => {
                    warn!("Dropping malformed deck frame: {}", err);
                    continue;
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

        'frames: while let Ok(first_message) = messages.recv().await {
            let mut batch = vec![first_message];
            while let Ok(message) = messages.try_recv() {
                batch.push(message);
            }

            let capacity = messages.capacity().unwrap_or(channel_capacity).max(1);
            let current_depth = messages.len();
            let depth_percentage = (current_depth * 100 / capacity) as u8;
            if depth_percentage >= warning_threshold {
                warn!(
                    "Channel depth at {}% ({}/{} frames). Virtual deck may be too slow to keep up!",
                    depth_percentage, current_depth, capacity
                );
            }

            let batch_size = batch.len();
            for message in batch {
                let text = match JsonFrameCodec::encode(&message) {
                    Ok(text) => text,
                    Err(err) => {
                        error!("Could not encode frame {}: {}", message.code(), err);
                        continue;
                    }
                };
                if let Err(err) = write_half.feed(Message::text(text)).await {
                    error!("Could not queue frame: {}", err);
                    break 'frames;
                }
            }
            trace!("Flushing {} frames", batch_size);
            if let Err(err) = write_half.flush().await {
                error!("Could not send batch of {} frames: {}", batch_size, err);
                break;
            }
        }
        let _ = write_half.close().await;
    }

    fn split(combined: Self::Socket) -> (Self::ReadHalf, Self::WriteHalf) {
        let (sink, stream) = combined.split();
        (stream, sink)
    }

    fn channel_capacity(settings: &Self::NetworkSettings) -> usize {
        settings.channel_capacity
    }
}

fn to_network_error(error: tungstenite::Error) -> NetworkError {
    match error {
        tungstenite::Error::ConnectionClosed => NetworkError::Error("Connection closed".to_string()),
        tungstenite::Error::AlreadyClosed => {
            NetworkError::Error("Connection was already closed".to_string())
        }
        tungstenite::Error::Io(io_error) => NetworkError::Connection(io_error),
        tungstenite::Error::Http(response) => {
            NetworkError::Error(format!("HTTP error: {}", response.status()))
        }
        other => NetworkError::Error(other.to_string()),
    }
}

#[derive(Clone, Debug)]
#[allow(missing_copy_implementations)]
/// Settings of the WebSocket provider
pub struct NetworkSettings {
    /// Protocol limits: message and frame sizes, buffers
    pub websocket_config: WebSocketConfig,
    /// Frames queued per connection before the worker waits (default: 500)
    pub channel_capacity: usize,
    /// Warn when channel depth exceeds this percentage (default: 80)
    pub channel_warning_threshold: u8,
}

impl Default for NetworkSettings {
    fn default() -> Self {
        Self {
            websocket_config: WebSocketConfig::default(),
            channel_capacity: 500,
            channel_warning_threshold: 80,
        }
    }
}

type PendingAccept = Pin<Box<dyn Future<Output = io::Result<(TcpStream, SocketAddr)>> + Send>>;
type PendingHandshake = Pin<Box<dyn Future<Output = Option<WebSocketStream<TcpStream>>> + Send>>;

/// A stream of accepted WebSocket connections.
///
/// Handshakes run side by side, so a peer that never completes its own does
/// not hold up the ones behind it.
pub struct OwnedIncoming {
    listener: Arc<TcpListener>,
    config: WebSocketConfig,
    accepting: Option<PendingAccept>,
    handshakes: FuturesUnordered<PendingHandshake>,
}

impl OwnedIncoming {
    fn new(listener: TcpListener, config: WebSocketConfig) -> Self {
        Self {
            listener: Arc::new(listener),
            config,
            accepting: None,
            handshakes: FuturesUnordered::new(),
        }
    }
}

async fn handshake(
    stream: TcpStream,
    addr: SocketAddr,
    config: WebSocketConfig,
) -> Option<WebSocketStream<TcpStream>> {
    // a failed handshake only loses this peer
    match async_tungstenite::accept_async_with_config(stream, Some(config)).await {
        Ok(socket) => {
            debug!("WebSocket handshake with {} done", addr);
            Some(socket)
        }
        Err(err) => {
            warn!("WebSocket handshake with {} failed: {}", addr, err);
            None
        }
    }
}

impl Stream for OwnedIncoming {
    type Item = WebSocketStream<TcpStream>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let incoming = self.get_mut();
        loop {
            let accepting = incoming.accepting.get_or_insert_with(|| -> PendingAccept {
                let listener = incoming.listener.clone();
                Box::pin(async move { listener.accept().await })
            });
            match accepting.as_mut().poll(cx) {
                Poll::Ready(Ok((stream, addr))) => {
                    incoming.accepting = None;
                    incoming
                        .handshakes
                        .push(Box::pin(handshake(stream, addr, incoming.config)));
                }
                Poll::Ready(Err(err)) => {
                    error!("Accept failed: {}", err);
                    return Poll::Ready(None);
                }
                Poll::Pending => break,
            }
        }
        loop {
            match incoming.handshakes.poll_next_unpin(cx) {
                Poll::Ready(Some(Some(socket))) => return Poll::Ready(Some(socket)),
                Poll::Ready(Some(None)) => continue,
                // nothing in flight: the listener wakes us up
                Poll::Ready(None) | Poll::Pending => return Poll::Pending,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, Instant};

    use bevy::tasks::{TaskPool, TaskPoolBuilder};
    use cockpitdecks::{
        Cockpit, DeviceServer, config::{CockpitSettings, DeckLayout},
        simulator::RecordingSimulator, variables::VariableStore,
    };
    use futures_lite::{FutureExt, future::block_on};

    use super::*;

    fn server(runtime: Arc<TaskPool>) -> DeviceServer<WebSocketProvider> {
        let cockpit = Cockpit::new(
            Arc::new(VariableStore::new()),
            Arc::new(RecordingSimulator::default()),
            CockpitSettings::default(),
        );
        let server = DeviceServer::new(runtime, cockpit);
        let layout: DeckLayout = serde_json::from_str(
            r#"{"deck": "web", "keys": ["0"],
                "controls": [{"id": "0", "representation": {"type": "text", "text": "HDG"}}]}"#,
        )
        .unwrap();
        server.add_deck(layout).unwrap();
        server
    }

    async fn connect(url: &str) -> WebSocketStream<async_tungstenite::async_std::ConnectStream> {
        let started = Instant::now();
        loop {
            match async_tungstenite::async_std::connect_async(url).await {
                Ok((socket, _)) => return socket,
                Err(err) => {
                    assert!(started.elapsed() < Duration::from_secs(2), "server not up: {err}");
                    async_std::task::sleep(Duration::from_millis(20)).await;
                }
            }
        }
    }

    #[test]
    fn virtual_deck_gets_json_frames() {
        let runtime = Arc::new(TaskPoolBuilder::new().num_threads(2).build());
        let mut server = server(runtime.clone());
        server
            .listen("127.0.0.1:47821".parse().unwrap(), &NetworkSettings::default())
            .unwrap();

        block_on(async {
            let mut socket = connect("ws://127.0.0.1:47821").await;
            // garbage first: it is dropped, the connection stays up
            socket.send(Message::text("{not json".to_string())).await.unwrap();
            socket
                .send(Message::text(r#"{"code":1,"deck":"web"}"#.to_string()))
                .await
                .unwrap();

            let frame = loop {
                match socket.next().await {
                    Some(Ok(Message::Text(text))) => break text,
                    Some(Ok(_)) => continue,
                    other => panic!("unexpected {other:?}"),
                }
            };
            let value: serde_json::Value = serde_json::from_str(frame.as_str()).unwrap();
            assert_eq!(value["code"], 0);
            assert_eq!(value["deck"], "web");
            assert_eq!(value["key"], "0");
            assert_eq!(value["image"]["width"], 96);
        });
        assert_eq!(server.sessions().len(), 1);
    }

    #[test]
    fn a_silent_peer_does_not_hold_up_the_next_deck() {
        let runtime = Arc::new(TaskPoolBuilder::new().num_threads(2).build());
        let mut server = server(runtime.clone());
        let addr: SocketAddr = "127.0.0.1:47822".parse().unwrap();
        server.listen(addr, &NetworkSettings::default()).unwrap();

        block_on(
            async {
                // accepted first, never says a word
                let started = Instant::now();
                let _silent = loop {
                    match TcpStream::connect(addr).await {
                        Ok(stream) => break stream,
                        Err(err) => {
                            assert!(started.elapsed() < Duration::from_secs(2), "server not up: {err}");
                            async_std::task::sleep(Duration::from_millis(20)).await;
                        }
                    }
                };
                let mut socket = connect("ws://127.0.0.1:47822").await;
                socket
                    .send(Message::text(r#"{"code":1,"deck":"web"}"#.to_string()))
                    .await
                    .unwrap();
                let frame = socket.next().await;
                assert!(matches!(frame, Some(Ok(Message::Text(_)))));
            }
            .or(async {
                async_std::task::sleep(Duration::from_secs(5)).await;
                panic!("second deck was never served");
            }),
        );
    }

    #[test]
    fn wss_is_refused() {
        let result = block_on(WebSocketProvider::connect_task(
            url::Url::parse("wss://127.0.0.1:1").unwrap(),
            NetworkSettings::default(),
        ));
        assert!(matches!(result, Err(NetworkError::Error(_))));
    }

    #[test]
    fn io_errors_keep_their_source() {
        let err = to_network_error(tungstenite::Error::Io(std::io::Error::other("boom")));
        assert!(matches!(err, NetworkError::Connection(_)));
    }
}
