#![cfg(feature = "tcp")]

use std::{
    net::SocketAddr,
    sync::Arc,
    time::{Duration, Instant},
};

use async_net::TcpStream;
use bevy::tasks::{TaskPool, TaskPoolBuilder};
use cockpitdecks::{
    Cockpit, DeviceEvent, DeviceMessage, DeviceServer, ServerMessage,
    activation::Dispatch,
    codec::{BincodeFrameCodec, Encoder, LENGTH_PREFIX},
    config::{CockpitSettings, DeckLayout},
    simulator::RecordingSimulator,
    tcp::{NetworkSettings, TcpProvider},
    variables::VariableStore,
};
use futures_lite::{AsyncReadExt, AsyncWriteExt, future::block_on};

async fn connect(addr: SocketAddr) -> TcpStream {
    let started = Instant::now();
    loop {
        match TcpStream::connect(addr).await {
            Ok(stream) => return stream,
            Err(err) => {
                assert!(started.elapsed() < Duration::from_secs(2), "server not up: {err}");
                async_std::task::sleep(Duration::from_millis(20)).await;
            }
        }
    }
}

async fn send(stream: &mut TcpStream, message: &DeviceMessage) {
    let bytes = BincodeFrameCodec::encode(message).unwrap();
    stream.write_all(&bytes).await.unwrap();
}

async fn recv(stream: &mut TcpStream) -> ServerMessage {
    let mut header = [0u8; LENGTH_PREFIX];
    stream.read_exact(&mut header).await.unwrap();
    let mut body = vec![0u8; u64::from_le_bytes(header) as usize];
    stream.read_exact(&mut body).await.unwrap();
    BincodeFrameCodec::decode_body(&body).unwrap()
}

#[test]
fn hardware_bridge_over_tcp() {
    let runtime: Arc<TaskPool> = Arc::new(TaskPoolBuilder::new().num_threads(2).build());
    let simulator = Arc::new(RecordingSimulator::default());
    let cockpit = Cockpit::new(
        Arc::new(VariableStore::new()),
        simulator.clone(),
        CockpitSettings::default(),
    );
    let mut server: DeviceServer<TcpProvider> = DeviceServer::new(runtime.clone(), cockpit);
    let layout: DeckLayout = serde_json::from_str(
        r#"{
            "deck": "streamdeck",
            "settings": {"family": "streamdeck", "key_size": [72, 72]},
            "keys": ["0", "1"],
            "controls": [
                {"id": "1", "activation": {"type": "onoff"}, "commands": ["sim/on", "sim/off"],
                 "representation": {"type": "led"}}
            ]
        }"#,
    )
    .unwrap();
    server.add_deck(layout).unwrap();

    let addr: SocketAddr = "127.0.0.1:47813".parse().unwrap();
    server.listen(addr, &NetworkSettings::default()).unwrap();

    block_on(async {
        let mut stream = connect(addr).await;
        send(
            &mut stream,
            &DeviceMessage::Handshake {
                deck: "streamdeck".into(),
            },
        )
        .await;

        for expected in ["0", "1"] {
            match recv(&mut stream).await {
                ServerMessage::Image { deck, key, image } => {
                    assert_eq!(deck, "streamdeck");
                    assert_eq!(key, expected);
                    assert_eq!((image.width, image.height), (72, 72));
                    assert_eq!(image.data.len(), 72 * 72 * 3);
                }
                other => panic!("unexpected {other:?}"),
            }
        }

        send(
            &mut stream,
            &DeviceMessage::event("streamdeck", "1", DeviceEvent::Press),
        )
        .await;
        // the led lights up
        match recv(&mut stream).await {
            ServerMessage::Image { key, .. } => assert_eq!(key, "1"),
            other => panic!("unexpected {other:?}"),
        }

        let started = Instant::now();
        while simulator.dispatched().is_empty() {
            assert!(started.elapsed() < Duration::from_secs(2), "nothing dispatched");
            async_std::task::sleep(Duration::from_millis(10)).await;
        }
    });

    assert_eq!(simulator.dispatched(), [Dispatch::Command("sim/on".into())]);
    server.stop();
    assert_eq!(server.connection_count(), 0);
}
