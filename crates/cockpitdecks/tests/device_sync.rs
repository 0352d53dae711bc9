use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use bevy::tasks::{TaskPool, TaskPoolBuilder};
use cockpitdecks::{
    DeviceEvent, DeviceMessage, DeviceServer, EventData, NetworkError, ServerEvent,
    ServerMessage, Cockpit,
    activation::Dispatch,
    async_channel::Receiver,
    config::{CockpitSettings, DeckLayout},
    loopback::{LoopbackConnector, LoopbackDevice, LoopbackListener, LoopbackProvider, LoopbackSettings},
    simulator::RecordingSimulator,
    variables::VariableStore,
};
use futures_lite::{FutureExt, future::block_on};

const WAIT: Duration = Duration::from_secs(2);

fn layout() -> DeckLayout {
    serde_json::from_str(
        r#"{
            "deck": "D1",
            "keys": ["0", "1", "2"],
            "controls": [
                {"id": "0", "activation": {"type": "push"}, "commands": ["sim/lights/taxi"],
                 "representation": {"type": "text", "text": "TAXI"}},
                {"id": "1", "activation": {"type": "cursor", "min": 0, "max": 100, "gesture_timeout": 5},
                 "commands": ["sim/throttle"],
                 "representation": {"type": "text", "text": "${formula}"},
                 "formula": "${sim/throttle}"},
                {"id": "2", "representation": {"type": "sound", "sound": "chime"},
                 "formula": "${data:chime}"}
            ]
        }"#,
    )
    .unwrap()
}

struct Harness {
    server: DeviceServer<LoopbackProvider>,
    connector: LoopbackConnector,
    simulator: Arc<RecordingSimulator>,
    store: Arc<VariableStore>,
    events: Receiver<ServerEvent>,
    // dropped last, on the test thread
    _runtime: Arc<TaskPool>,
}

fn harness() -> Harness {
    let runtime: Arc<TaskPool> = Arc::new(TaskPoolBuilder::new().num_threads(2).build());
    let simulator = Arc::new(RecordingSimulator::default());
    let store = Arc::new(VariableStore::new());
    let cockpit = Cockpit::new(store.clone(), simulator.clone(), CockpitSettings::default());
    let mut server: DeviceServer<LoopbackProvider> = DeviceServer::new(runtime.clone(), cockpit);
    server.add_deck(layout()).unwrap();

    let listener = LoopbackListener::new();
    let connector = listener.connector();
    server.listen(listener, &LoopbackSettings::default()).unwrap();
    let events = server.events();

    Harness {
        server,
        connector,
        simulator,
        store,
        events,
        _runtime: runtime,
    }
}

async fn next_event(events: &Receiver<ServerEvent>, matches: impl Fn(&ServerEvent) -> bool) -> ServerEvent {
    async {
        loop {
            let event = events.recv().await.unwrap();
            if matches(&event) {
                return event;
            }
        }
    }
    .or(async {
        async_std::task::sleep(WAIT).await;
        panic!("no matching server event");
    })
    .await
}

/// Wait for a condition polled every few milliseconds
async fn eventually(condition: impl Fn() -> bool) {
    let started = Instant::now();
    while !condition() {
        assert!(started.elapsed() < WAIT, "condition not met in time");
        async_std::task::sleep(Duration::from_millis(10)).await;
    }
}

/// Image frames until `count` keys have been seen, skipping keepalives
async fn images(device: &LoopbackDevice, count: usize) -> Vec<String> {
    let mut keys = Vec::new();
    while keys.len() < count {
        match device.recv_timeout(WAIT).await {
            Some(ServerMessage::Image { key, .. }) => keys.push(key),
            Some(_) => (),
            None => panic!("only got images for {keys:?}"),
        }
    }
    keys
}

async fn register(harness: &Harness) -> LoopbackDevice {
    let device = harness.connector.connect().unwrap();
    device
        .send(DeviceMessage::Handshake { deck: "D1".into() })
        .await
        .unwrap();
    next_event(&harness.events, |e| matches!(e, ServerEvent::DeckRegistered { .. })).await;
    device
}

#[test]
fn handshake_gets_every_key() {
    let harness = harness();
    block_on(async {
        let device = register(&harness).await;
        assert_eq!(images(&device, 3).await, ["0", "1", "2"]);
    });
    assert_eq!(harness.server.sessions().len(), 1);
    assert_eq!(harness.server.sessions()[0].deck, "D1");
}

#[test]
fn push_fires_once_per_press() {
    let harness = harness();
    block_on(async {
        let device = register(&harness).await;
        images(&device, 3).await;
        device
            .send(DeviceMessage::event("D1", "0", DeviceEvent::Press))
            .await
            .unwrap();
        device
            .send(DeviceMessage::event("D1", "0", DeviceEvent::Release))
            .await
            .unwrap();
        eventually(|| !harness.simulator.dispatched().is_empty()).await;
        // give a duplicate the chance to show up
        async_std::task::sleep(Duration::from_millis(100)).await;
    });
    assert_eq!(
        harness.simulator.dispatched(),
        [Dispatch::Command("sim/lights/taxi".into())]
    );
    let deck = harness.server.deck("D1").unwrap();
    assert_eq!(deck.with_control("0", |c| c.activation_count()), Some(1));
}

#[test]
fn slider_sends_its_value_when_the_gesture_ends() {
    let harness = harness();
    block_on(async {
        let device = register(&harness).await;
        images(&device, 3).await;
        device
            .send(DeviceMessage::Event {
                deck: "D1".into(),
                key: "1".into(),
                event: DeviceEvent::Slide,
                data: EventData::value(42.0),
            })
            .await
            .unwrap();
        async_std::task::sleep(Duration::from_millis(100)).await;
        assert!(harness.simulator.dispatched().is_empty());

        device
            .send(DeviceMessage::event("D1", "1", DeviceEvent::TouchEnd))
            .await
            .unwrap();
        eventually(|| !harness.simulator.dispatched().is_empty()).await;
    });
    assert_eq!(
        harness.simulator.dispatched(),
        [Dispatch::CommandWithValue("sim/throttle".into(), 42.0)]
    );
}

#[test]
fn variable_change_redraws_only_its_key() {
    let harness = harness();
    block_on(async {
        let device = register(&harness).await;
        images(&device, 3).await;
        harness.store.set("sim/throttle", 55.0);
        assert_eq!(images(&device, 1).await, ["1"]);
    });
}

#[test]
fn reconnect_resends_everything() {
    let harness = harness();
    // key 2 plays a sound and has no face of its own
    harness.store.set("data:chime", 1.0);
    block_on(async {
        let first = register(&harness).await;
        images(&first, 3).await;
        first.hang_up();
        next_event(&harness.events, |e| matches!(e, ServerEvent::Disconnected(_))).await;

        let second = register(&harness).await;
        assert_eq!(images(&second, 3).await, ["0", "1", "2"]);
    });
    assert_eq!(harness.server.connection_count(), 1);
}

#[test]
fn close_ends_the_session_but_not_the_connection() {
    let harness = harness();
    block_on(async {
        let device = register(&harness).await;
        images(&device, 3).await;
        device
            .send(DeviceMessage::Close { deck: "D1".into() })
            .await
            .unwrap();
        let closed = next_event(&harness.events, |e| matches!(e, ServerEvent::DeckClosed { .. })).await;
        assert!(matches!(closed, ServerEvent::DeckClosed { deck, .. } if deck == "D1"));
    });
    assert!(harness.server.sessions().is_empty());
    assert_eq!(harness.server.connection_count(), 1);
}

#[test]
fn unknown_deck_is_reported() {
    let harness = harness();
    block_on(async {
        let device = harness.connector.connect().unwrap();
        device
            .send(DeviceMessage::Handshake { deck: "nope".into() })
            .await
            .unwrap();
        let event = next_event(&harness.events, |e| matches!(e, ServerEvent::Error(_))).await;
        assert!(matches!(event, ServerEvent::Error(NetworkError::DeckNotFound(name)) if name == "nope"));
    });
    assert!(harness.server.sessions().is_empty());
}

#[test]
fn replacing_a_layout_asks_the_deck_to_reload() {
    let harness = harness();
    block_on(async {
        let device = register(&harness).await;
        images(&device, 3).await;
        let mut replacement = layout();
        replacement.keys.push("3".into());
        harness.server.add_deck(replacement).unwrap();

        let reload = async {
            loop {
                match device.recv_timeout(WAIT).await {
                    Some(ServerMessage::Reload { deck }) => return deck,
                    Some(_) => (),
                    None => panic!("no reload"),
                }
            }
        }
        .await;
        assert_eq!(reload, "D1");
    });
    assert!(harness.server.sessions().is_empty());
    assert_eq!(harness.server.deck("D1").unwrap().keys().len(), 4);
    // the old controls are gone, and so are their frames
    assert!(harness.server.cockpit().renderer().cache().is_empty());
}

#[test]
fn removing_a_deck_ends_its_session() {
    let harness = harness();
    block_on(async {
        let device = register(&harness).await;
        images(&device, 3).await;
        harness.server.remove_deck("D1").unwrap();
        next_event(&harness.events, |e| matches!(e, ServerEvent::DeckClosed { .. })).await;
    });
    assert!(harness.server.sessions().is_empty());
    assert!(harness.server.deck("D1").is_none());
    assert!(harness.server.cockpit().renderer().cache().is_empty());
    assert!(matches!(
        harness.server.remove_deck("D1"),
        Err(NetworkError::DeckNotFound(name)) if name == "D1"
    ));
}

#[test]
fn rejected_commands_do_not_stop_the_deck() {
    let harness = harness();
    harness.simulator.reject("sim/lights/taxi");
    block_on(async {
        let device = register(&harness).await;
        images(&device, 3).await;
        device
            .send(DeviceMessage::event("D1", "0", DeviceEvent::Press))
            .await
            .unwrap();
        let deck = harness.server.deck("D1").unwrap();
        eventually(|| deck.with_control("0", |c| c.last_failure().is_some()) == Some(true)).await;

        harness.store.set("sim/throttle", 10.0);
        assert_eq!(images(&device, 1).await, ["1"]);
    });
}

#[test]
fn disconnect_unknown_connection_fails() {
    let harness = harness();
    let err = harness
        .server
        .disconnect(cockpitdecks::ConnectionId { id: 77 })
        .unwrap_err();
    assert!(matches!(err, NetworkError::ConnectionNotFound(_)));
}
