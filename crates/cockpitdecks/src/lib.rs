#![deny(
    missing_docs,
    trivial_casts,
    trivial_numeric_casts,
    unstable_features,
    unused_import_braces,
    unused_qualifications,
    clippy::unwrap_used
)]
#![allow(clippy::type_complexity)]

/*!
Drive cockpit control surfaces from simulator variables.

A deck is a grid of keys, knobs and sliders. Each key carries a control: an
activation deciding what input does, a representation deciding what the key
shows, and optionally an RPN formula computing the value behind both. Values
come from a [`variables::VariableStore`] fed by the simulator; input goes back
to the simulator as [`activation::Dispatch`]es.

The moving parts:

- [`variables`] holds every named value and notifies subscribers of changes.
- [`formula`] parses and evaluates postfix formulas like `${sim/flaps} 100 *`.
- [`activation`] turns raw input into state changes and simulator requests.
- [`render`] turns display parameters into frames, cached by fingerprint.
- [`managers`] keeps decks in sync over a [`managers::NetworkProvider`]:
  [`tcp`] for hardware bridges, [`loopback`] in process, or the WebSocket
  provider of the `cockpitdecks_websockets` crate for virtual decks.

## Example

```rust,no_run
use std::sync::Arc;

use bevy::tasks::TaskPoolBuilder;
use cockpitdecks::{
    DeviceMessage, DeviceServer, Cockpit,
    config::{CockpitSettings, DeckLayout},
    loopback::{LoopbackListener, LoopbackProvider, LoopbackSettings},
    simulator::RecordingSimulator,
    variables,
};

let layout: DeckLayout = serde_json::from_str(r#"{
    "deck": "left",
    "keys": ["0"],
    "controls": [{
        "id": "0",
        "activation": {"type": "push"},
        "commands": ["sim/lights/taxi"],
        "representation": {"type": "text", "text": "TAXI"}
    }]
}"#).unwrap();

let runtime = Arc::new(TaskPoolBuilder::new().num_threads(2).build());
let cockpit = Cockpit::new(
    variables::initialize(),
    Arc::new(RecordingSimulator::default()),
    CockpitSettings::default(),
);
let mut server: DeviceServer<LoopbackProvider> = DeviceServer::new(runtime, cockpit);
server.add_deck(layout).unwrap();

let listener = LoopbackListener::new();
let device = listener.connector().connect().unwrap();
server.listen(listener, &LoopbackSettings::default()).unwrap();

futures_lite::future::block_on(async {
    device.send(DeviceMessage::Handshake { deck: "left".into() }).await.unwrap();
    // the first frame is the image of key 0
    let frame = device.recv().await.unwrap();
    assert_eq!(frame.code(), 0);
});
```
*/

pub mod activation;
pub mod config;
pub mod control;
pub mod error;
pub mod formula;
pub mod loopback;
pub mod managers;
pub mod render;
pub mod simulator;
pub mod variables;

mod runtime;
pub use runtime::{JoinHandle, Runtime};

#[cfg(feature = "tcp")]
/// A default tcp provider for bridges to hardware decks
pub mod tcp;

pub use async_channel;
pub use async_trait::async_trait;

pub use cockpitdecks_common::error::NetworkError;
pub use cockpitdecks_common::{
    ConnectionId, DeviceEvent, DeviceMessage, EventData, ImagePayload, ServerMessage, codec,
    messages,
};

pub use managers::{Cockpit, Deck, DeviceServer, NetworkProvider, ServerEvent, SessionInfo};
