use std::{
    collections::{BTreeMap, HashMap},
    fmt,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::{Duration, Instant},
};

use async_channel::{Receiver, Sender};
use cockpitdecks_common::{ConnectionId, ServerMessage, error::NetworkError};
use tracing::{debug, trace, warn};

use crate::activation::{Dispatch, InputEvent};
use crate::config::DeckLayout;
use crate::control::Control;
use crate::error::ConfigResult;
use crate::render::{Fingerprint, FrameContent, Renderer, frame_owner};
use crate::runtime::JoinHandle;
use crate::simulator::{self, Simulator, SimulatorError};
use crate::variables::{SubscriptionId, Value, VariableKind, VariableStore};

/// A deck layout and the controls built from it.
///
/// Controls outlive sessions: a deck that reconnects finds its controls in the
/// state it left them. Only the worker of the live session touches them.
pub struct Deck {
    layout: DeckLayout,
    keys: Vec<String>,
    controls: Mutex<BTreeMap<String, Control>>,
}

impl fmt::Debug for Deck {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Deck {} [{} keys]", self.layout.deck, self.keys.len())
    }
}

impl Deck {
    /// Validate `layout`, build its controls and declare its variables in `store`
    pub fn new(layout: DeckLayout, store: &VariableStore) -> ConfigResult<Self> {
        layout.validate()?;
        for (name, spec) in &layout.variables {
            store.declare(name, spec);
        }
        let mut controls = BTreeMap::new();
        for config in &layout.controls {
            let control = Control::from_config(config, &layout.settings)?;
            for name in control.bound_variables() {
                store.reference(name);
            }
            controls.insert(config.id.clone(), control);
        }
        Ok(Self {
            keys: layout.key_names(),
            layout,
            controls: Mutex::new(controls),
        })
    }

    /// Deck name
    pub fn name(&self) -> &str {
        &self.layout.deck
    }

    /// The layout it was built from
    pub fn layout(&self) -> &DeckLayout {
        &self.layout
    }

    /// Every key kept in sync, in layout order
    pub fn keys(&self) -> &[String] {
        &self.keys
    }

    /// Run `f` on the control of `key`
    pub fn with_control<R>(&self, key: &str, f: impl FnOnce(&mut Control) -> R) -> Option<R> {
        self.lock().get_mut(key).map(f)
    }

    /// Union of the variables bound by the controls
    pub fn bound_variables(&self) -> Vec<String> {
        let mut names: Vec<String> = Vec::new();
        for control in self.lock().values() {
            for name in control.bound_variables() {
                if !names.contains(name) {
                    names.push(name.clone());
                }
            }
        }
        names
    }

    /// Drop the cached frames of every key, once the deck is gone
    pub(crate) fn release_frames(&self, renderer: &Renderer) {
        for key in &self.keys {
            renderer.release(&frame_owner(self.name(), key));
        }
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<String, Control>> {
        self.controls.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// What wakes a deck worker up
#[derive(Debug)]
pub(crate) enum WorkerEvent {
    Input { key: String, event: InputEvent },
    Tick,
    VariableChanged { name: String, value: Value },
    DispatchFailed {
        key: String,
        dispatch: Dispatch,
        error: SimulatorError,
    },
}

/// The server side of one deck on one connection.
pub struct DeviceSession {
    pub(crate) deck: String,
    pub(crate) connection: ConnectionId,
    pub(crate) inbox: Sender<WorkerEvent>,
    pub(crate) outgoing: Sender<ServerMessage>,
    pub(crate) tasks: Vec<Box<dyn JoinHandle>>,
    pub(crate) subscriptions: Vec<SubscriptionId>,
}

impl fmt::Debug for DeviceSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DeviceSession {} on {}", self.deck, self.connection)
    }
}

impl DeviceSession {
    /// Deck name
    pub fn deck(&self) -> &str {
        &self.deck
    }

    /// Connection carrying the deck
    pub fn connection(&self) -> ConnectionId {
        self.connection
    }

    /// Cancel the worker, ticker and dispatcher and drop the store subscriptions.
    pub(crate) fn stop(mut self, store: &VariableStore) {
        debug!("Stopping session of {} on {}", self.deck, self.connection);
        for id in self.subscriptions.drain(..) {
            store.unsubscribe(id);
        }
        self.inbox.close();
        for task in &mut self.tasks {
            task.abort();
        }
    }
}

/// Feeds one deck: applies events to its controls and pushes changed frames.
pub(crate) struct Worker {
    pub(crate) deck: Arc<Deck>,
    pub(crate) connection: ConnectionId,
    pub(crate) store: Arc<VariableStore>,
    pub(crate) renderer: Arc<Renderer>,
    pub(crate) outgoing: Sender<ServerMessage>,
    pub(crate) dispatches: Sender<(String, Dispatch)>,
    pub(crate) keepalive_every: u32,
    pub(crate) ticks: u32,
    /// Fingerprint last sent per key; empty on a fresh session
    pub(crate) sent: HashMap<String, Fingerprint>,
}

impl Worker {
    pub(crate) async fn run(mut self, inbox: Receiver<WorkerEvent>) {
        debug!("Worker for {} started on {}", self.deck.name(), self.connection);
        // a fresh session knows nothing of what the deck shows: full resync
        if let Err(err) = self.sync().await {
            debug!("Worker for {} stopped: {}", self.deck.name(), err);
            return;
        }
        while let Ok(event) = inbox.recv().await {
            let keepalive = self.apply(event);
            if keepalive {
                trace!("Keepalive to {}", self.deck.name());
                let message = ServerMessage::Keepalive {
                    deck: self.deck.name().to_string(),
                };
                if self.outgoing.send(message).await.is_err() {
                    break;
                }
            }
            if let Err(err) = self.sync().await {
                debug!("Worker for {} stopped: {}", self.deck.name(), err);
                break;
            }
        }
        debug!("Worker for {} done", self.deck.name());
    }

    /// Apply one event to the controls; true when a keepalive is due
    fn apply(&mut self, event: WorkerEvent) -> bool {
        let now = Instant::now();
        let mut queued: Vec<(String, Dispatch)> = Vec::new();
        let mut keepalive = false;
        {
            let mut controls = self.deck.lock();
            match event {
                WorkerEvent::Input { key, event } => match controls.get_mut(&key) {
                    Some(control) => {
                        trace!("{} {}: {:?}", self.deck.name(), key, event);
                        for dispatch in control.handle(event, now) {
                            queued.push((key.clone(), dispatch));
                        }
                    }
                    None => debug!("No control on {} key {}", self.deck.name(), key),
                },
                WorkerEvent::Tick => {
                    for (key, control) in controls.iter_mut() {
                        for dispatch in control.tick(now, &self.store, self.renderer.operators()) {
                            queued.push((key.clone(), dispatch));
                        }
                    }
                    self.ticks += 1;
                    if self.ticks >= self.keepalive_every {
                        self.ticks = 0;
                        keepalive = true;
                    }
                }
                WorkerEvent::VariableChanged { name, value } => {
                    for control in controls.values_mut() {
                        if control.bound_variables().contains(&name) {
                            control.variable_changed(&name, &value);
                        }
                    }
                }
                WorkerEvent::DispatchFailed {
                    key,
                    dispatch,
                    error,
                } => {
                    if let Some(control) = controls.get_mut(&key) {
                        control.dispatch_failed(dispatch, error);
                    }
                }
            }
        }
        for request in queued {
            if self.dispatches.try_send(request).is_err() {
                warn!("Dispatcher of {} is gone", self.deck.name());
            }
        }
        keepalive
    }

    /// Frames whose fingerprint differs from the last one sent, in key order
    fn changed_frames(&mut self) -> Vec<ServerMessage> {
        let deck_name = self.deck.name().to_string();
        let key_size = self.deck.layout.settings.key_size;
        let mut messages = Vec::new();
        let mut controls = self.deck.lock();
        for key in &self.deck.keys {
            let owner = frame_owner(&deck_name, key);
            let frame = match controls.get_mut(key) {
                Some(control) => self.renderer.render(&owner, control, &self.store),
                None => self.renderer.blank(&owner, key_size),
            };
            let previous = self.sent.insert(key.clone(), frame.fingerprint);
            if previous == Some(frame.fingerprint) {
                continue;
            }
            let image = match (&frame.content, previous) {
                // a sound plays on change only
                (FrameContent::Sound(cue), Some(_)) => {
                    messages.push(ServerMessage::Sound {
                        deck: deck_name.clone(),
                        sound: cue.sound.clone(),
                        kind: cue.kind.clone(),
                    });
                    continue;
                }
                // on resync the key still shows whatever it had, wipe it
                (FrameContent::Sound(_), None) => self.renderer.blank(&owner, key_size).image(),
                _ => frame.image(),
            };
            if let Some(image) = image {
                messages.push(ServerMessage::Image {
                    deck: deck_name.clone(),
                    key: key.clone(),
                    image: image.to_payload(),
                });
            }
        }
        messages
    }

    async fn sync(&mut self) -> Result<(), NetworkError> {
        for message in self.changed_frames() {
            trace!("Pushing code {} to {}", message.code(), self.deck.name());
            self.outgoing
                .send(message)
                .await
                .map_err(|_| NetworkError::ChannelClosed(self.connection))?;
        }
        Ok(())
    }
}

/// Sends a tick every `period` until the worker goes away
pub(crate) async fn run_ticker(period: Duration, inbox: Sender<WorkerEvent>) {
    loop {
        async_std::task::sleep(period).await;
        if inbox.send(WorkerEvent::Tick).await.is_err() {
            break;
        }
    }
}

/// Executes dispatches one at a time, in order, reporting failures to the worker
pub(crate) async fn run_dispatcher(
    simulator: Arc<dyn Simulator>,
    store: Arc<VariableStore>,
    requests: Receiver<(String, Dispatch)>,
    inbox: Sender<WorkerEvent>,
) {
    while let Ok((key, dispatch)) = requests.recv().await {
        trace!("Dispatching {:?} for {}", dispatch, key);
        let result = match &dispatch {
            // cockpit-owned variables never reach the simulator
            Dispatch::Write(name, value) if VariableKind::of(name) != VariableKind::Simulator => {
                if store.write(name, value.clone()) {
                    Ok(())
                } else {
                    Err(SimulatorError::Rejected {
                        command: name.clone(),
                        reason: "variable is not writable".to_string(),
                    })
                }
            }
            _ => simulator::execute(simulator.as_ref(), &dispatch).await,
        };
        if let Err(error) = result {
            let failed = WorkerEvent::DispatchFailed {
                key,
                dispatch,
                error,
            };
            if inbox.send(failed).await.is_err() {
                break;
            }
        }
    }
}
