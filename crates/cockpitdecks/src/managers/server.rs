use std::{
    collections::HashMap,
    fmt,
    marker::PhantomData,
    sync::{
        Arc,
        atomic::{AtomicU32, Ordering},
    },
    time::Duration,
};

use async_channel::{Receiver, Sender, bounded, unbounded};
use cockpitdecks_common::{ConnectionId, DeviceMessage, ServerMessage, error::NetworkError};
use dashmap::DashMap;
use futures_lite::StreamExt;
use tracing::{debug, error, info, trace, warn};

use super::{
    NetworkProvider,
    session::{Deck, DeviceSession, Worker, WorkerEvent, run_dispatcher, run_ticker},
};
use crate::activation::InputEvent;
use crate::config::{CockpitSettings, DeckLayout};
use crate::error::ConfigResult;
use crate::formula::OperatorTable;
use crate::render::{FrameCache, IconLibrary, IconSet, Renderer};
use crate::runtime::{JoinHandle, Runtime, run_async};
use crate::simulator::Simulator;
use crate::variables::{VariablePoller, VariableStore};

/// The collaborators shared by every deck: variables, simulator and renderer.
pub struct Cockpit {
    store: Arc<VariableStore>,
    simulator: Arc<dyn Simulator>,
    renderer: Arc<Renderer>,
    settings: CockpitSettings,
}

impl fmt::Debug for Cockpit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cockpit")
            .field("store", &self.store)
            .field("renderer", &self.renderer)
            .field("settings", &self.settings)
            .finish()
    }
}

impl Cockpit {
    /// A cockpit with the builtin operators and an empty icon set
    pub fn new(
        store: Arc<VariableStore>,
        simulator: Arc<dyn Simulator>,
        settings: CockpitSettings,
    ) -> Self {
        let renderer = Renderer::new(
            Arc::new(FrameCache::new(settings.frame_cache_per_control)),
            Arc::new(IconSet::new()),
            Arc::new(OperatorTable::default()),
        );
        Self {
            store,
            simulator,
            renderer: Arc::new(renderer),
            settings,
        }
    }

    /// Draw icons from `icons`
    pub fn with_icons(mut self, icons: Arc<dyn IconLibrary>) -> Self {
        self.renderer = Arc::new(Renderer::new(
            Arc::new(FrameCache::new(self.settings.frame_cache_per_control)),
            icons,
            Arc::new(OperatorTable::default()),
        ));
        self
    }

    /// Use a renderer built elsewhere, with custom operators for instance
    pub fn with_renderer(mut self, renderer: Arc<Renderer>) -> Self {
        self.renderer = renderer;
        self
    }

    /// The variable store
    pub fn store(&self) -> &Arc<VariableStore> {
        &self.store
    }

    /// The renderer and its frame cache
    pub fn renderer(&self) -> &Arc<Renderer> {
        &self.renderer
    }
}

/// Something that happened to a connection or a deck
#[derive(Debug)]
pub enum ServerEvent {
    /// A new connection was accepted or established
    Connected(ConnectionId),
    /// A connection went away
    Disconnected(ConnectionId),
    /// A deck completed its handshake
    DeckRegistered {
        /// Deck name
        deck: String,
        /// Connection carrying it
        connection: ConnectionId,
    },
    /// A deck session ended
    DeckClosed {
        /// Deck name
        deck: String,
        /// Connection that carried it
        connection: ConnectionId,
    },
    /// A network operation failed
    Error(NetworkError),
}

/// A live deck session
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SessionInfo {
    /// Deck name
    pub deck: String,
    /// Connection carrying it
    pub connection: ConnectionId,
}

struct Connection {
    receive_task: Box<dyn JoinHandle>,
    route_task: Box<dyn JoinHandle>,
    send_task: Box<dyn JoinHandle>,
    send_message: Sender<ServerMessage>,
}

impl Connection {
    fn stop(mut self) {
        self.receive_task.abort();
        self.send_task.abort();
        self.route_task.abort();
        self.send_message.close();
    }
}

struct Shared<RT: Runtime> {
    runtime: Arc<RT>,
    cockpit: Cockpit,
    decks: DashMap<String, Arc<Deck>>,
    connections: DashMap<ConnectionId, Connection>,
    sessions: DashMap<String, DeviceSession>,
    events: Sender<ServerEvent>,
    events_receiver: Receiver<ServerEvent>,
    /// Id 0 is reserved for the server
    next_connection: AtomicU32,
}

impl<RT: Runtime> Shared<RT> {
    fn emit(&self, event: ServerEvent) {
        if self.events.try_send(event).is_err() {
            error!("Server event channel is closed");
        }
    }

    /// Start the tasks of a new connection
    fn attach<NP: NetworkProvider>(self: &Arc<Self>, socket: NP::Socket, settings: NP::NetworkSettings) {
        let id = self.next_connection.fetch_add(1, Ordering::Relaxed);
        let conn_id = ConnectionId { id };

        let (read_half, write_half) = NP::split(socket);
        let read_settings = settings.clone();
        let write_settings = settings.clone();

        // Bounded so a stalled deck cannot grow memory without limit
        let (outgoing_tx, outgoing_rx) = bounded(NP::channel_capacity(&settings));
        let (incoming_tx, incoming_rx) = unbounded::<DeviceMessage>();
        // routing waits until the connection is registered
        let (ready_tx, ready_rx) = bounded::<()>(1);

        let receive_task = run_async(
            async move {
                trace!("Starting receive task for {}", id);
                NP::recv_loop(read_half, incoming_tx, read_settings).await;
                trace!("Receive task for {} done", id);
            },
            self.runtime.as_ref(),
        );

        let shared = self.clone();
        let outgoing = outgoing_tx.clone();
        let route_task = run_async(
            async move {
                if ready_rx.recv().await.is_err() {
                    return;
                }
                while let Ok(message) = incoming_rx.recv().await {
                    shared.route(conn_id, message, &outgoing);
                }
                shared.connection_closed(conn_id);
            },
            self.runtime.as_ref(),
        );

        let send_task = run_async(
            async move {
                trace!("Starting send task for {}", id);
                NP::send_loop(write_half, outgoing_rx, write_settings).await;
            },
            self.runtime.as_ref(),
        );

        self.connections.insert(
            conn_id,
            Connection {
                receive_task,
                route_task,
                send_task,
                send_message: outgoing_tx,
            },
        );
        if ready_tx.try_send(()).is_err() {
            error!("Routing task of {} is gone", conn_id);
        }
        info!("New {} connection: {}", NP::PROVIDER_NAME, conn_id);
        self.emit(ServerEvent::Connected(conn_id));
    }

    fn route(self: &Arc<Self>, connection: ConnectionId, message: DeviceMessage, outgoing: &Sender<ServerMessage>) {
        match message {
            DeviceMessage::Handshake { deck } => self.open_session(deck, connection, outgoing.clone()),
            DeviceMessage::Event {
                deck,
                key,
                event,
                data,
            } => {
                let Some(input) = InputEvent::from_device(event, &data) else {
                    debug!("Dropping event {:?} from {} key {}", event, deck, key);
                    return;
                };
                match self.sessions.get(&deck) {
                    Some(session) if session.connection == connection => {
                        if session.inbox.try_send(WorkerEvent::Input { key, event: input }).is_err() {
                            warn!("Worker of {} is gone", deck);
                        }
                    }
                    Some(_) => warn!("{} is not registered on {}", deck, connection),
                    None => warn!("Event for {} before its handshake", deck),
                }
            }
            DeviceMessage::Close { deck } => {
                debug!("{} closing {}", deck, connection);
                self.close_sessions(connection);
            }
            DeviceMessage::Keepalive { deck } => trace!("Keepalive reply from {:?}", deck),
        }
    }

    fn open_session(self: &Arc<Self>, name: String, connection: ConnectionId, outgoing: Sender<ServerMessage>) {
        let Some(deck) = self.decks.get(&name).map(|deck| deck.clone()) else {
            warn!("Handshake from unknown deck {} on {}", name, connection);
            self.emit(ServerEvent::Error(NetworkError::DeckNotFound(name)));
            return;
        };
        // the new channel is authoritative
        self.close_session(&name);

        let store = self.cockpit.store.clone();
        let (inbox_tx, inbox_rx) = unbounded();
        let (dispatch_tx, dispatch_rx) = unbounded();

        let subscriptions = deck
            .bound_variables()
            .into_iter()
            .map(|variable| {
                let inbox = inbox_tx.clone();
                store.subscribe(&variable, move |name, value| {
                    let _ = inbox.try_send(WorkerEvent::VariableChanged {
                        name: name.to_string(),
                        value: value.clone(),
                    });
                })
            })
            .collect();

        let settings = &deck.layout().settings;
        let tick_period = settings.tick_period.max(Duration::from_millis(1));
        let keepalive_every =
            (self.cockpit.settings.keepalive_interval.as_millis() / tick_period.as_millis()).max(1);

        let worker = Worker {
            deck: deck.clone(),
            connection,
            store: store.clone(),
            renderer: self.cockpit.renderer.clone(),
            outgoing: outgoing.clone(),
            dispatches: dispatch_tx,
            keepalive_every: u32::try_from(keepalive_every).unwrap_or(u32::MAX),
            ticks: 0,
            sent: HashMap::new(),
        };
        let tasks = vec![
            run_async(worker.run(inbox_rx), self.runtime.as_ref()),
            run_async(run_ticker(tick_period, inbox_tx.clone()), self.runtime.as_ref()),
            run_async(
                run_dispatcher(
                    self.cockpit.simulator.clone(),
                    store,
                    dispatch_rx,
                    inbox_tx.clone(),
                ),
                self.runtime.as_ref(),
            ),
        ];

        self.sessions.insert(
            name.clone(),
            DeviceSession {
                deck: name.clone(),
                connection,
                inbox: inbox_tx,
                outgoing,
                tasks,
                subscriptions,
            },
        );
        info!("Deck {} registered on {}", name, connection);
        self.emit(ServerEvent::DeckRegistered {
            deck: name,
            connection,
        });
    }

    fn close_session(&self, name: &str) {
        if let Some((_, session)) = self.sessions.remove(name) {
            let connection = session.connection;
            session.stop(&self.cockpit.store);
            self.emit(ServerEvent::DeckClosed {
                deck: name.to_string(),
                connection,
            });
        }
    }

    fn close_sessions(&self, connection: ConnectionId) {
        let names: Vec<String> = self
            .sessions
            .iter()
            .filter(|session| session.connection == connection)
            .map(|session| session.key().clone())
            .collect();
        for name in names {
            self.close_session(&name);
        }
    }

    fn connection_closed(&self, connection: ConnectionId) {
        self.close_sessions(connection);
        if let Some((_, conn)) = self.connections.remove(&connection) {
            conn.stop();
            info!("{} disconnected", connection);
            self.emit(ServerEvent::Disconnected(connection));
        }
    }
}

/// Accepts deck connections and keeps every registered deck in sync.
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use bevy::tasks::TaskPoolBuilder;
/// use cockpitdecks::{
///     config::{CockpitSettings, DeckLayout},
///     managers::{Cockpit, DeviceServer},
///     simulator::RecordingSimulator,
///     tcp::{NetworkSettings, TcpProvider},
///     variables,
/// };
///
/// let runtime = Arc::new(TaskPoolBuilder::new().num_threads(2).build());
/// let cockpit = Cockpit::new(
///     variables::initialize(),
///     Arc::new(RecordingSimulator::default()),
///     CockpitSettings::default(),
/// );
/// let mut server: DeviceServer<TcpProvider> = DeviceServer::new(runtime, cockpit);
/// server.add_deck(DeckLayout { deck: "left".into(), ..Default::default() }).unwrap();
/// server
///     .listen("127.0.0.1:7700".parse().unwrap(), &NetworkSettings::default())
///     .unwrap();
/// ```
pub struct DeviceServer<NP: NetworkProvider, RT: Runtime = bevy::tasks::TaskPool> {
    shared: Arc<Shared<RT>>,
    server_handle: Option<Box<dyn JoinHandle>>,
    poller_handle: Option<Box<dyn JoinHandle>>,
    connection_tasks: Arc<DashMap<u32, Box<dyn JoinHandle>>>,
    connection_task_counts: AtomicU32,
    provider: PhantomData<NP>,
}

impl<NP: NetworkProvider, RT: Runtime> fmt::Debug for DeviceServer<NP, RT> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "DeviceServer<{}> [{} connections, {} sessions]",
            NP::PROVIDER_NAME,
            self.shared.connections.len(),
            self.shared.sessions.len()
        )
    }
}

impl<NP: NetworkProvider, RT: Runtime> DeviceServer<NP, RT> {
    /// A server spawning its tasks on `runtime`
    pub fn new(runtime: Arc<RT>, cockpit: Cockpit) -> Self {
        let (events, events_receiver) = unbounded();
        Self {
            shared: Arc::new(Shared {
                runtime,
                cockpit,
                decks: DashMap::new(),
                connections: DashMap::new(),
                sessions: DashMap::new(),
                events,
                events_receiver,
                next_connection: AtomicU32::new(ConnectionId::SERVER.id + 1),
            }),
            server_handle: None,
            poller_handle: None,
            connection_tasks: Arc::new(DashMap::new()),
            connection_task_counts: AtomicU32::new(0),
            provider: PhantomData,
        }
    }

    /// Shared collaborators
    pub fn cockpit(&self) -> &Cockpit {
        &self.shared.cockpit
    }

    /// Register or replace a deck layout.
    ///
    /// A deck connected under the old layout is asked to reload (code 8) and
    /// its session ends; it gets the new controls on its next handshake.
    pub fn add_deck(&self, layout: DeckLayout) -> ConfigResult<()> {
        let deck = Deck::new(layout, &self.shared.cockpit.store)?;
        let name = deck.name().to_string();
        debug!("Deck {} has {} keys", name, deck.keys().len());
        if let Some(old) = self.shared.decks.insert(name.clone(), Arc::new(deck)) {
            if let Some(session) = self.shared.sessions.get(&name) {
                let reload = ServerMessage::Reload { deck: name.clone() };
                if session.outgoing.try_send(reload).is_err() {
                    warn!("Could not ask {} to reload", name);
                }
            }
            self.shared.close_session(&name);
            old.release_frames(&self.shared.cockpit.renderer);
        }
        Ok(())
    }

    /// Forget a deck layout, ending its session and dropping its cached frames
    pub fn remove_deck(&self, name: &str) -> Result<(), NetworkError> {
        let (_, deck) = self
            .shared
            .decks
            .remove(name)
            .ok_or_else(|| NetworkError::DeckNotFound(name.to_string()))?;
        self.shared.close_session(name);
        deck.release_frames(&self.shared.cockpit.renderer);
        info!("Deck {} removed", name);
        Ok(())
    }

    /// A registered deck
    pub fn deck(&self, name: &str) -> Option<Arc<Deck>> {
        self.shared.decks.get(name).map(|deck| deck.clone())
    }

    /// Start listening for new decks
    ///
    /// ## Note
    /// If you are already listening for new connections, this will cancel the original listen
    pub fn listen(
        &mut self,
        accept_info: NP::AcceptInfo,
        network_settings: &NP::NetworkSettings,
    ) -> Result<(), NetworkError> {
        self.stop_listening();

        let shared = self.shared.clone();
        let settings = network_settings.clone();

        info!("Listening for {} decks", NP::PROVIDER_NAME);

        self.server_handle = Some(run_async(
            async move {
                match NP::accept_loop(accept_info, settings.clone()).await {
                    Ok(mut listen_stream) => {
                        while let Some(socket) = listen_stream.next().await {
                            shared.attach::<NP>(socket, settings.clone());
                        }
                        debug!("{} accept loop ended", NP::PROVIDER_NAME);
                    }
                    Err(err) => {
                        error!("Could not listen: {}", err);
                        shared.emit(ServerEvent::Error(err));
                    }
                }
            },
            self.shared.runtime.as_ref(),
        ));

        Ok(())
    }

    /// Connect to a deck bridge that listens itself
    pub fn connect(&self, connect_info: NP::ConnectInfo, network_settings: &NP::NetworkSettings) {
        debug!("Starting {} connection", NP::PROVIDER_NAME);

        let shared = self.shared.clone();
        let settings = network_settings.clone();
        let connection_task_weak = Arc::downgrade(&self.connection_tasks);
        let task_count = self.connection_task_counts.fetch_add(1, Ordering::SeqCst);

        self.connection_tasks.insert(
            task_count,
            run_async(
                async move {
                    match NP::connect_task(connect_info, settings.clone()).await {
                        Ok(socket) => shared.attach::<NP>(socket, settings),
                        Err(err) => {
                            error!("Could not connect: {}", err);
                            shared.emit(ServerEvent::Error(err));
                        }
                    }

                    if let Some(tasks) = connection_task_weak.upgrade() {
                        tasks.remove(&task_count);
                    }
                },
                self.shared.runtime.as_ref(),
            ),
        );
    }

    /// Read variables with a fetch period from the simulator, checking every `resolution`
    pub fn start_polling(&mut self, resolution: Duration) {
        if let Some(mut handle) = self.poller_handle.take() {
            handle.abort();
        }
        let poller = VariablePoller::new(
            self.shared.cockpit.store.clone(),
            self.shared.cockpit.simulator.clone(),
            resolution,
        );
        self.poller_handle = Some(run_async(poller.run(), self.shared.runtime.as_ref()));
    }

    /// Ask a deck to reload its whole layout (code 8)
    pub fn reload(&self, deck: &str) -> Result<(), NetworkError> {
        let session = self
            .shared
            .sessions
            .get(deck)
            .ok_or_else(|| NetworkError::DeckNotFound(deck.to_string()))?;
        session
            .outgoing
            .try_send(ServerMessage::Reload {
                deck: deck.to_string(),
            })
            .map_err(|_| NetworkError::ChannelClosed(session.connection))
    }

    /// Live deck sessions
    pub fn sessions(&self) -> Vec<SessionInfo> {
        self.shared
            .sessions
            .iter()
            .map(|session| SessionInfo {
                deck: session.deck.clone(),
                connection: session.connection,
            })
            .collect()
    }

    /// Number of open connections
    pub fn connection_count(&self) -> usize {
        self.shared.connections.len()
    }

    /// Connection and deck events, in order
    pub fn events(&self) -> Receiver<ServerEvent> {
        self.shared.events_receiver.clone()
    }

    /// Close a connection and every deck session it carries
    pub fn disconnect(&self, conn_id: ConnectionId) -> Result<(), NetworkError> {
        if !self.shared.connections.contains_key(&conn_id) {
            return Err(NetworkError::ConnectionNotFound(conn_id));
        }
        self.shared.connection_closed(conn_id);
        Ok(())
    }

    fn stop_listening(&mut self) {
        if let Some(mut handle) = self.server_handle.take() {
            handle.abort();
        }
    }

    /// Stop listening and disconnect every deck
    ///
    /// ## Notes
    /// This operation is idempotent
    pub fn stop(&mut self) {
        self.stop_listening();
        if let Some(mut handle) = self.poller_handle.take() {
            handle.abort();
        }
        self.connection_tasks.clear();
        let connections: Vec<ConnectionId> =
            self.shared.connections.iter().map(|c| *c.key()).collect();
        for connection in connections {
            self.shared.connection_closed(connection);
        }
    }
}

impl<NP: NetworkProvider, RT: Runtime> Drop for DeviceServer<NP, RT> {
    fn drop(&mut self) {
        self.stop();
    }
}
