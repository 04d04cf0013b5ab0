//! Session manager owning the single live registry client.
//!
//! Every configuration epoch gets its own [`Epoch`] record. The "current"
//! epoch lives in a `watch` slot and is only ever replaced with a
//! compare-and-swap keyed on the previous value, so two racing
//! configuration changes cannot both install a client: the loser discards
//! its epoch before building anything.
//!
//! All builds, teardowns and listener dispatches run on one background
//! worker task, strictly one step at a time. Callers only enqueue
//! commands, which makes it safe for a listener to ask for a rebuild from
//! inside its own callback.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn};

use crate::client::{
    ClientEvent, ConnectionState, Connector, CoordinationClient, EventSink, RegistryHandle,
    TaggedEvent,
};
use crate::config::ConnectionConfig;
use crate::error::{CoordinationError, CoordinationResult};
use crate::metrics;

/// How long [`SessionManager::deactivate`] waits for the worker to finish.
const WORKER_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

/// Lifecycle of the manager as seen by dependents.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No valid configuration has been applied yet.
    Unstarted,
    /// A client is being built or has not connected yet.
    Starting,
    /// The current client serves requests.
    Connected,
    /// The client was lost, gave up, or retries are exhausted.
    Degraded,
    /// The manager was deactivated.
    Closed,
}

/// Handle returned by [`SessionManager::add_listener`].
pub type ListenerId = u64;

type Listener<T> = Arc<dyn Fn(&Arc<T>, ConnectionState) + Send + Sync>;

struct Registered<T> {
    id: ListenerId,
    listener: Listener<T>,
    /// Cleared by the first dispatch or greeting that reaches the listener.
    fresh: AtomicBool,
}

impl<T> Registered<T> {
    fn notify(&self, client: &Arc<T>, state: ConnectionState) {
        self.fresh.store(false, Ordering::SeqCst);
        if catch_unwind(AssertUnwindSafe(|| (self.listener)(client, state))).is_err() {
            error!(listener = self.id, %state, "connection state listener panicked");
        }
    }
}

/// Copy-on-write listener list; dispatch iterates a stable snapshot.
struct Listeners<T> {
    next_id: AtomicU64,
    entries: RwLock<Arc<Vec<Arc<Registered<T>>>>>,
}

impl<T> Listeners<T> {
    fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            entries: RwLock::new(Arc::new(Vec::new())),
        }
    }

    fn add(&self, listener: Listener<T>) -> ListenerId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let mut entries = self.entries.write();
        let mut next = Vec::with_capacity(entries.len() + 1);
        next.extend(entries.iter().cloned());
        next.push(Arc::new(Registered {
            id,
            listener,
            fresh: AtomicBool::new(true),
        }));
        *entries = Arc::new(next);
        id
    }

    fn remove(&self, id: ListenerId) -> bool {
        let mut entries = self.entries.write();
        if !entries.iter().any(|entry| entry.id == id) {
            return false;
        }
        let next = entries
            .iter()
            .filter(|entry| entry.id != id)
            .cloned()
            .collect();
        *entries = Arc::new(next);
        true
    }

    fn snapshot(&self) -> Arc<Vec<Arc<Registered<T>>>> {
        Arc::clone(&self.entries.read())
    }

    fn get(&self, id: ListenerId) -> Option<Arc<Registered<T>>> {
        self.entries
            .read()
            .iter()
            .find(|entry| entry.id == id)
            .cloned()
    }
}

/// Per-configuration state. Only the worker touches `client`.
struct Epoch<T> {
    config: ConnectionConfig,
    closed: AtomicBool,
    retry_count: AtomicU32,
    /// Generation of the installed client, 0 when none.
    generation: AtomicU64,
    client: RwLock<Option<Arc<T>>>,
    published: AtomicBool,
    ever_connected: AtomicBool,
    gave_up: AtomicBool,
    last_state: Mutex<Option<ConnectionState>>,
}

impl<T> Epoch<T> {
    fn new(config: ConnectionConfig) -> Self {
        Self {
            config,
            closed: AtomicBool::new(false),
            retry_count: AtomicU32::new(0),
            generation: AtomicU64::new(0),
            client: RwLock::new(None),
            published: AtomicBool::new(false),
            ever_connected: AtomicBool::new(false),
            gave_up: AtomicBool::new(false),
            last_state: Mutex::new(None),
        }
    }

    fn client(&self) -> Option<Arc<T>> {
        self.client.read().clone()
    }

    fn set_state(&self, state: ConnectionState) {
        *self.last_state.lock() = Some(state);
        metrics::SESSION_CONNECTION_STATE.set(state.as_gauge());
    }

    fn last_state(&self) -> Option<ConnectionState> {
        *self.last_state.lock()
    }
}

/// Per-manager counters, mostly useful to tests and diagnostics.
#[derive(Debug, Default)]
pub struct SessionStats {
    builds: AtomicU64,
    publications: AtomicU64,
    retries: AtomicU64,
}

impl SessionStats {
    /// Clients successfully built.
    pub fn builds(&self) -> u64 {
        self.builds.load(Ordering::Relaxed)
    }

    /// Times a client was published as available.
    pub fn publications(&self) -> u64 {
        self.publications.load(Ordering::Relaxed)
    }

    /// Rebuild retries after host-resolution failures.
    pub fn retries(&self) -> u64 {
        self.retries.load(Ordering::Relaxed)
    }
}

enum Command<T> {
    Build(Arc<Epoch<T>>),
    Rebuild,
    /// Synthetic `CONNECTED` for a newly registered listener.
    Greet(ListenerId),
    Retire {
        epoch: Arc<Epoch<T>>,
        next: Option<Arc<Epoch<T>>>,
        done: oneshot::Sender<()>,
    },
    Shutdown,
}

struct Shared<C: Connector> {
    connector: C,
    current: watch::Sender<Option<Arc<Epoch<C::Client>>>>,
    listeners: Listeners<C::Client>,
    availability: watch::Sender<Option<u64>>,
    next_generation: AtomicU64,
    stats: SessionStats,
    events_tx: mpsc::UnboundedSender<TaggedEvent>,
}

impl<C: Connector> Shared<C> {
    fn current(&self) -> Option<Arc<Epoch<C::Client>>> {
        self.current.borrow().clone()
    }

    fn dispatch(&self, client: &Arc<C::Client>, state: ConnectionState) {
        for entry in self.listeners.snapshot().iter() {
            entry.notify(client, state);
        }
    }
}

struct Inner<C: Connector> {
    shared: Arc<Shared<C>>,
    commands: mpsc::UnboundedSender<Command<C::Client>>,
    worker: Mutex<Option<JoinHandle<()>>>,
    closed: AtomicBool,
}

/// Owns exactly one live registry client at a time.
///
/// Cheap to clone; all clones drive the same worker.
pub struct SessionManager<C: Connector> {
    inner: Arc<Inner<C>>,
}

impl<C: Connector> Clone for SessionManager<C> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<C: Connector> SessionManager<C> {
    /// Create an unstarted manager and spawn its worker.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(connector: C) -> Self {
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (current, _) = watch::channel(None);
        let (availability, _) = watch::channel(None);
        let shared = Arc::new(Shared {
            connector,
            current,
            listeners: Listeners::new(),
            availability,
            next_generation: AtomicU64::new(0),
            stats: SessionStats::default(),
            events_tx,
        });
        let worker = Worker {
            shared: Arc::clone(&shared),
            commands: commands_rx,
            events: events_rx,
        };
        let handle = tokio::spawn(worker.run());
        Self {
            inner: Arc::new(Inner {
                shared,
                commands: commands_tx,
                worker: Mutex::new(Some(handle)),
                closed: AtomicBool::new(false),
            }),
        }
    }

    /// Apply the first configuration and start building a client.
    ///
    /// Invalid configuration is reported here and leaves the manager
    /// [`SessionState::Unstarted`]. Activating an already active manager
    /// is a no-op; use [`update_config`](Self::update_config) to change it.
    pub fn activate(&self, config: ConnectionConfig) -> CoordinationResult<()> {
        config.validate()?;
        self.ensure_open()?;
        let next = Arc::new(Epoch::new(config));
        let installed = self.inner.shared.current.send_if_modified(|current| {
            if current.is_none() {
                *current = Some(Arc::clone(&next));
                true
            } else {
                false
            }
        });
        if installed {
            info!(servers = ?next.config.servers, "activating registry session");
            self.send(Command::Build(next));
        } else {
            debug!("registry session already active, ignoring activation");
        }
        Ok(())
    }

    /// Hot-swap the configuration.
    ///
    /// Returns `Ok(false)` when nothing changed or when a concurrent change
    /// won the swap. On a real change the previous client is retired
    /// (dependents see LOST, availability is retracted, the client is
    /// stopped) before this returns; the new client is built afterwards on
    /// the worker.
    pub async fn update_config(&self, config: ConnectionConfig) -> CoordinationResult<bool> {
        config.validate()?;
        self.ensure_open()?;
        let prev = self.inner.shared.current();
        if prev.as_ref().map(|epoch| &epoch.config) == Some(&config) {
            debug!("registry configuration unchanged");
            return Ok(false);
        }

        let next = Arc::new(Epoch::new(config));
        let swapped = self.inner.shared.current.send_if_modified(|current| {
            let same = match (current.as_ref(), prev.as_ref()) {
                (None, None) => true,
                (Some(a), Some(b)) => Arc::ptr_eq(a, b),
                _ => false,
            };
            if same {
                *current = Some(Arc::clone(&next));
            }
            same
        });
        if !swapped {
            next.closed.store(true, Ordering::SeqCst);
            debug!("concurrent registry configuration change won, discarding ours");
            return Ok(false);
        }

        info!(servers = ?next.config.servers, "registry configuration changed");
        match prev {
            Some(prev) => {
                prev.closed.store(true, Ordering::SeqCst);
                self.retire_and_wait(prev, Some(next)).await;
            }
            None => self.send(Command::Build(next)),
        }
        Ok(true)
    }

    /// Retire the current client and stop the worker.
    pub async fn deactivate(&self) {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(prev) = self.inner.shared.current.send_replace(None) {
            prev.closed.store(true, Ordering::SeqCst);
            self.retire_and_wait(prev, None).await;
        }
        self.send(Command::Shutdown);

        let handle = self.inner.worker.lock().take();
        if let Some(handle) = handle {
            match tokio::time::timeout(WORKER_SHUTDOWN_TIMEOUT, handle).await {
                Err(_) => warn!("timed out waiting for registry session worker"),
                Ok(Err(err)) => error!(?err, "registry session worker failed"),
                Ok(Ok(())) => {}
            }
        }
        info!("registry session closed");
    }

    /// Ask the worker to tear down and rebuild the current client.
    ///
    /// Only enqueues; safe to call from a state listener.
    pub fn request_rebuild(&self) {
        self.send(Command::Rebuild);
    }

    /// The live client, if any.
    pub fn current_client(&self) -> Option<Arc<C::Client>> {
        self.inner.shared.current()?.client()
    }

    /// The live client, or [`CoordinationError::NotConnected`].
    pub fn client(&self) -> CoordinationResult<Arc<C::Client>> {
        self.current_client().ok_or_else(|| {
            CoordinationError::NotConnected("no registry client available".into())
        })
    }

    /// Configuration of the current epoch.
    pub fn config(&self) -> Option<ConnectionConfig> {
        self.inner
            .shared
            .current()
            .map(|epoch| epoch.config.clone())
    }

    /// Register a durable state observer.
    ///
    /// If a connected client exists the listener receives one synthetic
    /// `CONNECTED`, dispatched on the worker like every other transition,
    /// so it is never delivered after that client's `LOST`.
    pub fn add_listener<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&Arc<C::Client>, ConnectionState) + Send + Sync + 'static,
    {
        let id = self.inner.shared.listeners.add(Arc::new(listener));
        self.send(Command::Greet(id));
        id
    }

    /// Deregister a listener. Returns false if it was not registered.
    pub fn remove_listener(&self, id: ListenerId) -> bool {
        self.inner.shared.listeners.remove(id)
    }

    /// `Some(generation)` while a client is published, `None` otherwise.
    pub fn availability(&self) -> watch::Receiver<Option<u64>> {
        self.inner.shared.availability.subscribe()
    }

    pub fn state(&self) -> SessionState {
        if self.inner.closed.load(Ordering::SeqCst) {
            return SessionState::Closed;
        }
        let Some(epoch) = self.inner.shared.current() else {
            return SessionState::Unstarted;
        };
        match epoch.last_state() {
            Some(state) if state.is_connected() => SessionState::Connected,
            None | Some(ConnectionState::Connecting)
                if !epoch.ever_connected.load(Ordering::SeqCst)
                    && !epoch.gave_up.load(Ordering::SeqCst) =>
            {
                SessionState::Starting
            }
            _ => SessionState::Degraded,
        }
    }

    /// Last connection state reported by the current client.
    pub fn connection_state(&self) -> Option<ConnectionState> {
        self.inner.shared.current()?.last_state()
    }

    pub fn stats(&self) -> &SessionStats {
        &self.inner.shared.stats
    }

    fn ensure_open(&self) -> CoordinationResult<()> {
        if self.inner.closed.load(Ordering::SeqCst) {
            return Err(CoordinationError::Config(
                "registry session manager is closed".into(),
            ));
        }
        Ok(())
    }

    fn send(&self, command: Command<C::Client>) {
        if self.inner.commands.send(command).is_err() {
            warn!("registry session worker is not running");
        }
    }

    async fn retire_and_wait(
        &self,
        epoch: Arc<Epoch<C::Client>>,
        next: Option<Arc<Epoch<C::Client>>>,
    ) {
        let (done, wait) = oneshot::channel();
        self.send(Command::Retire { epoch, next, done });
        if wait.await.is_err() {
            warn!("registry session worker exited before teardown completed");
        }
    }
}

impl<C: Connector> std::fmt::Debug for SessionManager<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionManager")
            .field("state", &self.state())
            .field("config", &self.config())
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl<C> RegistryHandle for SessionManager<C>
where
    C: Connector,
    C::Client: RegistryHandle,
{
    async fn exists(&self, path: &str) -> CoordinationResult<bool> {
        self.client()?.exists(path).await
    }

    async fn children(&self, path: &str) -> CoordinationResult<Vec<String>> {
        self.client()?.children(path).await
    }

    async fn read_data(&self, path: &str) -> CoordinationResult<Vec<u8>> {
        self.client()?.read_data(path).await
    }
}

struct Worker<C: Connector> {
    shared: Arc<Shared<C>>,
    commands: mpsc::UnboundedReceiver<Command<C::Client>>,
    events: mpsc::UnboundedReceiver<TaggedEvent>,
}

impl<C: Connector> Worker<C> {
    async fn run(mut self) {
        loop {
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(Command::Shutdown) | None => break,
                    Some(command) => self.handle_command(command).await,
                },
                Some(tagged) = self.events.recv() => self.handle_event(tagged).await,
            }
        }
        debug!("registry session worker stopping");
    }

    async fn handle_command(&self, command: Command<C::Client>) {
        match command {
            Command::Build(epoch) => self.rebuild(&epoch).await,
            Command::Rebuild => {
                if let Some(epoch) = self.shared.current() {
                    self.rebuild(&epoch).await;
                }
            }
            Command::Greet(id) => self.greet(id),
            Command::Retire { epoch, next, done } => {
                self.retire(&epoch).await;
                let _ = done.send(());
                if let Some(next) = next {
                    self.rebuild(&next).await;
                }
            }
            Command::Shutdown => {}
        }
    }

    /// Tell a new listener about the current client if it is connected.
    /// Runs between transitions, so the epoch's last state is the one every
    /// other listener has already seen. A listener that already got a real
    /// transition is left alone.
    fn greet(&self, id: ListenerId) {
        let Some(entry) = self.shared.listeners.get(id) else {
            return;
        };
        let Some(epoch) = self.shared.current() else {
            return;
        };
        if epoch.closed.load(Ordering::SeqCst)
            || !epoch.last_state().is_some_and(|state| state.is_connected())
        {
            trace!(listener = id, "no connected client to report");
            return;
        }
        let Some(client) = epoch.client() else {
            return;
        };
        if client.is_connected() && entry.fresh.load(Ordering::SeqCst) {
            entry.notify(&client, ConnectionState::Connected);
        }
    }

    async fn handle_event(&self, tagged: TaggedEvent) {
        let Some(epoch) = self.shared.current() else {
            trace!(generation = tagged.generation, "no current epoch, event dropped");
            return;
        };
        if epoch.closed.load(Ordering::SeqCst)
            || epoch.generation.load(Ordering::SeqCst) != tagged.generation
        {
            trace!(generation = tagged.generation, "event from a retired client dropped");
            return;
        }
        let Some(client) = epoch.client() else {
            return;
        };

        match tagged.event {
            ClientEvent::State(state) => {
                debug!(
                    generation = tagged.generation,
                    %state,
                    "registry connection state changed"
                );
                epoch.set_state(state);
                if state.is_connected() {
                    epoch.retry_count.store(0, Ordering::SeqCst);
                    epoch.gave_up.store(false, Ordering::SeqCst);
                    epoch.ever_connected.store(true, Ordering::SeqCst);
                    if !epoch.published.swap(true, Ordering::SeqCst) {
                        self.shared
                            .availability
                            .send_replace(Some(tagged.generation));
                        self.shared
                            .stats
                            .publications
                            .fetch_add(1, Ordering::Relaxed);
                        info!(generation = tagged.generation, "registry client available");
                    }
                }
                self.shared.dispatch(&client, state);
                if state == ConnectionState::Lost {
                    metrics::SESSION_LOST.inc();
                    warn!(
                        generation = tagged.generation,
                        "registry connection lost, rebuilding client"
                    );
                    self.rebuild(&epoch).await;
                }
            }
            ClientEvent::Error(err) => {
                if self.should_retry(&epoch, &err).await {
                    self.rebuild(&epoch).await;
                }
            }
        }
    }

    /// Mark closed, tell dependents the connection is gone, then tear down.
    async fn retire(&self, epoch: &Epoch<C::Client>) {
        epoch.closed.store(true, Ordering::SeqCst);
        if let Some(client) = epoch.client() {
            self.shared.dispatch(&client, ConnectionState::Lost);
        }
        self.teardown(epoch).await;
        debug!(servers = ?epoch.config.servers, "registry epoch retired");
    }

    /// Retract availability, then stop the client.
    async fn teardown(&self, epoch: &Epoch<C::Client>) {
        let generation = epoch.generation.swap(0, Ordering::SeqCst);
        if epoch.published.swap(false, Ordering::SeqCst) {
            self.shared.availability.send_if_modified(|current| {
                if *current == Some(generation) {
                    *current = None;
                    true
                } else {
                    false
                }
            });
            debug!(generation, "registry client availability retracted");
        }
        let client = epoch.client.write().take();
        if let Some(client) = client {
            client.close().await;
            debug!(generation, "registry client stopped");
        }
    }

    /// Tear down whatever the epoch holds and build a fresh client from
    /// the same configuration, retrying resolution failures per policy.
    async fn rebuild(&self, epoch: &Epoch<C::Client>) {
        loop {
            self.teardown(epoch).await;
            if epoch.closed.load(Ordering::SeqCst) {
                debug!("epoch closed, not building a client");
                return;
            }

            let generation = self.shared.next_generation.fetch_add(1, Ordering::SeqCst) + 1;
            let sink = EventSink::new(generation, self.shared.events_tx.clone());
            epoch.set_state(ConnectionState::Connecting);

            match self.shared.connector.connect(&epoch.config, sink).await {
                Ok(client) => {
                    if epoch.closed.load(Ordering::SeqCst) {
                        client.close().await;
                        debug!(generation, "epoch closed while connecting, client discarded");
                        return;
                    }
                    *epoch.client.write() = Some(Arc::new(client));
                    epoch.generation.store(generation, Ordering::SeqCst);
                    self.shared.stats.builds.fetch_add(1, Ordering::Relaxed);
                    metrics::SESSION_CLIENT_BUILDS.inc();
                    info!(generation, servers = ?epoch.config.servers, "registry client started");
                    return;
                }
                Err(err) => {
                    metrics::SESSION_CLIENT_BUILD_ERRORS.inc();
                    warn!(generation, error = %err, "unable to start registry client");
                    if !self.should_retry(epoch, &err).await {
                        epoch.gave_up.store(true, Ordering::SeqCst);
                        return;
                    }
                }
            }
        }
    }

    /// Classify an unhandled client error. Sleeps the retry interval and
    /// returns true when the epoch should be rebuilt.
    async fn should_retry(&self, epoch: &Epoch<C::Client>, err: &CoordinationError) -> bool {
        if err.is_host_resolution() {
            let retry_max = epoch.config.retry_max;
            let attempt = epoch.retry_count.fetch_add(1, Ordering::SeqCst);
            if attempt < retry_max {
                self.shared.stats.retries.fetch_add(1, Ordering::Relaxed);
                metrics::SESSION_RETRIES.inc();
                warn!(
                    attempt = attempt + 1,
                    retry_max,
                    retry_in_ms = epoch.config.retry_interval.as_millis(),
                    error = %err,
                    "retrying registry client build"
                );
                tokio::time::sleep(epoch.config.retry_interval).await;
                return !epoch.closed.load(Ordering::SeqCst);
            }
            epoch.gave_up.store(true, Ordering::SeqCst);
            let exhausted = CoordinationError::RetriesExhausted { attempts: attempt };
            error!(error = %err, reason = %exhausted, "registry session degraded");
            false
        } else if err.is_recoverable() {
            debug!(error = %err, "recoverable error handled by registry client");
            false
        } else {
            error!(error = %err, "unhandled error in coordination layer");
            false
        }
    }
}
