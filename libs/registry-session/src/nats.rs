//! NATS-backed registry client.
//!
//! The registry tree lives in a JetStream KV bucket; a path like
//! `/fleet/registry/containers/status/web1/pid` is stored under the key
//! `fleet/registry/containers/status/web1/pid`. Interior nodes have no
//! entry of their own and exist as long as some key lies beneath them.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_nats::connection::State;
use async_nats::jetstream;
use async_nats::{ClientError, ConnectErrorKind, ConnectOptions, Event};
use async_trait::async_trait;
use futures::TryStreamExt;
use parking_lot::RwLock;
use tracing::{debug, info, warn};

use crate::client::{ConnectionState, Connector, CoordinationClient, EventSink, RegistryHandle};
use crate::config::ConnectionConfig;
use crate::error::{CoordinationError, CoordinationResult};

/// User name presented together with the configured password.
pub const DEFAULT_USER: &str = "fleet";

/// History kept per key when the registry bucket has to be created.
const BUCKET_HISTORY: i64 = 1;

const MIN_PING_INTERVAL: Duration = Duration::from_secs(1);

/// Builds [`NatsRegistryClient`]s.
#[derive(Debug, Clone)]
pub struct NatsConnector {
    user: String,
}

impl Default for NatsConnector {
    fn default() -> Self {
        Self {
            user: DEFAULT_USER.to_owned(),
        }
    }
}

impl NatsConnector {
    pub fn with_user(user: impl Into<String>) -> Self {
        Self { user: user.into() }
    }

    fn build_connect_options(
        &self,
        config: &ConnectionConfig,
        events: EventSink,
        seen_connected: Arc<AtomicBool>,
    ) -> ConnectOptions {
        let mut opts = ConnectOptions::new()
            .connection_timeout(config.connect_timeout)
            .ping_interval(ping_interval(config.session_timeout))
            .max_reconnects(max_reconnects(config.retry_max))
            .event_callback(move |event| {
                let events = events.clone();
                let seen_connected = Arc::clone(&seen_connected);
                async move {
                    match map_event(&event, &seen_connected) {
                        Some(Ok(state)) => events.state(state),
                        Some(Err(err)) => events.error(err),
                        None => debug!(generation = events.generation(), %event, "nats event"),
                    }
                }
            });
        if let Some(password) = &config.password {
            opts = opts.user_and_password(self.user.clone(), password.clone());
        }
        opts
    }
}

#[async_trait]
impl Connector for NatsConnector {
    type Client = NatsRegistryClient;

    async fn connect(
        &self,
        config: &ConnectionConfig,
        events: EventSink,
    ) -> CoordinationResult<NatsRegistryClient> {
        let seen_connected = Arc::new(AtomicBool::new(false));
        let opts = self.build_connect_options(config, events.clone(), Arc::clone(&seen_connected));

        info!(
            servers = ?config.servers,
            generation = events.generation(),
            "connecting to registry"
        );
        let client = opts
            .connect(config.servers.clone())
            .await
            .map_err(|err| map_connect_error(err.kind(), &err.to_string()))?;

        let store = get_or_create_bucket(&client, &config.bucket).await?;

        if matches!(client.connection_state(), State::Connected)
            && !seen_connected.swap(true, Ordering::SeqCst)
        {
            events.state(ConnectionState::Connected);
        }

        Ok(NatsRegistryClient {
            live: RwLock::new(Some(Live { client, store })),
            bucket: config.bucket.clone(),
            request_timeout: config.request_timeout,
        })
    }
}

async fn get_or_create_bucket(
    client: &async_nats::Client,
    bucket: &str,
) -> CoordinationResult<jetstream::kv::Store> {
    let js = jetstream::new(client.clone());
    match js.get_key_value(bucket.to_string()).await {
        Ok(store) => Ok(store),
        Err(get_err) => {
            debug!(bucket, error = %get_err, "creating missing registry bucket");
            js.create_key_value(jetstream::kv::Config {
                bucket: bucket.to_string(),
                history: BUCKET_HISTORY,
                ..Default::default()
            })
            .await
            .map_err(|create_err| {
                CoordinationError::Transport(format!(
                    "failed to create registry bucket '{bucket}': {create_err} (get error: {get_err})"
                ))
            })
        }
    }
}

#[derive(Clone)]
struct Live {
    client: async_nats::Client,
    store: jetstream::kv::Store,
}

/// Registry client over one NATS connection.
pub struct NatsRegistryClient {
    live: RwLock<Option<Live>>,
    bucket: String,
    request_timeout: Duration,
}

impl NatsRegistryClient {
    fn live(&self) -> CoordinationResult<Live> {
        self.live
            .read()
            .clone()
            .ok_or_else(|| CoordinationError::NotConnected("registry client closed".into()))
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    /// Store `data` at `path`, returning the new revision.
    pub async fn put(&self, path: &str, data: Vec<u8>) -> CoordinationResult<u64> {
        let key = registry_key(path)?;
        self.live()?
            .store
            .put(key.as_str(), data.into())
            .await
            .map_err(|e| CoordinationError::Transport(format!("put '{path}' failed: {e}")))
    }

    /// Remove the node at `path`.
    pub async fn delete(&self, path: &str) -> CoordinationResult<()> {
        let key = registry_key(path)?;
        self.live()?
            .store
            .delete(key.as_str())
            .await
            .map_err(|e| CoordinationError::Transport(format!("delete '{path}' failed: {e}")))
    }

    /// Send a request and wait for a reply with the configured timeout.
    pub async fn request(&self, subject: &str, payload: Vec<u8>) -> CoordinationResult<Vec<u8>> {
        let client = self.live()?.client;
        let response = tokio::time::timeout(
            self.request_timeout,
            client.request(subject.to_string(), payload.into()),
        )
        .await
        .map_err(|_| {
            CoordinationError::Timeout(format!(
                "request to '{subject}' timed out after {:?}",
                self.request_timeout
            ))
        })?
        .map_err(|e| CoordinationError::Transport(format!("request to '{subject}' failed: {e}")))?;

        Ok(response.payload.to_vec())
    }

    async fn keys(&self) -> CoordinationResult<Vec<String>> {
        let store = self.live()?.store;
        let keys = store.keys().await.map_err(list_failed)?;
        keys.try_collect().await.map_err(list_failed)
    }
}

#[async_trait]
impl CoordinationClient for NatsRegistryClient {
    fn is_connected(&self) -> bool {
        self.live
            .read()
            .as_ref()
            .is_some_and(|live| matches!(live.client.connection_state(), State::Connected))
    }

    async fn close(&self) {
        let live = self.live.write().take();
        if let Some(live) = live {
            if let Err(err) = live.client.flush().await {
                debug!(error = %err, "flush before close failed");
            }
            drop(live);
            info!(bucket = %self.bucket, "registry client closed");
        }
    }
}

#[async_trait]
impl RegistryHandle for NatsRegistryClient {
    async fn exists(&self, path: &str) -> CoordinationResult<bool> {
        let key = registry_key(path)?;
        let store = self.live()?.store;
        let entry = store
            .get(key.as_str())
            .await
            .map_err(|e| CoordinationError::Transport(format!("get '{path}' failed: {e}")))?;
        if entry.is_some() {
            return Ok(true);
        }
        Ok(!child_names(&self.keys().await?, &key).is_empty())
    }

    async fn children(&self, path: &str) -> CoordinationResult<Vec<String>> {
        let prefix = key_prefix(path);
        Ok(child_names(&self.keys().await?, &prefix))
    }

    async fn read_data(&self, path: &str) -> CoordinationResult<Vec<u8>> {
        let key = registry_key(path)?;
        let store = self.live()?.store;
        store
            .get(key.as_str())
            .await
            .map_err(|e| CoordinationError::Transport(format!("get '{path}' failed: {e}")))?
            .map(|bytes| bytes.to_vec())
            .ok_or_else(|| CoordinationError::NoNode(path.to_owned()))
    }
}

impl std::fmt::Debug for NatsRegistryClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NatsRegistryClient")
            .field("bucket", &self.bucket)
            .field("request_timeout", &self.request_timeout)
            .field("open", &self.live.read().is_some())
            .finish()
    }
}

fn list_failed(err: impl std::fmt::Display) -> CoordinationError {
    CoordinationError::Transport(format!("listing registry keys failed: {err}"))
}

fn key_prefix(path: &str) -> String {
    path.trim_matches('/').to_owned()
}

/// Translate a registry path into a KV key.
pub(crate) fn registry_key(path: &str) -> CoordinationResult<String> {
    let key = key_prefix(path);
    if key.is_empty() {
        return Err(CoordinationError::Codec(format!(
            "registry path '{path}' does not name a node"
        )));
    }
    let valid = key
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '/' | '=' | '.'));
    if !valid || key.starts_with('.') || key.ends_with('.') || key.contains("//") {
        return Err(CoordinationError::Codec(format!(
            "registry path '{path}' cannot be stored as a key"
        )));
    }
    Ok(key)
}

/// Distinct next path segments of `keys` beneath `prefix`, sorted.
pub(crate) fn child_names(keys: &[String], prefix: &str) -> Vec<String> {
    let names: BTreeSet<&str> = keys
        .iter()
        .filter_map(|key| {
            if prefix.is_empty() {
                Some(key.as_str())
            } else {
                key.strip_prefix(prefix)?.strip_prefix('/')
            }
        })
        .filter_map(|rest| rest.split('/').next())
        .filter(|name| !name.is_empty())
        .collect();
    names.into_iter().map(str::to_owned).collect()
}

fn ping_interval(session_timeout: Duration) -> Duration {
    (session_timeout / 3).max(MIN_PING_INTERVAL)
}

fn max_reconnects(retry_max: u32) -> usize {
    retry_max.max(1) as usize
}

/// Map a client event to a state transition or an unhandled error.
fn map_event(
    event: &Event,
    seen_connected: &AtomicBool,
) -> Option<Result<ConnectionState, CoordinationError>> {
    match event {
        Event::Connected => Some(Ok(if seen_connected.swap(true, Ordering::SeqCst) {
            ConnectionState::Reconnected
        } else {
            ConnectionState::Connected
        })),
        Event::Disconnected => Some(Ok(ConnectionState::Disconnected)),
        Event::ClientError(ClientError::MaxReconnects) => Some(Ok(ConnectionState::Lost)),
        Event::ClientError(other) => Some(Err(CoordinationError::Transport(other.to_string()))),
        Event::ServerError(err) => {
            warn!(error = %err, "registry server reported an error");
            None
        }
        _ => None,
    }
}

fn map_connect_error(kind: ConnectErrorKind, message: &str) -> CoordinationError {
    match kind {
        ConnectErrorKind::Dns => CoordinationError::HostResolution(message.to_owned()),
        ConnectErrorKind::TimedOut => CoordinationError::Timeout(message.to_owned()),
        ConnectErrorKind::ServerParse => CoordinationError::Config(message.to_owned()),
        _ => CoordinationError::Transport(message.to_owned()),
    }
}
