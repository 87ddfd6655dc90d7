//! Connection manager
//!
//! Owns the single STOMP session to the broker and its readiness gate.
//! `connect` is a no-op while a handshake is in flight or once a connection
//! has been established; only `disconnect` clears that and allows a full new
//! handshake.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chatlink_config::{BrokerConfig, CredentialStore};
use chatlink_core::ChannelId;
use chatlink_observability::{create_connection_span, ConnectionMetrics};
use parking_lot::Mutex;
use tracing::{debug, info, warn, Instrument};
use url::Url;

use crate::client::{ConnectOptions, StompClient};
use crate::error::{BridgeError, BridgeResult};
use crate::gate::ReadinessGate;
use crate::listener::ListenerStream;
use crate::protocol::HeartBeat;
use crate::transport::Transport;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

impl ConnectionState {
    fn gauge(self) -> u8 {
        match self {
            ConnectionState::Disconnected => 0,
            ConnectionState::Connecting => 1,
            ConnectionState::Connected => 2,
        }
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
        };
        f.write_str(state)
    }
}

/// What a `connect` call did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectOutcome {
    /// A new handshake was started
    Started,
    AlreadyConnecting,
    AlreadyConnected,
}

/// Where and how to connect
#[derive(Debug, Clone)]
pub struct ConnectionSettings {
    /// Endpoint URL without the access token
    pub endpoint: String,
    /// `host` header of the CONNECT frame
    pub virtual_host: String,
    /// `None` waits for CONNECTED forever
    pub handshake_timeout: Option<Duration>,
    pub heartbeat: HeartBeat,
    pub connect_headers: Vec<(String, String)>,
}

impl ConnectionSettings {
    pub fn new(endpoint: impl Into<String>) -> Self {
        let endpoint = endpoint.into();
        let virtual_host = Url::parse(&endpoint)
            .ok()
            .and_then(|url| url.host_str().map(str::to_string))
            .unwrap_or_else(|| "localhost".to_string());

        Self {
            endpoint,
            virtual_host,
            handshake_timeout: None,
            heartbeat: HeartBeat::default(),
            connect_headers: Vec::new(),
        }
    }

    pub fn from_broker(broker: &BrokerConfig) -> Self {
        let mut connect_headers: Vec<_> = broker
            .connect_headers
            .iter()
            .map(|(name, value)| (name.clone(), value.clone()))
            .collect();
        connect_headers.sort();

        Self {
            handshake_timeout: (broker.handshake_timeout_secs > 0)
                .then(|| Duration::from_secs(broker.handshake_timeout_secs)),
            heartbeat: HeartBeat::new(broker.heartbeat_ms, broker.heartbeat_ms),
            connect_headers,
            ..Self::new(broker.endpoint())
        }
    }

    pub fn with_handshake_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    fn connect_options(&self) -> ConnectOptions {
        ConnectOptions {
            host: self.virtual_host.clone(),
            heartbeat: self.heartbeat,
            headers: self.connect_headers.clone(),
        }
    }
}

#[derive(Debug)]
struct Inner {
    state: ConnectionState,
    gate: ReadinessGate,
    client: Option<Arc<StompClient>>,
    connected_once: bool,
    /// Bumped by every disconnect; a handshake from an older cycle is discarded
    epoch: u64,
}

#[derive(Debug)]
pub struct ConnectionManager {
    settings: ConnectionSettings,
    transport: Arc<dyn Transport>,
    credentials: CredentialStore,
    /// Swapped for a fresh instance whenever a new handshake starts
    listeners: Arc<ListenerStream>,
    inner: Mutex<Inner>,
    handshake_attempts: AtomicU64,
}

impl ConnectionManager {
    pub fn new(
        settings: ConnectionSettings,
        transport: Arc<dyn Transport>,
        credentials: CredentialStore,
        listeners: Arc<ListenerStream>,
    ) -> Self {
        Self {
            settings,
            transport,
            credentials,
            listeners,
            inner: Mutex::new(Inner {
                state: ConnectionState::Disconnected,
                gate: ReadinessGate::new(),
                client: None,
                connected_once: false,
                epoch: 0,
            }),
            handshake_attempts: AtomicU64::new(0),
        }
    }

    pub fn settings(&self) -> &ConnectionSettings {
        &self.settings
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.lock().state
    }

    /// Number of handshakes started so far
    pub fn handshake_attempts(&self) -> u64 {
        self.handshake_attempts.load(Ordering::SeqCst)
    }

    /// The gate current right now
    pub fn gate(&self) -> ReadinessGate {
        self.inner.lock().gate.clone()
    }

    /// Wait for the current gate
    pub async fn ready(&self) -> BridgeResult<()> {
        let gate = self.gate();
        gate.wait().await
    }

    pub(crate) fn client(&self) -> Option<Arc<StompClient>> {
        self.inner.lock().client.clone()
    }

    /// Start a handshake unless one is running or already succeeded. A
    /// started handshake comes with a fresh listener stream, installed before
    /// anything can subscribe on the new session.
    ///
    /// Returns as soon as the handshake is started; wait on [`Self::ready`]
    /// for its result.
    pub async fn connect(self: &Arc<Self>) -> BridgeResult<ConnectOutcome> {
        let (epoch, gate) = {
            let mut inner = self.inner.lock();
            if inner.state == ConnectionState::Connecting {
                return Ok(ConnectOutcome::AlreadyConnecting);
            }
            if inner.connected_once {
                return Ok(ConnectOutcome::AlreadyConnected);
            }
            inner.state = ConnectionState::Connecting;
            self.listeners.replace();
            if inner.gate.is_failed() {
                debug!("Re-arming failed readiness gate");
                inner.gate = ReadinessGate::new();
            }
            (inner.epoch, inner.gate.clone())
        };
        ConnectionMetrics::set_state(ConnectionState::Connecting.gauge());

        let url = match self.endpoint_url().await {
            Ok(url) => url,
            Err(e) => {
                self.abort_attempt(epoch, &gate, e.to_string());
                return Err(e);
            }
        };

        let attempt = self.handshake_attempts.fetch_add(1, Ordering::SeqCst) + 1;
        ConnectionMetrics::record_handshake_attempt();
        info!(attempt, "Connecting to {}", self.settings.endpoint);

        let manager = Arc::clone(self);
        let span = create_connection_span(&self.settings.endpoint, epoch);
        tokio::spawn(async move { manager.run_handshake(epoch, gate, url).await }.instrument(span));

        Ok(ConnectOutcome::Started)
    }

    /// Endpoint plus `access_token` when the credential store has one
    async fn endpoint_url(&self) -> BridgeResult<Url> {
        let mut url = Url::parse(&self.settings.endpoint)?;
        if let Some(token) = self.credentials.token().await {
            url.query_pairs_mut().append_pair("access_token", &token);
        }
        Ok(url)
    }

    async fn run_handshake(self: Arc<Self>, epoch: u64, gate: ReadinessGate, url: Url) {
        let attempt = async {
            let link = self.transport.open(&url).await?;
            StompClient::handshake(link, self.settings.connect_options()).await
        };

        let result = match self.settings.handshake_timeout {
            Some(limit) => match tokio::time::timeout(limit, attempt).await {
                Ok(result) => result,
                Err(_) => Err(BridgeError::Handshake(format!(
                    "no CONNECTED frame within {}s",
                    limit.as_secs_f64()
                ))),
            },
            None => attempt.await,
        };

        match result {
            Ok(client) => {
                let mut inner = self.inner.lock();
                if inner.epoch != epoch {
                    debug!("Discarding handshake from a previous connection cycle");
                    return;
                }
                inner.client = Some(Arc::new(client));
                inner.state = ConnectionState::Connected;
                inner.connected_once = true;
                gate.resolve();
                drop(inner);

                ConnectionMetrics::set_state(ConnectionState::Connected.gauge());
                info!("Connected to chat broker");
            }
            Err(e) => {
                warn!(category = e.category(), "Handshake failed: {}", e);
                ConnectionMetrics::record_handshake_failure(e.category());
                self.abort_attempt(epoch, &gate, e.to_string());
            }
        }
    }

    fn abort_attempt(&self, epoch: u64, gate: &ReadinessGate, reason: String) {
        let mut inner = self.inner.lock();
        if inner.epoch != epoch {
            return;
        }
        inner.state = ConnectionState::Disconnected;
        gate.fail(reason);
        drop(inner);
        ConnectionMetrics::set_state(ConnectionState::Disconnected.gauge());
    }

    /// Tear down the session. Sends DISCONNECT carrying `chat-id` when the
    /// link is still up, then drops the client and clears the
    /// connected-once flag. A no-op when there is no session and no handshake
    /// in flight.
    pub fn disconnect(&self, channel_id: &ChannelId) {
        drop(self.detach(channel_id));
    }

    /// [`Self::disconnect`], then wait until the link has written DISCONNECT
    /// and closed.
    pub async fn shutdown(&self, channel_id: &ChannelId) {
        if let Some(client) = self.detach(channel_id) {
            client.close().await;
        }
    }

    fn detach(&self, channel_id: &ChannelId) -> Option<Arc<StompClient>> {
        let client = {
            let mut inner = self.inner.lock();
            if inner.client.is_none() && inner.state == ConnectionState::Disconnected {
                debug!(channel_id = %channel_id, "Nothing to disconnect");
                return None;
            }

            inner.epoch += 1;
            inner.connected_once = false;
            inner.state = ConnectionState::Disconnected;
            // a pending gate keeps its waiters for the next connect
            if !inner.gate.is_pending() {
                inner.gate = ReadinessGate::new();
            }
            inner.client.take()
        };

        if let Some(client) = &client {
            if client.is_active() {
                if let Err(e) = client.disconnect(&[("chat-id", channel_id.as_str())]) {
                    debug!("DISCONNECT not delivered: {}", e);
                }
            }
        }

        ConnectionMetrics::set_state(ConnectionState::Disconnected.gauge());
        info!(channel_id = %channel_id, "Disconnected from chat broker");
        client
    }
}
