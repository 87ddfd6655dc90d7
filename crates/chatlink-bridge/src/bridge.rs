//! `ChatBridge`: the context object front-ends hold for the whole application
//! session. Cheap to clone; every clone shares one connection, one
//! subscription and one listener stream.

use std::sync::Arc;

use chatlink_config::{Config, CredentialStore};
use chatlink_core::{ChannelId, Message};
use tokio::task::JoinHandle;
use tracing::warn;

use crate::connection::{ConnectOutcome, ConnectionManager, ConnectionSettings, ConnectionState};
use crate::error::BridgeResult;
use crate::listener::{Listener, ListenerStream, DEFAULT_CAPACITY};
use crate::router::SubscriptionRouter;
use crate::transport::{Transport, WebSocketTransport};

#[derive(Debug, Clone)]
pub struct ChatBridge {
    connection: Arc<ConnectionManager>,
    router: Arc<SubscriptionRouter>,
    listeners: Arc<ListenerStream>,
}

impl ChatBridge {
    pub fn new(
        settings: ConnectionSettings,
        transport: Arc<dyn Transport>,
        credentials: CredentialStore,
    ) -> Self {
        let listeners = Arc::new(ListenerStream::new(DEFAULT_CAPACITY));
        let connection = Arc::new(ConnectionManager::new(
            settings,
            transport,
            credentials,
            Arc::clone(&listeners),
        ));
        let router = Arc::new(SubscriptionRouter::new(
            Arc::clone(&connection),
            Arc::clone(&listeners),
        ));

        Self {
            connection,
            router,
            listeners,
        }
    }

    /// WebSocket transport as configured
    pub fn from_config(config: &Config, credentials: CredentialStore) -> Self {
        Self::new(
            ConnectionSettings::from_broker(&config.broker),
            Arc::new(WebSocketTransport::new(config.broker.framing)),
            credentials,
        )
    }

    /// Start a handshake if needed. A fresh connect also starts a fresh
    /// listener stream.
    pub async fn connect(&self) -> BridgeResult<ConnectOutcome> {
        self.connection.connect().await
    }

    /// Wait for the current handshake
    pub async fn ready(&self) -> BridgeResult<()> {
        self.connection.ready().await
    }

    /// Connect if needed, then join the chat. Resolves once the subscription
    /// is in place.
    pub async fn init_chat(&self, channel_id: impl Into<ChannelId>) -> BridgeResult<()> {
        let channel_id = channel_id.into();
        self.connect().await?;
        self.router.join_channel(channel_id).await
    }

    /// Leave the chat and tear the connection down. Never fails.
    pub fn leave_chat(&self, channel_id: impl Into<ChannelId>) {
        let channel_id = channel_id.into();
        self.router.leave_channel();
        self.connection.disconnect(&channel_id);
    }

    /// [`Self::leave_chat`], then wait until DISCONNECT and everything sent
    /// before it has gone out and the link is closed. Front-ends call this
    /// before exiting.
    pub async fn close_chat(&self, channel_id: impl Into<ChannelId>) {
        let channel_id = channel_id.into();
        self.router.leave_channel();
        self.connection.shutdown(&channel_id).await;
    }

    /// Fire-and-forget send. The returned handle only matters to callers that
    /// want to know when the frame went out.
    pub fn send_message(&self, message: Message) -> JoinHandle<()> {
        let router = Arc::clone(&self.router);
        tokio::spawn(async move {
            if let Err(e) = router.send(&message).await {
                warn!(category = e.category(), "Message not sent: {}", e);
            }
        })
    }

    /// Send and report the outcome
    pub async fn send(&self, message: &Message) -> BridgeResult<()> {
        self.router.send(message).await
    }

    /// The current listener stream; ask again after each init/leave cycle
    pub fn receiver(&self) -> Listener {
        self.listeners.observe()
    }

    pub fn disconnect(&self, channel_id: &ChannelId) {
        self.connection.disconnect(channel_id);
    }

    pub fn state(&self) -> ConnectionState {
        self.connection.state()
    }

    pub fn handshake_attempts(&self) -> u64 {
        self.connection.handshake_attempts()
    }

    pub fn active_channel(&self) -> Option<ChannelId> {
        self.router.active_channel()
    }

    pub fn connection(&self) -> &Arc<ConnectionManager> {
        &self.connection
    }

    pub fn router(&self) -> &Arc<SubscriptionRouter> {
        &self.router
    }
}
