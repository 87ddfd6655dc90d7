//! chatlink bridge
//!
//! One shared STOMP session over a WebSocket to the chat broker, carrying an
//! outbound send path and a single inbound chat subscription, exposed to any
//! number of front-ends through [`ChatBridge`].
//!
//! ```no_run
//! use chatlink_bridge::ChatBridge;
//! use chatlink_config::{Config, CredentialStore};
//! use futures::StreamExt;
//!
//! # async fn run() -> Result<(), chatlink_bridge::BridgeError> {
//! let config = Config::default();
//! let bridge = ChatBridge::from_config(&config, CredentialStore::from_config(&config.credentials));
//! bridge.init_chat("42").await?;
//!
//! let mut messages = Box::pin(bridge.receiver().stream());
//! while let Some(message) = messages.next().await {
//!     println!("{:?}", message.text);
//! }
//! bridge.close_chat("42").await;
//! # Ok(())
//! # }
//! ```

pub mod bridge;
pub mod client;
pub mod connection;
pub mod error;
pub mod gate;
pub mod listener;
pub mod protocol;
pub mod router;
pub mod sockjs;
pub mod transport;

pub use bridge::ChatBridge;
pub use client::{ConnectOptions, MessageSink, StompClient, SubscriptionHandle};
pub use connection::{ConnectOutcome, ConnectionManager, ConnectionSettings, ConnectionState};
pub use error::{BridgeError, BridgeResult, FrameError, TransportError};
pub use gate::{GateState, ReadinessGate};
pub use listener::{Listener, ListenerStream};
pub use protocol::{Command, Frame, HeartBeat};
pub use router::SubscriptionRouter;
pub use transport::{Transport, TransportLink, WebSocketTransport};
