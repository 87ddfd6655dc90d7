//! In-memory broker for driving the bridge in tests

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chatlink_bridge::{
    ChatBridge, Command, ConnectionSettings, Frame, HeartBeat, Transport, TransportError,
    TransportLink,
};
use chatlink_config::CredentialStore;
use tokio::sync::mpsc;
use url::Url;

pub const ENDPOINT: &str = "ws://localhost:8080/websocket/chat";
const WAIT: Duration = Duration::from_secs(5);

/// Counts `open` calls and hands the broker end of every link to the test
#[derive(Debug)]
pub struct MockTransport {
    opens: AtomicUsize,
    accepted: mpsc::UnboundedSender<BrokerSession>,
}

#[async_trait]
impl Transport for MockTransport {
    async fn open(&self, url: &Url) -> Result<TransportLink, TransportError> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        let (client_end, broker_end) = TransportLink::pair();
        self.accepted
            .send(BrokerSession {
                url: url.clone(),
                link: broker_end,
            })
            .map_err(|_| TransportError::Closed)?;
        Ok(client_end)
    }
}

impl MockTransport {
    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }
}

pub struct MockBroker {
    pub transport: Arc<MockTransport>,
    sessions: mpsc::UnboundedReceiver<BrokerSession>,
}

impl MockBroker {
    pub fn new() -> Self {
        let (accepted, sessions) = mpsc::unbounded_channel();
        Self {
            transport: Arc::new(MockTransport {
                opens: AtomicUsize::new(0),
                accepted,
            }),
            sessions,
        }
    }

    pub fn bridge(&self, credentials: CredentialStore) -> ChatBridge {
        self.bridge_with(ConnectionSettings::new(ENDPOINT), credentials)
    }

    pub fn bridge_with(&self, mut settings: ConnectionSettings, credentials: CredentialStore) -> ChatBridge {
        settings.heartbeat = HeartBeat::new(0, 0);
        ChatBridge::new(settings, self.transport.clone(), credentials)
    }

    /// Next link the bridge opened
    pub async fn accept(&mut self) -> BrokerSession {
        tokio::time::timeout(WAIT, self.sessions.recv())
            .await
            .expect("bridge did not open a link")
            .expect("transport dropped")
    }

    /// Accept a link and answer its CONNECT
    pub async fn accept_connected(&mut self) -> BrokerSession {
        let mut session = self.accept().await;
        let connect = session.next_frame().await;
        assert_eq!(connect.command, Command::Connect);
        session.send_connected();
        session
    }

    pub fn try_accept(&mut self) -> Option<BrokerSession> {
        self.sessions.try_recv().ok()
    }
}

pub struct BrokerSession {
    pub url: Url,
    link: TransportLink,
}

impl BrokerSession {
    /// Next non-heartbeat frame from the bridge
    pub async fn next_frame(&mut self) -> Frame {
        self.frame_within(WAIT).await.expect("no frame from bridge")
    }

    pub async fn frame_within(&mut self, wait: Duration) -> Option<Frame> {
        tokio::time::timeout(wait, async {
            loop {
                let text = self.link.inbound.recv().await?;
                if let Some(frame) = Frame::decode(&text).expect("bridge sent a bad frame") {
                    return Some(frame);
                }
            }
        })
        .await
        .ok()
        .flatten()
    }

    pub fn send_connected(&self) {
        self.push(
            Frame::new(Command::Connected)
                .header("version", "1.2")
                .header("heart-beat", "0,0"),
        );
    }

    pub fn send_error(&self, message: &str) {
        self.push(Frame::new(Command::Error).header("message", message));
    }

    /// Deliver a MESSAGE on a subscription
    pub fn deliver(&self, subscription: &str, destination: &str, body: &str) {
        self.push(
            Frame::new(Command::Message)
                .header("subscription", subscription)
                .header("destination", destination)
                .header("message-id", format!("{}-{}", subscription, body.len()))
                .with_body(body),
        );
    }

    pub fn push(&self, frame: Frame) {
        let _ = self.link.outbound.send(frame.encode());
    }

    /// Wait until the bridge drops its end of the link
    pub async fn closed(&mut self) -> bool {
        tokio::time::timeout(WAIT, async {
            while self.link.inbound.recv().await.is_some() {}
        })
        .await
        .is_ok()
    }
}

/// Poll until `check` holds
pub async fn eventually(mut check: impl FnMut() -> bool) {
    tokio::time::timeout(WAIT, async {
        while !check() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not reached");
}
