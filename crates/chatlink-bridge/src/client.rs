//! STOMP client session over a [`TransportLink`]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use crate::error::{BridgeError, BridgeResult, TransportError};
use crate::protocol::{Command, Frame, HeartBeat};
use crate::transport::TransportLink;

/// Callback receiving MESSAGE frames for one subscription, in arrival order
pub type MessageSink = Arc<dyn Fn(&Frame) + Send + Sync>;

type SinkMap = Arc<Mutex<HashMap<String, MessageSink>>>;

/// What goes into the CONNECT frame
#[derive(Debug, Clone, Default)]
pub struct ConnectOptions {
    /// Value of the `host` header
    pub host: String,
    pub heartbeat: HeartBeat,
    /// Extra headers, e.g. `login`/`passcode`
    pub headers: Vec<(String, String)>,
}

/// Identifies an active subscription on one client
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionHandle {
    id: String,
    destination: String,
}

impl SubscriptionHandle {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn destination(&self) -> &str {
        &self.destination
    }
}

/// A connected STOMP session. Dropping it closes the link; [`StompClient::close`]
/// also waits for the transport to finish.
pub struct StompClient {
    /// `None` once the link was released
    outbound: Mutex<Option<mpsc::UnboundedSender<String>>>,
    sinks: SinkMap,
    next_subscription: AtomicU64,
    active: Arc<AtomicBool>,
    server: Option<String>,
    heartbeat: HeartBeat,
    reader: Mutex<Option<JoinHandle<()>>>,
    heartbeat_task: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for StompClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StompClient")
            .field("server", &self.server)
            .field("heartbeat", &self.heartbeat)
            .field("active", &self.is_active())
            .field("subscriptions", &self.sinks.lock().len())
            .finish()
    }
}

impl StompClient {
    /// Send CONNECT and wait for CONNECTED. An ERROR frame or a closed link
    /// before CONNECTED fails the handshake.
    pub async fn handshake(link: TransportLink, options: ConnectOptions) -> BridgeResult<Self> {
        let TransportLink {
            outbound,
            mut inbound,
        } = link;

        let mut connect = Frame::new(Command::Connect)
            .header("accept-version", "1.2")
            .header("host", options.host.as_str())
            .header("heart-beat", options.heartbeat.to_string());
        for (name, value) in &options.headers {
            connect = connect.header(name.as_str(), value.as_str());
        }
        outbound
            .send(connect.encode())
            .map_err(|_| TransportError::Closed)?;

        let connected = loop {
            let text = inbound.recv().await.ok_or_else(|| {
                BridgeError::Handshake("link closed before CONNECTED".to_string())
            })?;
            let Some(frame) = Frame::decode(&text)? else {
                continue;
            };
            match frame.command {
                Command::Connected => break frame,
                Command::Error => {
                    let reason = frame
                        .get_header("message")
                        .map(str::to_string)
                        .unwrap_or_else(|| frame.body.clone());
                    return Err(BridgeError::Handshake(reason));
                }
                other => debug!("Ignoring {} before CONNECTED", other),
            }
        };

        let server_heartbeat = match connected.get_header("heart-beat") {
            Some(value) => HeartBeat::parse(value)?,
            None => HeartBeat::default(),
        };
        let heartbeat = HeartBeat::negotiate(options.heartbeat, server_heartbeat);
        let server = connected.get_header("server").map(str::to_string);

        info!(
            version = connected.get_header("version").unwrap_or("1.2"),
            server = server.as_deref().unwrap_or("unknown"),
            heartbeat = %heartbeat,
            "STOMP session established"
        );

        let sinks: SinkMap = Arc::new(Mutex::new(HashMap::new()));
        let active = Arc::new(AtomicBool::new(true));
        let reader = tokio::spawn(read_loop(inbound, Arc::clone(&sinks), Arc::clone(&active)));
        let heartbeat_task = heartbeat
            .outgoing_interval()
            .map(|interval| tokio::spawn(send_heartbeats(outbound.clone(), interval)));

        Ok(Self {
            outbound: Mutex::new(Some(outbound)),
            sinks,
            next_subscription: AtomicU64::new(0),
            active,
            server,
            heartbeat,
            reader: Mutex::new(Some(reader)),
            heartbeat_task: Mutex::new(heartbeat_task),
        })
    }

    /// The link is up and DISCONNECT has not been sent
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
            && self
                .outbound
                .lock()
                .as_ref()
                .map_or(false, |outbound| !outbound.is_closed())
    }

    pub fn server(&self) -> Option<&str> {
        self.server.as_deref()
    }

    /// Negotiated heart-beat intervals
    pub fn heartbeat(&self) -> HeartBeat {
        self.heartbeat
    }

    pub fn subscribe(&self, destination: &str, sink: MessageSink) -> BridgeResult<SubscriptionHandle> {
        let id = format!(
            "sub-{}",
            self.next_subscription.fetch_add(1, Ordering::SeqCst)
        );
        self.sinks.lock().insert(id.clone(), sink);

        let frame = Frame::new(Command::Subscribe)
            .header("id", id.as_str())
            .header("destination", destination)
            .header("ack", "auto");
        if let Err(e) = self.transmit(frame) {
            self.sinks.lock().remove(&id);
            return Err(e);
        }

        debug!(subscription = %id, destination, "Subscribed");
        Ok(SubscriptionHandle {
            id,
            destination: destination.to_string(),
        })
    }

    /// Frames for the handle that arrive afterwards are discarded
    pub fn unsubscribe(&self, handle: &SubscriptionHandle) -> BridgeResult<()> {
        self.sinks.lock().remove(&handle.id);
        debug!(subscription = %handle.id, destination = %handle.destination, "Unsubscribed");
        self.transmit(Frame::new(Command::Unsubscribe).header("id", handle.id.as_str()))
    }

    pub fn send(&self, destination: &str, body: String) -> BridgeResult<()> {
        self.transmit(
            Frame::new(Command::Send)
                .header("destination", destination)
                .header("content-type", "application/json")
                .with_body(body),
        )
    }

    /// Send DISCONNECT with the given headers. The link closes once the
    /// client is dropped.
    pub fn disconnect(&self, headers: &[(&str, &str)]) -> BridgeResult<()> {
        let mut frame = Frame::new(Command::Disconnect);
        for (name, value) in headers {
            frame = frame.header(*name, *value);
        }
        let result = self.transmit(frame);
        self.active.store(false, Ordering::SeqCst);
        self.sinks.lock().clear();
        result
    }

    /// Release the link and wait until the transport has written every frame
    /// queued so far and shut down. Frames sent afterwards fail with
    /// [`TransportError::Closed`].
    pub async fn close(&self) {
        self.active.store(false, Ordering::SeqCst);
        self.sinks.lock().clear();

        let heartbeat_task = self.heartbeat_task.lock().take();
        if let Some(task) = heartbeat_task {
            task.abort();
            let _ = task.await;
        }
        // the transport sees the end of the link once every sender is gone
        let outbound = self.outbound.lock().take();
        drop(outbound);

        let reader = self.reader.lock().take();
        if let Some(reader) = reader {
            let _ = reader.await;
        }
        debug!("STOMP link released");
    }

    fn transmit(&self, frame: Frame) -> BridgeResult<()> {
        trace!(command = %frame.command, "Sending frame");
        let outbound = self.outbound.lock();
        let outbound = outbound.as_ref().ok_or(TransportError::Closed)?;
        outbound
            .send(frame.encode())
            .map_err(|_| TransportError::Closed.into())
    }
}

impl Drop for StompClient {
    fn drop(&mut self) {
        if let Some(reader) = self.reader.get_mut().take() {
            reader.abort();
        }
        if let Some(task) = self.heartbeat_task.get_mut().take() {
            task.abort();
        }
    }
}

async fn read_loop(
    mut inbound: mpsc::UnboundedReceiver<String>,
    sinks: SinkMap,
    active: Arc<AtomicBool>,
) {
    while let Some(text) = inbound.recv().await {
        let frame = match Frame::decode(&text) {
            Ok(Some(frame)) => frame,
            Ok(None) => continue,
            Err(e) => {
                warn!("Dropping undecodable frame: {}", e);
                continue;
            }
        };

        match frame.command {
            Command::Message => {
                let sink = frame
                    .get_header("subscription")
                    .and_then(|id| sinks.lock().get(id).cloned());
                match sink {
                    Some(sink) => sink(&frame),
                    None => debug!(
                        subscription = frame.get_header("subscription").unwrap_or(""),
                        "Discarding MESSAGE for inactive subscription"
                    ),
                }
            }
            Command::Error => warn!(
                message = frame.get_header("message").unwrap_or(""),
                body = %frame.body,
                "Broker sent ERROR"
            ),
            Command::Receipt => debug!(
                receipt = frame.get_header("receipt-id").unwrap_or(""),
                "Receipt"
            ),
            other => debug!("Ignoring unexpected {} frame", other),
        }
    }

    active.store(false, Ordering::SeqCst);
    info!("STOMP link closed");
}

async fn send_heartbeats(outbound: mpsc::UnboundedSender<String>, interval: std::time::Duration) {
    let mut ticker = tokio::time::interval(interval);
    ticker.tick().await;
    loop {
        ticker.tick().await;
        if outbound.send("\n".to_string()).is_err() {
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn next_frame(broker: &mut TransportLink) -> Frame {
        loop {
            let text = broker.inbound.recv().await.expect("link open");
            if let Some(frame) = Frame::decode(&text).unwrap() {
                return frame;
            }
        }
    }

    async fn connected_client() -> (StompClient, TransportLink) {
        let (client_end, mut broker) = TransportLink::pair();
        let options = ConnectOptions {
            host: "localhost".to_string(),
            heartbeat: HeartBeat::new(0, 0),
            headers: vec![("login".to_string(), "alice".to_string())],
        };
        let handshake = tokio::spawn(StompClient::handshake(client_end, options));

        let connect = next_frame(&mut broker).await;
        assert_eq!(connect.command, Command::Connect);
        assert_eq!(connect.get_header("accept-version"), Some("1.2"));
        assert_eq!(connect.get_header("host"), Some("localhost"));
        assert_eq!(connect.get_header("heart-beat"), Some("0,0"));
        assert_eq!(connect.get_header("login"), Some("alice"));

        broker
            .outbound
            .send(
                Frame::new(Command::Connected)
                    .header("version", "1.2")
                    .header("server", "test-broker")
                    .encode(),
            )
            .unwrap();

        let client = handshake.await.unwrap().unwrap();
        (client, broker)
    }

    #[tokio::test]
    async fn handshake_error_frame() {
        let (client_end, broker) = TransportLink::pair();
        broker
            .outbound
            .send(
                Frame::new(Command::Error)
                    .header("message", "bad token")
                    .encode(),
            )
            .unwrap();

        let err = StompClient::handshake(client_end, ConnectOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, BridgeError::Handshake(reason) if reason == "bad token"));
    }

    #[tokio::test]
    async fn handshake_link_closed() {
        let (client_end, broker) = TransportLink::pair();
        drop(broker);
        let err = StompClient::handshake(client_end, ConnectOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, BridgeError::Transport(TransportError::Closed)));
    }

    #[tokio::test]
    async fn routes_messages_by_subscription() {
        let (client, mut broker) = connected_client().await;
        assert_eq!(client.server(), Some("test-broker"));
        assert!(client.is_active());

        let (tx, mut rx) = mpsc::unbounded_channel();
        let sink: MessageSink = Arc::new(move |frame: &Frame| {
            let _ = tx.send(frame.body.clone());
        });
        let handle = client.subscribe("/chat/42", sink).unwrap();
        assert_eq!(handle.id(), "sub-0");

        let subscribe = next_frame(&mut broker).await;
        assert_eq!(subscribe.command, Command::Subscribe);
        assert_eq!(subscribe.get_header("destination"), Some("/chat/42"));

        for (subscription, body) in [("sub-0", "one"), ("sub-9", "stray"), ("sub-0", "two")] {
            broker
                .outbound
                .send(
                    Frame::new(Command::Message)
                        .header("subscription", subscription)
                        .with_body(body)
                        .encode(),
                )
                .unwrap();
        }
        assert_eq!(rx.recv().await.as_deref(), Some("one"));
        assert_eq!(rx.recv().await.as_deref(), Some("two"));

        client.unsubscribe(&handle).unwrap();
        let unsubscribe = next_frame(&mut broker).await;
        assert_eq!(unsubscribe.command, Command::Unsubscribe);
        assert_eq!(unsubscribe.get_header("id"), Some("sub-0"));

        broker
            .outbound
            .send(
                Frame::new(Command::Message)
                    .header("subscription", "sub-0")
                    .with_body("late")
                    .encode(),
            )
            .unwrap();
        drop(client);
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn send_and_disconnect() {
        let (client, mut broker) = connected_client().await;

        client.send("/chat/42/sent", r#"{"text":"hi"}"#.to_string()).unwrap();
        let send = next_frame(&mut broker).await;
        assert_eq!(send.command, Command::Send);
        assert_eq!(send.get_header("destination"), Some("/chat/42/sent"));
        assert_eq!(send.get_header("content-type"), Some("application/json"));
        assert_eq!(send.body, r#"{"text":"hi"}"#);

        client.disconnect(&[("chat-id", "42")]).unwrap();
        assert!(!client.is_active());
        let disconnect = next_frame(&mut broker).await;
        assert_eq!(disconnect.command, Command::Disconnect);
        assert_eq!(disconnect.get_header("chat-id"), Some("42"));

        drop(client);
        assert!(broker.inbound.recv().await.is_none());
    }

    #[tokio::test]
    async fn link_close_marks_inactive() {
        let (client, broker) = connected_client().await;
        drop(broker);
        tokio::time::timeout(std::time::Duration::from_secs(1), async {
            while client.is_active() {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn close_waits_for_the_transport() {
        let (client, mut broker) = connected_client().await;

        client.send("/chat/42/sent", r#"{"text":"bye"}"#.to_string()).unwrap();
        client.disconnect(&[("chat-id", "42")]).unwrap();

        let close = tokio::spawn(async move {
            client.close().await;
            client
        });
        assert_eq!(next_frame(&mut broker).await.command, Command::Send);
        assert_eq!(next_frame(&mut broker).await.command, Command::Disconnect);
        assert!(broker.inbound.recv().await.is_none());

        // still open from the far side until the transport lets go
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert!(!close.is_finished());

        drop(broker);
        let client = close.await.unwrap();
        assert!(!client.is_active());
        assert!(matches!(
            client.send("/chat/42/sent", "{}".to_string()),
            Err(BridgeError::Transport(TransportError::Closed))
        ));
    }
}
