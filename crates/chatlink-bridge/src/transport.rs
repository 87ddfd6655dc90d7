//! Transport seam between the STOMP session and the network
//!
//! A [`Transport`] opens a [`TransportLink`]: a pair of text channels. The
//! STOMP client never touches sockets directly, which lets tests play the
//! broker over an in-memory link.

use std::fmt;

use async_trait::async_trait;
use chatlink_config::Framing;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};
use url::Url;

use crate::error::TransportError;
use crate::sockjs::{self, SockJsFrame};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Both directions of an open link.
///
/// Dropping `outbound` closes the link; `inbound` yields `None` once the peer
/// is gone.
#[derive(Debug)]
pub struct TransportLink {
    pub outbound: mpsc::UnboundedSender<String>,
    pub inbound: mpsc::UnboundedReceiver<String>,
}

impl TransportLink {
    /// Two connected ends: what one sends on `outbound` the other reads on `inbound`
    pub fn pair() -> (TransportLink, TransportLink) {
        let (a_tx, b_rx) = mpsc::unbounded_channel();
        let (b_tx, a_rx) = mpsc::unbounded_channel();
        (
            TransportLink {
                outbound: a_tx,
                inbound: a_rx,
            },
            TransportLink {
                outbound: b_tx,
                inbound: b_rx,
            },
        )
    }
}

#[async_trait]
pub trait Transport: Send + Sync + fmt::Debug {
    async fn open(&self, url: &Url) -> Result<TransportLink, TransportError>;
}

/// tokio-tungstenite client transport
#[derive(Debug, Clone, Copy)]
pub struct WebSocketTransport {
    framing: Framing,
}

impl WebSocketTransport {
    pub fn new(framing: Framing) -> Self {
        Self { framing }
    }
}

impl Default for WebSocketTransport {
    fn default() -> Self {
        Self::new(Framing::default())
    }
}

#[async_trait]
impl Transport for WebSocketTransport {
    async fn open(&self, url: &Url) -> Result<TransportLink, TransportError> {
        let target = match self.framing {
            Framing::Raw => url.clone(),
            Framing::SockJs => sockjs::session_url(url)?,
        };

        debug!("Opening WebSocket to {}", redact(&target));
        let (ws_stream, _) = connect_async(target.as_str()).await?;
        info!("WebSocket connected to {}", redact(&target));

        let (client_end, pump_end) = TransportLink::pair();
        tokio::spawn(pump(ws_stream, pump_end, self.framing));
        Ok(client_end)
    }
}

/// Moves text between the socket and the link until either side closes
async fn pump(ws_stream: WsStream, link: TransportLink, framing: Framing) {
    let TransportLink {
        outbound: to_client,
        inbound: mut from_client,
    } = link;
    let (mut sender, mut receiver) = ws_stream.split();

    loop {
        tokio::select! {
            outgoing = from_client.recv() => {
                let Some(text) = outgoing else {
                    debug!("Client side closed, closing WebSocket");
                    let _ = sender.close().await;
                    break;
                };
                let payload = match framing {
                    Framing::Raw => text,
                    Framing::SockJs => sockjs::encode(&[text]),
                };
                if let Err(e) = sender.send(Message::Text(payload)).await {
                    warn!("Failed to write to WebSocket: {}", e);
                    break;
                }
            }

            incoming = receiver.next() => {
                match incoming {
                    Some(Ok(Message::Text(text))) => {
                        if !deliver(framing, text, &to_client) {
                            let _ = sender.close().await;
                            break;
                        }
                    }
                    Some(Ok(Message::Close(frame))) => {
                        debug!("WebSocket closed by peer: {:?}", frame);
                        break;
                    }
                    // pings are answered by tungstenite itself
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        warn!("WebSocket read error: {}", e);
                        break;
                    }
                    None => break,
                }
            }
        }
    }
}

/// Returns false when the link should be torn down
fn deliver(framing: Framing, text: String, to_client: &mpsc::UnboundedSender<String>) -> bool {
    let messages = match framing {
        Framing::Raw => vec![text],
        Framing::SockJs => match sockjs::decode(&text) {
            Ok(SockJsFrame::Open) | Ok(SockJsFrame::Heartbeat) => return true,
            Ok(SockJsFrame::Messages(messages)) => messages,
            Ok(SockJsFrame::Close { code, reason }) => {
                info!("SockJS session closed: {} {}", code, reason);
                return false;
            }
            Err(e) => {
                warn!("Dropping SockJS frame: {}", e);
                return true;
            }
        },
    };

    messages
        .into_iter()
        .all(|message| to_client.send(message).is_ok())
}

/// The handshake URL carries the access token; keep it out of the logs
fn redact(url: &Url) -> String {
    let mut shown = url.clone();
    if shown.query().is_some() {
        shown.set_query(Some("access_token=***"));
    }
    shown.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn pair_is_cross_wired() {
        let (client, mut broker) = TransportLink::pair();
        client.outbound.send("CONNECT".to_string()).unwrap();
        assert_eq!(broker.inbound.recv().await.as_deref(), Some("CONNECT"));

        drop(client);
        assert!(broker.inbound.recv().await.is_none());
        assert!(broker.outbound.is_closed());
    }

    #[tokio::test]
    async fn sockjs_delivery_unwraps_arrays() {
        let (tx, mut rx) = mpsc::unbounded_channel();

        assert!(deliver(Framing::SockJs, "o".to_string(), &tx));
        assert!(deliver(Framing::SockJs, "h".to_string(), &tx));
        assert!(deliver(Framing::SockJs, r#"a["one","two"]"#.to_string(), &tx));
        assert!(deliver(Framing::SockJs, "zzz".to_string(), &tx));
        assert!(!deliver(Framing::SockJs, r#"c[1000,"bye"]"#.to_string(), &tx));

        assert_eq!(rx.recv().await.as_deref(), Some("one"));
        assert_eq!(rx.recv().await.as_deref(), Some("two"));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn raw_delivery_passes_through() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        assert!(deliver(Framing::Raw, "a[\"x\"]".to_string(), &tx));
        assert_eq!(rx.recv().await.as_deref(), Some("a[\"x\"]"));

        drop(rx);
        assert!(!deliver(Framing::Raw, "late".to_string(), &tx));
    }

    #[test]
    fn redact_hides_token() {
        let url = Url::parse("ws://localhost:8080/websocket/chat?access_token=secret").unwrap();
        let shown = redact(&url);
        assert!(!shown.contains("secret"));

        let url = Url::parse("ws://localhost:8080/websocket/chat").unwrap();
        assert_eq!(redact(&url), "ws://localhost:8080/websocket/chat");
    }
}
