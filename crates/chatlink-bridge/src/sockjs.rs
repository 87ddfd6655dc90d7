//! SockJS websocket framing
//!
//! The broker endpoint is a SockJS endpoint. Over its raw websocket transport
//! the server wraps payloads: `o` open, `h` heartbeat, `a[...]` a JSON array
//! of messages, `c[code,"reason"]` close. Client messages go out as a JSON
//! array of strings.

use url::Url;
use uuid::Uuid;

use crate::error::TransportError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SockJsFrame {
    Open,
    Heartbeat,
    Messages(Vec<String>),
    Close { code: u16, reason: String },
}

pub fn decode(text: &str) -> Result<SockJsFrame, TransportError> {
    let kind = text
        .get(..1)
        .ok_or_else(|| TransportError::SockJs("empty frame".to_string()))?;
    let payload = &text[1..];

    match kind {
        "o" => Ok(SockJsFrame::Open),
        "h" => Ok(SockJsFrame::Heartbeat),
        "a" => serde_json::from_str(payload)
            .map(SockJsFrame::Messages)
            .map_err(|e| TransportError::SockJs(format!("bad message array: {}", e))),
        "m" => serde_json::from_str(payload)
            .map(|message| SockJsFrame::Messages(vec![message]))
            .map_err(|e| TransportError::SockJs(format!("bad message: {}", e))),
        "c" => serde_json::from_str::<(u16, String)>(payload)
            .map(|(code, reason)| SockJsFrame::Close { code, reason })
            .map_err(|e| TransportError::SockJs(format!("bad close frame: {}", e))),
        other => Err(TransportError::SockJs(format!("unknown frame type: {}", other))),
    }
}

/// Wrap outbound STOMP text for the server
pub fn encode(messages: &[String]) -> String {
    serde_json::Value::from(messages.to_vec()).to_string()
}

/// `{endpoint}/{server}/{session}/websocket`, keeping the query string
pub fn session_url(endpoint: &Url) -> Result<Url, TransportError> {
    let server = format!("{:03}", Uuid::new_v4().as_u128() % 1000);
    let session = Uuid::new_v4().simple().to_string();

    let mut url = endpoint.clone();
    url.path_segments_mut()
        .map_err(|_| TransportError::Url(endpoint.to_string()))?
        .pop_if_empty()
        .push(&server)
        .push(&session)
        .push("websocket");
    Ok(url)
}
