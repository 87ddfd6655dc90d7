//! Payload contract shared by the chat bridge and its front-ends.
//!
//! These are data transfer shapes only: the bridge forwards them, it does not
//! own or persist them.

pub mod types;

pub use types::{ChannelId, Chat, Id, Media, Message, UserRef};

/// Broker destination a chat's inbound messages are published on
pub fn chat_topic(channel: &ChannelId) -> String {
    format!("/chat/{}", channel)
}

/// Broker destination outbound messages for a chat are sent to
pub fn chat_send_destination(channel: &ChannelId) -> String {
    format!("/chat/{}/sent", channel)
}

#[cfg(test)]
#[path = "lib_tests.rs"]
mod tests;
