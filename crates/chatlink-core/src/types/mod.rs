pub mod chat;
pub mod id;
pub mod message;
mod wire;

pub use chat::{Chat, UserRef};
pub use id::{ChannelId, Id};
pub use message::{Media, Message};
