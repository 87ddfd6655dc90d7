//! Listener stream
//!
//! Multicast of inbound chat messages. The current [`Listener`] is swapped
//! for a fresh one on every leave and every fresh connect, so observers of a
//! previous chat never see messages of the next one.

use std::sync::atomic::{AtomicU64, Ordering};

use chatlink_core::Message;
use futures::Stream;
use parking_lot::RwLock;
use tokio::sync::broadcast;
use tracing::{debug, warn};

pub const DEFAULT_CAPACITY: usize = 256;

/// One instance of the stream. Observers attach with [`Listener::subscribe`]
/// or [`Listener::stream`] and only see messages published after that.
#[derive(Debug, Clone)]
pub struct Listener {
    sender: broadcast::Sender<Message>,
    generation: u64,
}

impl Listener {
    fn new(capacity: usize, generation: u64) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender, generation }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Message> {
        self.sender.subscribe()
    }

    /// Messages as a stream; a slow observer skips what it lagged behind on
    pub fn stream(&self) -> impl Stream<Item = Message> + Send + 'static {
        let mut rx = self.subscribe();
        let generation = self.generation;
        async_stream::stream! {
            loop {
                match rx.recv().await {
                    Ok(message) => yield message,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(generation, skipped, "Listener observer lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        }
    }

    /// Returns the number of observers that got the message
    pub fn publish(&self, message: Message) -> usize {
        self.sender.send(message).unwrap_or(0)
    }

    pub fn observer_count(&self) -> usize {
        self.sender.receiver_count()
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Both handles point at the same instance
    pub fn same_instance(&self, other: &Listener) -> bool {
        self.sender.same_channel(&other.sender)
    }
}

#[derive(Debug)]
pub struct ListenerStream {
    current: RwLock<Listener>,
    capacity: usize,
    generations: AtomicU64,
}

impl Default for ListenerStream {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl ListenerStream {
    pub fn new(capacity: usize) -> Self {
        Self {
            current: RwLock::new(Listener::new(capacity, 0)),
            capacity,
            generations: AtomicU64::new(1),
        }
    }

    /// The current instance
    pub fn observe(&self) -> Listener {
        self.current.read().clone()
    }

    /// Install a new empty instance and return it
    pub fn replace(&self) -> Listener {
        let generation = self.generations.fetch_add(1, Ordering::SeqCst);
        let fresh = Listener::new(self.capacity, generation);
        let previous = std::mem::replace(&mut *self.current.write(), fresh.clone());
        debug!(
            previous = previous.generation,
            current = generation,
            "Listener stream replaced"
        );
        fresh
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    fn message(id: &str) -> Message {
        serde_json::from_value(serde_json::json!({ "id": id, "text": "hi" })).unwrap()
    }

    #[tokio::test]
    async fn multicast_without_replay() {
        let stream = ListenerStream::default();
        let listener = stream.observe();

        let mut early = listener.subscribe();
        assert_eq!(listener.publish(message("m1")), 1);

        let mut late = listener.subscribe();
        assert_eq!(listener.observer_count(), 2);
        assert_eq!(listener.publish(message("m2")), 2);

        assert_eq!(early.recv().await.unwrap(), message("m1"));
        assert_eq!(early.recv().await.unwrap(), message("m2"));
        assert_eq!(late.recv().await.unwrap(), message("m2"));
        assert!(late.try_recv().is_err());
    }

    #[tokio::test]
    async fn replace_detaches_old_observers() {
        let stream = ListenerStream::default();
        let old = stream.observe();
        let mut old_rx = old.subscribe();

        let fresh = stream.replace();
        assert!(!fresh.same_instance(&old));
        assert!(stream.observe().same_instance(&fresh));
        assert!(fresh.generation() > old.generation());
        assert_eq!(fresh.observer_count(), 0);

        let mut new_rx = stream.observe().subscribe();
        stream.observe().publish(message("m3"));
        assert_eq!(new_rx.recv().await.unwrap(), message("m3"));
        assert!(old_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn stream_ends_when_instance_is_gone() {
        let stream = ListenerStream::new(4);
        let listener = stream.observe();
        let observed = listener.stream();
        tokio::pin!(observed);

        listener.publish(message("m1"));
        assert_eq!(observed.next().await, Some(message("m1")));

        drop(listener);
        stream.replace();
        assert_eq!(observed.next().await, None);
    }

    #[tokio::test]
    async fn stream_skips_lag() {
        let stream = ListenerStream::new(2);
        let listener = stream.observe();
        let observed = listener.stream();
        tokio::pin!(observed);

        for id in ["m1", "m2", "m3", "m4"] {
            listener.publish(message(id));
        }
        assert_eq!(observed.next().await, Some(message("m3")));
        assert_eq!(observed.next().await, Some(message("m4")));
    }
}
