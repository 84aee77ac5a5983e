//! Speaker Pool
//!
//! A speaker is a remote endpoint able to receive topology envelopes. The
//! pool tracks a fixed, ordered set of speakers and tells its listeners
//! whenever one of them connects or disconnects.

mod memory;
mod tcp;

pub use memory::MemorySpeaker;
pub use tcp::{SpeakerConfig, TcpSpeaker};

use std::sync::{Arc, Weak};

use parking_lot::RwLock;

use crate::error::Result;
use crate::replication::Envelope;

/// A remote endpoint
pub trait Speaker: Send + Sync {
    /// Stable identifier within the pool
    fn id(&self) -> &str;

    /// Remote address (host:port)
    fn address(&self) -> &str;

    fn is_connected(&self) -> bool;

    /// Queue an envelope for delivery. Never blocks.
    fn send(&self, envelope: Envelope) -> Result<()>;
}

/// Connection state callbacks
pub trait PoolListener: Send + Sync {
    fn on_connected(&self, speaker: &Arc<dyn Speaker>);
    fn on_disconnected(&self, speaker: &Arc<dyn Speaker>);
}

/// Ordered set of candidate endpoints
#[derive(Default)]
pub struct SpeakerPool {
    speakers: RwLock<Vec<Arc<dyn Speaker>>>,
    listeners: RwLock<Vec<Weak<dyn PoolListener>>>,
}

impl SpeakerPool {
    /// Create an empty pool
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Add a speaker. Speakers keep their insertion order.
    pub fn add_speaker(&self, speaker: Arc<dyn Speaker>) {
        let mut speakers = self.speakers.write();
        if speakers.iter().any(|s| s.id() == speaker.id()) {
            tracing::warn!("Speaker {} already in pool", speaker.id());
            return;
        }
        speakers.push(speaker);
    }

    /// All speakers in pool order
    pub fn speakers(&self) -> Vec<Arc<dyn Speaker>> {
        self.speakers.read().clone()
    }

    /// Connected speakers in pool order
    pub fn connected(&self) -> Vec<Arc<dyn Speaker>> {
        self.speakers
            .read()
            .iter()
            .filter(|s| s.is_connected())
            .cloned()
            .collect()
    }

    pub fn get(&self, id: &str) -> Option<Arc<dyn Speaker>> {
        self.speakers.read().iter().find(|s| s.id() == id).cloned()
    }

    pub fn len(&self) -> usize {
        self.speakers.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.speakers.read().is_empty()
    }

    /// Register a listener. The pool keeps only a weak reference.
    pub fn add_listener(&self, listener: Weak<dyn PoolListener>) {
        self.listeners.write().push(listener);
    }

    /// Called by speakers once their connection is established
    pub fn notify_connected(&self, id: &str) {
        if let Some(speaker) = self.get(id) {
            tracing::debug!("Speaker {} connected", id);
            for listener in self.live_listeners() {
                listener.on_connected(&speaker);
            }
        }
    }

    /// Called by speakers once their connection is lost
    pub fn notify_disconnected(&self, id: &str) {
        if let Some(speaker) = self.get(id) {
            tracing::debug!("Speaker {} disconnected", id);
            for listener in self.live_listeners() {
                listener.on_disconnected(&speaker);
            }
        }
    }

    fn live_listeners(&self) -> Vec<Arc<dyn PoolListener>> {
        let mut listeners = self.listeners.write();
        listeners.retain(|l| l.strong_count() > 0);
        listeners.iter().filter_map(Weak::upgrade).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct Recorder {
        events: Mutex<Vec<String>>,
    }

    impl PoolListener for Recorder {
        fn on_connected(&self, speaker: &Arc<dyn Speaker>) {
            self.events.lock().push(format!("up:{}", speaker.id()));
        }
        fn on_disconnected(&self, speaker: &Arc<dyn Speaker>) {
            self.events.lock().push(format!("down:{}", speaker.id()));
        }
    }

    #[test]
    fn test_pool_notifies_listeners() {
        let pool = SpeakerPool::new();
        let recorder = Arc::new(Recorder::default());
        let weak = Arc::downgrade(&recorder) as Weak<dyn PoolListener>;
        pool.add_listener(weak);

        let (a, _rx_a) = MemorySpeaker::new("a", &pool);
        let (b, _rx_b) = MemorySpeaker::new("b", &pool);
        assert_eq!(pool.len(), 2);
        assert!(pool.connected().is_empty());

        b.connect();
        a.connect();
        a.disconnect();

        assert_eq!(*recorder.events.lock(), vec!["up:b", "up:a", "down:a"]);
        let connected: Vec<String> = pool.connected().iter().map(|s| s.id().to_string()).collect();
        assert_eq!(connected, vec!["b"]);
    }

    #[test]
    fn test_duplicate_speaker_ignored() {
        let pool = SpeakerPool::new();
        let (_a, _rx) = MemorySpeaker::new("a", &pool);
        let (_dup, _rx2) = MemorySpeaker::new("a", &pool);

        assert_eq!(pool.len(), 1);
        assert!(pool.get("a").is_some());
        assert!(pool.get("b").is_none());
    }
}
