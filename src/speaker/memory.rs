//! In-process speaker delivering envelopes to a channel.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use tokio::sync::mpsc;

use super::{Speaker, SpeakerPool};
use crate::error::{Error, Result};
use crate::replication::Envelope;

/// Speaker whose "remote end" is an unbounded channel receiver
pub struct MemorySpeaker {
    id: String,
    address: String,
    connected: AtomicBool,
    pool: Weak<SpeakerPool>,
    tx: mpsc::UnboundedSender<Envelope>,
}

impl MemorySpeaker {
    /// Create a disconnected speaker and add it to the pool
    pub fn new(
        id: impl Into<String>,
        pool: &Arc<SpeakerPool>,
    ) -> (Arc<Self>, mpsc::UnboundedReceiver<Envelope>) {
        let id = id.into();
        let (tx, rx) = mpsc::unbounded_channel();
        let speaker = Arc::new(Self {
            address: format!("memory://{}", id),
            id,
            connected: AtomicBool::new(false),
            pool: Arc::downgrade(pool),
            tx,
        });
        pool.add_speaker(speaker.clone());
        (speaker, rx)
    }

    /// Mark the speaker connected and notify the pool
    pub fn connect(&self) {
        if !self.connected.swap(true, Ordering::SeqCst) {
            if let Some(pool) = self.pool.upgrade() {
                pool.notify_connected(&self.id);
            }
        }
    }

    /// Mark the speaker disconnected and notify the pool
    pub fn disconnect(&self) {
        if self.connected.swap(false, Ordering::SeqCst) {
            if let Some(pool) = self.pool.upgrade() {
                pool.notify_disconnected(&self.id);
            }
        }
    }
}

impl Speaker for MemorySpeaker {
    fn id(&self) -> &str {
        &self.id
    }

    fn address(&self) -> &str {
        &self.address
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn send(&self, envelope: Envelope) -> Result<()> {
        if !self.is_connected() {
            return Err(Error::NotConnected(self.id.clone()));
        }
        self.tx.send(envelope).map_err(|_| Error::ShuttingDown)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::Elements;
    use crate::replication::Message;

    #[test]
    fn test_send_requires_connection() {
        let pool = SpeakerPool::new();
        let (speaker, mut rx) = MemorySpeaker::new("m1", &pool);
        let envelope = Envelope::new("agent", 1, Message::Sync(Elements::default()));

        assert!(matches!(
            speaker.send(envelope.clone()),
            Err(Error::NotConnected(_))
        ));

        speaker.connect();
        speaker.send(envelope.clone()).unwrap();
        assert_eq!(rx.try_recv().unwrap(), envelope);
        assert_eq!(speaker.address(), "memory://m1");
    }
}
