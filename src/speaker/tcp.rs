//! TCP Speaker
//!
//! Maintains one outgoing connection to a remote endpoint, reconnecting
//! until stopped. Envelopes go through a single bounded FIFO queue.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use tokio::io::AsyncReadExt;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch, Notify};
use tokio::time::timeout;

use super::{Speaker, SpeakerPool};
use crate::error::{Error, Result};
use crate::network::{encode_envelope, write_frame};
use crate::replication::Envelope;

/// Connection settings for TCP speakers
#[derive(Debug, Clone)]
pub struct SpeakerConfig {
    /// Connection timeout
    pub connect_timeout: Duration,
    /// Delay between connection attempts
    pub reconnect_interval: Duration,
    /// Outgoing queue capacity
    pub queue_capacity: usize,
}

impl Default for SpeakerConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(5),
            reconnect_interval: Duration::from_secs(1),
            queue_capacity: 10000,
        }
    }
}

/// Speaker backed by a TCP connection
pub struct TcpSpeaker {
    address: String,
    connected: AtomicBool,
    /// Encoded frame bodies
    tx: mpsc::Sender<Vec<u8>>,
    /// Set when the queue overflowed; the connection is then dropped
    overflowed: AtomicBool,
    reset: Notify,
    /// Shutdown signal
    shutdown: watch::Sender<bool>,
}

impl TcpSpeaker {
    /// Add a speaker for `address` to the pool and start its connection
    /// task. Must be called from within a tokio runtime.
    pub fn spawn(
        address: impl Into<String>,
        config: SpeakerConfig,
        pool: &Arc<SpeakerPool>,
    ) -> Arc<Self> {
        let (tx, rx) = mpsc::channel(config.queue_capacity.max(1));
        let (shutdown, shutdown_rx) = watch::channel(false);

        let speaker = Arc::new(Self {
            address: address.into(),
            connected: AtomicBool::new(false),
            tx,
            overflowed: AtomicBool::new(false),
            reset: Notify::new(),
            shutdown,
        });
        pool.add_speaker(speaker.clone());

        let task = Arc::clone(&speaker);
        let pool = Arc::downgrade(pool);
        tokio::spawn(async move {
            task.connection_loop(rx, shutdown_rx, pool, config).await;
        });

        speaker
    }

    /// Stop the connection task
    pub fn stop(&self) {
        let _ = self.shutdown.send(true);
    }

    async fn connection_loop(
        &self,
        mut rx: mpsc::Receiver<Vec<u8>>,
        mut shutdown_rx: watch::Receiver<bool>,
        pool: Weak<SpeakerPool>,
        config: SpeakerConfig,
    ) {
        loop {
            if *shutdown_rx.borrow() {
                break;
            }

            match self.connect(config.connect_timeout).await {
                Ok(stream) => {
                    // Anything still queued was meant for an earlier connection
                    let mut stale = 0usize;
                    while rx.try_recv().is_ok() {
                        stale += 1;
                    }
                    if stale > 0 {
                        tracing::debug!("Discarded {} stale envelopes for {}", stale, self.address);
                    }
                    self.overflowed.store(false, Ordering::SeqCst);
                    self.connected.store(true, Ordering::SeqCst);
                    tracing::info!("Connected to {}", self.address);

                    match pool.upgrade() {
                        Some(pool) => pool.notify_connected(&self.address),
                        None => break,
                    }

                    let result = self.serve(stream, &mut rx, &mut shutdown_rx).await;
                    self.connected.store(false, Ordering::SeqCst);
                    match result {
                        Ok(()) => tracing::info!("Connection to {} closed", self.address),
                        Err(e) => tracing::warn!("Connection to {} lost: {}", self.address, e),
                    }

                    if let Some(pool) = pool.upgrade() {
                        pool.notify_disconnected(&self.address);
                    }
                }
                Err(e) if e.is_retryable() => {
                    tracing::debug!("Failed to connect to {}: {}", self.address, e);
                }
                Err(e) => {
                    tracing::warn!("Failed to connect to {}: {}", self.address, e);
                }
            }

            tokio::select! {
                _ = tokio::time::sleep(config.reconnect_interval) => {}
                _ = shutdown_rx.changed() => {}
            }
        }

        self.connected.store(false, Ordering::SeqCst);
        tracing::debug!("Speaker {} stopped", self.address);
    }

    /// Write queued envelopes until the connection fails, the queue
    /// overflows, or shutdown is requested
    async fn serve(
        &self,
        stream: TcpStream,
        rx: &mut mpsc::Receiver<Vec<u8>>,
        shutdown_rx: &mut watch::Receiver<bool>,
    ) -> Result<()> {
        let (mut reader, mut writer) = stream.into_split();
        // Masters never write back; reading only detects a closed peer
        let mut scratch = [0u8; 64];

        loop {
            tokio::select! {
                body = rx.recv() => {
                    match body {
                        Some(body) => write_frame(&mut writer, &body).await?,
                        None => return Ok(()),
                    }
                }
                read = reader.read(&mut scratch) => {
                    if read? == 0 {
                        return Err(Error::Network("closed by peer".into()));
                    }
                }
                _ = self.reset.notified() => {
                    if self.overflowed.swap(false, Ordering::SeqCst) {
                        return Err(Error::QueueFull(self.address.clone()));
                    }
                }
                _ = shutdown_rx.changed() => return Ok(()),
            }
        }
    }

    async fn connect(&self, connect_timeout: Duration) -> Result<TcpStream> {
        let result = timeout(connect_timeout, TcpStream::connect(&self.address)).await;

        match result {
            Ok(Ok(stream)) => {
                stream.set_nodelay(true)?;
                Ok(stream)
            }
            Ok(Err(e)) => Err(Error::ConnectionFailed {
                address: self.address.clone(),
                reason: e.to_string(),
            }),
            Err(_) => Err(Error::ConnectionTimeout(self.address.clone())),
        }
    }
}

impl Speaker for TcpSpeaker {
    fn id(&self) -> &str {
        &self.address
    }

    fn address(&self) -> &str {
        &self.address
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn send(&self, envelope: Envelope) -> Result<()> {
        if !self.is_connected() {
            return Err(Error::NotConnected(self.address.clone()));
        }

        // Oversized envelopes fail here rather than breaking the connection
        let body = encode_envelope(&envelope)?;
        tracing::trace!("Sending {} to {}", envelope.type_name(), self.address);

        match self.tx.try_send(body) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(_)) => {
                tracing::warn!("Outgoing queue full for {}, resetting connection", self.address);
                self.overflowed.store(true, Ordering::SeqCst);
                self.reset.notify_one();
                Err(Error::QueueFull(self.address.clone()))
            }
            Err(mpsc::error::TrySendError::Closed(_)) => Err(Error::ShuttingDown),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::Elements;
    use crate::network::{NetworkServer, MAX_FRAME_SIZE};
    use crate::replication::Message;

    async fn wait_for<F: Fn() -> bool>(condition: F) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while !condition() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("condition not reached in time");
    }

    fn fast_config() -> SpeakerConfig {
        SpeakerConfig {
            connect_timeout: Duration::from_millis(500),
            reconnect_interval: Duration::from_millis(20),
            queue_capacity: 16,
        }
    }

    #[tokio::test]
    async fn test_speaker_delivers_and_detects_close() {
        let server = Arc::new(NetworkServer::bind("127.0.0.1:0").await.unwrap());
        let address = server.local_addr().unwrap().to_string();
        let (tx, mut rx) = mpsc::channel(16);
        let running = Arc::clone(&server);
        let handle = tokio::spawn(async move { running.run(tx).await });

        let pool = SpeakerPool::new();
        let speaker = TcpSpeaker::spawn(address.clone(), fast_config(), &pool);
        wait_for(|| speaker.is_connected()).await;
        assert_eq!(pool.connected().len(), 1);

        let envelope = Envelope::new("agent-1", 1, Message::Sync(Elements::default()));
        speaker.send(envelope.clone()).unwrap();
        let (_, received) = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(received, envelope);

        server.stop();
        handle.await.unwrap().unwrap();
        drop(server);
        wait_for(|| !speaker.is_connected()).await;
        assert!(matches!(
            speaker.send(envelope),
            Err(Error::NotConnected(_))
        ));

        speaker.stop();
    }

    #[tokio::test]
    async fn test_oversized_envelope_refused_before_queueing() {
        let server = Arc::new(NetworkServer::bind("127.0.0.1:0").await.unwrap());
        let address = server.local_addr().unwrap().to_string();
        let (tx, mut rx) = mpsc::channel(16);
        let running = Arc::clone(&server);
        let handle = tokio::spawn(async move { running.run(tx).await });

        let pool = SpeakerPool::new();
        let speaker = TcpSpeaker::spawn(address, fast_config(), &pool);
        wait_for(|| speaker.is_connected()).await;

        let graph = crate::graph::Graph::new("agent-1");
        let mut metadata = crate::graph::Metadata::new();
        metadata.insert("Blob".into(), "x".repeat(MAX_FRAME_SIZE).into());
        graph.add_node("big".into(), metadata).unwrap();
        let oversized = Envelope::new("agent-1", 1, Message::Sync(graph.elements()));
        assert!(matches!(
            speaker.send(oversized),
            Err(Error::FrameTooLarge { .. })
        ));

        // The connection survives and keeps delivering
        let envelope = Envelope::new("agent-1", 1, Message::Sync(Elements::default()));
        speaker.send(envelope.clone()).unwrap();
        let (_, received) = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(received, envelope);
        assert!(speaker.is_connected());

        speaker.stop();
        server.stop();
        handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_unreachable_speaker_stays_disconnected() {
        // Bind then drop to get a port with nothing listening
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let address = listener.local_addr().unwrap().to_string();
        drop(listener);

        let pool = SpeakerPool::new();
        let speaker = TcpSpeaker::spawn(address, fast_config(), &pool);
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert!(!speaker.is_connected());
        assert!(pool.connected().is_empty());
        speaker.stop();
    }
}
