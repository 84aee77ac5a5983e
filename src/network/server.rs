//! Network Server
//!
//! TCP server a master runs to accept topology streams from agents.

use std::net::SocketAddr;

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch};

use super::read_envelope;
use crate::error::{Error, Result};
use crate::replication::Envelope;

/// Network server receiving agent envelopes
pub struct NetworkServer {
    listener: TcpListener,
    /// Shutdown signal
    shutdown: watch::Sender<bool>,
}

impl NetworkServer {
    /// Bind the listening socket
    pub async fn bind(address: &str) -> Result<Self> {
        let listener = TcpListener::bind(address).await?;
        let (shutdown, _) = watch::channel(false);
        Ok(Self { listener, shutdown })
    }

    /// Address the server actually listens on
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept connections and forward every received envelope, tagged with
    /// the peer address, until stopped
    pub async fn run(&self, incoming_tx: mpsc::Sender<(String, Envelope)>) -> Result<()> {
        tracing::info!("Network server listening on {}", self.local_addr()?);

        let mut shutdown_rx = self.shutdown.subscribe();

        loop {
            tokio::select! {
                result = self.listener.accept() => {
                    match result {
                        Ok((socket, addr)) => {
                            let peer_addr = addr.to_string();
                            let incoming_tx = incoming_tx.clone();
                            let shutdown_rx = self.shutdown.subscribe();

                            tokio::spawn(async move {
                                tracing::info!("Agent connected from {}", peer_addr);
                                if let Err(e) = handle_connection(socket, peer_addr.clone(), incoming_tx, shutdown_rx).await {
                                    tracing::warn!("Connection error from {}: {}", peer_addr, e);
                                }
                                tracing::info!("Agent {} disconnected", peer_addr);
                            });
                        }
                        Err(e) => {
                            tracing::error!("Accept error: {}", e);
                        }
                    }
                }
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        break;
                    }
                }
            }
        }

        tracing::info!("Network server stopped");
        Ok(())
    }

    /// Stop the server and its connections
    pub fn stop(&self) {
        let _ = self.shutdown.send(true);
    }
}

/// Handle a single agent connection
async fn handle_connection(
    socket: TcpStream,
    peer_addr: String,
    incoming_tx: mpsc::Sender<(String, Envelope)>,
    mut shutdown_rx: watch::Receiver<bool>,
) -> Result<()> {
    let (mut reader, _writer) = socket.into_split();

    loop {
        tokio::select! {
            result = read_envelope(&mut reader) => {
                match result {
                    Ok(envelope) => {
                        tracing::trace!("Received {} from {}", envelope.type_name(), peer_addr);
                        if incoming_tx.send((peer_addr.clone(), envelope)).await.is_err() {
                            break;
                        }
                    }
                    Err(Error::Io(ref e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                        // Connection closed
                        break;
                    }
                    Err(e) => return Err(e),
                }
            }
            _ = shutdown_rx.changed() => {
                if *shutdown_rx.borrow() {
                    break;
                }
            }
        }
    }

    Ok(())
}
