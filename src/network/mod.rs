//! Network Module
//!
//! Framing for topology envelopes over TCP, and the server a master uses
//! to receive them.

mod server;

pub use server::NetworkServer;

use crate::error::{Error, Result};
use crate::replication::Envelope;

/// Upper bound for a single frame body
pub const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

/// Frame header for length-prefixed messages
#[derive(Debug, Clone, Copy)]
pub struct FrameHeader {
    /// Body length
    pub length: u32,
    /// Body checksum
    pub checksum: u32,
}

impl FrameHeader {
    /// Header size in bytes
    pub const SIZE: usize = 8;

    /// Create a new frame header
    pub fn new(data: &[u8]) -> Self {
        Self {
            length: data.len() as u32,
            checksum: crc32fast::hash(data),
        }
    }

    /// Serialize header to bytes
    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut bytes = [0u8; Self::SIZE];
        bytes[0..4].copy_from_slice(&self.length.to_le_bytes());
        bytes[4..8].copy_from_slice(&self.checksum.to_le_bytes());
        bytes
    }

    /// Deserialize header from bytes
    pub fn from_bytes(bytes: &[u8; Self::SIZE]) -> Self {
        let [l0, l1, l2, l3, c0, c1, c2, c3] = *bytes;
        Self {
            length: u32::from_le_bytes([l0, l1, l2, l3]),
            checksum: u32::from_le_bytes([c0, c1, c2, c3]),
        }
    }
}

/// Read a framed envelope from a reader
pub async fn read_envelope<R: tokio::io::AsyncRead + Unpin>(reader: &mut R) -> Result<Envelope> {
    use tokio::io::AsyncReadExt;

    // Read header
    let mut header_bytes = [0u8; FrameHeader::SIZE];
    reader.read_exact(&mut header_bytes).await?;
    let header = FrameHeader::from_bytes(&header_bytes);

    let size = header.length as usize;
    if size > MAX_FRAME_SIZE {
        return Err(Error::FrameTooLarge { size, max: MAX_FRAME_SIZE });
    }

    // Read body
    let mut body = vec![0u8; size];
    reader.read_exact(&mut body).await?;

    // Verify checksum
    let computed_checksum = crc32fast::hash(&body);
    if computed_checksum != header.checksum {
        return Err(Error::Network("Message checksum mismatch".into()));
    }

    Ok(Envelope::deserialize(&body)?)
}

/// Serialize an envelope into a frame body, enforcing the frame size limit
pub fn encode_envelope(envelope: &Envelope) -> Result<Vec<u8>> {
    let body = envelope.serialize()?;
    if body.len() > MAX_FRAME_SIZE {
        return Err(Error::FrameTooLarge { size: body.len(), max: MAX_FRAME_SIZE });
    }
    Ok(body)
}

/// Write an encoded frame body to a writer
pub async fn write_frame<W: tokio::io::AsyncWrite + Unpin>(writer: &mut W, body: &[u8]) -> Result<()> {
    use tokio::io::AsyncWriteExt;

    let header = FrameHeader::new(body);

    writer.write_all(&header.to_bytes()).await?;
    writer.write_all(body).await?;
    writer.flush().await?;

    Ok(())
}

/// Write a framed envelope to a writer
pub async fn write_envelope<W: tokio::io::AsyncWrite + Unpin>(
    writer: &mut W,
    envelope: &Envelope,
) -> Result<()> {
    let body = encode_envelope(envelope)?;
    write_frame(writer, &body).await
}
