//! Transport layer for peer connections.
//!
//! Every logical message on a stream is one frame: a 4-byte little-endian
//! length followed by that many bytes of JSON. A frame that cannot be
//! decoded as a [`PeerMessage`] is skipped without losing sync; a length
//! over the configured maximum, or a stream that ends inside a frame,
//! breaks the connection.

mod tcp;

pub use tcp::{TcpConnection, TcpListener};

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::debug;

use crate::error::MessengerError;
use crate::protocol::PeerMessage;

/// Size of the length prefix.
pub const FRAME_HEADER_LEN: usize = 4;

/// Trait for bidirectional async peer message transport.
#[async_trait]
pub trait PeerTransport: Send {
    /// Send a peer message.
    async fn send(&mut self, message: &PeerMessage) -> Result<(), MessengerError>;

    /// Receive the next peer message, or `None` once the peer has closed.
    async fn receive(&mut self) -> Result<Option<PeerMessage>, MessengerError>;

    /// Close the connection.
    async fn close(&mut self) -> Result<(), MessengerError>;

    /// Get the peer address as a string.
    fn peer_addr(&self) -> String;
}

/// Reads length-prefixed frames.
#[derive(Debug)]
pub struct FrameReader<R> {
    inner: R,
    max_len: usize,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    pub fn new(inner: R, max_len: usize) -> Self {
        Self { inner, max_len }
    }

    /// Reads one frame body. `None` means the stream ended cleanly between
    /// frames.
    pub async fn read_frame(&mut self) -> Result<Option<Vec<u8>>, MessengerError> {
        let mut header = [0u8; FRAME_HEADER_LEN];
        let mut filled = 0;
        while filled < FRAME_HEADER_LEN {
            let n = self.inner.read(&mut header[filled..]).await?;
            if n == 0 {
                if filled == 0 {
                    return Ok(None);
                }
                return Err(MessengerError::Transport(
                    "connection closed inside frame header".to_string(),
                ));
            }
            filled += n;
        }

        let len = u32::from_le_bytes(header) as usize;
        if len > self.max_len {
            return Err(MessengerError::Transport(format!(
                "Frame too large: {} bytes (max {})",
                len, self.max_len
            )));
        }

        let mut body = vec![0u8; len];
        self.inner.read_exact(&mut body).await.map_err(|e| {
            MessengerError::Transport(format!("connection closed inside frame body: {}", e))
        })?;
        debug!(len, "read frame");
        Ok(Some(body))
    }

    /// Reads and decodes one peer message.
    ///
    /// A body that doesn't decode is a `Protocol` error; the stream stays
    /// positioned at the next frame.
    pub async fn read_message(&mut self) -> Result<Option<PeerMessage>, MessengerError> {
        match self.read_frame().await? {
            Some(body) => PeerMessage::from_bytes(&body).map(Some),
            None => Ok(None),
        }
    }
}

/// Writes length-prefixed frames.
#[derive(Debug)]
pub struct FrameWriter<W> {
    inner: W,
    max_len: usize,
}

impl<W: AsyncWrite + Unpin> FrameWriter<W> {
    pub fn new(inner: W, max_len: usize) -> Self {
        Self { inner, max_len }
    }

    /// Writes and flushes one frame.
    pub async fn write_frame(&mut self, body: &[u8]) -> Result<(), MessengerError> {
        if body.len() > self.max_len {
            return Err(MessengerError::Transport(format!(
                "Frame too large: {} bytes (max {})",
                body.len(),
                self.max_len
            )));
        }

        let len = body.len() as u32;
        self.inner.write_all(&len.to_le_bytes()).await?;
        self.inner.write_all(body).await?;
        self.inner.flush().await?;
        debug!(len, "wrote frame");
        Ok(())
    }

    /// Encodes and writes one peer message.
    pub async fn write_message(&mut self, message: &PeerMessage) -> Result<(), MessengerError> {
        let body = message.to_bytes()?;
        self.write_frame(&body).await
    }

    /// Flushes and shuts down the write side.
    pub async fn shutdown(&mut self) -> Result<(), MessengerError> {
        self.inner.flush().await?;
        self.inner.shutdown().await?;
        Ok(())
    }
}
