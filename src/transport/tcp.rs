//! TCP transport for peer connections.

use std::net::SocketAddr;

use async_trait::async_trait;
use tokio::io::{BufReader, BufWriter};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener as TokioTcpListener, TcpStream, ToSocketAddrs};

use crate::error::MessengerError;
use crate::protocol::PeerMessage;
use crate::transport::{FrameReader, FrameWriter, PeerTransport};

/// Read half of a framed TCP connection.
pub type TcpFrameReader = FrameReader<BufReader<OwnedReadHalf>>;

/// Write half of a framed TCP connection.
pub type TcpFrameWriter = FrameWriter<BufWriter<OwnedWriteHalf>>;

/// A framed TCP connection to one peer.
#[derive(Debug)]
pub struct TcpConnection {
    reader: TcpFrameReader,
    writer: TcpFrameWriter,
    peer_addr: SocketAddr,
}

impl TcpConnection {
    /// Wrap an established stream.
    pub fn new(stream: TcpStream, max_frame_len: usize) -> Result<Self, MessengerError> {
        let peer_addr = stream.peer_addr()?;
        let (read_half, write_half) = stream.into_split();

        Ok(Self {
            reader: FrameReader::new(BufReader::new(read_half), max_frame_len),
            writer: FrameWriter::new(BufWriter::new(write_half), max_frame_len),
            peer_addr,
        })
    }

    /// Connect to a remote address.
    pub async fn connect<A: ToSocketAddrs>(
        addr: A,
        max_frame_len: usize,
    ) -> Result<Self, MessengerError> {
        let stream = TcpStream::connect(addr)
            .await
            .map_err(|e| MessengerError::Transport(format!("Failed to connect: {}", e)))?;
        Self::new(stream, max_frame_len)
    }

    pub fn remote_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    /// Split into independently owned read and write halves.
    pub fn into_split(self) -> (TcpFrameReader, TcpFrameWriter) {
        (self.reader, self.writer)
    }
}

#[async_trait]
impl PeerTransport for TcpConnection {
    async fn send(&mut self, message: &PeerMessage) -> Result<(), MessengerError> {
        self.writer.write_message(message).await
    }

    async fn receive(&mut self) -> Result<Option<PeerMessage>, MessengerError> {
        self.reader.read_message().await
    }

    async fn close(&mut self) -> Result<(), MessengerError> {
        self.writer.shutdown().await
    }

    fn peer_addr(&self) -> String {
        self.peer_addr.to_string()
    }
}

/// TCP listener for accepting peer connections.
#[derive(Debug)]
pub struct TcpListener {
    listener: TokioTcpListener,
    max_frame_len: usize,
}

impl TcpListener {
    /// Bind to an address and start listening.
    pub async fn bind<A: ToSocketAddrs>(addr: A, max_frame_len: usize) -> Result<Self, MessengerError> {
        let listener = TokioTcpListener::bind(addr)
            .await
            .map_err(|e| MessengerError::Transport(format!("Failed to bind: {}", e)))?;
        Ok(Self {
            listener,
            max_frame_len,
        })
    }

    /// Accept a new connection.
    pub async fn accept(&self) -> Result<TcpConnection, MessengerError> {
        let (stream, _addr) = self
            .listener
            .accept()
            .await
            .map_err(|e| MessengerError::Transport(format!("Failed to accept: {}", e)))?;
        TcpConnection::new(stream, self.max_frame_len)
    }

    /// Get the local address.
    pub fn local_addr(&self) -> Result<SocketAddr, MessengerError> {
        self.listener.local_addr().map_err(|e| {
            MessengerError::Transport(format!("Failed to get local addr: {}", e))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MAX: usize = 64 * 1024;

    fn key_exchange(name: &str) -> PeerMessage {
        PeerMessage::KeyExchange {
            username: name.to_string(),
            public_key: "PEM".to_string(),
        }
    }

    #[tokio::test]
    async fn test_tcp_connection() {
        // Start a listener
        let listener = TcpListener::bind("127.0.0.1:0", MAX).await.unwrap();
        let addr = listener.local_addr().unwrap();

        let client_task = tokio::spawn(async move {
            let mut conn = TcpConnection::connect(addr, MAX).await.unwrap();
            assert_eq!(conn.remote_addr(), addr);

            conn.send(&key_exchange("alice")).await.unwrap();

            let response = conn.receive().await.unwrap();
            assert_eq!(response, Some(key_exchange("bob")));

            conn.close().await.unwrap();
        });

        let mut server_conn = listener.accept().await.unwrap();

        let msg = server_conn.receive().await.unwrap();
        assert_eq!(msg, Some(key_exchange("alice")));

        server_conn.send(&key_exchange("bob")).await.unwrap();

        // Client closes after reading the reply
        assert_eq!(server_conn.receive().await.unwrap(), None);
        client_task.await.unwrap();
    }

    #[tokio::test]
    async fn test_split_halves() {
        let listener = TcpListener::bind("127.0.0.1:0", MAX).await.unwrap();
        let addr = listener.local_addr().unwrap();

        let client = TcpConnection::connect(addr, MAX).await.unwrap();
        let server = listener.accept().await.unwrap();

        let (_client_reader, mut client_writer) = client.into_split();
        let (mut server_reader, _server_writer) = server.into_split();

        client_writer.write_message(&key_exchange("carol")).await.unwrap();
        assert_eq!(
            server_reader.read_message().await.unwrap(),
            Some(key_exchange("carol"))
        );
    }

    #[tokio::test]
    async fn test_connect_refused() {
        let listener = TcpListener::bind("127.0.0.1:0", MAX).await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let result = TcpConnection::connect(addr, MAX).await;
        assert!(matches!(result, Err(MessengerError::Transport(_))));
    }
}
