//! LAN peer discovery over UDP.
//!
//! A prober broadcasts `DISCOVERY|<username>` to the discovery port. Each
//! responder answers `DISCOVERY_RESPONSE|<username>|<tcp port>` to the
//! address the probe came from. Discovery only reports who is out there; it
//! never touches the contact registry.

use std::collections::BTreeMap;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::time::Duration;

use tokio::net::UdpSocket;
use tokio::time::{timeout_at, Instant};
use tracing::{debug, info, warn};

use crate::error::MessengerError;

/// First field of a probe.
pub const PROBE_TAG: &str = "DISCOVERY";

/// First field of a response.
pub const RESPONSE_TAG: &str = "DISCOVERY_RESPONSE";

/// Largest datagram we read.
const MAX_DATAGRAM: usize = 1024;

/// A parsed discovery datagram.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiscoveryDatagram {
    Probe { username: String },
    Response { username: String, port: u16 },
}

impl DiscoveryDatagram {
    /// Parses a datagram. Returns `None` for anything that isn't exactly a
    /// probe or a response.
    pub fn parse(bytes: &[u8]) -> Option<Self> {
        let text = std::str::from_utf8(bytes).ok()?;
        let fields: Vec<&str> = text.trim_end().split('|').collect();

        match fields.as_slice() {
            [PROBE_TAG, username] if !username.is_empty() => Some(Self::Probe {
                username: username.to_string(),
            }),
            [RESPONSE_TAG, username, port] if !username.is_empty() => Some(Self::Response {
                username: username.to_string(),
                port: port.parse().ok()?,
            }),
            _ => None,
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        match self {
            Self::Probe { username } => format!("{PROBE_TAG}|{username}"),
            Self::Response { username, port } => format!("{RESPONSE_TAG}|{username}|{port}"),
        }
        .into_bytes()
    }
}

/// A peer that answered a probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredPeer {
    pub username: String,
    /// Responder IP with its advertised TCP port.
    pub addr: SocketAddr,
}

/// Answers discovery probes on behalf of a listening node.
#[derive(Debug)]
pub struct DiscoveryResponder {
    socket: UdpSocket,
    username: String,
    listen_port: u16,
}

impl DiscoveryResponder {
    /// Binds the discovery socket.
    pub async fn bind(
        addr: SocketAddr,
        username: impl Into<String>,
        listen_port: u16,
    ) -> Result<Self, MessengerError> {
        let socket = UdpSocket::bind(addr).await.map_err(|e| {
            MessengerError::Transport(format!("Failed to bind discovery socket: {}", e))
        })?;
        Ok(Self {
            socket,
            username: username.into(),
            listen_port,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, MessengerError> {
        Ok(self.socket.local_addr()?)
    }

    /// Waits for one datagram and answers it if it is a probe.
    ///
    /// Returns the address answered, or `None` if the datagram was ignored.
    pub async fn respond_once(&self) -> Result<Option<SocketAddr>, MessengerError> {
        let mut buf = [0u8; MAX_DATAGRAM];
        let (len, from) = self.socket.recv_from(&mut buf).await?;

        let Some(DiscoveryDatagram::Probe { username }) = DiscoveryDatagram::parse(&buf[..len]) else {
            debug!(%from, "ignoring non-probe datagram");
            return Ok(None);
        };

        let response = DiscoveryDatagram::Response {
            username: self.username.clone(),
            port: self.listen_port,
        };
        self.socket.send_to(&response.to_bytes(), from).await?;
        info!(%from, prober = %username, "answered discovery probe");
        Ok(Some(from))
    }

    /// Answers probes until the task is dropped.
    pub async fn run(self) {
        loop {
            if let Err(e) = self.respond_once().await {
                warn!(error = %e, "discovery responder error");
            }
        }
    }
}

/// Broadcast address on the given port.
pub fn broadcast_target(port: u16) -> SocketAddr {
    SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::BROADCAST, port))
}

/// Probes `target` and collects responses for `wait`.
///
/// Responses carrying our own username are dropped. Results are unique by
/// address and sorted.
pub async fn discover_peers(
    username: &str,
    target: SocketAddr,
    wait: Duration,
) -> Result<Vec<DiscoveredPeer>, MessengerError> {
    let socket = UdpSocket::bind(SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, 0)))
        .await
        .map_err(|e| MessengerError::Transport(format!("Failed to bind probe socket: {}", e)))?;
    socket.set_broadcast(true)?;

    let probe = DiscoveryDatagram::Probe {
        username: username.to_string(),
    };
    socket
        .send_to(&probe.to_bytes(), target)
        .await
        .map_err(|e| MessengerError::Transport(format!("Failed to send discovery probe: {}", e)))?;
    debug!(%target, "sent discovery probe");

    let deadline = Instant::now() + wait;
    let mut found = BTreeMap::new();
    let mut buf = [0u8; MAX_DATAGRAM];

    loop {
        let (len, from) = match timeout_at(deadline, socket.recv_from(&mut buf)).await {
            Err(_elapsed) => break,
            Ok(Err(e)) => {
                debug!(error = %e, "discovery receive failed");
                continue;
            }
            Ok(Ok(received)) => received,
        };

        match DiscoveryDatagram::parse(&buf[..len]) {
            Some(DiscoveryDatagram::Response { username: peer, port }) if peer != username => {
                let addr = SocketAddr::new(from.ip(), port);
                found.insert(addr, peer);
            }
            _ => debug!(%from, "ignoring discovery datagram"),
        }
    }

    Ok(found
        .into_iter()
        .map(|(addr, username)| DiscoveredPeer { username, addr })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn localhost() -> SocketAddr {
        "127.0.0.1:0".parse().unwrap()
    }

    #[test]
    fn test_parse_datagrams() {
        assert_eq!(
            DiscoveryDatagram::parse(b"DISCOVERY|alice"),
            Some(DiscoveryDatagram::Probe {
                username: "alice".to_string()
            })
        );
        assert_eq!(
            DiscoveryDatagram::parse(b"DISCOVERY_RESPONSE|bob|12345"),
            Some(DiscoveryDatagram::Response {
                username: "bob".to_string(),
                port: 12345
            })
        );

        for bad in [
            &b"DISCOVERY"[..],
            b"DISCOVERY|",
            b"DISCOVERY|a|b",
            b"DISCOVERY_RESPONSE|bob",
            b"DISCOVERY_RESPONSE|bob|99999",
            b"HELLO|bob",
            b"\xff\xfe",
        ] {
            assert_eq!(DiscoveryDatagram::parse(bad), None);
        }
    }

    #[test]
    fn test_encode() {
        let response = DiscoveryDatagram::Response {
            username: "bob".to_string(),
            port: 4000,
        };
        assert_eq!(response.to_bytes(), b"DISCOVERY_RESPONSE|bob|4000".to_vec());
        assert_eq!(DiscoveryDatagram::parse(&response.to_bytes()), Some(response));
    }

    #[tokio::test]
    async fn test_responder_replies_to_sender() {
        let responder = DiscoveryResponder::bind(localhost(), "bob", 4000).await.unwrap();
        let responder_addr = responder.local_addr().unwrap();
        let task = tokio::spawn(async move { responder.respond_once().await });

        let prober = UdpSocket::bind(localhost()).await.unwrap();
        prober.send_to(b"DISCOVERY|alice", responder_addr).await.unwrap();

        let mut buf = [0u8; 64];
        let (len, from) = prober.recv_from(&mut buf).await.unwrap();
        assert_eq!(from, responder_addr);
        assert_eq!(&buf[..len], b"DISCOVERY_RESPONSE|bob|4000");
        assert_eq!(task.await.unwrap().unwrap(), Some(prober.local_addr().unwrap()));
    }

    #[tokio::test]
    async fn test_responder_ignores_garbage() {
        let responder = DiscoveryResponder::bind(localhost(), "bob", 4000).await.unwrap();
        let responder_addr = responder.local_addr().unwrap();
        let task = tokio::spawn(async move { responder.respond_once().await });

        let sender = UdpSocket::bind(localhost()).await.unwrap();
        sender.send_to(b"DISCOVERY_RESPONSE|eve|1", responder_addr).await.unwrap();

        assert_eq!(task.await.unwrap().unwrap(), None);
    }

    #[tokio::test]
    async fn test_discover_peers() {
        let bob = DiscoveryResponder::bind(localhost(), "bob", 4000).await.unwrap();
        let bob_addr = bob.local_addr().unwrap();
        let task = tokio::spawn(bob.run());

        let peers = discover_peers("alice", bob_addr, Duration::from_millis(300))
            .await
            .unwrap();
        task.abort();

        assert_eq!(
            peers,
            vec![DiscoveredPeer {
                username: "bob".to_string(),
                addr: "127.0.0.1:4000".parse().unwrap(),
            }]
        );
    }

    #[tokio::test]
    async fn test_discover_drops_own_username() {
        let me = DiscoveryResponder::bind(localhost(), "alice", 4000).await.unwrap();
        let addr = me.local_addr().unwrap();
        let task = tokio::spawn(me.run());

        let peers = discover_peers("alice", addr, Duration::from_millis(200))
            .await
            .unwrap();
        task.abort();

        assert!(peers.is_empty());
    }
}
