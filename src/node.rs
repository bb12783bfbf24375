//! Connection management.
//!
//! A [`Node`] drives the peer protocol over any number of TCP connections.
//! Each connection gets a reader task, which decodes frames and dispatches
//! them to the messenger, and a writer task fed by a channel. Core calls run
//! on the blocking pool since they do RSA and SQLite work.
//!
//! Key exchange replies are suppressed once this side has already sent its
//! own key exchange on a connection, so two nodes never bounce key
//! exchanges back and forth.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::net::ToSocketAddrs;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::envelope::{DecryptedMessage, Envelope};
use crate::error::MessengerError;
use crate::messenger::Messenger;
use crate::protocol::{dispatch, PeerEvent, PeerMessage};
use crate::transport::{TcpConnection, TcpListener};

/// Pause after a failed accept before trying again.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// Notifications emitted by a node.
#[derive(Debug, Clone, PartialEq)]
pub enum NodeEvent {
    Connected { peer: SocketAddr },
    /// A key exchange from `username` was accepted on this connection.
    KeyExchanged { peer: SocketAddr, username: String },
    MessageReceived { peer: SocketAddr, message: DecryptedMessage },
    /// An inbound message failed; the connection stays open.
    MessageRejected { peer: SocketAddr, error: String },
    Disconnected { peer: SocketAddr },
}

struct PeerHandle {
    outbound: mpsc::UnboundedSender<PeerMessage>,
    username: Option<String>,
    /// Sequence number of the latest key exchange received here; 0 if none.
    exchanged_seq: u64,
    sent_key_exchange: Arc<AtomicBool>,
    reader: JoinHandle<()>,
    writer: JoinHandle<()>,
}

struct NodeInner {
    messenger: Arc<Messenger>,
    max_frame_len: usize,
    peers: Mutex<HashMap<SocketAddr, PeerHandle>>,
    listener: Mutex<Option<JoinHandle<()>>>,
    events: mpsc::UnboundedSender<NodeEvent>,
    exchange_seq: AtomicU64,
}

/// Handle to a running node. Cheap to clone.
#[derive(Clone)]
pub struct Node {
    inner: Arc<NodeInner>,
}

impl std::fmt::Debug for Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Node")
            .field("username", &self.inner.messenger.username())
            .finish_non_exhaustive()
    }
}

impl Node {
    /// Creates a node and the receiver for its events.
    pub fn new(
        messenger: Arc<Messenger>,
        max_frame_len: usize,
    ) -> (Self, mpsc::UnboundedReceiver<NodeEvent>) {
        let (events, events_rx) = mpsc::unbounded_channel();
        let node = Self {
            inner: Arc::new(NodeInner {
                messenger,
                max_frame_len,
                peers: Mutex::new(HashMap::new()),
                listener: Mutex::new(None),
                events,
                exchange_seq: AtomicU64::new(0),
            }),
        };
        (node, events_rx)
    }

    pub fn messenger(&self) -> &Arc<Messenger> {
        &self.inner.messenger
    }

    /// Binds a listener and accepts connections in the background.
    ///
    /// Returns the bound address.
    pub async fn listen<A: ToSocketAddrs>(&self, addr: A) -> Result<SocketAddr, MessengerError> {
        let listener = TcpListener::bind(addr, self.inner.max_frame_len).await?;
        let local_addr = listener.local_addr()?;
        info!(%local_addr, "listening for peers");

        let node = self.clone();
        let task = tokio::spawn(async move {
            loop {
                match listener.accept().await {
                    Ok(conn) => {
                        info!(peer = %conn.remote_addr(), "accepted connection");
                        if let Err(e) = node.attach(conn) {
                            warn!(error = %e, "failed to attach connection");
                        }
                    }
                    Err(e) => {
                        warn!(error = %e, "accept failed");
                        tokio::time::sleep(ACCEPT_BACKOFF).await;
                    }
                }
            }
        });

        if let Some(previous) = self.inner.lock_listener()?.replace(task) {
            previous.abort();
        }
        Ok(local_addr)
    }

    /// Dials a peer. Returns the peer address used as its connection id.
    pub async fn connect<A: ToSocketAddrs>(&self, addr: A) -> Result<SocketAddr, MessengerError> {
        let conn = TcpConnection::connect(addr, self.inner.max_frame_len).await?;
        info!(peer = %conn.remote_addr(), "connected");
        self.attach(conn)
    }

    /// Sends our key exchange on a connection.
    pub fn exchange_keys(&self, peer: SocketAddr) -> Result<(), MessengerError> {
        let message = self.inner.messenger.key_exchange_message();
        let peers = self.inner.lock_peers()?;
        let handle = peers
            .get(&peer)
            .ok_or_else(|| MessengerError::Transport(format!("not connected to {}", peer)))?;

        handle.sent_key_exchange.store(true, Ordering::SeqCst);
        handle
            .outbound
            .send(message)
            .map_err(|_| MessengerError::Transport(format!("connection to {} closed", peer)))
    }

    /// Encrypts `plaintext` for `recipient` and sends it on the connection
    /// where `recipient` completed a key exchange.
    pub async fn send_message(
        &self,
        recipient: &str,
        plaintext: &str,
    ) -> Result<Envelope, MessengerError> {
        let peer = self.peer_for(recipient)?.ok_or_else(|| {
            MessengerError::Transport(format!("no connection to {}", recipient))
        })?;

        let messenger = self.inner.messenger.clone();
        let to = recipient.to_string();
        let text = plaintext.to_string();
        let message = tokio::task::spawn_blocking(move || messenger.prepare_outbound(&to, &text))
            .await
            .map_err(|e| MessengerError::Transport(e.to_string()))??;

        let PeerMessage::EncryptedMessage { content, .. } = &message else {
            return Err(MessengerError::Protocol("unexpected outbound message".to_string()));
        };
        let envelope = content.clone();

        self.inner.send_to(peer, message)?;
        debug!(%peer, recipient, key_id = %envelope.key_id, "queued message");
        Ok(envelope)
    }

    /// Closes a connection and waits for pending writes to finish.
    pub async fn disconnect(&self, peer: SocketAddr) -> Result<(), MessengerError> {
        let handle = self
            .inner
            .lock_peers()?
            .remove(&peer)
            .ok_or_else(|| MessengerError::Transport(format!("not connected to {}", peer)))?;

        handle.reader.abort();
        drop(handle.outbound);
        if let Err(e) = handle.writer.await {
            debug!(%peer, error = %e, "writer task ended abnormally");
        }

        info!(%peer, "disconnected");
        self.inner.emit(NodeEvent::Disconnected { peer });
        Ok(())
    }

    /// Open connections with the username learned on each, if any.
    pub fn connections(&self) -> Result<Vec<(SocketAddr, Option<String>)>, MessengerError> {
        let mut connections: Vec<_> = self
            .inner
            .lock_peers()?
            .iter()
            .map(|(addr, handle)| (*addr, handle.username.clone()))
            .collect();
        connections.sort();
        Ok(connections)
    }

    /// Connection on which `username` most recently completed a key exchange.
    pub fn peer_for(&self, username: &str) -> Result<Option<SocketAddr>, MessengerError> {
        Ok(self
            .inner
            .lock_peers()?
            .iter()
            .filter(|(_, handle)| handle.username.as_deref() == Some(username))
            .max_by_key(|(_, handle)| handle.exchanged_seq)
            .map(|(addr, _)| *addr))
    }

    /// Stops accepting and closes every connection.
    pub async fn shutdown(&self) -> Result<(), MessengerError> {
        if let Some(task) = self.inner.lock_listener()?.take() {
            task.abort();
        }

        let peers: Vec<SocketAddr> = self.inner.lock_peers()?.keys().copied().collect();
        for peer in peers {
            // A peer may close on its own while we iterate
            let _ = self.disconnect(peer).await;
        }
        Ok(())
    }

    fn attach(&self, conn: TcpConnection) -> Result<SocketAddr, MessengerError> {
        let peer = conn.remote_addr();
        let (mut reader, mut writer) = conn.into_split();
        let (outbound, mut outbound_rx) = mpsc::unbounded_channel::<PeerMessage>();
        let sent_key_exchange = Arc::new(AtomicBool::new(false));

        let writer_task = tokio::spawn(async move {
            while let Some(message) = outbound_rx.recv().await {
                if let Err(e) = writer.write_message(&message).await {
                    warn!(%peer, error = %e, "write failed");
                    break;
                }
                debug!(%peer, kind = message.kind(), "sent message");
            }
            let _ = writer.shutdown().await;
        });

        // Insert under the lock so the reader can't finish and clean up first
        let mut peers = self.inner.lock_peers()?;
        let inner = self.inner.clone();
        let reply_tx = outbound.clone();
        let sent = sent_key_exchange.clone();
        let reader_task = tokio::spawn(async move {
            loop {
                match reader.read_message().await {
                    Ok(Some(message)) => inner.handle(peer, message, &reply_tx, &sent).await,
                    Ok(None) => break,
                    Err(e) if e.is_connection_fatal() => {
                        warn!(%peer, error = %e, "connection failed");
                        break;
                    }
                    Err(e) => {
                        warn!(%peer, error = %e, "dropping undecodable frame");
                        inner.emit(NodeEvent::MessageRejected {
                            peer,
                            error: e.to_string(),
                        });
                    }
                }
            }
            inner.closed(peer);
        });

        peers.insert(
            peer,
            PeerHandle {
                outbound,
                username: None,
                exchanged_seq: 0,
                sent_key_exchange,
                reader: reader_task,
                writer: writer_task,
            },
        );
        drop(peers);

        self.inner.emit(NodeEvent::Connected { peer });
        Ok(peer)
    }
}

impl NodeInner {
    fn lock_peers(&self) -> Result<MutexGuard<'_, HashMap<SocketAddr, PeerHandle>>, MessengerError> {
        self.peers
            .lock()
            .map_err(|_| MessengerError::Transport("peer table lock poisoned".to_string()))
    }

    fn lock_listener(&self) -> Result<MutexGuard<'_, Option<JoinHandle<()>>>, MessengerError> {
        self.listener
            .lock()
            .map_err(|_| MessengerError::Transport("listener lock poisoned".to_string()))
    }

    fn emit(&self, event: NodeEvent) {
        // Nobody listening is fine
        let _ = self.events.send(event);
    }

    fn send_to(&self, peer: SocketAddr, message: PeerMessage) -> Result<(), MessengerError> {
        self.lock_peers()?
            .get(&peer)
            .ok_or_else(|| MessengerError::Transport(format!("not connected to {}", peer)))?
            .outbound
            .send(message)
            .map_err(|_| MessengerError::Transport(format!("connection to {} closed", peer)))
    }

    async fn handle(
        &self,
        peer: SocketAddr,
        message: PeerMessage,
        reply_tx: &mpsc::UnboundedSender<PeerMessage>,
        sent_key_exchange: &AtomicBool,
    ) {
        debug!(%peer, kind = message.kind(), "received message");
        let messenger = self.messenger.clone();
        let outcome = tokio::task::spawn_blocking(move || dispatch(&messenger, message))
            .await
            .map_err(|e| MessengerError::Transport(e.to_string()))
            .and_then(|result| result);

        let outcome = match outcome {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(%peer, error = %e, "rejected inbound message");
                self.emit(NodeEvent::MessageRejected {
                    peer,
                    error: e.to_string(),
                });
                return;
            }
        };

        match outcome.event {
            PeerEvent::ContactUpdated(contact) => {
                if let Ok(mut peers) = self.lock_peers() {
                    if let Some(handle) = peers.get_mut(&peer) {
                        handle.username = Some(contact.username.clone());
                        handle.exchanged_seq =
                            self.exchange_seq.fetch_add(1, Ordering::SeqCst) + 1;
                    }
                }
                self.emit(NodeEvent::KeyExchanged {
                    peer,
                    username: contact.username,
                });
            }
            PeerEvent::MessageReceived(message) => {
                info!(%peer, sender = %message.sender, "message received");
                self.emit(NodeEvent::MessageReceived { peer, message });
            }
        }

        if let Some(reply) = outcome.reply {
            let is_key_exchange = matches!(reply, PeerMessage::KeyExchange { .. });
            if is_key_exchange && sent_key_exchange.swap(true, Ordering::SeqCst) {
                debug!(%peer, "key exchange already sent on this connection");
                return;
            }
            if reply_tx.send(reply).is_err() {
                debug!(%peer, "connection closed before reply");
            }
        }
    }

    fn closed(&self, peer: SocketAddr) {
        let removed = self
            .lock_peers()
            .map(|mut peers| peers.remove(&peer).is_some())
            .unwrap_or(false);
        if removed {
            info!(%peer, "peer closed connection");
            self.emit(NodeEvent::Disconnected { peer });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::{Identity, KeyMaterial};
    use tokio::time::timeout;

    const MAX: usize = 1024 * 1024;
    const WAIT: Duration = Duration::from_secs(10);

    fn messenger(name: &str) -> Arc<Messenger> {
        Arc::new(
            Messenger::in_memory(Arc::new(Identity::new(name, KeyMaterial::generate().unwrap())))
                .unwrap(),
        )
    }

    async fn next_matching<F>(rx: &mut mpsc::UnboundedReceiver<NodeEvent>, mut pred: F) -> NodeEvent
    where
        F: FnMut(&NodeEvent) -> bool,
    {
        timeout(WAIT, async {
            loop {
                let event = rx.recv().await.expect("event channel closed");
                if pred(&event) {
                    return event;
                }
            }
        })
        .await
        .expect("timed out waiting for node event")
    }

    #[tokio::test]
    async fn test_key_exchange_and_message() {
        let (bob, mut bob_events) = Node::new(messenger("bob"), MAX);
        let bob_addr = bob.listen("127.0.0.1:0").await.unwrap();

        let (alice, mut alice_events) = Node::new(messenger("alice"), MAX);
        let peer = alice.connect(bob_addr).await.unwrap();
        alice.exchange_keys(peer).unwrap();

        next_matching(&mut bob_events, |e| {
            matches!(e, NodeEvent::KeyExchanged { username, .. } if username == "alice")
        })
        .await;
        next_matching(&mut alice_events, |e| {
            matches!(e, NodeEvent::KeyExchanged { username, .. } if username == "bob")
        })
        .await;
        assert_eq!(alice.peer_for("bob").unwrap(), Some(peer));

        alice.send_message("bob", "hello over tcp").await.unwrap();
        let event = next_matching(&mut bob_events, |e| {
            matches!(e, NodeEvent::MessageReceived { .. })
        })
        .await;
        let NodeEvent::MessageReceived { message, .. } = event else {
            unreachable!();
        };
        assert_eq!(message.sender, "alice");
        assert_eq!(message.plaintext, "hello over tcp");
        assert_eq!(bob.messenger().history("alice", 10).unwrap().len(), 1);
        assert_eq!(alice.messenger().history("bob", 10).unwrap().len(), 1);

        alice.shutdown().await.unwrap();
        bob.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_key_exchange_does_not_ping_pong() {
        let (bob, mut bob_events) = Node::new(messenger("bob"), MAX);
        let bob_addr = bob.listen("127.0.0.1:0").await.unwrap();

        let (alice, mut alice_events) = Node::new(messenger("alice"), MAX);
        let peer = alice.connect(bob_addr).await.unwrap();
        alice.exchange_keys(peer).unwrap();

        next_matching(&mut alice_events, |e| matches!(e, NodeEvent::KeyExchanged { .. })).await;
        next_matching(&mut bob_events, |e| matches!(e, NodeEvent::KeyExchanged { .. })).await;

        // Give any stray replies time to arrive
        tokio::time::sleep(Duration::from_millis(300)).await;
        let mut extra = 0;
        while let Ok(event) = bob_events.try_recv() {
            if matches!(event, NodeEvent::KeyExchanged { .. }) {
                extra += 1;
            }
        }
        while let Ok(event) = alice_events.try_recv() {
            if matches!(event, NodeEvent::KeyExchanged { .. }) {
                extra += 1;
            }
        }
        assert_eq!(extra, 0);
        assert_eq!(bob.messenger().contacts().len().unwrap(), 1);
        assert_eq!(alice.messenger().contacts().len().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_routes_to_latest_key_exchange() {
        let (alice, mut alice_events) = Node::new(messenger("alice"), MAX);
        let alice_addr = alice.listen("127.0.0.1:0").await.unwrap();

        let (first, _first_events) = Node::new(messenger("bob"), MAX);
        let (second, _second_events) = Node::new(messenger("bob"), MAX);
        let first_conn = first.connect(alice_addr).await.unwrap();
        let second_conn = second.connect(alice_addr).await.unwrap();

        async fn exchanged(rx: &mut mpsc::UnboundedReceiver<NodeEvent>) -> SocketAddr {
            let event = next_matching(rx, |e| matches!(e, NodeEvent::KeyExchanged { .. })).await;
            let NodeEvent::KeyExchanged { peer, .. } = event else {
                unreachable!();
            };
            peer
        }

        first.exchange_keys(first_conn).unwrap();
        let first_peer = exchanged(&mut alice_events).await;
        assert_eq!(alice.peer_for("bob").unwrap(), Some(first_peer));

        second.exchange_keys(second_conn).unwrap();
        let second_peer = exchanged(&mut alice_events).await;
        assert_ne!(first_peer, second_peer);
        assert_eq!(alice.peer_for("bob").unwrap(), Some(second_peer));

        // A fresh exchange on the older connection takes the route back
        first.exchange_keys(first_conn).unwrap();
        assert_eq!(exchanged(&mut alice_events).await, first_peer);
        assert_eq!(alice.peer_for("bob").unwrap(), Some(first_peer));

        first.shutdown().await.unwrap();
        second.shutdown().await.unwrap();
        alice.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_send_without_connection() {
        let (alice, _events) = Node::new(messenger("alice"), MAX);
        let result = alice.send_message("bob", "hi").await;
        assert!(matches!(result, Err(MessengerError::Transport(_))));
    }

    #[tokio::test]
    async fn test_disconnect() {
        let (bob, mut bob_events) = Node::new(messenger("bob"), MAX);
        let bob_addr = bob.listen("127.0.0.1:0").await.unwrap();

        let (alice, _alice_events) = Node::new(messenger("alice"), MAX);
        let peer = alice.connect(bob_addr).await.unwrap();
        assert_eq!(alice.connections().unwrap(), vec![(peer, None)]);

        alice.disconnect(peer).await.unwrap();
        assert!(alice.connections().unwrap().is_empty());
        assert!(alice.disconnect(peer).await.is_err());

        next_matching(&mut bob_events, |e| matches!(e, NodeEvent::Disconnected { .. })).await;
    }
}
