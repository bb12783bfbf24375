//! Peer protocol: wire messages, inbound dispatch and LAN discovery.

mod discovery;
mod handler;
mod message;

pub use discovery::{
    broadcast_target, discover_peers, DiscoveredPeer, DiscoveryDatagram, DiscoveryResponder,
    PROBE_TAG, RESPONSE_TAG,
};
pub use handler::{dispatch, HandleOutcome, PeerEvent};
pub use message::PeerMessage;
