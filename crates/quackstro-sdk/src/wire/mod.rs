//! Dogecoin P2P wire layer: message framing, peer discovery over DNS seeds,
//! and the direct transaction relay engine.

pub mod codec;
pub mod discovery;
pub mod relay;

pub use codec::{encode_message, parse_header, MessageHeader, PeerInfo};
pub use discovery::discover_peers;
pub use relay::{
    broadcast_to_peers, broadcast_transaction, BroadcastReport, PeerFailure, PeerOutcome,
};
