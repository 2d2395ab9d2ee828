//! Direct transaction relay.
//!
//! Fans a signed transaction out to up to eight peers concurrently. Each
//! peer dialog is serial: dial (5 s budget) → exchange `version`/`verack`
//! (10 s budget) → write `tx` → linger briefly so the bytes flush → close.
//! A failing peer never disturbs the others; the broadcast as a whole
//! succeeds iff at least one peer completed the dialog. Once the fan-out
//! starts it is drained to completion — the transaction may already be on
//! the wire, so there is no caller-driven cancellation.

use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::task::JoinSet;

use crate::error::{Error, Result};
use crate::network::Network;
use crate::wire::codec::{
    build_version_payload, encode_message, parse_header, PeerInfo, HEADER_LEN,
};
use crate::wire::discovery::discover_peers;

pub const MAX_RELAY_PEERS: usize = 8;

const DIAL_TIMEOUT: Duration = Duration::from_secs(5);
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);
/// Grace period after writing the tx so the peer reads it before we close.
const POST_TX_LINGER: Duration = Duration::from_millis(500);
const READ_CHUNK: usize = 4096;

/// Why one peer dialog died.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeerFailure {
    Timeout,
    Rejected(String),
    Socket(String),
    Disconnected,
}

impl std::fmt::Display for PeerFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PeerFailure::Timeout => write!(f, "timed out"),
            PeerFailure::Rejected(reason) => write!(f, "rejected: {reason}"),
            PeerFailure::Socket(e) => write!(f, "socket error: {e}"),
            PeerFailure::Disconnected => write!(f, "closed before handshake completed"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct PeerOutcome {
    pub peer: PeerInfo,
    pub failure: Option<PeerFailure>,
}

impl PeerOutcome {
    pub fn reached(&self) -> bool {
        self.failure.is_none()
    }
}

impl From<PeerFailure> for Error {
    fn from(failure: PeerFailure) -> Self {
        match failure {
            PeerFailure::Timeout => Error::PeerTimeout,
            PeerFailure::Rejected(reason) => Error::PeerRejected(reason),
            PeerFailure::Socket(e) => Error::PeerSocket(e),
            PeerFailure::Disconnected => {
                Error::PeerSocket("closed before handshake completed".into())
            }
        }
    }
}

/// Result of one broadcast attempt.
#[derive(Debug, Clone)]
pub struct BroadcastReport {
    pub success: bool,
    pub peers_reached: u32,
    pub outcomes: Vec<PeerOutcome>,
}

impl BroadcastReport {
    /// Error out unless at least one peer completed the dialog.
    pub fn require_success(&self) -> Result<()> {
        if self.success {
            Ok(())
        } else {
            Err(Error::BroadcastBelowThreshold)
        }
    }
}

/// Discover peers and relay a signed transaction to them.
pub async fn broadcast_transaction(network: Network, raw_tx_hex: &str) -> Result<BroadcastReport> {
    let tx_bytes =
        hex::decode(raw_tx_hex).map_err(|e| Error::TxEncoding(format!("bad tx hex: {e}")))?;
    let peers = discover_peers(network, MAX_RELAY_PEERS).await;
    Ok(broadcast_to_peers(network, &peers, tx_bytes).await)
}

/// Relay a signed transaction to a fixed peer set.
pub async fn broadcast_to_peers(
    network: Network,
    peers: &[PeerInfo],
    tx_bytes: Vec<u8>,
) -> BroadcastReport {
    let tx = Arc::new(tx_bytes);
    let mut tasks = JoinSet::new();
    for peer in peers.iter().take(MAX_RELAY_PEERS).copied() {
        let tx = Arc::clone(&tx);
        tasks.spawn(async move {
            let failure = relay_to_peer(network, peer, &tx).await.err();
            PeerOutcome { peer, failure }
        });
    }

    let mut outcomes = Vec::with_capacity(peers.len());
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok(outcome) => {
                match &outcome.failure {
                    None => log::debug!("relay: peer {} accepted the dialog", outcome.peer),
                    Some(failure) => log::debug!("relay: peer {} {failure}", outcome.peer),
                }
                outcomes.push(outcome);
            }
            Err(e) => log::warn!("relay: peer task failed to join: {e}"),
        }
    }

    let peers_reached = outcomes.iter().filter(|o| o.reached()).count() as u32;
    let report = BroadcastReport {
        success: peers_reached >= 1,
        peers_reached,
        outcomes,
    };
    log::info!(
        "relay: broadcast reached {}/{} peers",
        report.peers_reached,
        peers.len().min(MAX_RELAY_PEERS)
    );
    report
}

/// One complete peer dialog.
async fn relay_to_peer(
    network: Network,
    peer: PeerInfo,
    tx_bytes: &[u8],
) -> std::result::Result<(), PeerFailure> {
    // Dialing.
    let mut stream = match tokio::time::timeout(
        DIAL_TIMEOUT,
        TcpStream::connect((peer.ip, peer.port)),
    )
    .await
    {
        Err(_) => return Err(PeerFailure::Timeout),
        Ok(Err(e)) => return Err(PeerFailure::Socket(e.to_string())),
        Ok(Ok(stream)) => stream,
    };

    // Opened: introduce ourselves, then drive the handshake to completion
    // under its own budget.
    let now = chrono::Utc::now().timestamp();
    let version = encode_message(network, "version", &build_version_payload(&peer, now));
    stream
        .write_all(&version)
        .await
        .map_err(|e| PeerFailure::Socket(e.to_string()))?;

    match tokio::time::timeout(HANDSHAKE_TIMEOUT, handshake(network, &mut stream)).await {
        Err(_) => return Err(PeerFailure::Timeout),
        Ok(Err(failure)) => return Err(failure),
        Ok(Ok(())) => {}
    }

    // Ready: ship the transaction, give the peer a moment, close.
    let tx_msg = encode_message(network, "tx", tx_bytes);
    stream
        .write_all(&tx_msg)
        .await
        .map_err(|e| PeerFailure::Socket(e.to_string()))?;
    tokio::time::sleep(POST_TX_LINGER).await;
    let _ = stream.shutdown().await;
    Ok(())
}

/// Read until the peer has sent both `version` and `verack`, replying with
/// our `verack` along the way. `reject` is terminal; everything else is
/// ignored silently.
async fn handshake(
    network: Network,
    stream: &mut TcpStream,
) -> std::result::Result<(), PeerFailure> {
    let mut buf: Vec<u8> = Vec::new();
    let mut chunk = [0u8; READ_CHUNK];
    let mut got_version = false;
    let mut got_verack = false;
    let mut verack_sent = false;

    loop {
        for (command, payload) in drain_messages(network, &mut buf) {
            match command.as_str() {
                "version" => {
                    got_version = true;
                    if !verack_sent {
                        let verack = encode_message(network, "verack", &[]);
                        stream
                            .write_all(&verack)
                            .await
                            .map_err(|e| PeerFailure::Socket(e.to_string()))?;
                        verack_sent = true;
                    }
                }
                "verack" => got_verack = true,
                "reject" => return Err(PeerFailure::Rejected(parse_reject(&payload))),
                _ => {}
            }
        }
        if got_version && got_verack {
            return Ok(());
        }

        let n = stream
            .read(&mut chunk)
            .await
            .map_err(|e| PeerFailure::Socket(e.to_string()))?;
        if n == 0 {
            return Err(PeerFailure::Disconnected);
        }
        buf.extend_from_slice(&chunk[..n]);
    }
}

/// Pull every complete message off the front of the receive buffer.
///
/// A magic mismatch discards a single byte and retries, resynchronizing on
/// the next frame boundary; an incomplete message is left in place until
/// more bytes arrive.
fn drain_messages(network: Network, buf: &mut Vec<u8>) -> Vec<(String, Vec<u8>)> {
    let mut messages = Vec::new();
    loop {
        if buf.len() < HEADER_LEN {
            return messages;
        }
        match parse_header(network, buf) {
            None => {
                buf.remove(0);
            }
            Some(header) => {
                let total = header.message_len();
                if buf.len() < total {
                    return messages;
                }
                let payload = buf[HEADER_LEN..total].to_vec();
                buf.drain(..total);
                messages.push((header.command, payload));
            }
        }
    }
}

/// Best-effort extraction of the reason from a `reject` payload:
/// varstring message, u8 ccode, varstring reason.
fn parse_reject(payload: &[u8]) -> String {
    use crate::wire::codec::decode_varstring;

    let Some((message, consumed)) = decode_varstring(payload) else {
        return "reject".into();
    };
    let Some(&ccode) = payload.get(consumed) else {
        return message;
    };
    match decode_varstring(&payload[consumed + 1..]) {
        Some((reason, _)) if !reason.is_empty() => {
            format!("{message} (0x{ccode:02X}): {reason}")
        }
        _ => format!("{message} (0x{ccode:02X})"),
    }
}
