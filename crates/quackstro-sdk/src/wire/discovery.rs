//! Peer discovery via DNS seeds.

use std::collections::HashSet;
use std::net::IpAddr;

use crate::network::Network;
use crate::wire::codec::PeerInfo;

/// Resolve the network's DNS seeds into candidate peers.
///
/// Seeds are queried in order; answers are concatenated, deduplicated by IP,
/// and capped at `limit`. Fails open: a seed that will not resolve is logged
/// and skipped, and an empty vec is a valid (if unhelpful) result.
pub async fn discover_peers(network: Network, limit: usize) -> Vec<PeerInfo> {
    let peers = resolve_seeds(network.dns_seeds(), network.p2p_port(), limit).await;
    log::debug!(
        "discovery: {} candidate peers from {} {network} seeds",
        peers.len(),
        network.dns_seeds().len()
    );
    peers
}

async fn resolve_seeds(seeds: &[&str], port: u16, limit: usize) -> Vec<PeerInfo> {
    let mut seen: HashSet<IpAddr> = HashSet::new();
    let mut peers = Vec::new();

    for seed in seeds {
        if peers.len() >= limit {
            break;
        }
        match tokio::net::lookup_host((*seed, port)).await {
            Ok(addrs) => {
                for addr in addrs {
                    if peers.len() >= limit {
                        break;
                    }
                    if seen.insert(addr.ip()) {
                        peers.push(PeerInfo {
                            ip: addr.ip(),
                            port,
                        });
                    }
                }
            }
            Err(e) => {
                log::debug!("discovery: seed {seed} failed to resolve: {e}");
            }
        }
    }

    peers
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn resolves_and_dedupes_local_names() {
        let peers = resolve_seeds(&["localhost", "localhost"], 22556, 8).await;
        assert!(!peers.is_empty());
        let unique: HashSet<_> = peers.iter().map(|p| p.ip).collect();
        assert_eq!(unique.len(), peers.len());
        assert!(peers.iter().all(|p| p.port == 22556));
    }

    #[tokio::test]
    async fn caps_at_limit() {
        let peers = resolve_seeds(&["localhost"], 22556, 1).await;
        assert!(peers.len() <= 1);
    }

    #[tokio::test]
    async fn unresolvable_seed_fails_open() {
        // ".invalid" is reserved and never resolves; the call must return
        // empty rather than erroring.
        let peers = resolve_seeds(&["seed.quackstro.invalid"], 22556, 8).await;
        assert!(peers.is_empty());
    }
}
