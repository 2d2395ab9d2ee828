//! Deterministic registry addresses.
//!
//! Each service category maps to a fixed mainnet address derived from a
//! domain-separated hash, so every wallet computes the same registry
//! endpoints without any lookup service.

use crate::address::encode_base58check;
use crate::error::{Error, Result};
use crate::hashes::hash160;

const REGISTRY_NAMESPACE: &str = "QuackstroProtocol:Registry:v1:";
const REGISTRY_VERSION_BYTE: u8 = 0x1E;

/// The canonical categories, in registry order.
pub const CATEGORIES: [&str; 5] = ["general", "compute", "data", "content", "identity"];

/// Addresses every implementation must reproduce, bit for bit.
const PINNED_ADDRESSES: [(&str, &str); 5] = [
    ("general", "DG7EBGqYFaWnaYeH9QQNEWeT6xY2DqVCzE"),
    ("compute", "DMiK6hDKciWj4NG9Pi7m9dtATduM46sdsT"),
    ("data", "D9mT3x5tsg7UYtxvjs9YwN8HN6EPiroSF6"),
    ("content", "DFhMUCFGhiv7Fd5fA1nvceDwTzPW8zpMi8"),
    ("identity", "DLtg8eRLc4BCZsb18GAvYmDRZC1PDyyJSi"),
];

/// Registry address for a category:
/// `Base58Check(0x1E || RIPEMD160(SHA256(namespace || category)))`.
pub fn registry_address(category: &str) -> String {
    let mut preimage = Vec::with_capacity(REGISTRY_NAMESPACE.len() + category.len());
    preimage.extend_from_slice(REGISTRY_NAMESPACE.as_bytes());
    preimage.extend_from_slice(category.as_bytes());
    encode_base58check(REGISTRY_VERSION_BYTE, &hash160(&preimage))
}

/// Regenerate every canonical address and compare against the pinned table.
/// Run at startup; a mismatch means the build is miscompiled or tampered
/// with and must not move money.
pub fn verify_registry_addresses() -> Result<()> {
    for (category, expected) in PINNED_ADDRESSES {
        let actual = registry_address(category);
        if actual != expected {
            return Err(Error::InvalidAddress(format!(
                "registry self-check failed for {category}: derived {actual}, pinned {expected}"
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pinned_table_reproduces() {
        verify_registry_addresses().unwrap();
    }

    #[test]
    fn every_category_is_pinned() {
        for category in CATEGORIES {
            assert!(
                PINNED_ADDRESSES.iter().any(|(c, _)| *c == category),
                "{category} missing from the pinned table"
            );
        }
    }

    #[test]
    fn addresses_are_mainnet_p2pkh() {
        for category in CATEGORIES {
            let addr = registry_address(category);
            assert!(addr.starts_with('D'), "{category} → {addr}");
            let (version, payload) =
                crate::address::decode_base58check(&addr).unwrap();
            assert_eq!(version, REGISTRY_VERSION_BYTE);
            assert_eq!(payload.len(), 20);
        }
    }

    #[test]
    fn distinct_categories_distinct_addresses() {
        let mut addrs: Vec<String> = CATEGORIES.iter().map(|c| registry_address(c)).collect();
        addrs.sort();
        addrs.dedup();
        assert_eq!(addrs.len(), CATEGORIES.len());
    }
}
