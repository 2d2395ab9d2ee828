//! Hashing primitives shared across the wire codec, scripts, and addresses.

use ripemd::Ripemd160;
use sha2::{Digest, Sha256};

pub fn sha256(data: &[u8]) -> [u8; 32] {
    Sha256::digest(data).into()
}

/// Double SHA-256, the checksum and txid hash for the wire format.
pub fn sha256d(data: &[u8]) -> [u8; 32] {
    Sha256::digest(Sha256::digest(data)).into()
}

/// RIPEMD160(SHA256(data)) — pubkey hashes, script hashes, HTLC secret hashes.
pub fn hash160(data: &[u8]) -> [u8; 20] {
    Ripemd160::digest(Sha256::digest(data)).into()
}

/// First four bytes of the double SHA-256, as used in message headers.
pub fn checksum4(data: &[u8]) -> [u8; 4] {
    let digest = sha256d(data);
    [digest[0], digest[1], digest[2], digest[3]]
}

/// Convert a display-order hex txid to internal byte order.
pub fn txid_display_to_internal(hex_str: &str) -> Result<[u8; 32], crate::Error> {
    let bytes = hex::decode(hex_str)
        .map_err(|e| crate::Error::TxEncoding(format!("bad txid hex: {e}")))?;
    if bytes.len() != 32 {
        return Err(crate::Error::TxEncoding(format!(
            "txid wrong length: {}",
            bytes.len()
        )));
    }
    let mut arr = [0u8; 32];
    for (i, b) in bytes.iter().rev().enumerate() {
        arr[i] = *b;
    }
    Ok(arr)
}

/// Convert an internal byte-order txid to display-order hex.
pub fn txid_internal_to_display(txid: &[u8; 32]) -> String {
    let mut reversed = *txid;
    reversed.reverse();
    hex::encode(reversed)
}
