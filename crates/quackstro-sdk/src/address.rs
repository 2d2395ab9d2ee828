//! Base58Check addresses and the standard script forms the wallet spends
//! to and from.

use crate::error::{Error, Result};
use crate::hashes::hash160;
use crate::network::Network;

// Script opcodes used by the standard output forms.
const OP_DUP: u8 = 0x76;
const OP_HASH160: u8 = 0xA9;
const OP_EQUAL: u8 = 0x87;
const OP_EQUALVERIFY: u8 = 0x88;
const OP_CHECKSIG: u8 = 0xAC;

/// A decoded address: which standard script it pays to, and the 20-byte hash.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressKind {
    P2pkh([u8; 20]),
    P2sh([u8; 20]),
}

/// Base58Check-encode `version || payload`.
pub fn encode_base58check(version: u8, payload: &[u8]) -> String {
    let mut data = Vec::with_capacity(1 + payload.len());
    data.push(version);
    data.extend_from_slice(payload);
    bs58::encode(data).with_check().into_string()
}

/// Decode a Base58Check string into `(version, payload)`.
pub fn decode_base58check(s: &str) -> Result<(u8, Vec<u8>)> {
    let data = bs58::decode(s)
        .with_check(None)
        .into_vec()
        .map_err(|e| Error::InvalidAddress(format!("{s}: {e}")))?;
    if data.is_empty() {
        return Err(Error::InvalidAddress(format!("{s}: empty payload")));
    }
    Ok((data[0], data[1..].to_vec()))
}

/// P2PKH address for a 20-byte pubkey hash.
pub fn p2pkh_address(network: Network, pubkey_hash: &[u8; 20]) -> String {
    encode_base58check(network.p2pkh_version(), pubkey_hash)
}

/// P2SH address for a 20-byte script hash.
pub fn p2sh_address(network: Network, script_hash: &[u8; 20]) -> String {
    encode_base58check(network.p2sh_version(), script_hash)
}

/// P2PKH address of a compressed public key.
pub fn address_from_pubkey(network: Network, pubkey: &[u8; 33]) -> String {
    p2pkh_address(network, &hash160(pubkey))
}

/// WIF encoding of a raw private key (compressed-pubkey form).
pub fn wif_encode(network: Network, secret: &[u8; 32]) -> String {
    let mut payload = Vec::with_capacity(33);
    payload.extend_from_slice(secret);
    payload.push(0x01);
    encode_base58check(network.wif_version(), &payload)
}

/// Decode an address and classify it against the given network's version bytes.
pub fn decode_address(network: Network, s: &str) -> Result<AddressKind> {
    let (version, payload) = decode_base58check(s)?;
    if payload.len() != 20 {
        return Err(Error::InvalidAddress(format!(
            "{s}: payload is {} bytes, expected 20",
            payload.len()
        )));
    }
    let mut hash = [0u8; 20];
    hash.copy_from_slice(&payload);
    if version == network.p2pkh_version() {
        Ok(AddressKind::P2pkh(hash))
    } else if version == network.p2sh_version() {
        Ok(AddressKind::P2sh(hash))
    } else {
        Err(Error::InvalidAddress(format!(
            "{s}: version byte 0x{version:02X} is not valid on {network}"
        )))
    }
}

/// Standard scriptPubKey paying to the given address.
///
/// P2PKH: `OP_DUP OP_HASH160 <20> OP_EQUALVERIFY OP_CHECKSIG` (25 bytes).
/// P2SH: `OP_HASH160 <20> OP_EQUAL` (23 bytes).
pub fn script_pubkey_for_address(network: Network, s: &str) -> Result<Vec<u8>> {
    match decode_address(network, s)? {
        AddressKind::P2pkh(hash) => Ok(p2pkh_script(&hash)),
        AddressKind::P2sh(hash) => Ok(p2sh_script(&hash)),
    }
}

pub fn p2pkh_script(pubkey_hash: &[u8; 20]) -> Vec<u8> {
    let mut script = Vec::with_capacity(25);
    script.push(OP_DUP);
    script.push(OP_HASH160);
    script.push(20);
    script.extend_from_slice(pubkey_hash);
    script.push(OP_EQUALVERIFY);
    script.push(OP_CHECKSIG);
    script
}

pub fn p2sh_script(script_hash: &[u8; 20]) -> Vec<u8> {
    let mut script = Vec::with_capacity(23);
    script.push(OP_HASH160);
    script.push(20);
    script.extend_from_slice(script_hash);
    script.push(OP_EQUAL);
    script
}

/// Classify a raw scriptPubKey into one of the standard forms.
pub fn parse_script_pubkey(script: &[u8]) -> Option<AddressKind> {
    match script {
        [OP_DUP, OP_HASH160, 20, hash @ .., OP_EQUALVERIFY, OP_CHECKSIG] if hash.len() == 20 => {
            let mut h = [0u8; 20];
            h.copy_from_slice(hash);
            Some(AddressKind::P2pkh(h))
        }
        [OP_HASH160, 20, hash @ .., OP_EQUAL] if hash.len() == 20 => {
            let mut h = [0u8; 20];
            h.copy_from_slice(hash);
            Some(AddressKind::P2sh(h))
        }
        _ => None,
    }
}
