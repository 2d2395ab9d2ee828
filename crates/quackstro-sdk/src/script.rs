//! HTLC redeem scripts and their spending scriptSigs.
//!
//! The redeem script is exactly 103 bytes and every position is fixed:
//!
//! ```text
//! OP_IF
//!   OP_HASH160 <20 secret_hash> OP_EQUALVERIFY <33 provider_pubkey> OP_CHECKSIG
//! OP_ELSE
//!   <4 timeout_block_le> OP_CHECKLOCKTIMEVERIFY OP_DROP <33 consumer_pubkey> OP_CHECKSIG
//! OP_ENDIF
//! ```
//!
//! A wrong byte here burns funds, so the parser checks every offset rather
//! than interpreting opcodes.

use rand::RngCore;

use crate::error::{Error, Result};
use crate::hashes::hash160;
use crate::network::Network;

pub const OP_FALSE: u8 = 0x00;
pub const OP_PUSHDATA1: u8 = 0x4C;
pub const OP_TRUE: u8 = 0x51;
pub const OP_IF: u8 = 0x63;
pub const OP_ELSE: u8 = 0x67;
pub const OP_ENDIF: u8 = 0x68;
pub const OP_DROP: u8 = 0x75;
pub const OP_EQUALVERIFY: u8 = 0x88;
pub const OP_HASH160: u8 = 0xA9;
pub const OP_CHECKSIG: u8 = 0xAC;
pub const OP_CHECKLOCKTIMEVERIFY: u8 = 0xB1;

pub const REDEEM_SCRIPT_LEN: usize = 103;

/// The four parameters that pin down one HTLC.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HtlcParams {
    pub secret_hash: [u8; 20],
    pub provider_pubkey: [u8; 33],
    pub consumer_pubkey: [u8; 33],
    /// Absolute block height after which the consumer may refund.
    pub timeout_block: u32,
}

impl HtlcParams {
    /// Validating constructor over raw slices.
    pub fn new(
        secret_hash: &[u8],
        provider_pubkey: &[u8],
        consumer_pubkey: &[u8],
        timeout_block: u32,
    ) -> Result<Self> {
        if secret_hash.len() != 20 {
            return Err(Error::InvalidHtlcParam(format!(
                "secret hash is {} bytes, expected 20",
                secret_hash.len()
            )));
        }
        if provider_pubkey.len() != 33 {
            return Err(Error::InvalidHtlcParam(format!(
                "provider pubkey is {} bytes, expected 33",
                provider_pubkey.len()
            )));
        }
        if consumer_pubkey.len() != 33 {
            return Err(Error::InvalidHtlcParam(format!(
                "consumer pubkey is {} bytes, expected 33",
                consumer_pubkey.len()
            )));
        }
        if timeout_block == 0 {
            return Err(Error::InvalidHtlcParam("timeout block is zero".into()));
        }
        let mut params = HtlcParams {
            secret_hash: [0; 20],
            provider_pubkey: [0; 33],
            consumer_pubkey: [0; 33],
            timeout_block,
        };
        params.secret_hash.copy_from_slice(secret_hash);
        params.provider_pubkey.copy_from_slice(provider_pubkey);
        params.consumer_pubkey.copy_from_slice(consumer_pubkey);
        Ok(params)
    }
}

/// Build the 103-byte redeem script.
pub fn build_redeem_script(params: &HtlcParams) -> Result<Vec<u8>> {
    if params.timeout_block == 0 {
        return Err(Error::InvalidHtlcParam("timeout block is zero".into()));
    }
    let mut script = Vec::with_capacity(REDEEM_SCRIPT_LEN);
    script.push(OP_IF);
    script.push(OP_HASH160);
    script.push(20);
    script.extend_from_slice(&params.secret_hash);
    script.push(OP_EQUALVERIFY);
    script.push(33);
    script.extend_from_slice(&params.provider_pubkey);
    script.push(OP_CHECKSIG);
    script.push(OP_ELSE);
    script.push(4);
    script.extend_from_slice(&params.timeout_block.to_le_bytes());
    script.push(OP_CHECKLOCKTIMEVERIFY);
    script.push(OP_DROP);
    script.push(33);
    script.extend_from_slice(&params.consumer_pubkey);
    script.push(OP_CHECKSIG);
    script.push(OP_ENDIF);
    debug_assert_eq!(script.len(), REDEEM_SCRIPT_LEN);
    Ok(script)
}

/// Parse a redeem script back into its parameters, validating every byte.
pub fn parse_redeem_script(script: &[u8]) -> Result<HtlcParams> {
    if script.len() != REDEEM_SCRIPT_LEN {
        return Err(Error::MalformedScript(format!(
            "length {} is not {REDEEM_SCRIPT_LEN}",
            script.len()
        )));
    }
    let expect = |offset: usize, value: u8, what: &str| -> Result<()> {
        if script[offset] != value {
            return Err(Error::MalformedScript(format!(
                "byte {offset}: expected {what} (0x{value:02X}), found 0x{:02X}",
                script[offset]
            )));
        }
        Ok(())
    };

    expect(0, OP_IF, "OP_IF")?;
    expect(1, OP_HASH160, "OP_HASH160")?;
    expect(2, 20, "PUSH20")?;
    expect(23, OP_EQUALVERIFY, "OP_EQUALVERIFY")?;
    expect(24, 33, "PUSH33")?;
    expect(58, OP_CHECKSIG, "OP_CHECKSIG")?;
    expect(59, OP_ELSE, "OP_ELSE")?;
    expect(60, 4, "PUSH4")?;
    expect(65, OP_CHECKLOCKTIMEVERIFY, "OP_CHECKLOCKTIMEVERIFY")?;
    expect(66, OP_DROP, "OP_DROP")?;
    expect(67, 33, "PUSH33")?;
    expect(101, OP_CHECKSIG, "OP_CHECKSIG")?;
    expect(102, OP_ENDIF, "OP_ENDIF")?;

    let mut secret_hash = [0u8; 20];
    secret_hash.copy_from_slice(&script[3..23]);
    let mut provider_pubkey = [0u8; 33];
    provider_pubkey.copy_from_slice(&script[25..58]);
    let mut timeout = [0u8; 4];
    timeout.copy_from_slice(&script[61..65]);
    let mut consumer_pubkey = [0u8; 33];
    consumer_pubkey.copy_from_slice(&script[68..101]);

    let timeout_block = u32::from_le_bytes(timeout);
    if timeout_block == 0 {
        return Err(Error::MalformedScript("timeout block is zero".into()));
    }

    Ok(HtlcParams {
        secret_hash,
        provider_pubkey,
        consumer_pubkey,
        timeout_block,
    })
}

/// HASH160 of the redeem script, for the P2SH funding output.
pub fn redeem_script_hash(redeem_script: &[u8]) -> [u8; 20] {
    hash160(redeem_script)
}

/// P2SH address the funding transaction pays into.
pub fn htlc_p2sh_address(network: Network, redeem_script: &[u8]) -> String {
    crate::address::p2sh_address(network, &redeem_script_hash(redeem_script))
}

/// Minimal push encoding for a scriptSig element. Data longer than 255 bytes
/// is rejected; nothing this wallet spends ever pushes that much.
pub(crate) fn push_data(out: &mut Vec<u8>, data: &[u8]) -> Result<()> {
    if data.len() <= 75 {
        out.push(data.len() as u8);
    } else if data.len() <= 255 {
        out.push(OP_PUSHDATA1);
        out.push(data.len() as u8);
    } else {
        return Err(Error::MalformedScript(format!(
            "push of {} bytes exceeds 255",
            data.len()
        )));
    }
    out.extend_from_slice(data);
    Ok(())
}

/// scriptSig for the claim branch:
/// `<sig+hashtype> <secret(32)> OP_TRUE <redeem_script>`.
pub fn claim_script_sig(
    signature_with_hashtype: &[u8],
    secret: &[u8; 32],
    redeem_script: &[u8],
) -> Result<Vec<u8>> {
    let mut script = Vec::new();
    push_data(&mut script, signature_with_hashtype)?;
    push_data(&mut script, secret)?;
    script.push(OP_TRUE);
    push_data(&mut script, redeem_script)?;
    Ok(script)
}

/// scriptSig for the refund branch: `<sig+hashtype> OP_FALSE <redeem_script>`.
pub fn refund_script_sig(signature_with_hashtype: &[u8], redeem_script: &[u8]) -> Result<Vec<u8>> {
    let mut script = Vec::new();
    push_data(&mut script, signature_with_hashtype)?;
    script.push(OP_FALSE);
    push_data(&mut script, redeem_script)?;
    Ok(script)
}

/// 32 cryptographically random bytes.
pub fn generate_secret() -> [u8; 32] {
    let mut secret = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut secret);
    secret
}

/// True iff `secret` is 32 bytes and HASH160(secret) equals `secret_hash`.
pub fn verify_secret(secret: &[u8], secret_hash: &[u8; 20]) -> bool {
    secret.len() == 32 && hash160(secret) == *secret_hash
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_params() -> HtlcParams {
        HtlcParams {
            secret_hash: [0x14; 20],
            provider_pubkey: [0x02; 33],
            consumer_pubkey: [0x03; 33],
            timeout_block: 500_000,
        }
    }

    #[test]
    fn redeem_script_layout() {
        let script = build_redeem_script(&test_params()).unwrap();
        assert_eq!(script.len(), REDEEM_SCRIPT_LEN);
        assert_eq!(script[0], OP_IF);
        // 500_000 little-endian.
        assert_eq!(&script[61..65], &[0x20, 0xA1, 0x07, 0x00]);
        assert_eq!(script[102], OP_ENDIF);
    }

    #[test]
    fn build_parse_roundtrip() {
        let params = test_params();
        let script = build_redeem_script(&params).unwrap();
        assert_eq!(parse_redeem_script(&script).unwrap(), params);
    }

    #[test]
    fn parse_rejects_every_fixed_byte() {
        let script = build_redeem_script(&test_params()).unwrap();
        for offset in [0usize, 1, 2, 23, 24, 58, 59, 60, 65, 66, 67, 101, 102] {
            let mut bad = script.clone();
            bad[offset] ^= 0xFF;
            assert!(
                parse_redeem_script(&bad).is_err(),
                "corruption at byte {offset} went unnoticed"
            );
        }
    }

    #[test]
    fn parse_rejects_wrong_length() {
        assert!(parse_redeem_script(&[0u8; 102]).is_err());
        assert!(parse_redeem_script(&[0u8; 104]).is_err());
    }

    #[test]
    fn params_constructor_validates() {
        assert!(HtlcParams::new(&[0; 20], &[0; 33], &[0; 33], 1).is_ok());
        assert!(HtlcParams::new(&[0; 19], &[0; 33], &[0; 33], 1).is_err());
        assert!(HtlcParams::new(&[0; 20], &[0; 32], &[0; 33], 1).is_err());
        assert!(HtlcParams::new(&[0; 20], &[0; 33], &[0; 34], 1).is_err());
        assert!(HtlcParams::new(&[0; 20], &[0; 33], &[0; 33], 0).is_err());
    }

    #[test]
    fn claim_script_sig_shape() {
        let redeem = build_redeem_script(&test_params()).unwrap();
        let sig = vec![0x30; 71];
        let secret = [0xAA; 32];
        let script = claim_script_sig(&sig, &secret, &redeem).unwrap();

        // <71-byte push> <32-byte push> OP_TRUE <OP_PUSHDATA1 103 ...>
        assert_eq!(script[0], 71);
        let after_sig = 1 + 71;
        assert_eq!(script[after_sig], 32);
        let after_secret = after_sig + 1 + 32;
        assert_eq!(script[after_secret], OP_TRUE);
        assert_eq!(script[after_secret + 1], OP_PUSHDATA1);
        assert_eq!(script[after_secret + 2], REDEEM_SCRIPT_LEN as u8);
        assert_eq!(&script[after_secret + 3..], &redeem[..]);
    }

    #[test]
    fn refund_script_sig_shape() {
        let redeem = build_redeem_script(&test_params()).unwrap();
        let sig = vec![0x30; 70];
        let script = refund_script_sig(&sig, &redeem).unwrap();
        assert_eq!(script[0], 70);
        assert_eq!(script[1 + 70], OP_FALSE);
        assert_eq!(script[1 + 70 + 1], OP_PUSHDATA1);
    }

    #[test]
    fn push_data_rejects_oversized() {
        let mut out = Vec::new();
        assert!(push_data(&mut out, &[0u8; 256]).is_err());
    }

    #[test]
    fn secret_generation_and_verification() {
        let secret = generate_secret();
        let hash = hash160(&secret);
        assert!(verify_secret(&secret, &hash));
        assert!(!verify_secret(&secret[..31], &hash));
        assert!(!verify_secret(&[0u8; 32], &hash));
    }

    #[test]
    fn p2sh_address_is_mainnet_shaped() {
        let redeem = build_redeem_script(&test_params()).unwrap();
        let addr = htlc_p2sh_address(Network::Mainnet, &redeem);
        let first = addr.chars().next().unwrap();
        assert!(first == '9' || first == 'A');
    }
}
