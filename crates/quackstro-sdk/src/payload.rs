//! Quackstro OP_RETURN payloads.
//!
//! Every payload is framed as `QP_MAGIC(4) || version(1) || type(1) || body`.
//! Txids travel in internal byte order on the wire and are reversed to
//! display order on ingest.

use crate::error::{Error, Result};
use crate::hashes::{txid_display_to_internal, txid_internal_to_display};

pub const QP_MAGIC: [u8; 4] = *b"QSTR";
pub const QP_VERSION: u8 = 0x01;
pub const QP_TYPE_HTLC_OFFER: u8 = 0x01;
pub const QP_TYPE_HTLC_CLAIM: u8 = 0x02;

const FRAME_LEN: usize = 6;
const OFFER_BODY_LEN: usize = 8 + 20 + 4 + 8 + 8 + 2 + 33 + 5;
const CLAIM_BODY_LEN: usize = 8 + 32 + 8 + 4 + 32;

const OP_RETURN: u8 = 0x6A;
const OP_PUSHDATA1: u8 = 0x4C;

/// Body of a `QP_HTLC_OFFER`, embedded in the funding transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HtlcOffer {
    pub session_id: [u8; 8],
    pub secret_hash: [u8; 20],
    pub timeout_block: u32,
    pub tool_price: u64,
    pub fee_buffer: u64,
    pub skill_code: u16,
    pub consumer_pubkey: [u8; 33],
}

/// Body of a `QP_HTLC_CLAIM`, embedded in the claim transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HtlcClaim {
    pub session_id: [u8; 8],
    /// Display-order hex of the funding transaction.
    pub funding_txid: String,
    pub claimed_koinu: u64,
    pub timestamp: u32,
}

fn frame(payload_type: u8, body: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(FRAME_LEN + body.len());
    out.extend_from_slice(&QP_MAGIC);
    out.push(QP_VERSION);
    out.push(payload_type);
    out.extend_from_slice(body);
    out
}

fn unframe(expected_type: u8, payload: &[u8]) -> Result<&[u8]> {
    if payload.len() < FRAME_LEN {
        return Err(Error::MalformedPayload(format!(
            "{} bytes is too short for a QP frame",
            payload.len()
        )));
    }
    if payload[0..4] != QP_MAGIC {
        return Err(Error::MalformedPayload("bad QP magic".into()));
    }
    if payload[4] != QP_VERSION {
        return Err(Error::MalformedPayload(format!(
            "unsupported QP version {}",
            payload[4]
        )));
    }
    if payload[5] != expected_type {
        return Err(Error::MalformedPayload(format!(
            "payload type 0x{:02X}, expected 0x{expected_type:02X}",
            payload[5]
        )));
    }
    Ok(&payload[FRAME_LEN..])
}

pub fn encode_offer(offer: &HtlcOffer) -> Vec<u8> {
    let mut body = Vec::with_capacity(OFFER_BODY_LEN);
    body.extend_from_slice(&offer.session_id);
    body.extend_from_slice(&offer.secret_hash);
    body.extend_from_slice(&offer.timeout_block.to_le_bytes());
    body.extend_from_slice(&offer.tool_price.to_le_bytes());
    body.extend_from_slice(&offer.fee_buffer.to_le_bytes());
    body.extend_from_slice(&offer.skill_code.to_le_bytes());
    body.extend_from_slice(&offer.consumer_pubkey);
    body.extend_from_slice(&[0u8; 5]);
    frame(QP_TYPE_HTLC_OFFER, &body)
}

pub fn parse_offer(payload: &[u8]) -> Result<HtlcOffer> {
    let body = unframe(QP_TYPE_HTLC_OFFER, payload)?;
    if body.len() != OFFER_BODY_LEN {
        return Err(Error::MalformedPayload(format!(
            "offer body is {} bytes, expected {OFFER_BODY_LEN}",
            body.len()
        )));
    }
    let mut offer = HtlcOffer {
        session_id: [0; 8],
        secret_hash: [0; 20],
        timeout_block: 0,
        tool_price: 0,
        fee_buffer: 0,
        skill_code: 0,
        consumer_pubkey: [0; 33],
    };
    offer.session_id.copy_from_slice(&body[0..8]);
    offer.secret_hash.copy_from_slice(&body[8..28]);
    offer.timeout_block = u32::from_le_bytes(body[28..32].try_into().unwrap());
    offer.tool_price = u64::from_le_bytes(body[32..40].try_into().unwrap());
    offer.fee_buffer = u64::from_le_bytes(body[40..48].try_into().unwrap());
    offer.skill_code = u16::from_le_bytes(body[48..50].try_into().unwrap());
    offer.consumer_pubkey.copy_from_slice(&body[50..83]);
    Ok(offer)
}

pub fn encode_claim(claim: &HtlcClaim) -> Result<Vec<u8>> {
    let funding_internal = txid_display_to_internal(&claim.funding_txid)?;
    let mut body = Vec::with_capacity(CLAIM_BODY_LEN);
    body.extend_from_slice(&claim.session_id);
    body.extend_from_slice(&funding_internal);
    body.extend_from_slice(&claim.claimed_koinu.to_le_bytes());
    body.extend_from_slice(&claim.timestamp.to_le_bytes());
    body.extend_from_slice(&[0u8; 32]);
    Ok(frame(QP_TYPE_HTLC_CLAIM, &body))
}

pub fn parse_claim(payload: &[u8]) -> Result<HtlcClaim> {
    let body = unframe(QP_TYPE_HTLC_CLAIM, payload)?;
    if body.len() != CLAIM_BODY_LEN {
        return Err(Error::MalformedPayload(format!(
            "claim body is {} bytes, expected {CLAIM_BODY_LEN}",
            body.len()
        )));
    }
    let mut session_id = [0u8; 8];
    session_id.copy_from_slice(&body[0..8]);
    let mut funding_internal = [0u8; 32];
    funding_internal.copy_from_slice(&body[8..40]);
    Ok(HtlcClaim {
        session_id,
        funding_txid: txid_internal_to_display(&funding_internal),
        claimed_koinu: u64::from_le_bytes(body[40..48].try_into().unwrap()),
        timestamp: u32::from_le_bytes(body[48..52].try_into().unwrap()),
    })
}

/// Wrap a QP payload into an OP_RETURN scriptPubKey.
pub fn op_return_script(payload: &[u8]) -> Result<Vec<u8>> {
    if payload.len() > 255 {
        return Err(Error::MalformedPayload(format!(
            "OP_RETURN payload of {} bytes exceeds 255",
            payload.len()
        )));
    }
    let mut script = Vec::with_capacity(payload.len() + 3);
    script.push(OP_RETURN);
    if payload.len() <= 75 {
        script.push(payload.len() as u8);
    } else {
        script.push(OP_PUSHDATA1);
        script.push(payload.len() as u8);
    }
    script.extend_from_slice(payload);
    Ok(script)
}

/// Extract the QP payload from an OP_RETURN scriptPubKey, if present.
pub fn extract_op_return(script: &[u8]) -> Option<&[u8]> {
    if script.first() != Some(&OP_RETURN) {
        return None;
    }
    match script.get(1)? {
        &OP_PUSHDATA1 => {
            let len = *script.get(2)? as usize;
            let data = script.get(3..3 + len)?;
            (script.len() == 3 + len).then_some(data)
        }
        &len if len <= 75 => {
            let len = len as usize;
            let data = script.get(2..2 + len)?;
            (script.len() == 2 + len).then_some(data)
        }
        _ => None,
    }
}
