//! Transaction fabrication.
//!
//! Builds the three HTLC transaction kinds (funding, claim, refund) and plain
//! policy-approved payments, all in the legacy serialization Dogecoin relays:
//! `version || varint(#in) || inputs || varint(#out) || outputs || locktime`,
//! ECDSA/secp256k1 signatures with SIGHASH_ALL.

use crate::address::script_pubkey_for_address;
use crate::error::{Error, Result};
use crate::hashes::{sha256d, txid_display_to_internal, txid_internal_to_display};
use crate::network::Network;
use crate::payload::{self, HtlcOffer};
use crate::script::{
    self, build_redeem_script, parse_redeem_script, push_data, redeem_script_hash, HtlcParams,
};
use crate::signer::SpendSigner;
use crate::wire::codec::encode_varint;

pub const TX_VERSION: u32 = 1;
pub const SIGHASH_ALL: u8 = 0x01;

/// Default relay fee rate: 1 DOGE per kilobyte.
pub const DEFAULT_FEE_PER_KB: u64 = 100_000_000;

/// Change below this many koinu is left to the miners instead of creating a
/// dust output.
pub const DUST_CHANGE_THRESHOLD: u64 = 100_000;

/// Canonical size estimates used for fee calculation before a transaction
/// exists.
pub const FUNDING_TX_SIZE: usize = 250;
pub const CLAIM_TX_SIZE: usize = 300;
pub const REFUND_TX_SIZE: usize = 250;

const SEQUENCE_FINAL: u32 = 0xFFFF_FFFF;
/// Non-final sequence so nLockTime (and with it CLTV) is enforced.
const SEQUENCE_CLTV: u32 = 0xFFFF_FFFE;

/// `ceil(size_bytes * fee_per_kb / 1000)` koinu.
pub fn estimate_fee(size_bytes: usize, fee_per_kb: u64) -> u64 {
    let size = size_bytes as u64;
    size.saturating_mul(fee_per_kb).div_ceil(1000)
}

/// A previously-confirmed output this wallet can spend. Txid is display-order
/// hex, as stored in the UTXO cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpendableInput {
    pub txid: String,
    pub vout: u32,
    pub amount_koinu: u64,
    pub script_pubkey: Vec<u8>,
}

struct RawInput {
    prev_txid: [u8; 32],
    vout: u32,
    script_sig: Vec<u8>,
    sequence: u32,
}

struct RawOutput {
    amount_koinu: u64,
    script_pubkey: Vec<u8>,
}

struct RawTransaction {
    version: u32,
    inputs: Vec<RawInput>,
    outputs: Vec<RawOutput>,
    locktime: u32,
}

impl RawTransaction {
    fn serialize(&self) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&self.version.to_le_bytes());
        out.extend_from_slice(&encode_varint(self.inputs.len() as u64));
        for input in &self.inputs {
            out.extend_from_slice(&input.prev_txid);
            out.extend_from_slice(&input.vout.to_le_bytes());
            out.extend_from_slice(&encode_varint(input.script_sig.len() as u64));
            out.extend_from_slice(&input.script_sig);
            out.extend_from_slice(&input.sequence.to_le_bytes());
        }
        out.extend_from_slice(&encode_varint(self.outputs.len() as u64));
        for output in &self.outputs {
            out.extend_from_slice(&output.amount_koinu.to_le_bytes());
            out.extend_from_slice(&encode_varint(output.script_pubkey.len() as u64));
            out.extend_from_slice(&output.script_pubkey);
        }
        out.extend_from_slice(&self.locktime.to_le_bytes());
        out
    }

    /// Legacy SIGHASH_ALL digest for one input: every scriptSig emptied, the
    /// signed input's replaced by `script_code`, sighash type appended.
    fn sighash(&self, input_index: usize, script_code: &[u8]) -> [u8; 32] {
        let mut out = Vec::new();
        out.extend_from_slice(&self.version.to_le_bytes());
        out.extend_from_slice(&encode_varint(self.inputs.len() as u64));
        for (i, input) in self.inputs.iter().enumerate() {
            out.extend_from_slice(&input.prev_txid);
            out.extend_from_slice(&input.vout.to_le_bytes());
            if i == input_index {
                out.extend_from_slice(&encode_varint(script_code.len() as u64));
                out.extend_from_slice(script_code);
            } else {
                out.push(0);
            }
            out.extend_from_slice(&input.sequence.to_le_bytes());
        }
        out.extend_from_slice(&encode_varint(self.outputs.len() as u64));
        for output in &self.outputs {
            out.extend_from_slice(&output.amount_koinu.to_le_bytes());
            out.extend_from_slice(&encode_varint(output.script_pubkey.len() as u64));
            out.extend_from_slice(&output.script_pubkey);
        }
        out.extend_from_slice(&self.locktime.to_le_bytes());
        out.extend_from_slice(&(SIGHASH_ALL as u32).to_le_bytes());
        sha256d(&out)
    }
}

/// A fully signed transaction ready for relay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuiltTransaction {
    /// Display-order hex txid.
    pub txid: String,
    pub raw: Vec<u8>,
    /// Koinu actually left for the miners.
    pub fee: u64,
}

impl BuiltTransaction {
    pub fn raw_hex(&self) -> String {
        hex::encode(&self.raw)
    }
}

fn finish(tx: RawTransaction, fee: u64) -> BuiltTransaction {
    let raw = tx.serialize();
    let txid = txid_internal_to_display(&sha256d(&raw));
    BuiltTransaction { txid, raw, fee }
}

/// Standard `<sig+hashtype> <pubkey>` scriptSig for a P2PKH input.
fn p2pkh_script_sig(signature_with_hashtype: &[u8], pubkey: &[u8; 33]) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    push_data(&mut out, signature_with_hashtype)?;
    push_data(&mut out, pubkey)?;
    Ok(out)
}

fn sign_with_hashtype(signer: &dyn SpendSigner, sighash: &[u8; 32]) -> Result<Vec<u8>> {
    let mut sig = signer.sign_ecdsa(sighash)?;
    sig.push(SIGHASH_ALL);
    Ok(sig)
}

fn raw_inputs(inputs: &[SpendableInput], sequence: u32) -> Result<Vec<RawInput>> {
    inputs
        .iter()
        .map(|input| {
            Ok(RawInput {
                prev_txid: txid_display_to_internal(&input.txid)?,
                vout: input.vout,
                script_sig: Vec::new(),
                sequence,
            })
        })
        .collect()
}

/// Sign every input as P2PKH owned by `signer`, in place.
fn sign_p2pkh_inputs(
    tx: &mut RawTransaction,
    inputs: &[SpendableInput],
    signer: &dyn SpendSigner,
) -> Result<()> {
    let pubkey = signer.public_key();
    for index in 0..tx.inputs.len() {
        let sighash = tx.sighash(index, &inputs[index].script_pubkey);
        let sig = sign_with_hashtype(signer, &sighash)?;
        tx.inputs[index].script_sig = p2pkh_script_sig(&sig, &pubkey)?;
    }
    Ok(())
}

fn total_input(inputs: &[SpendableInput]) -> u64 {
    inputs.iter().map(|i| i.amount_koinu).sum()
}

// ── Funding ─────────────────────────────────────────────────────────

pub struct FundingParams {
    pub network: Network,
    pub htlc: HtlcParams,
    pub session_id: [u8; 8],
    pub skill_code: u16,
    /// Koinu escrowed for the tool invocation itself.
    pub tool_price: u64,
    /// Extra koinu escrowed so the provider can pay the claim fee.
    pub fee_buffer: u64,
    /// Pre-selected (and locked) wallet UTXOs.
    pub inputs: Vec<SpendableInput>,
    pub change_address: String,
    pub fee: u64,
}

/// Build and sign the HTLC funding transaction.
///
/// Output order is fixed: P2SH escrow, then the QP_HTLC_OFFER OP_RETURN,
/// then change (omitted when at or below the dust threshold).
pub fn build_funding_transaction(
    params: &FundingParams,
    signer: &dyn SpendSigner,
) -> Result<BuiltTransaction> {
    let redeem = build_redeem_script(&params.htlc)?;
    let htlc_amount = params
        .tool_price
        .checked_add(params.fee_buffer)
        .ok_or_else(|| Error::InvalidAmount("tool price + fee buffer overflows".into()))?;

    let offer = HtlcOffer {
        session_id: params.session_id,
        secret_hash: params.htlc.secret_hash,
        timeout_block: params.htlc.timeout_block,
        tool_price: params.tool_price,
        fee_buffer: params.fee_buffer,
        skill_code: params.skill_code,
        consumer_pubkey: params.htlc.consumer_pubkey,
    };

    let mut outputs = vec![
        RawOutput {
            amount_koinu: htlc_amount,
            script_pubkey: crate::address::p2sh_script(&redeem_script_hash(&redeem)),
        },
        RawOutput {
            amount_koinu: 0,
            script_pubkey: payload::op_return_script(&payload::encode_offer(&offer))?,
        },
    ];

    let available = total_input(&params.inputs);
    let needed = htlc_amount
        .checked_add(params.fee)
        .ok_or_else(|| Error::InvalidAmount("amount + fee overflows".into()))?;
    if available < needed {
        return Err(Error::InsufficientFunds { needed, available });
    }

    let change = available - needed;
    let mut fee = params.fee;
    if change > DUST_CHANGE_THRESHOLD {
        outputs.push(RawOutput {
            amount_koinu: change,
            script_pubkey: script_pubkey_for_address(params.network, &params.change_address)?,
        });
    } else {
        fee += change;
    }

    let mut tx = RawTransaction {
        version: TX_VERSION,
        inputs: raw_inputs(&params.inputs, SEQUENCE_FINAL)?,
        outputs,
        locktime: 0,
    };
    sign_p2pkh_inputs(&mut tx, &params.inputs, signer)?;
    Ok(finish(tx, fee))
}

// ── Claim ───────────────────────────────────────────────────────────

pub struct ClaimParams {
    pub network: Network,
    pub redeem_script: Vec<u8>,
    /// Display-order hex txid of the funding transaction.
    pub funding_txid: String,
    pub funding_vout: u32,
    pub htlc_amount: u64,
    pub secret: [u8; 32],
    /// Provider address the escrow is paid out to.
    pub destination: String,
    pub fee: u64,
}

/// Build and sign the provider's claim transaction.
pub fn build_claim_transaction(
    params: &ClaimParams,
    signer: &dyn SpendSigner,
) -> Result<BuiltTransaction> {
    let htlc = parse_redeem_script(&params.redeem_script)?;
    if !script::verify_secret(&params.secret, &htlc.secret_hash) {
        return Err(Error::InvalidHtlcParam(
            "secret does not hash to the contract's secret hash".into(),
        ));
    }
    let output_amount = params
        .htlc_amount
        .checked_sub(params.fee)
        .filter(|amount| *amount > 0)
        .ok_or(Error::FeeExceedsValue {
            fee: params.fee,
            value: params.htlc_amount,
        })?;

    let mut tx = RawTransaction {
        version: TX_VERSION,
        inputs: vec![RawInput {
            prev_txid: txid_display_to_internal(&params.funding_txid)?,
            vout: params.funding_vout,
            script_sig: Vec::new(),
            sequence: SEQUENCE_FINAL,
        }],
        outputs: vec![RawOutput {
            amount_koinu: output_amount,
            script_pubkey: script_pubkey_for_address(params.network, &params.destination)?,
        }],
        locktime: 0,
    };

    let sighash = tx.sighash(0, &params.redeem_script);
    let sig = sign_with_hashtype(signer, &sighash)?;
    tx.inputs[0].script_sig = script::claim_script_sig(&sig, &params.secret, &params.redeem_script)?;
    Ok(finish(tx, params.fee))
}

// ── Refund ──────────────────────────────────────────────────────────

pub struct RefundParams {
    pub network: Network,
    pub redeem_script: Vec<u8>,
    pub funding_txid: String,
    pub funding_vout: u32,
    pub htlc_amount: u64,
    /// Consumer address the escrow returns to after timeout.
    pub destination: String,
    pub fee: u64,
}

/// Build and sign the consumer's refund transaction. `nLockTime` is the
/// contract's timeout block and the input sequence enables CLTV.
pub fn build_refund_transaction(
    params: &RefundParams,
    signer: &dyn SpendSigner,
) -> Result<BuiltTransaction> {
    let htlc = parse_redeem_script(&params.redeem_script)?;
    let output_amount = params
        .htlc_amount
        .checked_sub(params.fee)
        .filter(|amount| *amount > 0)
        .ok_or(Error::FeeExceedsValue {
            fee: params.fee,
            value: params.htlc_amount,
        })?;

    let mut tx = RawTransaction {
        version: TX_VERSION,
        inputs: vec![RawInput {
            prev_txid: txid_display_to_internal(&params.funding_txid)?,
            vout: params.funding_vout,
            script_sig: Vec::new(),
            sequence: SEQUENCE_CLTV,
        }],
        outputs: vec![RawOutput {
            amount_koinu: output_amount,
            script_pubkey: script_pubkey_for_address(params.network, &params.destination)?,
        }],
        locktime: htlc.timeout_block,
    };

    let sighash = tx.sighash(0, &params.redeem_script);
    let sig = sign_with_hashtype(signer, &sighash)?;
    tx.inputs[0].script_sig = script::refund_script_sig(&sig, &params.redeem_script)?;
    Ok(finish(tx, params.fee))
}

// ── Plain payment ───────────────────────────────────────────────────

pub struct PaymentParams {
    pub network: Network,
    pub to: String,
    pub amount_koinu: u64,
    pub inputs: Vec<SpendableInput>,
    pub change_address: String,
    pub fee: u64,
}

/// Build and sign an ordinary pay-to-address spend.
pub fn build_payment_transaction(
    params: &PaymentParams,
    signer: &dyn SpendSigner,
) -> Result<BuiltTransaction> {
    if params.amount_koinu == 0 {
        return Err(Error::InvalidAmount("payment amount is zero".into()));
    }
    let mut outputs = vec![RawOutput {
        amount_koinu: params.amount_koinu,
        script_pubkey: script_pubkey_for_address(params.network, &params.to)?,
    }];

    let available = total_input(&params.inputs);
    let needed = params
        .amount_koinu
        .checked_add(params.fee)
        .ok_or_else(|| Error::InvalidAmount("amount + fee overflows".into()))?;
    if available < needed {
        return Err(Error::InsufficientFunds { needed, available });
    }

    let change = available - needed;
    let mut fee = params.fee;
    if change > DUST_CHANGE_THRESHOLD {
        outputs.push(RawOutput {
            amount_koinu: change,
            script_pubkey: script_pubkey_for_address(params.network, &params.change_address)?,
        });
    } else {
        fee += change;
    }

    let mut tx = RawTransaction {
        version: TX_VERSION,
        inputs: raw_inputs(&params.inputs, SEQUENCE_FINAL)?,
        outputs,
        locktime: 0,
    };
    sign_p2pkh_inputs(&mut tx, &params.inputs, signer)?;
    Ok(finish(tx, fee))
}
