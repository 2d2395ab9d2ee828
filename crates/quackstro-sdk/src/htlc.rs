//! HTLC lifecycle tracking.
//!
//! A record moves along a fixed DAG:
//!
//! ```text
//! created → funding_pending → active → { claimed, expired }
//!                                        expired → refunded
//! ```
//!
//! Transitions are monotonic; anything off the DAG is reported as
//! [`Transition::Ignored`] rather than an error, so observers that replay
//! chain events never corrupt a record. Storage is pluggable: the in-memory
//! store here, or the file-backed store in `quackstro-store`.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use crate::error::{Error, Result};
use crate::network::Network;
use crate::script::{self, build_redeem_script, htlc_p2sh_address, HtlcParams};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HtlcState {
    Created,
    FundingPending,
    Active,
    Claimed,
    Refunded,
    Expired,
}

impl HtlcState {
    /// Whether `self → to` is an edge of the lifecycle DAG.
    pub fn can_transition(self, to: HtlcState) -> bool {
        use HtlcState::*;
        matches!(
            (self, to),
            (Created, FundingPending)
                | (FundingPending, Active)
                | (Active, Claimed)
                | (Active, Expired)
                | (Expired, Refunded)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, HtlcState::Claimed | HtlcState::Refunded)
    }
}

/// Persistent lifecycle state of one contract. The claim secret is never part
/// of the record; the provider keeps it in a separate zeroizable side table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HtlcRecord {
    /// Hex of the 8-byte session id; the record key.
    pub session_id: String,
    pub skill_code: u16,
    pub state: HtlcState,
    /// Hex fields mirror [`HtlcParams`]; see [`HtlcRecord::params`].
    pub secret_hash: String,
    pub provider_pubkey: String,
    pub consumer_pubkey: String,
    pub timeout_block: u32,
    pub p2sh_address: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub funding_txid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub claim_txid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refund_txid: Option<String>,
    /// Epoch milliseconds.
    pub created_at: i64,
    pub updated_at: i64,
}

impl HtlcRecord {
    /// Reconstruct the wire-level parameters from the stored hex fields.
    pub fn params(&self) -> Result<HtlcParams> {
        let secret_hash = hex::decode(&self.secret_hash)
            .map_err(|e| Error::InvalidHtlcParam(format!("stored secret hash: {e}")))?;
        let provider = hex::decode(&self.provider_pubkey)
            .map_err(|e| Error::InvalidHtlcParam(format!("stored provider pubkey: {e}")))?;
        let consumer = hex::decode(&self.consumer_pubkey)
            .map_err(|e| Error::InvalidHtlcParam(format!("stored consumer pubkey: {e}")))?;
        HtlcParams::new(&secret_hash, &provider, &consumer, self.timeout_block)
    }

    /// Rebuild the redeem script for spends of this contract.
    pub fn redeem_script(&self) -> Result<Vec<u8>> {
        build_redeem_script(&self.params()?)
    }
}

/// Outcome of a requested transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Applied(HtlcState),
    /// The record was not in a state this transition applies to. Benign.
    Ignored { current: HtlcState },
}

impl Transition {
    pub fn applied(&self) -> bool {
        matches!(self, Transition::Applied(_))
    }
}

/// Pluggable persistence for HTLC records, keyed by session id.
pub trait HtlcRecordStore: Send {
    fn upsert(&mut self, record: &HtlcRecord) -> Result<()>;
    fn get(&self, session_id: &str) -> Result<Option<HtlcRecord>>;
    fn all(&self) -> Result<Vec<HtlcRecord>>;
}

/// Volatile store for tests and short-lived consumers.
#[derive(Default)]
pub struct MemoryHtlcStore {
    records: HashMap<String, HtlcRecord>,
}

impl MemoryHtlcStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl HtlcRecordStore for MemoryHtlcStore {
    fn upsert(&mut self, record: &HtlcRecord) -> Result<()> {
        self.records
            .insert(record.session_id.clone(), record.clone());
        Ok(())
    }

    fn get(&self, session_id: &str) -> Result<Option<HtlcRecord>> {
        Ok(self.records.get(session_id).cloned())
    }

    fn all(&self) -> Result<Vec<HtlcRecord>> {
        Ok(self.records.values().cloned().collect())
    }
}

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Drives records through the lifecycle DAG. I/O-free: chain observations
/// (confirmations, heights, observed spends) are fed in by the caller.
pub struct HtlcLifecycle<S: HtlcRecordStore> {
    store: S,
}

impl<S: HtlcRecordStore> HtlcLifecycle<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// Register a fresh contract in `created`.
    pub fn create(
        &mut self,
        network: Network,
        params: &HtlcParams,
        session_id: [u8; 8],
        skill_code: u16,
    ) -> Result<HtlcRecord> {
        let redeem = build_redeem_script(params)?;
        let now = now_ms();
        let record = HtlcRecord {
            session_id: hex::encode(session_id),
            skill_code,
            state: HtlcState::Created,
            secret_hash: hex::encode(params.secret_hash),
            provider_pubkey: hex::encode(params.provider_pubkey),
            consumer_pubkey: hex::encode(params.consumer_pubkey),
            timeout_block: params.timeout_block,
            p2sh_address: htlc_p2sh_address(network, &redeem),
            funding_txid: None,
            claim_txid: None,
            refund_txid: None,
            created_at: now,
            updated_at: now,
        };
        self.store.upsert(&record)?;
        Ok(record)
    }

    pub fn get(&self, session_id: &str) -> Result<Option<HtlcRecord>> {
        self.store.get(session_id)
    }

    pub fn all(&self) -> Result<Vec<HtlcRecord>> {
        self.store.all()
    }

    fn transition<F>(&mut self, session_id: &str, to: HtlcState, update: F) -> Result<Transition>
    where
        F: FnOnce(&mut HtlcRecord),
    {
        let Some(mut record) = self.store.get(session_id)? else {
            return Err(Error::InvalidHtlcParam(format!(
                "unknown session {session_id}"
            )));
        };
        if !record.state.can_transition(to) {
            log::debug!(
                "htlc: session {session_id} ignoring {:?} → {to:?}",
                record.state
            );
            return Ok(Transition::Ignored {
                current: record.state,
            });
        }
        record.state = to;
        record.updated_at = now_ms();
        update(&mut record);
        self.store.upsert(&record)?;
        Ok(Transition::Applied(to))
    }

    /// The funding transaction has been broadcast.
    pub fn funding_broadcast(&mut self, session_id: &str, funding_txid: &str) -> Result<Transition> {
        let txid = funding_txid.to_string();
        self.transition(session_id, HtlcState::FundingPending, move |r| {
            r.funding_txid = Some(txid);
        })
    }

    /// The funding transaction reached at least one confirmation.
    pub fn funding_confirmed(&mut self, session_id: &str) -> Result<Transition> {
        self.transition(session_id, HtlcState::Active, |_| {})
    }

    /// A claim spending this contract's outpoint was observed. The secret is
    /// whatever the observer pulled out of the claim scriptSig; it must hash
    /// to the contract's secret hash or the observation is ignored.
    pub fn claim_observed(
        &mut self,
        session_id: &str,
        claim_txid: &str,
        secret: &[u8],
    ) -> Result<Transition> {
        let Some(record) = self.store.get(session_id)? else {
            return Err(Error::InvalidHtlcParam(format!(
                "unknown session {session_id}"
            )));
        };
        let secret_hash = record.params()?.secret_hash;
        if !script::verify_secret(secret, &secret_hash) {
            log::warn!("htlc: session {session_id} claim with non-matching secret ignored");
            return Ok(Transition::Ignored {
                current: record.state,
            });
        }
        let txid = claim_txid.to_string();
        self.transition(session_id, HtlcState::Claimed, move |r| {
            r.claim_txid = Some(txid);
        })
    }

    /// Feed in the current chain height; every active contract whose timeout
    /// has passed flips to `expired`. Returns the session ids that expired.
    pub fn observe_height(&mut self, now_block: u32) -> Result<Vec<String>> {
        let mut expired = Vec::new();
        for record in self.store.all()? {
            if record.state == HtlcState::Active && now_block >= record.timeout_block {
                if self
                    .transition(&record.session_id, HtlcState::Expired, |_| {})?
                    .applied()
                {
                    expired.push(record.session_id);
                }
            }
        }
        Ok(expired)
    }

    /// The refund transaction was broadcast and confirmed.
    pub fn refund_confirmed(&mut self, session_id: &str, refund_txid: &str) -> Result<Transition> {
        let txid = refund_txid.to_string();
        self.transition(session_id, HtlcState::Refunded, move |r| {
            r.refund_txid = Some(txid);
        })
    }
}

/// Provider-side manager: the lifecycle plus the secrets, which live only in
/// memory and are wiped when dropped.
pub struct ProviderHtlcManager<S: HtlcRecordStore> {
    lifecycle: HtlcLifecycle<S>,
    secrets: HashMap<String, Zeroizing<[u8; 32]>>,
}

impl<S: HtlcRecordStore> ProviderHtlcManager<S> {
    pub fn new(store: S) -> Self {
        Self {
            lifecycle: HtlcLifecycle::new(store),
            secrets: HashMap::new(),
        }
    }

    pub fn lifecycle(&mut self) -> &mut HtlcLifecycle<S> {
        &mut self.lifecycle
    }

    /// Generate a secret and open a contract hash-locked to it.
    ///
    /// Returns the record plus the secret hash the consumer needs.
    pub fn open(
        &mut self,
        network: Network,
        provider_pubkey: [u8; 33],
        consumer_pubkey: [u8; 33],
        timeout_block: u32,
        session_id: [u8; 8],
        skill_code: u16,
    ) -> Result<(HtlcRecord, [u8; 20])> {
        let secret = script::generate_secret();
        let secret_hash = crate::hashes::hash160(&secret);
        let params = HtlcParams {
            secret_hash,
            provider_pubkey,
            consumer_pubkey,
            timeout_block,
        };
        let record = self
            .lifecycle
            .create(network, &params, session_id, skill_code)?;
        self.secrets
            .insert(record.session_id.clone(), Zeroizing::new(secret));
        Ok((record, secret_hash))
    }

    /// The secret for a session, if this provider opened it.
    pub fn secret(&self, session_id: &str) -> Option<[u8; 32]> {
        self.secrets.get(session_id).map(|s| **s)
    }

    /// Record our own claim broadcast, enforcing that we actually hold the
    /// matching secret.
    pub fn claim_broadcast(&mut self, session_id: &str, claim_txid: &str) -> Result<Transition> {
        let Some(secret) = self.secret(session_id) else {
            return Err(Error::InvalidHtlcParam(format!(
                "no secret held for session {session_id}"
            )));
        };
        self.lifecycle.claim_observed(session_id, claim_txid, &secret)
    }
}

/// Consumer-side manager. Never sees or persists the secret; it learns of
/// claims by observing the spend and extracting the preimage from it.
pub struct ConsumerHtlcManager<S: HtlcRecordStore> {
    lifecycle: HtlcLifecycle<S>,
}

impl<S: HtlcRecordStore> ConsumerHtlcManager<S> {
    pub fn new(store: S) -> Self {
        Self {
            lifecycle: HtlcLifecycle::new(store),
        }
    }

    pub fn lifecycle(&mut self) -> &mut HtlcLifecycle<S> {
        &mut self.lifecycle
    }

    /// Accept a provider's offer: track the contract locally.
    pub fn accept_offer(
        &mut self,
        network: Network,
        params: &HtlcParams,
        session_id: [u8; 8],
        skill_code: u16,
    ) -> Result<HtlcRecord> {
        self.lifecycle.create(network, params, session_id, skill_code)
    }
}
