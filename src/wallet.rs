//! Wallet orchestration.
//!
//! One [`Wallet`] owns one instance of each store (UTXO cache, approval
//! queue, audit log, alert state) and serializes every spend through the
//! policy engine. The pipeline for an outbound spend:
//!
//! ```text
//! request_spend → classify → auto path:    select+lock → build → broadcast
//!                                           → mark spent → audit
//!                          → approval path: queue → (resolve/expiry) → auto path
//! ```
//!
//! Chain data comes in through [`ChainDataProvider`], signatures through
//! [`SpendSigner`], and relay through [`TxBroadcaster`]; nothing here talks
//! to the network directly.

use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;

use thiserror::Error;

use quackstro_sdk::htlc::{HtlcLifecycle, HtlcRecordStore};
use quackstro_sdk::tx::{
    build_funding_transaction, build_payment_transaction, estimate_fee, FundingParams,
    PaymentParams, SpendableInput, FUNDING_TX_SIZE,
};
use quackstro_sdk::{
    address, verify_registry_addresses, BroadcastReport, ChainDataProvider, HtlcParams, Network,
    SpendSigner,
};
use quackstro_store::{
    largest_first, AuditAction, AuditEntry, AuditLog, AlertStore, ApprovalQueue, AutoAction,
    Balance, Initiator, NewApproval, PendingApproval, RefreshOutcome, ResolveOutcome, Selection,
    StoreError, UtxoStore, Utxo,
};

use crate::policy::{PolicyEngine, SpendAction};

/// Canonical size estimate for a plain payment, matching the funding shape.
const PAYMENT_TX_SIZE: usize = FUNDING_TX_SIZE;

#[derive(Debug, Error)]
pub enum WalletError {
    #[error("sdk error: {0}")]
    Sdk(#[from] quackstro_sdk::Error),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("spendable funds cannot cover {needed} koinu")]
    InsufficientSpendable { needed: u64 },
}

pub type Result<T> = std::result::Result<T, WalletError>;

/// Relay seam. The production implementation discovers peers over DNS seeds
/// and speaks the P2P dialog; tests substitute a recorder.
pub trait TxBroadcaster: Send + Sync {
    fn broadcast<'a>(
        &'a self,
        network: Network,
        raw_tx_hex: &'a str,
    ) -> Pin<Box<dyn Future<Output = quackstro_sdk::Result<BroadcastReport>> + Send + 'a>>;
}

/// DNS-seed discovery plus direct P2P relay.
pub struct P2pBroadcaster;

impl TxBroadcaster for P2pBroadcaster {
    fn broadcast<'a>(
        &'a self,
        network: Network,
        raw_tx_hex: &'a str,
    ) -> Pin<Box<dyn Future<Output = quackstro_sdk::Result<BroadcastReport>> + Send + 'a>> {
        Box::pin(quackstro_sdk::broadcast_transaction(network, raw_tx_hex))
    }
}

#[derive(Debug, Clone)]
pub struct WalletConfig {
    pub network: Network,
    pub data_dir: PathBuf,
    /// Confirmations a UTXO needs before the wallet spends it.
    pub min_confirmations: u32,
    pub fee_per_kb: u64,
    /// Balance floor that triggers low-balance alerts.
    pub alert_threshold_koinu: u64,
}

/// What the pipeline decided about a requested spend.
#[derive(Debug, Clone)]
pub enum SpendDecision {
    Sent { txid: String, fee: u64, tier: String },
    Queued { approval: PendingApproval },
}

/// Outcome of resolving a queued approval.
#[derive(Debug, Clone)]
pub enum ApprovalResolution {
    Executed { txid: String },
    Denied,
    /// The entry was unknown or already resolved; nothing happened.
    NoOp,
}

/// Decode a locked selection into builder inputs.
fn selection_inputs(selection: &Selection) -> Result<Vec<SpendableInput>> {
    selection
        .utxos
        .iter()
        .map(|utxo| {
            let script_pubkey = hex::decode(&utxo.script).map_err(|e| {
                WalletError::Store(StoreError::InvalidData(format!(
                    "utxo {}:{} script hex: {e}",
                    utxo.txid, utxo.vout
                )))
            })?;
            Ok(SpendableInput {
                txid: utxo.txid.clone(),
                vout: utxo.vout,
                amount_koinu: utxo.amount_koinu,
                script_pubkey,
            })
        })
        .collect()
}

pub struct Wallet {
    config: WalletConfig,
    policy: PolicyEngine,
    signer: Arc<dyn SpendSigner>,
    provider: Box<dyn ChainDataProvider>,
    broadcaster: Box<dyn TxBroadcaster>,
    utxos: UtxoStore,
    approvals: ApprovalQueue,
    audit: AuditLog,
    alerts: AlertStore,
}

impl Wallet {
    /// Construct the wallet and its four stores under the data directory.
    /// Runs the registry self-check first; a wallet that cannot reproduce
    /// the pinned registry addresses must not move money.
    pub fn new(
        config: WalletConfig,
        policy: PolicyEngine,
        signer: Arc<dyn SpendSigner>,
        provider: Box<dyn ChainDataProvider>,
        broadcaster: Box<dyn TxBroadcaster>,
    ) -> Result<Self> {
        verify_registry_addresses()?;
        let utxos = UtxoStore::open(&config.data_dir)?;
        let approvals = ApprovalQueue::open(&config.data_dir)?;
        let audit = AuditLog::open(&config.data_dir);
        let alerts = AlertStore::open(&config.data_dir)?;
        Ok(Self {
            config,
            policy,
            signer,
            provider,
            broadcaster,
            utxos,
            approvals,
            audit,
            alerts,
        })
    }

    /// The wallet's own P2PKH receive (and change) address.
    pub fn address(&self) -> String {
        address::address_from_pubkey(self.config.network, &self.signer.public_key())
    }

    pub fn balance(&self) -> Balance {
        self.utxos.balance()
    }

    pub fn utxos(&self) -> &UtxoStore {
        &self.utxos
    }

    pub fn approvals(&self) -> &ApprovalQueue {
        &self.approvals
    }

    pub fn audit(&self) -> &AuditLog {
        &self.audit
    }

    pub fn alerts(&self) -> &AlertStore {
        &self.alerts
    }

    /// Pull the provider's view of our address into the UTXO cache.
    pub fn refresh(&self) -> Result<RefreshOutcome> {
        Ok(self.utxos.refresh(&self.address(), self.provider.as_ref())?)
    }

    /// Entry point for every outbound spend.
    pub async fn request_spend(
        &self,
        to: &str,
        amount_koinu: u64,
        reason: &str,
        initiated_by: Initiator,
    ) -> Result<SpendDecision> {
        // Reject bad destinations before anything locks.
        address::script_pubkey_for_address(self.config.network, to)?;

        let classification = self.policy.classify(amount_koinu);
        log::info!(
            "wallet: spend of {amount_koinu} koinu to {to} classified {} → {:?}",
            classification.tier,
            classification.action
        );

        match classification.action {
            SpendAction::AutoApprove | SpendAction::Notify => {
                if classification.action == SpendAction::Notify {
                    log::info!(
                        "wallet: notifying owner of {amount_koinu} koinu spend ({reason})"
                    );
                }
                let (txid, fee) = self
                    .direct_spend(to, amount_koinu, &classification.tier, initiated_by)
                    .await?;
                Ok(SpendDecision::Sent {
                    txid,
                    fee,
                    tier: classification.tier,
                })
            }
            SpendAction::DelayApprove | SpendAction::RequireApproval => {
                let auto_action = match classification.action {
                    SpendAction::DelayApprove => AutoAction::Approve,
                    _ => AutoAction::Deny,
                };
                let approval = self.approvals.queue(NewApproval {
                    to: to.to_string(),
                    amount_koinu,
                    reason: reason.to_string(),
                    tier: classification.tier.clone(),
                    action: format!("{:?}", classification.action),
                    auto_action,
                    delay_minutes: classification.delay_minutes,
                })?;

                let mut entry = AuditEntry::new(AuditAction::ApprovalQueued, initiated_by);
                entry.amount = Some(amount_koinu);
                entry.address = Some(to.to_string());
                entry.tier = Some(classification.tier);
                entry.reason = Some(reason.to_string());
                entry.metadata = Some(serde_json::json!({ "approval_id": approval.id }));
                self.audit.append(&entry);

                Ok(SpendDecision::Queued { approval })
            }
        }
    }

    /// Resolve a queued approval. Approval executes the spend and promotes
    /// the entry to `executed`; denial just closes it. Double resolution is
    /// a no-op.
    pub async fn resolve_approval(
        &self,
        id: &str,
        by: &str,
        approve: bool,
    ) -> Result<ApprovalResolution> {
        if !approve {
            let outcome = self.approvals.deny(id, by)?;
            if let ResolveOutcome::Resolved(entry) = outcome {
                self.audit_resolution(&entry, by, "denied", Initiator::Owner);
                return Ok(ApprovalResolution::Denied);
            }
            return Ok(ApprovalResolution::NoOp);
        }

        let ResolveOutcome::Resolved(entry) = self.approvals.approve(id, by)? else {
            return Ok(ApprovalResolution::NoOp);
        };
        self.audit_resolution(&entry, by, "approved", Initiator::Owner);
        let txid = self.execute_approved(&entry).await?;
        Ok(ApprovalResolution::Executed { txid })
    }

    /// Sweep expired approvals, executing any that auto-approve. Returns the
    /// txids that went out. An execution failure leaves its entry approved
    /// for a retry and does not stop the sweep.
    pub async fn expire_approvals(&self) -> Result<Vec<String>> {
        let mut executed = Vec::new();
        for entry in self.approvals.expire()? {
            self.audit_resolution(&entry, "auto-expiry", "approved", Initiator::System);
            match self.execute_approved(&entry).await {
                Ok(txid) => executed.push(txid),
                Err(e) => {
                    log::warn!("wallet: auto-approved {} failed to execute: {e}", entry.id);
                }
            }
        }
        Ok(executed)
    }

    /// Fund an HTLC whose spend has already cleared the policy/approval
    /// layer, and register it with the lifecycle manager.
    pub async fn fund_htlc<S: HtlcRecordStore>(
        &self,
        lifecycle: &mut HtlcLifecycle<S>,
        htlc: &HtlcParams,
        session_id: [u8; 8],
        skill_code: u16,
        tool_price: u64,
        fee_buffer: u64,
    ) -> Result<String> {
        let record = lifecycle.create(self.config.network, htlc, session_id, skill_code)?;

        let fee = estimate_fee(FUNDING_TX_SIZE, self.config.fee_per_kb);
        let funding_target = tool_price
            .checked_add(fee_buffer)
            .and_then(|amount| amount.checked_add(fee))
            .ok_or_else(|| {
                WalletError::Sdk(quackstro_sdk::Error::InvalidAmount(
                    "htlc amount overflows".into(),
                ))
            })?;
        let selection = self.select_inputs(funding_target)?;

        let built = match build_funding_transaction(
            &FundingParams {
                network: self.config.network,
                htlc: *htlc,
                session_id,
                skill_code,
                tool_price,
                fee_buffer,
                inputs: selection_inputs(&selection)?,
                change_address: self.address(),
                fee,
            },
            self.signer.as_ref(),
        ) {
            Ok(built) => built,
            Err(e) => {
                self.unlock_selection(&selection);
                return Err(e.into());
            }
        };

        if let Err(e) = self.relay(&built.raw_hex()).await {
            self.unlock_selection(&selection);
            return Err(e);
        }
        self.mark_selection_spent(&selection, &built.txid);
        lifecycle.funding_broadcast(&record.session_id, &built.txid)?;

        let mut entry = AuditEntry::new(AuditAction::HtlcFund, Initiator::Agent);
        entry.amount = Some(tool_price + fee_buffer);
        entry.fee = Some(built.fee);
        entry.address = Some(record.p2sh_address.clone());
        entry.txid = Some(built.txid.clone());
        entry.metadata = Some(serde_json::json!({
            "session_id": record.session_id,
            "skill_code": skill_code,
        }));
        self.audit.append(&entry);

        Ok(built.txid)
    }

    /// Record an incoming payment: dedup-audited, and a balance recovery
    /// check against the alert state.
    pub fn record_receive(&self, txid: &str, amount_koinu: u64) -> Result<bool> {
        let logged = self
            .audit
            .log_receive(txid, amount_koinu, &self.address(), Initiator::External);
        self.alerts
            .check_recovery(self.balance().total, self.config.alert_threshold_koinu)?;
        Ok(logged)
    }

    // ── Direct path internals ───────────────────────────────────────

    async fn direct_spend(
        &self,
        to: &str,
        amount_koinu: u64,
        tier: &str,
        initiated_by: Initiator,
    ) -> Result<(String, u64)> {
        let fee = estimate_fee(PAYMENT_TX_SIZE, self.config.fee_per_kb);
        let needed = amount_koinu
            .checked_add(fee)
            .ok_or(WalletError::InsufficientSpendable { needed: u64::MAX })?;
        let selection = self.select_inputs(needed)?;

        let built = match build_payment_transaction(
            &PaymentParams {
                network: self.config.network,
                to: to.to_string(),
                amount_koinu,
                inputs: selection_inputs(&selection)?,
                change_address: self.address(),
                fee,
            },
            self.signer.as_ref(),
        ) {
            Ok(built) => built,
            Err(e) => {
                self.unlock_selection(&selection);
                return Err(e.into());
            }
        };

        if let Err(e) = self.relay(&built.raw_hex()).await {
            self.unlock_selection(&selection);
            return Err(e);
        }
        self.mark_selection_spent(&selection, &built.txid);

        let mut entry = AuditEntry::new(AuditAction::Send, initiated_by);
        entry.amount = Some(amount_koinu);
        entry.fee = Some(built.fee);
        entry.address = Some(to.to_string());
        entry.txid = Some(built.txid.clone());
        entry.tier = Some(tier.to_string());
        self.audit.append(&entry);

        Ok((built.txid, built.fee))
    }

    /// Select and lock confirmed UTXOs covering `target_koinu`.
    fn select_inputs(&self, target_koinu: u64) -> Result<Selection> {
        let min_conf = self.config.min_confirmations;
        self.utxos
            .select_and_lock(target_koinu, |pool, target| {
                let eligible: Vec<Utxo> = pool
                    .iter()
                    .filter(|u| u.confirmations >= min_conf)
                    .cloned()
                    .collect();
                largest_first(&eligible, target)
            })?
            .ok_or(WalletError::InsufficientSpendable {
                needed: target_koinu,
            })
    }

    async fn relay(&self, raw_hex: &str) -> Result<()> {
        let report = self
            .broadcaster
            .broadcast(self.config.network, raw_hex)
            .await?;
        report.require_success()?;
        Ok(())
    }

    fn unlock_selection(&self, selection: &Selection) {
        for utxo in &selection.utxos {
            if let Err(e) = self.utxos.unlock(&utxo.txid, utxo.vout) {
                log::warn!("wallet: failed to unlock {}:{}: {e}", utxo.txid, utxo.vout);
            }
        }
    }

    fn mark_selection_spent(&self, selection: &Selection, txid: &str) {
        for utxo in &selection.utxos {
            if let Err(e) = self.utxos.mark_spent(&utxo.txid, utxo.vout, txid) {
                log::warn!(
                    "wallet: failed to mark {}:{} spent: {e}",
                    utxo.txid,
                    utxo.vout
                );
            }
        }
    }

    fn audit_resolution(
        &self,
        entry: &PendingApproval,
        by: &str,
        verdict: &str,
        initiated_by: Initiator,
    ) {
        let mut audit = AuditEntry::new(AuditAction::ApprovalResolved, initiated_by);
        audit.amount = Some(entry.amount_koinu);
        audit.address = Some(entry.to.clone());
        audit.tier = Some(entry.tier.clone());
        audit.metadata = Some(serde_json::json!({
            "approval_id": entry.id,
            "verdict": verdict,
            "resolved_by": by,
        }));
        self.audit.append(&audit);
    }

    async fn execute_approved(&self, entry: &PendingApproval) -> Result<String> {
        let (txid, _fee) = self
            .direct_spend(&entry.to, entry.amount_koinu, &entry.tier, Initiator::System)
            .await?;
        self.approvals.mark_executed(&entry.id)?;
        Ok(txid)
    }
}
