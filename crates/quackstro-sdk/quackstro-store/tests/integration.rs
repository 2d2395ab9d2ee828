//! Cross-store scenarios over a real (temporary) data directory.

use quackstro_sdk::htlc::HtlcLifecycle;
use quackstro_sdk::{
    ChainDataProvider, HtlcParams, HtlcState, Network, ProvidedUtxo, TxStatus,
};

use quackstro_store::{
    largest_first, AlertStore, ApprovalQueue, ApprovalStatus, AuditAction, AuditLog, AutoAction,
    FileHtlcStore, Initiator, NewApproval, RefreshOutcome, UtxoStore,
};

// ==================== Test helpers ====================

struct ScriptedProvider {
    responses: std::sync::Mutex<Vec<Vec<ProvidedUtxo>>>,
}

impl ScriptedProvider {
    fn new(mut responses: Vec<Vec<ProvidedUtxo>>) -> Self {
        responses.reverse(); // pop from the back in call order
        Self {
            responses: std::sync::Mutex::new(responses),
        }
    }
}

impl ChainDataProvider for ScriptedProvider {
    fn get_utxos(&self, _address: &str) -> quackstro_sdk::Result<Vec<ProvidedUtxo>> {
        Ok(self.responses.lock().unwrap().pop().unwrap_or_default())
    }

    fn get_tx_status(&self, _txid: &str) -> quackstro_sdk::Result<TxStatus> {
        Ok(TxStatus {
            confirmations: 1,
            block_height: Some(5_000_000),
        })
    }
}

fn provided(txid: &str, vout: u32, amount: u64, conf: u32) -> ProvidedUtxo {
    ProvidedUtxo {
        txid: txid.into(),
        vout,
        amount_koinu: amount,
        script: vec![0x51],
        confirmations: conf,
    }
}

fn htlc_params() -> HtlcParams {
    HtlcParams {
        secret_hash: [0x14; 20],
        provider_pubkey: [0x02; 33],
        consumer_pubkey: [0x03; 33],
        timeout_block: 5_310_000,
    }
}

// ==================== Scenarios ====================

#[test]
fn spend_in_flight_survives_refresh_and_restart() {
    let dir = tempfile::tempdir().unwrap();

    // Cycle 1: refresh, lock a selection, tag it to a broadcast txid.
    {
        let store = UtxoStore::open(dir.path()).unwrap();
        let provider = ScriptedProvider::new(vec![vec![
            provided("aa", 0, 600, 4),
            provided("bb", 0, 400, 4),
        ]]);
        assert_eq!(
            store.refresh("DAddr", &provider).unwrap(),
            RefreshOutcome::Merged { count: 2 }
        );

        let selection = store
            .select_and_lock(500, largest_first)
            .unwrap()
            .expect("funds cover the target");
        assert_eq!(selection.total_koinu, 600);
        for utxo in &selection.utxos {
            store.mark_spent(&utxo.txid, utxo.vout, "spendtx").unwrap();
        }
        assert_eq!(store.balance().total, 400);
    }

    // Cycle 2 (restart): the lock is still on disk. A refresh that still
    // sees the spent output (unconfirmed spend) keeps it locked; once the
    // provider drops it, it disappears for good.
    {
        let store = UtxoStore::open(dir.path()).unwrap();
        assert_eq!(store.balance().total, 400);

        let provider = ScriptedProvider::new(vec![
            vec![provided("aa", 0, 600, 5), provided("bb", 0, 400, 5)],
            vec![provided("bb", 0, 400, 6)],
        ]);
        store.refresh("DAddr", &provider).unwrap();
        assert_eq!(store.balance().total, 400); // "aa" still locked

        store.refresh("DAddr", &provider).unwrap();
        assert_eq!(store.len(), 1);
        assert_eq!(store.balance().total, 400);
        assert_eq!(store.balance().confirmed, 400);
    }
}

#[test]
fn provider_outage_never_wipes_funds() {
    let dir = tempfile::tempdir().unwrap();
    let store = UtxoStore::open(dir.path()).unwrap();
    let provider = ScriptedProvider::new(vec![
        vec![provided("aa", 0, 1_000, 2)],
        vec![], // outage
        vec![provided("aa", 0, 1_000, 3)],
    ]);

    store.refresh("DAddr", &provider).unwrap();
    let refreshed_at = store.last_refreshed();

    assert_eq!(
        store.refresh("DAddr", &provider).unwrap(),
        RefreshOutcome::DiscardedEmpty
    );
    assert_eq!(store.balance().total, 1_000);
    assert_eq!(store.last_refreshed(), refreshed_at);

    // Recovery on the next good response.
    store.refresh("DAddr", &provider).unwrap();
    assert_eq!(store.balance().confirmed, 1_000);
}

#[test]
fn approval_lifecycle_with_audit_trail() {
    let dir = tempfile::tempdir().unwrap();
    let queue = ApprovalQueue::open(dir.path()).unwrap();
    let audit = AuditLog::open(dir.path());

    let entry = queue
        .queue(NewApproval {
            to: "D7registry".into(),
            amount_koinu: 42_000_000_000,
            reason: "bulk compute purchase".into(),
            tier: "large".into(),
            action: "require-approval".into(),
            auto_action: AutoAction::Deny,
            delay_minutes: None,
        })
        .unwrap();

    let mut queued = quackstro_store::AuditEntry::new(
        AuditAction::ApprovalQueued,
        Initiator::Agent,
    );
    queued.amount = Some(entry.amount_koinu);
    audit.append(&queued);

    assert!(queue.approve(&entry.id, "owner").unwrap().resolved());
    assert!(queue.mark_executed(&entry.id).unwrap().resolved());

    let mut resolved = quackstro_store::AuditEntry::new(
        AuditAction::ApprovalResolved,
        Initiator::Owner,
    );
    resolved.amount = Some(entry.amount_koinu);
    audit.append(&resolved);

    // Reopen both: status and trail are on disk.
    let queue = ApprovalQueue::open(dir.path()).unwrap();
    assert_eq!(queue.get(&entry.id).unwrap().status, ApprovalStatus::Executed);
    let audit = AuditLog::open(dir.path());
    let actions: Vec<AuditAction> = audit.tail(10).iter().map(|e| e.action).collect();
    assert_eq!(
        actions,
        vec![AuditAction::ApprovalQueued, AuditAction::ApprovalResolved]
    );
}

#[test]
fn htlc_lifecycle_on_disk_end_to_end() {
    let dir = tempfile::tempdir().unwrap();
    let session_hex = hex::encode(b"sessInt1");

    {
        let store = FileHtlcStore::open(dir.path()).unwrap();
        let mut lifecycle = HtlcLifecycle::new(store);
        lifecycle
            .create(Network::Mainnet, &htlc_params(), *b"sessInt1", 5)
            .unwrap();
        lifecycle.funding_broadcast(&session_hex, "f0").unwrap();
        lifecycle.funding_confirmed(&session_hex).unwrap();
    }

    // Restart: expiry by height, then refund, all against the reloaded file.
    {
        let store = FileHtlcStore::open(dir.path()).unwrap();
        let mut lifecycle = HtlcLifecycle::new(store);
        assert_eq!(
            lifecycle.get(&session_hex).unwrap().unwrap().state,
            HtlcState::Active
        );
        let expired = lifecycle.observe_height(5_310_000).unwrap();
        assert_eq!(expired, vec![session_hex.clone()]);
        assert!(lifecycle
            .refund_confirmed(&session_hex, "r0")
            .unwrap()
            .applied());
    }

    let store = FileHtlcStore::open(dir.path()).unwrap();
    let lifecycle = HtlcLifecycle::new(store);
    let record = lifecycle.get(&session_hex).unwrap().unwrap();
    assert_eq!(record.state, HtlcState::Refunded);
    assert_eq!(record.refund_txid.as_deref(), Some("r0"));
}

#[test]
fn alert_state_tracks_balance_swings() {
    let dir = tempfile::tempdir().unwrap();
    let alerts = AlertStore::open(dir.path()).unwrap();
    let threshold = 100_u64;

    // Balance fell, owner dismissed.
    alerts.dismiss(1, threshold).unwrap();
    assert!(!alerts.should_alert());

    // Income arrives; balance recovers past the threshold.
    assert!(alerts.check_recovery(150, threshold).unwrap());
    assert!(alerts.should_alert());

    // The cleared state is what a restart sees.
    let alerts = AlertStore::open(dir.path()).unwrap();
    assert!(alerts.should_alert());
    assert!(!alerts.state().dismissed);
}

#[test]
fn data_dir_layout_matches_contract() {
    let dir = tempfile::tempdir().unwrap();

    let utxos = UtxoStore::open(dir.path()).unwrap();
    utxos
        .add(quackstro_store::Utxo {
            txid: "aa".into(),
            vout: 0,
            amount_koinu: 1,
            script: String::new(),
            confirmations: 0,
            locked: false,
            locked_at: None,
            locked_for: None,
        })
        .unwrap();
    let queue = ApprovalQueue::open(dir.path()).unwrap();
    queue
        .queue(NewApproval {
            to: "D".into(),
            amount_koinu: 1,
            reason: String::new(),
            tier: "micro".into(),
            action: "auto-approve".into(),
            auto_action: AutoAction::Deny,
            delay_minutes: None,
        })
        .unwrap();
    let audit = AuditLog::open(dir.path());
    audit.append(&quackstro_store::AuditEntry::new(
        AuditAction::Send,
        Initiator::System,
    ));
    let alerts = AlertStore::open(dir.path()).unwrap();
    alerts.snooze(1).unwrap();
    let store = FileHtlcStore::open(dir.path()).unwrap();
    let mut lifecycle = HtlcLifecycle::new(store);
    lifecycle
        .create(Network::Mainnet, &htlc_params(), *b"sessPath", 1)
        .unwrap();

    for relative in [
        "utxos/cache.json",
        "approvals/queue.json",
        "audit/audit.jsonl",
        "alerts/state.json",
        "htlc/records.json",
    ] {
        assert!(dir.path().join(relative).exists(), "{relative} missing");
    }
}
