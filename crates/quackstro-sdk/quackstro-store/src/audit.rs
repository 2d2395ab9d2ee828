//! Append-only audit log.
//!
//! One JSON object per line at `<data>/audit/audit.jsonl`. The log is a
//! record of what the wallet did, not a dependency of doing it: write
//! failures are logged and swallowed, and a malformed line on read is
//! skipped rather than poisoning the whole file. Receives are deduplicated
//! by txid so a re-scan never double-counts income.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::fs::append_line;

/// How far back `log_receive` scans for an existing entry.
const DEDUPE_SCAN_DEPTH: usize = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    Send,
    Receive,
    Broadcast,
    HtlcFund,
    HtlcClaim,
    HtlcRefund,
    ApprovalQueued,
    ApprovalResolved,
    /// Forward-compat: an action tag this build does not know.
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Initiator {
    Owner,
    Agent,
    System,
    External,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub id: String,
    /// RFC 3339 timestamp.
    pub timestamp: String,
    pub action: AuditAction,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub amount: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fee: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub txid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tier: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub initiated_by: Initiator,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
}

impl AuditEntry {
    /// A bare entry; fill the optional fields before logging.
    pub fn new(action: AuditAction, initiated_by: Initiator) -> Self {
        AuditEntry {
            id: uuid::Uuid::new_v4().to_string(),
            timestamp: chrono::Utc::now().to_rfc3339(),
            action,
            amount: None,
            fee: None,
            address: None,
            txid: None,
            tier: None,
            reason: None,
            initiated_by,
            metadata: None,
        }
    }
}

/// The audit log. A single appender serializes writes, so entry order on
/// disk matches wall-clock order within the process.
pub struct AuditLog {
    path: PathBuf,
    appender: Mutex<()>,
}

impl AuditLog {
    pub fn open(data_dir: &Path) -> Self {
        AuditLog {
            path: data_dir.join("audit").join("audit.jsonl"),
            appender: Mutex::new(()),
        }
    }

    /// Append an entry. Failures are logged and swallowed — auditing must
    /// never take the wallet down with it.
    pub fn append(&self, entry: &AuditEntry) {
        let _guard = self.appender.lock().unwrap_or_else(|p| p.into_inner());
        let line = match serde_json::to_string(entry) {
            Ok(line) => line,
            Err(e) => {
                log::warn!("audit: entry {} failed to serialize: {e}", entry.id);
                return;
            }
        };
        if let Err(e) = append_line(&self.path, &line) {
            log::warn!("audit: append failed: {e}");
        }
    }

    /// Record an incoming payment, once per txid. Returns whether an entry
    /// was actually written.
    pub fn log_receive(
        &self,
        txid: &str,
        amount_koinu: u64,
        address: &str,
        initiated_by: Initiator,
    ) -> bool {
        let recent = self.tail(DEDUPE_SCAN_DEPTH);
        let duplicate = recent.iter().any(|entry| {
            entry.action == AuditAction::Receive && entry.txid.as_deref() == Some(txid)
        });
        if duplicate {
            log::debug!("audit: receive {txid} already recorded");
            return false;
        }

        let mut entry = AuditEntry::new(AuditAction::Receive, initiated_by);
        entry.amount = Some(amount_koinu);
        entry.address = Some(address.to_string());
        entry.txid = Some(txid.to_string());
        self.append(&entry);
        true
    }

    /// The last `n` parseable entries, oldest first. Malformed lines are
    /// skipped with a debug note.
    pub fn tail(&self, n: usize) -> Vec<AuditEntry> {
        let contents = match std::fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(_) => return Vec::new(),
        };
        let lines: Vec<&str> = contents.lines().filter(|l| !l.trim().is_empty()).collect();
        let start = lines.len().saturating_sub(n);
        lines[start..]
            .iter()
            .filter_map(|line| match serde_json::from_str(line) {
                Ok(entry) => Some(entry),
                Err(e) => {
                    log::debug!("audit: skipping malformed line: {e}");
                    None
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open_log() -> (tempfile::TempDir, AuditLog) {
        let dir = tempfile::tempdir().unwrap();
        let log = AuditLog::open(dir.path());
        (dir, log)
    }

    #[test]
    fn append_and_tail_in_order() {
        let (_dir, log) = open_log();
        for (action, amount) in [
            (AuditAction::Send, 100),
            (AuditAction::Broadcast, 200),
            (AuditAction::HtlcFund, 300),
        ] {
            let mut entry = AuditEntry::new(action, Initiator::Agent);
            entry.amount = Some(amount);
            log.append(&entry);
        }

        let entries = log.tail(10);
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0].action, AuditAction::Send);
        assert_eq!(entries[2].action, AuditAction::HtlcFund);
        assert_eq!(entries[2].amount, Some(300));

        // tail(n) really is a tail.
        let last = log.tail(1);
        assert_eq!(last.len(), 1);
        assert_eq!(last[0].action, AuditAction::HtlcFund);
    }

    #[test]
    fn receive_dedupes_by_txid() {
        let (_dir, log) = open_log();
        assert!(log.log_receive("tx1", 500, "DAddr", Initiator::External));
        assert!(!log.log_receive("tx1", 500, "DAddr", Initiator::External));
        assert!(log.log_receive("tx2", 700, "DAddr", Initiator::External));

        let receives: Vec<AuditEntry> = log
            .tail(100)
            .into_iter()
            .filter(|e| e.action == AuditAction::Receive)
            .collect();
        assert_eq!(receives.len(), 2);
    }

    #[test]
    fn malformed_lines_are_skipped() {
        let (_dir, log) = open_log();
        log.append(&AuditEntry::new(AuditAction::Send, Initiator::Owner));
        append_line(&log.path, "{ this is not json").unwrap();
        log.append(&AuditEntry::new(AuditAction::Broadcast, Initiator::Owner));

        let entries = log.tail(10);
        assert_eq!(entries.len(), 2);
    }

    #[test]
    fn unknown_action_tags_survive() {
        let (_dir, log) = open_log();
        append_line(
            &log.path,
            r#"{"id":"x","timestamp":"2026-01-01T00:00:00Z","action":"quantum_teleport","initiated_by":"system"}"#,
        )
        .unwrap();
        let entries = log.tail(10);
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].action, AuditAction::Unknown);
    }

    #[test]
    fn unknown_fields_are_ignored() {
        let (_dir, log) = open_log();
        append_line(
            &log.path,
            r#"{"id":"y","timestamp":"2026-01-01T00:00:00Z","action":"send","initiated_by":"agent","color":"wow","layers":3}"#,
        )
        .unwrap();
        let entries = log.tail(10);
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].action, AuditAction::Send);
    }

    #[test]
    fn missing_file_reads_empty() {
        let (_dir, log) = open_log();
        assert!(log.tail(10).is_empty());
    }

    #[cfg(unix)]
    #[test]
    fn log_file_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;
        let (_dir, log) = open_log();
        log.append(&AuditEntry::new(AuditAction::Send, Initiator::Owner));
        let mode = std::fs::metadata(&log.path).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o600);
    }
}
