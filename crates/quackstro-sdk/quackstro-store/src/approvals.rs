//! Persistent queue of policy-gated spends awaiting a decision.
//!
//! Entries are resolved exactly once: `pending → {approved, denied, expired}`,
//! with `approved → executed` after the spend goes out. Resolving an entry
//! twice is a benign no-op, never an error. All mutations run under one
//! mutex, so an expiry sweep and a manual resolution cannot race; whichever
//! takes the lock first wins, and a manual resolution landing in the same
//! tick as expiry wins because the sweep only touches entries still pending.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::fs::{read_json, write_json_atomic};

const EXPIRY_MS: i64 = 24 * 60 * 60 * 1000;
/// How many resolved entries `cleanup` keeps, newest first.
const RESOLVED_RETENTION: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalStatus {
    Pending,
    Approved,
    Denied,
    Expired,
    Executed,
}

impl ApprovalStatus {
    pub fn is_resolved(self) -> bool {
        !matches!(self, ApprovalStatus::Pending)
    }
}

/// What happens to a pending entry that nobody resolves in time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AutoAction {
    Approve,
    Deny,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingApproval {
    pub id: String,
    pub to: String,
    pub amount_koinu: u64,
    pub reason: String,
    pub tier: String,
    pub action: String,
    /// Epoch milliseconds.
    pub created_at: i64,
    pub expires_at: i64,
    pub auto_action: AutoAction,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delay_minutes: Option<u32>,
    pub status: ApprovalStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolved_by: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolved_at: Option<i64>,
}

/// Caller-supplied fields for a new queue entry.
#[derive(Debug, Clone)]
pub struct NewApproval {
    pub to: String,
    pub amount_koinu: u64,
    pub reason: String,
    pub tier: String,
    pub action: String,
    pub auto_action: AutoAction,
    pub delay_minutes: Option<u32>,
}

/// Outcome of a resolution attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolveOutcome {
    Resolved(Box<PendingApproval>),
    /// The entry was already resolved (or unknown); nothing changed.
    NoOp,
}

impl ResolveOutcome {
    pub fn resolved(&self) -> bool {
        matches!(self, ResolveOutcome::Resolved(_))
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct QueueFile {
    approvals: Vec<PendingApproval>,
}

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// The approval queue, persisted at `<data>/approvals/queue.json`.
pub struct ApprovalQueue {
    path: PathBuf,
    inner: Mutex<Vec<PendingApproval>>,
}

impl ApprovalQueue {
    pub fn open(data_dir: &Path) -> Result<Self> {
        let path = data_dir.join("approvals").join("queue.json");
        let entries = match read_json::<QueueFile>(&path) {
            Ok(Some(file)) => file.approvals,
            Ok(None) => Vec::new(),
            Err(e) => {
                log::warn!("approvals: queue unreadable ({e}), starting empty");
                Vec::new()
            }
        };
        Ok(Self {
            path,
            inner: Mutex::new(entries),
        })
    }

    fn lock_inner(&self) -> std::sync::MutexGuard<'_, Vec<PendingApproval>> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn persist(&self, entries: &[PendingApproval]) -> Result<()> {
        write_json_atomic(
            &self.path,
            &QueueFile {
                approvals: entries.to_vec(),
            },
        )
    }

    /// Queue a spend for approval. Expires 24 hours from now.
    pub fn queue(&self, new: NewApproval) -> Result<PendingApproval> {
        let now = now_ms();
        let entry = PendingApproval {
            id: uuid::Uuid::new_v4().to_string(),
            to: new.to,
            amount_koinu: new.amount_koinu,
            reason: new.reason,
            tier: new.tier,
            action: new.action,
            created_at: now,
            expires_at: now + EXPIRY_MS,
            auto_action: new.auto_action,
            delay_minutes: new.delay_minutes,
            status: ApprovalStatus::Pending,
            resolved_by: None,
            resolved_at: None,
        };
        let mut entries = self.lock_inner();
        entries.push(entry.clone());
        self.persist(&entries)?;
        log::info!(
            "approvals: queued {} koinu to {} ({})",
            entry.amount_koinu,
            entry.to,
            entry.id
        );
        Ok(entry)
    }

    /// Immutable copy of one entry.
    pub fn get(&self, id: &str) -> Option<PendingApproval> {
        self.lock_inner().iter().find(|e| e.id == id).cloned()
    }

    pub fn pending(&self) -> Vec<PendingApproval> {
        self.lock_inner()
            .iter()
            .filter(|e| e.status == ApprovalStatus::Pending)
            .cloned()
            .collect()
    }

    fn resolve(
        &self,
        id: &str,
        status: ApprovalStatus,
        by: Option<&str>,
    ) -> Result<ResolveOutcome> {
        let mut entries = self.lock_inner();
        let Some(entry) = entries.iter_mut().find(|e| e.id == id) else {
            return Ok(ResolveOutcome::NoOp);
        };
        if entry.status != ApprovalStatus::Pending {
            log::debug!("approvals: {id} already {:?}, ignoring", entry.status);
            return Ok(ResolveOutcome::NoOp);
        }
        entry.status = status;
        entry.resolved_by = by.map(str::to_string);
        entry.resolved_at = Some(now_ms());
        let resolved = entry.clone();
        self.persist(&entries)?;
        Ok(ResolveOutcome::Resolved(Box::new(resolved)))
    }

    pub fn approve(&self, id: &str, by: &str) -> Result<ResolveOutcome> {
        self.resolve(id, ApprovalStatus::Approved, Some(by))
    }

    pub fn deny(&self, id: &str, by: &str) -> Result<ResolveOutcome> {
        self.resolve(id, ApprovalStatus::Denied, Some(by))
    }

    /// Promote an approved entry to executed after its spend broadcasts.
    /// Any other starting status is a no-op.
    pub fn mark_executed(&self, id: &str) -> Result<ResolveOutcome> {
        let mut entries = self.lock_inner();
        let Some(entry) = entries.iter_mut().find(|e| e.id == id) else {
            return Ok(ResolveOutcome::NoOp);
        };
        if entry.status != ApprovalStatus::Approved {
            return Ok(ResolveOutcome::NoOp);
        }
        entry.status = ApprovalStatus::Executed;
        let resolved = entry.clone();
        self.persist(&entries)?;
        Ok(ResolveOutcome::Resolved(Box::new(resolved)))
    }

    /// Sweep timed-out pending entries. Each flips to `expired`, except that
    /// an `auto_action = approve` entry is instead promoted to `approved`
    /// (resolved by `"auto-expiry"`) and returned so the caller can execute
    /// it.
    pub fn expire(&self) -> Result<Vec<PendingApproval>> {
        let now = now_ms();
        let mut entries = self.lock_inner();
        let mut auto_approved = Vec::new();
        let mut changed = false;

        for entry in entries.iter_mut() {
            if entry.status != ApprovalStatus::Pending || now < entry.expires_at {
                continue;
            }
            changed = true;
            entry.resolved_at = Some(now);
            match entry.auto_action {
                AutoAction::Approve => {
                    entry.status = ApprovalStatus::Approved;
                    entry.resolved_by = Some("auto-expiry".to_string());
                    auto_approved.push(entry.clone());
                }
                AutoAction::Deny => {
                    entry.status = ApprovalStatus::Expired;
                    entry.resolved_by = Some("auto-expiry".to_string());
                }
            }
            log::info!("approvals: {} expired → {:?}", entry.id, entry.status);
        }

        if changed {
            self.persist(&entries)?;
        }
        Ok(auto_approved)
    }

    /// Drop old resolved entries, keeping every pending entry and the most
    /// recent [`RESOLVED_RETENTION`] resolved ones. Returns how many were
    /// removed.
    pub fn cleanup(&self) -> Result<usize> {
        let mut entries = self.lock_inner();

        let mut resolved: Vec<(i64, String)> = entries
            .iter()
            .filter(|e| e.status.is_resolved())
            .map(|e| (e.resolved_at.unwrap_or(e.created_at), e.id.clone()))
            .collect();
        if resolved.len() <= RESOLVED_RETENTION {
            return Ok(0);
        }
        resolved.sort_by(|a, b| b.0.cmp(&a.0));
        let keep: std::collections::HashSet<String> = resolved
            .into_iter()
            .take(RESOLVED_RETENTION)
            .map(|(_, id)| id)
            .collect();

        let before = entries.len();
        entries.retain(|e| e.status == ApprovalStatus::Pending || keep.contains(&e.id));
        let removed = before - entries.len();
        if removed > 0 {
            self.persist(&entries)?;
        }
        Ok(removed)
    }
}
