//! Owner-only persistence for the OpenClawDoge wallet.
//!
//! Every store owns its file exclusively and serializes mutations through
//! its own lock; nothing here shares mutable state with anything else. All
//! documents live under one data directory:
//!
//! ```text
//! <data>/utxos/cache.json      — UTXO cache (UtxoStore)
//! <data>/approvals/queue.json  — pending spend approvals (ApprovalQueue)
//! <data>/audit/audit.jsonl     — append-only audit log (AuditLog)
//! <data>/alerts/state.json     — alert bookkeeping (AlertStore)
//! <data>/htlc/records.json     — HTLC lifecycles (FileHtlcStore)
//! ```

pub mod alerts;
pub mod approvals;
pub mod audit;
pub mod error;
pub mod fs;
pub mod htlc_records;
pub mod utxo;

pub use alerts::{AlertState, AlertStore};
pub use approvals::{
    ApprovalQueue, ApprovalStatus, AutoAction, NewApproval, PendingApproval, ResolveOutcome,
};
pub use audit::{AuditAction, AuditEntry, AuditLog, Initiator};
pub use error::{Result, StoreError};
pub use htlc_records::FileHtlcStore;
pub use utxo::{largest_first, Balance, RefreshOutcome, Selection, Utxo, UtxoStore};
