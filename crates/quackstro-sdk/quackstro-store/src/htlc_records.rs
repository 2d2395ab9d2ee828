//! File-backed HTLC record store.
//!
//! Implements the SDK's [`HtlcRecordStore`] trait over the owner-only JSON
//! document at `<data>/htlc/records.json`, so contract lifecycles survive a
//! restart. Secrets are never written here; they live only in the provider
//! manager's memory.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use quackstro_sdk::htlc::{HtlcRecord, HtlcRecordStore};

use crate::error::Result;
use crate::fs::{read_json, write_json_atomic};

#[derive(Debug, Default, Serialize, Deserialize)]
struct RecordsFile {
    records: Vec<HtlcRecord>,
}

pub struct FileHtlcStore {
    path: PathBuf,
    records: HashMap<String, HtlcRecord>,
}

impl FileHtlcStore {
    pub fn open(data_dir: &Path) -> Result<Self> {
        let path = data_dir.join("htlc").join("records.json");
        let records = match read_json::<RecordsFile>(&path) {
            Ok(Some(file)) => file
                .records
                .into_iter()
                .map(|r| (r.session_id.clone(), r))
                .collect(),
            Ok(None) => HashMap::new(),
            Err(e) => {
                log::warn!("htlc_records: store unreadable ({e}), starting empty");
                HashMap::new()
            }
        };
        Ok(Self { path, records })
    }

    fn persist(&self) -> Result<()> {
        let mut records: Vec<HtlcRecord> = self.records.values().cloned().collect();
        records.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        write_json_atomic(&self.path, &RecordsFile { records })
    }
}

impl HtlcRecordStore for FileHtlcStore {
    fn upsert(&mut self, record: &HtlcRecord) -> quackstro_sdk::Result<()> {
        self.records
            .insert(record.session_id.clone(), record.clone());
        self.persist()
            .map_err(|e| quackstro_sdk::Error::Storage(e.to_string()))
    }

    fn get(&self, session_id: &str) -> quackstro_sdk::Result<Option<HtlcRecord>> {
        Ok(self.records.get(session_id).cloned())
    }

    fn all(&self) -> quackstro_sdk::Result<Vec<HtlcRecord>> {
        Ok(self.records.values().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quackstro_sdk::htlc::HtlcLifecycle;
    use quackstro_sdk::{HtlcParams, Network};

    fn params() -> HtlcParams {
        HtlcParams {
            secret_hash: [0x14; 20],
            provider_pubkey: [0x02; 33],
            consumer_pubkey: [0x03; 33],
            timeout_block: 4_000_000,
        }
    }

    #[test]
    fn lifecycle_survives_restart() {
        let dir = tempfile::tempdir().unwrap();
        let session_id = {
            let store = FileHtlcStore::open(dir.path()).unwrap();
            let mut lifecycle = HtlcLifecycle::new(store);
            let record = lifecycle
                .create(Network::Mainnet, &params(), *b"sessFile", 2)
                .unwrap();
            lifecycle
                .funding_broadcast(&record.session_id, "f0")
                .unwrap();
            record.session_id
        };

        let store = FileHtlcStore::open(dir.path()).unwrap();
        let mut lifecycle = HtlcLifecycle::new(store);
        let record = lifecycle.get(&session_id).unwrap().unwrap();
        assert_eq!(record.funding_txid.as_deref(), Some("f0"));
        assert_eq!(record.state, quackstro_sdk::HtlcState::FundingPending);

        // And the reloaded record keeps moving through the DAG.
        assert!(lifecycle.funding_confirmed(&session_id).unwrap().applied());
    }

    #[test]
    fn upsert_replaces_by_session() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileHtlcStore::open(dir.path()).unwrap();
        let mut lifecycle = HtlcLifecycle::new(store);
        lifecycle
            .create(Network::Mainnet, &params(), *b"sessAAAA", 1)
            .unwrap();
        lifecycle
            .create(Network::Mainnet, &params(), *b"sessAAAA", 1)
            .unwrap();
        assert_eq!(lifecycle.all().unwrap().len(), 1);
    }

    #[test]
    fn corrupt_store_starts_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("htlc").join("records.json");
        crate::fs::ensure_parent_dir(&path).unwrap();
        std::fs::write(&path, "such corruption").unwrap();
        let store = FileHtlcStore::open(dir.path()).unwrap();
        assert!(store.records.is_empty());
    }
}
