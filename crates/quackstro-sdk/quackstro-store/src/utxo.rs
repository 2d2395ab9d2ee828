//! UTXO cache with lock bookkeeping.
//!
//! The cache file is the single source of truth for what this wallet may
//! spend. Lock state is purely local ("funds in flight"): a locked UTXO is
//! invisible to balances and selection until it is unlocked or a refresh
//! confirms the spend by dropping it. All operations serialize through one
//! mutex, so a `refresh` can never interleave with `select_and_lock`.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};

use quackstro_sdk::{ChainDataProvider, ProvidedUtxo};

use crate::error::Result;
use crate::fs::{read_json, write_json_atomic};

const CACHE_FILE_VERSION: u32 = 1;

/// One cached unspent output. Txid is display-order hex.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Utxo {
    pub txid: String,
    pub vout: u32,
    pub amount_koinu: u64,
    /// Hex scriptPubKey.
    #[serde(default)]
    pub script: String,
    #[serde(default)]
    pub confirmations: u32,
    #[serde(default)]
    pub locked: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub locked_at: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub locked_for: Option<String>,
}

impl Utxo {
    pub fn outpoint(&self) -> (String, u32) {
        (self.txid.clone(), self.vout)
    }

    fn clear_lock(&mut self) {
        self.locked = false;
        self.locked_at = None;
        self.locked_for = None;
    }
}

impl From<ProvidedUtxo> for Utxo {
    fn from(p: ProvidedUtxo) -> Self {
        Utxo {
            txid: p.txid,
            vout: p.vout,
            amount_koinu: p.amount_koinu,
            script: hex::encode(p.script),
            confirmations: p.confirmations,
            locked: false,
            locked_at: None,
            locked_for: None,
        }
    }
}

/// Koinu totals over the unlocked portion of the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Balance {
    pub confirmed: u64,
    pub unconfirmed: u64,
    pub total: u64,
}

/// What a refresh did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshOutcome {
    Merged { count: usize },
    /// The provider returned nothing while the cache holds funds: treated as
    /// a provider outage and discarded, never as "everything was spent".
    DiscardedEmpty,
}

/// UTXOs chosen and locked for a pending spend.
#[derive(Debug, Clone)]
pub struct Selection {
    pub utxos: Vec<Utxo>,
    pub total_koinu: u64,
}

#[derive(Debug, Serialize, Deserialize)]
struct CacheFile {
    version: u32,
    #[serde(default)]
    address: Option<String>,
    utxos: Vec<Utxo>,
    #[serde(default)]
    last_refreshed: Option<i64>,
    confirmed_balance: u64,
    unconfirmed_balance: u64,
}

#[derive(Default)]
struct CacheState {
    address: Option<String>,
    utxos: Vec<Utxo>,
    last_refreshed: Option<i64>,
}

impl CacheState {
    fn find_mut(&mut self, txid: &str, vout: u32) -> Option<&mut Utxo> {
        self.utxos
            .iter_mut()
            .find(|u| u.txid == txid && u.vout == vout)
    }

    fn balance(&self) -> Balance {
        let mut balance = Balance::default();
        for utxo in self.utxos.iter().filter(|u| !u.locked) {
            if utxo.confirmations >= 1 {
                balance.confirmed += utxo.amount_koinu;
            } else {
                balance.unconfirmed += utxo.amount_koinu;
            }
            balance.total += utxo.amount_koinu;
        }
        balance
    }
}

/// Default selector: largest UTXOs first until the target is covered.
/// Returns the chosen outpoints, or nothing if the pool cannot cover it.
pub fn largest_first(utxos: &[Utxo], target_koinu: u64) -> Vec<(String, u32)> {
    let mut sorted: Vec<&Utxo> = utxos.iter().collect();
    sorted.sort_by(|a, b| b.amount_koinu.cmp(&a.amount_koinu));

    let mut chosen = Vec::new();
    let mut gathered: u64 = 0;
    for utxo in sorted {
        if gathered >= target_koinu {
            break;
        }
        gathered += utxo.amount_koinu;
        chosen.push(utxo.outpoint());
    }
    if gathered >= target_koinu {
        chosen
    } else {
        Vec::new()
    }
}

/// The wallet's UTXO cache, persisted at `<data>/utxos/cache.json`.
pub struct UtxoStore {
    path: PathBuf,
    inner: Mutex<CacheState>,
}

impl UtxoStore {
    /// Open (or initialize) the cache under `data_dir`. A corrupt cache file
    /// is treated as empty and warned about, never fatal.
    pub fn open(data_dir: &Path) -> Result<Self> {
        let path = data_dir.join("utxos").join("cache.json");
        let state = match read_json::<CacheFile>(&path) {
            Ok(Some(file)) => CacheState {
                address: file.address,
                utxos: file.utxos,
                last_refreshed: file.last_refreshed,
            },
            Ok(None) => CacheState::default(),
            Err(e) => {
                log::warn!("utxo_store: cache unreadable ({e}), starting empty");
                CacheState::default()
            }
        };
        Ok(Self {
            path,
            inner: Mutex::new(state),
        })
    }

    fn persist(&self, state: &CacheState) -> Result<()> {
        let balance = state.balance();
        write_json_atomic(
            &self.path,
            &CacheFile {
                version: CACHE_FILE_VERSION,
                address: state.address.clone(),
                utxos: state.utxos.clone(),
                last_refreshed: state.last_refreshed,
                confirmed_balance: balance.confirmed,
                unconfirmed_balance: balance.unconfirmed,
            },
        )
    }

    fn lock_inner(&self) -> std::sync::MutexGuard<'_, CacheState> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Pull the provider's view of `address` and merge it into the cache.
    ///
    /// Lock metadata survives the merge for every output the provider still
    /// reports; outputs the provider no longer reports are dropped (spent and
    /// confirmed elsewhere). An empty provider response against a non-empty
    /// cache is discarded — see [`RefreshOutcome::DiscardedEmpty`].
    pub fn refresh(
        &self,
        address: &str,
        provider: &dyn ChainDataProvider,
    ) -> Result<RefreshOutcome> {
        let fresh = provider
            .get_utxos(address)
            .map_err(crate::error::StoreError::from)?;

        let mut state = self.lock_inner();
        if fresh.is_empty() && !state.utxos.is_empty() {
            log::warn!(
                "utxo_store: provider returned no utxos for {address} while cache holds {}; \
                 discarding refresh as a likely outage",
                state.utxos.len()
            );
            return Ok(RefreshOutcome::DiscardedEmpty);
        }

        let mut merged: Vec<Utxo> = Vec::with_capacity(fresh.len());
        for provided in fresh {
            let mut utxo = Utxo::from(provided);
            if let Some(local) = state.find_mut(&utxo.txid, utxo.vout) {
                if local.locked {
                    utxo.locked = true;
                    utxo.locked_at = local.locked_at;
                    utxo.locked_for = local.locked_for.clone();
                }
            }
            // The provider owns every other field; dedupe by outpoint.
            if !merged
                .iter()
                .any(|u: &Utxo| u.txid == utxo.txid && u.vout == utxo.vout)
            {
                merged.push(utxo);
            }
        }

        let count = merged.len();
        state.address = Some(address.to_string());
        state.utxos = merged;
        state.last_refreshed = Some(chrono::Utc::now().timestamp_millis());
        self.persist(&state)?;
        Ok(RefreshOutcome::Merged { count })
    }

    /// Unlocked UTXOs with at least `min_conf` confirmations.
    pub fn spendable(&self, min_conf: u32) -> Vec<Utxo> {
        self.lock_inner()
            .utxos
            .iter()
            .filter(|u| !u.locked && u.confirmations >= min_conf)
            .cloned()
            .collect()
    }

    /// Balance over unlocked outputs only; locked funds are in flight and
    /// counted nowhere.
    pub fn balance(&self) -> Balance {
        self.lock_inner().balance()
    }

    pub fn last_refreshed(&self) -> Option<i64> {
        self.lock_inner().last_refreshed
    }

    pub fn len(&self) -> usize {
        self.lock_inner().utxos.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Insert a UTXO, or update amount/script/confirmations if the outpoint
    /// is already cached (lock state survives).
    pub fn add(&self, utxo: Utxo) -> Result<()> {
        let mut state = self.lock_inner();
        if let Some(existing) = state.find_mut(&utxo.txid, utxo.vout) {
            existing.amount_koinu = utxo.amount_koinu;
            existing.script = utxo.script;
            existing.confirmations = utxo.confirmations;
        } else {
            state.utxos.push(utxo);
        }
        self.persist(&state)
    }

    /// Tag an output as spent by `in_txid`. It stays cached (and locked)
    /// until a refresh confirms the spend and drops it.
    pub fn mark_spent(&self, txid: &str, vout: u32, in_txid: &str) -> Result<bool> {
        let mut state = self.lock_inner();
        let Some(utxo) = state.find_mut(txid, vout) else {
            return Ok(false);
        };
        utxo.locked = true;
        utxo.locked_at = Some(chrono::Utc::now().timestamp_millis());
        utxo.locked_for = Some(in_txid.to_string());
        self.persist(&state)?;
        Ok(true)
    }

    /// Clear lock fields on an output. Returns whether a locked output was
    /// actually released.
    pub fn unlock(&self, txid: &str, vout: u32) -> Result<bool> {
        let mut state = self.lock_inner();
        let Some(utxo) = state.find_mut(txid, vout) else {
            return Ok(false);
        };
        if !utxo.locked {
            return Ok(false);
        }
        utxo.clear_lock();
        self.persist(&state)?;
        Ok(true)
    }

    /// Run `selector` over the unlocked portion of the cache and lock what it
    /// picks (tagged `"pending"`) before returning. Never unlocks on its own:
    /// the caller must `unlock` on failure or re-tag via `mark_spent` after
    /// broadcast.
    pub fn select_and_lock<F>(&self, target_koinu: u64, selector: F) -> Result<Option<Selection>>
    where
        F: FnOnce(&[Utxo], u64) -> Vec<(String, u32)>,
    {
        let mut state = self.lock_inner();
        let unlocked: Vec<Utxo> = state.utxos.iter().filter(|u| !u.locked).cloned().collect();
        let chosen = selector(&unlocked, target_koinu);
        if chosen.is_empty() {
            return Ok(None);
        }

        let now = chrono::Utc::now().timestamp_millis();
        let mut selection = Selection {
            utxos: Vec::with_capacity(chosen.len()),
            total_koinu: 0,
        };
        for (txid, vout) in chosen {
            let Some(utxo) = state.find_mut(&txid, vout) else {
                continue; // selector invented an outpoint; skip it
            };
            if utxo.locked {
                continue;
            }
            utxo.locked = true;
            utxo.locked_at = Some(now);
            utxo.locked_for = Some("pending".to_string());
            selection.total_koinu += utxo.amount_koinu;
            selection.utxos.push(utxo.clone());
        }
        if selection.utxos.is_empty() {
            return Ok(None);
        }
        self.persist(&state)?;
        Ok(Some(selection))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quackstro_sdk::{Error as SdkError, TxStatus};

    struct FakeProvider {
        utxos: Vec<ProvidedUtxo>,
        fail: bool,
    }

    impl ChainDataProvider for FakeProvider {
        fn get_utxos(&self, _address: &str) -> quackstro_sdk::Result<Vec<ProvidedUtxo>> {
            if self.fail {
                return Err(SdkError::Provider("explorer down".into()));
            }
            Ok(self.utxos.clone())
        }

        fn get_tx_status(&self, _txid: &str) -> quackstro_sdk::Result<TxStatus> {
            Ok(TxStatus {
                confirmations: 0,
                block_height: None,
            })
        }
    }

    fn utxo(txid: &str, vout: u32, amount: u64, conf: u32) -> Utxo {
        Utxo {
            txid: txid.into(),
            vout,
            amount_koinu: amount,
            script: String::new(),
            confirmations: conf,
            locked: false,
            locked_at: None,
            locked_for: None,
        }
    }

    fn provided(txid: &str, vout: u32, amount: u64, conf: u32) -> ProvidedUtxo {
        ProvidedUtxo {
            txid: txid.into(),
            vout,
            amount_koinu: amount,
            script: vec![],
            confirmations: conf,
        }
    }

    #[test]
    fn refresh_collapse_guard() {
        let dir = tempfile::tempdir().unwrap();
        let store = UtxoStore::open(dir.path()).unwrap();
        store.add(utxo("aa", 0, 100, 3)).unwrap();
        let refreshed_at = store.last_refreshed();

        let outcome = store
            .refresh(
                "DAddr",
                &FakeProvider {
                    utxos: vec![],
                    fail: false,
                },
            )
            .unwrap();
        assert_eq!(outcome, RefreshOutcome::DiscardedEmpty);
        assert_eq!(store.balance().total, 100);
        assert_eq!(store.last_refreshed(), refreshed_at);
    }

    #[test]
    fn refresh_into_empty_cache_accepts_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = UtxoStore::open(dir.path()).unwrap();
        let outcome = store
            .refresh(
                "DAddr",
                &FakeProvider {
                    utxos: vec![],
                    fail: false,
                },
            )
            .unwrap();
        assert_eq!(outcome, RefreshOutcome::Merged { count: 0 });
        assert!(store.last_refreshed().is_some());
    }

    #[test]
    fn refresh_preserves_locks_and_drops_spent() {
        let dir = tempfile::tempdir().unwrap();
        let store = UtxoStore::open(dir.path()).unwrap();
        store.add(utxo("aa", 0, 100, 1)).unwrap();
        store.add(utxo("bb", 1, 200, 1)).unwrap();
        store.mark_spent("aa", 0, "spendtx").unwrap();

        // Provider still sees "aa":0 (spend unconfirmed) with more confs,
        // no longer sees "bb":1, and found a new "cc":0.
        let outcome = store
            .refresh(
                "DAddr",
                &FakeProvider {
                    utxos: vec![provided("aa", 0, 100, 5), provided("cc", 0, 300, 0)],
                    fail: false,
                },
            )
            .unwrap();
        assert_eq!(outcome, RefreshOutcome::Merged { count: 2 });

        // Lock survived, confirmations came from the provider.
        let all: Vec<Utxo> = {
            let mut v = store.spendable(0);
            v.sort_by(|a, b| a.txid.cmp(&b.txid));
            v
        };
        assert_eq!(all.len(), 1); // only "cc" is spendable
        assert_eq!(all[0].txid, "cc");

        assert_eq!(store.len(), 2); // "bb" was dropped
        let balance = store.balance();
        assert_eq!(balance.total, 300); // "aa" locked, "cc" unconfirmed
        assert_eq!(balance.unconfirmed, 300);
    }

    #[test]
    fn provider_failure_bubbles_and_cache_survives() {
        let dir = tempfile::tempdir().unwrap();
        let store = UtxoStore::open(dir.path()).unwrap();
        store.add(utxo("aa", 0, 100, 3)).unwrap();
        let err = store
            .refresh(
                "DAddr",
                &FakeProvider {
                    utxos: vec![],
                    fail: true,
                },
            )
            .unwrap_err();
        assert!(matches!(err, crate::error::StoreError::Provider(_)));
        assert_eq!(store.balance().total, 100);
    }

    #[test]
    fn balance_excludes_locked_everywhere() {
        let dir = tempfile::tempdir().unwrap();
        let store = UtxoStore::open(dir.path()).unwrap();
        store.add(utxo("aa", 0, 100, 2)).unwrap();
        store.add(utxo("bb", 0, 50, 0)).unwrap();
        store.mark_spent("aa", 0, "tx1").unwrap();

        let balance = store.balance();
        assert_eq!(balance.confirmed, 0);
        assert_eq!(balance.unconfirmed, 50);
        assert_eq!(balance.total, 50);

        // Unlock restores it; amounts never changed.
        assert!(store.unlock("aa", 0).unwrap());
        assert_eq!(store.balance().total, 150);
        assert_eq!(store.balance().confirmed, 100);
    }

    #[test]
    fn unlock_is_precise() {
        let dir = tempfile::tempdir().unwrap();
        let store = UtxoStore::open(dir.path()).unwrap();
        store.add(utxo("aa", 0, 100, 2)).unwrap();
        assert!(!store.unlock("aa", 0).unwrap()); // not locked
        assert!(!store.unlock("zz", 9).unwrap()); // not present
        store.mark_spent("aa", 0, "tx1").unwrap();
        assert!(store.unlock("aa", 0).unwrap());
        assert!(!store.unlock("aa", 0).unwrap()); // second unlock is a no-op
    }

    #[test]
    fn outpoints_are_unique() {
        let dir = tempfile::tempdir().unwrap();
        let store = UtxoStore::open(dir.path()).unwrap();
        store.add(utxo("aa", 0, 100, 1)).unwrap();
        store.add(utxo("aa", 0, 175, 4)).unwrap(); // same outpoint, new data
        assert_eq!(store.len(), 1);
        assert_eq!(store.balance().total, 175);
        assert_eq!(store.spendable(4).len(), 1);
    }

    #[test]
    fn spendable_respects_min_conf() {
        let dir = tempfile::tempdir().unwrap();
        let store = UtxoStore::open(dir.path()).unwrap();
        store.add(utxo("aa", 0, 100, 0)).unwrap();
        store.add(utxo("bb", 0, 100, 1)).unwrap();
        store.add(utxo("cc", 0, 100, 6)).unwrap();
        assert_eq!(store.spendable(0).len(), 3);
        assert_eq!(store.spendable(1).len(), 2);
        assert_eq!(store.spendable(6).len(), 1);
        assert_eq!(store.spendable(7).len(), 0);
    }

    #[test]
    fn select_and_lock_tags_pending() {
        let dir = tempfile::tempdir().unwrap();
        let store = UtxoStore::open(dir.path()).unwrap();
        store.add(utxo("aa", 0, 300, 3)).unwrap();
        store.add(utxo("bb", 0, 200, 3)).unwrap();
        store.add(utxo("cc", 0, 100, 3)).unwrap();

        let selection = store
            .select_and_lock(400, largest_first)
            .unwrap()
            .expect("coverable target");
        assert_eq!(selection.total_koinu, 500); // 300 + 200
        assert!(selection.utxos.iter().all(|u| u.locked));
        assert!(selection
            .utxos
            .iter()
            .all(|u| u.locked_for.as_deref() == Some("pending")));

        // The locked pair is gone from balances until unlocked.
        assert_eq!(store.balance().total, 100);

        // A second selection only sees what is left.
        assert!(store.select_and_lock(400, largest_first).unwrap().is_none());
        assert_eq!(store.balance().total, 100);
    }

    #[test]
    fn selection_failure_locks_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let store = UtxoStore::open(dir.path()).unwrap();
        store.add(utxo("aa", 0, 100, 3)).unwrap();
        assert!(store.select_and_lock(500, largest_first).unwrap().is_none());
        assert_eq!(store.balance().total, 100);
        assert_eq!(store.spendable(0).len(), 1);
    }

    #[test]
    fn persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = UtxoStore::open(dir.path()).unwrap();
            store.add(utxo("aa", 0, 100, 3)).unwrap();
            store.mark_spent("aa", 0, "tx9").unwrap();
        }
        let store = UtxoStore::open(dir.path()).unwrap();
        assert_eq!(store.len(), 1);
        assert_eq!(store.balance().total, 0); // still locked
        let spendable = store.spendable(0);
        assert!(spendable.is_empty());
    }

    #[test]
    fn corrupt_cache_starts_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("utxos").join("cache.json");
        crate::fs::ensure_parent_dir(&path).unwrap();
        std::fs::write(&path, "{ not json").unwrap();
        let store = UtxoStore::open(dir.path()).unwrap();
        assert!(store.is_empty());
    }

    #[test]
    fn largest_first_covers_or_declines() {
        let pool = vec![utxo("aa", 0, 50, 1), utxo("bb", 0, 30, 1), utxo("cc", 0, 20, 1)];
        assert_eq!(largest_first(&pool, 60).len(), 2);
        assert_eq!(largest_first(&pool, 100).len(), 3);
        assert!(largest_first(&pool, 101).is_empty());
        assert!(largest_first(&pool, 0).is_empty());
    }
}
