//! Low-balance alert bookkeeping.
//!
//! Tracks whether the owner dismissed or snoozed balance alerts, and clears
//! the dismissal automatically once the balance recovers above the threshold
//! it was dismissed at. State persists on every mutation.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::fs::{read_json, write_json_atomic};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlertState {
    #[serde(default)]
    pub dismissed: bool,
    /// Epoch ms until which alerts are muted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snoozed_until: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_alerted_balance: Option<u64>,
    /// The threshold in force when the owner dismissed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dismissed_at_threshold: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_notified_at: Option<i64>,
}

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Alert state persisted at `<data>/alerts/state.json`.
pub struct AlertStore {
    path: PathBuf,
    inner: Mutex<AlertState>,
}

impl AlertStore {
    pub fn open(data_dir: &Path) -> Result<Self> {
        let path = data_dir.join("alerts").join("state.json");
        let state = match read_json::<AlertState>(&path) {
            Ok(Some(state)) => state,
            Ok(None) => AlertState::default(),
            Err(e) => {
                log::warn!("alerts: state unreadable ({e}), starting fresh");
                AlertState::default()
            }
        };
        Ok(Self {
            path,
            inner: Mutex::new(state),
        })
    }

    fn lock_inner(&self) -> std::sync::MutexGuard<'_, AlertState> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn persist(&self, state: &AlertState) -> Result<()> {
        write_json_atomic(&self.path, state)
    }

    pub fn state(&self) -> AlertState {
        self.lock_inner().clone()
    }

    /// Should a balance alert fire right now?
    pub fn should_alert(&self) -> bool {
        let state = self.lock_inner();
        !state.dismissed && state.snoozed_until.map_or(true, |until| until <= now_ms())
    }

    /// [`should_alert`](Self::should_alert) plus a minimum re-notify
    /// interval.
    pub fn should_alert_with_interval(&self, hours: u64) -> bool {
        if !self.should_alert() {
            return false;
        }
        let state = self.lock_inner();
        match state.last_notified_at {
            None => true,
            Some(last) => now_ms() - last >= (hours as i64) * 3600 * 1000,
        }
    }

    /// The owner dismissed the alert at the given balance/threshold.
    pub fn dismiss(&self, balance_koinu: u64, threshold_koinu: u64) -> Result<()> {
        let mut state = self.lock_inner();
        state.dismissed = true;
        state.dismissed_at_threshold = Some(threshold_koinu);
        state.last_alerted_balance = Some(balance_koinu);
        self.persist(&state)
    }

    /// Mute alerts for the given number of hours.
    pub fn snooze(&self, hours: u64) -> Result<()> {
        let mut state = self.lock_inner();
        state.snoozed_until = Some(now_ms() + (hours as i64) * 3600 * 1000);
        self.persist(&state)
    }

    /// Record that a notification went out at this balance.
    pub fn mark_notified(&self, balance_koinu: u64) -> Result<()> {
        let mut state = self.lock_inner();
        state.last_notified_at = Some(now_ms());
        state.last_alerted_balance = Some(balance_koinu);
        self.persist(&state)
    }

    /// Clear the dismissal if the balance has recovered to (or past) the
    /// threshold it was dismissed at. Returns true on the transition.
    pub fn check_recovery(&self, balance_koinu: u64, threshold_koinu: u64) -> Result<bool> {
        let mut state = self.lock_inner();
        if !state.dismissed {
            return Ok(false);
        }
        let threshold = state.dismissed_at_threshold.unwrap_or(threshold_koinu);
        if balance_koinu < threshold {
            return Ok(false);
        }
        state.dismissed = false;
        state.dismissed_at_threshold = None;
        state.last_alerted_balance = None;
        self.persist(&state)?;
        log::info!("alerts: balance recovered past {threshold} koinu, dismissal cleared");
        Ok(true)
    }
}
