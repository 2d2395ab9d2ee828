//! Spend policy engine.
//!
//! Pure classification: an amount in koinu goes in, a tier and an action
//! come out. No I/O, no clocks. Tiers are user-configured thresholds; the
//! first tier whose ceiling covers the amount wins, and the final tier is
//! unbounded so every amount classifies.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use quackstro_sdk::KOINU_PER_DOGE;

#[derive(Debug, Error)]
pub enum PolicyError {
    #[error("policy needs at least one tier")]
    Empty,

    #[error("only the final tier may be unbounded")]
    UnboundedNotLast,

    #[error("tier ceilings must be strictly increasing")]
    CeilingsNotIncreasing,
}

/// What the wallet does with a spend in this tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SpendAction {
    /// Spend immediately.
    AutoApprove,
    /// Spend immediately, but tell the owner.
    Notify,
    /// Queue, auto-approving after the configured delay.
    DelayApprove,
    /// Queue until the owner decides.
    RequireApproval,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyTier {
    pub name: String,
    /// Inclusive ceiling in koinu; `None` = unbounded (final tier only).
    pub max_koinu: Option<u64>,
    pub action: SpendAction,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delay_minutes: Option<u32>,
}

/// The classification handed to the spend pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    pub tier: String,
    pub action: SpendAction,
    pub delay_minutes: Option<u32>,
}

#[derive(Debug, Clone)]
pub struct PolicyEngine {
    tiers: Vec<PolicyTier>,
}

impl PolicyEngine {
    pub fn new(tiers: Vec<PolicyTier>) -> Result<Self, PolicyError> {
        if tiers.is_empty() {
            return Err(PolicyError::Empty);
        }
        let last = tiers.len() - 1;
        let mut previous: Option<u64> = None;
        for (i, tier) in tiers.iter().enumerate() {
            match tier.max_koinu {
                None if i != last => return Err(PolicyError::UnboundedNotLast),
                None => {}
                Some(max) => {
                    if previous.is_some_and(|p| max <= p) {
                        return Err(PolicyError::CeilingsNotIncreasing);
                    }
                    previous = Some(max);
                }
            }
        }
        Ok(Self { tiers })
    }

    pub fn tiers(&self) -> &[PolicyTier] {
        &self.tiers
    }

    /// Classify an amount into its tier.
    pub fn classify(&self, amount_koinu: u64) -> Classification {
        let tier = self
            .tiers
            .iter()
            .find(|t| t.max_koinu.map_or(true, |max| amount_koinu <= max))
            .unwrap_or_else(|| self.tiers.last().expect("validated non-empty"));
        Classification {
            tier: tier.name.clone(),
            action: tier.action,
            delay_minutes: tier.delay_minutes,
        }
    }
}

impl Default for PolicyEngine {
    /// The stock tiering: ≤10 DOGE auto-approves, ≤100 DOGE notifies,
    /// anything larger waits for the owner.
    fn default() -> Self {
        PolicyEngine::new(vec![
            PolicyTier {
                name: "micro".into(),
                max_koinu: Some(10 * KOINU_PER_DOGE),
                action: SpendAction::AutoApprove,
                delay_minutes: None,
            },
            PolicyTier {
                name: "standard".into(),
                max_koinu: Some(100 * KOINU_PER_DOGE),
                action: SpendAction::Notify,
                delay_minutes: None,
            },
            PolicyTier {
                name: "large".into(),
                max_koinu: None,
                action: SpendAction::RequireApproval,
                delay_minutes: None,
            },
        ])
        .expect("stock tiers are valid")
    }
}
