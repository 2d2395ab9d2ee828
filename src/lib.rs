//! OpenClawDoge — a policy-gated, self-custodial Dogecoin wallet for
//! autonomous agents.
//!
//! This crate is the orchestration layer: it owns the policy engine and the
//! spend pipeline, and wires the protocol SDK (`quackstro-sdk`) to the
//! persistence layer (`quackstro-store`). Key custody stays behind
//! [`quackstro_sdk::SpendSigner`]; chain data behind
//! [`quackstro_sdk::ChainDataProvider`]; relay behind
//! [`wallet::TxBroadcaster`].

pub mod policy;
pub mod wallet;

pub use policy::{Classification, PolicyEngine, PolicyError, PolicyTier, SpendAction};
pub use wallet::{
    ApprovalResolution, P2pBroadcaster, SpendDecision, TxBroadcaster, Wallet, WalletConfig,
    WalletError,
};

// Re-export the SDK and store so embedders see one coherent surface.
pub use quackstro_sdk;
pub use quackstro_store;
