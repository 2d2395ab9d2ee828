//! Quackstro protocol SDK.
//!
//! Everything needed to speak the Quackstro payment protocol over Dogecoin:
//! the P2P wire layer (framing, DNS-seed discovery, direct tx relay), HTLC
//! script construction and lifecycle tracking, and the transaction builders
//! for funding, claim, refund, and plain policy-approved payments. Key
//! custody and chain data stay behind the [`SpendSigner`] and
//! [`ChainDataProvider`] seams.

pub mod address;
pub mod chain;
pub mod error;
pub mod hashes;
pub mod htlc;
pub mod network;
pub mod payload;
pub mod registry;
pub mod script;
pub mod signer;
pub mod tx;
pub mod units;
pub mod wire;

pub use chain::{ChainDataProvider, ProvidedUtxo, TxStatus};
pub use error::{Error, Result};
pub use htlc::{
    ConsumerHtlcManager, HtlcLifecycle, HtlcRecord, HtlcRecordStore, HtlcState, MemoryHtlcStore,
    ProviderHtlcManager, Transition,
};
pub use network::{user_agent, Network, PROTOCOL_VERSION};
pub use payload::{HtlcClaim, HtlcOffer};
pub use registry::{registry_address, verify_registry_addresses, CATEGORIES};
pub use script::{
    build_redeem_script, generate_secret, htlc_p2sh_address, parse_redeem_script, verify_secret,
    HtlcParams, REDEEM_SCRIPT_LEN,
};
pub use signer::{SoftwareSigner, SpendSigner};
pub use tx::{
    build_claim_transaction, build_funding_transaction, build_payment_transaction,
    build_refund_transaction, estimate_fee, BuiltTransaction, ClaimParams, FundingParams,
    PaymentParams, RefundParams, SpendableInput, DEFAULT_FEE_PER_KB,
};
pub use units::{doge_to_koinu, koinu_to_doge, KOINU_PER_DOGE};
pub use wire::{
    broadcast_to_peers, broadcast_transaction, discover_peers, BroadcastReport, PeerFailure,
    PeerInfo, PeerOutcome,
};
