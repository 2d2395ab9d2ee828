//! Chain-data provider seam.
//!
//! The wallet never talks to a block explorer directly; it consumes
//! confirmations and unspent sets through this trait. Implementations live
//! outside the workspace and are free to be HTTP clients, RPC nodes, or test
//! fixtures.

use crate::error::Result;

/// One unspent output as reported by a provider. Txids are display-order hex.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProvidedUtxo {
    pub txid: String,
    pub vout: u32,
    pub amount_koinu: u64,
    /// Raw scriptPubKey bytes.
    pub script: Vec<u8>,
    pub confirmations: u32,
}

/// Confirmation status of a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TxStatus {
    pub confirmations: u32,
    pub block_height: Option<u32>,
}

/// External source of chain data. Failures surface as
/// [`Error::Provider`](crate::Error::Provider) and must never be treated as
/// spend observations by callers (see the UTXO cache's refresh guard).
pub trait ChainDataProvider: Send + Sync {
    fn get_utxos(&self, address: &str) -> Result<Vec<ProvidedUtxo>>;
    fn get_tx_status(&self, txid: &str) -> Result<TxStatus>;
}
