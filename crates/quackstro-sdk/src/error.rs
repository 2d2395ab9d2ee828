use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid HTLC parameter: {0}")]
    InvalidHtlcParam(String),

    #[error("malformed script: {0}")]
    MalformedScript(String),

    #[error("insufficient funds: need {needed} koinu, inputs carry {available}")]
    InsufficientFunds { needed: u64, available: u64 },

    #[error("fee {fee} koinu exceeds contract value {value}")]
    FeeExceedsValue { fee: u64, value: u64 },

    #[error("chain data provider error: {0}")]
    Provider(String),

    #[error("peer handshake timed out")]
    PeerTimeout,

    #[error("peer rejected transaction: {0}")]
    PeerRejected(String),

    #[error("peer socket error: {0}")]
    PeerSocket(String),

    #[error("no peer accepted the transaction")]
    BroadcastBelowThreshold,

    #[error("invalid address: {0}")]
    InvalidAddress(String),

    #[error("invalid amount: {0}")]
    InvalidAmount(String),

    #[error("signer error: {0}")]
    Signer(String),

    #[error("transaction encoding error: {0}")]
    TxEncoding(String),

    #[error("malformed payload: {0}")]
    MalformedPayload(String),

    #[error("record store error: {0}")]
    Storage(String),
}

pub type Result<T> = std::result::Result<T, Error>;
