use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("chain data provider error: {0}")]
    Provider(String),

    #[error("invalid data: {0}")]
    InvalidData(String),

    #[error("SDK error: {0}")]
    Sdk(String),
}

impl From<quackstro_sdk::Error> for StoreError {
    fn from(e: quackstro_sdk::Error) -> Self {
        match e {
            quackstro_sdk::Error::Provider(msg) => StoreError::Provider(msg),
            other => StoreError::Sdk(other.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, StoreError>;
