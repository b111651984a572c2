use bridge_traits::error::BridgeError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CacheError {
    #[error("Storage error: {0}")]
    Storage(#[from] BridgeError),

    #[error("Corrupt cache data: {0}")]
    Corrupt(String),

    #[error("Invalid record for {collection}: {message}")]
    InvalidRecord { collection: String, message: String },

    #[error("Not a cached collection: {0}")]
    UnknownCollection(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, CacheError>;
