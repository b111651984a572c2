use bridge_traits::error::BridgeError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RealtimeError {
    /// Channel failed to open or was closed by the remote side
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Bridge error: {0}")]
    Bridge(#[from] BridgeError),
}

pub type Result<T> = std::result::Result<T, RealtimeError>;
