use thiserror::Error;

use crate::capability::CapabilityError;
use crate::marshal::MarshalError;
use crate::protocol::ProtocolError;

#[derive(Debug, Error)]
pub enum HostlinkError {
    #[error("Config error: {0}")]
    Config(String),

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("Marshal error: {0}")]
    Marshal(#[from] MarshalError),

    #[error("Capability error: {0}")]
    Capability(#[from] CapabilityError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, HostlinkError>;
