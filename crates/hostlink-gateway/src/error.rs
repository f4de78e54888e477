//! Gateway error types.

use thiserror::Error;

use crate::frame::FrameError;
use crate::port::PortError;

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("port negotiation failed: {0}")]
    Port(#[from] PortError),

    #[error("frame error: {0}")]
    Frame(#[from] FrameError),
}

pub type Result<T> = std::result::Result<T, GatewayError>;
