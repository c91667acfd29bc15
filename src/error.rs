//! Call-related error types.

use thiserror::Error;

use crate::session::InvalidTransition;
use crate::socket::ChannelError;

#[derive(Debug, Error)]
pub enum CallError {
    #[error("no call in flight for id: {0}")]
    NotFound(String),

    #[error("another call is already active")]
    AlreadyActive,

    #[error("invalid call state transition: {0}")]
    InvalidTransition(#[from] InvalidTransition),

    #[error("signaling channel error: {0}")]
    Channel(#[from] ChannelError),

    #[error("malformed payload: {0}")]
    Payload(#[from] serde_json::Error),

    #[error("call engine is not running")]
    EngineStopped,

    #[error("missing required component: {0}")]
    MissingComponent(&'static str),
}
