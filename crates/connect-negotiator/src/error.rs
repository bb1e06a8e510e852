use connect_protocol::SessionCode;
use reqwest::StatusCode;
use thiserror::Error;

use crate::state::NegotiationState;
use crate::transport::TransportError;

#[derive(Debug, Error)]
pub enum RelayClientError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("invalid relay url: {0}")]
    Url(#[from] url::ParseError),
    #[error("relay returned {status}: {error}")]
    Status {
        status: StatusCode,
        error: String,
        message: Option<String>,
    },
    #[error("failed to encode payload: {0}")]
    Encode(#[from] serde_json::Error),
}

impl RelayClientError {
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            RelayClientError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }
}

#[derive(Debug, Error)]
pub enum NegotiationError {
    #[error("relay error: {0}")]
    Relay(#[from] RelayClientError),
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),
    #[error("timed out in state {state:?}")]
    Timeout { state: NegotiationState },
    #[error("caller {caller} failed password verification")]
    Unauthorized { caller: SessionCode },
    #[error("protocol error: {0}")]
    Protocol(String),
    #[error("invalid transition from {from:?} to {to:?}")]
    InvalidTransition {
        from: NegotiationState,
        to: NegotiationState,
    },
    #[error("negotiation cancelled")]
    Cancelled,
}
