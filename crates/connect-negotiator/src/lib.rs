//! Participant side of Web-Connect signaling.
//!
//! An [`Initiator`] sends an offer to a responder's session code and waits
//! for the answer on its own code; a [`Responder`] serves every offer that
//! arrives on the code it owns. Both poll the relay mailbox and trickle ICE
//! candidates until the local [`PeerTransport`] reports connectivity.

pub mod client;
pub mod config;
pub mod error;
pub mod initiator;
pub mod responder;
pub mod state;
pub mod transport;

pub use client::{HttpRelayClient, RelayClient};
pub use config::NegotiatorConfig;
pub use error::{NegotiationError, RelayClientError};
pub use initiator::Initiator;
pub use responder::{Responder, ResponderEvent};
pub use state::{NegotiationAttempt, NegotiationState, Role};
pub use transport::{
    Admission, CandidateBuffer, ConnectedPeer, PeerHandle, PeerTransport, TransportError,
    TransportEvent, TransportFactory,
};
