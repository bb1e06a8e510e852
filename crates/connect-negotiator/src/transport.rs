//! Seam to the local media stack. The negotiator never touches SDP or
//! candidate contents; it only moves them between the relay and a
//! [`PeerTransport`].

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use connect_protocol::SessionCode;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::mpsc;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("transport setup failed: {0}")]
    Setup(String),
    #[error("transport operation failed: {0}")]
    Operation(String),
}

#[async_trait]
pub trait PeerTransport: Send + Sync {
    async fn create_offer(&self) -> Result<Value, TransportError>;

    async fn create_answer(&self) -> Result<Value, TransportError>;

    async fn apply_remote_description(&self, description: Value) -> Result<(), TransportError>;

    async fn add_remote_candidate(&self, candidate: Value) -> Result<(), TransportError>;

    /// Releases local resources. Called once an attempt fails or times out.
    async fn close(&self) {}
}

#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// A locally gathered ICE candidate to trickle to the remote side.
    LocalCandidate(Value),
    Connected,
    Failed(String),
}

/// A fresh transport plus the stream of events it reports.
pub struct PeerHandle {
    pub transport: Arc<dyn PeerTransport>,
    pub events: mpsc::UnboundedReceiver<TransportEvent>,
}

/// A negotiation that reached `Connected`. `events` keeps delivering
/// whatever the transport reports afterwards.
pub struct ConnectedPeer {
    pub remote: SessionCode,
    pub transport: Arc<dyn PeerTransport>,
    pub events: mpsc::UnboundedReceiver<TransportEvent>,
}

impl fmt::Debug for ConnectedPeer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectedPeer")
            .field("remote", &self.remote)
            .finish_non_exhaustive()
    }
}

/// Creates one transport per negotiation attempt. `remote` is the code of
/// the peer on the other side.
#[async_trait]
pub trait TransportFactory: Send + Sync {
    async fn create(&self, remote: &SessionCode) -> Result<PeerHandle, TransportError>;
}

#[derive(Debug, Clone, PartialEq)]
pub enum Admission {
    ApplyNow(Value),
    Buffered,
    Overflow,
}

/// Holds remote candidates that arrive before the remote description has
/// been applied, then releases them in arrival order.
#[derive(Debug)]
pub struct CandidateBuffer {
    ready: bool,
    pending: VecDeque<Value>,
    capacity: usize,
}

impl CandidateBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            ready: false,
            pending: VecDeque::new(),
            capacity,
        }
    }

    pub fn is_ready(&self) -> bool {
        self.ready
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn admit(&mut self, candidate: Value) -> Admission {
        if self.ready {
            return Admission::ApplyNow(candidate);
        }
        if self.pending.len() >= self.capacity {
            return Admission::Overflow;
        }
        self.pending.push_back(candidate);
        Admission::Buffered
    }

    /// Marks the remote description applied and returns everything held so
    /// far, oldest first.
    pub fn mark_ready(&mut self) -> Vec<Value> {
        self.ready = true;
        self.pending.drain(..).collect()
    }
}
