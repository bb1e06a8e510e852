#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use connect_negotiator::{
    NegotiatorConfig, PeerHandle, PeerTransport, RelayClient, RelayClientError, TransportError,
    TransportEvent, TransportFactory,
};
use connect_protocol::{MailboxMessage, SessionCode, SignalKind};
use connect_relay::{AppState, Config, Hs256Verifier, ManualClock, NewSession, RelayError};
use reqwest::StatusCode;
use serde_json::{json, Value};
use tokio::sync::mpsc;

pub fn code(raw: &str) -> SessionCode {
    SessionCode::parse(raw).unwrap()
}

pub fn fast_config() -> NegotiatorConfig {
    NegotiatorConfig {
        poll_interval: Duration::from_millis(50),
        answer_timeout: Duration::from_secs(10),
        connect_timeout: Duration::from_secs(10),
        ..NegotiatorConfig::default()
    }
}

/// Drives the relay's registry and mailbox directly, without HTTP.
pub struct InProcessRelay {
    pub state: AppState,
}

impl InProcessRelay {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            state: AppState::in_memory(
                &Config::default(),
                Arc::new(ManualClock::default()),
                Arc::new(Hs256Verifier::disabled()),
            ),
        })
    }

    /// Registers a session for `alice`. Generated codes never start with a
    /// zero, so callers in these tests use codes like `022222`.
    pub async fn open_session(&self, password: Option<&str>) -> SessionCode {
        self.state
            .registry
            .create(
                "alice",
                NewSession {
                    name: None,
                    require_password: password.is_some(),
                    password: password.map(str::to_string),
                },
            )
            .await
            .unwrap()
            .code
    }
}

fn client_error(err: RelayError) -> RelayClientError {
    RelayClientError::Status {
        status: StatusCode::from_u16(err.status().as_u16()).unwrap(),
        error: err.to_string(),
        message: None,
    }
}

#[async_trait]
impl RelayClient for InProcessRelay {
    async fn send(
        &self,
        target: &SessionCode,
        kind: SignalKind,
        payload: Value,
    ) -> Result<(), RelayClientError> {
        self.state
            .mailbox
            .send(target, kind, payload)
            .await
            .map_err(client_error)
    }

    async fn poll(&self, code: &SessionCode) -> Result<Vec<MailboxMessage>, RelayClientError> {
        self.state.mailbox.poll(code).await.map_err(client_error)
    }

    async fn verify_password(
        &self,
        code: &SessionCode,
        password: &str,
    ) -> Result<bool, RelayClientError> {
        self.state
            .registry
            .verify_password(code, password)
            .await
            .map_err(client_error)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Behavior {
    /// Emit one local candidate when producing the local description.
    pub candidate_on_local_description: bool,
    pub connect_on_remote_description: bool,
    pub connect_on_remote_candidate: bool,
}

/// Records every call; rejects candidates that arrive before a remote
/// description, like a real peer connection would.
pub struct FakeTransport {
    name: String,
    behavior: Behavior,
    events: mpsc::UnboundedSender<TransportEvent>,
    log: Mutex<Vec<String>>,
    remote_applied: AtomicBool,
    closed: AtomicBool,
}

impl FakeTransport {
    pub fn new(name: &str, behavior: Behavior) -> (Arc<Self>, PeerHandle) {
        let (tx, rx) = mpsc::unbounded_channel();
        let transport = Arc::new(Self {
            name: name.to_string(),
            behavior,
            events: tx,
            log: Mutex::new(Vec::new()),
            remote_applied: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        });
        let handle = PeerHandle {
            transport: transport.clone(),
            events: rx,
        };
        (transport, handle)
    }

    pub fn log(&self) -> Vec<String> {
        self.log.lock().unwrap().clone()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn record(&self, entry: String) {
        self.log.lock().unwrap().push(entry);
    }

    fn local_description(&self, kind: &str) -> Value {
        self.record(format!("create_{kind}"));
        if self.behavior.candidate_on_local_description {
            let _ = self.events.send(TransportEvent::LocalCandidate(
                json!({ "candidate": format!("{}-host", self.name) }),
            ));
        }
        json!({ "type": kind, "sdp": format!("v=0 {}", self.name) })
    }
}

#[async_trait]
impl PeerTransport for FakeTransport {
    async fn create_offer(&self) -> Result<Value, TransportError> {
        Ok(self.local_description("offer"))
    }

    async fn create_answer(&self) -> Result<Value, TransportError> {
        Ok(self.local_description("answer"))
    }

    async fn apply_remote_description(&self, description: Value) -> Result<(), TransportError> {
        self.record(format!("remote:{description}"));
        self.remote_applied.store(true, Ordering::SeqCst);
        if self.behavior.connect_on_remote_description {
            let _ = self.events.send(TransportEvent::Connected);
        }
        Ok(())
    }

    async fn add_remote_candidate(&self, candidate: Value) -> Result<(), TransportError> {
        if !self.remote_applied.load(Ordering::SeqCst) {
            return Err(TransportError::Operation(
                "candidate before remote description".into(),
            ));
        }
        self.record(format!("candidate:{candidate}"));
        if self.behavior.connect_on_remote_candidate {
            let _ = self.events.send(TransportEvent::Connected);
        }
        Ok(())
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

#[derive(Default)]
pub struct FakeFactory {
    behavior: Behavior,
    created: Mutex<Vec<(SessionCode, Arc<FakeTransport>)>>,
}

impl FakeFactory {
    pub fn new(behavior: Behavior) -> Arc<Self> {
        Arc::new(Self {
            behavior,
            created: Mutex::new(Vec::new()),
        })
    }

    pub fn created(&self) -> Vec<(SessionCode, Arc<FakeTransport>)> {
        self.created.lock().unwrap().clone()
    }
}

#[async_trait]
impl TransportFactory for FakeFactory {
    async fn create(&self, remote: &SessionCode) -> Result<PeerHandle, TransportError> {
        let (transport, handle) =
            FakeTransport::new(&format!("responder-for-{remote}"), self.behavior);
        self.created
            .lock()
            .unwrap()
            .push((remote.clone(), transport));
        Ok(handle)
    }
}

/// Both sides trickle one candidate and connect once they have applied
/// the other side's candidate.
pub fn trickle_behavior() -> Behavior {
    Behavior {
        candidate_on_local_description: true,
        connect_on_remote_description: false,
        connect_on_remote_candidate: true,
    }
}
