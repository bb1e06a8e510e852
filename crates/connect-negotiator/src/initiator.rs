use std::sync::Arc;

use connect_protocol::{
    AnswerPayload, IcePayload, MailboxMessage, OfferPayload, SessionCode, SignalKind,
};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::time::{interval, sleep_until, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::client::RelayClient;
use crate::config::NegotiatorConfig;
use crate::error::NegotiationError;
use crate::state::{NegotiationAttempt, NegotiationState, Role};
use crate::transport::{
    Admission, CandidateBuffer, ConnectedPeer, PeerHandle, PeerTransport, TransportError,
    TransportEvent,
};

/// Calls a responder: sends an offer to its code and polls `own_code` for
/// the answer and trickled candidates.
pub struct Initiator {
    relay: Arc<dyn RelayClient>,
    own_code: SessionCode,
    config: NegotiatorConfig,
}

impl Initiator {
    pub fn new(relay: Arc<dyn RelayClient>, own_code: SessionCode, config: NegotiatorConfig) -> Self {
        Self {
            relay,
            own_code,
            config,
        }
    }

    pub fn own_code(&self) -> &SessionCode {
        &self.own_code
    }

    /// Runs one attempt against `target` over `peer`. The transport is
    /// closed on every path except success.
    pub async fn connect(
        &self,
        target: &SessionCode,
        password: Option<String>,
        peer: PeerHandle,
        cancel: &CancellationToken,
    ) -> Result<ConnectedPeer, NegotiationError> {
        let PeerHandle { transport, events } = peer;
        let mut run = Run {
            initiator: self,
            target,
            transport: transport.clone(),
            attempt: NegotiationAttempt::new(
                Role::Initiator,
                Instant::now() + self.config.answer_timeout,
            ),
            buffer: CandidateBuffer::new(self.config.max_pending_candidates),
            transport_connected: false,
        };

        match run.drive(password, events, cancel).await {
            Ok(events) => {
                info!(own = %self.own_code, remote = %target, "negotiation connected");
                Ok(ConnectedPeer {
                    remote: target.clone(),
                    transport,
                    events,
                })
            }
            Err(err) => {
                if !run.attempt.is_terminal() {
                    let _ = run.attempt.transition(NegotiationState::Failed);
                }
                warn!(own = %self.own_code, remote = %target, error = %err, "negotiation ended");
                transport.close().await;
                Err(err)
            }
        }
    }
}

struct Run<'a> {
    initiator: &'a Initiator,
    target: &'a SessionCode,
    transport: Arc<dyn PeerTransport>,
    attempt: NegotiationAttempt,
    buffer: CandidateBuffer,
    transport_connected: bool,
}

impl Run<'_> {
    async fn drive(
        &mut self,
        password: Option<String>,
        mut events: mpsc::UnboundedReceiver<TransportEvent>,
        cancel: &CancellationToken,
    ) -> Result<mpsc::UnboundedReceiver<TransportEvent>, NegotiationError> {
        let initiator = self.initiator;
        let config = &initiator.config;
        let own_code = &initiator.own_code;

        let description = self.transport.create_offer().await?;
        let offer = OfferPayload {
            description,
            caller_code: own_code.clone(),
            password,
        }
        .to_value()
        .map_err(|err| NegotiationError::Protocol(err.to_string()))?;
        initiator
            .relay
            .send(self.target, SignalKind::Offer, offer)
            .await?;
        self.attempt.transition(NegotiationState::OfferSent)?;
        self.attempt
            .set_deadline(Instant::now() + config.answer_timeout);
        debug!(own = %own_code, remote = %self.target, "offer sent");

        let mut ticker = interval(config.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut events_open = true;

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(NegotiationError::Cancelled),
                _ = sleep_until(self.attempt.deadline()) => {
                    let state = self.attempt.state();
                    self.attempt.transition(NegotiationState::Timeout)?;
                    return Err(NegotiationError::Timeout { state });
                }
                event = events.recv(), if events_open => match event {
                    Some(event) => {
                        if self.on_transport_event(event).await? {
                            return Ok(events);
                        }
                    }
                    None => events_open = false,
                },
                _ = ticker.tick() => {
                    let messages = match initiator.relay.poll(own_code).await {
                        Ok(messages) => messages,
                        Err(err) => {
                            warn!(own = %own_code, error = %err, "poll failed; retrying next tick");
                            continue;
                        }
                    };
                    // A drained batch cannot be polled again: finish it even
                    // after connecting so trailing candidates still land.
                    let mut connected = false;
                    for message in messages {
                        connected |= self.on_message(message).await?;
                    }
                    if connected {
                        return Ok(events);
                    }
                }
            }
        }
    }

    /// Returns true once the attempt is connected.
    async fn on_transport_event(&mut self, event: TransportEvent) -> Result<bool, NegotiationError> {
        match event {
            TransportEvent::LocalCandidate(candidate) => {
                self.relay_candidate(candidate).await;
                Ok(false)
            }
            TransportEvent::Connected => {
                self.transport_connected = true;
                self.try_connect()
            }
            TransportEvent::Failed(reason) => {
                self.attempt.transition(NegotiationState::Failed)?;
                Err(TransportError::Operation(reason).into())
            }
        }
    }

    async fn on_message(&mut self, message: MailboxMessage) -> Result<bool, NegotiationError> {
        match message.kind {
            SignalKind::Answer => self.on_answer(&message.payload).await,
            SignalKind::Ice => {
                self.on_remote_candidate(&message.payload).await;
                Ok(false)
            }
            SignalKind::Offer => {
                debug!(own = %self.initiator.own_code, "initiator ignoring inbound offer");
                Ok(false)
            }
        }
    }

    async fn on_answer(&mut self, payload: &Value) -> Result<bool, NegotiationError> {
        if self.attempt.state() != NegotiationState::OfferSent {
            debug!(own = %self.initiator.own_code, "ignoring duplicate answer");
            return Ok(false);
        }
        let answer = match AnswerPayload::from_value(payload) {
            Ok(answer) => answer,
            Err(err) => {
                warn!(own = %self.initiator.own_code, error = %err, "skipping malformed answer");
                return Ok(false);
            }
        };

        self.transport
            .apply_remote_description(answer.description)
            .await?;
        self.attempt.transition(NegotiationState::AnswerReceived)?;
        self.attempt
            .set_deadline(Instant::now() + self.initiator.config.connect_timeout);

        for candidate in self.buffer.mark_ready() {
            self.apply_candidate(candidate).await;
        }
        if self.initiator.config.assume_connected_on_answer {
            self.transport_connected = true;
        }
        self.try_connect()
    }

    async fn on_remote_candidate(&mut self, payload: &Value) {
        let ice = match IcePayload::from_value(payload) {
            Ok(ice) => ice,
            Err(err) => {
                warn!(own = %self.initiator.own_code, error = %err, "skipping malformed candidate");
                return;
            }
        };
        if &ice.sender_code != self.target {
            debug!(sender = %ice.sender_code, "ignoring candidate from unrelated peer");
            return;
        }
        match self.buffer.admit(ice.candidate) {
            Admission::ApplyNow(candidate) => self.apply_candidate(candidate).await,
            Admission::Buffered => debug!("candidate buffered until answer"),
            Admission::Overflow => warn!(
                limit = self.initiator.config.max_pending_candidates,
                "candidate buffer full; dropping candidate"
            ),
        }
    }

    async fn apply_candidate(&self, candidate: Value) {
        if let Err(err) = self.transport.add_remote_candidate(candidate).await {
            warn!(error = %err, "failed to add remote candidate");
        }
    }

    async fn relay_candidate(&self, candidate: Value) {
        let ice = IcePayload {
            candidate,
            sender_code: self.initiator.own_code.clone(),
        };
        let payload = match ice.to_value() {
            Ok(payload) => payload,
            Err(err) => {
                warn!(error = %err, "failed to encode local candidate");
                return;
            }
        };
        if let Err(err) = self
            .initiator
            .relay
            .send(self.target, SignalKind::Ice, payload)
            .await
        {
            warn!(remote = %self.target, error = %err, "failed to relay local candidate");
        }
    }

    fn try_connect(&mut self) -> Result<bool, NegotiationError> {
        if self.transport_connected && self.attempt.state() == NegotiationState::AnswerReceived {
            self.attempt.transition(NegotiationState::Connected)?;
            return Ok(true);
        }
        Ok(false)
    }
}
