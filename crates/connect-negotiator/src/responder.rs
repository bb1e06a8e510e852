use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use connect_protocol::{
    AnswerPayload, IcePayload, MailboxMessage, OfferPayload, SessionCode, SignalKind,
};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::{interval, sleep_until, timeout_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::client::RelayClient;
use crate::config::NegotiatorConfig;
use crate::error::NegotiationError;
use crate::state::{NegotiationAttempt, NegotiationState, Role};
use crate::transport::{
    ConnectedPeer, PeerTransport, TransportError, TransportEvent, TransportFactory,
};

/// Outcome of one offer served by a [`Responder`].
#[derive(Debug)]
pub struct ResponderEvent {
    pub caller_code: SessionCode,
    pub outcome: Result<ConnectedPeer, NegotiationError>,
}

/// Serves every offer arriving on `own_code`. Each offer becomes an
/// independent attempt with its own transport.
///
/// Every offer's password is checked with the relay before a transport is
/// allocated, so `relay` must be authenticated as the owner of `own_code`.
/// Sessions without a password accept any offer.
pub struct Responder {
    relay: Arc<dyn RelayClient>,
    factory: Arc<dyn TransportFactory>,
    own_code: SessionCode,
    config: NegotiatorConfig,
}

/// ICE from a sender whose offer has not been seen yet.
struct EarlyCandidates {
    first_seen: Instant,
    candidates: VecDeque<Value>,
}

impl Responder {
    pub fn new(
        relay: Arc<dyn RelayClient>,
        factory: Arc<dyn TransportFactory>,
        own_code: SessionCode,
        config: NegotiatorConfig,
    ) -> Self {
        Self {
            relay,
            factory,
            own_code,
            config,
        }
    }

    pub fn own_code(&self) -> &SessionCode {
        &self.own_code
    }

    pub fn spawn(
        self,
        cancel: CancellationToken,
    ) -> (JoinHandle<()>, mpsc::UnboundedReceiver<ResponderEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = tokio::spawn(async move { self.run(tx, cancel).await });
        (handle, rx)
    }

    /// Polls until `cancel` fires, then waits for in-flight attempts to
    /// wind down.
    pub async fn run(self, events: mpsc::UnboundedSender<ResponderEvent>, cancel: CancellationToken) {
        let shared = Arc::new(self);
        let mut attempts = JoinSet::new();
        let mut routes: HashMap<SessionCode, mpsc::UnboundedSender<Value>> = HashMap::new();
        let mut early: HashMap<SessionCode, EarlyCandidates> = HashMap::new();

        let mut ticker = interval(shared.config.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(own = %shared.own_code, "responder polling");

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let messages = match shared.relay.poll(&shared.own_code).await {
                Ok(messages) => messages,
                Err(err) => {
                    warn!(own = %shared.own_code, error = %err, "poll failed; retrying next tick");
                    continue;
                }
            };
            while attempts.try_join_next().is_some() {}
            routes.retain(|_, tx| !tx.is_closed());
            let horizon = shared.config.answer_timeout;
            early.retain(|sender, pending| {
                let live = pending.first_seen.elapsed() < horizon;
                if !live {
                    debug!(
                        sender = %sender,
                        dropped = pending.candidates.len(),
                        "expiring unclaimed candidates"
                    );
                }
                live
            });

            for message in messages {
                match message.kind {
                    SignalKind::Offer => {
                        let Some((caller, offer)) = shared.parse_offer(&message) else {
                            continue;
                        };
                        let (tx, rx) = mpsc::unbounded_channel();
                        if let Some(pending) = early.remove(&caller) {
                            for candidate in pending.candidates {
                                let _ = tx.send(candidate);
                            }
                        }
                        if routes.insert(caller.clone(), tx).is_some() {
                            debug!(caller = %caller, "new offer supersedes candidate route");
                        }
                        attempts.spawn(shared.clone().serve_offer(
                            caller,
                            offer,
                            rx,
                            events.clone(),
                            cancel.child_token(),
                        ));
                    }
                    SignalKind::Ice => {
                        shared.route_candidate(&message.payload, &mut routes, &mut early)
                    }
                    SignalKind::Answer => {
                        debug!(own = %shared.own_code, "responder ignoring inbound answer");
                    }
                }
            }
        }

        while attempts.join_next().await.is_some() {}
        info!(own = %shared.own_code, "responder stopped");
    }

    fn parse_offer(&self, message: &MailboxMessage) -> Option<(SessionCode, OfferPayload)> {
        match OfferPayload::from_value(&message.payload) {
            Ok(offer) => Some((offer.caller_code.clone(), offer)),
            Err(err) => {
                warn!(own = %self.own_code, error = %err, "skipping malformed offer");
                None
            }
        }
    }

    fn route_candidate(
        &self,
        payload: &Value,
        routes: &mut HashMap<SessionCode, mpsc::UnboundedSender<Value>>,
        early: &mut HashMap<SessionCode, EarlyCandidates>,
    ) {
        let ice = match IcePayload::from_value(payload) {
            Ok(ice) => ice,
            Err(err) => {
                warn!(own = %self.own_code, error = %err, "skipping malformed candidate");
                return;
            }
        };
        if let Some(route) = routes.get(&ice.sender_code) {
            if route.send(ice.candidate).is_err() {
                debug!(sender = %ice.sender_code, "attempt already finished; dropping candidate");
                routes.remove(&ice.sender_code);
            }
            return;
        }

        let limit = self.config.max_pending_candidates;
        if !early.contains_key(&ice.sender_code) && early.len() >= limit {
            warn!(sender = %ice.sender_code, "too many unknown senders; dropping candidate");
            return;
        }
        let pending = early
            .entry(ice.sender_code.clone())
            .or_insert_with(|| EarlyCandidates {
                first_seen: Instant::now(),
                candidates: VecDeque::new(),
            });
        if pending.candidates.len() >= limit {
            warn!(sender = %ice.sender_code, limit, "candidate buffer full; dropping candidate");
            return;
        }
        pending.candidates.push_back(ice.candidate);
    }

    async fn serve_offer(
        self: Arc<Self>,
        caller: SessionCode,
        offer: OfferPayload,
        candidates: mpsc::UnboundedReceiver<Value>,
        events: mpsc::UnboundedSender<ResponderEvent>,
        cancel: CancellationToken,
    ) {
        let outcome = self.negotiate(&caller, offer, candidates, &cancel).await;
        match &outcome {
            Ok(_) => info!(own = %self.own_code, caller = %caller, "negotiation connected"),
            Err(err) => warn!(own = %self.own_code, caller = %caller, error = %err, "negotiation ended"),
        }
        let _ = events.send(ResponderEvent {
            caller_code: caller,
            outcome,
        });
    }

    async fn negotiate(
        &self,
        caller: &SessionCode,
        offer: OfferPayload,
        mut candidates: mpsc::UnboundedReceiver<Value>,
        cancel: &CancellationToken,
    ) -> Result<ConnectedPeer, NegotiationError> {
        let mut attempt = NegotiationAttempt::new(
            Role::Responder,
            Instant::now() + self.config.connect_timeout,
        );

        let password = offer.password.as_deref().unwrap_or_default();
        if !self.relay.verify_password(&self.own_code, password).await? {
            attempt.transition(NegotiationState::Failed)?;
            return Err(NegotiationError::Unauthorized {
                caller: caller.clone(),
            });
        }

        let handle = self.factory.create(caller).await?;
        let transport = handle.transport;
        let mut transport_events = handle.events;

        let answered = timeout_at(
            attempt.deadline(),
            self.answer(caller, offer.description, transport.as_ref()),
        )
        .await;
        match answered {
            Ok(Ok(())) => attempt.transition(NegotiationState::AnswerSent)?,
            Ok(Err(err)) => {
                transport.close().await;
                return Err(err);
            }
            Err(_) => {
                transport.close().await;
                return Err(NegotiationError::Timeout {
                    state: attempt.state(),
                });
            }
        }

        let mut events_open = true;
        let mut candidates_open = true;
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    transport.close().await;
                    return Err(NegotiationError::Cancelled);
                }
                _ = sleep_until(attempt.deadline()) => {
                    let state = attempt.state();
                    attempt.transition(NegotiationState::Timeout)?;
                    transport.close().await;
                    return Err(NegotiationError::Timeout { state });
                }
                event = transport_events.recv(), if events_open => match event {
                    Some(TransportEvent::LocalCandidate(candidate)) => {
                        self.relay_candidate(caller, candidate).await;
                    }
                    Some(TransportEvent::Connected) => {
                        attempt.transition(NegotiationState::Connected)?;
                        return Ok(ConnectedPeer {
                            remote: caller.clone(),
                            transport,
                            events: transport_events,
                        });
                    }
                    Some(TransportEvent::Failed(reason)) => {
                        attempt.transition(NegotiationState::Failed)?;
                        transport.close().await;
                        return Err(TransportError::Operation(reason).into());
                    }
                    None => events_open = false,
                },
                candidate = candidates.recv(), if candidates_open => match candidate {
                    Some(candidate) => {
                        if let Err(err) = transport.add_remote_candidate(candidate).await {
                            warn!(caller = %caller, error = %err, "failed to add remote candidate");
                        }
                    }
                    None => candidates_open = false,
                },
            }
        }
    }

    async fn answer(
        &self,
        caller: &SessionCode,
        description: Value,
        transport: &dyn PeerTransport,
    ) -> Result<(), NegotiationError> {
        transport.apply_remote_description(description).await?;
        let description = transport.create_answer().await?;
        let payload = AnswerPayload { description }
            .to_value()
            .map_err(|err| NegotiationError::Protocol(err.to_string()))?;
        self.relay.send(caller, SignalKind::Answer, payload).await?;
        debug!(own = %self.own_code, caller = %caller, "answer sent");
        Ok(())
    }

    async fn relay_candidate(&self, caller: &SessionCode, candidate: Value) {
        let payload = match (IcePayload {
            candidate,
            sender_code: self.own_code.clone(),
        })
        .to_value()
        {
            Ok(payload) => payload,
            Err(err) => {
                warn!(error = %err, "failed to encode local candidate");
                return;
            }
        };
        if let Err(err) = self.relay.send(caller, SignalKind::Ice, payload).await {
            warn!(caller = %caller, error = %err, "failed to relay local candidate");
        }
    }
}
