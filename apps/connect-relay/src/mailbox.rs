//! Per-code message queues. The relay never interprets payloads beyond
//! the routing field of an offer.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use connect_protocol::{MailboxMessage, OfferPayload, SessionCode, SignalKind};
use metrics::counter;
use serde_json::Value;
use tracing::{debug, warn};

use crate::clock::{millis, Clock};
use crate::error::{RelayError, StoreError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppendOutcome {
    Queued { depth: usize },
    Full,
}

/// FIFO queue per code. `append` must be atomic with respect to `drain`:
/// a message lands either in the drain that removes it or in a later one.
#[async_trait]
pub trait MailboxStore: Send + Sync {
    /// Appends `message` and pushes the queue's expiry to `expires_at_ms`.
    /// A queue already past its expiry is discarded first.
    async fn append(
        &self,
        code: &SessionCode,
        message: MailboxMessage,
        expires_at_ms: u64,
        capacity: usize,
        now_ms: u64,
    ) -> Result<AppendOutcome, StoreError>;

    /// Removes and returns every message queued for `code`, oldest first.
    async fn drain(&self, code: &SessionCode, now_ms: u64)
        -> Result<Vec<MailboxMessage>, StoreError>;

    async fn purge_expired(&self, now_ms: u64) -> Result<usize, StoreError>;
}

pub struct Mailbox {
    store: Arc<dyn MailboxStore>,
    clock: Arc<dyn Clock>,
    ttl: Duration,
    capacity: usize,
    max_payload_bytes: usize,
}

impl Mailbox {
    pub fn new(
        store: Arc<dyn MailboxStore>,
        clock: Arc<dyn Clock>,
        ttl: Duration,
        capacity: usize,
        max_payload_bytes: usize,
    ) -> Self {
        Self {
            store,
            clock,
            ttl,
            capacity: capacity.max(1),
            max_payload_bytes,
        }
    }

    pub fn store(&self) -> Arc<dyn MailboxStore> {
        self.store.clone()
    }

    /// Queues a message for `target`. The target need not be a registered
    /// session; callers use their own ephemeral codes as reply addresses.
    pub async fn send(
        &self,
        target: &SessionCode,
        kind: SignalKind,
        payload: Value,
    ) -> Result<(), RelayError> {
        let size = serde_json::to_vec(&payload)
            .map_err(StoreError::from)?
            .len();
        if size > self.max_payload_bytes {
            return Err(RelayError::Validation(format!(
                "payload of {size} bytes exceeds limit of {} bytes",
                self.max_payload_bytes
            )));
        }
        if kind == SignalKind::Offer {
            OfferPayload::caller_code_of(&payload).map_err(|err| {
                RelayError::Validation(format!("offer payload needs a valid callerCode: {err}"))
            })?;
        }

        let now = self.clock.now_millis();
        let message = MailboxMessage {
            kind,
            payload,
            enqueued_at: now,
        };
        let expires_at = now + millis(self.ttl);
        match self
            .store
            .append(target, message, expires_at, self.capacity, now)
            .await?
        {
            AppendOutcome::Queued { depth } => {
                counter!("connect_relay_signals_sent_total", "kind" => kind.as_str()).increment(1);
                debug!(code = %target, kind = %kind, depth, "signal queued");
                Ok(())
            }
            AppendOutcome::Full => {
                warn!(code = %target, capacity = self.capacity, "mailbox full");
                Err(RelayError::MailboxFull(target.clone()))
            }
        }
    }

    /// Drains `code`'s mailbox. Each message is returned by exactly one poll.
    pub async fn poll(&self, code: &SessionCode) -> Result<Vec<MailboxMessage>, RelayError> {
        let now = self.clock.now_millis();
        let messages = self.store.drain(code, now).await?;
        counter!("connect_relay_polls_total").increment(1);
        if !messages.is_empty() {
            counter!("connect_relay_messages_delivered_total")
                .increment(messages.len() as u64);
            debug!(code = %code, count = messages.len(), "mailbox drained");
        }
        Ok(messages)
    }
}
