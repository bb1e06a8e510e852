use std::collections::VecDeque;

use async_trait::async_trait;
use connect_protocol::{MailboxMessage, SessionCode, SessionStatus};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use crate::error::StoreError;
use crate::mailbox::{AppendOutcome, MailboxStore};
use crate::registry::{SessionRecord, SessionStore};

/// Sessions keyed by code. Shard locks make every per-code operation atomic.
#[derive(Default)]
pub struct MemorySessionStore {
    sessions: DashMap<SessionCode, SessionRecord>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn insert_if_vacant(
        &self,
        record: SessionRecord,
        now_ms: u64,
    ) -> Result<bool, StoreError> {
        match self.sessions.entry(record.code.clone()) {
            Entry::Occupied(mut existing) => {
                if existing.get().is_live(now_ms) {
                    return Ok(false);
                }
                existing.insert(record);
                Ok(true)
            }
            Entry::Vacant(slot) => {
                slot.insert(record);
                Ok(true)
            }
        }
    }

    async fn get(
        &self,
        code: &SessionCode,
        now_ms: u64,
    ) -> Result<Option<SessionRecord>, StoreError> {
        Ok(self
            .sessions
            .get(code)
            .map(|entry| entry.value().clone())
            .filter(|record| record.is_live(now_ms)))
    }

    async fn list(&self, now_ms: u64) -> Result<Vec<SessionRecord>, StoreError> {
        Ok(self
            .sessions
            .iter()
            .filter(|entry| entry.value().is_live(now_ms))
            .map(|entry| entry.value().clone())
            .collect())
    }

    async fn close_owned_by(&self, owner: &str, now_ms: u64) -> Result<usize, StoreError> {
        let mut closed = 0;
        for mut entry in self.sessions.iter_mut() {
            let record = entry.value_mut();
            if record.owner == owner
                && record.status == SessionStatus::Online
                && record.is_live(now_ms)
            {
                record.status = SessionStatus::Closed;
                closed += 1;
            }
        }
        Ok(closed)
    }

    async fn purge_expired(&self, now_ms: u64) -> Result<usize, StoreError> {
        let before = self.sessions.len();
        self.sessions.retain(|_, record| record.is_live(now_ms));
        Ok(before.saturating_sub(self.sessions.len()))
    }
}

struct Queue {
    messages: VecDeque<MailboxMessage>,
    expires_at: u64,
}

/// Mailboxes keyed by code. Draining removes the whole entry, so a
/// concurrent append either lands before the removal or starts a new queue.
#[derive(Default)]
pub struct MemoryMailboxStore {
    queues: DashMap<SessionCode, Queue>,
}

impl MemoryMailboxStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.queues.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queues.is_empty()
    }
}

#[async_trait]
impl MailboxStore for MemoryMailboxStore {
    async fn append(
        &self,
        code: &SessionCode,
        message: MailboxMessage,
        expires_at_ms: u64,
        capacity: usize,
        now_ms: u64,
    ) -> Result<AppendOutcome, StoreError> {
        let mut queue = self.queues.entry(code.clone()).or_insert_with(|| Queue {
            messages: VecDeque::new(),
            expires_at: expires_at_ms,
        });
        if queue.expires_at <= now_ms {
            queue.messages.clear();
        }
        if queue.messages.len() >= capacity {
            return Ok(AppendOutcome::Full);
        }
        queue.messages.push_back(message);
        queue.expires_at = expires_at_ms;
        Ok(AppendOutcome::Queued {
            depth: queue.messages.len(),
        })
    }

    async fn drain(
        &self,
        code: &SessionCode,
        now_ms: u64,
    ) -> Result<Vec<MailboxMessage>, StoreError> {
        match self.queues.remove(code) {
            Some((_, queue)) if queue.expires_at > now_ms => Ok(queue.messages.into()),
            _ => Ok(Vec::new()),
        }
    }

    async fn purge_expired(&self, now_ms: u64) -> Result<usize, StoreError> {
        let before = self.queues.len();
        self.queues.retain(|_, queue| queue.expires_at > now_ms);
        Ok(before.saturating_sub(self.queues.len()))
    }
}
