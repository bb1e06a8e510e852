use async_trait::async_trait;
use connect_protocol::{MailboxMessage, SessionCode, SessionStatus};
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client, Script};
use tracing::warn;

use crate::error::StoreError;
use crate::mailbox::{AppendOutcome, MailboxStore};
use crate::registry::{SessionRecord, SessionStore};

const SESSION_PREFIX: &str = "connect:session:";
const MAILBOX_PREFIX: &str = "connect:mailbox:";

// KEYS[1] = mailbox, ARGV = message, capacity, ttl in ms. Returns the new
// depth, or -1 when the queue is already at capacity.
const APPEND_SCRIPT: &str = r#"
local depth = redis.call('LLEN', KEYS[1])
if depth >= tonumber(ARGV[2]) then
  return -1
end
depth = redis.call('RPUSH', KEYS[1], ARGV[1])
redis.call('PEXPIRE', KEYS[1], ARGV[3])
return depth
"#;

fn session_key(code: &SessionCode) -> String {
    format!("{SESSION_PREFIX}{code}")
}

fn mailbox_key(code: &SessionCode) -> String {
    format!("{MAILBOX_PREFIX}{code}")
}

pub async fn connect(redis_url: &str) -> Result<(RedisSessionStore, RedisMailboxStore), StoreError> {
    let client = Client::open(redis_url)?;
    let conn = ConnectionManager::new(client).await?;
    Ok((
        RedisSessionStore { redis: conn.clone() },
        RedisMailboxStore {
            redis: conn,
            append: Script::new(APPEND_SCRIPT),
        },
    ))
}

/// Session records as JSON strings under `connect:session:{code}`, expired
/// by redis at `expires_at`.
#[derive(Clone)]
pub struct RedisSessionStore {
    redis: ConnectionManager,
}

impl RedisSessionStore {
    async fn scan_keys(&self) -> Result<Vec<String>, StoreError> {
        let mut conn = self.redis.clone();
        let mut cursor: u64 = 0;
        let mut keys = Vec::new();
        loop {
            let (next_cursor, batch): (u64, Vec<String>) = redis::cmd("SCAN")
                .cursor_arg(cursor)
                .arg("MATCH")
                .arg(format!("{SESSION_PREFIX}*"))
                .arg("COUNT")
                .arg(100u32)
                .query_async(&mut conn)
                .await?;
            keys.extend(batch);
            cursor = next_cursor;
            if cursor == 0 {
                break;
            }
        }
        Ok(keys)
    }
}

#[async_trait]
impl SessionStore for RedisSessionStore {
    async fn insert_if_vacant(
        &self,
        record: SessionRecord,
        now_ms: u64,
    ) -> Result<bool, StoreError> {
        let ttl_ms = record.expires_at.saturating_sub(now_ms).max(1);
        let value = serde_json::to_string(&record)?;
        let mut conn = self.redis.clone();
        let reply: Option<String> = redis::cmd("SET")
            .arg(session_key(&record.code))
            .arg(value)
            .arg("NX")
            .arg("PX")
            .arg(ttl_ms)
            .query_async(&mut conn)
            .await?;
        Ok(reply.is_some())
    }

    async fn get(
        &self,
        code: &SessionCode,
        now_ms: u64,
    ) -> Result<Option<SessionRecord>, StoreError> {
        let mut conn = self.redis.clone();
        let value: Option<String> = conn.get(session_key(code)).await?;
        match value {
            Some(json) => {
                let record: SessionRecord = serde_json::from_str(&json)?;
                Ok(Some(record).filter(|record| record.is_live(now_ms)))
            }
            None => Ok(None),
        }
    }

    async fn list(&self, now_ms: u64) -> Result<Vec<SessionRecord>, StoreError> {
        let keys = self.scan_keys().await?;
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        let mut conn = self.redis.clone();
        let mut records = Vec::with_capacity(keys.len());
        for chunk in keys.chunks(100) {
            let values: Vec<Option<String>> =
                redis::cmd("MGET").arg(chunk).query_async(&mut conn).await?;
            for value in values.into_iter().flatten() {
                match serde_json::from_str::<SessionRecord>(&value) {
                    Ok(record) if record.is_live(now_ms) => records.push(record),
                    Ok(_) => {}
                    Err(err) => warn!(error = %err, "skipping undecodable session record"),
                }
            }
        }
        Ok(records)
    }

    async fn close_owned_by(&self, owner: &str, now_ms: u64) -> Result<usize, StoreError> {
        let mut conn = self.redis.clone();
        let mut closed = 0;
        for mut record in self.list(now_ms).await? {
            if record.owner != owner || record.status != SessionStatus::Online {
                continue;
            }
            record.status = SessionStatus::Closed;
            let value = serde_json::to_string(&record)?;
            // XX skips records that expired since the scan.
            let reply: Option<String> = redis::cmd("SET")
                .arg(session_key(&record.code))
                .arg(value)
                .arg("XX")
                .arg("KEEPTTL")
                .query_async(&mut conn)
                .await?;
            if reply.is_some() {
                closed += 1;
            }
        }
        Ok(closed)
    }

    async fn purge_expired(&self, _now_ms: u64) -> Result<usize, StoreError> {
        Ok(0)
    }
}

/// Mailboxes as redis lists under `connect:mailbox:{code}`.
#[derive(Clone)]
pub struct RedisMailboxStore {
    redis: ConnectionManager,
    append: Script,
}

#[async_trait]
impl MailboxStore for RedisMailboxStore {
    async fn append(
        &self,
        code: &SessionCode,
        message: MailboxMessage,
        expires_at_ms: u64,
        capacity: usize,
        now_ms: u64,
    ) -> Result<AppendOutcome, StoreError> {
        let ttl_ms = expires_at_ms.saturating_sub(now_ms).max(1);
        let value = serde_json::to_string(&message)?;
        let mut conn = self.redis.clone();
        let depth: i64 = self
            .append
            .key(mailbox_key(code))
            .arg(value)
            .arg(capacity)
            .arg(ttl_ms)
            .invoke_async(&mut conn)
            .await?;
        if depth < 0 {
            Ok(AppendOutcome::Full)
        } else {
            Ok(AppendOutcome::Queued {
                depth: depth as usize,
            })
        }
    }

    async fn drain(
        &self,
        code: &SessionCode,
        _now_ms: u64,
    ) -> Result<Vec<MailboxMessage>, StoreError> {
        let key = mailbox_key(code);
        let mut conn = self.redis.clone();
        let (values,): (Vec<String>,) = redis::pipe()
            .atomic()
            .cmd("LRANGE")
            .arg(&key)
            .arg(0)
            .arg(-1)
            .cmd("DEL")
            .arg(&key)
            .ignore()
            .query_async(&mut conn)
            .await?;
        let mut messages = Vec::with_capacity(values.len());
        for value in values {
            match serde_json::from_str::<MailboxMessage>(&value) {
                Ok(message) => messages.push(message),
                Err(err) => warn!(code = %code, error = %err, "dropping undecodable mailbox entry"),
            }
        }
        Ok(messages)
    }

    async fn purge_expired(&self, _now_ms: u64) -> Result<usize, StoreError> {
        Ok(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test_timeout::timeout]
    fn keys_are_namespaced_by_code() {
        let code = SessionCode::parse("012345").unwrap();
        assert_eq!(session_key(&code), "connect:session:012345");
        assert_eq!(mailbox_key(&code), "connect:mailbox:012345");
    }
}
