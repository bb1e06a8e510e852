//! Session registry: allocates six-digit codes, owns password-gating
//! metadata and answers "is this code live, and who owns it".
//!
//! Expiry is evaluated on every read against the injected [`Clock`]; the
//! background sweep in [`crate::cleanup`] only reclaims memory.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use connect_protocol::{PublicSessionView, SessionCode, SessionStatus, SessionView};
use metrics::counter;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::clock::{millis, Clock};
use crate::error::{RelayError, StoreError};
use crate::session::{generate_session_code, hash_password, verify_password};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionRecord {
    pub code: SessionCode,
    pub owner: String,
    pub name: String,
    pub requires_password: bool,
    #[serde(default)]
    pub password_hash: Option<String>,
    pub created_at: u64,
    pub expires_at: u64,
    pub status: SessionStatus,
}

impl SessionRecord {
    pub fn is_live(&self, now_ms: u64) -> bool {
        now_ms < self.expires_at
    }

    /// Owner-facing view with the password hash removed.
    pub fn view(&self) -> SessionView {
        SessionView {
            code: self.code.clone(),
            owner: self.owner.clone(),
            name: self.name.clone(),
            requires_password: self.requires_password,
            created_at: self.created_at,
            expires_at: self.expires_at,
            status: self.status,
        }
    }

    pub fn public_view(&self) -> PublicSessionView {
        PublicSessionView {
            code: self.code.clone(),
            name: self.name.clone(),
            owner: self.owner.clone(),
            status: self.status,
        }
    }
}

/// Keyed session storage. Every method is atomic per code; `list` and
/// `close_owned_by` scan all keys and are O(n).
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Stores `record` unless a live record already holds its code.
    /// Returns `false` on collision and never overwrites.
    async fn insert_if_vacant(&self, record: SessionRecord, now_ms: u64)
        -> Result<bool, StoreError>;

    async fn get(&self, code: &SessionCode, now_ms: u64)
        -> Result<Option<SessionRecord>, StoreError>;

    async fn list(&self, now_ms: u64) -> Result<Vec<SessionRecord>, StoreError>;

    /// Marks every live record of `owner` closed; returns how many changed.
    async fn close_owned_by(&self, owner: &str, now_ms: u64) -> Result<usize, StoreError>;

    /// Drops expired records. Backends with native expiry return 0.
    async fn purge_expired(&self, now_ms: u64) -> Result<usize, StoreError>;
}

#[derive(Debug, Clone, Default)]
pub struct NewSession {
    pub name: Option<String>,
    pub require_password: bool,
    pub password: Option<String>,
}

pub struct Registry {
    store: Arc<dyn SessionStore>,
    clock: Arc<dyn Clock>,
    ttl: Duration,
    max_attempts: usize,
}

impl Registry {
    pub fn new(
        store: Arc<dyn SessionStore>,
        clock: Arc<dyn Clock>,
        ttl: Duration,
        max_attempts: usize,
    ) -> Self {
        Self {
            store,
            clock,
            ttl,
            max_attempts: max_attempts.max(1),
        }
    }

    pub fn store(&self) -> Arc<dyn SessionStore> {
        self.store.clone()
    }

    pub async fn create(&self, owner: &str, request: NewSession) -> Result<SessionView, RelayError> {
        let owner = owner.trim();
        if owner.is_empty() {
            return Err(RelayError::Validation("owner identity is empty".into()));
        }

        let password_hash = if request.require_password {
            let password = request
                .password
                .filter(|password| !password.is_empty())
                .ok_or_else(|| {
                    RelayError::Validation("password required when requirePassword is set".into())
                })?;
            Some(hash_blocking(password).await?)
        } else {
            None
        };

        let name = request
            .name
            .map(|name| name.trim().to_string())
            .filter(|name| !name.is_empty())
            .unwrap_or_else(|| format!("{owner}-host"));

        for attempt in 1..=self.max_attempts {
            let now = self.clock.now_millis();
            let record = SessionRecord {
                code: generate_session_code(),
                owner: owner.to_string(),
                name: name.clone(),
                requires_password: password_hash.is_some(),
                password_hash: password_hash.clone(),
                created_at: now,
                expires_at: now + millis(self.ttl),
                status: SessionStatus::Online,
            };
            let code = record.code.clone();
            if self.store.insert_if_vacant(record.clone(), now).await? {
                counter!("connect_relay_sessions_created_total").increment(1);
                info!(
                    code = %code,
                    owner = %owner,
                    requires_password = record.requires_password,
                    "session created"
                );
                return Ok(record.view());
            }
            debug!(code = %code, attempt, "session code collision; regenerating");
        }

        warn!(owner = %owner, attempts = self.max_attempts, "no free session code found");
        Err(RelayError::ResourceExhausted(format!(
            "no free session code after {} attempts",
            self.max_attempts
        )))
    }

    pub async fn get(&self, code: &SessionCode) -> Result<Option<SessionRecord>, RelayError> {
        let now = self.clock.now_millis();
        let record = self.store.get(code, now).await?;
        Ok(record.filter(|record| record.is_live(now)))
    }

    pub async fn list(&self) -> Result<Vec<PublicSessionView>, RelayError> {
        let now = self.clock.now_millis();
        let mut records: Vec<SessionRecord> = self
            .store
            .list(now)
            .await?
            .into_iter()
            .filter(|record| record.is_live(now))
            .collect();
        records.sort_by_key(|record| record.created_at);
        Ok(records.iter().map(SessionRecord::public_view).collect())
    }

    pub async fn close(&self, owner: &str) -> Result<usize, RelayError> {
        let now = self.clock.now_millis();
        let closed = self.store.close_owned_by(owner, now).await?;
        info!(owner = %owner, closed, "sessions closed");
        Ok(closed)
    }

    /// True when the password matches, or when the session has none.
    /// Absent, expired and closed sessions never verify.
    pub async fn verify_password(
        &self,
        code: &SessionCode,
        password: &str,
    ) -> Result<bool, RelayError> {
        let Some(record) = self.get(code).await? else {
            return Ok(false);
        };
        if record.status == SessionStatus::Closed {
            return Ok(false);
        }
        match (record.requires_password, record.password_hash) {
            (false, _) => Ok(true),
            (true, Some(hash)) => verify_blocking(password.to_string(), hash).await,
            (true, None) => {
                warn!(code = %code, "session requires a password but has no hash");
                Ok(false)
            }
        }
    }
}

async fn hash_blocking(password: String) -> Result<String, RelayError> {
    tokio::task::spawn_blocking(move || hash_password(&password))
        .await
        .map_err(|err| RelayError::Internal(err.to_string()))?
        .map_err(RelayError::Internal)
}

async fn verify_blocking(password: String, hash: String) -> Result<bool, RelayError> {
    tokio::task::spawn_blocking(move || verify_password(&password, &hash))
        .await
        .map_err(|err| RelayError::Internal(err.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::storage::memory::MemorySessionStore;
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn registry(clock: &ManualClock) -> Registry {
        Registry::new(
            Arc::new(MemorySessionStore::new()),
            Arc::new(clock.clone()),
            Duration::from_secs(24 * 60 * 60),
            16,
        )
    }

    #[test_timeout::tokio_timeout_test]
    async fn create_defaults_name_and_redacts_hash() {
        let clock = ManualClock::default();
        let registry = registry(&clock);
        let view = registry
            .create(
                "alice",
                NewSession {
                    name: None,
                    require_password: true,
                    password: Some("secret".into()),
                },
            )
            .await
            .unwrap();

        assert_eq!(view.name, "alice-host");
        assert!(view.requires_password);
        assert_eq!(view.status, SessionStatus::Online);
        assert_eq!(view.expires_at - view.created_at, 24 * 60 * 60 * 1000);
        let rendered = serde_json::to_string(&view).unwrap();
        assert!(!rendered.contains("argon2"));
        assert!(!rendered.contains("secret"));
    }

    #[test_timeout::tokio_timeout_test]
    async fn password_gate() {
        let clock = ManualClock::default();
        let registry = registry(&clock);
        let view = registry
            .create(
                "alice",
                NewSession {
                    name: Some("desk".into()),
                    require_password: true,
                    password: Some("secret".into()),
                },
            )
            .await
            .unwrap();

        assert!(registry.verify_password(&view.code, "secret").await.unwrap());
        assert!(!registry.verify_password(&view.code, "wrong").await.unwrap());

        let stored = registry.get(&view.code).await.unwrap().unwrap();
        assert_ne!(stored.password_hash.as_deref(), Some("secret"));
    }

    #[test_timeout::tokio_timeout_test]
    async fn open_session_verifies_any_password_until_closed() {
        let clock = ManualClock::default();
        let registry = registry(&clock);
        let view = registry.create("bob", NewSession::default()).await.unwrap();

        assert!(registry.verify_password(&view.code, "").await.unwrap());
        assert!(registry.verify_password(&view.code, "anything").await.unwrap());

        assert_eq!(registry.close("bob").await.unwrap(), 1);
        assert!(!registry.verify_password(&view.code, "").await.unwrap());
        let unknown = SessionCode::parse("000001").unwrap();
        assert!(!registry.verify_password(&unknown, "").await.unwrap());
    }

    #[test_timeout::tokio_timeout_test]
    async fn require_password_without_password_is_rejected() {
        let clock = ManualClock::default();
        let registry = registry(&clock);
        let err = registry
            .create(
                "alice",
                NewSession {
                    name: None,
                    require_password: true,
                    password: Some(String::new()),
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, RelayError::Validation(_)));
        assert!(registry.list().await.unwrap().is_empty());
    }

    #[test_timeout::tokio_timeout_test]
    async fn expired_sessions_are_absent() {
        let clock = ManualClock::default();
        let registry = registry(&clock);
        let view = registry.create("carol", NewSession::default()).await.unwrap();

        clock.advance(Duration::from_secs(24 * 60 * 60 - 1));
        assert!(registry.get(&view.code).await.unwrap().is_some());
        assert_eq!(registry.list().await.unwrap().len(), 1);

        clock.advance(Duration::from_secs(1));
        assert!(registry.get(&view.code).await.unwrap().is_none());
        assert!(registry.list().await.unwrap().is_empty());
    }

    #[test_timeout::tokio_timeout_test]
    async fn close_only_touches_callers_sessions() {
        let clock = ManualClock::default();
        let registry = registry(&clock);
        let a1 = registry.create("alice", NewSession::default()).await.unwrap();
        let a2 = registry.create("alice", NewSession::default()).await.unwrap();
        let b1 = registry.create("bob", NewSession::default()).await.unwrap();

        assert_eq!(registry.close("alice").await.unwrap(), 2);
        for code in [&a1.code, &a2.code] {
            let record = registry.get(code).await.unwrap().unwrap();
            assert_eq!(record.status, SessionStatus::Closed);
        }
        let bob = registry.get(&b1.code).await.unwrap().unwrap();
        assert_eq!(bob.status, SessionStatus::Online);
        assert_eq!(registry.close("alice").await.unwrap(), 0);
    }

    #[test_timeout::tokio_timeout_test]
    async fn concurrent_creates_yield_distinct_codes() {
        let clock = ManualClock::default();
        let registry = Arc::new(registry(&clock));
        let mut tasks = Vec::new();
        for i in 0..200 {
            let registry = registry.clone();
            tasks.push(tokio::spawn(async move {
                registry
                    .create(&format!("owner-{i}"), NewSession::default())
                    .await
                    .unwrap()
                    .code
            }));
        }
        let mut codes = HashSet::new();
        for task in tasks {
            assert!(codes.insert(task.await.unwrap()));
        }
        assert_eq!(codes.len(), 200);
        assert_eq!(registry.list().await.unwrap().len(), 200);
    }

    struct AlwaysTaken {
        attempts: AtomicUsize,
    }

    #[async_trait]
    impl SessionStore for AlwaysTaken {
        async fn insert_if_vacant(&self, _: SessionRecord, _: u64) -> Result<bool, StoreError> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            Ok(false)
        }

        async fn get(&self, _: &SessionCode, _: u64) -> Result<Option<SessionRecord>, StoreError> {
            Ok(None)
        }

        async fn list(&self, _: u64) -> Result<Vec<SessionRecord>, StoreError> {
            Ok(Vec::new())
        }

        async fn close_owned_by(&self, _: &str, _: u64) -> Result<usize, StoreError> {
            Ok(0)
        }

        async fn purge_expired(&self, _: u64) -> Result<usize, StoreError> {
            Ok(0)
        }
    }

    #[test_timeout::tokio_timeout_test]
    async fn persistent_collisions_exhaust_retries() {
        let store = Arc::new(AlwaysTaken {
            attempts: AtomicUsize::new(0),
        });
        let registry = Registry::new(
            store.clone(),
            Arc::new(ManualClock::default()),
            Duration::from_secs(60),
            5,
        );
        let err = registry
            .create("dave", NewSession::default())
            .await
            .unwrap_err();
        assert!(matches!(err, RelayError::ResourceExhausted(_)));
        assert_eq!(store.attempts.load(Ordering::SeqCst), 5);
    }
}
