//! Backing stores for the registry and the mailboxes.
//!
//! `memory` keeps everything in-process and suits a single relay instance.
//! `redis_store` shares state across instances and relies on native key
//! expiry.

pub mod memory;
pub mod redis_store;

use std::sync::Arc;

use anyhow::Context;
use tracing::info;

use crate::config::{Config, StorageBackend};
use crate::mailbox::MailboxStore;
use crate::registry::SessionStore;

#[derive(Clone)]
pub struct Stores {
    pub sessions: Arc<dyn SessionStore>,
    pub mailboxes: Arc<dyn MailboxStore>,
}

impl Stores {
    pub fn in_memory() -> Self {
        Self {
            sessions: Arc::new(memory::MemorySessionStore::new()),
            mailboxes: Arc::new(memory::MemoryMailboxStore::new()),
        }
    }
}

/// Opens the configured backend. An unreachable redis is a startup error;
/// there is no fallback to memory.
pub async fn open(config: &Config) -> anyhow::Result<Stores> {
    match config.backend {
        StorageBackend::Memory => {
            info!("using in-memory storage");
            Ok(Stores::in_memory())
        }
        StorageBackend::Redis => {
            let (sessions, mailboxes) = redis_store::connect(&config.redis_url)
                .await
                .with_context(|| format!("failed to connect to redis at {}", config.redis_url))?;
            info!(redis_url = %config.redis_url, "using redis storage");
            Ok(Stores {
                sessions: Arc::new(sessions),
                mailboxes: Arc::new(mailboxes),
            })
        }
    }
}
