//! Web-Connect signaling relay.
//!
//! Two peers that cannot reach each other yet rendezvous on six-digit
//! session codes: the registry hands out codes to authenticated owners, and
//! every code has a drain-on-read mailbox that carries offer, answer and ICE
//! messages between them.

pub mod cleanup;
pub mod cli;
pub mod clock;
pub mod config;
pub mod error;
pub mod handlers;
pub mod identity;
pub mod mailbox;
pub mod registry;
pub mod session;
pub mod state;
pub mod storage;
pub mod telemetry;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{Config, StorageBackend};
pub use error::{RelayError, StoreError};
pub use handlers::build_router;
pub use identity::{Hs256Verifier, Identity, IdentityError, IdentityVerifier};
pub use mailbox::{AppendOutcome, Mailbox, MailboxStore};
pub use registry::{NewSession, Registry, SessionRecord, SessionStore};
pub use state::AppState;
pub use storage::Stores;
