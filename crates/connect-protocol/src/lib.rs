//! Wire types shared by the `connect-relay` server and the participants that
//! negotiate through it.
//!
//! Both sides speak JSON with camelCase field names. Keeping the types here
//! means the relay and the negotiator agree on one schema for session codes,
//! mailbox messages and the offer/answer/ICE payload envelopes.

pub mod api;
pub mod code;
pub mod message;

pub use api::{
    ApiErrorBody, CloseSessionsResponse, CreateSessionRequest, CreateSessionResponse,
    HealthResponse, ListSessionsResponse, PublicSessionView, SendSignalRequest,
    SendSignalResponse, SessionStatus, SessionView, VerifyPasswordRequest,
    VerifyPasswordResponse,
};
pub use code::{CodeError, SessionCode};
pub use message::{AnswerPayload, IcePayload, MailboxMessage, OfferPayload, SignalKind};
