use tokio::time::Instant;
use tracing::debug;

use crate::error::NegotiationError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Initiator,
    Responder,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NegotiationState {
    Init,
    OfferSent,
    AnswerReceived,
    AnswerSent,
    Connected,
    Timeout,
    Failed,
}

impl NegotiationState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            NegotiationState::Connected | NegotiationState::Timeout | NegotiationState::Failed
        )
    }
}

/// One offer/answer exchange. Transitions are checked against the role's
/// state graph; terminal states never change.
#[derive(Debug, Clone)]
pub struct NegotiationAttempt {
    role: Role,
    state: NegotiationState,
    deadline: Instant,
}

impl NegotiationAttempt {
    pub fn new(role: Role, deadline: Instant) -> Self {
        Self {
            role,
            state: NegotiationState::Init,
            deadline,
        }
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn state(&self) -> NegotiationState {
        self.state
    }

    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    pub fn set_deadline(&mut self, deadline: Instant) {
        self.deadline = deadline;
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    pub fn transition(&mut self, to: NegotiationState) -> Result<(), NegotiationError> {
        use NegotiationState::*;

        let allowed = match (self.role, self.state, to) {
            (_, from, _) if from.is_terminal() => false,
            (_, _, Timeout | Failed) => true,
            (Role::Initiator, Init, OfferSent) => true,
            (Role::Initiator, OfferSent, AnswerReceived) => true,
            (Role::Initiator, AnswerReceived, Connected) => true,
            (Role::Responder, Init, AnswerSent) => true,
            (Role::Responder, AnswerSent, Connected) => true,
            _ => false,
        };
        if !allowed {
            return Err(NegotiationError::InvalidTransition {
                from: self.state,
                to,
            });
        }
        debug!(role = ?self.role, from = ?self.state, to = ?to, "negotiation transition");
        self.state = to;
        Ok(())
    }
}
