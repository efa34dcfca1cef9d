//! Per-request lifecycle.

use std::fmt;

use thiserror::Error;

/// States a request moves through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestState {
    Received,
    Authenticating,
    Authorized,
    /// No authenticated principal: missing, invalid or unverifiable credentials.
    Denied,
    Dispatching,
    Completed,
    Failed,
}

impl RequestState {
    /// Whether `next` may follow `self`.
    pub fn can_transition_to(self, next: RequestState) -> bool {
        use RequestState::*;
        matches!(
            (self, next),
            (Received, Authenticating | Denied | Failed)
                | (Authenticating, Authorized | Denied | Failed)
                | (Authorized, Dispatching | Failed)
                | (Denied, Dispatching | Failed)
                | (Dispatching, Completed | Failed)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, RequestState::Completed | RequestState::Failed)
    }
}

impl fmt::Display for RequestState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            RequestState::Received => "received",
            RequestState::Authenticating => "authenticating",
            RequestState::Authorized => "authorized",
            RequestState::Denied => "denied",
            RequestState::Dispatching => "dispatching",
            RequestState::Completed => "completed",
            RequestState::Failed => "failed",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("invalid request state transition {from} -> {to}")]
pub struct InvalidTransition {
    pub from: RequestState,
    pub to: RequestState,
}

/// The states a request has visited, starting at `Received`.
#[derive(Debug, Clone)]
pub struct Lifecycle {
    history: Vec<RequestState>,
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self {
            history: vec![RequestState::Received],
        }
    }
}

impl Lifecycle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> RequestState {
        self.history
            .last()
            .copied()
            .unwrap_or(RequestState::Received)
    }

    pub fn advance(&mut self, next: RequestState) -> Result<(), InvalidTransition> {
        let from = self.state();
        if !from.can_transition_to(next) {
            return Err(InvalidTransition { from, to: next });
        }
        self.history.push(next);
        Ok(())
    }

    pub fn history(&self) -> &[RequestState] {
        &self.history
    }

    pub fn is_finished(&self) -> bool {
        self.state().is_terminal()
    }
}
