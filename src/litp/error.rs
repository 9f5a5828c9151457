use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::item::PlanState;

/// One entry of a LITP error body: `{"messages": [{"type": ..., "message": ...}]}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LitpMessage {
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub message: String,
}

impl std::fmt::Display for LitpMessage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.kind.is_empty() {
            write!(f, "{}", self.message)
        } else {
            write!(f, "{}: {}", self.kind, self.message)
        }
    }
}

/// Coarse classification used by [`super::RetryPolicy`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Transport,
    NotFound,
    Model,
    Decode,
    Plan,
}

#[derive(Debug, Error)]
pub enum LitpError {
    #[error("cannot reach LITP for {path}: {reason}")]
    Transport { path: String, reason: String },

    #[error("{path} not found in the LITP model")]
    NotFound { path: String },

    #[error("LITP rejected {method} {path} (HTTP {status}): {}", join(.messages))]
    Model {
        method: String,
        path: String,
        status: u16,
        messages: Vec<LitpMessage>,
    },

    #[error("unexpected LITP response for {path}: {reason}")]
    Decode { path: String, reason: String },

    #[error("a LITP plan is already {state}, refusing to start {plan}")]
    PlanBusy { plan: String, state: PlanState },

    #[error("LITP plan {plan} ended in state {state}")]
    PlanFailed { plan: String, state: PlanState },

    #[error("LITP plan {plan} still {state} after {attempts} polls")]
    PlanTimeout {
        plan: String,
        state: PlanState,
        attempts: u32,
    },

    #[error("interrupted while LITP plan {plan} was running")]
    Interrupted { plan: String },
}

impl LitpError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            LitpError::Transport { .. } => ErrorKind::Transport,
            LitpError::NotFound { .. } => ErrorKind::NotFound,
            LitpError::Model { .. } => ErrorKind::Model,
            LitpError::Decode { .. } => ErrorKind::Decode,
            LitpError::PlanBusy { .. }
            | LitpError::PlanFailed { .. }
            | LitpError::PlanTimeout { .. }
            | LitpError::Interrupted { .. } => ErrorKind::Plan,
        }
    }

    pub fn messages(&self) -> &[LitpMessage] {
        match self {
            LitpError::Model { messages, .. } => messages,
            _ => &[],
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, LitpError::NotFound { .. })
    }

    /// True if any message has the given `type`, or mentions it in its text.
    pub fn has_message_type(&self, kind: &str) -> bool {
        self.messages()
            .iter()
            .any(|m| m.kind == kind || m.message.contains(kind))
    }
}

fn join(messages: &[LitpMessage]) -> String {
    if messages.is_empty() {
        return "no details".to_string();
    }
    messages
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}
