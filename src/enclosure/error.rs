use std::io;

use thiserror::Error;

use crate::wait::WaitError;

#[derive(Debug, Error)]
pub enum OaError {
    /// The OA answered on stderr or exited non-zero.
    #[error("OA {host} rejected '{command}': {reason}")]
    Command {
        host: String,
        command: String,
        reason: String,
    },

    #[error("no active OA found (tried {primary} and {secondary})")]
    NoActiveOa { primary: String, secondary: String },

    #[error("unexpected output from '{command}': {reason}")]
    Parse { command: String, reason: String },

    #[error("cannot reach OA {host}: {source}")]
    Io {
        host: String,
        #[source]
        source: io::Error,
    },

    #[error(transparent)]
    Wait(#[from] WaitError),
}

impl OaError {
    pub fn parse(command: impl ToString, reason: impl Into<String>) -> Self {
        OaError::Parse {
            command: command.to_string(),
            reason: reason.into(),
        }
    }
}
