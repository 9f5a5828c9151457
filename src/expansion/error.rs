use std::io;
use std::path::PathBuf;

use thiserror::Error;

use super::progress::Stage;
use crate::enclosure::OaError;
use crate::exit::ExitCode;
use crate::litp::LitpError;
use crate::rpc::caller::RpcError;
use crate::wait::WaitError;

#[derive(Debug, Error)]
pub enum ExpansionError {
    /// The SED, the model or the enclosures disagree with what the move
    /// needs. Raised before any side effect of the failing step.
    #[error("{0}")]
    Validation(String),

    #[error(transparent)]
    Litp(#[from] LitpError),

    #[error(transparent)]
    Oa(#[from] OaError),

    #[error(transparent)]
    Rpc(#[from] RpcError),

    #[error(transparent)]
    Wait(#[from] WaitError),

    #[error("{node} is not healthy: {reason}")]
    Unhealthy { node: String, reason: String },

    #[error("{command} failed: {reason}")]
    Host { command: String, reason: String },

    #[error("cannot access {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("cannot encode {what}: {source}")]
    Encode {
        what: &'static str,
        #[source]
        source: serde_json::Error,
    },

    #[error("stage {stage} failed: {source}")]
    Stage {
        stage: Stage,
        #[source]
        source: Box<ExpansionError>,
    },
}

impl ExpansionError {
    pub fn validation(reason: impl Into<String>) -> Self {
        ExpansionError::Validation(reason.into())
    }

    pub fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        ExpansionError::Io {
            path: path.into(),
            source,
        }
    }

    pub fn in_stage(self, stage: Stage) -> Self {
        match self {
            ExpansionError::Stage { .. } => self,
            other => ExpansionError::Stage {
                stage,
                source: Box::new(other),
            },
        }
    }

    pub fn stage(&self) -> Option<Stage> {
        match self {
            ExpansionError::Stage { stage, .. } => Some(*stage),
            _ => None,
        }
    }

    fn wait_error(&self) -> Option<&WaitError> {
        match self {
            ExpansionError::Wait(e) | ExpansionError::Oa(OaError::Wait(e)) => Some(e),
            _ => None,
        }
    }

    pub fn exit_code(&self) -> ExitCode {
        if let ExpansionError::Stage { source, .. } = self {
            return source.exit_code();
        }
        match self.wait_error() {
            Some(WaitError::Timeout { .. }) => return ExitCode::Timeout,
            Some(WaitError::Interrupted { .. }) => return ExitCode::Interrupted,
            None => {}
        }
        match self {
            ExpansionError::Litp(LitpError::Interrupted { .. }) => ExitCode::Interrupted,
            ExpansionError::Litp(LitpError::PlanTimeout { .. }) => ExitCode::Timeout,
            ExpansionError::Litp(LitpError::PlanFailed { .. }) => ExitCode::PlanFailed,
            _ => ExitCode::Error,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::litp::PlanState;

    #[test]
    fn stage_wrapping_keeps_the_inner_exit_code() {
        let timeout = ExpansionError::Oa(OaError::Wait(WaitError::Timeout {
            what: "serial".into(),
            seconds: 600,
            last: "[Unknown]".into(),
        }))
        .in_stage(Stage::PowerOn);

        assert_eq!(timeout.stage(), Some(Stage::PowerOn));
        assert_eq!(timeout.exit_code(), ExitCode::Timeout);
        assert_eq!(
            timeout.to_string(),
            "stage power-on failed: timed out after 600s waiting for serial (last seen: [Unknown])"
        );
    }

    #[test]
    fn plan_failure_and_interrupt_codes() {
        let failed = ExpansionError::Litp(LitpError::PlanFailed {
            plan: "plan".into(),
            state: PlanState::Failed,
        });
        assert_eq!(failed.exit_code(), ExitCode::PlanFailed);

        let interrupted = ExpansionError::Wait(WaitError::Interrupted { what: "ping".into() });
        assert_eq!(interrupted.exit_code(), ExitCode::Interrupted);

        assert_eq!(ExpansionError::validation("bad").exit_code(), ExitCode::Error);
    }

    #[test]
    fn wrapping_twice_keeps_the_first_stage() {
        let err = ExpansionError::validation("x")
            .in_stage(Stage::Drain)
            .in_stage(Stage::Finalize);
        assert_eq!(err.stage(), Some(Stage::Drain));
    }
}
