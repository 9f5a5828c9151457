//! Process exit codes shared by the operator-facing commands.
//!
//! The agent dispatcher exits with its own table, [`crate::rpc::RpcCode`].

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitCode {
    Ok = 0,
    Error = 1,
    InvalidUsage = 2,
    Timeout = 41,
    Interrupted = 42,
    PlanFailed = 44,
}

impl ExitCode {
    pub fn code(self) -> i32 {
        self as i32
    }
}

impl std::fmt::Display for ExitCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.code())
    }
}
