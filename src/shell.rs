//! Local command execution with captured output.
//!
//! Commands are argv vectors; `/bin/sh -c` is only reachable through
//! [`CommandRunner::run_shell`].

use std::io::{self, Write};
use std::process::{Command, Stdio};

use tracing::debug;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub status: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.status == 0
    }
}

pub trait CommandRunner {
    /// Run `argv` with optional extra environment and data fed on stdin.
    fn execute(
        &self,
        argv: &[&str],
        env: &[(&str, &str)],
        stdin: Option<&str>,
    ) -> io::Result<CommandOutput>;

    fn run(&self, argv: &[&str]) -> io::Result<CommandOutput> {
        self.execute(argv, &[], None)
    }

    fn run_shell(&self, script: &str) -> io::Result<CommandOutput> {
        self.execute(&["/bin/sh", "-c", script], &[], None)
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct Shell;

impl CommandRunner for Shell {
    fn execute(
        &self,
        argv: &[&str],
        env: &[(&str, &str)],
        stdin: Option<&str>,
    ) -> io::Result<CommandOutput> {
        let (program, args) = argv
            .split_first()
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "empty command"))?;

        debug!(command = %argv.join(" "), "executing");

        let mut command = Command::new(program);
        command
            .args(args)
            .envs(env.iter().copied())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .stdin(if stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            });

        let mut child = command.spawn()?;
        if let (Some(input), Some(mut pipe)) = (stdin, child.stdin.take()) {
            pipe.write_all(input.as_bytes())?;
        }
        let output = child.wait_with_output()?;

        Ok(CommandOutput {
            status: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).trim_end().to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).trim_end().to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn captures_and_trims_output() {
        let out = Shell.run(&["/bin/echo", "hello  "]).unwrap();
        assert!(out.success());
        assert_eq!(out.stdout, "hello");
        assert_eq!(out.stderr, "");
    }

    #[test]
    fn reports_exit_status() {
        let out = Shell.run_shell("echo oops >&2; exit 3").unwrap();
        assert_eq!(out.status, 3);
        assert_eq!(out.stderr, "oops");
    }

    #[test]
    fn feeds_stdin() {
        let out = Shell.execute(&["/bin/cat"], &[], Some("secret\n")).unwrap();
        assert_eq!(out.stdout, "secret");
    }

    #[test]
    fn empty_argv_is_rejected() {
        let err = Shell.run(&[]).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
    }
}
