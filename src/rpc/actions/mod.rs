//! Action tables for the agents this binary serves.

mod enminst;
mod filemanager;
mod snapshots;

use super::agent::Actions;

pub const AGENTS: [&str; 3] = ["enminst", "enminst_snapshots", "filemanager"];

/// Look up an agent's action table by name.
pub fn agent(name: &str) -> Option<Actions> {
    match name {
        "enminst" => Some(enminst::actions()),
        "enminst_snapshots" => Some(snapshots::actions()),
        "filemanager" => Some(filemanager::actions()),
        _ => None,
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::cell::RefCell;
    use std::collections::VecDeque;
    use std::io;
    use std::rc::Rc;

    use crate::shell::{CommandOutput, CommandRunner};

    /// Records every command and answers from a script.
    #[derive(Default)]
    pub struct ScriptedRunner {
        pub calls: RefCell<Vec<String>>,
        pub stdin: RefCell<Vec<String>>,
        pub replies: RefCell<VecDeque<CommandOutput>>,
    }

    impl ScriptedRunner {
        pub fn with(replies: Vec<CommandOutput>) -> Self {
            Self {
                replies: RefCell::new(replies.into()),
                ..Self::default()
            }
        }
    }

    pub fn out(status: i32, stdout: &str, stderr: &str) -> CommandOutput {
        CommandOutput {
            status,
            stdout: stdout.to_string(),
            stderr: stderr.to_string(),
        }
    }

    impl CommandRunner for ScriptedRunner {
        fn execute(
            &self,
            argv: &[&str],
            _env: &[(&str, &str)],
            stdin: Option<&str>,
        ) -> io::Result<CommandOutput> {
            self.calls.borrow_mut().push(argv.join(" "));
            if let Some(input) = stdin {
                self.stdin.borrow_mut().push(input.to_string());
            }
            Ok(self
                .replies
                .borrow_mut()
                .pop_front()
                .unwrap_or_else(|| out(0, "", "")))
        }
    }

    /// Lets a test keep a handle on a runner it boxed into a transport.
    impl CommandRunner for Rc<ScriptedRunner> {
        fn execute(
            &self,
            argv: &[&str],
            env: &[(&str, &str)],
            stdin: Option<&str>,
        ) -> io::Result<CommandOutput> {
            self.as_ref().execute(argv, env, stdin)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_listed_agent_resolves() {
        for name in AGENTS {
            let actions = agent(name).unwrap();
            assert_eq!(actions.agent(), name);
        }
        assert!(agent("bogus").is_none());
    }
}
