use std::{io, path::PathBuf};

use enum_dispatch::enum_dispatch;
use strum::{EnumIter, IntoEnumIterator};
use thiserror::Error;

use crate::{process::status::ExitStatus, state::State};

pub mod cd;
pub mod env;
pub mod exit;
pub mod history;
pub mod jobs;
pub mod pwd;

#[derive(Debug, Error)]
pub enum BuiltinError {
    #[error("{0}")]
    Io(#[from] io::Error),
    #[error("usage: {0}")]
    Usage(&'static str),
    #[error("cd: {}: {source}", path.display())]
    Cd { path: PathBuf, source: io::Error },
    #[error("cd: HOME not set")]
    NoHome,
    #[error("exit: {0}: numeric argument required")]
    ExitCode(String),
    #[error("{command}: {name:?}: not a valid variable name")]
    VariableName { command: &'static str, name: String },
    #[error("{command}: value contains a NUL byte")]
    VariableValue { command: &'static str },
}

/// Commands that run inside the shell process instead of being spawned.
#[enum_dispatch(BuiltinCommands)]
pub trait BuiltinCommand {
    fn name(&self) -> &'static str;
    fn execute(
        &self,
        args: &[String],
        state: &mut State,
        out: &mut dyn io::Write,
    ) -> Result<ExitStatus, BuiltinError>;
}

#[enum_dispatch]
#[derive(Debug, EnumIter)]
pub enum BuiltinCommands {
    Cd(cd::Cd),
    Pwd(pwd::Pwd),
    Exit(exit::Exit),
    Env(env::Env),
    SetEnv(env::SetEnv),
    UnsetEnv(env::UnsetEnv),
    History(history::History),
    Jobs(jobs::Jobs),
}

impl BuiltinCommands {
    pub fn from_name(name: &str) -> Option<Self> {
        Self::iter().find(|cmd| cmd.name() == name)
    }

    pub fn is_builtin(name: &str) -> bool {
        Self::from_name(name).is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_by_name() {
        for name in ["cd", "pwd", "exit", "env", "setenv", "unsetenv", "history", "jobs"] {
            assert_eq!(BuiltinCommands::from_name(name).unwrap().name(), name);
        }
        assert!(!BuiltinCommands::is_builtin("ls"));
        assert!(!BuiltinCommands::is_builtin("CD"));
    }
}
