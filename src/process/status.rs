use std::fmt;

use nix::sys::{signal::Signal, wait::WaitStatus};

/// How a stage or builtin finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitStatus {
    Exited(i32),
    Signaled(Signal),
}

impl ExitStatus {
    pub fn new_success() -> Self {
        Self::Exited(0)
    }

    pub fn new_failure() -> Self {
        Self::Exited(1)
    }

    /// Converts a terminal wait status. Stops, continues and ptrace events
    /// are not terminations and yield `None`.
    pub fn from_wait(status: WaitStatus) -> Option<Self> {
        match status {
            WaitStatus::Exited(_, code) => Some(Self::Exited(code)),
            WaitStatus::Signaled(_, signal, _) => Some(Self::Signaled(signal)),
            _ => None,
        }
    }

    /// Shell-style status code: signals map to `128 + signo`.
    pub fn code(&self) -> i32 {
        match self {
            Self::Exited(code) => *code,
            Self::Signaled(signal) => 128 + *signal as i32,
        }
    }

    pub fn success(&self) -> bool {
        matches!(self, Self::Exited(0))
    }
}

impl Default for ExitStatus {
    fn default() -> Self {
        Self::new_success()
    }
}

impl fmt::Display for ExitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Exited(0) => write!(f, "Done"),
            Self::Exited(code) => write!(f, "Exit {code}"),
            Self::Signaled(signal) => write!(f, "Killed ({signal})"),
        }
    }
}
