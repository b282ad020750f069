use std::os::fd::{FromRawFd, OwnedFd};

use nix::{
    fcntl::OFlag,
    unistd::{self, Pid},
};

pub mod argv;
pub mod reaper;
pub mod status;

/// A spawned stage: its process id and its position in the chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessHandle {
    pub pid: Pid,
    pub stage: usize,
}

/// Both ends of one pipe between adjacent stages. Each end is closed when
/// dropped.
#[derive(Debug)]
pub struct Pipe {
    pub read: OwnedFd,
    pub write: OwnedFd,
}

impl Pipe {
    /// Opens a pipe whose ends are close-on-exec. A child that needs an end
    /// gets it through `dup2`, which clears the flag on the copy.
    pub fn new() -> nix::Result<Self> {
        let (read, write) = unistd::pipe2(OFlag::O_CLOEXEC)?;

        // SAFETY: both descriptors were just created and nothing else owns them
        let (read, write) =
            unsafe { (OwnedFd::from_raw_fd(read), OwnedFd::from_raw_fd(write)) };

        Ok(Self { read, write })
    }
}
