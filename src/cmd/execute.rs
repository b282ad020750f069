use std::{
    ffi::{CString, NulError},
    os::{
        fd::{AsRawFd, OwnedFd, RawFd},
        unix::ffi::OsStrExt,
    },
    path::Path,
};

use nix::{
    errno::Errno,
    fcntl::{self, OFlag},
    libc,
    sys::{
        signal::{self, SigHandler, Signal},
        stat::Mode,
    },
    unistd::{self, ForkResult, Pid},
};
use thiserror::Error;

use super::chain::{CommandChain, RedirectMode};
use crate::{
    process::{argv::Argv, Pipe, ProcessHandle},
    NAME,
};

/// Status of a stage whose redirection target could not be opened.
pub const EXIT_REDIRECT_FAILED: i32 = 1;
/// Status of a stage whose program exists but could not be executed.
pub const EXIT_NOT_EXECUTABLE: i32 = 126;
/// Status of a stage whose program could not be found.
pub const EXIT_NOT_FOUND: i32 = 127;

#[derive(Debug, Error)]
pub enum SpawnError {
    #[error("stage {stage}: failed to create pipe: {source}")]
    Pipe { stage: usize, source: Errno },
    #[error("stage {stage}: failed to fork: {source}")]
    Fork { stage: usize, source: Errno },
    #[error("stage {stage}: argument contains a NUL byte")]
    InvalidArgument { stage: usize, source: NulError },
}

/// A spawn that stopped part way. The stages in `spawned` are running and
/// still have to be collected.
#[derive(Debug, Error)]
#[error("{source}")]
pub struct PartialSpawn {
    pub spawned: Vec<ProcessHandle>,
    pub source: SpawnError,
}

/// A redirection target, opened by the child itself.
struct Redirect {
    path: CString,
    flags: OFlag,
    failed: Vec<u8>,
}

impl Redirect {
    fn new(path: &Path, flags: OFlag) -> Result<Self, NulError> {
        Ok(Self {
            path: CString::new(path.as_os_str().as_bytes())?,
            flags,
            failed: format!("{NAME}: {}: ", path.display()).into_bytes(),
        })
    }

    fn apply(&self, target: RawFd) {
        let mode = Mode::S_IRUSR | Mode::S_IWUSR | Mode::S_IRGRP | Mode::S_IROTH;

        match fcntl::open(self.path.as_c_str(), self.flags, mode) {
            Ok(fd) => {
                let _ = unistd::dup2(fd, target);
                if fd != target {
                    let _ = unistd::close(fd);
                }
            }
            Err(errno) => die(
                &[&self.failed, errno.desc().as_bytes(), b"\n"],
                EXIT_REDIRECT_FAILED,
            ),
        }
    }
}

/// Everything one child needs, prepared before `fork` so the child never
/// allocates.
struct StageImage {
    argv: Argv,
    input: Option<Redirect>,
    output: Option<Redirect>,
    not_found: Vec<u8>,
    exec_failed: Vec<u8>,
}

impl StageImage {
    fn new(chain: &CommandChain, idx: usize) -> Result<Self, NulError> {
        let stage = &chain.stages()[idx];
        let last = idx + 1 == chain.stages().len();

        let input = match chain.input() {
            Some(path) if idx == 0 => Some(Redirect::new(path, OFlag::O_RDONLY)?),
            _ => None,
        };

        let output = match chain.output() {
            Some(redirect) if last => {
                let mode = match redirect.mode {
                    RedirectMode::Truncate => OFlag::O_TRUNC,
                    RedirectMode::Append => OFlag::O_APPEND,
                };
                Some(Redirect::new(
                    &redirect.path,
                    OFlag::O_WRONLY | OFlag::O_CREAT | mode,
                )?)
            }
            _ => None,
        };

        Ok(Self {
            argv: Argv::new(stage)?,
            input,
            output,
            not_found: format!("{NAME}: {}: command not found\n", stage.program()).into_bytes(),
            exec_failed: format!("{NAME}: {}: ", stage.program()).into_bytes(),
        })
    }
}

/// Starts one process per stage, connecting neighbours with pipes.
///
/// The pipe feeding stage `i + 1` is created right before stage `i` is
/// forked. Between forks the parent keeps only that pipe's read end; every
/// other descriptor is closed as soon as the children that need it exist.
///
/// On failure the stages spawned so far are left running and returned in
/// the error so the caller can still collect them.
pub fn spawn(chain: &CommandChain) -> Result<Vec<ProcessHandle>, PartialSpawn> {
    let count = chain.stages().len();
    let mut spawned = Vec::with_capacity(count);
    let mut upstream: Option<OwnedFd> = None;

    for idx in 0..count {
        let last = idx + 1 == count;

        let result = StageImage::new(chain, idx)
            .map_err(|source| SpawnError::InvalidArgument { stage: idx, source })
            .and_then(|image| {
                let pipe = if last {
                    None
                } else {
                    Some(Pipe::new().map_err(|source| SpawnError::Pipe { stage: idx, source })?)
                };

                let pid = fork_stage(&image, upstream.as_ref(), pipe.as_ref())
                    .map_err(|source| SpawnError::Fork { stage: idx, source })?;

                trace!(%pid, stage = idx, program = ?image.argv.program(), "spawned stage");

                Ok((pid, pipe))
            });

        match result {
            Ok((pid, pipe)) => {
                spawned.push(ProcessHandle { pid, stage: idx });
                // drops the previous read end and this pipe's write end
                upstream = pipe.map(|Pipe { read, .. }| read);
            }
            Err(source) => {
                warn!(%source, spawned = spawned.len(), "aborting pipeline spawn");
                return Err(PartialSpawn { spawned, source });
            }
        }
    }

    Ok(spawned)
}

fn fork_stage(
    image: &StageImage,
    upstream: Option<&OwnedFd>,
    pipe: Option<&Pipe>,
) -> nix::Result<Pid> {
    // SAFETY: the child only makes async-signal-safe calls on data prepared
    // before the fork, and it always ends in exec or _exit.
    match unsafe { unistd::fork() }? {
        ForkResult::Parent { child } => Ok(child),
        ForkResult::Child => exec_child(image, upstream, pipe),
    }
}

fn exec_child(image: &StageImage, upstream: Option<&OwnedFd>, pipe: Option<&Pipe>) -> ! {
    // SAFETY: resetting a disposition is async-signal-safe. The parent
    // ignores SIGPIPE and ignored signals survive exec.
    unsafe {
        let _ = signal::signal(Signal::SIGPIPE, SigHandler::SigDfl);
    }

    if let Some(fd) = upstream {
        let _ = unistd::dup2(fd.as_raw_fd(), libc::STDIN_FILENO);
    }
    if let Some(pipe) = pipe {
        let _ = unistd::dup2(pipe.write.as_raw_fd(), libc::STDOUT_FILENO);
    }

    let inherited = upstream
        .into_iter()
        .chain(pipe.into_iter().flat_map(|p| [&p.read, &p.write]));
    for fd in inherited {
        if fd.as_raw_fd() > libc::STDERR_FILENO {
            let _ = unistd::close(fd.as_raw_fd());
        }
    }

    if let Some(redirect) = &image.input {
        redirect.apply(libc::STDIN_FILENO);
    }
    if let Some(redirect) = &image.output {
        redirect.apply(libc::STDOUT_FILENO);
    }

    match image.argv.exec() {
        Errno::ENOENT | Errno::ENOTDIR => die(&[&image.not_found], EXIT_NOT_FOUND),
        errno => die(
            &[&image.exec_failed, errno.desc().as_bytes(), b"\n"],
            EXIT_NOT_EXECUTABLE,
        ),
    }
}

/// Writes `message` to stderr and terminates the child without running any
/// of the parent's exit handlers.
fn die(message: &[&[u8]], code: i32) -> ! {
    for part in message {
        let _ = unistd::write(libc::STDERR_FILENO, part);
    }

    // SAFETY: `_exit` is async-signal-safe and never returns
    unsafe { libc::_exit(code) }
}

#[cfg(test)]
mod tests {
    use std::{fs, os::unix::fs::PermissionsExt};

    use nix::sys::wait::waitpid;
    use serial_test::serial;
    use tempfile::TempDir;

    use super::*;
    use crate::process::status::ExitStatus;

    fn chain(words: &[&str]) -> CommandChain {
        CommandChain::build(words.iter().map(|w| w.to_string()).collect()).unwrap()
    }

    fn run(words: &[&str]) -> Vec<ExitStatus> {
        let handles = spawn(&chain(words)).unwrap();
        assert_eq!(handles.len(), chain(words).stages().len());
        handles
            .iter()
            .map(|h| ExitStatus::from_wait(waitpid(h.pid, None).unwrap()).unwrap())
            .collect()
    }

    fn path(dir: &TempDir, name: &str) -> String {
        dir.path().join(name).display().to_string()
    }

    #[cfg(target_os = "linux")]
    fn open_pipes() -> usize {
        fs::read_dir("/proc/self/fd")
            .unwrap()
            .filter_map(|entry| fs::read_link(entry.ok()?.path()).ok())
            .filter(|target| target.to_string_lossy().starts_with("pipe:"))
            .count()
    }

    #[test]
    #[serial]
    fn pipeline_copies_bytes_exactly() {
        let dir = tempfile::tempdir().unwrap();
        // larger than a pipe buffer so the producer has to block
        let payload = (0..200_000u32).map(|i| (i % 251) as u8).collect::<Vec<_>>();
        fs::write(dir.path().join("in"), &payload).unwrap();

        let input = path(&dir, "in");
        let output = path(&dir, "out");
        let statuses = run(&["cat", "<", &input, "|", "cat", ">", &output]);

        assert!(statuses.iter().all(ExitStatus::success));
        assert_eq!(fs::read(dir.path().join("out")).unwrap(), payload);
    }

    #[test]
    #[serial]
    fn three_stage_pipeline() {
        let dir = tempfile::tempdir().unwrap();
        let output = path(&dir, "out");

        run(&["printf", "b\\na\\nc\\n", "|", "sort", "|", "head", "-n", "2", ">", &output]);

        assert_eq!(fs::read_to_string(&output).unwrap(), "a\nb\n");
    }

    #[cfg(target_os = "linux")]
    #[test]
    #[serial]
    fn no_descriptor_leaks() {
        let dir = tempfile::tempdir().unwrap();
        let output = path(&dir, "out");
        let before = open_pipes();

        let statuses = run(&["echo", "hi", "|", "cat", "|", "cat", "|", "cat", ">", &output]);

        assert_eq!(statuses.len(), 4);
        assert_eq!(open_pipes(), before);
        assert_eq!(fs::read_to_string(&output).unwrap(), "hi\n");
    }

    #[test]
    #[serial]
    fn missing_program_fails_its_stage() {
        let statuses = run(&["echo", "hi", "|", "minish-no-such-program"]);
        assert_eq!(statuses[1], ExitStatus::Exited(EXIT_NOT_FOUND));
    }

    #[test]
    #[serial]
    fn unexecutable_program_fails_its_stage() {
        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("script");
        fs::write(&script, "#!/bin/sh\necho hi\n").unwrap();
        fs::set_permissions(&script, fs::Permissions::from_mode(0o644)).unwrap();

        let statuses = run(&[&script.display().to_string()]);
        assert_eq!(statuses[0], ExitStatus::Exited(EXIT_NOT_EXECUTABLE));
    }

    #[test]
    #[serial]
    fn unreadable_input_fails_first_stage() {
        let dir = tempfile::tempdir().unwrap();
        let missing = path(&dir, "missing");
        let statuses = run(&["cat", "<", &missing, "|", "wc", "-c"]);
        assert_eq!(statuses[0], ExitStatus::Exited(EXIT_REDIRECT_FAILED));
        assert!(statuses[1].success());
    }

    #[test]
    #[serial]
    fn truncate_and_append() {
        let dir = tempfile::tempdir().unwrap();
        let output = path(&dir, "log");

        run(&["echo", "one", ">", &output]);
        run(&["echo", "two", ">>", &output]);
        assert_eq!(fs::read_to_string(&output).unwrap(), "one\ntwo\n");

        run(&["echo", "three", ">", &output]);
        assert_eq!(fs::read_to_string(&output).unwrap(), "three\n");
    }

    #[test]
    #[serial]
    fn created_files_are_not_group_writable() {
        let dir = tempfile::tempdir().unwrap();
        let output = path(&dir, "new");

        run(&["true", ">", &output]);

        let mode = fs::metadata(&output).unwrap().permissions().mode();
        assert_eq!(mode & 0o777 & !0o644, 0);
    }

    #[test]
    #[serial]
    fn nul_in_argument_spawns_nothing() {
        let chain = CommandChain::build(vec!["echo".into(), "a\0b".into()]).unwrap();
        let err = spawn(&chain).unwrap_err();
        assert!(err.spawned.is_empty());
        assert!(matches!(err.source, SpawnError::InvalidArgument { stage: 0, .. }));
    }

    #[test]
    #[serial]
    fn failure_mid_chain_returns_running_stages() {
        let chain = CommandChain::build(
            ["true", "|", "echo", "a\0b"].iter().map(|w| w.to_string()).collect(),
        )
        .unwrap();
        let err = spawn(&chain).unwrap_err();
        assert_eq!(err.spawned.len(), 1);
        let status = waitpid(err.spawned[0].pid, None).unwrap();
        assert!(ExitStatus::from_wait(status).unwrap().success());
    }
}
