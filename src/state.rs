use std::{
    fmt,
    fs::{File, OpenOptions},
    io::{self, Write},
    os::unix::fs::OpenOptionsExt,
    path::PathBuf,
};

use termion::{color, style};
use thiserror::Error;
use tokio::{
    select,
    signal::unix::{signal, Signal, SignalKind},
};

use crate::{
    builtins::{BuiltinCommand, BuiltinCommands, BuiltinError},
    cmd::{
        chain::{CommandChain, OutputRedirect, RedirectMode, SyntaxError},
        execute::{self, PartialSpawn, SpawnError},
    },
    config::Config,
    history::History,
    input::{self, InputMessage},
    jobs::JobTable,
    parse::{parse_command, CommandParseError},
    process::{reaper::Reaper, status::ExitStatus},
    NAME,
};

/// Everything that can go wrong with one input line. None of these end the
/// prompt loop.
#[derive(Debug, Error)]
pub enum CommandError {
    #[error(transparent)]
    Parse(#[from] CommandParseError),
    #[error("syntax error: {0}")]
    Syntax(#[from] SyntaxError),
    #[error(transparent)]
    Spawn(#[from] SpawnError),
    #[error(transparent)]
    Builtin(#[from] BuiltinError),
    #[error("{}: {source}", path.display())]
    Redirect { path: PathBuf, source: io::Error },
    #[error("No commands in history")]
    EmptyHistory,
}

pub struct State {
    pub config: Config,
    pub history: History,
    pub jobs: JobTable,
    /// Status of the last foreground chain or builtin.
    pub last_status: ExitStatus,
    /// Set by the `exit` builtin.
    pub exit: Option<i32>,
    reaper: Reaper,
    interrupts: Signal,
    interactive: bool,
}

impl State {
    /// Must be called inside the runtime, before anything is spawned.
    pub fn new(config: Config) -> io::Result<Self> {
        let history = match &config.history_file {
            Some(path) => History::load(path.clone()).unwrap_or_else(|err| {
                warn!(%err, "keeping history in memory");
                History::in_memory()
            }),
            None => History::in_memory(),
        };
        debug!(entries = history.len(), "history loaded");

        Ok(Self {
            reaper: Reaper::spawn()?,
            interrupts: signal(SignalKind::interrupt())?,
            interactive: termion::is_tty(&io::stdin()),
            history,
            jobs: JobTable::new(),
            last_status: ExitStatus::default(),
            exit: None,
            config,
        })
    }

    pub fn render<W: Write>(&self, stdout: &mut W) -> io::Result<()> {
        if !self.interactive {
            return Ok(());
        }

        write!(stdout, "{}", self.config.prompt)?;
        stdout.flush()
    }

    /// Runs the prompt loop until end of input or `exit`, returning the
    /// shell's exit status.
    pub async fn run(&mut self) -> io::Result<i32> {
        let mut stdout = io::stdout();

        loop {
            self.report_jobs(&mut stdout)?;
            self.render(&mut stdout)?;

            let mut pending = input::read_line();
            let msg = loop {
                select! {
                    msg = &mut pending => {
                        break msg.unwrap_or_else(|err| InputMessage::Error(err.into()));
                    }
                    Some(()) = self.interrupts.recv() => {
                        trace!("SIGINT while reading");
                        writeln!(stdout)?;
                        self.render(&mut stdout)?;
                    }
                }
            };

            match msg {
                InputMessage::Line(line) => {
                    if let Err(err) = self.execute(&line).await {
                        debug!(?err, line = line.trim(), "command failed");
                        self.last_status = ExitStatus::new_failure();
                        self.report_error(&err);
                    }

                    if let Some(code) = self.exit {
                        return Ok(code);
                    }
                }
                InputMessage::Eof => {
                    trace!("end of input");
                    if self.interactive {
                        writeln!(stdout)?;
                    }
                    return Ok(self.last_status.code());
                }
                InputMessage::Error(err) => {
                    error!(%err, "failed to read input");
                    return Err(err);
                }
            }
        }
    }

    /// Interprets one input line.
    pub async fn execute(&mut self, line: &str) -> Result<(), CommandError> {
        let line = line.trim();
        if line.is_empty() {
            return Ok(());
        }

        let line = if line == "!!" {
            let last = self.history.last().ok_or(CommandError::EmptyHistory)?;
            println!("{last}");
            last.to_owned()
        } else {
            line.to_owned()
        };

        if let Err(err) = self.history.push(&line) {
            warn!(%err, "failed to persist history");
        }

        let Some(chain) = parse_command(&line)? else {
            return Ok(());
        };

        debug!(?chain, "parsed command");

        if chain.is_pipeline() {
            if let Some(stage) = chain
                .stages()
                .iter()
                .find(|stage| BuiltinCommands::is_builtin(stage.program()))
            {
                return Err(SyntaxError::BuiltinInPipeline(stage.program().to_owned()).into());
            }
        } else if let Some(builtin) = BuiltinCommands::from_name(chain.stages()[0].program()) {
            return self.run_builtin(builtin, &chain);
        }

        self.run_chain(&chain, &line).await
    }

    fn run_builtin(
        &mut self,
        builtin: BuiltinCommands,
        chain: &CommandChain,
    ) -> Result<(), CommandError> {
        let args = chain.stages()[0].args();

        if chain.input().is_some() {
            trace!(builtin = builtin.name(), "builtins do not read stdin, ignoring input redirect");
        }

        let status = match chain.output() {
            Some(redirect) => {
                let mut file = open_output(redirect)?;
                builtin.execute(args, self, &mut file)?
            }
            None => builtin.execute(args, self, &mut io::stdout().lock())?,
        };

        self.last_status = status;
        Ok(())
    }

    async fn run_chain(&mut self, chain: &CommandChain, line: &str) -> Result<(), CommandError> {
        let (handles, failure) = match execute::spawn(chain) {
            Ok(handles) => (handles, None),
            Err(PartialSpawn { spawned, source }) => (spawned, Some(source)),
        };

        if handles.is_empty() {
            // nothing started
        } else if chain.is_background() {
            for handle in &handles {
                self.reaper.track(handle.pid);
            }
            println!("{}", self.jobs.insert(line, &handles));
        } else {
            let wait = self.reaper.wait(&handles);
            tokio::pin!(wait);

            // an interrupt that killed the chain must not leak into the
            // next prompt
            let statuses = loop {
                select! {
                    biased;
                    Some(()) = self.interrupts.recv() => {
                        trace!("SIGINT while waiting for foreground chain");
                    }
                    statuses = &mut wait => break statuses,
                }
            };

            for (handle, status) in &statuses {
                debug!(pid = %handle.pid, stage = handle.stage, ?status, "stage finished");
            }

            self.last_status = statuses
                .last()
                .and_then(|(_, status)| *status)
                .unwrap_or_else(ExitStatus::new_failure);
        }

        match failure {
            Some(err) => Err(err.into()),
            None => Ok(()),
        }
    }

    /// Writes a line for every background job that finished since the last
    /// call.
    pub fn report_jobs(&mut self, out: &mut dyn Write) -> io::Result<()> {
        while let Some(reaped) = self.reaper.try_recv() {
            if let Some(job) = self.jobs.reaped(reaped) {
                writeln!(out, "{job}")?;
            }
        }
        out.flush()
    }

    fn report_error(&self, err: &dyn fmt::Display) {
        if self.interactive {
            eprintln!("{}{NAME}:{} {err}", color::Fg(color::Red), style::Reset);
        } else {
            eprintln!("{NAME}: {err}");
        }
    }
}

fn open_output(redirect: &OutputRedirect) -> Result<File, CommandError> {
    let mut options = OpenOptions::new();
    options.write(true).create(true).mode(0o644);

    match redirect.mode {
        RedirectMode::Truncate => options.truncate(true),
        RedirectMode::Append => options.append(true),
    };

    options
        .open(&redirect.path)
        .map_err(|source| CommandError::Redirect {
            path: redirect.path.clone(),
            source,
        })
}

#[cfg(test)]
mod tests {
    use std::{fs, path::Path, time::Duration};

    use serial_test::serial;
    use tokio::time;

    use super::*;

    fn state() -> State {
        State::new(Config {
            history_file: None,
            ..Config::default()
        })
        .unwrap()
    }

    fn read(path: &Path) -> String {
        fs::read_to_string(path).unwrap()
    }

    #[tokio::test]
    #[serial]
    async fn pipeline_output_lands_in_file() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("out.txt");
        let mut state = state();

        state
            .execute(&format!("printf 'b\\na\\n' | sort > {}", out.display()))
            .await
            .unwrap();

        assert_eq!(read(&out), "a\nb\n");
        assert!(state.last_status.success());
        assert_eq!(state.history.len(), 1);
    }

    #[tokio::test]
    #[serial]
    async fn missing_last_program_sets_not_found_status() {
        let mut state = state();

        state
            .execute("echo hi | minish-definitely-not-a-program")
            .await
            .unwrap();

        assert_eq!(state.last_status, ExitStatus::Exited(127));
    }

    #[tokio::test]
    #[serial]
    async fn builtin_in_pipeline_is_rejected() {
        let mut state = state();

        let err = state.execute("pwd | cat").await.unwrap_err();

        assert!(matches!(
            err,
            CommandError::Syntax(SyntaxError::BuiltinInPipeline(ref name)) if name == "pwd"
        ));
    }

    #[tokio::test]
    #[serial]
    async fn builtin_output_honours_redirect() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("env.txt");
        let mut state = state();

        state
            .execute("setenv MINISH_STATE_TEST_VAR from-builtin")
            .await
            .unwrap();
        state
            .execute(&format!("env > {}", out.display()))
            .await
            .unwrap();

        assert!(read(&out).contains("MINISH_STATE_TEST_VAR=from-builtin\n"));

        state
            .execute(&format!("echo $MINISH_STATE_TEST_VAR >> {}", out.display()))
            .await
            .unwrap();
        assert!(read(&out).ends_with("from-builtin\n"));

        state.execute("unsetenv MINISH_STATE_TEST_VAR").await.unwrap();
        assert!(std::env::var_os("MINISH_STATE_TEST_VAR").is_none());
    }

    #[tokio::test]
    #[serial]
    async fn repeat_requires_history() {
        let mut state = state();

        assert!(matches!(
            state.execute("!!").await,
            Err(CommandError::EmptyHistory)
        ));

        state.execute("true").await.unwrap();
        state.execute("!!").await.unwrap();
        assert_eq!(state.history.len(), 2);
        assert_eq!(state.history.last(), Some("true"));
    }

    #[tokio::test]
    #[serial]
    async fn exit_uses_last_status_by_default() {
        let mut state = state();

        state.execute("sh -c 'exit 5'").await.unwrap();
        assert_eq!(state.last_status, ExitStatus::Exited(5));

        state.execute("exit").await.unwrap();
        assert_eq!(state.exit, Some(5));

        state.execute("exit 2").await.unwrap();
        assert_eq!(state.exit, Some(2));

        assert!(matches!(
            state.execute("exit soon").await,
            Err(CommandError::Builtin(BuiltinError::ExitCode(_)))
        ));
    }

    #[tokio::test]
    #[serial]
    async fn cd_changes_directory_for_children() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().canonicalize().unwrap();
        let out = target.join("pwd.txt");
        let previous = std::env::current_dir().unwrap();
        let mut state = state();

        state
            .execute(&format!("cd {}", target.display()))
            .await
            .unwrap();
        state.execute("pwd > pwd.txt").await.unwrap();
        std::env::set_current_dir(previous).unwrap();

        assert_eq!(read(&out), format!("{}\n", target.display()));
    }

    #[tokio::test]
    #[serial]
    async fn background_job_is_announced_when_done() {
        let mut state = state();

        state.execute("sleep 0.1 &").await.unwrap();
        assert_eq!(state.jobs.len(), 1);

        let mut out = Vec::new();
        time::timeout(Duration::from_secs(5), async {
            while !state.jobs.is_empty() {
                state.report_jobs(&mut out).unwrap();
                time::sleep(Duration::from_millis(20)).await;
            }
        })
        .await
        .unwrap();

        let out = String::from_utf8(out).unwrap();
        assert_eq!(out, "[1]+ Done\tsleep 0.1 &\n");
    }

    #[tokio::test]
    #[serial]
    async fn background_chain_does_not_block() {
        use nix::{
            errno::Errno,
            sys::{
                signal::{kill, Signal as NixSignal},
                wait::{waitpid, WaitPidFlag},
            },
        };

        let mut state = state();

        time::timeout(Duration::from_millis(500), state.execute("sleep 5 &"))
            .await
            .unwrap()
            .unwrap();

        let pid = {
            let job = state.jobs.iter().next().unwrap();
            assert!(!job.is_done());
            job.pids[0]
        };

        kill(pid, NixSignal::SIGKILL).unwrap();

        let mut out = Vec::new();
        time::timeout(Duration::from_secs(5), async {
            while !state.jobs.is_empty() {
                state.report_jobs(&mut out).unwrap();
                time::sleep(Duration::from_millis(20)).await;
            }
        })
        .await
        .unwrap();

        let out = String::from_utf8(out).unwrap();
        assert_eq!(out, "[1]+ Killed (SIGKILL)\tsleep 5 &\n");
        assert!(matches!(
            waitpid(pid, Some(WaitPidFlag::WNOHANG)),
            Err(Errno::ECHILD)
        ));
    }
}
