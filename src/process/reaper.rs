use std::{collections::HashMap, io, time::Duration};

use nix::{
    errno::Errno,
    sys::wait::{waitpid, WaitPidFlag, WaitStatus},
    unistd::Pid,
};
use tokio::{
    select,
    signal::unix::{signal, SignalKind},
    sync::oneshot,
    time::{self, MissedTickBehavior},
};

use super::{status::ExitStatus, ProcessHandle};
use crate::prelude::*;

/// SIGCHLD deliveries coalesce, and with several runtimes in one process a
/// wakeup can land on another driver. Rescanning bounds how long a
/// terminated child can stay a zombie.
const RESCAN_PERIOD: Duration = Duration::from_millis(250);

#[derive(Debug)]
pub enum Waiter {
    Foreground(oneshot::Sender<Option<ExitStatus>>),
    Background,
}

#[derive(Debug)]
pub enum ReaperCommand {
    Watch { pid: Pid, waiter: Waiter },
}

/// A background process that has been collected. `status` is `None` when
/// the process was already gone by the time it was polled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Reaped {
    pub pid: Pid,
    pub status: Option<ExitStatus>,
}

enum ChildState {
    Running,
    Terminated(ExitStatus),
    Gone,
}

/// Handle to the task that collects every child the shell spawns.
///
/// Foreground and background children go through the same task, so each one
/// is waited for exactly once: foreground waiters get their status through a
/// one-shot channel, background completions are queued for the prompt loop.
pub struct Reaper {
    tx: Sender<ReaperCommand>,
    rx: Receiver<Reaped>,
}

impl Reaper {
    /// Starts the reaper. Must be called from inside a tokio runtime, and
    /// before any child is spawned so no SIGCHLD is missed.
    pub fn spawn() -> io::Result<Self> {
        let mut sigchld = signal(SignalKind::child())?;

        let (ctx, mut crx) = unbounded_channel::<ReaperCommand>();
        let (mtx, mrx) = unbounded_channel();

        tokio::task::spawn(async move {
            let mut watched = HashMap::new();
            let mut rescan = time::interval(RESCAN_PERIOD);
            rescan.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                select! {
                    cmd = crx.recv() => match cmd {
                        Some(ReaperCommand::Watch { pid, waiter }) => {
                            trace!(%pid, ?waiter, "watching child");
                            watched.insert(pid, waiter);
                        }
                        None => break,
                    },
                    Some(()) = sigchld.recv() => {
                        trace!("SIGCHLD");
                    }
                    _ = rescan.tick() => {}
                }

                drain(&mut watched, &mtx);
            }

            debug!(remaining = watched.len(), "reaper stopped");
        });

        Ok(Self { tx: ctx, rx: mrx })
    }

    fn send(&self, pid: Pid, waiter: Waiter) {
        if self.tx.send(ReaperCommand::Watch { pid, waiter }).is_err() {
            error!(%pid, "reaper is not running");
        }
    }

    /// Registers a foreground child. The receiver resolves once it has been
    /// collected.
    pub fn watch(&self, pid: Pid) -> oneshot::Receiver<Option<ExitStatus>> {
        let (tx, rx) = oneshot::channel();
        self.send(pid, Waiter::Foreground(tx));
        rx
    }

    /// Registers a background child. Its completion shows up in
    /// [`Reaper::try_recv`].
    pub fn track(&self, pid: Pid) {
        self.send(pid, Waiter::Background);
    }

    /// Waits for every handle, returning statuses in spawn order.
    pub async fn wait(
        &self,
        handles: &[ProcessHandle],
    ) -> Vec<(ProcessHandle, Option<ExitStatus>)> {
        let waiters = handles
            .iter()
            .map(|handle| (*handle, self.watch(handle.pid)))
            .collect::<Vec<_>>();

        let mut statuses = Vec::with_capacity(waiters.len());
        for (handle, waiter) in waiters {
            statuses.push((handle, waiter.await.ok().flatten()));
        }

        statuses
    }

    pub fn try_recv(&mut self) -> Option<Reaped> {
        self.rx.try_recv().ok()
    }
}

/// Collects every watched child that has terminated.
fn drain(watched: &mut HashMap<Pid, Waiter>, done: &Sender<Reaped>) {
    let finished = watched
        .keys()
        .filter_map(|&pid| match poll(pid) {
            ChildState::Running => None,
            ChildState::Terminated(status) => Some((pid, Some(status))),
            ChildState::Gone => Some((pid, None)),
        })
        .collect::<Vec<_>>();

    for (pid, status) in finished {
        trace!(%pid, ?status, "collected child");

        match watched.remove(&pid) {
            Some(Waiter::Foreground(tx)) => {
                let _ = tx.send(status);
            }
            Some(Waiter::Background) => {
                let _ = done.send(Reaped { pid, status });
            }
            None => {}
        }
    }
}

fn poll(pid: Pid) -> ChildState {
    loop {
        match waitpid(pid, Some(WaitPidFlag::WNOHANG)) {
            Ok(WaitStatus::StillAlive) => return ChildState::Running,
            Ok(status) => {
                return match ExitStatus::from_wait(status) {
                    Some(status) => ChildState::Terminated(status),
                    None => ChildState::Running,
                }
            }
            Err(Errno::EINTR) => continue,
            // someone else collected it
            Err(Errno::ECHILD) => return ChildState::Gone,
            Err(err) => {
                warn!(%pid, %err, "waitpid failed");
                return ChildState::Gone;
            }
        }
    }
}
