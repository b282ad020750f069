use std::{collections::BTreeMap, fmt};

use itertools::Itertools;
use nix::unistd::Pid;

use crate::process::{reaper::Reaped, status::ExitStatus, ProcessHandle};

/// A background chain and the processes it still has running.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Job {
    pub id: usize,
    pub line: String,
    pub pids: Vec<Pid>,
    running: Vec<Pid>,
    status: Option<ExitStatus>,
    last_pid: Option<Pid>,
}

impl Job {
    /// The line printed when the job starts, e.g. `[1] 4242 4243`.
    pub fn ack(&self) -> String {
        format!("[{}] {}", self.id, self.pids.iter().join(" "))
    }

    pub fn is_done(&self) -> bool {
        self.running.is_empty()
    }

    /// Status of the last stage, which is what the chain reports.
    pub fn status(&self) -> Option<ExitStatus> {
        self.status
    }
}

impl fmt::Display for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match (self.is_done(), self.status) {
            (false, _) => "Running".to_string(),
            (true, Some(status)) => status.to_string(),
            (true, None) => "Done".to_string(),
        };
        write!(f, "[{}]+ {state}\t{}", self.id, self.line)
    }
}

/// Background jobs, keyed by the small number shown to the user.
#[derive(Debug, Default)]
pub struct JobTable {
    jobs: BTreeMap<usize, Job>,
}

impl JobTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a chain and returns its acknowledgment line.
    pub fn insert(&mut self, line: &str, handles: &[ProcessHandle]) -> String {
        let id = (1..).find(|id| !self.jobs.contains_key(id)).unwrap_or(1);
        let pids = handles.iter().map(|h| h.pid).collect::<Vec<_>>();

        let job = Job {
            id,
            line: line.to_owned(),
            running: pids.clone(),
            last_pid: pids.last().copied(),
            pids,
            status: None,
        };
        let ack = job.ack();

        self.jobs.insert(id, job);

        ack
    }

    /// Records a collected process. Returns the job once its last process is
    /// gone; the job is removed from the table at that point.
    pub fn reaped(&mut self, reaped: Reaped) -> Option<Job> {
        let job = self
            .jobs
            .values_mut()
            .find(|job| job.running.contains(&reaped.pid))?;

        job.running.retain(|pid| *pid != reaped.pid);
        if job.last_pid == Some(reaped.pid) {
            job.status = reaped.status;
        }

        if job.is_done() {
            let id = job.id;
            self.jobs.remove(&id)
        } else {
            None
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &Job> {
        self.jobs.values()
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handles(pids: &[i32]) -> Vec<ProcessHandle> {
        pids.iter()
            .enumerate()
            .map(|(stage, &pid)| ProcessHandle {
                pid: Pid::from_raw(pid),
                stage,
            })
            .collect()
    }

    fn reaped(pid: i32, code: i32) -> Reaped {
        Reaped {
            pid: Pid::from_raw(pid),
            status: Some(ExitStatus::Exited(code)),
        }
    }

    #[test]
    fn acknowledgment_lists_every_pid() {
        let mut jobs = JobTable::new();
        assert_eq!(jobs.insert("a | b &", &handles(&[10, 11])), "[1] 10 11");
        assert_eq!(jobs.insert("c &", &handles(&[12])), "[2] 12");
    }

    #[test]
    fn job_finishes_when_all_stages_are_reaped() {
        let mut jobs = JobTable::new();
        jobs.insert("a | b &", &handles(&[10, 11]));

        assert_eq!(jobs.reaped(reaped(11, 2)), None);
        let job = jobs.reaped(reaped(10, 0)).unwrap();

        assert_eq!(job.status(), Some(ExitStatus::Exited(2)));
        assert_eq!(job.to_string(), "[1]+ Exit 2\ta | b &");
        assert!(jobs.is_empty());
    }

    #[test]
    fn ids_are_reused_lowest_first() {
        let mut jobs = JobTable::new();
        jobs.insert("a &", &handles(&[10]));
        jobs.insert("b &", &handles(&[11]));
        jobs.reaped(reaped(10, 0));

        assert_eq!(jobs.insert("c &", &handles(&[12])), "[1] 12");
        assert_eq!(jobs.len(), 2);
    }

    #[test]
    fn unknown_pids_are_ignored() {
        let mut jobs = JobTable::new();
        jobs.insert("a &", &handles(&[10]));
        assert_eq!(jobs.reaped(reaped(99, 0)), None);
        assert_eq!(jobs.iter().next().unwrap().to_string(), "[1]+ Running\ta &");
    }
}
