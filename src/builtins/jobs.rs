use std::io;

use super::{BuiltinCommand, BuiltinError};
use crate::{process::status::ExitStatus, state::State};

#[derive(Debug, Default)]
pub struct Jobs;

impl BuiltinCommand for Jobs {
    fn name(&self) -> &'static str {
        "jobs"
    }

    fn execute(
        &self,
        _args: &[String],
        state: &mut State,
        out: &mut dyn io::Write,
    ) -> Result<ExitStatus, BuiltinError> {
        // pick up anything that finished since the last prompt
        state.report_jobs(out)?;

        for job in state.jobs.iter() {
            writeln!(out, "{job}")?;
        }

        Ok(ExitStatus::new_success())
    }
}
