use std::io;

use super::{BuiltinCommand, BuiltinError};
use crate::{process::status::ExitStatus, state::State};

#[derive(Debug, Default)]
pub struct History;

impl BuiltinCommand for History {
    fn name(&self) -> &'static str {
        "history"
    }

    fn execute(
        &self,
        _args: &[String],
        state: &mut State,
        out: &mut dyn io::Write,
    ) -> Result<ExitStatus, BuiltinError> {
        if state.history.is_empty() {
            writeln!(out, "No commands in history.")?;
            return Ok(ExitStatus::new_success());
        }

        for (num, line) in state.history.recent(state.config.history_display) {
            writeln!(out, "  {num}  {line}")?;
        }

        Ok(ExitStatus::new_success())
    }
}
