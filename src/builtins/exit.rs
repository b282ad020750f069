use std::io;

use super::{BuiltinCommand, BuiltinError};
use crate::{process::status::ExitStatus, state::State};

#[derive(Debug, Default)]
pub struct Exit;

impl BuiltinCommand for Exit {
    fn name(&self) -> &'static str {
        "exit"
    }

    /// Asks the prompt loop to stop. Without an argument the shell exits with
    /// the status of the last command.
    fn execute(
        &self,
        args: &[String],
        state: &mut State,
        _out: &mut dyn io::Write,
    ) -> Result<ExitStatus, BuiltinError> {
        let code = match args.first() {
            Some(arg) => arg
                .parse::<i32>()
                .map_err(|_| BuiltinError::ExitCode(arg.clone()))?,
            None => state.last_status.code(),
        };

        debug!(code, "exit requested");
        state.exit = Some(code);

        Ok(ExitStatus::Exited(code))
    }
}
