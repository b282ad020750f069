use std::io;

use super::{BuiltinCommand, BuiltinError};
use crate::{process::status::ExitStatus, state::State};

#[derive(Debug, Default)]
pub struct Pwd;

impl BuiltinCommand for Pwd {
    fn name(&self) -> &'static str {
        "pwd"
    }

    fn execute(
        &self,
        _args: &[String],
        _state: &mut State,
        out: &mut dyn io::Write,
    ) -> Result<ExitStatus, BuiltinError> {
        let cwd = std::env::current_dir()?;

        writeln!(out, "{}", cwd.display())?;

        Ok(ExitStatus::new_success())
    }
}
