use std::{io, path::PathBuf};

use super::{BuiltinCommand, BuiltinError};
use crate::{process::status::ExitStatus, state::State};

#[derive(Debug, Default)]
pub struct Cd;

impl BuiltinCommand for Cd {
    fn name(&self) -> &'static str {
        "cd"
    }

    fn execute(
        &self,
        args: &[String],
        _state: &mut State,
        _out: &mut dyn io::Write,
    ) -> Result<ExitStatus, BuiltinError> {
        trace!("executing cd builtin: {args:?}");

        let path = match args.first() {
            Some(path) => PathBuf::from(path),
            None => std::env::var_os("HOME")
                .map(PathBuf::from)
                .ok_or(BuiltinError::NoHome)?,
        };

        std::env::set_current_dir(&path).map_err(|source| BuiltinError::Cd {
            path: path.clone(),
            source,
        })?;

        let cwd = std::env::current_dir()?;
        trace!("cd: {:?}", cwd);
        std::env::set_var("PWD", cwd);

        Ok(ExitStatus::new_success())
    }
}
