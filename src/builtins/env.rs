use std::io;

use super::{BuiltinCommand, BuiltinError};
use crate::{process::status::ExitStatus, state::State};

/// `std::env::set_var` and `remove_var` panic on these.
fn check_name(command: &'static str, name: &str) -> Result<(), BuiltinError> {
    if name.is_empty() || name.contains(['=', '\0']) {
        return Err(BuiltinError::VariableName {
            command,
            name: name.to_owned(),
        });
    }
    Ok(())
}

#[derive(Debug, Default)]
pub struct Env;

impl BuiltinCommand for Env {
    fn name(&self) -> &'static str {
        "env"
    }

    fn execute(
        &self,
        _args: &[String],
        _state: &mut State,
        out: &mut dyn io::Write,
    ) -> Result<ExitStatus, BuiltinError> {
        for (key, value) in std::env::vars_os() {
            writeln!(out, "{}={}", key.to_string_lossy(), value.to_string_lossy())?;
        }

        Ok(ExitStatus::new_success())
    }
}

#[derive(Debug, Default)]
pub struct SetEnv;

impl BuiltinCommand for SetEnv {
    fn name(&self) -> &'static str {
        "setenv"
    }

    fn execute(
        &self,
        args: &[String],
        _state: &mut State,
        _out: &mut dyn io::Write,
    ) -> Result<ExitStatus, BuiltinError> {
        let [name, value, ..] = args else {
            return Err(BuiltinError::Usage("setenv VAR VALUE"));
        };

        check_name(self.name(), name)?;
        if value.contains('\0') {
            return Err(BuiltinError::VariableValue {
                command: self.name(),
            });
        }

        trace!("setenv {name}={value}");
        std::env::set_var(name, value);

        Ok(ExitStatus::new_success())
    }
}

#[derive(Debug, Default)]
pub struct UnsetEnv;

impl BuiltinCommand for UnsetEnv {
    fn name(&self) -> &'static str {
        "unsetenv"
    }

    fn execute(
        &self,
        args: &[String],
        _state: &mut State,
        _out: &mut dyn io::Write,
    ) -> Result<ExitStatus, BuiltinError> {
        let Some(name) = args.first() else {
            return Err(BuiltinError::Usage("unsetenv VAR"));
        };

        check_name(self.name(), name)?;
        std::env::remove_var(name);

        Ok(ExitStatus::new_success())
    }
}
