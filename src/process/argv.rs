use std::{
    ffi::{CStr, CString, NulError},
    ptr,
};

use nix::{errno::Errno, libc};

use crate::cmd::chain::Stage;

/// An argument vector laid out for `execvp`.
///
/// The strings and the null-terminated pointer array are built up front so
/// that replacing the process image after `fork` needs no allocation. The
/// pointers stay valid for as long as this value is alive.
#[derive(Debug)]
pub struct Argv {
    args: Vec<CString>,
    ptrs: Vec<*const libc::c_char>,
}

impl Argv {
    pub fn new(stage: &Stage) -> Result<Self, NulError> {
        let args = stage
            .argv()
            .iter()
            .map(|arg| CString::new(arg.as_bytes()))
            .collect::<Result<Vec<_>, _>>()?;

        let ptrs = args
            .iter()
            .map(|arg| arg.as_ptr())
            .chain(std::iter::once(ptr::null()))
            .collect();

        Ok(Self { args, ptrs })
    }

    pub fn program(&self) -> &CStr {
        &self.args[0]
    }

    /// Replaces the current process image, searching `PATH` for the program.
    /// Only returns if the replacement failed.
    pub fn exec(&self) -> Errno {
        // SAFETY: every pointer in `ptrs` borrows from `args`, and the array
        // ends with a null pointer.
        unsafe { libc::execvp(self.program().as_ptr(), self.ptrs.as_ptr()) };
        Errno::last()
    }
}
