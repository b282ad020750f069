use std::io;

use nix::{errno::Errno, libc, unistd};
use tokio::task::JoinHandle;

#[derive(Debug)]
pub enum InputMessage {
    Line(String),
    Eof,
    Error(io::Error),
}

/// Reads the next line of stdin on the blocking pool.
///
/// Dropping the handle does not cancel the read; a caller that stops
/// listening must keep the handle around and await it later.
pub fn read_line() -> JoinHandle<InputMessage> {
    tokio::task::spawn_blocking(|| match read_raw_line() {
        Ok(Some(line)) => InputMessage::Line(line),
        Ok(None) => InputMessage::Eof,
        Err(err) => InputMessage::Error(err),
    })
}

/// Unbuffered, so children started from this line still see the rest of
/// stdin.
fn read_raw_line() -> io::Result<Option<String>> {
    let mut line = Vec::new();
    let mut byte = [0u8; 1];

    loop {
        match unistd::read(libc::STDIN_FILENO, &mut byte) {
            Ok(0) => break,
            Ok(_) => {
                line.push(byte[0]);
                if byte[0] == b'\n' {
                    break;
                }
            }
            Err(Errno::EINTR) => continue,
            Err(err) => return Err(err.into()),
        }
    }

    if line.is_empty() {
        return Ok(None);
    }

    Ok(Some(String::from_utf8_lossy(&line).into_owned()))
}
