use std::{
    fs::{self, OpenOptions},
    io::{self, Write},
    path::PathBuf,
};

use thiserror::Error;

#[derive(Debug, Error)]
#[error("history file {}: {source}", path.display())]
pub struct HistoryError {
    pub path: PathBuf,
    pub source: io::Error,
}

/// Accepted command lines, oldest first, optionally mirrored to a file.
#[derive(Debug, Default)]
pub struct History {
    entries: Vec<String>,
    file: Option<PathBuf>,
}

impl History {
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Reads previous entries from `file`. A file that does not exist yet is
    /// an empty history.
    pub fn load(file: PathBuf) -> Result<Self, HistoryError> {
        let entries = match fs::read_to_string(&file) {
            Ok(contents) => contents
                .lines()
                .filter(|line| !line.is_empty())
                .map(str::to_owned)
                .collect(),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Vec::new(),
            Err(source) => return Err(HistoryError { path: file, source }),
        };

        Ok(Self {
            entries,
            file: Some(file),
        })
    }

    /// Records a line. The in-memory entry is kept even if persisting it
    /// fails.
    pub fn push(&mut self, line: &str) -> Result<(), HistoryError> {
        if line.is_empty() {
            return Ok(());
        }

        self.entries.push(line.to_owned());

        let Some(path) = &self.file else {
            return Ok(());
        };

        OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .and_then(|mut file| writeln!(file, "{line}"))
            .map_err(|source| HistoryError {
                path: path.clone(),
                source,
            })
    }

    pub fn last(&self) -> Option<&str> {
        self.entries.last().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The newest `limit` entries with their 1-based positions.
    pub fn recent(&self, limit: usize) -> impl Iterator<Item = (usize, &str)> {
        let start = self.entries.len().saturating_sub(limit);
        self.entries
            .iter()
            .enumerate()
            .skip(start)
            .map(|(idx, line)| (idx + 1, line.as_str()))
    }
}
