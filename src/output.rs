use std::fs::OpenOptions;
use std::io::{self, Write};
use std::path::PathBuf;

use crate::defaults::STDOUT_DESTINATIONS;
use crate::error::{Error, Result};

/// Append-only destination for downloaded log content.
///
/// Appends from concurrent runs against the same destination are not
/// serialized here.
pub trait LogSink {
    /// Absent content leaves the destination untouched.
    fn append(&mut self, content: Option<&str>) -> Result<()>;

    fn describe(&self) -> String;
}

/// Reopens the file in create+append mode for every write, so each write
/// is flushed and closed before the next download starts.
pub struct FileSink {
    path: PathBuf,
}

impl FileSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn write_error(&self, source: io::Error) -> Error {
        Error::Write {
            path: self.path.clone(),
            source,
        }
    }
}

impl LogSink for FileSink {
    fn append(&mut self, content: Option<&str>) -> Result<()> {
        let Some(content) = content else {
            return Ok(());
        };

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|err| self.write_error(err))?;
        file.write_all(content.as_bytes())
            .map_err(|err| self.write_error(err))?;
        file.flush().map_err(|err| self.write_error(err))
    }

    fn describe(&self) -> String {
        self.path.display().to_string()
    }
}

pub struct StdoutSink;

impl LogSink for StdoutSink {
    fn append(&mut self, content: Option<&str>) -> Result<()> {
        let Some(content) = content else {
            return Ok(());
        };
        let mut stdout = io::stdout().lock();
        stdout
            .write_all(content.as_bytes())
            .and_then(|_| stdout.flush())
            .map_err(|source| Error::Write {
                path: PathBuf::from("<stdout>"),
                source,
            })
    }

    fn describe(&self) -> String {
        "stdout".to_string()
    }
}

pub fn is_stdout(destination: &str) -> bool {
    STDOUT_DESTINATIONS.contains(&destination)
}

pub fn open_sink(destination: &str) -> Box<dyn LogSink> {
    if is_stdout(destination) {
        Box::new(StdoutSink)
    } else {
        Box::new(FileSink::new(destination))
    }
}

/// Collects appended content in memory.
#[cfg(test)]
#[derive(Default)]
pub struct MemorySink {
    pub written: Vec<String>,
    pub fail_after: Option<usize>,
}

#[cfg(test)]
impl LogSink for MemorySink {
    fn append(&mut self, content: Option<&str>) -> Result<()> {
        let Some(content) = content else {
            return Ok(());
        };
        if self.fail_after == Some(self.written.len()) {
            return Err(Error::Write {
                path: PathBuf::from("<memory>"),
                source: io::Error::new(io::ErrorKind::Other, "sink full"),
            });
        }
        self.written.push(content.to_string());
        Ok(())
    }

    fn describe(&self) -> String {
        "memory".to_string()
    }
}
