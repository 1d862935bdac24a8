//! Timestamped line logging
//!
//! Foreground runs log to the console; daemon runs append to the well-known
//! log file, which `--status` reads back. Line format:
//! `[YYYY-MM-DD HH:MM:SS] message` in local time.

use std::fs::{self, OpenOptions};
use std::io::{self, BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use chrono::Local;

/// Number of log lines `--status` reports
pub const STATUS_TAIL_LINES: usize = 5;

/// Destination for run-loop log lines
pub trait LogSink {
    /// Append one timestamped line
    fn line(&mut self, message: &str) -> io::Result<()>;
}

/// Sink for foreground runs: stamped lines to stdout
#[derive(Debug, Default)]
pub struct ConsoleSink;

impl LogSink for ConsoleSink {
    fn line(&mut self, message: &str) -> io::Result<()> {
        println!("{}", stamped(message));
        Ok(())
    }
}

/// Sink for daemon runs: stamped lines appended to the log file.
///
/// The file is opened per line, not held open, so `--status` tail reads
/// and log rotation never contend with the writer.
#[derive(Debug)]
pub struct FileSink {
    path: PathBuf,
}

impl FileSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl LogSink for FileSink {
    fn line(&mut self, message: &str) -> io::Result<()> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        writeln!(file, "{}", stamped(message))
    }
}

/// Prefix a message with the local-time stamp
pub fn stamped(message: &str) -> String {
    format!("[{}] {}", Local::now().format("%Y-%m-%d %H:%M:%S"), message)
}

/// Read the last `count` lines of the log file. A missing file yields an
/// empty tail, not an error.
pub fn tail_lines(path: &Path, count: usize) -> io::Result<Vec<String>> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let reader = BufReader::new(fs::File::open(path)?);
    let lines: Vec<String> = reader.lines().collect::<Result<_, _>>()?;
    let skip = lines.len().saturating_sub(count);
    Ok(lines[skip..].to_vec())
}
