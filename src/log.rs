//! `background_tasks.log` (spec §6 Log file format): a plain,
//! line-oriented file every process (parent and every worker) appends to
//! under an exclusive advisory lock, independent of whatever `tracing`
//! subscriber the host may or may not have installed.

use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};

pub const LOG_FILENAME: &str = "background_tasks.log";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Level {
    Info,
    Warn,
    Error,
}

impl Level {
    fn as_str(self) -> &'static str {
        match self {
            Self::Info => "INFO",
            Self::Warn => "WARN",
            Self::Error => "ERROR",
        }
    }
}

/// One parsed line from `background_tasks.log`. Lines that don't match
/// the pattern are ignored by the reader (spec §6), not an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogLine {
    pub timestamp: String,
    pub level: String,
    pub scope: String,
    pub message: String,
}

#[derive(Debug, Clone)]
pub struct TaskLog {
    path: PathBuf,
}

impl TaskLog {
    pub fn new(directory: impl AsRef<Path>) -> std::io::Result<Self> {
        let directory = directory.as_ref();
        std::fs::create_dir_all(directory)?;
        Ok(Self {
            path: directory.join(LOG_FILENAME),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one line, formatted `[YYYY-MM-DD HH:MM:SS] [LEVEL]
    /// [TASK_OR_SYSTEM] message` (spec §6), under an exclusive advisory
    /// lock so concurrent writers (the parent and every worker) never
    /// interleave partial lines.
    pub fn append(&self, now: DateTime<Utc>, level: Level, scope: &str, message: &str) {
        let Ok(mut file) = OpenOptions::new().create(true).append(true).open(&self.path) else {
            return;
        };
        let _guard = LockGuard::acquire(&file);
        let line = format!(
            "[{}] [{}] [{}] {}\n",
            now.format("%Y-%m-%d %H:%M:%S"),
            level.as_str(),
            scope,
            message
        );
        let _ = file.write_all(line.as_bytes());
    }

    /// Parse the most recent `limit` well-formed lines, ignoring any that
    /// don't match the pattern (spec §6: "lines that fail the pattern are
    /// ignored").
    pub fn recent(&self, limit: usize) -> Vec<LogLine> {
        let Ok(file) = File::open(&self.path) else {
            return Vec::new();
        };
        let mut lines: Vec<LogLine> = BufReader::new(file)
            .lines()
            .map_while(Result::ok)
            .filter_map(|l| parse_line(&l))
            .collect();
        let start = lines.len().saturating_sub(limit);
        lines.split_off(start)
    }
}

fn parse_line(line: &str) -> Option<LogLine> {
    let rest = line.strip_prefix('[')?;
    let (timestamp, rest) = rest.split_once("] [")?;
    let (level, rest) = rest.split_once("] [")?;
    let (scope, message) = rest.split_once("] ")?;
    Some(LogLine {
        timestamp: timestamp.to_string(),
        level: level.to_string(),
        scope: scope.to_string(),
        message: message.to_string(),
    })
}

#[cfg(unix)]
struct LockGuard<'a> {
    file: &'a File,
}

#[cfg(unix)]
impl<'a> LockGuard<'a> {
    fn acquire(file: &'a File) -> Self {
        use std::os::unix::io::AsRawFd;
        let _ = nix::fcntl::flock(file.as_raw_fd(), nix::fcntl::FlockArg::LockExclusive);
        Self { file }
    }
}

#[cfg(unix)]
impl Drop for LockGuard<'_> {
    fn drop(&mut self) {
        use std::os::unix::io::AsRawFd;
        let _ = nix::fcntl::flock(self.file.as_raw_fd(), nix::fcntl::FlockArg::Unlock);
    }
}

#[cfg(not(unix))]
struct LockGuard;

#[cfg(not(unix))]
impl LockGuard {
    fn acquire(_file: &File) -> Self {
        Self
    }
}
