//! Append-only audit log.
//!
//! This is the daemon's durable, user-visible record: one text file of
//! `[timestamp] LEVEL message` lines that external tooling may read after
//! the fact. It is distinct from the `tracing` operator output. Writes are
//! strictly best-effort: a failed write is counted and swallowed, never
//! propagated into a running job.

use std::fmt;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use chrono::Local;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Severity of an audit entry. Declaration order is the severity order;
/// entries less severe than the configured maximum are dropped before
/// formatting.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum AuditLevel {
    Error,
    Warn,
    Info,
    Debug,
}

impl fmt::Display for AuditLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Error => write!(f, "ERROR"),
            Self::Warn => write!(f, "WARN"),
            Self::Info => write!(f, "INFO"),
            Self::Debug => write!(f, "DEBUG"),
        }
    }
}

/// Rotation and filtering limits, taken from `AppConfig` at startup.
#[derive(Debug, Clone)]
pub struct AuditLimits {
    pub max_bytes: u64,
    pub max_entries: u64,
    pub max_level: AuditLevel,
}

struct AuditInner {
    path: PathBuf,
    file: Option<File>,
    /// Bytes in the current file, including any pre-existing content.
    bytes: u64,
    /// Entries written to the current file by this process.
    entries: u64,
    dropped_writes: u64,
}

/// Shared handle to the audit sink. Cloning is cheap; the file handle and
/// counters live behind one mutex, so there is exactly one writer at a
/// time.
#[derive(Clone)]
pub struct AuditLog {
    limits: AuditLimits,
    inner: Arc<Mutex<AuditInner>>,
}

impl AuditLog {
    /// Open (or create) the audit file, creating parent directories.
    /// Failures are tolerated: a log that cannot open simply drops writes.
    pub fn open(path: impl Into<PathBuf>, limits: AuditLimits) -> Self {
        let path = path.into();
        if let Some(parent) = path.parent() {
            let _ = fs::create_dir_all(parent);
        }

        let file = OpenOptions::new().create(true).append(true).open(&path).ok();
        let bytes = fs::metadata(&path).map(|m| m.len()).unwrap_or(0);
        if file.is_none() {
            debug!(path = %path.display(), "audit log could not be opened, entries will be dropped");
        }

        Self {
            limits,
            inner: Arc::new(Mutex::new(AuditInner {
                path,
                file,
                bytes,
                entries: 0,
                dropped_writes: 0,
            })),
        }
    }

    pub fn error(&self, message: impl AsRef<str>) {
        self.log(AuditLevel::Error, None, message.as_ref());
    }

    pub fn warn(&self, message: impl AsRef<str>) {
        self.log(AuditLevel::Warn, None, message.as_ref());
    }

    pub fn info(&self, message: impl AsRef<str>) {
        self.log(AuditLevel::Info, None, message.as_ref());
    }

    pub fn debug(&self, message: impl AsRef<str>) {
        self.log(AuditLevel::Debug, None, message.as_ref());
    }

    /// Append one entry, tagging it with a job id when one applies.
    pub fn log(&self, level: AuditLevel, job_id: Option<&str>, message: &str) {
        if level > self.limits.max_level {
            return;
        }

        let timestamp = Local::now().format("%Y-%m-%d %H:%M:%S");
        let line = match job_id {
            Some(id) => format!("[{timestamp}] {level} [{id}] {message}\n"),
            None => format!("[{timestamp}] {level} {message}\n"),
        };

        let mut inner = match self.inner.lock() {
            Ok(inner) => inner,
            Err(_) => return,
        };

        if inner.bytes >= self.limits.max_bytes || inner.entries >= self.limits.max_entries {
            Self::rotate(&mut inner);
        }

        let written = match inner.file.as_mut() {
            Some(file) => file.write_all(line.as_bytes()).is_ok(),
            None => false,
        };

        if written {
            inner.bytes += line.len() as u64;
            inner.entries += 1;
        } else {
            inner.dropped_writes += 1;
        }
    }

    /// Entries lost to write failures since open.
    pub fn dropped_writes(&self) -> u64 {
        self.inner.lock().map(|i| i.dropped_writes).unwrap_or(0)
    }

    pub fn path(&self) -> PathBuf {
        self.inner
            .lock()
            .map(|i| i.path.clone())
            .unwrap_or_default()
    }

    /// Archive the current file to `<name>.1` and start fresh. A failed
    /// rotation truncates in place so the size bound still holds.
    fn rotate(inner: &mut AuditInner) {
        inner.file = None;

        let archive = archive_path(&inner.path);
        if fs::rename(&inner.path, &archive).is_err() {
            let _ = fs::remove_file(&inner.path);
        }

        inner.file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&inner.path)
            .ok();
        inner.bytes = 0;
        inner.entries = 0;
    }
}

fn archive_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(".1");
    PathBuf::from(name)
}
