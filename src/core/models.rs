use std::fmt;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};

/// Why a backup job was started.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerReason {
    LowBattery,
    Manual,
}

impl fmt::Display for TriggerReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::LowBattery => write!(f, "low battery"),
            Self::Manual => write!(f, "manual"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathKind {
    /// Always attempted, even if the root is missing.
    Critical,
    /// Attempted only when the root exists; absence is not an error.
    Optional,
}

/// A configured source root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathSpec {
    pub root: PathBuf,
    pub kind: PathKind,
}

impl PathSpec {
    pub fn critical(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            kind: PathKind::Critical,
        }
    }

    pub fn optional(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            kind: PathKind::Optional,
        }
    }

    /// Directory name this root mirrors to under the job directory.
    pub fn dest_name(&self) -> String {
        self.root
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "root".to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
    Idle,
    Running,
    Completed,
    Failed,
    PartiallyFailed,
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Running => write!(f, "running"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
            Self::PartiallyFailed => write!(f, "partially failed"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskStatus {
    Pending,
    Succeeded,
    Failed,
}

/// The unit of work: copying one file.
#[derive(Debug, Clone)]
pub struct CopyTask {
    pub source: PathBuf,
    pub destination: PathBuf,
    pub size: u64,
    pub attempts: u32,
    pub status: TaskStatus,
}

impl CopyTask {
    pub fn new(source: impl Into<PathBuf>, destination: impl Into<PathBuf>, size: u64) -> Self {
        Self {
            source: source.into(),
            destination: destination.into(),
            size,
            attempts: 0,
            status: TaskStatus::Pending,
        }
    }
}

/// Per-root accounting within one job.
#[derive(Debug, Clone)]
pub struct RootResult {
    pub root: PathBuf,
    pub files_copied: u64,
    pub bytes_copied: u64,
    pub error_count: u32,
    /// Remaining walk abandoned after hitting the consecutive-failure ceiling.
    pub aborted: bool,
}

impl RootResult {
    pub fn new(root: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
            files_copied: 0,
            bytes_copied: 0,
            error_count: 0,
            aborted: false,
        }
    }
}

/// One complete backup run. Immutable once terminal.
#[derive(Debug, Clone)]
pub struct BackupJob {
    /// Derived once from the start time; doubles as the destination
    /// directory name.
    pub id: String,
    pub status: JobStatus,
    pub roots: Vec<RootResult>,
    pub files_copied: u64,
    pub bytes_copied: u64,
    pub error_count: u32,
    pub started_at: DateTime<Local>,
    pub completed_at: Option<DateTime<Local>>,
}

impl BackupJob {
    pub fn begin(started_at: DateTime<Local>) -> Self {
        Self {
            id: started_at.format("%Y%m%d_%H%M%S").to_string(),
            status: JobStatus::Running,
            roots: Vec::new(),
            files_copied: 0,
            bytes_copied: 0,
            error_count: 0,
            started_at,
            completed_at: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self.status,
            JobStatus::Completed | JobStatus::Failed | JobStatus::PartiallyFailed
        )
    }
}
