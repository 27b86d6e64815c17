use std::io::{self, ErrorKind};
use std::path::PathBuf;

use thiserror::Error;

/// Failure conditions a job can degrade through. None of these may
/// terminate the host process; each maps to a skipped entry, a failed
/// task, or a partially-failed job.
#[derive(Debug, Error)]
pub enum JobError {
    #[error("transient I/O failure: {0}")]
    TransientIo(io::Error),

    #[error("I/O failure: {0}")]
    Io(io::Error),

    #[error("path exceeds {limit} bytes, skipped: {}", path.display())]
    PathTooLong { path: PathBuf, limit: usize },

    #[error("backup capacity of {max_bytes} bytes reached")]
    CapacityExceeded { max_bytes: u64 },

    #[error("{count} consecutive copy failures under {}, root abandoned", root.display())]
    ConsecutiveFailures { root: PathBuf, count: u32 },
}

impl JobError {
    /// Classify an I/O error into the transient or persistent bucket.
    pub fn from_io(error: io::Error) -> Self {
        if is_transient_io_error(&error) {
            Self::TransientIo(error)
        } else {
            Self::Io(error)
        }
    }
}

/// Whether an I/O error looks transient (worth retrying soon).
///
/// Covers the error kinds and errno values flash media and busy embedded
/// storage produce under load. Retries are bounded by the configured
/// attempt ceiling regardless of classification.
pub fn is_transient_io_error(error: &io::Error) -> bool {
    match error.kind() {
        ErrorKind::Interrupted => true,
        ErrorKind::WouldBlock => true,
        ErrorKind::TimedOut => true,
        ErrorKind::ResourceBusy => true,
        _ => {
            if let Some(os_error) = error.raw_os_error() {
                matches!(
                    os_error,
                    libc::EIO       // generic I/O error
                    | libc::EAGAIN
                    | libc::EINTR
                    | libc::EBUSY
                    | libc::ENXIO   // device dropped off the bus
                    | libc::ENODEV
                )
            } else {
                false
            }
        }
    }
}
