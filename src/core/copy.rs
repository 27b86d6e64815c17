use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::path::Path;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use tracing::{debug, warn};

use crate::audit::AuditLog;
use crate::config::AppConfig;
use crate::core::error::{JobError, is_transient_io_error};
use crate::core::models::{CopyTask, TaskStatus};

/// Performs the raw byte transfer for one file. The production
/// implementation is [`NativeCopier`]; tests substitute fault-injecting
/// implementations to exercise the retry and escalation paths.
pub trait FileCopier: Send + Sync {
    /// Copy `source` to `dest` using the caller's buffer, yielding between
    /// slices. Returns bytes written.
    fn copy_file(
        &self,
        source: &Path,
        dest: &Path,
        buffer: &mut [u8],
        yield_interval: Duration,
    ) -> io::Result<u64>;
}

/// Sliced, cooperatively yielding local copy.
///
/// Reads and writes in buffer-sized slices and gives the processor back to
/// the host between slices, so a large file never monopolizes the core.
/// The source is opened read-only and never touched otherwise.
pub struct NativeCopier;

impl FileCopier for NativeCopier {
    fn copy_file(
        &self,
        source: &Path,
        dest: &Path,
        buffer: &mut [u8],
        yield_interval: Duration,
    ) -> io::Result<u64> {
        let mut reader = File::open(source)?;
        let mut writer = File::create(dest)?;
        let mut bytes_written: u64 = 0;

        loop {
            let bytes_read = reader.read(buffer)?;
            if bytes_read == 0 {
                break;
            }
            writer.write_all(&buffer[..bytes_read])?;
            bytes_written += bytes_read as u64;

            // One slice done; let host tasks run before the next.
            thread::yield_now();
            if !yield_interval.is_zero() {
                thread::sleep(yield_interval);
            }
        }

        writer.flush()?;

        preserve_metadata(source, dest);
        Ok(bytes_written)
    }
}

/// Permissions and mtime mirror the source. Failures here are cosmetic on
/// some filesystems and never fail the copy.
fn preserve_metadata(source: &Path, dest: &Path) {
    match fs::metadata(source) {
        Ok(metadata) => {
            if let Err(e) = fs::set_permissions(dest, metadata.permissions()) {
                debug!(dest = %dest.display(), error = %e, "Failed to set file permissions");
            }
            let mtime = filetime::FileTime::from_last_modification_time(&metadata);
            if let Err(e) = filetime::set_file_mtime(dest, mtime) {
                debug!(dest = %dest.display(), error = %e, "Failed to preserve file mtime");
            }
        }
        Err(e) => {
            debug!(source = %source.display(), error = %e, "Failed to read source metadata");
        }
    }
}

/// Executes [`CopyTask`]s: destination directory creation, the bounded
/// retry policy, and partial-output cleanup around a [`FileCopier`].
///
/// A task that exhausts its attempts is marked `Failed` and reported via
/// the returned error; it never aborts the owning job by itself.
pub struct CopyEngine {
    copier: Arc<dyn FileCopier>,
    retry_attempts: u32,
    retry_delay: Duration,
    yield_interval: Duration,
    audit: AuditLog,
}

impl CopyEngine {
    pub fn new(copier: Arc<dyn FileCopier>, config: &AppConfig, audit: AuditLog) -> Self {
        Self {
            copier,
            retry_attempts: config.retry_attempts,
            retry_delay: Duration::from_millis(config.retry_delay_ms),
            yield_interval: Duration::from_micros(config.yield_interval_us),
            audit,
        }
    }

    /// Run one task to success or final failure. The buffer is the job's
    /// single reusable copy buffer, owned by the caller.
    pub fn run(&self, task: &mut CopyTask, buffer: &mut [u8]) -> Result<u64, JobError> {
        if let Some(parent) = task.destination.parent() {
            if let Err(e) = fs::create_dir_all(parent) {
                task.status = TaskStatus::Failed;
                self.audit.error(format!(
                    "cannot create destination directory {}: {e}",
                    parent.display()
                ));
                return Err(JobError::from_io(e));
            }
        }

        let mut last_error: Option<io::Error> = None;

        for attempt in 1..=self.retry_attempts {
            task.attempts = attempt;

            match self
                .copier
                .copy_file(&task.source, &task.destination, buffer, self.yield_interval)
            {
                Ok(bytes) => {
                    task.status = TaskStatus::Succeeded;
                    debug!(
                        source = %task.source.display(),
                        bytes,
                        attempt,
                        "Copied file"
                    );
                    return Ok(bytes);
                }
                Err(e) => {
                    // Never leave a half-written destination behind.
                    let _ = fs::remove_file(&task.destination);

                    let kind = if is_transient_io_error(&e) {
                        "transient"
                    } else {
                        "persistent"
                    };
                    warn!(
                        source = %task.source.display(),
                        error = %e,
                        attempt,
                        limit = self.retry_attempts,
                        "Copy attempt failed"
                    );
                    self.audit.warn(format!(
                        "copy failed ({kind}, attempt {attempt}/{}): {}: {e}",
                        self.retry_attempts,
                        task.source.display()
                    ));
                    last_error = Some(e);

                    if attempt < self.retry_attempts && !self.retry_delay.is_zero() {
                        thread::sleep(self.retry_delay);
                    }
                }
            }
        }

        task.status = TaskStatus::Failed;
        self.audit.error(format!(
            "task failed after {} attempts: {}",
            self.retry_attempts,
            task.source.display()
        ));
        Err(JobError::from_io(
            last_error.unwrap_or_else(|| io::Error::other("copy failed")),
        ))
    }
}
