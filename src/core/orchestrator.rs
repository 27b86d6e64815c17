use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use chrono::Local;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::audit::{AuditLevel, AuditLog};
use crate::config::AppConfig;
use crate::context::AppContext;
use crate::core::copy::{CopyEngine, FileCopier};
use crate::core::error::JobError;
use crate::core::models::{
    BackupJob, CopyTask, JobStatus, PathKind, PathSpec, RootResult, TriggerReason,
};
use crate::core::walker::PathWalker;

/// Synchronous answer to a `start()` request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    Accepted,
    Rejected,
}

/// Owns the single job slot and sequences PathWalker + CopyEngine over the
/// configured roots for one job at a time.
///
/// `start()` claims the slot atomically and returns immediately; the job
/// itself runs on a blocking worker so the caller (monitor loop, CLI)
/// stays responsive. A request while the slot is held is rejected, never
/// queued.
pub struct Orchestrator {
    ctx: AppContext,
    copier: Arc<dyn FileCopier>,
    cancel: CancellationToken,
    running: Arc<AtomicBool>,
    last_job: Arc<Mutex<Option<BackupJob>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl Orchestrator {
    pub fn new(ctx: AppContext, copier: Arc<dyn FileCopier>, cancel: CancellationToken) -> Self {
        Self {
            ctx,
            copier,
            cancel,
            running: Arc::new(AtomicBool::new(false)),
            last_job: Arc::new(Mutex::new(None)),
            worker: Mutex::new(None),
        }
    }

    /// Request a job start. Accepted only while idle; first caller to
    /// claim the slot wins and any concurrent request is rejected.
    pub fn start(&self, reason: TriggerReason) -> StartOutcome {
        if self
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            warn!(%reason, "Start request rejected, a job is already running");
            self.ctx
                .audit
                .warn(format!("start request ({reason}) rejected: job already running"));
            return StartOutcome::Rejected;
        }

        info!(%reason, "Backup job accepted");

        let config = self.ctx.config.clone();
        let audit = self.ctx.audit.clone();
        let copier = self.copier.clone();
        let cancel = self.cancel.clone();
        let running = self.running.clone();
        let last_job = self.last_job.clone();

        let handle = tokio::spawn(async move {
            let outcome =
                tokio::task::spawn_blocking(move || run_job(&config, audit, copier, cancel, reason))
                    .await;
            match outcome {
                Ok(job) => {
                    if let Ok(mut last) = last_job.lock() {
                        *last = Some(job);
                    }
                }
                Err(e) => error!(error = %e, "Job worker panicked"),
            }
            running.store(false, Ordering::SeqCst);
        });

        if let Ok(mut worker) = self.worker.lock() {
            *worker = Some(handle);
        }

        StartOutcome::Accepted
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Wait for the current job, if any, to release the slot.
    pub async fn wait_idle(&self) {
        let handle = match self.worker.lock() {
            Ok(mut worker) => worker.take(),
            Err(_) => None,
        };
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }

    /// The most recent terminal job.
    pub fn last_job(&self) -> Option<BackupJob> {
        self.last_job.lock().ok().and_then(|j| j.clone())
    }
}

enum RootOutcome {
    Completed,
    Aborted,
    CapacityReached,
    StopRequested,
}

/// One job, start to terminal status. Runs on a blocking worker.
fn run_job(
    config: &AppConfig,
    audit: AuditLog,
    copier: Arc<dyn FileCopier>,
    cancel: CancellationToken,
    reason: TriggerReason,
) -> BackupJob {
    let clock = Instant::now();
    let mut job = BackupJob::begin(Local::now());
    audit.log(
        AuditLevel::Info,
        Some(&job.id),
        &format!("backup started ({reason})"),
    );

    let dest_root = config.backup_base.join(&job.id);
    if let Err(e) = fs::create_dir_all(&dest_root) {
        error!(path = %dest_root.display(), error = %e, "Failed to create job directory");
        audit.log(
            AuditLevel::Error,
            Some(&job.id),
            &format!("cannot create job directory {}: {e}", dest_root.display()),
        );
        job.status = JobStatus::Failed;
        job.completed_at = Some(Local::now());
        return job;
    }

    let engine = CopyEngine::new(copier, config, audit.clone());
    let mut runner = JobRunner {
        config,
        audit: &audit,
        engine,
        cancel: &cancel,
        buffer: vec![0u8; config.copy_buffer_size],
        job,
        capacity_hit: false,
        stopped: false,
    };
    runner.run(&dest_root);

    let JobRunner {
        mut job,
        capacity_hit,
        stopped,
        ..
    } = runner;

    job.status = terminal_status(&job, capacity_hit, stopped);
    job.completed_at = Some(Local::now());

    let elapsed = clock.elapsed().as_secs();
    audit.log(
        AuditLevel::Info,
        Some(&job.id),
        &format!(
            "backup finished ({}): {} files, {} bytes, {}s",
            job.status, job.files_copied, job.bytes_copied, elapsed
        ),
    );
    info!(
        id = %job.id,
        status = %job.status,
        files = job.files_copied,
        bytes = job.bytes_copied,
        elapsed_secs = elapsed,
        "Backup job finished"
    );

    job
}

fn terminal_status(job: &BackupJob, capacity_hit: bool, stopped: bool) -> JobStatus {
    let all_aborted = !job.roots.is_empty() && job.roots.iter().all(|r| r.aborted);
    if all_aborted && job.files_copied == 0 {
        return JobStatus::Failed;
    }
    if capacity_hit || stopped || job.roots.iter().any(|r| r.aborted) {
        return JobStatus::PartiallyFailed;
    }
    JobStatus::Completed
}

struct JobRunner<'a> {
    config: &'a AppConfig,
    audit: &'a AuditLog,
    engine: CopyEngine,
    cancel: &'a CancellationToken,
    buffer: Vec<u8>,
    job: BackupJob,
    capacity_hit: bool,
    stopped: bool,
}

impl JobRunner<'_> {
    fn run(&mut self, dest_root: &Path) {
        for spec in self.config.path_specs() {
            if self.capacity_hit || self.stopped {
                break;
            }

            if spec.kind == PathKind::Optional && !spec.root.exists() {
                self.audit.log(
                    AuditLevel::Debug,
                    Some(&self.job.id),
                    &format!("optional root missing, skipped: {}", spec.root.display()),
                );
                continue;
            }

            let dest_dir = dest_root.join(spec.dest_name());
            let (result, outcome) = self.process_root(&spec, &dest_dir);
            self.job.roots.push(result);

            match outcome {
                RootOutcome::CapacityReached => self.capacity_hit = true,
                RootOutcome::StopRequested => self.stopped = true,
                RootOutcome::Completed | RootOutcome::Aborted => {}
            }
        }

        if !self.capacity_hit && !self.stopped {
            self.export_device_key(dest_root);
        }
    }

    /// Walk one root, copying every file into its mirrored destination.
    fn process_root(&mut self, spec: &PathSpec, dest_dir: &Path) -> (RootResult, RootOutcome) {
        let mut result = RootResult::new(&spec.root);
        let mut streak: u32 = 0;
        let mut streak_started: Option<Instant> = None;
        let reset_window = Duration::from_secs(self.config.error_reset_secs);

        let walker = PathWalker::new(&spec.root, self.config.max_path_length, self.audit.clone());
        for entry in walker {
            // Orderly stop is honored only here, at a task boundary.
            if self.cancel.is_cancelled() {
                self.audit.log(
                    AuditLevel::Info,
                    Some(&self.job.id),
                    "stop requested, job interrupted at task boundary",
                );
                return (result, RootOutcome::StopRequested);
            }

            if entry.is_dir {
                continue;
            }

            let size = fs::metadata(&entry.path).map(|m| m.len()).unwrap_or(0);
            if self.would_exceed_capacity(size) {
                return (result, RootOutcome::CapacityReached);
            }

            let relative = entry
                .path
                .strip_prefix(&spec.root)
                .expect("entry should be under the walk root");
            let mut task = CopyTask::new(&entry.path, dest_dir.join(relative), size);

            match self.engine.run(&mut task, &mut self.buffer) {
                Ok(bytes) => {
                    self.job.files_copied += 1;
                    self.job.bytes_copied += bytes;
                    result.files_copied += 1;
                    result.bytes_copied += bytes;
                    streak = 0;
                    streak_started = None;
                }
                Err(_) => {
                    self.job.error_count += 1;
                    result.error_count += 1;

                    let now = Instant::now();
                    match streak_started {
                        Some(since) if now.duration_since(since) > reset_window => {
                            streak = 1;
                            streak_started = Some(now);
                        }
                        Some(_) => streak += 1,
                        None => {
                            streak = 1;
                            streak_started = Some(now);
                        }
                    }

                    if streak >= self.config.max_consecutive_errors {
                        error!(
                            root = %spec.root.display(),
                            failures = streak,
                            "Consecutive failure ceiling reached, abandoning root"
                        );
                        let abandoned = JobError::ConsecutiveFailures {
                            root: spec.root.clone(),
                            count: streak,
                        };
                        self.audit
                            .log(AuditLevel::Error, Some(&self.job.id), &abandoned.to_string());
                        result.aborted = true;
                        return (result, RootOutcome::Aborted);
                    }
                }
            }
        }

        (result, RootOutcome::Completed)
    }

    /// The device key artifact is one extra task outside the normal roots.
    fn export_device_key(&mut self, dest_root: &Path) {
        if !self.config.export_device_key {
            return;
        }

        let source = &self.config.device_key_path;
        let metadata = match fs::metadata(source) {
            Ok(m) if m.is_file() => m,
            _ => {
                self.audit.log(
                    AuditLevel::Debug,
                    Some(&self.job.id),
                    &format!("device key absent, export skipped: {}", source.display()),
                );
                return;
            }
        };

        if self.would_exceed_capacity(metadata.len()) {
            return;
        }

        let name = source
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "device_key.dat".into());
        let mut task = CopyTask::new(source, dest_root.join(name), metadata.len());

        match self.engine.run(&mut task, &mut self.buffer) {
            Ok(bytes) => {
                self.job.files_copied += 1;
                self.job.bytes_copied += bytes;
                self.audit.log(
                    AuditLevel::Info,
                    Some(&self.job.id),
                    "device key exported",
                );
            }
            Err(_) => self.job.error_count += 1,
        }
    }

    /// Enforce the cumulative byte cap before issuing a task.
    fn would_exceed_capacity(&mut self, next_size: u64) -> bool {
        if self.job.bytes_copied + next_size <= self.config.max_backup_bytes {
            return false;
        }
        error!(
            copied = self.job.bytes_copied,
            limit = self.config.max_backup_bytes,
            "Backup capacity reached, abandoning remaining tasks"
        );
        let exceeded = JobError::CapacityExceeded {
            max_bytes: self.config.max_backup_bytes,
        };
        self.audit.log(
            AuditLevel::Error,
            Some(&self.job.id),
            &format!("{exceeded}, remaining tasks abandoned"),
        );
        self.capacity_hit = true;
        true
    }
}
