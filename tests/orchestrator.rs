use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use bkmond::audit::AuditLevel;
use bkmond::config::AppConfig;
use bkmond::context::AppContext;
use bkmond::core::copy::{FileCopier, NativeCopier};
use bkmond::core::models::{BackupJob, JobStatus, TriggerReason};
use bkmond::core::orchestrator::{Orchestrator, StartOutcome};
use tokio_util::sync::CancellationToken;

fn test_config(base: &Path, critical: Vec<PathBuf>, optional: Vec<PathBuf>) -> AppConfig {
    AppConfig {
        backup_base: base.join("backups"),
        audit_log_path: base.join("audit.log"),
        critical_paths: critical,
        optional_paths: optional,
        monitoring_interval_secs: 3600,
        initial_delay_secs: 0,
        retry_attempts: 1,
        retry_delay_ms: 0,
        yield_interval_us: 0,
        log_level: AuditLevel::Debug,
        export_device_key: false,
        ..Default::default()
    }
}

fn make_files(root: &Path, count: usize, size: usize) {
    fs::create_dir_all(root).unwrap();
    for i in 0..count {
        fs::write(root.join(format!("f{i:04}.dat")), vec![b'x'; size]).unwrap();
    }
}

fn orchestrator(config: AppConfig, copier: Arc<dyn FileCopier>) -> Orchestrator {
    Orchestrator::new(AppContext::new(config), copier, CancellationToken::new())
}

async fn run_job(orch: &Orchestrator, reason: TriggerReason) -> BackupJob {
    assert_eq!(orch.start(reason), StartOutcome::Accepted);
    orch.wait_idle().await;
    orch.last_job().expect("job should have run")
}

/// Fails persistently for the named files, copies everything else.
struct FlakyCopier {
    fail_names: Vec<String>,
    failed_calls: AtomicU32,
}

impl FlakyCopier {
    fn failing(names: &[&str]) -> Self {
        Self {
            fail_names: names.iter().map(|s| s.to_string()).collect(),
            failed_calls: AtomicU32::new(0),
        }
    }
}

impl FileCopier for FlakyCopier {
    fn copy_file(
        &self,
        source: &Path,
        dest: &Path,
        buffer: &mut [u8],
        yield_interval: Duration,
    ) -> io::Result<u64> {
        let name = source
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        if self.fail_names.contains(&name) {
            self.failed_calls.fetch_add(1, Ordering::SeqCst);
            return Err(io::Error::from_raw_os_error(libc::EIO));
        }
        NativeCopier.copy_file(source, dest, buffer, yield_interval)
    }
}

#[tokio::test]
async fn mirrors_roots_into_timestamped_job_directory() {
    let temp = tempfile::tempdir().unwrap();
    let root_a = temp.path().join("app");
    let root_b = temp.path().join("registry");
    make_files(&root_a, 3, 100);
    fs::create_dir_all(root_b.join("sub")).unwrap();
    fs::write(root_b.join("sub/conf.dat"), b"conf").unwrap();

    let config = test_config(temp.path(), vec![root_a.clone(), root_b.clone()], vec![]);
    let orch = orchestrator(config, Arc::new(NativeCopier));
    let job = run_job(&orch, TriggerReason::Manual).await;

    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.files_copied, 4);
    assert_eq!(job.bytes_copied, 304);
    assert_eq!(job.error_count, 0);

    let job_dir = temp.path().join("backups").join(&job.id);
    assert!(job_dir.join("app/f0000.dat").exists());
    assert_eq!(
        fs::read(job_dir.join("registry/sub/conf.dat")).unwrap(),
        b"conf"
    );
}

#[tokio::test]
async fn concurrent_start_is_rejected_not_queued() {
    let temp = tempfile::tempdir().unwrap();
    let root = temp.path().join("data");
    make_files(&root, 200, 64);

    let mut config = test_config(temp.path(), vec![root], vec![]);
    // Slow the job down so the second request lands while it runs.
    config.yield_interval_us = 2000;
    let audit_path = config.audit_log_path.clone();

    let orch = orchestrator(config, Arc::new(NativeCopier));
    assert_eq!(orch.start(TriggerReason::LowBattery), StartOutcome::Accepted);
    assert!(orch.is_running());
    assert_eq!(orch.start(TriggerReason::Manual), StartOutcome::Rejected);

    orch.wait_idle().await;
    assert!(!orch.is_running());

    let log = fs::read_to_string(audit_path).unwrap();
    assert!(log.contains("WARN start request (manual) rejected"));

    // Slot is free again after the job reaches a terminal status.
    assert_eq!(orch.start(TriggerReason::Manual), StartOutcome::Accepted);
    orch.wait_idle().await;
}

#[tokio::test]
async fn critical_roots_processed_before_optional() {
    let temp = tempfile::tempdir().unwrap();
    let critical = temp.path().join("critical");
    let optional = temp.path().join("optional");
    make_files(&critical, 2, 10);
    make_files(&optional, 1, 10);

    let config = test_config(temp.path(), vec![critical.clone()], vec![optional.clone()]);
    let orch = orchestrator(config, Arc::new(NativeCopier));
    let job = run_job(&orch, TriggerReason::Manual).await;

    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.roots.len(), 2);
    assert_eq!(job.roots[0].root, critical);
    assert_eq!(job.roots[1].root, optional);
}

#[tokio::test]
async fn missing_optional_root_produces_no_tasks_and_no_error() {
    let temp = tempfile::tempdir().unwrap();
    let critical = temp.path().join("critical");
    make_files(&critical, 2, 10);

    let config = test_config(
        temp.path(),
        vec![critical],
        vec![temp.path().join("never-created")],
    );
    let orch = orchestrator(config, Arc::new(NativeCopier));
    let job = run_job(&orch, TriggerReason::Manual).await;

    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.error_count, 0);
    // The absent optional root was never attempted.
    assert_eq!(job.roots.len(), 1);
}

#[tokio::test]
async fn isolated_failure_does_not_escalate() {
    // 1200 files with exactly one persistent failure at #700: everything
    // else copies and the job still completes.
    let temp = tempfile::tempdir().unwrap();
    let root = temp.path().join("data");
    make_files(&root, 1200, 8);

    let config = test_config(temp.path(), vec![root], vec![]);
    let copier = Arc::new(FlakyCopier::failing(&["f0700.dat"]));
    let orch = orchestrator(config, copier);
    let job = run_job(&orch, TriggerReason::Manual).await;

    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.files_copied, 1199);
    assert_eq!(job.error_count, 1);
    assert!(!job.roots[0].aborted);
}

#[tokio::test]
async fn persistently_failing_task_attempted_exactly_the_ceiling() {
    let temp = tempfile::tempdir().unwrap();
    let root = temp.path().join("data");
    make_files(&root, 3, 8);

    let mut config = test_config(temp.path(), vec![root], vec![]);
    config.retry_attempts = 4;
    let copier = Arc::new(FlakyCopier::failing(&["f0001.dat"]));
    let orch = orchestrator(config, copier.clone());
    let job = run_job(&orch, TriggerReason::Manual).await;

    assert_eq!(job.error_count, 1);
    assert_eq!(copier.failed_calls.load(Ordering::SeqCst), 4);
}

#[tokio::test]
async fn capacity_cap_halts_job_as_partially_failed() {
    // 150 KB of source against a 100 KB cap.
    let temp = tempfile::tempdir().unwrap();
    let root = temp.path().join("data");
    make_files(&root, 15, 10_000);

    let mut config = test_config(temp.path(), vec![root], vec![]);
    config.max_backup_bytes = 100_000;
    let audit_path = config.audit_log_path.clone();

    let orch = orchestrator(config, Arc::new(NativeCopier));
    let job = run_job(&orch, TriggerReason::Manual).await;

    assert_eq!(job.status, JobStatus::PartiallyFailed);
    assert_eq!(job.files_copied, 10);
    assert!(job.bytes_copied <= 100_000);

    let log = fs::read_to_string(audit_path).unwrap();
    assert!(log.contains("capacity"));
}

#[tokio::test]
async fn consecutive_failures_abandon_root_but_not_job() {
    // Six consecutive persistent failures against a ceiling of five: the
    // first root is abandoned, the second still fully processed.
    let temp = tempfile::tempdir().unwrap();
    let root_a = temp.path().join("aaa");
    let root_b = temp.path().join("bbb");
    make_files(&root_a, 10, 8);
    make_files(&root_b, 5, 8);

    let config = test_config(temp.path(), vec![root_a, root_b], vec![]);
    let copier = Arc::new(FlakyCopier::failing(&[
        "f0002.dat", "f0003.dat", "f0004.dat", "f0005.dat", "f0006.dat", "f0007.dat",
    ]));
    let orch = orchestrator(config, copier);
    let job = run_job(&orch, TriggerReason::Manual).await;

    assert_eq!(job.status, JobStatus::PartiallyFailed);
    assert_eq!(job.roots.len(), 2);

    let first = &job.roots[0];
    assert!(first.aborted);
    assert_eq!(first.files_copied, 2); // f0000, f0001
    assert_eq!(first.error_count, 5); // abandoned at the ceiling

    let second = &job.roots[1];
    assert!(!second.aborted);
    assert_eq!(second.files_copied, 5);
}

#[tokio::test]
async fn job_with_only_aborted_roots_is_failed() {
    let temp = tempfile::tempdir().unwrap();
    let root = temp.path().join("data");
    make_files(&root, 6, 8);

    let config = test_config(temp.path(), vec![root], vec![]);
    let copier = Arc::new(FlakyCopier::failing(&[
        "f0000.dat", "f0001.dat", "f0002.dat", "f0003.dat", "f0004.dat", "f0005.dat",
    ]));
    let orch = orchestrator(config, copier);
    let job = run_job(&orch, TriggerReason::Manual).await;

    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(job.files_copied, 0);
}

#[tokio::test]
async fn device_key_exported_as_extra_task() {
    let temp = tempfile::tempdir().unwrap();
    let root = temp.path().join("data");
    make_files(&root, 2, 10);
    let key_path = temp.path().join("device_key.dat");
    fs::write(&key_path, b"key-material").unwrap();

    let mut config = test_config(temp.path(), vec![root], vec![]);
    config.export_device_key = true;
    config.device_key_path = key_path;

    let orch = orchestrator(config, Arc::new(NativeCopier));
    let job = run_job(&orch, TriggerReason::Manual).await;

    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.files_copied, 3);

    let exported = temp
        .path()
        .join("backups")
        .join(&job.id)
        .join("device_key.dat");
    assert_eq!(fs::read(exported).unwrap(), b"key-material");
}

#[tokio::test]
async fn stop_request_honored_at_task_boundary() {
    let temp = tempfile::tempdir().unwrap();
    let root = temp.path().join("data");
    make_files(&root, 300, 64);

    let mut config = test_config(temp.path(), vec![root], vec![]);
    config.yield_interval_us = 2000;

    let cancel = CancellationToken::new();
    let orch = Orchestrator::new(AppContext::new(config), Arc::new(NativeCopier), cancel.clone());

    assert_eq!(orch.start(TriggerReason::Manual), StartOutcome::Accepted);
    tokio::time::sleep(Duration::from_millis(50)).await;
    cancel.cancel();
    orch.wait_idle().await;

    let job = orch.last_job().expect("job should have run");
    assert_eq!(job.status, JobStatus::PartiallyFailed);
    assert!(job.files_copied > 0);
    assert!(job.files_copied < 300);
}
