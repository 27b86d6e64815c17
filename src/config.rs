use std::path::PathBuf;

use anyhow::{Context, Result, ensure};
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};

use crate::audit::AuditLevel;
use crate::core::models::PathSpec;

const DEFAULT_CONFIG_PATH: &str = "/etc/bkmond/config.toml";

/// Complete validated parameter set. Constructed once at startup; the
/// daemon never reparses configuration at runtime.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Job directories are created under here, one per backup run.
    pub backup_base: PathBuf,
    /// Audit log file location.
    pub audit_log_path: PathBuf,

    /// Roots that are always attempted, in declared order.
    pub critical_paths: Vec<PathBuf>,
    /// Roots attempted only when present, in declared order.
    pub optional_paths: Vec<PathBuf>,

    /// Battery percentage at or below which a backup is triggered.
    pub battery_threshold: u8,
    /// Seconds between trigger evaluations.
    pub monitoring_interval_secs: u64,
    /// Seconds to wait after startup before the first evaluation.
    pub initial_delay_secs: u64,

    /// Size of the reusable copy buffer, in bytes.
    pub copy_buffer_size: usize,
    /// Microseconds yielded back to the host between copy slices.
    pub yield_interval_us: u64,
    /// Cumulative byte cap for one job.
    pub max_backup_bytes: u64,
    /// Entries with longer resolved paths are skipped.
    pub max_path_length: usize,

    /// Attempt ceiling per copy task.
    pub retry_attempts: u32,
    /// Fixed delay between attempts, in milliseconds.
    pub retry_delay_ms: u64,
    /// Consecutive failures within one root before its walk is abandoned.
    pub max_consecutive_errors: u32,
    /// A failure streak older than this restarts the count.
    pub error_reset_secs: u64,

    pub max_log_bytes: u64,
    pub max_log_entries: u64,
    pub log_level: AuditLevel,

    /// Copy the device key artifact into each job directory when present.
    pub export_device_key: bool,
    pub device_key_path: PathBuf,

    /// Use the simulated power adapter instead of platform hardware.
    pub simulation: bool,
    pub verbose: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            backup_base: PathBuf::from("/var/lib/bkmond/backups"),
            audit_log_path: PathBuf::from("/var/lib/bkmond/audit.log"),
            critical_paths: vec![
                PathBuf::from("/var/lib/device/app"),
                PathBuf::from("/var/lib/device/data"),
                PathBuf::from("/etc/device/registry"),
            ],
            optional_paths: vec![PathBuf::from("/var/lib/device/saves")],
            battery_threshold: 20,
            monitoring_interval_secs: 300,
            initial_delay_secs: 10,
            copy_buffer_size: 8192,
            yield_interval_us: 1000,
            max_backup_bytes: 1024 * 1024 * 1024,
            max_path_length: 512,
            retry_attempts: 3,
            retry_delay_ms: 1000,
            max_consecutive_errors: 5,
            error_reset_secs: 300,
            max_log_bytes: 10 * 1024 * 1024,
            max_log_entries: 1000,
            log_level: AuditLevel::Info,
            export_device_key: true,
            device_key_path: PathBuf::from("/etc/device/device_key.dat"),
            simulation: false,
            verbose: false,
        }
    }
}

impl AppConfig {
    /// Defaults, overlaid with the config file, `BKMOND_*` environment
    /// variables, and finally any CLI overrides.
    pub fn load<T: Serialize>(overrides: Option<&T>) -> Result<Self> {
        let config_path = Env::var_or("BKMOND_CONFIG", DEFAULT_CONFIG_PATH);

        let mut figment = Figment::from(Serialized::defaults(AppConfig::default()))
            .merge(Toml::file(config_path))
            .merge(Env::prefixed("BKMOND_"));

        if let Some(overrides) = overrides {
            figment = figment.merge(Serialized::defaults(overrides));
        }

        let config: AppConfig = figment.extract().context("Failed to load configuration")?;
        config.validate()?;
        Ok(config)
    }

    /// Reject out-of-range values before anything touches the filesystem.
    pub fn validate(&self) -> Result<()> {
        ensure!(
            self.battery_threshold <= 100,
            "battery_threshold must be between 0 and 100"
        );
        ensure!(
            self.monitoring_interval_secs >= 1,
            "monitoring_interval_secs must be at least 1 second"
        );
        ensure!(
            self.copy_buffer_size >= 1024,
            "copy_buffer_size must be at least 1024 bytes"
        );
        ensure!(
            self.max_path_length >= 64,
            "max_path_length must be at least 64"
        );
        ensure!(self.max_backup_bytes > 0, "max_backup_bytes must be nonzero");
        ensure!(self.retry_attempts >= 1, "retry_attempts must be at least 1");
        ensure!(
            self.max_consecutive_errors >= 1,
            "max_consecutive_errors must be at least 1"
        );
        ensure!(
            !self.critical_paths.is_empty(),
            "at least one critical path must be configured"
        );
        ensure!(self.max_log_bytes > 0, "max_log_bytes must be nonzero");
        ensure!(self.max_log_entries > 0, "max_log_entries must be nonzero");
        Ok(())
    }

    /// Configured roots in processing order: critical first, then optional.
    pub fn path_specs(&self) -> Vec<PathSpec> {
        self.critical_paths
            .iter()
            .map(PathSpec::critical)
            .chain(self.optional_paths.iter().map(PathSpec::optional))
            .collect()
    }
}
