use std::sync::Arc;

use crate::audit::{AuditLimits, AuditLog};
use crate::config::AppConfig;

/// Shared handles threaded through the daemon's components.
#[derive(Clone)]
pub struct AppContext {
    pub config: Arc<AppConfig>,
    pub audit: AuditLog,
}

impl AppContext {
    pub fn new(config: AppConfig) -> Self {
        let audit = AuditLog::open(
            &config.audit_log_path,
            AuditLimits {
                max_bytes: config.max_log_bytes,
                max_entries: config.max_log_entries,
                max_level: config.log_level,
            },
        );

        Self {
            config: Arc::new(config),
            audit,
        }
    }
}
