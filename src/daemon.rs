//! Module lifecycle exposed to the host: start spawns the trigger
//! monitor, stop shuts everything down cooperatively.

use std::fs;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::context::AppContext;
use crate::core::copy::{FileCopier, NativeCopier};
use crate::core::models::TriggerReason;
use crate::core::monitor::TriggerMonitor;
use crate::core::orchestrator::{Orchestrator, StartOutcome};
use crate::core::power::PowerAdapter;

pub struct Daemon {
    ctx: AppContext,
    adapter: Arc<dyn PowerAdapter>,
    orchestrator: Arc<Orchestrator>,
    cancel: CancellationToken,
    monitor: Option<JoinHandle<()>>,
}

impl Daemon {
    pub fn new(ctx: AppContext, adapter: Arc<dyn PowerAdapter>) -> Self {
        let cancel = CancellationToken::new();
        let copier: Arc<dyn FileCopier> = Arc::new(NativeCopier);
        let orchestrator = Arc::new(Orchestrator::new(ctx.clone(), copier, cancel.clone()));

        Self {
            ctx,
            adapter,
            orchestrator,
            cancel,
            monitor: None,
        }
    }

    /// Create the on-disk layout and spawn the background monitor.
    pub fn start(&mut self) -> Result<()> {
        let config = &self.ctx.config;
        fs::create_dir_all(&config.backup_base).with_context(|| {
            format!("Failed to create backup base {}", config.backup_base.display())
        })?;

        let monitor = TriggerMonitor::new(
            self.ctx.clone(),
            self.adapter.clone(),
            self.orchestrator.clone(),
            self.cancel.clone(),
        );
        self.monitor = Some(tokio::spawn(monitor.run()));

        self.ctx.audit.info("daemon started");
        info!("Daemon started");
        Ok(())
    }

    /// Manual trigger entry point. Returns immediately with the slot
    /// decision; a running job means rejection, never queueing.
    pub fn trigger_manual(&self) -> StartOutcome {
        self.orchestrator.start(TriggerReason::Manual)
    }

    pub fn orchestrator(&self) -> Arc<Orchestrator> {
        self.orchestrator.clone()
    }

    /// Cooperative shutdown: signal, let a running job reach its next task
    /// boundary, then join the monitor.
    pub async fn stop(mut self) {
        self.cancel.cancel();
        self.orchestrator.wait_idle().await;
        if let Some(monitor) = self.monitor.take() {
            let _ = monitor.await;
        }
        self.ctx.audit.info("daemon stopped");
        info!("Daemon stopped");
    }
}
