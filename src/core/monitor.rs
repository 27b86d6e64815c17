use std::sync::Arc;
use std::time::Duration;

use chrono::Local;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::context::AppContext;
use crate::core::models::TriggerReason;
use crate::core::orchestrator::Orchestrator;
use crate::core::power::PowerAdapter;

/// Background loop that evaluates trigger conditions and requests job
/// starts from the orchestrator.
///
/// One wake per monitoring interval after an initial stabilization delay.
/// Start requests are never queued: if the job slot is busy the
/// orchestrator rejects and logs, and the loop simply waits for the next
/// wake.
pub struct TriggerMonitor {
    ctx: AppContext,
    adapter: Arc<dyn PowerAdapter>,
    orchestrator: Arc<Orchestrator>,
    cancel: CancellationToken,
}

impl TriggerMonitor {
    pub fn new(
        ctx: AppContext,
        adapter: Arc<dyn PowerAdapter>,
        orchestrator: Arc<Orchestrator>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            ctx,
            adapter,
            orchestrator,
            cancel,
        }
    }

    pub async fn run(self) {
        let config = &self.ctx.config;
        let interval = Duration::from_secs(config.monitoring_interval_secs);
        let initial_delay = Duration::from_secs(config.initial_delay_secs);

        info!(
            adapter = self.adapter.describe(),
            threshold = config.battery_threshold,
            interval_secs = config.monitoring_interval_secs,
            "Trigger monitor starting"
        );

        // Let the host settle before the first sample.
        tokio::select! {
            _ = self.cancel.cancelled() => return,
            _ = tokio::time::sleep(initial_delay) => {}
        }

        loop {
            let slept_at = Local::now();
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = tokio::time::sleep(interval) => {}
            }

            // A sleep that spanned far more wall-clock time than asked
            // means the host suspended underneath us. Skip this tick so a
            // backup never starts mid-resume.
            let spanned = Local::now().signed_duration_since(slept_at);
            if spanned.num_milliseconds() > (interval.as_millis() * 2) as i64 {
                info!(spanned_secs = spanned.num_seconds(), "Resumed from host suspend");
                self.ctx.audit.info("host resumed from suspend, trigger check skipped");
                continue;
            }

            self.evaluate();
        }

        info!("Trigger monitor stopped");
    }

    fn evaluate(&self) {
        let level = match self.adapter.battery_percent() {
            Ok(level) => level,
            Err(e) => {
                warn!(error = %e, "Battery sample failed");
                return;
            }
        };

        debug!(level, threshold = self.ctx.config.battery_threshold, "Battery sampled");

        if level <= self.ctx.config.battery_threshold {
            self.orchestrator.start(TriggerReason::LowBattery);
        }
    }
}
