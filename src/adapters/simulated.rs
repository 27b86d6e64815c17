use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};

use anyhow::Result;

use crate::core::power::PowerAdapter;

/// Controller handle for driving the simulated battery from tests or the
/// stdin bridge.
#[derive(Clone)]
pub struct PowerSimulator {
    level: Arc<AtomicU8>,
}

impl PowerSimulator {
    pub fn set_battery(&self, percent: u8) {
        self.level.store(percent.min(100), Ordering::SeqCst);
    }
}

/// Battery source whose readings are whatever the controller last set.
pub struct SimulatedPowerAdapter {
    level: Arc<AtomicU8>,
}

impl SimulatedPowerAdapter {
    pub fn new() -> (Self, PowerSimulator) {
        let level = Arc::new(AtomicU8::new(100));
        (
            Self {
                level: level.clone(),
            },
            PowerSimulator { level },
        )
    }
}

impl PowerAdapter for SimulatedPowerAdapter {
    fn battery_percent(&self) -> Result<u8> {
        Ok(self.level.load(Ordering::SeqCst))
    }

    fn describe(&self) -> &'static str {
        "simulated"
    }
}
