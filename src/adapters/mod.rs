use std::sync::Arc;

use crate::core::power::PowerAdapter;

#[cfg(target_os = "linux")]
mod linux;
mod simulated;

pub use simulated::{PowerSimulator, SimulatedPowerAdapter};

/// Select the power adapter for this run.
///
/// In simulation mode the battery level is driven from stdin
/// (`battery <percent>`), which is enough to exercise the trigger path on
/// a development machine.
pub fn get_adapter(simulation: bool) -> Arc<dyn PowerAdapter> {
    if simulation {
        let (adapter, controller) = SimulatedPowerAdapter::new();

        std::thread::spawn(move || {
            let stdin = std::io::stdin();
            for line in stdin.lines() {
                let Ok(cmd) = line else { break };
                let parts: Vec<&str> = cmd.trim().split_whitespace().collect();
                match (parts.first().copied(), parts.get(1)) {
                    (Some("battery"), Some(value)) => match value.parse::<u8>() {
                        Ok(percent) => controller.set_battery(percent),
                        Err(_) => println!("(Simulator) battery level must be 0-100"),
                    },
                    _ => println!("(Simulator) Use: 'battery <percent>'"),
                }
            }
        });

        return Arc::new(adapter);
    }

    #[cfg(target_os = "linux")]
    {
        Arc::new(linux::LinuxPowerAdapter::new())
    }

    #[cfg(not(target_os = "linux"))]
    {
        // No platform battery source; report full charge so the automatic
        // trigger stays quiet and only manual starts fire.
        let (adapter, controller) = SimulatedPowerAdapter::new();
        controller.set_battery(100);
        Arc::new(adapter)
    }
}
