use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result, bail};

use crate::core::power::PowerAdapter;

const POWER_SUPPLY_DIR: &str = "/sys/class/power_supply";

/// Battery readings via the kernel's power_supply sysfs class.
pub struct LinuxPowerAdapter {
    sysfs_root: PathBuf,
}

impl LinuxPowerAdapter {
    pub fn new() -> Self {
        Self {
            sysfs_root: PathBuf::from(POWER_SUPPLY_DIR),
        }
    }

    #[cfg(test)]
    fn with_root(root: PathBuf) -> Self {
        Self { sysfs_root: root }
    }

    /// First supply of type "Battery" under the sysfs root.
    fn find_battery(&self) -> Result<PathBuf> {
        let entries = fs::read_dir(&self.sysfs_root)
            .with_context(|| format!("Failed to read {}", self.sysfs_root.display()))?;

        for entry in entries.flatten() {
            let supply = entry.path();
            let Ok(kind) = fs::read_to_string(supply.join("type")) else {
                continue;
            };
            if kind.trim() == "Battery" {
                return Ok(supply);
            }
        }

        bail!("no battery found under {}", self.sysfs_root.display())
    }
}

impl Default for LinuxPowerAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl PowerAdapter for LinuxPowerAdapter {
    fn battery_percent(&self) -> Result<u8> {
        let battery = self.find_battery()?;
        let capacity_path = battery.join("capacity");
        let raw = fs::read_to_string(&capacity_path)
            .with_context(|| format!("Failed to read {}", capacity_path.display()))?;

        let percent: u8 = raw
            .trim()
            .parse()
            .with_context(|| format!("Invalid battery capacity value: {raw:?}"))?;

        Ok(percent.min(100))
    }

    fn describe(&self) -> &'static str {
        "linux sysfs"
    }
}
