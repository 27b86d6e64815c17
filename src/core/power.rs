use anyhow::Result;

/// Source of the battery readings the trigger loop samples.
///
/// Implementations live in `crate::adapters`: a sysfs reader on Linux and
/// a scriptable simulator for tests and development.
pub trait PowerAdapter: Send + Sync {
    /// Current battery charge, 0–100.
    fn battery_percent(&self) -> Result<u8>;

    /// Human-readable adapter name for startup logging.
    fn describe(&self) -> &'static str;
}
