//! Configuration schema for adb-courier

use crate::command::ExecutorConfig;
use crate::device::{DeviceEntry, DeviceRegistry};
use crate::scheduler::SchedulerConfig;
use crate::tasks::DeliverySettings;
use anyhow::{anyhow, bail, Context, Result};
use chrono::FixedOffset;
use courier_shared::defaults;
use serde::Deserialize;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Top-level configuration file schema
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct CourierConfig {
    pub bridge: BridgeConfig,
    pub scheduler: SchedulerSection,
    pub storage: StorageConfig,
    /// Ordered device mapping; order breaks reverse-lookup ties
    pub devices: Vec<DeviceEntry>,
    /// Remote storage root per device id
    pub remote_roots: HashMap<String, String>,
}

/// Device bridge process settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Path or name of the adb binary
    pub adb_path: PathBuf,
    pub max_retry: u32,
    pub retry_interval_ms: u64,
    pub command_timeout_secs: u64,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            adb_path: PathBuf::from("adb"),
            max_retry: defaults::MAX_RETRY,
            retry_interval_ms: defaults::RETRY_INTERVAL.as_millis() as u64,
            command_timeout_secs: defaults::COMMAND_TIMEOUT.as_secs(),
        }
    }
}

/// Job scheduler settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SchedulerSection {
    /// Fixed UTC offset for fire times and time buckets (no DST)
    pub utc_offset_hours: i32,
    pub misfire_grace_secs: u64,
    /// Interval between trigger checks
    pub tick_millis: u64,
}

impl Default for SchedulerSection {
    fn default() -> Self {
        Self {
            utc_offset_hours: 8,
            misfire_grace_secs: defaults::MISFIRE_GRACE.as_secs(),
            tick_millis: 500,
        }
    }
}

/// Local staging and deferred-work settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Root of `<device_name>/<YYYYMMDDHHMMSS>/` upload folders
    pub staging_root: PathBuf,
    /// Delay of the deferred cleanup after the upload instant
    pub cleanup_delay_secs: u64,
    /// Remote root for device ids missing from `remote_roots`
    pub default_remote_root: String,
    /// Offset bucket folder names are rendered in, independent of the
    /// scheduler offset
    pub bucket_utc_offset_hours: i32,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            staging_root: PathBuf::from("uploads"),
            cleanup_delay_secs: 3600,
            default_remote_root: defaults::REMOTE_ROOT.to_string(),
            bucket_utc_offset_hours: 0,
        }
    }
}

impl CourierConfig {
    /// Load and validate a configuration file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;
        Self::from_toml_str(&content).with_context(|| format!("in {}", path.display()))
    }

    /// Parse and validate configuration text
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: CourierConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject mappings the registry cannot represent unambiguously
    pub fn validate(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for entry in &self.devices {
            if entry.name.trim().is_empty() || entry.id.trim().is_empty() {
                bail!("device entries need a non-empty name and id");
            }
            if !seen.insert(entry.name.as_str()) {
                bail!("duplicate device name: {}", entry.name);
            }
        }
        self.timezone()?;
        self.bucket_offset()?;
        Ok(())
    }

    /// Scheduler timezone
    pub fn timezone(&self) -> Result<FixedOffset> {
        offset_from_hours("utc_offset_hours", self.scheduler.utc_offset_hours)
    }

    /// Offset of staging and remote bucket names
    pub fn bucket_offset(&self) -> Result<FixedOffset> {
        offset_from_hours("bucket_utc_offset_hours", self.storage.bucket_utc_offset_hours)
    }

    pub fn registry(&self) -> DeviceRegistry {
        DeviceRegistry::new(self.devices.clone(), self.remote_roots.clone())
            .with_default_remote_root(&self.storage.default_remote_root)
    }

    pub fn executor_config(&self) -> ExecutorConfig {
        ExecutorConfig {
            max_retry: self.bridge.max_retry,
            retry_interval: Duration::from_millis(self.bridge.retry_interval_ms),
            command_timeout: Duration::from_secs(self.bridge.command_timeout_secs),
        }
    }

    pub fn scheduler_config(&self) -> Result<SchedulerConfig> {
        Ok(SchedulerConfig {
            timezone: self.timezone()?,
            misfire_grace: Duration::from_secs(self.scheduler.misfire_grace_secs),
            tick: Duration::from_millis(self.scheduler.tick_millis.max(10)),
        })
    }

    pub fn delivery_settings(&self) -> Result<DeliverySettings> {
        Ok(DeliverySettings {
            staging_root: self.storage.staging_root.clone(),
            bucket_offset: self.bucket_offset()?,
            cleanup_delay: Duration::from_secs(self.storage.cleanup_delay_secs),
        })
    }
}

fn offset_from_hours(field: &str, hours: i32) -> Result<FixedOffset> {
    hours
        .checked_mul(3600)
        .and_then(FixedOffset::east_opt)
        .ok_or_else(|| anyhow!("{} out of range: {}", field, hours))
}
