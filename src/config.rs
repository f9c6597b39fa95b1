//! Scheduler Configuration
//!
//! Runtime settings for the extender. Defaults match the values the
//! scheduler ships with; a YAML file can override any subset of them.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

/// Weights used to combine priority functions at the extender boundary
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct PriorityWeights {
    /// Weight of the exclusive-resource count match score
    pub count_match: u32,
    /// Weight of the LVM capacity match score
    pub capacity_match: u32,
}

impl Default for PriorityWeights {
    fn default() -> Self {
        Self {
            count_match: 1,
            capacity_match: 1,
        }
    }
}

/// Complete scheduler configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SchedulerConfig {
    /// Extender HTTP bind address
    pub bind_addr: SocketAddr,
    /// Predicate/priority calls slower than this are logged with step timings
    #[serde(with = "duration_millis")]
    pub slow_call_threshold: Duration,
    /// Interval of the pending pod re-trigger loop
    #[serde(with = "duration_millis")]
    pub trigger_pending_pod_cycle: Duration,
    /// Maximum number of pods patched per re-trigger tick
    pub reschedule_batch_size: usize,
    /// Pause between two pod patches in one tick
    #[serde(with = "duration_millis")]
    pub reschedule_patch_interval: Duration,
    /// Priority weights
    pub weights: PriorityWeights,
    /// Name of the NodeLocalStorageInitConfig driving per-node configuration
    pub init_config_name: String,
    /// Period of the NodeLocalStorage reconcile pass
    #[serde(with = "duration_millis")]
    pub init_config_resync: Duration,
    /// Capacity of the ledger event broadcast channel
    pub event_channel_capacity: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 23000)),
            slow_call_threshold: Duration::from_millis(50),
            trigger_pending_pod_cycle: Duration::from_secs(60),
            reschedule_batch_size: 300,
            reschedule_patch_interval: Duration::from_secs(1),
            weights: PriorityWeights::default(),
            init_config_name: "open-local".to_string(),
            init_config_resync: Duration::from_secs(30),
            event_channel_capacity: 1024,
        }
    }
}

impl SchedulerConfig {
    /// Load a configuration file, falling back to defaults for absent keys
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        let config: SchedulerConfig = serde_yaml::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the scheduler cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.reschedule_batch_size == 0 {
            return Err(Error::Configuration(
                "rescheduleBatchSize must be greater than zero".into(),
            ));
        }
        if self.weights.count_match == 0 && self.weights.capacity_match == 0 {
            return Err(Error::Configuration(
                "at least one priority weight must be non-zero".into(),
            ));
        }
        if self.event_channel_capacity == 0 {
            return Err(Error::Configuration(
                "eventChannelCapacity must be greater than zero".into(),
            ));
        }
        if self.init_config_resync.is_zero() {
            return Err(Error::Configuration(
                "initConfigResync must be greater than zero".into(),
            ));
        }
        if self.trigger_pending_pod_cycle.is_zero() {
            return Err(Error::Configuration(
                "triggerPendingPodCycle must be greater than zero".into(),
            ));
        }
        Ok(())
    }
}

mod duration_millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(deserializer)?))
    }
}
