use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{GpuError, Result};

pub const ENV_REPORT_INTERVAL: &str = "GPUWATCH_REPORT_INTERVAL";
pub const ENV_RETRY_WAIT_MS: &str = "GPUWATCH_RETRY_WAIT_MS";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GpuwatchConfig {
    /// Seconds between snapshots taken by the reporting loop
    pub report_interval_secs: u64,
    /// Pause before restarting a collector whose tool failed
    pub retry_wait_ms: u64,
    /// Bounded collectors stop once failures exceed this
    pub max_failure_retries: u32,
    pub nvidia_smi_interval_secs: u32,
    pub tegrastats_interval_ms: u32,
    pub rocm_smi_interval_ms: u64,
    pub intel_gpu_top_interval_ms: u64,
}

impl Default for GpuwatchConfig {
    fn default() -> Self {
        Self {
            report_interval_secs: 60,
            retry_wait_ms: 5000,
            max_failure_retries: 5,
            nvidia_smi_interval_secs: 4,
            tegrastats_interval_ms: 3700,
            rocm_smi_interval_ms: 4300,
            intel_gpu_top_interval_ms: 4000,
        }
    }
}

impl GpuwatchConfig {
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_json_str(&content)
    }

    /// Override fields from `GPUWATCH_*` environment variables
    pub fn apply_env(&mut self) -> Result<()> {
        self.apply_vars(|key| std::env::var(key).ok())
    }

    /// Override fields from an arbitrary variable source
    pub fn apply_vars<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = lookup(ENV_REPORT_INTERVAL) {
            self.report_interval_secs = parse_var(ENV_REPORT_INTERVAL, &value)?;
        }
        if let Some(value) = lookup(ENV_RETRY_WAIT_MS) {
            self.retry_wait_ms = parse_var(ENV_RETRY_WAIT_MS, &value)?;
        }
        self.validate()
    }

    pub fn validate(&self) -> Result<()> {
        if self.report_interval_secs == 0 {
            return Err(GpuError::Config(
                "report_interval_secs must be greater than zero".to_string(),
            ));
        }
        if self.nvidia_smi_interval_secs == 0
            || self.tegrastats_interval_ms == 0
            || self.rocm_smi_interval_ms == 0
            || self.intel_gpu_top_interval_ms == 0
        {
            return Err(GpuError::Config(
                "tool polling intervals must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    pub fn report_interval(&self) -> Duration {
        Duration::from_secs(self.report_interval_secs)
    }

    pub fn retry_wait(&self) -> Duration {
        Duration::from_millis(self.retry_wait_ms)
    }

    pub fn rocm_smi_interval(&self) -> Duration {
        Duration::from_millis(self.rocm_smi_interval_ms)
    }

    pub fn intel_gpu_top_interval(&self) -> Duration {
        Duration::from_millis(self.intel_gpu_top_interval_ms)
    }
}

fn parse_var(key: &str, value: &str) -> Result<u64> {
    value
        .trim()
        .parse()
        .map_err(|_| GpuError::Config(format!("{key} must be an unsigned integer, got {value:?}")))
}
