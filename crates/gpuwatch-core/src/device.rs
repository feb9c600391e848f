//! Canonical per-device GPU record shared by every vendor parser

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// nvidia-smi reports memory in MiB
const MEBIBYTES_IN_A_MEGABYTE: f64 = 1.024;
/// tegrastats reports power in mW
const MILLIWATTS_IN_A_WATT: f64 = 1000.0;
const BYTES_IN_A_MEGABYTE: f64 = 1_000_000.0;

/// Accumulating sample for one GPU.
///
/// `temperature` and the memory fields are last-observed values. `usage` and
/// `power` are running sums divided by `sample_count` when a snapshot is taken.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceSample {
    pub name: String,
    pub temperature: f64,
    pub memory_used: f64,
    pub memory_total: f64,
    pub usage: f64,
    pub power: f64,
    #[serde(skip)]
    pub sample_count: u32,
}

impl DeviceSample {
    /// Empty entry carrying only the vendor-reported name
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Add one raw usage/power reading to the running sums
    pub fn accumulate(&mut self, usage: f64, power: f64) {
        self.usage += usage;
        self.power += power;
        self.sample_count += 1;
    }

    /// Average the sums, round every field and restart accumulation at one sample.
    ///
    /// An entry that was created but never sampled divides by one.
    pub fn settle(&mut self) {
        let count = f64::from(self.sample_count.max(1));
        self.temperature = two_decimals(self.temperature);
        self.memory_used = two_decimals(self.memory_used);
        self.memory_total = two_decimals(self.memory_total);
        self.usage = two_decimals(self.usage / count);
        self.power = two_decimals(self.power / count);
        self.sample_count = 1;
    }
}

/// Averaged view of every known device, keyed by device id
pub type GpuSnapshot = BTreeMap<String, DeviceSample>;

pub fn two_decimals(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

pub fn mebibytes_to_megabytes(mib: f64) -> f64 {
    mib / MEBIBYTES_IN_A_MEGABYTE
}

pub fn bytes_to_megabytes(bytes: f64) -> f64 {
    bytes / BYTES_IN_A_MEGABYTE
}

pub fn milliwatts_to_watts(mw: f64) -> f64 {
    mw / MILLIWATTS_IN_A_WATT
}
