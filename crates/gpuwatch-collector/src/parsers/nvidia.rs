use std::collections::hash_map::Entry;
use std::sync::Arc;

use gpuwatch_core::{mebibytes_to_megabytes, DeviceSample};
use tracing::debug;

use super::{lenient_f64, OutputParser};
use crate::registry::DeviceRegistry;

/// index, name, temperature.gpu, memory.used, memory.total, utilization.gpu, power.draw
const NVIDIA_FIELD_COUNT: usize = 7;

/// Parses `nvidia-smi --format=csv,noheader,nounits` rows
pub struct NvidiaSmiParser {
    registry: Arc<DeviceRegistry>,
    /// tegrastats owns the metrics on Jetson; nvidia-smi only names the device there
    tegrastats_active: bool,
}

impl NvidiaSmiParser {
    pub fn new(registry: Arc<DeviceRegistry>, tegrastats_active: bool) -> Self {
        Self {
            registry,
            tegrastats_active,
        }
    }
}

impl OutputParser for NvidiaSmiParser {
    fn parse(&mut self, chunk: &[u8]) -> bool {
        let output = String::from_utf8_lossy(chunk);
        let mut devices = self.registry.lock();
        let mut valid = false;

        for line in output.lines() {
            let fields: Vec<&str> = line.trim().split(',').map(str::trim).collect();
            if fields.len() < NVIDIA_FIELD_COUNT {
                continue;
            }
            valid = true;

            let gpu = match devices.entry(fields[0].to_string()) {
                Entry::Occupied(entry) => entry.into_mut(),
                Entry::Vacant(entry) => {
                    let name = clean_name(fields[1]);
                    if self.tegrastats_active {
                        debug!(name = %name, "tegrastats active, nvidia-smi used for GPU name only");
                        entry.insert(DeviceSample::named(name));
                        return false;
                    }
                    entry.insert(DeviceSample::named(name))
                }
            };

            gpu.temperature = lenient_f64(fields[2]);
            gpu.memory_used = mebibytes_to_megabytes(lenient_f64(fields[3]));
            gpu.memory_total = mebibytes_to_megabytes(lenient_f64(fields[4]));
            gpu.accumulate(lenient_f64(fields[5]), lenient_f64(fields[6]));
        }

        valid
    }
}

fn clean_name(name: &str) -> String {
    let name = name.strip_prefix("NVIDIA ").unwrap_or(name);
    name.strip_suffix(" Laptop GPU").unwrap_or(name).to_string()
}
