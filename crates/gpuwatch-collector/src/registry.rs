//! Shared, lock-protected device state fed by every collector

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use gpuwatch_core::{DeviceSample, GpuSnapshot};
use tracing::debug;

/// Device id -> accumulating sample, guarded by a single mutex.
///
/// Parsers lock it to update entries; [`DeviceRegistry::snapshot`] is the only
/// way to read it from outside the crate. No I/O happens under the lock.
#[derive(Debug, Default)]
pub struct DeviceRegistry {
    devices: Mutex<HashMap<String, DeviceSample>>,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every critical section leaves the map consistent, so a poisoned lock is still usable
    pub(crate) fn lock(&self) -> MutexGuard<'_, HashMap<String, DeviceSample>> {
        self.devices.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Average accumulated usage/power, reset the accumulators and return an owned copy.
    ///
    /// Devices sharing a name get their id appended, in the copy only.
    pub fn snapshot(&self) -> GpuSnapshot {
        let mut devices = self.lock();

        let mut name_counts: HashMap<String, usize> = HashMap::new();
        for gpu in devices.values() {
            *name_counts.entry(gpu.name.clone()).or_default() += 1;
        }

        let snapshot: GpuSnapshot = devices
            .iter_mut()
            .map(|(id, gpu)| {
                gpu.settle();
                let mut copy = gpu.clone();
                if name_counts.get(&gpu.name).copied().unwrap_or(0) > 1 {
                    copy.name = format!("{} {}", gpu.name, id);
                }
                (id.clone(), copy)
            })
            .collect();
        drop(devices);

        debug!(devices = snapshot.len(), "GPU snapshot taken");
        snapshot
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn insert(registry: &DeviceRegistry, id: &str, name: &str, samples: &[(f64, f64)]) {
        let mut devices = registry.lock();
        let gpu = devices
            .entry(id.to_string())
            .or_insert_with(|| DeviceSample::named(name));
        for (usage, power) in samples {
            gpu.accumulate(*usage, *power);
        }
    }

    #[test]
    fn test_snapshot_averages_samples() {
        let registry = DeviceRegistry::new();
        insert(&registry, "0", "RTX 4090", &[(10.0, 30.0), (20.0, 40.0), (33.0, 12.5)]);

        let snapshot = registry.snapshot();
        let gpu = &snapshot["0"];
        assert_eq!(gpu.usage, 21.0);
        assert_eq!(gpu.power, 27.5);
        assert_eq!(gpu.sample_count, 1);
    }

    #[test]
    fn test_repeated_snapshot_is_stable() {
        let registry = DeviceRegistry::new();
        insert(&registry, "0", "RTX 4090", &[(10.0, 1.0), (11.0, 2.0), (13.0, 4.0)]);

        let first = registry.snapshot();
        let second = registry.snapshot();
        assert_eq!(first, second);
        assert_eq!(first["0"].usage, 11.33);
        assert_eq!(first["0"].power, 2.33);
    }

    #[test]
    fn test_sample_after_snapshot_starts_new_interval() {
        let registry = DeviceRegistry::new();
        insert(&registry, "0", "RTX 4090", &[(10.0, 10.0), (30.0, 30.0)]);
        registry.snapshot();

        // The carried-forward average counts as one sample of the new interval
        insert(&registry, "0", "RTX 4090", &[(50.0, 50.0)]);
        let snapshot = registry.snapshot();
        assert_eq!(snapshot["0"].usage, 35.0);
    }

    #[test]
    fn test_duplicate_names_disambiguated_in_copy_only() {
        let registry = DeviceRegistry::new();
        insert(&registry, "0", "X", &[(1.0, 1.0)]);
        insert(&registry, "1", "X", &[(1.0, 1.0)]);
        insert(&registry, "2", "Y", &[(1.0, 1.0)]);

        let snapshot = registry.snapshot();
        assert_eq!(snapshot["0"].name, "X 0");
        assert_eq!(snapshot["1"].name, "X 1");
        assert_eq!(snapshot["2"].name, "Y");

        let devices = registry.lock();
        assert_eq!(devices["0"].name, "X");
        assert_eq!(devices["1"].name, "X");
    }

    #[test]
    fn test_snapshot_is_independent_copy() {
        let registry = DeviceRegistry::new();
        insert(&registry, "0", "RTX 4090", &[(40.0, 100.0)]);

        let snapshot = registry.snapshot();
        insert(&registry, "0", "RTX 4090", &[(0.0, 0.0)]);

        assert_eq!(snapshot["0"].usage, 40.0);
        assert_eq!(registry.lock()["0"].sample_count, 2);
    }

    #[test]
    fn test_snapshot_rounds_last_observed_fields() {
        let registry = DeviceRegistry::new();
        insert(&registry, "0", "RX 6800", &[(1.0, 1.0)]);
        {
            let mut devices = registry.lock();
            let gpu = devices.get_mut("0").unwrap();
            gpu.temperature = 51.456;
            gpu.memory_used = 1999.998_046_875;
            gpu.memory_total = 16368.0;
        }

        let snapshot = registry.snapshot();
        let gpu = &snapshot["0"];
        assert_eq!(gpu.temperature, 51.46);
        assert_eq!(gpu.memory_used, 2000.0);
        assert_eq!(gpu.memory_total, 16368.0);
    }

    #[test]
    fn test_empty_registry() {
        let registry = DeviceRegistry::new();
        assert!(registry.is_empty());
        assert!(registry.snapshot().is_empty());
    }
}
