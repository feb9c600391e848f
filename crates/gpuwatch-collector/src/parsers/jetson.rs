use std::sync::Arc;

use gpuwatch_core::milliwatts_to_watts;
use regex::Regex;

use super::{lenient_f64, OutputParser};
use crate::registry::DeviceRegistry;

/// Jetson boards expose a single integrated GPU
const JETSON_DEVICE_ID: &str = "0";

/// Parses free-text `tegrastats` lines.
///
/// The device name comes from nvidia-smi, so lines arriving before that entry
/// exists are accepted and ignored.
pub struct TegrastatsParser {
    registry: Arc<DeviceRegistry>,
    ram: Regex,
    gr3d: Regex,
    temp: Regex,
    power: Regex,
}

impl TegrastatsParser {
    pub fn new(registry: Arc<DeviceRegistry>) -> Self {
        Self {
            registry,
            ram: Regex::new(r"RAM (\d+)/(\d+)MB").expect("valid RAM pattern"),
            gr3d: Regex::new(r"GR3D_FREQ (\d+)%").expect("valid GR3D pattern"),
            temp: Regex::new(r"tj@(\d+\.?\d*)C").expect("valid temperature pattern"),
            // Orin Nano / NX have no GPU specific power rail
            power: Regex::new(r"(GPU_SOC|CPU_GPU_CV) (\d+)mW").expect("valid power pattern"),
        }
    }
}

impl OutputParser for TegrastatsParser {
    fn parse(&mut self, chunk: &[u8]) -> bool {
        let line = String::from_utf8_lossy(chunk);

        let memory = self
            .ram
            .captures(&line)
            .map(|caps| (lenient_f64(&caps[1]), lenient_f64(&caps[2])));
        let usage = self
            .gr3d
            .captures(&line)
            .map_or(0.0, |caps| lenient_f64(&caps[1]));
        let temperature = self.temp.captures(&line).map(|caps| lenient_f64(&caps[1]));
        let power = self
            .power
            .captures(&line)
            .map_or(0.0, |caps| milliwatts_to_watts(lenient_f64(&caps[2])));

        let mut devices = self.registry.lock();
        let Some(gpu) = devices.get_mut(JETSON_DEVICE_ID) else {
            return true;
        };

        if let Some((used, total)) = memory {
            gpu.memory_used = used;
            gpu.memory_total = total;
        }
        if let Some(temperature) = temperature {
            gpu.temperature = temperature;
        }
        gpu.accumulate(usage, power);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gpuwatch_core::DeviceSample;

    const ORIN_LINE: &[u8] = b"11-17-2024 10:12:41 RAM 2446/7620MB (lfb 2x4MB) SWAP 0/3810MB \
        (cached 0MB) CPU [2%@729,0%@729,0%@729,1%@729,off,off] EMC_FREQ 0%@2133 \
        GR3D_FREQ 37% cpu@48.343C soc2@47.093C soc0@47.968C gpu@47.406C tj@48.343C \
        soc1@48.25C VDD_IN 4810mW/4810mW VDD_CPU_GPU_CV 481mW/481mW VDD_SOC 1442mW/1442mW";

    const XAVIER_LINE: &[u8] = b"RAM 3010/15817MB (lfb 2779x4MB) CPU [1%@1190,2%@1190] \
        GR3D_FREQ 12% AUX@36C CPU@38.5C tj@40C GPU 0mW/0mW CPU 0mW/0mW GPU_SOC 1536mW/1536mW";

    fn parser_with_device() -> (Arc<DeviceRegistry>, TegrastatsParser) {
        let registry = Arc::new(DeviceRegistry::new());
        registry
            .lock()
            .insert("0".to_string(), DeviceSample::named("Orin (nvgpu)"));
        let parser = TegrastatsParser::new(Arc::clone(&registry));
        (registry, parser)
    }

    #[test]
    fn test_waits_for_device_name() {
        let registry = Arc::new(DeviceRegistry::new());
        let mut parser = TegrastatsParser::new(Arc::clone(&registry));

        assert!(parser.parse(ORIN_LINE));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_orin_line() {
        let (registry, mut parser) = parser_with_device();
        assert!(parser.parse(ORIN_LINE));

        let devices = registry.lock();
        let gpu = &devices["0"];
        assert_eq!(gpu.memory_used, 2446.0);
        assert_eq!(gpu.memory_total, 7620.0);
        assert_eq!(gpu.usage, 37.0);
        assert_eq!(gpu.temperature, 48.343);
        assert_eq!(gpu.power, 0.481);
        assert_eq!(gpu.sample_count, 1);
    }

    #[test]
    fn test_xavier_gpu_soc_rail() {
        let (registry, mut parser) = parser_with_device();
        assert!(parser.parse(XAVIER_LINE));
        assert!(parser.parse(XAVIER_LINE));

        let snapshot = registry.snapshot();
        assert_eq!(snapshot["0"].power, 1.54);
        assert_eq!(snapshot["0"].usage, 12.0);
        assert_eq!(snapshot["0"].temperature, 40.0);
    }

    #[test]
    fn test_unmatched_line_still_counts_sample() {
        let (registry, mut parser) = parser_with_device();
        assert!(parser.parse(b"garbage"));

        let devices = registry.lock();
        assert_eq!(devices["0"].sample_count, 1);
        assert_eq!(devices["0"].usage, 0.0);
    }
}
