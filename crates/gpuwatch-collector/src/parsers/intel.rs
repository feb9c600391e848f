use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::Arc;

use gpuwatch_core::DeviceSample;
use serde::Deserialize;
use tracing::debug;

use super::OutputParser;
use crate::collector::abandon;
use crate::registry::DeviceRegistry;

/// intel_gpu_top only reports one GPU at a time
const INTEL_DEVICE_ID: &str = "0";
const FALLBACK_NAME: &str = "Intel GPU";

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct IntelGpuTopReport {
    power: IntelPower,
    engines: IntelEngines,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct IntelPower {
    #[serde(rename = "GPU")]
    gpu: f64,
    #[serde(rename = "Package")]
    package: f64,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct IntelEngines {
    #[serde(rename = "Render/3D")]
    render_3d: EngineBusy,
    #[serde(rename = "Blitter")]
    blitter: EngineBusy,
    #[serde(rename = "Video")]
    video: EngineBusy,
    #[serde(rename = "VideoEnhance")]
    video_enhance: EngineBusy,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct EngineBusy {
    busy: f64,
}

impl IntelGpuTopReport {
    /// Sum of all engines; can exceed 100 when several engines are busy
    fn total_usage(&self) -> f64 {
        let engines = &self.engines;
        engines.render_3d.busy + engines.blitter.busy + engines.video.busy + engines.video_enhance.busy
    }

    /// The higher of GPU-only and package power
    fn peak_power(&self) -> f64 {
        self.power.gpu.max(self.power.package)
    }
}

/// Decode the output, keeping the most recent report when the tool emitted several
fn decode_latest(blob: &[u8]) -> Result<IntelGpuTopReport, serde_json::Error> {
    let mut reports = serde_json::Deserializer::from_slice(blob).into_iter::<IntelGpuTopReport>();
    let mut latest = reports.next().unwrap_or_else(|| serde_json::from_slice(blob))?;
    for report in reports {
        match report {
            Ok(report) => latest = report,
            Err(_) => break,
        }
    }
    Ok(latest)
}

type NameResolver = Box<dyn FnMut() -> String + Send>;

/// Parses the JSON report of `intel_gpu_top -J`
pub struct IntelGpuTopParser {
    registry: Arc<DeviceRegistry>,
    resolve_name: NameResolver,
}

impl IntelGpuTopParser {
    /// `program` is invoked once, without arguments, to read the GPU name
    pub fn new(registry: Arc<DeviceRegistry>, program: PathBuf) -> Self {
        Self::with_name_resolver(registry, move || resolve_intel_gpu_name(&program))
    }

    pub fn with_name_resolver<F>(registry: Arc<DeviceRegistry>, resolve_name: F) -> Self
    where
        F: FnMut() -> String + Send + 'static,
    {
        Self {
            registry,
            resolve_name: Box::new(resolve_name),
        }
    }
}

impl OutputParser for IntelGpuTopParser {
    fn parse(&mut self, chunk: &[u8]) -> bool {
        let report = match decode_latest(chunk) {
            Ok(report) => report,
            Err(e) => {
                debug!(error = %e, "Failed to parse Intel GPU JSON");
                return false;
            }
        };

        // The name lookup spawns a process, so it must not run under the registry lock
        let known = self.registry.lock().contains_key(INTEL_DEVICE_ID);
        let name = (!known).then(|| (self.resolve_name)());

        let usage = report.total_usage();
        let power = report.peak_power();

        let mut devices = self.registry.lock();
        let gpu = devices.entry(INTEL_DEVICE_ID.to_string()).or_insert_with(|| {
            let name = name.unwrap_or_else(|| FALLBACK_NAME.to_string());
            debug!(name = %name, "Initializing Intel GPU");
            DeviceSample::named(name)
        });
        gpu.accumulate(usage, power);

        debug!(usage, power, count = gpu.sample_count, "Updated Intel GPU data");
        true
    }
}

/// Run intel_gpu_top once and read the GPU name from its first line.
///
/// Falls back to a generic name on any failure.
pub fn resolve_intel_gpu_name(program: &Path) -> String {
    let mut child = match Command::new(program)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
    {
        Ok(child) => child,
        Err(e) => {
            debug!(error = %e, "intel_gpu_top name lookup failed");
            return FALLBACK_NAME.to_string();
        }
    };

    let mut first_line = String::new();
    if let Some(stdout) = child.stdout.take() {
        if let Err(e) = BufReader::new(stdout).read_line(&mut first_line) {
            debug!(error = %e, "Failed to read intel_gpu_top header");
        }
    }
    // The tool keeps running until stopped
    abandon(&mut child);

    parse_intel_gpu_name(&first_line).unwrap_or_else(|| FALLBACK_NAME.to_string())
}

/// Extract the name from a header such as
/// `intel-gpu-top: Intel Alderlake_n (Gen12) @ /dev/dri/card1`
pub fn parse_intel_gpu_name(line: &str) -> Option<String> {
    let (_, rest) = line.split_once("Intel")?;
    let name = rest.split('@').next()?.trim();
    (!name.is_empty()).then(|| name.to_string())
}
