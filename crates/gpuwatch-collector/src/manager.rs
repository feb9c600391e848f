use std::io;
use std::path::Path;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use gpuwatch_core::{GpuError, GpuSnapshot, GpuwatchConfig, Result, VendorTool};
use tracing::{error, info};

use crate::collector::{Collector, CollectorSpec, CollectorState};
use crate::detect::{detect, DetectedTools};
use crate::parsers::{
    IntelGpuTopParser, NvidiaSmiParser, OutputParser, RocmSmiParser, TegrastatsParser,
};
use crate::registry::DeviceRegistry;

/// Owns the device registry and one collector thread per detected tool
pub struct GpuManager {
    registry: Arc<DeviceRegistry>,
    tools: DetectedTools,
    workers: Vec<JoinHandle<CollectorState>>,
}

impl GpuManager {
    /// Detect tools on `PATH` and start collecting
    pub fn new(config: &GpuwatchConfig) -> Result<Self> {
        let tools = detect()?;
        Self::with_tools(tools, config)
    }

    pub fn with_tools(tools: DetectedTools, config: &GpuwatchConfig) -> Result<Self> {
        if tools.is_empty() {
            return Err(GpuError::NoGpuToolingFound);
        }

        let registry = Arc::new(DeviceRegistry::new());
        let collectors = tools.iter().map(|(tool, program)| {
            let spec = CollectorSpec::for_tool(tool, program.to_path_buf(), config);
            let parser = parser_for(tool, program, &tools, &registry);
            (tool, Collector::new(spec, parser))
        });
        let workers = start_collectors(collectors, spawn_named);

        Ok(Self {
            registry,
            tools,
            workers,
        })
    }

    /// Average readings since the previous call; see [`DeviceRegistry::snapshot`]
    pub fn snapshot(&self) -> GpuSnapshot {
        self.registry.snapshot()
    }

    pub fn tools(&self) -> &DetectedTools {
        &self.tools
    }

    /// Collectors that have not terminated
    pub fn active_collectors(&self) -> usize {
        self.workers.iter().filter(|w| !w.is_finished()).count()
    }
}

/// Start each collector on its own thread. A tool whose thread cannot be
/// started is logged and skipped; the others keep running.
fn start_collectors<I, S>(collectors: I, mut spawn: S) -> Vec<JoinHandle<CollectorState>>
where
    I: IntoIterator<Item = (VendorTool, Collector)>,
    S: FnMut(String, Collector) -> io::Result<JoinHandle<CollectorState>>,
{
    collectors
        .into_iter()
        .filter_map(|(tool, collector)| match spawn(format!("gpuwatch-{tool}"), collector) {
            Ok(handle) => {
                info!(tool = %tool, "Started GPU collector");
                Some(handle)
            }
            Err(e) => {
                error!(tool = %tool, err = %e, "Failed to start GPU collector thread");
                None
            }
        })
        .collect()
}

fn spawn_named(name: String, collector: Collector) -> io::Result<JoinHandle<CollectorState>> {
    thread::Builder::new().name(name).spawn(move || collector.run())
}

fn parser_for(
    tool: VendorTool,
    program: &Path,
    tools: &DetectedTools,
    registry: &Arc<DeviceRegistry>,
) -> Box<dyn OutputParser> {
    let registry = Arc::clone(registry);
    match tool {
        VendorTool::NvidiaSmi => Box::new(NvidiaSmiParser::new(
            registry,
            tools.contains(VendorTool::Tegrastats),
        )),
        VendorTool::RocmSmi => Box::new(RocmSmiParser::new(registry)),
        VendorTool::Tegrastats => Box::new(TegrastatsParser::new(registry)),
        VendorTool::IntelGpuTop => Box::new(IntelGpuTopParser::new(registry, program.to_path_buf())),
    }
}
