mod collector;
pub mod detect;
mod error;
mod manager;
pub mod parsers;
mod registry;

pub use collector::{Collector, CollectorSpec, CollectorState, FailureCounter, Framing, RetryPolicy};
pub use detect::{detect, detect_in, DetectedTools};
pub use error::CollectError;
pub use manager::GpuManager;
pub use parsers::OutputParser;
pub use registry::DeviceRegistry;

// Re-export core types so callers only need this crate
pub use gpuwatch_core::{DeviceSample, GpuError, GpuSnapshot, GpuwatchConfig, VendorTool};
