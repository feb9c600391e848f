// Domain modules
pub mod config;
pub mod device;
pub mod error;
pub mod tool;

pub use config::GpuwatchConfig;
pub use device::{
    bytes_to_megabytes, mebibytes_to_megabytes, milliwatts_to_watts, two_decimals, DeviceSample,
    GpuSnapshot,
};
pub use error::{GpuError, Result};
pub use tool::VendorTool;
