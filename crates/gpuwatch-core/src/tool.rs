use std::fmt;

use serde::{Deserialize, Serialize};

/// Vendor diagnostic utilities gpuwatch knows how to drive
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum VendorTool {
    NvidiaSmi,
    RocmSmi,
    Tegrastats,
    IntelGpuTop,
}

impl VendorTool {
    pub const ALL: [VendorTool; 4] = [
        VendorTool::NvidiaSmi,
        VendorTool::RocmSmi,
        VendorTool::Tegrastats,
        VendorTool::IntelGpuTop,
    ];

    /// Executable looked up on the search path. intel_gpu_top is only trusted at its install path.
    pub fn executable(&self) -> &'static str {
        match self {
            VendorTool::NvidiaSmi => "nvidia-smi",
            VendorTool::RocmSmi => "rocm-smi",
            VendorTool::Tegrastats => "tegrastats",
            VendorTool::IntelGpuTop => "/usr/bin/intel_gpu_top",
        }
    }

    pub fn vendor(&self) -> &'static str {
        match self {
            VendorTool::NvidiaSmi => "NVIDIA",
            VendorTool::RocmSmi => "AMD",
            VendorTool::Tegrastats => "Jetson",
            VendorTool::IntelGpuTop => "Intel",
        }
    }
}

impl fmt::Display for VendorTool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            VendorTool::NvidiaSmi => "nvidia-smi",
            VendorTool::RocmSmi => "rocm-smi",
            VendorTool::Tegrastats => "tegrastats",
            VendorTool::IntelGpuTop => "intel_gpu_top",
        };
        f.pad(name)
    }
}
