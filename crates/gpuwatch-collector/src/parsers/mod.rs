//! Vendor output parsers.
//!
//! Each parser turns one chunk of tool output (a line, or the whole output for
//! blob-framed tools) into updates on the shared [`DeviceRegistry`](crate::DeviceRegistry).

mod intel;
mod jetson;
mod nvidia;
mod rocm;

pub use intel::{parse_intel_gpu_name, resolve_intel_gpu_name, IntelGpuTopParser};
pub use jetson::TegrastatsParser;
pub use nvidia::NvidiaSmiParser;
pub use rocm::RocmSmiParser;

pub trait OutputParser: Send {
    /// Returns true if at least one well-formed record was found in `chunk`
    fn parse(&mut self, chunk: &[u8]) -> bool;
}

/// Vendor tools print numbers as text and sometimes print "N/A"; unreadable values count as zero
fn lenient_f64(value: &str) -> f64 {
    finite(value).unwrap_or(0.0)
}

/// Parse a reading, rejecting "nan" and "inf" which would poison the running averages
fn finite(value: &str) -> Option<f64> {
    value.trim().parse::<f64>().ok().filter(|v| v.is_finite())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lenient_f64() {
        assert_eq!(lenient_f64(" 42.5 "), 42.5);
        assert_eq!(lenient_f64("[N/A]"), 0.0);
        assert_eq!(lenient_f64("NaN"), 0.0);
        assert_eq!(lenient_f64("inf"), 0.0);
        assert_eq!(lenient_f64("-infinity"), 0.0);
    }
}
