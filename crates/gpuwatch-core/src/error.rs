use thiserror::Error;

#[derive(Error, Debug)]
pub enum GpuError {
    #[error("No GPU found - install nvidia-smi, rocm-smi, tegrastats, or intel-gpu-tools")]
    NoGpuToolingFound,

    #[error("Config error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, GpuError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_tooling_message_names_every_tool() {
        let msg = GpuError::NoGpuToolingFound.to_string();
        for tool in ["nvidia-smi", "rocm-smi", "tegrastats", "intel-gpu-tools"] {
            assert!(msg.contains(tool), "missing {tool} in: {msg}");
        }
    }

    #[test]
    fn test_json_error_conversion() {
        let err: GpuError = serde_json::from_str::<u32>("nope").unwrap_err().into();
        assert!(matches!(err, GpuError::Json(_)));
    }
}
