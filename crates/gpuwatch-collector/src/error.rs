use thiserror::Error;

/// Failure of a single collection pass. Never escapes the collector that produced it.
#[derive(Error, Debug)]
pub enum CollectError {
    #[error("failed to start command: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("failed to read command output: {0}")]
    Stream(#[source] std::io::Error),

    #[error("no valid GPU data found")]
    NoValidData,

    #[error("command exited unsuccessfully: {0}")]
    ProcessExit(String),
}

impl CollectError {
    /// The tool produced output nothing could be parsed from, so it does not apply to this host
    pub fn is_terminal(&self) -> bool {
        matches!(self, CollectError::NoValidData)
    }
}
