use std::io::{BufRead, BufReader, Read};
use std::path::PathBuf;
use std::process::{Child, ChildStdout, Command, Stdio};
use std::thread;
use std::time::Duration;

use gpuwatch_core::{GpuwatchConfig, VendorTool};
use tracing::{debug, error, info, instrument, warn};

use crate::error::CollectError;
use crate::parsers::OutputParser;

/// Initial capacity of the per-collector line buffer
const CMD_BUFFER_SIZE: usize = 10 * 1024;

const NVIDIA_SMI_QUERY: &str =
    "--query-gpu=index,name,temperature.gpu,memory.used,memory.total,utilization.gpu,power.draw";

/// How a tool's stdout is split into chunks for its parser
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Framing {
    /// One chunk per line, streamed while the tool runs
    Lines,
    /// The whole output, read to end of stream
    Blob,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RetryPolicy {
    /// Loop immediately after a pass; wait `retry_wait` after a failed one.
    /// Stops for good only when the tool's output holds no usable data.
    UntilNoData { retry_wait: Duration },
    /// One pass per `interval`; stops once failures exceed `max_failures`.
    BoundedFailures {
        max_failures: u32,
        /// Whether a successful pass clears the failure count
        reset_on_success: bool,
        interval: Duration,
        /// Pause after a failed pass
        failure_wait: Duration,
    },
}

/// Everything needed to drive one vendor tool
#[derive(Debug, Clone, PartialEq)]
pub struct CollectorSpec {
    pub name: String,
    pub program: PathBuf,
    pub args: Vec<String>,
    pub framing: Framing,
    pub policy: RetryPolicy,
}

impl CollectorSpec {
    /// Arguments and cadence for `tool`, run from the resolved `program` path
    pub fn for_tool(tool: VendorTool, program: PathBuf, config: &GpuwatchConfig) -> Self {
        let retry_wait = config.retry_wait();
        let (args, framing, policy) = match tool {
            VendorTool::NvidiaSmi => (
                vec![
                    "-l".to_string(),
                    config.nvidia_smi_interval_secs.to_string(),
                    NVIDIA_SMI_QUERY.to_string(),
                    "--format=csv,noheader,nounits".to_string(),
                ],
                Framing::Lines,
                RetryPolicy::UntilNoData { retry_wait },
            ),
            VendorTool::Tegrastats => (
                vec!["--interval".to_string(), config.tegrastats_interval_ms.to_string()],
                Framing::Lines,
                RetryPolicy::UntilNoData { retry_wait },
            ),
            VendorTool::RocmSmi => (
                [
                    "--showid",
                    "--showtemp",
                    "--showuse",
                    "--showpower",
                    "--showproductname",
                    "--showmeminfo",
                    "vram",
                    "--json",
                ]
                .map(String::from)
                .to_vec(),
                Framing::Lines,
                RetryPolicy::BoundedFailures {
                    max_failures: config.max_failure_retries,
                    reset_on_success: false,
                    interval: config.rocm_smi_interval(),
                    failure_wait: config.rocm_smi_interval(),
                },
            ),
            VendorTool::IntelGpuTop => (
                ["-J", "-s", "1", "-o", "-"].map(String::from).to_vec(),
                Framing::Blob,
                RetryPolicy::BoundedFailures {
                    max_failures: config.max_failure_retries,
                    reset_on_success: true,
                    interval: config.intel_gpu_top_interval(),
                    failure_wait: retry_wait,
                },
            ),
        };

        Self {
            name: tool.to_string(),
            program,
            args,
            framing,
            policy,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollectorState {
    Idle,
    Running,
    Retrying,
    Terminated,
}

/// Failure bookkeeping for bounded collectors
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailureCounter {
    failures: u32,
    max_failures: u32,
    reset_on_success: bool,
}

impl FailureCounter {
    pub fn new(max_failures: u32, reset_on_success: bool) -> Self {
        Self {
            failures: 0,
            max_failures,
            reset_on_success,
        }
    }

    /// Count a failed pass. Returns true once the bound is exceeded.
    pub fn record_failure(&mut self) -> bool {
        self.failures = self.failures.saturating_add(1);
        self.failures > self.max_failures
    }

    pub fn record_success(&mut self) {
        if self.reset_on_success {
            self.failures = 0;
        }
    }

    pub fn failures(&self) -> u32 {
        self.failures
    }
}

/// Runs one vendor tool over and over, feeding its output to a parser
pub struct Collector {
    spec: CollectorSpec,
    parser: Box<dyn OutputParser>,
    state: CollectorState,
    buf: Vec<u8>,
}

impl Collector {
    pub fn new(spec: CollectorSpec, parser: Box<dyn OutputParser>) -> Self {
        Self {
            spec,
            parser,
            state: CollectorState::Idle,
            buf: Vec::with_capacity(CMD_BUFFER_SIZE),
        }
    }

    pub fn state(&self) -> CollectorState {
        self.state
    }

    pub fn spec(&self) -> &CollectorSpec {
        &self.spec
    }

    /// Block until the collector gives up, returning its final state
    pub fn run(mut self) -> CollectorState {
        info!(tool = %self.spec.name, "Starting GPU collector");
        let policy = self.spec.policy;
        match policy {
            RetryPolicy::UntilNoData { retry_wait } => self.run_until_no_data(retry_wait),
            RetryPolicy::BoundedFailures {
                max_failures,
                reset_on_success,
                interval,
                failure_wait,
            } => self.run_bounded(
                FailureCounter::new(max_failures, reset_on_success),
                interval,
                failure_wait,
            ),
        }
        self.state
    }

    fn run_until_no_data(&mut self, retry_wait: Duration) {
        loop {
            self.transition(CollectorState::Running);
            match self.collect() {
                Ok(()) => {}
                Err(e) if e.is_terminal() => {
                    warn!(tool = %self.spec.name, "Found no valid GPU data, stopping");
                    self.transition(CollectorState::Terminated);
                    return;
                }
                Err(e) => {
                    warn!(tool = %self.spec.name, err = %e, "Collector failed, restarting");
                    self.transition(CollectorState::Retrying);
                    thread::sleep(retry_wait);
                }
            }
        }
    }

    fn run_bounded(&mut self, mut counter: FailureCounter, interval: Duration, failure_wait: Duration) {
        loop {
            self.transition(CollectorState::Running);
            match self.collect() {
                Ok(()) => {
                    counter.record_success();
                    thread::sleep(interval);
                }
                Err(e) => {
                    if counter.record_failure() {
                        error!(
                            tool = %self.spec.name,
                            failures = counter.failures(),
                            err = %e,
                            "GPU data collection failed too many times, stopping"
                        );
                        self.transition(CollectorState::Terminated);
                        return;
                    }
                    warn!(
                        tool = %self.spec.name,
                        failures = counter.failures(),
                        err = %e,
                        "Error collecting GPU data"
                    );
                    self.transition(CollectorState::Retrying);
                    thread::sleep(failure_wait);
                }
            }
        }
    }

    fn transition(&mut self, next: CollectorState) {
        if self.state != next {
            debug!(tool = %self.spec.name, from = ?self.state, to = ?next, "Collector state change");
            self.state = next;
        }
    }

    /// Run the tool once and dispatch its output.
    ///
    /// The child is always waited on; on an aborted pass it is killed first.
    #[instrument(skip(self), fields(tool = %self.spec.name))]
    pub fn collect(&mut self) -> Result<(), CollectError> {
        let mut child = Command::new(&self.spec.program)
            .args(&self.spec.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .map_err(CollectError::Spawn)?;

        let outcome = match child.stdout.take() {
            Some(stdout) => match self.spec.framing {
                Framing::Lines => self.stream_lines(stdout),
                Framing::Blob => self.read_blob(stdout),
            },
            None => Err(CollectError::Stream(std::io::Error::other(
                "stdout was not captured",
            ))),
        };

        if let Err(e) = outcome {
            abandon(&mut child);
            return Err(e);
        }

        match child.wait() {
            Ok(status) if status.success() => Ok(()),
            Ok(status) => Err(CollectError::ProcessExit(status.to_string())),
            Err(e) => Err(CollectError::ProcessExit(e.to_string())),
        }
    }

    fn stream_lines(&mut self, stdout: ChildStdout) -> Result<(), CollectError> {
        let mut reader = BufReader::with_capacity(CMD_BUFFER_SIZE, stdout);
        loop {
            self.buf.clear();
            let read = reader
                .read_until(b'\n', &mut self.buf)
                .map_err(CollectError::Stream)?;
            if read == 0 {
                return Ok(());
            }

            let line = trim_line_end(&self.buf);
            if line.is_empty() {
                continue;
            }
            if !self.parser.parse(line) {
                return Err(CollectError::NoValidData);
            }
        }
    }

    fn read_blob(&mut self, mut stdout: ChildStdout) -> Result<(), CollectError> {
        self.buf.clear();
        stdout
            .read_to_end(&mut self.buf)
            .map_err(CollectError::Stream)?;
        if !self.parser.parse(&self.buf) {
            return Err(CollectError::NoValidData);
        }
        Ok(())
    }
}

/// Kill a child whose output is no longer wanted and reap it
pub(crate) fn abandon(child: &mut Child) {
    if let Err(e) = child.kill() {
        debug!(err = %e, "Failed to kill abandoned command");
    }
    if let Err(e) = child.wait() {
        debug!(err = %e, "Failed to wait on abandoned command");
    }
}

fn trim_line_end(line: &[u8]) -> &[u8] {
    let line = line.strip_suffix(b"\n").unwrap_or(line);
    line.strip_suffix(b"\r").unwrap_or(line)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_counter_without_reset() {
        let mut counter = FailureCounter::new(2, false);
        assert!(!counter.record_failure());
        counter.record_success();
        assert!(!counter.record_failure());
        assert_eq!(counter.failures(), 2);
        assert!(counter.record_failure());
    }

    #[test]
    fn test_failure_counter_with_reset() {
        let mut counter = FailureCounter::new(2, true);
        assert!(!counter.record_failure());
        assert!(!counter.record_failure());
        counter.record_success();
        assert_eq!(counter.failures(), 0);
        assert!(!counter.record_failure());
    }

    #[test]
    fn test_nvidia_spec() {
        let config = GpuwatchConfig::default();
        let spec = CollectorSpec::for_tool(VendorTool::NvidiaSmi, "nvidia-smi".into(), &config);
        assert_eq!(spec.name, "nvidia-smi");
        assert_eq!(spec.args[..2], ["-l", "4"]);
        assert_eq!(spec.args[3], "--format=csv,noheader,nounits");
        assert_eq!(spec.framing, Framing::Lines);
        assert_eq!(
            spec.policy,
            RetryPolicy::UntilNoData {
                retry_wait: Duration::from_secs(5)
            }
        );
    }

    #[test]
    fn test_tegrastats_spec() {
        let config = GpuwatchConfig::default();
        let spec = CollectorSpec::for_tool(VendorTool::Tegrastats, "tegrastats".into(), &config);
        assert_eq!(spec.args, ["--interval", "3700"]);
    }

    #[test]
    fn test_bounded_specs_differ_in_reset_rule() {
        let config = GpuwatchConfig::default();
        let amd = CollectorSpec::for_tool(VendorTool::RocmSmi, "rocm-smi".into(), &config);
        let intel = CollectorSpec::for_tool(
            VendorTool::IntelGpuTop,
            "/usr/bin/intel_gpu_top".into(),
            &config,
        );

        assert_eq!(amd.args.last().map(String::as_str), Some("--json"));
        assert_eq!(
            amd.policy,
            RetryPolicy::BoundedFailures {
                max_failures: 5,
                reset_on_success: false,
                interval: Duration::from_millis(4300),
                failure_wait: Duration::from_millis(4300),
            }
        );

        assert_eq!(intel.framing, Framing::Blob);
        assert_eq!(intel.args, ["-J", "-s", "1", "-o", "-"]);
        assert_eq!(
            intel.policy,
            RetryPolicy::BoundedFailures {
                max_failures: 5,
                reset_on_success: true,
                interval: Duration::from_secs(4),
                failure_wait: Duration::from_secs(5),
            }
        );
    }

    #[test]
    fn test_trim_line_end() {
        assert_eq!(trim_line_end(b"a, b\r\n"), b"a, b");
        assert_eq!(trim_line_end(b"a, b\n"), b"a, b");
        assert_eq!(trim_line_end(b"tail"), b"tail");
        assert_eq!(trim_line_end(b"\n"), b"");
    }

    #[cfg(unix)]
    #[test]
    fn test_abandon_kills_and_reaps_child() {
        let mut child = Command::new("sleep")
            .arg("30")
            .stdout(Stdio::null())
            .spawn()
            .unwrap();

        let started = std::time::Instant::now();
        abandon(&mut child);

        assert!(started.elapsed() < Duration::from_secs(10));
        assert!(child.try_wait().unwrap().is_some());
    }

    #[test]
    fn test_new_collector_is_idle() {
        struct Never;
        impl OutputParser for Never {
            fn parse(&mut self, _chunk: &[u8]) -> bool {
                false
            }
        }

        let spec = CollectorSpec::for_tool(
            VendorTool::Tegrastats,
            "tegrastats".into(),
            &GpuwatchConfig::default(),
        );
        let collector = Collector::new(spec, Box::new(Never));
        assert_eq!(collector.state(), CollectorState::Idle);
        assert_eq!(collector.spec().name, "tegrastats");
    }
}
