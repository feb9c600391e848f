//! Locate the vendor tools installed on this host

use std::collections::BTreeMap;
use std::env;
use std::ffi::OsStr;
use std::path::{Path, PathBuf};

use gpuwatch_core::{GpuError, Result, VendorTool};
use tracing::{debug, info};

/// Tools found at startup, with the path each one resolved to
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DetectedTools {
    tools: BTreeMap<VendorTool, PathBuf>,
}

impl DetectedTools {
    pub fn from_paths<I>(paths: I) -> Self
    where
        I: IntoIterator<Item = (VendorTool, PathBuf)>,
    {
        Self {
            tools: paths.into_iter().collect(),
        }
    }

    pub fn contains(&self, tool: VendorTool) -> bool {
        self.tools.contains_key(&tool)
    }

    pub fn path(&self, tool: VendorTool) -> Option<&Path> {
        self.tools.get(&tool).map(PathBuf::as_path)
    }

    pub fn iter(&self) -> impl Iterator<Item = (VendorTool, &Path)> {
        self.tools.iter().map(|(tool, path)| (*tool, path.as_path()))
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }
}

/// Search the process `PATH` for every supported tool
pub fn detect() -> Result<DetectedTools> {
    let path_var = env::var_os("PATH");
    detect_in(path_var.as_deref())
}

/// Search an explicit `PATH`-style value. Fails when no tool is present.
pub fn detect_in(path_var: Option<&OsStr>) -> Result<DetectedTools> {
    let tools = DetectedTools::from_paths(VendorTool::ALL.into_iter().filter_map(|tool| {
        let found = find_executable(tool.executable(), path_var);
        debug!(tool = %tool, path = ?found, "GPU tool lookup");
        found.map(|path| (tool, path))
    }));

    if tools.is_empty() {
        return Err(GpuError::NoGpuToolingFound);
    }
    for (tool, path) in tools.iter() {
        info!(tool = %tool, vendor = tool.vendor(), path = %path.display(), "Detected GPU tool");
    }
    Ok(tools)
}

/// Resolve `name` the way a shell would: names with a separator are used as-is
pub fn find_executable(name: &str, path_var: Option<&OsStr>) -> Option<PathBuf> {
    let name = Path::new(name);
    if name.components().count() > 1 {
        return is_executable(name).then(|| name.to_path_buf());
    }

    env::split_paths(path_var?)
        .filter(|dir| !dir.as_os_str().is_empty())
        .map(|dir| dir.join(name))
        .find(|candidate| is_executable(candidate))
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;

    path.metadata()
        .map(|meta| meta.is_file() && meta.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}
