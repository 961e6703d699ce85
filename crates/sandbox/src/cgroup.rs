//! Control-group based resource accounting and memory limiting.
//!
//! Detects cgroup v1 vs v2 once at startup and speaks whichever is mounted.
//! Each execution gets its own short-lived child cgroup, destroyed on every
//! exit path via `Drop`.

use crate::error::{Result, SandboxError};
use std::{
    fs,
    path::{Path, PathBuf},
    sync::atomic::{AtomicU64, Ordering},
    time::Duration,
};

const V2_ROOT: &str = "/sys/fs/cgroup";
const V1_MEMORY_ROOT: &str = "/sys/fs/cgroup/memory";

static CHILD_COUNTER: AtomicU64 = AtomicU64::new(0);

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum CgroupVersion {
    V1,
    V2,
}

/// Owns the root cgroup the worker runs under and knows how to carve out
/// per-execution children from it.
#[derive(Debug)]
pub struct CgroupManager {
    root: PathBuf,
    version: CgroupVersion,
}

impl CgroupManager {
    /// Detects the mounted cgroup hierarchy and creates (if missing) a root
    /// cgroup named `name` for the worker, enabling nested delegation on v2.
    pub fn init(name: &str) -> Result<Self> {
        let version = if Path::new(V2_ROOT).join("cgroup.controllers").exists() {
            CgroupVersion::V2
        } else {
            CgroupVersion::V1
        };

        let root = match version {
            CgroupVersion::V2 => Path::new(V2_ROOT).join(name),
            CgroupVersion::V1 => Path::new(V1_MEMORY_ROOT).join(name),
        };
        fs::create_dir_all(&root).map_err(SandboxError::Io)?;

        if version == CgroupVersion::V2 {
            // Enable memory/cpu delegation once so every nested child can use them.
            let subtree = Path::new(V2_ROOT).join("cgroup.subtree_control");
            let _ = fs::write(&subtree, "+memory +cpu");
        }

        Ok(Self { root, version })
    }

    /// Creates a fresh, uniquely named child cgroup.
    pub fn new_child(&self, prefix: &str) -> Result<CgroupHandle> {
        let n = CHILD_COUNTER.fetch_add(1, Ordering::SeqCst);
        let path = self.root.join(format!("{}-{}-{}", prefix, std::process::id(), n));
        fs::create_dir_all(&path).map_err(SandboxError::Io)?;

        if self.version == CgroupVersion::V2 {
            let subtree = path.join("cgroup.subtree_control");
            let _ = fs::write(&subtree, "+memory +cpu");
        }

        Ok(CgroupHandle {
            path,
            version: self.version,
        })
    }
}

/// A single execution's cgroup. Destroyed automatically when dropped.
#[derive(Debug)]
pub struct CgroupHandle {
    path: PathBuf,
    version: CgroupVersion,
}

impl CgroupHandle {
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Best-effort memory cap; ignored (not fatal) if the kernel rejects it.
    pub fn set_memory_limit(&self, bytes: u64) {
        let file = match self.version {
            CgroupVersion::V2 => self.path.join("memory.max"),
            CgroupVersion::V1 => self.path.join("memory.limit_in_bytes"),
        };
        if bytes > 0 {
            let _ = fs::write(file, bytes.to_string());
        }
    }

    /// Attaches `pid` to this cgroup. Safe to call from the host process as
    /// soon as the child's pid is known.
    pub fn join(&self, pid: i32) -> Result<()> {
        fs::write(self.path.join("cgroup.procs"), pid.to_string()).map_err(SandboxError::Io)
    }

    /// Total CPU time consumed by every process that ever ran in this
    /// cgroup.
    pub fn cpu_usage(&self) -> Duration {
        match self.version {
            CgroupVersion::V1 => read_u64(&self.path.join("cpuacct.usage"))
                .map(Duration::from_nanos)
                .unwrap_or_default(),
            CgroupVersion::V2 => read_stat_field(&self.path.join("cpu.stat"), "usage_usec")
                .map(Duration::from_micros)
                .unwrap_or_default(),
        }
    }

    /// Peak resident memory across the cgroup's lifetime, preferred over any
    /// user-space measurement.
    pub fn peak_memory(&self) -> u64 {
        match self.version {
            CgroupVersion::V1 => read_u64(&self.path.join("memory.max_usage_in_bytes")),
            CgroupVersion::V2 => read_u64(&self.path.join("memory.peak"))
                .max(read_u64(&self.path.join("memory.current"))),
        }
        .unwrap_or_default()
    }

    /// Whether the kernel OOM-killed something in this cgroup.
    pub fn oom_killed(&self) -> bool {
        let file = match self.version {
            CgroupVersion::V1 => self.path.join("memory.oom_control"),
            CgroupVersion::V2 => self.path.join("memory.events"),
        };
        read_stat_field(&file, "oom_kill").unwrap_or(0) > 0
    }
}

impl Drop for CgroupHandle {
    fn drop(&mut self) {
        // Removing a non-empty cgroup fails; by the time we get here the
        // executor has already waited for every process inside it to exit.
        if let Err(e) = fs::remove_dir(&self.path) {
            log::warn!("failed to remove cgroup {:?}: {}", self.path, e);
        }
    }
}

fn read_u64(path: &Path) -> Option<u64> {
    fs::read_to_string(path).ok()?.trim().parse().ok()
}

fn read_stat_field(path: &Path, field: &str) -> Option<u64> {
    let contents = fs::read_to_string(path).ok()?;
    contents.lines().find_map(|line| {
        let mut parts = line.split_whitespace();
        if parts.next()? == field {
            parts.next()?.parse().ok()
        } else {
            None
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_stat_field_parses_matching_line() {
        let tmp = tempfile::NamedTempFile::new().unwrap();
        fs::write(tmp.path(), "usage_usec 1234\nuser_usec 900\n").unwrap();
        assert_eq!(read_stat_field(tmp.path(), "usage_usec"), Some(1234));
        assert_eq!(read_stat_field(tmp.path(), "missing"), None);
    }

    #[test]
    fn read_u64_trims_whitespace() {
        let tmp = tempfile::NamedTempFile::new().unwrap();
        fs::write(tmp.path(), "42\n").unwrap();
        assert_eq!(read_u64(tmp.path()), Some(42));
    }
}
