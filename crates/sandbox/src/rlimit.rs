//! Resource limits applied to a sandboxed child immediately before `execve`.

use crate::error::Result;
use nix::sys::resource::{setrlimit, Resource};
use serde::{Deserialize, Serialize};
use std::time::Duration;

const STACK_LIMIT: u64 = 128 * 1024 * 1024;
const OPEN_FILE_LIMIT: u64 = 2048;

/// Mirrors the caps carried on a `RunRequest`/build descriptor, translated
/// into concrete `RLIMIT_*` values for one execution.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct RLimits {
    /// Soft/hard CPU time limit, derived from the wall-clock timeout.
    pub cpu_soft: u64,
    pub cpu_hard: u64,
    /// Largest file the process may create, in bytes. Maps to `RLIMIT_FSIZE`
    /// -- never to be confused with the output-capture byte cap, which is
    /// enforced in user space by the executor's pipe readers.
    pub file_size: u64,
    pub stack: u64,
    /// Data segment / heap cap, set from the request's memory limit.
    pub data: u64,
    pub open_files: u64,
}

impl RLimits {
    pub fn for_execution(timeout: Duration, memory_limit: u64, max_file_size: u64) -> Self {
        let timeout_secs = timeout.as_secs_f64().ceil() as u64;
        Self {
            cpu_soft: timeout_secs + 1,
            cpu_hard: timeout_secs + 2,
            file_size: max_file_size,
            stack: STACK_LIMIT,
            data: memory_limit,
            open_files: OPEN_FILE_LIMIT,
        }
    }

    /// Applies every limit to the calling process. Must run in the forked
    /// child, after namespace/credential setup and before `execve`.
    pub fn apply(&self) -> Result<()> {
        setrlimit(Resource::RLIMIT_CPU, self.cpu_soft, self.cpu_hard)?;
        setrlimit(Resource::RLIMIT_FSIZE, self.file_size, self.file_size)?;
        setrlimit(Resource::RLIMIT_STACK, self.stack, self.stack)?;
        setrlimit(Resource::RLIMIT_DATA, self.data, self.data)?;
        setrlimit(Resource::RLIMIT_NOFILE, self.open_files, self.open_files)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derives_cpu_limits_from_timeout() {
        let limits = RLimits::for_execution(Duration::from_millis(2500), 1 << 20, 1 << 20);
        assert_eq!(limits.cpu_soft, 4);
        assert_eq!(limits.cpu_hard, 5);
    }

    #[test]
    fn keeps_file_size_and_memory_limit_distinct() {
        let limits = RLimits::for_execution(Duration::from_secs(1), 64 * 1024 * 1024, 8 * 1024);
        assert_eq!(limits.file_size, 8 * 1024);
        assert_eq!(limits.data, 64 * 1024 * 1024);
        assert_ne!(limits.file_size, limits.data);
    }
}
