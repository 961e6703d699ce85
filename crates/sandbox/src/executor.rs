//! Runs a single command inside a container under a fresh cgroup, streaming
//! stdin in and stdout/stderr out through bounded, cancellable copies, and
//! classifies the outcome.

use crate::{
    cgroup::CgroupManager,
    container::ContainerHandle,
    error::Result,
    rlimit::RLimits,
};
use std::{
    fs,
    io::{Read, Write},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread,
    time::{Duration, Instant},
};

const READ_CHUNK: usize = 1024;
const POLL_INTERVAL: Duration = Duration::from_millis(20);

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ExecutionStatus {
    Normal,
    TimeLimitExceeded,
    MemoryLimitExceeded,
    OutputLimitExceeded,
    RuntimeError,
}

#[derive(Debug)]
pub struct ExecutionResult {
    pub status: ExecutionStatus,
    pub exit_status: i32,
    pub cpu_time: Duration,
    pub wall_time: Duration,
    pub peak_memory: u64,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

pub struct Executor<'a> {
    pub cgroups: &'a CgroupManager,
}

impl<'a> Executor<'a> {
    pub fn new(cgroups: &'a CgroupManager) -> Self {
        Self { cgroups }
    }

    /// Runs `argv` inside `container`, feeding `stdin` and enforcing
    /// `timeout`/`memory_limit`/`max_file_size`/`max_output_size`.
    pub fn run(
        &self,
        container: &mut ContainerHandle,
        argv: &[String],
        env: &[(String, String)],
        stdin: &[u8],
        timeout: Duration,
        memory_limit: u64,
        max_file_size: u64,
        max_output_size: u64,
    ) -> Result<ExecutionResult> {
        let cgroup = self.cgroups.new_child("exec")?;
        cgroup.set_memory_limit(memory_limit);

        let rlimits = RLimits::for_execution(timeout, memory_limit, max_file_size);

        let cancel = Arc::new(AtomicBool::new(false));
        let overflowed = Arc::new(AtomicBool::new(false));

        let deadline_cancel = cancel.clone();
        let timer = thread::spawn(move || {
            thread::sleep(timeout);
            deadline_cancel.store(true, Ordering::SeqCst);
        });

        let scratch = container.scratch_dir();
        let stdin_writer = spawn_stdin_writer(scratch.join(".stdin"), stdin.to_vec());
        let (stdout_reader, stdout_overflowed) =
            spawn_output_reader(scratch.join(".stdout"), max_output_size, cancel.clone());
        let (stderr_reader, stderr_overflowed) =
            spawn_output_reader(scratch.join(".stderr"), max_output_size, cancel.clone());

        let start = Instant::now();
        let cgroup_ref = &cgroup;
        let outcome = container.execve(
            argv,
            env,
            rlimits,
            move |pid| cgroup_ref.join(pid),
            &cancel,
            POLL_INTERVAL,
        )?;
        let wall_time = start.elapsed();

        let _ = stdin_writer.join();
        let stdout = stdout_reader.join().unwrap_or_default();
        let stderr = stderr_reader.join().unwrap_or_default();
        if stdout_overflowed.load(Ordering::SeqCst) || stderr_overflowed.load(Ordering::SeqCst) {
            overflowed.store(true, Ordering::SeqCst);
        }
        // The timer thread either already fired or is sleeping past our
        // return; either way it touches nothing but its own flag.
        drop(timer);

        let measured_cpu_time = cgroup.cpu_usage();
        let cpu_time = if measured_cpu_time.is_zero() { wall_time } else { measured_cpu_time };
        let peak_memory = cgroup.peak_memory();
        let oom = cgroup.oom_killed();

        let status = classify(
            overflowed.load(Ordering::SeqCst),
            oom,
            outcome.killed_by_us,
            outcome.code,
            outcome.signal,
        );

        Ok(ExecutionResult {
            status,
            exit_status: outcome.code.unwrap_or(-1),
            cpu_time,
            wall_time,
            peak_memory,
            stdout,
            stderr,
        })
    }
}

/// Fixed precedence: output overflow beats memory, memory beats time,
/// time beats a plain non-zero exit/signal.
fn classify(
    output_overflow: bool,
    oom_killed: bool,
    killed_by_timeout: bool,
    code: Option<i32>,
    signal: Option<i32>,
) -> ExecutionStatus {
    if output_overflow {
        return ExecutionStatus::OutputLimitExceeded;
    }
    if oom_killed {
        return ExecutionStatus::MemoryLimitExceeded;
    }
    if killed_by_timeout {
        return ExecutionStatus::TimeLimitExceeded;
    }
    match (code, signal) {
        (Some(0), _) => ExecutionStatus::Normal,
        _ => ExecutionStatus::RuntimeError,
    }
}

fn spawn_stdin_writer(path: std::path::PathBuf, data: Vec<u8>) -> thread::JoinHandle<()> {
    thread::spawn(move || {
        if let Ok(mut f) = fs::OpenOptions::new().write(true).open(&path) {
            let _ = f.write_all(&data);
        }
    })
}

fn spawn_output_reader(
    path: std::path::PathBuf,
    max_bytes: u64,
    cancel: Arc<AtomicBool>,
) -> (thread::JoinHandle<Vec<u8>>, Arc<AtomicBool>) {
    let overflowed = Arc::new(AtomicBool::new(false));
    let overflowed_clone = overflowed.clone();

    let handle = thread::spawn(move || {
        let mut buf = Vec::new();
        let mut chunk = [0u8; READ_CHUNK];

        let file = match fs::OpenOptions::new().read(true).open(&path) {
            Ok(f) => f,
            Err(_) => return buf,
        };
        let mut file = file;

        loop {
            match file.read(&mut chunk) {
                Ok(0) => break,
                Ok(n) => {
                    let remaining = (max_bytes as usize).saturating_sub(buf.len());
                    let take = n.min(remaining);
                    buf.extend_from_slice(&chunk[..take]);
                    if take < n {
                        overflowed_clone.store(true, Ordering::SeqCst);
                        cancel.store(true, Ordering::SeqCst);
                        break;
                    }
                }
                Err(_) => break,
            }
        }
        buf
    });

    (handle, overflowed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn precedence_output_overflow_beats_everything() {
        assert_eq!(
            classify(true, true, true, Some(1), None),
            ExecutionStatus::OutputLimitExceeded
        );
    }

    #[test]
    fn precedence_memory_beats_time() {
        assert_eq!(classify(false, true, true, None, Some(9)), ExecutionStatus::MemoryLimitExceeded);
    }

    #[test]
    fn precedence_time_beats_runtime_error() {
        assert_eq!(classify(false, false, true, None, Some(9)), ExecutionStatus::TimeLimitExceeded);
    }

    #[test]
    fn normal_exit_is_normal() {
        assert_eq!(classify(false, false, false, Some(0), None), ExecutionStatus::Normal);
    }

    #[test]
    fn nonzero_exit_is_runtime_error() {
        assert_eq!(classify(false, false, false, Some(1), None), ExecutionStatus::RuntimeError);
    }

    #[test]
    fn killed_by_uncaught_signal_is_runtime_error() {
        assert_eq!(classify(false, false, false, None, Some(11)), ExecutionStatus::RuntimeError);
    }
}
