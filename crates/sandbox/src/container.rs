//! A container is a long-lived, privately-namespaced init process plus the
//! mount tree it set up once. The engine talks to it over a `UnixStream`
//! created before the namespacing fork to request execve, reset and
//! shutdown; everything under the container's scratch directory (`/w`,
//! `/tmp`) is mounted *before* the fork, in the engine's own mount
//! namespace, so `unshare(CLONE_NEWNS)` gives the init process a
//! copy-on-write view of the same tmpfs instances rather than a disjoint
//! one -- the engine can read and write source files straight through the
//! host path without any file-descriptor passing.

use crate::{
    error::{Result, SandboxError},
    mounts::{apply_mounts, default_mounts},
    protocol::{self, EngineMessage, InitMessage},
    rlimit::RLimits,
};
use nix::{
    mount::{mount, MsFlags},
    sched::{unshare, CloneFlags},
    sys::{
        stat::Mode,
        wait::{waitpid, WaitStatus},
    },
    unistd::{chdir, chroot, close, dup2, execve, fork, mkfifo, setresgid, setresuid, ForkResult, Gid, Pid, Uid},
};
use rankode_common::credential::CredentialGenerator;
use std::{
    ffi::CString,
    fs,
    io::BufReader,
    os::unix::{io::AsRawFd, net::UnixStream},
    path::PathBuf,
    sync::{atomic::AtomicBool, atomic::Ordering, Arc},
    time::Duration,
};

const NAMESPACE_FLAGS: CloneFlags = CloneFlags::from_bits_truncate(
    CloneFlags::CLONE_NEWIPC.bits()
        | CloneFlags::CLONE_NEWNET.bits()
        | CloneFlags::CLONE_NEWNS.bits()
        | CloneFlags::CLONE_NEWPID.bits()
        | CloneFlags::CLONE_NEWUSER.bits()
        | CloneFlags::CLONE_NEWUTS.bits(),
);

/// The outcome of one `execve` call inside a container, before verdict
/// classification (that happens in the executor, which also owns cgroup
/// stats).
#[derive(Debug)]
pub struct RawExecOutcome {
    pub code: Option<i32>,
    pub signal: Option<i32>,
    pub killed_by_us: bool,
}

/// Builds containers: assembles the host-side scratch mounts, forks the
/// init process, and performs the uid/gid mapping handshake.
pub struct ContainerTemplate;

impl ContainerTemplate {
    /// Builds one container rooted at `workdir`, which must not yet exist.
    pub fn build(workdir: PathBuf, credentials: Arc<CredentialGenerator>) -> Result<ContainerHandle> {
        fs::create_dir_all(&workdir).map_err(SandboxError::Io)?;
        apply_mounts(&workdir, &default_mounts())?;

        let (engine_end, init_end) = UnixStream::pair().map_err(SandboxError::Io)?;

        match unsafe { fork() }.map_err(SandboxError::Errno)? {
            ForkResult::Child => {
                drop(engine_end);
                // Never returns: exits the process directly on any error or on Shutdown.
                init_main(init_end, workdir);
                unreachable!("init_main must not return");
            }
            ForkResult::Parent { child } => {
                drop(init_end);
                let mut reader = BufReader::new(engine_end.try_clone().map_err(SandboxError::Io)?);
                let mut writer = engine_end;

                let msg: InitMessage = protocol::recv(&mut reader).map_err(SandboxError::Io)?;
                match msg {
                    InitMessage::Ready => {}
                    other => return Err(SandboxError::Protocol(format!("expected Ready, got {:?}", other))),
                }

                write_id_maps(child)?;

                protocol::send(&mut writer, &EngineMessage::Go).map_err(SandboxError::Io)?;

                let msg: InitMessage = protocol::recv(&mut reader).map_err(SandboxError::Io)?;
                match msg {
                    InitMessage::MountsReady => {}
                    InitMessage::Error(e) => return Err(SandboxError::Protocol(e)),
                    other => {
                        return Err(SandboxError::Protocol(format!(
                            "expected MountsReady, got {:?}",
                            other
                        )))
                    }
                }

                Ok(ContainerHandle {
                    init_pid: child,
                    writer,
                    reader,
                    workdir,
                    credentials,
                })
            }
        }
    }
}

fn write_id_maps(pid: Pid) -> Result<()> {
    let proc_dir = format!("/proc/{}", pid.as_raw());
    fs::write(format!("{}/setgroups", proc_dir), "deny").map_err(SandboxError::Io)?;
    fs::write(format!("{}/uid_map", proc_dir), "0 0 65536\n").map_err(SandboxError::Io)?;
    fs::write(format!("{}/gid_map", proc_dir), "0 0 65536\n").map_err(SandboxError::Io)?;
    Ok(())
}

/// A pooled, reusable isolated environment. `execve` drives one child
/// process through it; `reset` wipes the scratch directory for reuse;
/// `destroy` tears the whole thing down.
pub struct ContainerHandle {
    init_pid: Pid,
    writer: UnixStream,
    reader: BufReader<UnixStream>,
    workdir: PathBuf,
    credentials: Arc<CredentialGenerator>,
}

impl ContainerHandle {
    /// Host-visible path to the writable scratch directory (`/w` inside the
    /// container).
    pub fn scratch_dir(&self) -> PathBuf {
        self.workdir.join("w")
    }

    /// Opens (creating if needed) a file under the container's scratch
    /// directory, for writing source code or build artifacts.
    pub fn create_file(&self, name: &str) -> Result<fs::File> {
        fs::File::create(self.scratch_dir().join(name)).map_err(SandboxError::Io)
    }

    /// Wipes every entry under `/w`, ready for the next execution.
    pub fn reset(&self) -> Result<()> {
        for entry in fs::read_dir(self.scratch_dir()).map_err(SandboxError::Io)? {
            let entry = entry.map_err(SandboxError::Io)?;
            let path = entry.path();
            if path.is_dir() {
                fs::remove_dir_all(&path).map_err(SandboxError::Io)?;
            } else {
                fs::remove_file(&path).map_err(SandboxError::Io)?;
            }
        }
        Ok(())
    }

    /// Runs `argv` inside the container as a fresh, uniquely credentialed
    /// child, joining `cgroup_pid_sink` (a callback that attaches the
    /// reported pid to a cgroup) before the child's `execve`. Streams stdin
    /// from `stdin` and blocks until the child exits or `cancel` is
    /// tripped, in which case the child is killed.
    pub fn execve(
        &mut self,
        argv: &[String],
        env: &[(String, String)],
        rlimits: RLimits,
        cgroup_join: impl FnOnce(i32) -> Result<()>,
        cancel: &AtomicBool,
        poll_interval: Duration,
    ) -> Result<RawExecOutcome> {
        let credential = self.credentials.next();

        mkfifo(self.scratch_dir().join(".stdin").as_path(), Mode::S_IRUSR | Mode::S_IWUSR).ok();
        mkfifo(self.scratch_dir().join(".stdout").as_path(), Mode::S_IRUSR | Mode::S_IWUSR).ok();
        mkfifo(self.scratch_dir().join(".stderr").as_path(), Mode::S_IRUSR | Mode::S_IWUSR).ok();

        protocol::send(
            &mut self.writer,
            &EngineMessage::Exec {
                argv: argv.to_vec(),
                env: env.to_vec(),
                uid: credential.uid,
                gid: credential.gid,
                rlimits,
                stdin_path: "/w/.stdin".into(),
                stdout_path: "/w/.stdout".into(),
                stderr_path: "/w/.stderr".into(),
            },
        )
        .map_err(SandboxError::Io)?;

        let msg: InitMessage = protocol::recv(&mut self.reader).map_err(SandboxError::Io)?;
        let pid = match msg {
            InitMessage::Started { pid } => pid,
            InitMessage::Error(e) => return Err(SandboxError::Protocol(e)),
            other => return Err(SandboxError::Protocol(format!("expected Started, got {:?}", other))),
        };

        cgroup_join(pid)?;
        protocol::send(&mut self.writer, &EngineMessage::JoinedCgroup).map_err(SandboxError::Io)?;

        self.reader
            .get_ref()
            .set_read_timeout(Some(poll_interval))
            .map_err(SandboxError::Io)?;

        let mut killed_by_us = false;
        let exited = loop {
            match protocol::recv::<InitMessage>(&mut self.reader) {
                Ok(InitMessage::Exited { code, signal }) => break (code, signal),
                Ok(other) => return Err(SandboxError::Protocol(format!("unexpected message {:?}", other))),
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock || e.kind() == std::io::ErrorKind::TimedOut => {
                    if cancel.load(Ordering::SeqCst) && !killed_by_us {
                        killed_by_us = true;
                        let _ = nix::sys::signal::kill(Pid::from_raw(pid), nix::sys::signal::Signal::SIGKILL);
                    }
                    continue;
                }
                Err(e) => return Err(SandboxError::Io(e)),
            }
        };

        self.reader.get_ref().set_read_timeout(None).map_err(SandboxError::Io)?;

        Ok(RawExecOutcome {
            code: exited.0,
            signal: exited.1,
            killed_by_us,
        })
    }

    /// Tears the container down: the init process exits (tearing down its
    /// private namespaces and mounts with it) and its scratch directory is
    /// removed.
    pub fn destroy(mut self) -> Result<()> {
        protocol::send(&mut self.writer, &EngineMessage::Shutdown).map_err(SandboxError::Io)?;
        waitpid(self.init_pid, None).map_err(SandboxError::Errno)?;
        fs::remove_dir_all(&self.workdir).map_err(SandboxError::Io)?;
        Ok(())
    }
}

/// Runs as the container's init process: never returns. Lives entirely in
/// the new namespaces; handles one execution at a time on behalf of the
/// engine.
fn init_main(stream: UnixStream, workdir: PathBuf) -> ! {
    let result = init_main_fallible(stream, workdir);
    if let Err(e) = result {
        log::error!("container init process exiting on error: {}", e);
        std::process::exit(1);
    }
    std::process::exit(0);
}

fn init_main_fallible(stream: UnixStream, workdir: PathBuf) -> Result<()> {
    let mut writer = stream.try_clone().map_err(SandboxError::Io)?;
    let mut reader = BufReader::new(stream);

    unshare(NAMESPACE_FLAGS).map_err(SandboxError::Errno)?;

    protocol::send(&mut writer, &InitMessage::Ready).map_err(SandboxError::Io)?;
    match protocol::recv::<EngineMessage>(&mut reader).map_err(SandboxError::Io)? {
        EngineMessage::Go => {}
        other => return Err(SandboxError::Protocol(format!("expected Go, got {:?}", other))),
    }

    // The pid namespace only takes effect for children forked after this
    // point; mount the container-private /proc now that it does.
    mount(Some("proc"), &workdir.join("proc"), Some("proc"), MsFlags::empty(), None::<&str>)
        .map_err(|source| SandboxError::Mount {
            path: workdir.join("proc"),
            source,
        })?;
    chroot(&workdir).map_err(SandboxError::Errno)?;
    chdir("/w").map_err(SandboxError::Errno)?;

    protocol::send(&mut writer, &InitMessage::MountsReady).map_err(SandboxError::Io)?;

    loop {
        match protocol::recv::<EngineMessage>(&mut reader).map_err(SandboxError::Io)? {
            EngineMessage::Exec {
                argv,
                env,
                uid,
                gid,
                rlimits,
                stdin_path,
                stdout_path,
                stderr_path,
            } => handle_exec(
                &mut reader,
                &mut writer,
                argv,
                env,
                uid,
                gid,
                rlimits,
                &stdin_path,
                &stdout_path,
                &stderr_path,
            )?,
            EngineMessage::Shutdown => return Ok(()),
            other => return Err(SandboxError::Protocol(format!("unexpected message {:?}", other))),
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn handle_exec(
    reader: &mut BufReader<UnixStream>,
    writer: &mut UnixStream,
    argv: Vec<String>,
    env: Vec<(String, String)>,
    uid: u32,
    gid: u32,
    rlimits: RLimits,
    stdin_path: &str,
    stdout_path: &str,
    stderr_path: &str,
) -> Result<()> {
    let (sync_r, sync_w) = nix::unistd::pipe().map_err(SandboxError::Errno)?;

    match unsafe { fork() }.map_err(SandboxError::Errno)? {
        ForkResult::Child => {
            close(sync_w).ok();
            let mut buf = [0u8; 1];
            let _ = nix::unistd::read(sync_r, &mut buf);
            close(sync_r).ok();

            if let Err(e) = run_child(&argv, &env, uid, gid, rlimits, stdin_path, stdout_path, stderr_path) {
                log::error!("exec child setup failed: {}", e);
            }
            std::process::exit(127);
        }
        ForkResult::Parent { child } => {
            close(sync_r).ok();

            protocol::send(writer, &InitMessage::Started { pid: child.as_raw() }).map_err(SandboxError::Io)?;
            match protocol::recv::<EngineMessage>(reader).map_err(SandboxError::Io)? {
                EngineMessage::JoinedCgroup => {}
                other => return Err(SandboxError::Protocol(format!("expected JoinedCgroup, got {:?}", other))),
            }

            nix::unistd::write(sync_w, &[0u8]).ok();
            close(sync_w).ok();

            let status = waitpid(child, None).map_err(SandboxError::Errno)?;
            let (code, signal) = match status {
                WaitStatus::Exited(_, code) => (Some(code), None),
                WaitStatus::Signaled(_, sig, _) => (None, Some(sig as i32)),
                _ => (None, None),
            };
            protocol::send(writer, &InitMessage::Exited { code, signal }).map_err(SandboxError::Io)?;
            Ok(())
        }
    }
}

fn run_child(
    argv: &[String],
    env: &[(String, String)],
    uid: u32,
    gid: u32,
    rlimits: RLimits,
    stdin_path: &str,
    stdout_path: &str,
    stderr_path: &str,
) -> Result<()> {
    let stdin = fs::OpenOptions::new().read(true).open(stdin_path).map_err(SandboxError::Io)?;
    let stdout = fs::OpenOptions::new().write(true).open(stdout_path).map_err(SandboxError::Io)?;
    let stderr = fs::OpenOptions::new().write(true).open(stderr_path).map_err(SandboxError::Io)?;

    dup2(stdin.as_raw_fd(), 0).map_err(SandboxError::Errno)?;
    dup2(stdout.as_raw_fd(), 1).map_err(SandboxError::Errno)?;
    dup2(stderr.as_raw_fd(), 2).map_err(SandboxError::Errno)?;

    setresgid(Gid::from_raw(gid), Gid::from_raw(gid), Gid::from_raw(gid)).map_err(SandboxError::Errno)?;
    setresuid(Uid::from_raw(uid), Uid::from_raw(uid), Uid::from_raw(uid)).map_err(SandboxError::Errno)?;

    rlimits.apply()?;

    let path = CString::new(argv[0].as_bytes()).expect("argv[0] must not contain NUL");
    let args: Vec<CString> = argv
        .iter()
        .map(|a| CString::new(a.as_bytes()).expect("arg must not contain NUL"))
        .collect();
    let envp: Vec<CString> = env
        .iter()
        .map(|(k, v)| CString::new(format!("{}={}", k, v)).expect("env must not contain NUL"))
        .collect();

    execve(&path, &args, &envp).map_err(SandboxError::Errno)?;
    unreachable!("execve only returns on error");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn namespace_flags_include_every_required_namespace() {
        assert!(NAMESPACE_FLAGS.contains(CloneFlags::CLONE_NEWIPC));
        assert!(NAMESPACE_FLAGS.contains(CloneFlags::CLONE_NEWNET));
        assert!(NAMESPACE_FLAGS.contains(CloneFlags::CLONE_NEWNS));
        assert!(NAMESPACE_FLAGS.contains(CloneFlags::CLONE_NEWPID));
        assert!(NAMESPACE_FLAGS.contains(CloneFlags::CLONE_NEWUSER));
        assert!(NAMESPACE_FLAGS.contains(CloneFlags::CLONE_NEWUTS));
    }

    // Anything that forks/unshares requires real privileges; exercised in
    // the root-gated integration tests under crates/sandbox/tests instead.
}
