//! End-to-end exercise of container + cgroup + executor. Needs real
//! namespaces and cgroups, so it's skipped outside a root shell, mirroring
//! how the original sandbox test suite gated itself on `getuid() == 0`.

use rankode_common::credential::CredentialGenerator;
use rankode_sandbox::{cgroup::CgroupManager, executor::Executor, ContainerTemplate};
use std::{sync::Arc, time::Duration};

fn is_root() -> bool {
    nix::unistd::Uid::effective().is_root()
}

#[test]
fn echo_hello_world() {
    if !is_root() {
        eprintln!("skipping: requires root to create namespaces/cgroups");
        return;
    }

    let scratch = tempfile::tempdir().unwrap();
    let mut container =
        ContainerTemplate::build(scratch.path().join("c0"), Arc::new(CredentialGenerator::new())).unwrap();

    let cgroups = CgroupManager::init("rankode-sandbox-test").unwrap();
    let executor = Executor::new(&cgroups);

    let result = executor
        .run(
            &mut container,
            &["/bin/echo".into(), "hello".into()],
            &[("PATH".into(), "/bin:/usr/bin".into())],
            b"",
            Duration::from_secs(5),
            64 * 1024 * 1024,
            10 * 1024 * 1024,
            1024,
        )
        .unwrap();

    assert_eq!(result.status, rankode_sandbox::ExecutionStatus::Normal);
    assert_eq!(String::from_utf8_lossy(&result.stdout).trim(), "hello");
}

#[test]
fn output_overflow_is_detected() {
    if !is_root() {
        eprintln!("skipping: requires root to create namespaces/cgroups");
        return;
    }

    let scratch = tempfile::tempdir().unwrap();
    let mut container =
        ContainerTemplate::build(scratch.path().join("c0"), Arc::new(CredentialGenerator::new())).unwrap();

    let cgroups = CgroupManager::init("rankode-sandbox-test-overflow").unwrap();
    let executor = Executor::new(&cgroups);

    let result = executor
        .run(
            &mut container,
            &["/bin/cat".into(), "/dev/zero".into()],
            &[],
            b"",
            Duration::from_secs(2),
            64 * 1024 * 1024,
            10 * 1024 * 1024,
            1024,
        )
        .unwrap();

    assert_eq!(result.status, rankode_sandbox::ExecutionStatus::OutputLimitExceeded);
    assert!(result.stdout.len() as u64 <= 1024);
}
