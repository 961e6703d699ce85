//! End-to-end exercise of the engine against a real container pool. Needs
//! root to create namespaces/cgroups, so it's skipped outside a root shell,
//! mirroring `crates/sandbox/tests/pipeline.rs`.

use rankode_catalog::LanguageCatalog;
use rankode_engine::{AttemptStatus, CaseStatus, RunRequestBuilder, SandboxEngine};
use rankode_sandbox::{cgroup::CgroupManager, ContainerPool};
use std::{fs, sync::Arc, time::Duration};

fn is_root() -> bool {
    nix::unistd::Uid::effective().is_root()
}

fn write_language(root: &std::path::Path, id: &str, json: &str) {
    let dir = root.join(id);
    fs::create_dir_all(&dir).unwrap();
    fs::write(dir.join("config.json"), json).unwrap();
}

#[test]
fn runs_a_passing_cat_program() {
    if !is_root() {
        eprintln!("skipping: requires root to create namespaces/cgroups");
        return;
    }

    let scripts = tempfile::tempdir().unwrap();
    write_language(
        scripts.path(),
        "cat",
        r#"{"run":["/bin/cat"],"codefile":"code"}"#,
    );

    let catalog = Arc::new(LanguageCatalog::new(scripts.path()));
    let cgroups = CgroupManager::init("rankode-engine-test").unwrap();
    let scratch = tempfile::tempdir().unwrap();
    let pool = ContainerPool::build(1, scratch.path()).unwrap();
    let engine = SandboxEngine::new(catalog, pool, cgroups);

    let request = RunRequestBuilder::default()
        .language("cat")
        .code("")
        .inputs(vec!["hello\n".to_string()])
        .timeout(Duration::from_secs(5))
        .memory_limit(64 * 1024 * 1024u64)
        .max_file_size(10 * 1024 * 1024u64)
        .max_output_size(1024u64)
        .build()
        .unwrap();

    let result = engine.run(&request);

    assert_eq!(*result.attempt_status(), AttemptStatus::Successful);
    assert_eq!(result.per_case().len(), 1);
    assert_eq!(result.per_case()[0].status, CaseStatus::Complete);
    assert_eq!(result.per_case()[0].output, "hello\n");

    engine.shutdown().unwrap();
}

#[test]
fn unknown_language_is_an_internal_error() {
    if !is_root() {
        eprintln!("skipping: requires root to create namespaces/cgroups");
        return;
    }

    let scripts = tempfile::tempdir().unwrap();
    let catalog = Arc::new(LanguageCatalog::new(scripts.path()));
    let cgroups = CgroupManager::init("rankode-engine-test-unknown").unwrap();
    let scratch = tempfile::tempdir().unwrap();
    let pool = ContainerPool::build(1, scratch.path()).unwrap();
    let engine = SandboxEngine::new(catalog, pool, cgroups);

    let request = RunRequestBuilder::default()
        .language("does-not-exist")
        .code("")
        .inputs(Vec::<String>::new())
        .timeout(Duration::from_secs(5))
        .memory_limit(64 * 1024 * 1024u64)
        .max_file_size(10 * 1024 * 1024u64)
        .max_output_size(1024u64)
        .build()
        .unwrap();

    let result = engine.run(&request);

    assert_eq!(*result.attempt_status(), AttemptStatus::InternalError);
    assert!(!result.error().is_empty());

    engine.shutdown().unwrap();
}
