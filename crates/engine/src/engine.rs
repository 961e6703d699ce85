//! Orchestrates one grading attempt: resolve the language, get a warm
//! container, write the source, build if needed, then run every test case
//! in order, stopping at the first case that isn't a clean pass.

use crate::{
    error::{EngineError, Result},
    model::{classify_case, AttemptStatus, CaseResult, RunRequest, RunResult, RunResultBuilder},
};
use rankode_catalog::LanguageCatalog;
use rankode_sandbox::{cgroup::CgroupManager, executor::Executor, ContainerPool, ExecutionStatus};
use std::{
    io::Write,
    sync::Arc,
    time::Duration,
};

const BUILD_ENV: &[(&str, &str)] = &[("PATH", "/usr/bin:/bin")];
const RUN_ENV: &[(&str, &str)] = &[("PATH", "/usr/bin:/bin")];
const VERIFICATION_FILE: &str = "verify";

/// The top-level synchronous entry point the broker adapter calls into,
/// once per delivery, from a blocking task.
pub struct SandboxEngine {
    catalog: Arc<LanguageCatalog>,
    pool: ContainerPool,
    cgroups: CgroupManager,
}

impl SandboxEngine {
    pub fn new(catalog: Arc<LanguageCatalog>, pool: ContainerPool, cgroups: CgroupManager) -> Self {
        Self { catalog, pool, cgroups }
    }

    /// Drains and destroys every pooled container. Called once, after the
    /// broker adapter has stopped accepting new deliveries and every
    /// in-flight `run` call has returned.
    pub fn shutdown(self) -> Result<()> {
        self.pool.shutdown().map_err(EngineError::Sandbox)
    }

    /// Never returns an `Err`: every infrastructure failure is captured as
    /// `RunResult::internal_error` so the broker always has something to
    /// publish back.
    pub fn run(&self, request: &RunRequest) -> RunResult {
        log::debug!("running attempt for language {}", request.language());
        match self.run_fallible(request) {
            Ok(result) => result,
            Err(e) => {
                log::error!("attempt failed before a verdict could be reached: {}", e);
                RunResult::internal_error(e.to_string())
            }
        }
    }

    fn run_fallible(&self, request: &RunRequest) -> Result<RunResult> {
        let descriptor = self.catalog.get(request.language()).map_err(EngineError::Catalog)?;

        let mut container = self.pool.acquire().map_err(EngineError::Sandbox)?;

        let mut code_file = container.create_file(descriptor.code_file()).map_err(EngineError::Sandbox)?;
        code_file.write_all(request.code().as_bytes())?;
        drop(code_file);

        if let Some(verification_code) = request.verification_code() {
            let mut verify_file = container.create_file(VERIFICATION_FILE).map_err(EngineError::Sandbox)?;
            verify_file.write_all(verification_code.as_bytes())?;
        }

        let executor = Executor::new(&self.cgroups);

        if descriptor.has_build_step() {
            let build_env: Vec<(String, String)> =
                BUILD_ENV.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();

            let build_result = executor
                .run(
                    &mut container,
                    descriptor.build_cmd(),
                    &build_env,
                    b"",
                    *descriptor.build_timeout(),
                    *descriptor.build_memory_limit(),
                    *descriptor.build_max_file_size(),
                    *request.max_output_size(),
                )
                .map_err(EngineError::Sandbox)?;

            if build_result.status != ExecutionStatus::Normal {
                return Ok(RunResultBuilder::default()
                    .attempt_status(AttemptStatus::BuildFailed)
                    .error(String::from_utf8_lossy(&build_result.stderr).into_owned())
                    .total_execution_time(build_result.wall_time)
                    .build()?);
            }
        }

        let run_env: Vec<(String, String)> = RUN_ENV.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();

        let mut per_case = Vec::with_capacity(request.inputs().len());
        let mut total_execution_time = Duration::default();
        let mut memory_usage: u64 = 0;
        let mut attempt_status = AttemptStatus::Successful;

        for input in request.inputs() {
            let result = executor
                .run(
                    &mut container,
                    descriptor.run_cmd(),
                    &run_env,
                    input.as_bytes(),
                    *request.timeout(),
                    *request.memory_limit(),
                    *request.max_file_size(),
                    *request.max_output_size(),
                )
                .map_err(EngineError::Sandbox)?;

            total_execution_time += result.cpu_time;
            memory_usage = memory_usage.max(result.peak_memory);

            let status = classify_case(result.status);
            let failed = status.is_failure();
            per_case.push(CaseResult {
                output: String::from_utf8_lossy(&result.stdout).into_owned(),
                status,
                execution_time: result.wall_time,
            });

            if failed {
                attempt_status = AttemptStatus::RunFailed;
                break;
            }
        }

        Ok(RunResultBuilder::default()
            .attempt_status(attempt_status)
            .per_case(per_case)
            .total_execution_time(total_execution_time)
            .memory_usage(memory_usage)
            .build()?)
    }
}
