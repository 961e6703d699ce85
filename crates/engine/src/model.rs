//! The request/response data model and the verdict taxonomy that maps raw
//! executor outcomes onto user-visible per-case statuses.

use crate::error::EngineError;
use derive_builder::Builder;
use getset::Getters;
use rankode_sandbox::ExecutionStatus;
use std::time::Duration;

/// One grading attempt: a language, its source, an optional driving
/// harness, and the test inputs to run it against.
#[derive(Builder, Getters, Clone, Debug)]
#[builder(pattern = "owned", setter(into), build_fn(error = "EngineError"))]
pub struct RunRequest {
    #[get = "pub"]
    language: String,

    #[get = "pub"]
    code: String,

    #[builder(default)]
    #[get = "pub"]
    verification_code: Option<String>,

    #[get = "pub"]
    inputs: Vec<String>,

    #[get = "pub"]
    timeout: Duration,

    #[get = "pub"]
    memory_limit: u64,

    #[get = "pub"]
    max_file_size: u64,

    #[get = "pub"]
    max_output_size: u64,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum AttemptStatus {
    Successful,
    BuildFailed,
    RunFailed,
    InternalError,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum CaseStatus {
    Complete,
    CompilationError,
    RunningError,
    OutOfMemory,
    Timeout,
    OutputOverflow,
}

impl CaseStatus {
    /// Whether this status should stop the case loop (anything but
    /// `Complete`).
    pub fn is_failure(self) -> bool {
        self != CaseStatus::Complete
    }
}

/// Total mapping from an executor outcome to a per-case verdict; there is
/// deliberately no catch-all arm here, so adding a new `ExecutionStatus`
/// variant without updating this table is a compile error.
pub fn classify_case(status: ExecutionStatus) -> CaseStatus {
    match status {
        ExecutionStatus::Normal => CaseStatus::Complete,
        ExecutionStatus::MemoryLimitExceeded => CaseStatus::OutOfMemory,
        ExecutionStatus::TimeLimitExceeded => CaseStatus::Timeout,
        ExecutionStatus::OutputLimitExceeded => CaseStatus::OutputOverflow,
        ExecutionStatus::RuntimeError => CaseStatus::RunningError,
    }
}

#[derive(Clone, Debug)]
pub struct CaseResult {
    pub output: String,
    pub status: CaseStatus,
    pub execution_time: Duration,
}

#[derive(Builder, Getters, Clone, Debug)]
#[builder(pattern = "owned", setter(into), build_fn(error = "EngineError"))]
pub struct RunResult {
    #[get = "pub"]
    attempt_status: AttemptStatus,

    #[builder(default)]
    #[get = "pub"]
    per_case: Vec<CaseResult>,

    #[builder(default)]
    #[get = "pub"]
    total_execution_time: Duration,

    #[builder(default)]
    #[get = "pub"]
    memory_usage: u64,

    #[builder(default)]
    #[get = "pub"]
    error: String,
}

impl RunResult {
    pub fn internal_error(message: impl Into<String>) -> Self {
        RunResultBuilder::default()
            .attempt_status(AttemptStatus::InternalError)
            .error(message.into())
            .build()
            .expect("all required fields set")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn taxonomy_is_total_and_exact() {
        assert_eq!(classify_case(ExecutionStatus::Normal), CaseStatus::Complete);
        assert_eq!(classify_case(ExecutionStatus::MemoryLimitExceeded), CaseStatus::OutOfMemory);
        assert_eq!(classify_case(ExecutionStatus::TimeLimitExceeded), CaseStatus::Timeout);
        assert_eq!(classify_case(ExecutionStatus::OutputLimitExceeded), CaseStatus::OutputOverflow);
        assert_eq!(classify_case(ExecutionStatus::RuntimeError), CaseStatus::RunningError);
    }

    #[test]
    fn only_complete_is_not_a_failure() {
        assert!(!CaseStatus::Complete.is_failure());
        assert!(CaseStatus::Timeout.is_failure());
        assert!(CaseStatus::RunningError.is_failure());
    }

    #[test]
    fn internal_error_carries_message() {
        let result = RunResult::internal_error("language not found");
        assert_eq!(result.attempt_status(), &AttemptStatus::InternalError);
        assert_eq!(result.error(), "language not found");
    }
}
