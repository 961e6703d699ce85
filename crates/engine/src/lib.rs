//! Ties the language catalog and the sandbox crate together into the
//! single `SandboxEngine::run` call the broker adapter drives.

pub mod engine;
pub mod error;
pub mod model;

pub use engine::SandboxEngine;
pub use error::{EngineError, Result};
pub use model::{AttemptStatus, CaseResult, CaseStatus, RunRequest, RunRequestBuilder, RunResult, RunResultBuilder};
