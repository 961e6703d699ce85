use thiserror::Error;

pub type Result<T> = std::result::Result<T, EngineError>;

/// Infrastructure-tier failures: never surfaced as a user-facing verdict,
/// always wrapped into `RunResult::InternalError` at the call site.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("language not found: {0}")]
    LanguageNotFound(String),

    #[error("catalog error: {0}")]
    Catalog(#[from] rankode_catalog::error::CatalogError),

    #[error("sandbox error: {0}")]
    Sandbox(#[from] rankode_sandbox::error::SandboxError),

    #[error("uninitialized field")]
    Builder(#[from] derive_builder::UninitializedFieldError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
