use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, SandboxError>;

#[derive(Error, Debug)]
pub enum SandboxError {
    #[error("mount of {path:?} failed: {source}")]
    Mount {
        path: PathBuf,
        #[source]
        source: nix::Error,
    },

    #[error("container protocol error: {0}")]
    Protocol(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("syscall failed: {0}")]
    Errno(#[from] nix::Error),
}
