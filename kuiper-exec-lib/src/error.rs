use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// Slot pool created with a capacity of zero.
    #[error("Invalid pool capacity: must be at least 1")]
    InvalidCapacity,

    /// Slot pool semaphore was closed while a unit of work waited on it.
    #[error("Slot pool closed")]
    PoolClosed,

    #[error("Could not determine home directory to expand {}", .0.display())]
    NoHomeDir(PathBuf),

    #[error("SSH error: {0}")]
    Ssh(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    /// Remote command finished with a non-zero exit status.
    #[error("command exited with status {0}")]
    ExitStatus(u32),

    /// Remote command was terminated by a signal.
    #[error("command terminated by signal {0}")]
    Signal(String),

    /// The task running an operation panicked or was aborted.
    #[error("Worker failed: {0}")]
    Worker(String),
}

impl Error {
    /// Create a new SSH error.
    pub fn ssh(msg: impl Into<String>) -> Self {
        Error::Ssh(msg.into())
    }

    /// Create a new timeout error.
    pub fn timeout(msg: impl Into<String>) -> Self {
        Error::Timeout(msg.into())
    }
}

/// Result type alias for kuiper-exec-lib.
pub type Result<T, E = Error> = std::result::Result<T, E>;
