//! Remote execution capability and the per-host result types.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;

use crate::Result;

/// A remote host address (hostname or IP, no port).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Target(String);

impl Target {
    pub fn new(host: impl Into<String>) -> Self {
        Self(host.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for Target {
    fn from(host: String) -> Self {
        Self(host)
    }
}

impl From<&str> for Target {
    fn from(host: &str) -> Self {
        Self(host.to_string())
    }
}

/// Outcome of running the operation against one target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Combined stdout/stderr of the remote command, as raw bytes.
    Success { output: Vec<u8> },
    /// Human-readable reason the operation failed.
    Failure { reason: String },
}

impl Outcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success { .. })
    }
}

impl<E: fmt::Display> From<std::result::Result<Vec<u8>, E>> for Outcome {
    fn from(result: std::result::Result<Vec<u8>, E>) -> Self {
        match result {
            Ok(output) => Outcome::Success { output },
            Err(e) => Outcome::Failure {
                reason: e.to_string(),
            },
        }
    }
}

/// Result for a single target. Exactly one is produced per dispatched target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobResult {
    pub target: Target,
    pub outcome: Outcome,
}

impl JobResult {
    pub fn new(target: Target, outcome: Outcome) -> Self {
        Self { target, outcome }
    }
}

/// Everything an executor needs to run the command on a host.
#[derive(Debug, Clone)]
pub struct ExecRequest {
    /// Shell command to run remotely
    pub command: String,
    /// Path to the private key used for authentication
    pub credential: PathBuf,
    /// Bound on connection establishment (connect, handshake, auth)
    pub timeout: Duration,
}

/// Capability to run a command on a remote host.
///
/// Implementations return the command's combined output on success and an
/// error carrying the reason otherwise. Partial output is never returned
/// alongside a failure.
#[async_trait]
pub trait RemoteExecutor: Send + Sync {
    async fn execute(&self, target: &Target, request: &ExecRequest) -> Result<Vec<u8>>;
}
