//! Shared library for running commands across a host fleet.
//!
//! This crate provides:
//! - A bounded slot pool and dispatcher for fan-out/fan-in of per-host work
//! - The `RemoteExecutor` capability and an SSH implementation
//! - Home-directory expansion for user-supplied paths

mod dispatcher;
mod error;
mod executor;
pub mod paths;
mod ssh;

pub use dispatcher::{Dispatcher, ResultStream, Slot, SlotPool};
pub use error::{Error, Result};
pub use executor::{ExecRequest, JobResult, Outcome, RemoteExecutor, Target};
pub use ssh::{HostKeyPolicy, SSH_PORT, SshExecutor};
