//! Worker lifecycle management.
//!
//! A worker is an external compute process, parameterised by a seed, that
//! answers `f_seed(input)` over HTTP on a local port. Workers are expensive
//! to boot (up to ~130 s) so the gateway starts them lazily, probes them
//! until healthy, and stops them after an idle interval.
//!
//! # Components
//!
//! - [`ContainerRuntime`] / [`DockerCli`] - launch and tear down the worker
//!   container.
//! - [`WorkerApi`] / [`HttpWorkerApi`] - the worker's HTTP contract
//!   (`/health`, `/calculate/{input}`).
//! - [`WorkerSession`] - the lifecycle state machine owning one worker.

mod client;
mod port;
mod runtime;
mod session;

pub use client::{HttpWorkerApi, WorkerApi};
pub use port::free_port;
pub use runtime::{ContainerRuntime, DockerCli};
pub use session::{Phase, WorkerSession};

use std::time::Duration;
use thiserror::Error;

/// Errors raised by the worker driver and session.
#[derive(Debug, Clone, Error)]
pub enum WorkerError {
    /// The worker container could not be launched.
    #[error("cannot launch worker container: {0}")]
    Launch(String),

    /// The worker did not become healthy within the initialization ceiling.
    #[error("worker was initializing for too long ({0:?})")]
    InitTimeout(Duration),

    /// An HTTP request to the worker failed.
    #[error("worker request failed: {0}")]
    Http(String),

    /// The worker's response body was not a decimal integer.
    #[error("cannot parse worker response {body:?}: {reason}")]
    Parse { body: String, reason: String },

    /// The worker container could not be stopped or removed.
    #[error("cannot stop worker container {name:?}: {reason}")]
    Stop { name: String, reason: String },
}
