//! The calculation contract shared by every pipeline layer.
//!
//! Each layer of a seed's pipeline (cache, deduplicator, worker session)
//! exposes the same two operations: answer a calculation and shut down. The
//! [`Calculator`] trait captures that seam so layers can wrap each other and
//! tests can substitute mocks at any depth.

use crate::worker::WorkerError;
use async_trait::async_trait;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// One layer of a seed's calculation pipeline.
///
/// The `cancel` token is the caller's cancellation context: when it fires,
/// the layer stops waiting and returns an error instead of a result.
#[async_trait]
pub trait Calculator: Send + Sync {
    /// Returns the worker's answer for `input`.
    async fn calculate(&self, cancel: &CancellationToken, input: u64) -> Result<i64, CalcError>;

    /// Releases the layer's resources, including everything it wraps.
    async fn close(&self) -> Result<(), CalcError>;
}

/// Errors surfaced by the calculation pipeline.
#[derive(Debug, Error)]
pub enum CalcError {
    /// The caller's cancellation context fired before a result was published.
    #[error("request was canceled: input {input}, request {req_id}")]
    Cancelled { input: u64, req_id: u64 },

    /// The subscription was resolved without a value. Subscribers observe
    /// this when the backend call for their input failed; retrying is up to
    /// the caller.
    #[error("calculation for input {0} was abandoned")]
    Abandoned(u64),

    /// The pipeline factory could not build a pipeline for a seed.
    #[error("cannot create pipeline for seed {seed}: {reason}")]
    SeedInit { seed: u64, reason: String },

    /// The component was asked to calculate after it began shutting down.
    #[error("calculator is shutting down")]
    Shutdown,

    /// The worker session failed.
    #[error(transparent)]
    Worker(#[from] WorkerError),
}
