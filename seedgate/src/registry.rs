//! Seed registry: one calculation pipeline per seed.
//!
//! The registry lazily builds a pipeline (cache over deduplicator over
//! worker session) on the first request for a seed and owns the pipelines'
//! lifetimes. Pipeline construction goes through an injected factory so
//! tests can substitute mocks for the whole stack.

use crate::calc::{CalcError, Calculator};
use crate::config::GatewayConfig;
use crate::dedup::{CachedCalculator, RequestDeduplicator};
use crate::worker::WorkerSession;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Builds the calculation pipeline for one seed.
pub type PipelineFactory = Box<dyn Fn(u64) -> Result<Arc<dyn Calculator>, CalcError> + Send + Sync>;

/// Mapping of seeds to their calculation pipelines.
pub struct SeedRegistry {
    factory: PipelineFactory,
    pipelines: Mutex<HashMap<u64, Arc<dyn Calculator>>>,
}

impl SeedRegistry {
    /// Creates a registry using the given pipeline factory.
    pub fn new(factory: PipelineFactory) -> Self {
        Self {
            factory,
            pipelines: Mutex::new(HashMap::new()),
        }
    }

    /// Creates a registry with the production pipeline: a result cache over
    /// a request deduplicator over a Docker-backed worker session.
    pub fn with_default_pipeline(config: GatewayConfig) -> Self {
        Self::new(Box::new(move |seed| {
            let session = WorkerSession::launch(seed, config.worker.clone())?;
            let dedup = Arc::new(RequestDeduplicator::new(
                seed,
                session,
                config.scheduler_tick,
            ));
            dedup.start();
            Ok(Arc::new(CachedCalculator::new(dedup)) as Arc<dyn Calculator>)
        }))
    }

    /// Answers a calculation with the pipeline for `seed`, creating the
    /// pipeline first if this is the seed's first request.
    pub async fn calculate(
        &self,
        cancel: &CancellationToken,
        seed: u64,
        input: u64,
    ) -> Result<i64, CalcError> {
        let pipeline = self.get_or_create(seed)?;
        pipeline.calculate(cancel, input).await
    }

    /// Closes every pipeline. Returns on the first failure, leaving the
    /// remaining pipelines un-closed; shutdown is best-effort.
    pub async fn close(&self) -> Result<(), CalcError> {
        let pipelines: Vec<_> = {
            let map = self.pipelines.lock().unwrap();
            map.iter().map(|(s, p)| (*s, Arc::clone(p))).collect()
        };

        for (seed, pipeline) in pipelines {
            pipeline.close().await?;
            info!(seed, "pipeline closed");
        }

        info!("seed registry closed");
        Ok(())
    }

    /// Returns the number of live pipelines.
    pub fn len(&self) -> usize {
        self.pipelines.lock().unwrap().len()
    }

    /// Returns true if no pipeline has been created yet.
    pub fn is_empty(&self) -> bool {
        self.pipelines.lock().unwrap().is_empty()
    }

    /// Get-or-create is atomic under one exclusive lock: two concurrent
    /// first requests for a seed build exactly one pipeline.
    fn get_or_create(&self, seed: u64) -> Result<Arc<dyn Calculator>, CalcError> {
        let mut pipelines = self.pipelines.lock().unwrap();

        if let Some(pipeline) = pipelines.get(&seed) {
            return Ok(Arc::clone(pipeline));
        }

        let pipeline = (self.factory)(seed).map_err(|e| CalcError::SeedInit {
            seed,
            reason: e.to_string(),
        })?;
        pipelines.insert(seed, Arc::clone(&pipeline));
        info!(seed, "pipeline created");
        Ok(pipeline)
    }
}
