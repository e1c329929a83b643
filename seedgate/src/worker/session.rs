//! Worker session lifecycle.
//!
//! A [`WorkerSession`] owns one worker container for one seed: it boots the
//! container on first demand, polls `/health` until the worker is ready,
//! forwards calculations, and stops the container after an idle interval.
//!
//! # State machine
//!
//! ```text
//! Init ──start()──► Ready ──idle watcher──► Stopped ──start()──► Ready ──► …
//! ```
//!
//! Within one boot only `Init → Ready` is possible; `Stopped` is entered by
//! the idle watcher (or `close`), and leaving it requires a fresh boot.
//! Boots are serialised by a dedicated mutex, so at most one is in flight
//! per session; the state lock is held only for phase checks and flips,
//! never across the launch, the warm-up probes, or the calculation call.

use crate::calc::{CalcError, Calculator};
use crate::config::WorkerConfig;
use crate::worker::{free_port, ContainerRuntime, DockerCli, HttpWorkerApi, WorkerApi, WorkerError};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

/// Lifecycle phase of the worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Never booted.
    Init,
    /// Booted and healthy.
    Ready,
    /// Stopped by the idle watcher; the next calculation re-boots.
    Stopped,
}

struct SessionState {
    phase: Phase,
    last_calculation: Instant,
}

/// Gateway-side owner of one worker's lifecycle.
pub struct WorkerSession {
    seed: u64,
    name: String,
    port: u16,
    runtime: Arc<dyn ContainerRuntime>,
    api: Arc<dyn WorkerApi>,
    config: WorkerConfig,
    state: Mutex<SessionState>,
    /// Serialises boots so at most one `start()` is in flight.
    boot: Mutex<()>,
    shutdown: CancellationToken,
}

impl WorkerSession {
    /// Creates a session for `seed` backed by the Docker CLI runtime, and
    /// spawns its idle watcher.
    ///
    /// Allocates a free local port for the worker; the port is owned by the
    /// session for the lifetime of its driver.
    pub fn launch(seed: u64, config: WorkerConfig) -> Result<Arc<Self>, WorkerError> {
        let port = free_port()
            .map_err(|e| WorkerError::Launch(format!("cannot get free port: {}", e)))?;
        let name = format!("qual_{}_seed_{}", port, seed);

        let runtime = Arc::new(DockerCli::new(
            config.image.clone(),
            config.tag.clone(),
            port,
            name.clone(),
            vec![("SEED".to_string(), seed.to_string())],
        ));
        let api = Arc::new(HttpWorkerApi::new(config.calc_timeout)?);

        let session = Self::with_parts(seed, port, name, runtime, api, config);
        session.spawn_idle_watcher();
        Ok(session)
    }

    /// Creates a session from injected parts without spawning the watcher.
    ///
    /// This is the dependency-injection seam: tests substitute mock runtimes
    /// and clients here.
    pub fn with_parts(
        seed: u64,
        port: u16,
        name: String,
        runtime: Arc<dyn ContainerRuntime>,
        api: Arc<dyn WorkerApi>,
        config: WorkerConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            seed,
            name,
            port,
            runtime,
            api,
            config,
            state: Mutex::new(SessionState {
                phase: Phase::Init,
                last_calculation: Instant::now(),
            }),
            boot: Mutex::new(()),
            shutdown: CancellationToken::new(),
        })
    }

    /// Returns the worker's answer for `input`, booting the worker first if
    /// it is not ready.
    pub async fn calculate(
        &self,
        cancel: &CancellationToken,
        input: u64,
    ) -> Result<i64, WorkerError> {
        self.ensure_ready().await?;

        debug!(worker = %self.name, input, "dispatching calculation");
        let request = self.api.calculate(self.port, input);
        let body = tokio::select! {
            _ = cancel.cancelled() => {
                return Err(WorkerError::Http(format!(
                    "calculation for input {} was aborted",
                    input
                )))
            }
            result = request => result?,
        };

        let value: i64 = body.trim().parse().map_err(|e: std::num::ParseIntError| {
            WorkerError::Parse {
                body: body.clone(),
                reason: e.to_string(),
            }
        })?;

        self.state.lock().await.last_calculation = Instant::now();
        Ok(value)
    }

    /// Cancels the idle watcher and stops the worker.
    ///
    /// After the worker was already stopped by the idle watcher this fails
    /// with [`WorkerError::Stop`]; callers tolerate that at shutdown.
    pub async fn close(&self) -> Result<(), WorkerError> {
        debug!(worker = %self.name, "closing session");
        self.shutdown.cancel();
        self.runtime.stop().await?;

        info!(worker = %self.name, "session closed");
        Ok(())
    }

    /// Current lifecycle phase.
    pub async fn phase(&self) -> Phase {
        self.state.lock().await.phase
    }

    /// Spawns the background idle watcher for this session.
    pub fn spawn_idle_watcher(self: &Arc<Self>) -> JoinHandle<()> {
        let session = Arc::clone(self);
        tokio::spawn(async move { session.run_idle_watcher().await })
    }

    /// Boots the worker if it is not ready.
    ///
    /// The boot mutex serialises boots; the state lock is taken only for
    /// the phase check and flip, never across the launch or the probes.
    async fn ensure_ready(&self) -> Result<(), WorkerError> {
        if self.state.lock().await.phase == Phase::Ready {
            return Ok(());
        }

        let _boot = self.boot.lock().await;
        // Another caller may have finished the boot while we waited.
        if self.state.lock().await.phase == Phase::Ready {
            return Ok(());
        }

        self.start().await?;

        let mut state = self.state.lock().await;
        state.phase = Phase::Ready;
        state.last_calculation = Instant::now();
        Ok(())
    }

    /// Boots the container and waits for full initialization.
    ///
    /// Called with the boot mutex held.
    async fn start(&self) -> Result<(), WorkerError> {
        self.runtime.run().await?;

        let mut probe = tokio::time::interval(self.config.probe_interval);
        probe.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        let deadline = tokio::time::sleep(self.config.init_timeout);
        tokio::pin!(deadline);

        loop {
            tokio::select! {
                _ = &mut deadline => {
                    return Err(WorkerError::InitTimeout(self.config.init_timeout));
                }
                _ = probe.tick() => match self.api.health(self.port).await {
                    Ok(200) => {
                        debug!(worker = %self.name, "worker initialized");
                        return Ok(());
                    }
                    Ok(status) => debug!(worker = %self.name, status, "worker not ready yet"),
                    Err(err) => debug!(worker = %self.name, error = %err, "health probe failed"),
                },
            }
        }
    }

    /// Ticks once per watcher interval and stops the worker once idle.
    async fn run_idle_watcher(&self) {
        let mut tick = tokio::time::interval(self.config.watcher_interval);
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => {
                    debug!(worker = %self.name, "idle watcher stopped");
                    return;
                }
                _ = tick.tick() => {}
            }

            let mut state = self.state.lock().await;
            if state.phase != Phase::Ready
                || state.last_calculation.elapsed() <= self.config.stop_after
            {
                continue;
            }

            debug!(worker = %self.name, "stopping idle worker");
            match self.runtime.stop().await {
                Ok(()) => {
                    state.phase = Phase::Stopped;
                    info!(worker = %self.name, seed = self.seed, "idle worker stopped");
                }
                Err(err) => {
                    error!(worker = %self.name, error = %err, "cannot stop idle worker");
                }
            }
        }
    }
}

#[async_trait]
impl Calculator for WorkerSession {
    async fn calculate(&self, cancel: &CancellationToken, input: u64) -> Result<i64, CalcError> {
        Ok(WorkerSession::calculate(self, cancel, input).await?)
    }

    async fn close(&self) -> Result<(), CalcError> {
        Ok(WorkerSession::close(self).await?)
    }
}
