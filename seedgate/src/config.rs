//! Gateway configuration.
//!
//! Defaults match the worker fleet this gateway fronts: workers cold-start in
//! up to ~130 seconds and are stopped after two idle minutes. All knobs are
//! overridable through the `with_*` builders.

use std::time::Duration;

/// Default port the gateway listens on for user requests.
pub const DEFAULT_PORT: u16 = 9002;

/// Default worker container image.
pub const DEFAULT_IMAGE: &str = "quay.io/milaboratory/qual-2021-devops-server";

/// Default worker container image tag.
pub const DEFAULT_IMAGE_TAG: &str = "latest";

/// Default ceiling on worker initialization (130 seconds).
pub const DEFAULT_INIT_TIMEOUT: Duration = Duration::from_secs(130);

/// Default worker HTTP client timeout (130 seconds).
pub const DEFAULT_CALC_TIMEOUT: Duration = Duration::from_secs(130);

/// Default idle interval after which a worker is stopped (120 seconds).
pub const DEFAULT_STOP_AFTER: Duration = Duration::from_secs(120);

/// Default cadence of the warm-up health probe (2 seconds).
pub const DEFAULT_PROBE_INTERVAL: Duration = Duration::from_secs(2);

/// Default cadence of the idle watcher (1 second).
pub const DEFAULT_WATCHER_INTERVAL: Duration = Duration::from_secs(1);

/// Default cadence of the deduplicator scheduler (1 second).
pub const DEFAULT_SCHEDULER_TICK: Duration = Duration::from_secs(1);

/// Top-level gateway configuration.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Port the gateway listens on.
    pub port: u16,

    /// Cadence of each seed's deduplicator scheduler.
    pub scheduler_tick: Duration,

    /// Per-worker lifecycle settings.
    pub worker: WorkerConfig,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            scheduler_tick: DEFAULT_SCHEDULER_TICK,
            worker: WorkerConfig::default(),
        }
    }
}

impl GatewayConfig {
    /// Sets the gateway listen port.
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Sets the deduplicator scheduler cadence.
    pub fn with_scheduler_tick(mut self, tick: Duration) -> Self {
        self.scheduler_tick = tick;
        self
    }

    /// Sets the per-worker lifecycle settings.
    pub fn with_worker(mut self, worker: WorkerConfig) -> Self {
        self.worker = worker;
        self
    }
}

/// Lifecycle settings for one worker session.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Container image the worker runs.
    pub image: String,

    /// Container image tag.
    pub tag: String,

    /// Ceiling on worker initialization (launch to first healthy probe).
    pub init_timeout: Duration,

    /// Timeout of the worker HTTP client.
    pub calc_timeout: Duration,

    /// Idle interval after which the worker is stopped.
    pub stop_after: Duration,

    /// Cadence of the warm-up health probe.
    pub probe_interval: Duration,

    /// Cadence of the idle watcher.
    pub watcher_interval: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            image: DEFAULT_IMAGE.to_string(),
            tag: DEFAULT_IMAGE_TAG.to_string(),
            init_timeout: DEFAULT_INIT_TIMEOUT,
            calc_timeout: DEFAULT_CALC_TIMEOUT,
            stop_after: DEFAULT_STOP_AFTER,
            probe_interval: DEFAULT_PROBE_INTERVAL,
            watcher_interval: DEFAULT_WATCHER_INTERVAL,
        }
    }
}

impl WorkerConfig {
    /// Sets the worker container image and tag.
    pub fn with_image(mut self, image: impl Into<String>, tag: impl Into<String>) -> Self {
        self.image = image.into();
        self.tag = tag.into();
        self
    }

    /// Sets the initialization ceiling.
    pub fn with_init_timeout(mut self, timeout: Duration) -> Self {
        self.init_timeout = timeout;
        self
    }

    /// Sets the worker HTTP client timeout.
    pub fn with_calc_timeout(mut self, timeout: Duration) -> Self {
        self.calc_timeout = timeout;
        self
    }

    /// Sets the idle interval after which the worker is stopped.
    pub fn with_stop_after(mut self, stop_after: Duration) -> Self {
        self.stop_after = stop_after;
        self
    }

    /// Sets the warm-up probe cadence.
    pub fn with_probe_interval(mut self, interval: Duration) -> Self {
        self.probe_interval = interval;
        self
    }

    /// Sets the idle watcher cadence.
    pub fn with_watcher_interval(mut self, interval: Duration) -> Self {
        self.watcher_interval = interval;
        self
    }
}
