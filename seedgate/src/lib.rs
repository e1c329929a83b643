//! Seedgate - HTTP gateway for seeded compute workers
//!
//! This library implements a stateful gateway in front of a fleet of
//! externally-managed compute workers. Each worker is parameterised by an
//! integer seed and answers a pure function `f_seed(input)` over HTTP, but is
//! expensive to boot and must be torn down when idle.
//!
//! # Architecture
//!
//! ```text
//! HTTP Request → SeedRegistry → CachedCalculator → RequestDeduplicator
//!                                                        │
//!                                                        ▼
//!                                                  WorkerSession → DockerCli → worker
//! ```
//!
//! Requests flow root-to-leaf; results flow back along the same path. Each
//! seed owns one pipeline: a result cache over a request deduplicator over a
//! worker session that manages the container lifecycle.
//!
//! # High-Level API
//!
//! ```ignore
//! use seedgate::config::GatewayConfig;
//! use seedgate::registry::SeedRegistry;
//! use std::sync::Arc;
//!
//! let config = GatewayConfig::default();
//! let registry = Arc::new(SeedRegistry::with_default_pipeline(config.clone()));
//! seedgate::server::serve(registry, config.port, shutdown_future).await?;
//! ```

pub mod calc;
pub mod config;
pub mod dedup;
pub mod logging;
pub mod registry;
pub mod server;
pub mod worker;

/// Version of the seedgate library and CLI.
///
/// This is synchronized across all components in the workspace.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
