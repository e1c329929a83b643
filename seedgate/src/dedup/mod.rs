//! Request deduplication and result caching for one seed.
//!
//! This module fuses the two middle layers of a seed's pipeline. When many
//! callers ask for the same input simultaneously, only one backend
//! calculation runs - all subscribers receive the same result.
//!
//! # Architecture
//!
//! ```text
//! Request A ─┐
//!            │
//! Request B ─┼──► CachedCalculator ──► RequestDeduplicator ──► WorkerSession
//!            │         (memo)            (fan-in + popularity
//! Request C ─┘                            scheduler)
//! ```
//!
//! The deduplicator runs a single serial scheduler per seed: it repeatedly
//! picks the input with the most subscribers, asks the worker session for the
//! answer, and fans the result out. The cache layer sits above it and
//! short-circuits inputs that were already answered during this worker's
//! lifetime.

mod cache;
mod deduplicator;

pub use cache::CachedCalculator;
pub use deduplicator::{DedupStats, RequestDeduplicator};
