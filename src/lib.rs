//! A bounded multi-queue pipeline engine for parallel item processing.
//!
//! This crate provides generic pipeline stages that consume items from sets
//! of bounded queues, transform or sink them, and fan results out to further
//! queue sets, with cooperative cancellation and deadlock-free shutdown.
//!
//! # Features
//!
//! - Fixed-capacity blocking queues with a one-way completion flag
//! - Fair take-from-any / push-to-any selection across queue sets
//! - Stages driven by a poll loop that observes exhaustion, cancellation,
//!   and processing faults
//! - Completion propagation: a stage that stops for any reason marks its
//!   outputs completed, so downstream stages never hang
//! - Scale-out by running several workers over one stage's queue sets
//! - Per-stage metrics: throughput, latency percentiles, item counters
//!
//! # Example
//!
//! ```ignore
//! use parallel_pipeline::{BoxError, CancelToken, PipelineBuilder, Route, StageConfig};
//!
//! let cancel = CancelToken::new();
//! let mut pipeline = PipelineBuilder::<String, String>::new(&cancel)
//!     .transform("upper", StageConfig::default(), |_worker| {
//!         |line: String| -> Result<String, BoxError> { Ok(line.to_uppercase()) }
//!     })?
//!     .sink("print", 1, |_worker| {
//!         |line: String| -> Result<(), BoxError> {
//!             println!("{line}");
//!             Ok(())
//!         }
//!     })?;
//!
//! pipeline.feed("hello".to_owned());
//! pipeline.wait()?;
//! ```

pub mod cancel;
pub mod error;
pub mod metrics;
pub mod pipeline;
pub mod queue;
pub mod select;
pub mod stage;

// Re-exports for convenience
pub use cancel::CancelToken;
pub use error::{BoxError, PipelineError, Result};
pub use metrics::{MetricsSnapshot, StageMetrics};
pub use pipeline::{Pipeline, PipelineBuilder, StageConfig, DEFAULT_QUEUE_CAPACITY};
pub use queue::{queue_set, BoundedQueue, Closed, TryPop, TryPush};
pub use select::{Route, Selector, Take};
pub use stage::{
    CompletionGuard, Sink, Stage, StageOutcome, Transform, DEFAULT_POLL_TIMEOUT,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
