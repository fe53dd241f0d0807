use thiserror::Error;

/// Result type for pipeline operations
pub type Result<T> = std::result::Result<T, PipelineError>;

/// Error type produced by caller-supplied transform and sink functions
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Errors that can occur while building or running a pipeline
#[derive(Error, Debug)]
pub enum PipelineError {
    /// A caller-supplied transform or sink function failed on an item
    #[error("stage `{stage}` failed while processing an item: {source}")]
    Processing {
        stage: String,
        #[source]
        source: BoxError,
    },

    /// Every output queue of a stage was closed while it still had an item to route
    #[error("all output queues of stage `{stage}` are closed")]
    OutputsClosed { stage: String },

    /// A worker thread panicked before reaching a terminal state
    #[error("worker thread of stage `{0}` panicked")]
    WorkerPanicked(String),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),
}
