//! Error types for the turn-detection cascade.

/// Top-level error type for the cascade coordinator.
#[derive(Debug, thiserror::Error)]
pub enum CascadeError {
    /// Text-generation service error.
    #[error("generation error: {0}")]
    Generation(String),

    /// Speech-synthesis service error.
    #[error("synthesis error: {0}")]
    Synthesis(String),

    /// Audio playback backend error.
    #[error("playback error: {0}")]
    Playback(String),

    /// An external service call exceeded its time budget.
    #[error("{stage} timed out after {after_ms}ms")]
    Timeout {
        /// Which service timed out (`generation`, `synthesis`).
        stage: &'static str,
        /// Configured timeout that elapsed.
        after_ms: u64,
    },

    /// Configuration error.
    #[error("config error: {0}")]
    Config(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Channel send/receive error (coordinator gone or shutting down).
    #[error("channel error: {0}")]
    Channel(String),

    /// A state-machine invariant was about to be broken. Always a bug.
    #[error("invariant violated: {0}")]
    Invariant(String),

    /// `stop()` on the playback backend took longer than the hard budget.
    #[error("playback stop took {elapsed_ms}ms (budget {budget_ms}ms)")]
    StopBudgetExceeded {
        /// Measured stop duration.
        elapsed_ms: u64,
        /// Configured hard budget.
        budget_ms: u64,
    },
}

/// Convenience result type.
pub type Result<T> = std::result::Result<T, CascadeError>;
