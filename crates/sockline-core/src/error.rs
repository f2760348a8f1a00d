//! Error types for sockline core.

/// Signal-specific errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SignalError {
    /// One or more slots panicked while the signal was being emitted.
    #[error("{failed} slot(s) panicked during emit: {message}")]
    SlotPanicked {
        /// Number of slots that panicked.
        failed: usize,
        /// Message of the first panic.
        message: String,
    },
}

/// A specialized Result type for sockline core operations.
pub type Result<T> = std::result::Result<T, SignalError>;
