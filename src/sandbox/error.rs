//! Error types for the container sandbox.

/// Errors that prevent a sandbox from being launched or observed.
///
/// None of these describe the snippet's own behaviour; a snippet that fails,
/// crashes or times out still yields an [`ExecutionOutcome`](super::ExecutionOutcome).
#[derive(Debug, thiserror::Error)]
pub enum SandboxError {
    /// Container engine is not installed, not running, or not reachable.
    #[error("Container runtime not available: {reason}")]
    RuntimeNotAvailable { reason: String },

    /// The engine refused to create the container (missing image, bad flags).
    #[error("Container creation failed: {reason}")]
    ContainerCreationFailed { reason: String },

    /// Failed to start container.
    #[error("Container start failed: {reason}")]
    ContainerStartFailed { reason: String },

    /// Lost track of a running container.
    #[error("Execution failed: {reason}")]
    ExecutionFailed { reason: String },

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for sandbox operations.
pub type Result<T> = std::result::Result<T, SandboxError>;
