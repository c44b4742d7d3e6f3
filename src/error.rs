use thiserror::Error;

/// Errors surfaced by kernels, recommenders and the evaluator.
#[derive(Debug, Error)]
pub enum RecError {
    /// A hyperparameter or thread count is outside its valid domain.
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    /// Matrix dimensions disagree between collaborating components.
    #[error("shape mismatch: {0}")]
    ShapeMismatch(String),

    /// Persistence round trip failed.
    #[error("serialization failed: {0}")]
    Serialization(#[from] bincode::Error),
}

pub type Result<T> = std::result::Result<T, RecError>;

pub(crate) fn check_n_thread(n_thread: usize) -> Result<()> {
    if n_thread < 1 {
        return Err(RecError::InvalidParameter(format!(
            "n_thread must be >= 1, got {}",
            n_thread
        )));
    }
    Ok(())
}
