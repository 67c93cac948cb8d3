use thiserror::Error;

/// Errors surfaced by network construction, evaluation and training.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    /// An input vector's length differs from the number of weights it feeds.
    #[error("dimension mismatch: expected {expected} inputs, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// Training hit its iteration cap before the loss crossed the threshold.
    #[error("did not converge within {iterations} iterations (last loss {loss})")]
    NotConverged { iterations: usize, loss: f64 },

    /// The loss became NaN or infinite, so the threshold can never be reached.
    #[error("loss became non-finite ({loss}) at iteration {iteration}")]
    NonFiniteLoss { iteration: usize, loss: f64 },

    #[error("invalid config: {0}")]
    InvalidConfig(String),

    #[error("failed to build weight distribution: {0}")]
    WeightInit(#[from] rand::distr::uniform::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
