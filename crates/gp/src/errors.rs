use thiserror::Error;

/// A result type for GP training and evaluation
pub type Result<T> = std::result::Result<T, GpError>;

/// An error when using [`GpTrainer`](crate::GpTrainer) or [`GpMetrics`](crate::GpMetrics)
#[derive(Error, Debug)]
pub enum GpError {
    /// When linear algebra computation fails (e.g. kernel matrix not positive definite)
    #[error(transparent)]
    LinalgError(#[from] linfa_linalg::LinalgError),
    /// When loss, gradients or predictions are not finite
    #[error("Numerical error: {0}")]
    NumericalError(String),
    /// When index points and observations do not agree in shape
    #[error("Shape mismatch: {0}")]
    ShapeMismatch(String),
    /// When feature vectors have no component
    #[error("Degenerate features: index points need at least one feature dimension, got {0}")]
    DegenerateFeatures(usize),
    /// When an unknown metric name is requested
    #[error("Invalid metric: {0}")]
    InvalidMetric(String),
    /// When error due to a bad value
    #[error("InvalidValue error: {0}")]
    InvalidValueError(String),
    /// When an existing checkpoint cannot be restored
    #[error("Checkpoint error: {0}")]
    CheckpointError(String),
    /// When error during json (de)serialization
    #[error("Json error: {0}")]
    SaveJsonError(#[from] serde_json::Error),
    /// When error during binary (de)serialization
    #[error("Binary error: {0}")]
    SaveBinaryError(#[from] bincode::Error),
    /// When error during loading
    #[error("IO error: {0}")]
    LoadIoError(#[from] std::io::Error),
    /// When error during loading
    #[error("Load error: {0}")]
    LoadError(String),
}
