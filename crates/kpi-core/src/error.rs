use thiserror::Error;

#[derive(Error, Debug)]
pub enum KpiError {
    /// Malformed or missing required fields in the input sample set.
    #[error("Data error: {0}")]
    Data(String),

    /// A requested metric has no corresponding data.
    #[error("Unknown metric: {0}")]
    UnknownMetric(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type KpiResult<T> = Result<T, KpiError>;
