use thiserror::Error;

pub type DriverResult<T> = Result<T, DriverError>;

#[derive(Error, Debug)]
pub enum DriverError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    InvalidArgument(String),

    #[error("dictionary line {line}: {message}")]
    Dictionary { line: usize, message: String },

    #[error("merge control file: {0}")]
    MergeControl(String),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("failed to execute subprocess: {0}")]
    Subprocess(String),
}
