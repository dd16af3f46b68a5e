//! Error types covering open/IO/format/type/config/range failures plus
//! cooperative cancellation.

use thiserror::Error;

pub type ColonnadeResult<T> = Result<T, ColonnadeError>;

#[derive(Error, Debug)]
pub enum ColonnadeError {
    #[error("failed to open {url}: {cause}")]
    OpenError { url: String, cause: String },

    #[error("io error on {context}: {source}")]
    IoError { context: String, #[source] source: std::io::Error },

    #[error("format error in {artifact}: {detail}")]
    FormatError { artifact: String, detail: String },

    #[error("type error: {0}")]
    TypeError(String),

    #[error("config error: {0}")]
    ConfigError(String),

    #[error("range error: {0}")]
    RangeError(String),

    #[error("unsupported operation: {0}")]
    UnsupportedOperation(String),

    #[error("operation cancelled")]
    Cancelled,

    #[error("internal invariant violated: {0}")]
    Internal(String),
}

impl ColonnadeError {
    pub fn open(url: impl Into<String>, cause: impl std::fmt::Display) -> Self {
        ColonnadeError::OpenError { url: url.into(), cause: cause.to_string() }
    }

    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        ColonnadeError::IoError { context: context.into(), source }
    }

    pub fn format(artifact: impl Into<String>, detail: impl Into<String>) -> Self {
        ColonnadeError::FormatError { artifact: artifact.into(), detail: detail.into() }
    }

    /// Errors worth a bounded retry in the download cache.
    pub fn is_transient(&self) -> bool {
        matches!(self, ColonnadeError::OpenError { .. } | ColonnadeError::IoError { .. })
    }
}

impl From<std::io::Error> for ColonnadeError {
    fn from(source: std::io::Error) -> Self {
        ColonnadeError::IoError { context: "io".to_string(), source }
    }
}
