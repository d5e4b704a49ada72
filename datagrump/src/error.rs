use thiserror::Error;

/// All errors produced by datagrump.
///
/// Only configuration can fail. Event handling recovers from bad samples
/// locally and never returns an error.
#[derive(Debug, Error)]
pub enum DatagrumpError {
    #[error("invalid {param}: {value} (expected {expected})")]
    InvalidParameter {
        param: &'static str,
        value: f64,
        expected: &'static str,
    },

    #[error("{0} must be non-zero")]
    ZeroParameter(&'static str),

    #[error("malformed controller config: {0}")]
    Config(#[from] serde_json::Error),
}

impl DatagrumpError {
    pub(crate) fn invalid(param: &'static str, value: f64, expected: &'static str) -> Self {
        Self::InvalidParameter {
            param,
            value,
            expected,
        }
    }
}

pub type Result<T> = std::result::Result<T, DatagrumpError>;
