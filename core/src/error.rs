//! Crate-wide error type.

use crate::tensor::TensorError;
use stagewise_kernels::KernelError;
use thiserror::Error;

/// Errors returned by `stagewise` operations.
///
/// Nothing in this crate retries: every variant is terminal for the call that
/// produced it. `Config` marks a violated contract on the caller's side (an
/// invalid precision selection, an accessor used from the wrong pipeline role,
/// sharing requested while disabled) rather than a recoverable condition.
#[derive(Error, Debug)]
pub enum Error {
    /// The caller broke a configuration contract.
    #[error("Configuration error: {0}")]
    Config(String),

    /// A tensor shape or dtype was not what the operation expected.
    #[error(transparent)]
    Tensor(#[from] TensorError),

    /// A CPU kernel rejected its inputs.
    #[error(transparent)]
    Kernel(#[from] KernelError),

    /// A collective peer hung up or sent something unexpected.
    #[error("Communication error: {0}")]
    Comm(String),

    /// A checkpoint file could not be encoded or decoded.
    #[error("Checkpoint error: {0}")]
    Checkpoint(String),

    /// A strict state-dict load found missing or unexpected keys.
    #[error("Error(s) in loading state dict: missing keys {missing:?}, unexpected keys {unexpected:?}")]
    StateDict {
        missing: Vec<String>,
        unexpected: Vec<String>,
    },

    /// The global tracing subscriber could not be installed.
    #[error("Logging error: {0}")]
    Logging(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub(crate) fn config(msg: impl Into<String>) -> Self {
        Error::Config(msg.into())
    }
}
