//! CLI-specific error types

use thiserror::Error;

use crate::bitmap::BitmapError;
use crate::index::{ConfigError, IndexError};

/// CLI error
#[derive(Debug, Error)]
pub enum CliError {
    #[error("{0}")]
    Config(#[from] ConfigError),

    #[error("{0}")]
    Bitmap(#[from] BitmapError),

    #[error("{0}")]
    Index(#[from] IndexError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{0}")]
    InvalidArgument(String),

    /// A self-check of the command failed
    #[error("{0}")]
    Verification(String),
}

impl CliError {
    /// Get the error code string
    pub fn code_str(&self) -> &'static str {
        match self {
            Self::Config(_) => "BITDEX_CLI_CONFIG_ERROR",
            Self::Bitmap(err) => err.code().code(),
            Self::Index(err) => err.code(),
            Self::Io(_) | Self::Json(_) => "BITDEX_CLI_IO_ERROR",
            Self::InvalidArgument(_) => "BITDEX_CLI_INVALID_ARGUMENT",
            Self::Verification(_) => "BITDEX_CLI_VERIFICATION_FAILED",
        }
    }
}

/// CLI result type
pub type CliResult<T> = Result<T, CliError>;
