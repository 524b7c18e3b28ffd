//! Index layer errors
//!
//! Structural bitmap failures keep their fatal `BitmapError`; this enum
//! only adds the I/O and configuration failures of the index boundary.

use thiserror::Error;

use crate::bitmap::BitmapError;

use super::config::ConfigError;

/// Result type for index operations that touch files or configuration
pub type IndexResult<T> = Result<T, IndexError>;

/// Index boundary errors
#[derive(Debug, Error)]
pub enum IndexError {
    #[error("{0}")]
    Bitmap(#[from] BitmapError),

    #[error("{0}")]
    Config(#[from] ConfigError),

    #[error("Snapshot I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid snapshot: {0}")]
    InvalidSnapshot(String),
}

impl IndexError {
    /// Stable string code
    pub fn code(&self) -> &'static str {
        match self {
            IndexError::Bitmap(err) => err.code().code(),
            IndexError::Config(_) => "INDEX_CONFIG_INVALID",
            IndexError::Io(_) => "INDEX_SNAPSHOT_IO",
            IndexError::InvalidSnapshot(_) => "INDEX_SNAPSHOT_INVALID",
        }
    }

    /// Whether the underlying data must be considered corrupted
    pub fn is_corruption(&self) -> bool {
        match self {
            IndexError::Bitmap(err) => err.code().is_corruption(),
            IndexError::InvalidSnapshot(_) => true,
            IndexError::Config(_) | IndexError::Io(_) => false,
        }
    }
}
