//! Bitmap error types
//!
//! Error codes:
//! - BITMAP_INVALID_CHUNK_TYPE (FATAL)
//! - BITMAP_INVALID_SEGMENT_LENGTH (FATAL)
//! - BITMAP_LENGTH_MISMATCH (FATAL)
//! - BITMAP_INVALID_BIT_POPULATION (FATAL)
//! - BITMAP_ID_OUT_OF_RANGE (FATAL)
//! - BITMAP_USAGE_VIOLATION (FATAL)
//!
//! Nothing in the bitmap engine is retried. Compression, decompression and
//! iteration are pure transformations over in-memory data, so an error means
//! corrupted input or a caller bug.

use std::fmt;

/// Severity levels for bitmap errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// The data (or the caller) cannot be trusted; stop immediately
    Fatal,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Fatal => write!(f, "FATAL"),
        }
    }
}

/// Bitmap-specific error codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BitmapErrorCode {
    /// A chunk header byte outside every defined range
    InvalidChunkType,
    /// A raw segment whose byte length is not 512 (or not a multiple of 8)
    InvalidSegmentLength,
    /// Chunk word counts do not add up, or the stream is truncated/overlong
    LengthMismatch,
    /// A header claims an impossible number of set bits
    InvalidBitPopulation,
    /// Entity id outside the configured id space
    IdOutOfRange,
    /// Operation not permitted on the target (undefined index, bad range...)
    UsageViolation,
}

impl BitmapErrorCode {
    /// Returns the stable string code
    pub fn code(&self) -> &'static str {
        match self {
            BitmapErrorCode::InvalidChunkType => "BITMAP_INVALID_CHUNK_TYPE",
            BitmapErrorCode::InvalidSegmentLength => "BITMAP_INVALID_SEGMENT_LENGTH",
            BitmapErrorCode::LengthMismatch => "BITMAP_LENGTH_MISMATCH",
            BitmapErrorCode::InvalidBitPopulation => "BITMAP_INVALID_BIT_POPULATION",
            BitmapErrorCode::IdOutOfRange => "BITMAP_ID_OUT_OF_RANGE",
            BitmapErrorCode::UsageViolation => "BITMAP_USAGE_VIOLATION",
        }
    }

    /// Returns the severity level for this error
    pub fn severity(&self) -> Severity {
        Severity::Fatal
    }

    /// Whether the code describes corrupted structural data
    pub fn is_corruption(&self) -> bool {
        matches!(
            self,
            BitmapErrorCode::InvalidChunkType
                | BitmapErrorCode::InvalidSegmentLength
                | BitmapErrorCode::LengthMismatch
                | BitmapErrorCode::InvalidBitPopulation
        )
    }
}

impl fmt::Display for BitmapErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// Bitmap error with code, message and the byte offset where decoding stopped
#[derive(Debug, Clone)]
pub struct BitmapError {
    code: BitmapErrorCode,
    message: String,
    offset: Option<usize>,
}

impl BitmapError {
    fn new(code: BitmapErrorCode, message: String, offset: Option<usize>) -> Self {
        Self {
            code,
            message,
            offset,
        }
    }

    /// Unknown chunk header byte
    pub fn invalid_chunk_type(offset: usize, header: u8) -> Self {
        Self::new(
            BitmapErrorCode::InvalidChunkType,
            format!("invalid chunk type 0x{:02x} at byte {}", header, offset),
            Some(offset),
        )
    }

    /// Raw segment with the wrong byte length
    pub fn invalid_segment_length(len: usize) -> Self {
        Self::new(
            BitmapErrorCode::InvalidSegmentLength,
            format!("raw segment length {} is not 512 bytes of 64-bit words", len),
            None,
        )
    }

    /// Stream that ends early, runs long, or covers the wrong number of words
    pub fn length_mismatch(offset: usize, reason: impl Into<String>) -> Self {
        Self::new(
            BitmapErrorCode::LengthMismatch,
            format!("length mismatch at byte {}: {}", offset, reason.into()),
            Some(offset),
        )
    }

    /// Header claims an impossible set-bit count
    pub fn invalid_bit_population(offset: usize, bits: u32) -> Self {
        Self::new(
            BitmapErrorCode::InvalidBitPopulation,
            format!("invalid bit population {} at byte {}", bits, offset),
            Some(offset),
        )
    }

    /// Entity id at or beyond the id ceiling
    pub fn id_out_of_range(id: u64, ceiling: u64) -> Self {
        Self::new(
            BitmapErrorCode::IdOutOfRange,
            format!("entity id {} outside id space [0, {})", id, ceiling),
            None,
        )
    }

    /// Programming error on the caller side
    pub fn usage(reason: impl Into<String>) -> Self {
        Self::new(BitmapErrorCode::UsageViolation, reason.into(), None)
    }

    /// Returns the error code
    pub fn code(&self) -> BitmapErrorCode {
        self.code
    }

    /// Returns the severity level
    pub fn severity(&self) -> Severity {
        self.code.severity()
    }

    /// Returns the error message
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Returns the byte offset if applicable
    pub fn offset(&self) -> Option<usize> {
        self.offset
    }

    /// Returns whether this is a fatal error
    pub fn is_fatal(&self) -> bool {
        true
    }
}

impl fmt::Display for BitmapError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}: {}", self.code.severity(), self.code.code(), self.message)
    }
}

impl std::error::Error for BitmapError {}

/// Result type for bitmap operations
pub type BitmapResult<T> = Result<T, BitmapError>;
