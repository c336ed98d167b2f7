//! Error taxonomy for the storage kernel.
//!
//! Invariant violations, corruption, concurrency, and I/O each get their
//! own variants so callers can match on failure kind rather than parsing
//! messages.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, KernelError>;

#[derive(Error, Debug)]
pub enum KernelError {
    // -- Invariant violations (programmer errors; fail fast) ----------------
    #[error("chunk is immutable, cannot insert")]
    ImmutableChunk,

    #[error("cannot freeze an empty chunk of this type")]
    EmptyChunk,

    #[error("manifest entry has no start position for this key")]
    MissingStart,

    #[error("invalid manifest position: {0}")]
    InvalidPosition(i64),

    // -- Corruption: containing segment is marked unusable -------------------
    #[error("bad segment signature: expected \"Cinchapi Inc.\", found {0:?}")]
    BadSignature(Vec<u8>),

    #[error("unsupported segment schema version: {0}")]
    UnsupportedSegmentVersion(u8),

    #[error("chunk corrupt: {0}")]
    CorruptChunk(String),

    #[error("length mismatch: manifest declared {declared}, read {actual}")]
    LengthMismatch { declared: u64, actual: u64 },

    #[error("segment load failed: {0}")]
    SegmentLoadError(String),

    // -- Concurrency ----------------------------------------------------------
    #[error("operation cancelled")]
    Cancelled,

    #[error("bloom filters are different sizes: {a} vs {b}")]
    IncompatibleFilterShapes { a: usize, b: usize },

    // -- I/O --------------------------------------------------------------
    #[error("storage I/O error: {0}")]
    StorageIoError(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // -- Precondition / caller errors ------------------------------------
    #[error("self-link forbidden: record {0} cannot link to itself")]
    SelfLink(i64),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("type error: {0}")]
    TypeError(String),
}

impl KernelError {
    /// Stable machine-readable error code, used by log fields and future
    /// wire protocols (the protocol itself is outside this crate's scope).
    pub fn code(&self) -> &'static str {
        match self {
            KernelError::ImmutableChunk => "IMMUTABLE_CHUNK",
            KernelError::EmptyChunk => "EMPTY_CHUNK",
            KernelError::MissingStart => "MISSING_START",
            KernelError::InvalidPosition(_) => "INVALID_POSITION",
            KernelError::BadSignature(_) => "BAD_SIGNATURE",
            KernelError::UnsupportedSegmentVersion(_) => "UNSUPPORTED_SEGMENT_VERSION",
            KernelError::CorruptChunk(_) => "CORRUPT_CHUNK",
            KernelError::LengthMismatch { .. } => "LENGTH_MISMATCH",
            KernelError::SegmentLoadError(_) => "SEGMENT_LOAD_ERROR",
            KernelError::Cancelled => "CANCELLED",
            KernelError::IncompatibleFilterShapes { .. } => "INCOMPATIBLE_FILTER_SHAPES",
            KernelError::StorageIoError(_) => "STORAGE_IO_ERROR",
            KernelError::Serialization(_) => "SERIALIZATION_ERROR",
            KernelError::SelfLink(_) => "SELF_LINK",
            KernelError::InvalidConfig(_) => "INVALID_CONFIG",
            KernelError::TypeError(_) => "TYPE_ERROR",
        }
    }

    /// True for corruption-kind errors that should mark the containing
    /// segment unusable rather than abort only the current operation.
    pub fn taints_segment(&self) -> bool {
        matches!(
            self,
            KernelError::BadSignature(_)
                | KernelError::UnsupportedSegmentVersion(_)
                | KernelError::CorruptChunk(_)
                | KernelError::LengthMismatch { .. }
                | KernelError::SegmentLoadError(_)
        )
    }
}
