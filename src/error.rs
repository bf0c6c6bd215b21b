use std::io;

pub type Result<T> = std::result::Result<T, HeapError>;

/// Failures surfaced by the engine. I/O errors (including a missing dump
/// file at open time) propagate verbatim; malformed records inside an
/// otherwise readable dump are skipped with a warning instead of failing
/// the whole scan.
#[derive(Debug, thiserror::Error)]
pub enum HeapError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("not a supported heap dump: {0}")]
    InvalidFormat(String),

    #[error("read of {wanted} bytes at offset 0x{offset:x} runs past the end of the dump")]
    Truncated { offset: u64, wanted: usize },

    #[error("dump segment {requested} out of range, file contains {available} dump(s)")]
    SegmentOutOfRange { requested: usize, available: usize },
}
