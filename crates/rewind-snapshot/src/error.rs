use std::io;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, SnapshotError>;

#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    #[error("out of memory allocating {len} bytes")]
    OutOfMemory { len: usize },

    /// Malformed or truncated run-length stream, or a delta whose decoded length does not match
    /// the blob it belongs to.
    #[error("run-length decode failed: {0}")]
    Decode(&'static str),

    #[error("buffer too short (needed {needed} bytes, {remaining} remaining)")]
    BufferTooShort { needed: usize, remaining: usize },

    #[error("cannot run-length encode an empty buffer")]
    EmptyInput,

    #[error("corrupt state: {0}")]
    Corrupt(&'static str),

    #[error("unknown or released blob")]
    UnknownBlob,

    #[error("blob is already diffed")]
    AlreadyDiffed,

    #[error("diff link would make a blob its own successor")]
    CycleDetected,

    #[error("invalid state file magic")]
    InvalidMagic,

    #[error("unsupported state file version {0}")]
    UnsupportedVersion(u16),

    #[error("invalid endianness tag {0}")]
    InvalidEndianness(u8),

    #[error("state too large ({len} bytes, limit {max} bytes)")]
    StateTooLarge { len: u64, max: u64 },

    #[error("lz4 decompression failed: {0}")]
    Lz4Decompress(#[from] lz4_flex::block::DecompressError),
}
