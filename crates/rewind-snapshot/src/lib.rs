//! Diffing snapshot store for emulator machine state.
//!
//! A state object implements [`StateCodec`] and is serialized into a flat little-endian buffer.
//! [`SnapshotChain`] keeps the newest captured buffer in full and stores every older one as a
//! run-length-encoded XOR delta against its successor, rebuilding it lazily when read.

mod error;
mod io;

pub mod blob;
pub mod chain;
pub mod codec;
pub mod format;
pub mod rle;

pub use crate::blob::{BlobId, BlobState, BlobStore};
pub use crate::chain::{ChainOptions, Snapshot, SnapshotChain};
pub use crate::codec::{
    decode_from_slice, encode_into_buffer, encode_into_vec, encode_to_vec, encoded_len_of,
    Reader, StateCodec, Writer,
};
pub use crate::error::{Result, SnapshotError};
pub use crate::format::{
    read_state, write_state, Compression, ReadOptions, SaveOptions, STATE_ENDIANNESS_LITTLE,
    STATE_MAGIC, STATE_VERSION_V1,
};
