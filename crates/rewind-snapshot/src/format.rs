use std::io::{Read, Write};

use crate::error::{Result, SnapshotError};
use crate::io::{ReadLeExt, WriteLeExt};
use crate::rle;

pub const STATE_MAGIC: &[u8; 8] = b"RWNDSTAT";
pub const STATE_VERSION_V1: u16 = 1;
pub const STATE_ENDIANNESS_LITTLE: u8 = 1;

/// Size of the fixed container header preceding the payload.
pub const STATE_HEADER_LEN: usize = 8 + 2 + 1 + 1 + 4 + 8 + 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Compression {
    None = 0,
    Lz4 = 1,
    Rle = 2,
}

impl Compression {
    pub fn from_u8(v: u8) -> Result<Self> {
        match v {
            0 => Ok(Compression::None),
            1 => Ok(Compression::Lz4),
            2 => Ok(Compression::Rle),
            _ => Err(SnapshotError::Corrupt("invalid compression kind")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SaveOptions {
    pub compression: Compression,
}

impl Default for SaveOptions {
    fn default() -> Self {
        Self {
            compression: Compression::Lz4,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadOptions {
    /// Upper bound on both the stored payload and the decompressed state.
    pub max_state_len: u64,
}

impl Default for ReadOptions {
    fn default() -> Self {
        Self {
            max_state_len: 256 * 1024 * 1024,
        }
    }
}

fn compress(kind: Compression, input: &[u8]) -> Result<Vec<u8>> {
    Ok(match kind {
        Compression::None => input.to_vec(),
        Compression::Lz4 => lz4_flex::block::compress(input),
        Compression::Rle if input.is_empty() => Vec::new(),
        Compression::Rle => rle::encode(input)?,
    })
}

fn decompress(kind: Compression, compressed: Vec<u8>, expected_len: usize) -> Result<Vec<u8>> {
    match kind {
        Compression::None => {
            if compressed.len() != expected_len {
                return Err(SnapshotError::Corrupt("uncompressed payload length mismatch"));
            }
            Ok(compressed)
        }
        Compression::Lz4 => {
            let out = lz4_flex::block::decompress(&compressed, expected_len)?;
            if out.len() != expected_len {
                return Err(SnapshotError::Corrupt("decompressed payload length mismatch"));
            }
            Ok(out)
        }
        Compression::Rle => {
            let mut out = Vec::new();
            if expected_len == 0 {
                if !compressed.is_empty() {
                    return Err(SnapshotError::Corrupt("payload for empty state"));
                }
                return Ok(out);
            }
            rle::decode_exact_into(&compressed, expected_len, &mut out)?;
            Ok(out)
        }
    }
}

/// Write a flat state buffer wrapped in the `RWNDSTAT` container.
pub fn write_state<W: Write>(w: &mut W, state: &[u8], options: SaveOptions) -> Result<()> {
    let payload = compress(options.compression, state)?;

    w.write_bytes(STATE_MAGIC)?;
    w.write_u16_le(STATE_VERSION_V1)?;
    w.write_u8(STATE_ENDIANNESS_LITTLE)?;
    w.write_u8(options.compression as u8)?;
    w.write_u32_le(0)?; // reserved
    w.write_u64_le(state.len() as u64)?;
    w.write_u64_le(payload.len() as u64)?;
    w.write_bytes(&payload)?;
    Ok(())
}

/// Read back a flat state buffer written by [`write_state`].
pub fn read_state<R: Read>(r: &mut R, options: ReadOptions) -> Result<Vec<u8>> {
    let mut magic = [0u8; 8];
    r.read_exact(&mut magic)?;
    if &magic != STATE_MAGIC {
        return Err(SnapshotError::InvalidMagic);
    }
    let version = r.read_u16_le()?;
    if version != STATE_VERSION_V1 {
        return Err(SnapshotError::UnsupportedVersion(version));
    }
    let endianness = r.read_u8()?;
    if endianness != STATE_ENDIANNESS_LITTLE {
        return Err(SnapshotError::InvalidEndianness(endianness));
    }
    let compression = Compression::from_u8(r.read_u8()?)?;
    let _reserved = r.read_u32_le()?;

    let raw_len = checked_len(r.read_u64_le()?, options)?;
    let payload_len = checked_len(r.read_u64_le()?, options)?;
    let payload = r.read_exact_vec(payload_len)?;
    decompress(compression, payload, raw_len)
}

fn checked_len(len: u64, options: ReadOptions) -> Result<usize> {
    if len > options.max_state_len {
        return Err(SnapshotError::StateTooLarge {
            len,
            max: options.max_state_len,
        });
    }
    usize::try_from(len).map_err(|_| SnapshotError::StateTooLarge {
        len,
        max: usize::MAX as u64,
    })
}
