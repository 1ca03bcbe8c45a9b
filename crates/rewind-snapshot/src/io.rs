//! Little-endian stream helpers for the state-file container.
//!
//! Every header field is a fixed-width little-endian integer, so the reader and writer sides are
//! generated from one field-width table. Allocation failure while sizing a buffer is reported as
//! [`SnapshotError::OutOfMemory`] rather than aborting.

use std::io::{Read, Write};

use crate::error::{Result, SnapshotError};

macro_rules! le_methods {
    ($(($write:ident, $read:ident, $ty:ty)),* $(,)?) => {
        /// Fixed-width little-endian writes over any [`Write`].
        pub trait WriteLeExt: Write {
            $(
                fn $write(&mut self, v: $ty) -> Result<()> {
                    self.write_all(&v.to_le_bytes())?;
                    Ok(())
                }
            )*

            fn write_bytes(&mut self, bytes: &[u8]) -> Result<()> {
                self.write_all(bytes)?;
                Ok(())
            }
        }

        /// Fixed-width little-endian reads over any [`Read`].
        pub trait ReadLeExt: Read {
            $(
                fn $read(&mut self) -> Result<$ty> {
                    let mut buf = [0u8; core::mem::size_of::<$ty>()];
                    self.read_exact(&mut buf)?;
                    Ok(<$ty>::from_le_bytes(buf))
                }
            )*

            /// Read exactly `len` bytes into a fresh buffer.
            fn read_exact_vec(&mut self, len: usize) -> Result<Vec<u8>> {
                let mut buf = Vec::new();
                try_resize(&mut buf, len)?;
                self.read_exact(&mut buf)?;
                Ok(buf)
            }
        }
    };
}

le_methods!(
    (write_u8, read_u8, u8),
    (write_u16_le, read_u16_le, u16),
    (write_u32_le, read_u32_le, u32),
    (write_u64_le, read_u64_le, u64),
);

impl<T: Write + ?Sized> WriteLeExt for T {}
impl<T: Read + ?Sized> ReadLeExt for T {}

/// Grow or shrink `buf` to exactly `len` bytes, zero-filling any new tail. On failure `buf` is
/// left as it was.
pub(crate) fn try_resize(buf: &mut Vec<u8>, len: usize) -> Result<()> {
    if len > buf.len() {
        buf.try_reserve_exact(len - buf.len())
            .map_err(|_| SnapshotError::OutOfMemory { len })?;
    }
    buf.resize(len, 0);
    Ok(())
}
