//! Fixed-layout binary serialization for machine state.
//!
//! Every participating type implements [`StateCodec`]: it writes its fields, in a fixed order,
//! into a [`Writer`] and reads them back from a [`Reader`]. There is no schema in the output;
//! producer and consumer must agree on the field order.
//!
//! Layout rules:
//! - `bool`: one byte, `0` or `1`
//! - integers: fixed width, little-endian, no prefix
//! - `[T; N]`: `N` elements back to back, no prefix
//! - `Vec<T>`: `u64` element count, then the elements. The count may not exceed the bytes left
//!   after it, even for zero-sized elements.
//! - `BTreeMap<K, V>`: `u64` entry count, then `(key, value)` pairs in ascending key order
//! - `Option<T>`: one presence byte, then the payload if present
//! - composites: their fields in declaration order

use std::collections::BTreeMap;

use crate::error::{Result, SnapshotError};
use crate::io::try_resize;

enum Sink<'a> {
    Count,
    Slice(&'a mut [u8]),
}

/// Forward-only byte cursor that state types encode themselves into.
///
/// A sizing writer only counts bytes, which lets [`StateCodec::encoded_len`] reuse the type's own
/// `encode_into` instead of a second hand-maintained field list.
pub struct Writer<'a> {
    sink: Sink<'a>,
    pos: usize,
}

impl<'a> Writer<'a> {
    pub fn new(buf: &'a mut [u8]) -> Self {
        Self {
            sink: Sink::Slice(buf),
            pos: 0,
        }
    }

    pub fn sizing() -> Writer<'static> {
        Writer {
            sink: Sink::Count,
            pos: 0,
        }
    }

    /// Bytes written (or counted) so far.
    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn put(&mut self, bytes: &[u8]) -> Result<()> {
        match &mut self.sink {
            Sink::Count => {}
            Sink::Slice(buf) => {
                let remaining = buf.len() - self.pos;
                if bytes.len() > remaining {
                    return Err(SnapshotError::BufferTooShort {
                        needed: bytes.len(),
                        remaining,
                    });
                }
                buf[self.pos..self.pos + bytes.len()].copy_from_slice(bytes);
            }
        }
        self.pos += bytes.len();
        Ok(())
    }

    pub fn put_u8(&mut self, v: u8) -> Result<()> {
        self.put(&[v])
    }

    pub fn put_len(&mut self, len: usize) -> Result<()> {
        self.put(&(len as u64).to_le_bytes())
    }
}

/// Bounds-checked read cursor over an encoded state.
#[derive(Clone)]
pub struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    pub fn take(&mut self, len: usize) -> Result<&'a [u8]> {
        let remaining = self.remaining();
        if len > remaining {
            return Err(SnapshotError::BufferTooShort {
                needed: len,
                remaining,
            });
        }
        let bytes = &self.buf[self.pos..self.pos + len];
        self.pos += len;
        Ok(bytes)
    }

    pub fn take_array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    pub fn take_u8(&mut self) -> Result<u8> {
        Ok(self.take_array::<1>()?[0])
    }

    /// Read a `u64` element count and check it is addressable on this host.
    pub fn take_len(&mut self) -> Result<usize> {
        let len = u64::from_le_bytes(self.take_array()?);
        usize::try_from(len).map_err(|_| SnapshotError::Corrupt("length does not fit in usize"))
    }

    /// Fail unless every byte has been consumed.
    pub fn finish(self) -> Result<()> {
        if self.remaining() != 0 {
            return Err(SnapshotError::Corrupt("trailing bytes"));
        }
        Ok(())
    }
}

/// Fixed-layout serialization contract for state objects.
pub trait StateCodec: Sized {
    fn encode_into(&self, w: &mut Writer<'_>) -> Result<()>;

    fn decode_from(r: &mut Reader<'_>) -> Result<Self>;

    /// Exact number of bytes [`StateCodec::encode_into`] writes.
    fn encoded_len(&self) -> usize {
        let mut w = Writer::sizing();
        // A sizing writer has no capacity limit; any error here would also surface on the real
        // write, so the count so far is still the best answer.
        let _ = self.encode_into(&mut w);
        w.position()
    }

    fn encode_slice(items: &[Self], w: &mut Writer<'_>) -> Result<()> {
        for item in items {
            item.encode_into(w)?;
        }
        Ok(())
    }

    fn slice_encoded_len(items: &[Self]) -> usize {
        items.iter().map(StateCodec::encoded_len).sum()
    }

    fn decode_vec(r: &mut Reader<'_>, count: usize) -> Result<Vec<Self>> {
        // Only zero-sized elements can outnumber the remaining bytes, and those allocate nothing.
        let mut out = Vec::with_capacity(count.min(r.remaining()));
        for _ in 0..count {
            out.push(Self::decode_from(r)?);
        }
        Ok(out)
    }
}

impl StateCodec for bool {
    fn encode_into(&self, w: &mut Writer<'_>) -> Result<()> {
        w.put_u8(u8::from(*self))
    }

    fn decode_from(r: &mut Reader<'_>) -> Result<Self> {
        match r.take_u8()? {
            0 => Ok(false),
            1 => Ok(true),
            _ => Err(SnapshotError::Corrupt("invalid bool")),
        }
    }

    fn encoded_len(&self) -> usize {
        1
    }
}

impl StateCodec for u8 {
    fn encode_into(&self, w: &mut Writer<'_>) -> Result<()> {
        w.put_u8(*self)
    }

    fn decode_from(r: &mut Reader<'_>) -> Result<Self> {
        r.take_u8()
    }

    fn encoded_len(&self) -> usize {
        1
    }

    fn encode_slice(items: &[Self], w: &mut Writer<'_>) -> Result<()> {
        w.put(items)
    }

    fn slice_encoded_len(items: &[Self]) -> usize {
        items.len()
    }

    fn decode_vec(r: &mut Reader<'_>, count: usize) -> Result<Vec<Self>> {
        let bytes = r.take(count)?;
        let mut out = Vec::new();
        out.try_reserve_exact(count)
            .map_err(|_| SnapshotError::OutOfMemory { len: count })?;
        out.extend_from_slice(bytes);
        Ok(out)
    }
}

macro_rules! impl_state_codec_le {
    ($($ty:ty),* $(,)?) => {
        $(
            impl StateCodec for $ty {
                fn encode_into(&self, w: &mut Writer<'_>) -> Result<()> {
                    w.put(&self.to_le_bytes())
                }

                fn decode_from(r: &mut Reader<'_>) -> Result<Self> {
                    Ok(<$ty>::from_le_bytes(r.take_array()?))
                }

                fn encoded_len(&self) -> usize {
                    core::mem::size_of::<$ty>()
                }
            }
        )*
    };
}

impl_state_codec_le!(i8, u16, i16, u32, i32, u64, i64);

impl<T: StateCodec, const N: usize> StateCodec for [T; N] {
    fn encode_into(&self, w: &mut Writer<'_>) -> Result<()> {
        T::encode_slice(self, w)
    }

    fn decode_from(r: &mut Reader<'_>) -> Result<Self> {
        T::decode_vec(r, N)?
            .try_into()
            .map_err(|_| SnapshotError::Corrupt("array length mismatch"))
    }

    fn encoded_len(&self) -> usize {
        T::slice_encoded_len(self)
    }
}

impl<T: StateCodec> StateCodec for Vec<T> {
    fn encode_into(&self, w: &mut Writer<'_>) -> Result<()> {
        w.put_len(self.len())?;
        T::encode_slice(self, w)
    }

    fn decode_from(r: &mut Reader<'_>) -> Result<Self> {
        let count = r.take_len()?;
        if count > r.remaining() {
            // Elements that take input run out of it; zero-sized ones would spin through `count`.
            let mut first = r.clone();
            T::decode_from(&mut first)?;
            if first.position() == r.position() {
                return Err(SnapshotError::Corrupt("vec count exceeds input"));
            }
        }
        T::decode_vec(r, count)
    }

    fn encoded_len(&self) -> usize {
        8 + T::slice_encoded_len(self)
    }
}

impl<T: StateCodec> StateCodec for Option<T> {
    fn encode_into(&self, w: &mut Writer<'_>) -> Result<()> {
        match self {
            None => w.put_u8(0),
            Some(value) => {
                w.put_u8(1)?;
                value.encode_into(w)
            }
        }
    }

    fn decode_from(r: &mut Reader<'_>) -> Result<Self> {
        match r.take_u8()? {
            0 => Ok(None),
            1 => Ok(Some(T::decode_from(r)?)),
            _ => Err(SnapshotError::Corrupt("invalid option flag")),
        }
    }

    fn encoded_len(&self) -> usize {
        1 + self.as_ref().map_or(0, StateCodec::encoded_len)
    }
}

impl<K: StateCodec + Ord, V: StateCodec> StateCodec for BTreeMap<K, V> {
    fn encode_into(&self, w: &mut Writer<'_>) -> Result<()> {
        w.put_len(self.len())?;
        for (key, value) in self {
            key.encode_into(w)?;
            value.encode_into(w)?;
        }
        Ok(())
    }

    fn decode_from(r: &mut Reader<'_>) -> Result<Self> {
        let count = r.take_len()?;
        let mut map = BTreeMap::new();
        for _ in 0..count {
            let key = K::decode_from(r)?;
            let value = V::decode_from(r)?;
            // Keys were written in ascending order; anything else did not come from a map.
            if map.last_key_value().is_some_and(|(last, _)| *last >= key) {
                return Err(SnapshotError::Corrupt("map keys not strictly ascending"));
            }
            map.insert(key, value);
        }
        Ok(map)
    }

    fn encoded_len(&self) -> usize {
        8 + self
            .iter()
            .map(|(k, v)| k.encoded_len() + v.encoded_len())
            .sum::<usize>()
    }
}

/// Size in bytes of the encoding of `value`.
pub fn encoded_len_of<T: StateCodec>(value: &T) -> usize {
    value.encoded_len()
}

/// Encode `value` into a fresh buffer of exactly its encoded length.
pub fn encode_to_vec<T: StateCodec>(value: &T) -> Result<Vec<u8>> {
    encode_into_buffer(value, Vec::new())
}

/// Encode `value` into `buffer`, reusing its allocation.
///
/// The buffer is resized to exactly the encoded length; growth failures are reported as
/// [`SnapshotError::OutOfMemory`]. The encoder must fill the buffer exactly.
pub fn encode_into_buffer<T: StateCodec>(value: &T, mut buffer: Vec<u8>) -> Result<Vec<u8>> {
    encode_into_vec(value, &mut buffer)?;
    Ok(buffer)
}

/// Like [`encode_into_buffer`], but leaves the allocation with the caller when encoding fails.
pub fn encode_into_vec<T: StateCodec>(value: &T, buffer: &mut Vec<u8>) -> Result<()> {
    let len = value.encoded_len();
    try_resize(buffer, len)?;

    let mut w = Writer::new(buffer);
    value.encode_into(&mut w)?;
    if w.position() != len {
        return Err(SnapshotError::Corrupt("encoded length disagrees with encoded_len"));
    }
    Ok(())
}

/// Decode a `T` that must occupy all of `bytes`.
pub fn decode_from_slice<T: StateCodec>(bytes: &[u8]) -> Result<T> {
    let mut r = Reader::new(bytes);
    let value = T::decode_from(&mut r)?;
    r.finish()?;
    Ok(value)
}
