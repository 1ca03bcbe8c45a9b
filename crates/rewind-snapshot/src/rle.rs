//! Run-length codec used for snapshot deltas.
//!
//! The stream is a sequence of spans. Each span starts with a one-byte kind and a 4-byte
//! little-endian length `L`:
//!
//! - literal (`0`): followed by `L` raw bytes
//! - run (`1`): followed by a single byte, logically repeated `L` times
//!
//! XOR deltas between consecutive machine states are mostly zero, so long runs dominate.

use crate::error::{Result, SnapshotError};

/// Shortest repeat emitted as a run span. A span header is 5 bytes, so shorter repeats would
/// not shrink the stream.
pub const MIN_RUN_LEN: usize = 5;

const SPAN_LITERAL: u8 = 0;
const SPAN_RUN: u8 = 1;
const SPAN_HEADER_LEN: usize = 5;
const MAX_SPAN_LEN: usize = u32::MAX as usize;

/// Run-length encode `input` into a fresh buffer.
pub fn encode(input: &[u8]) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    encode_into(input, &mut out)?;
    Ok(out)
}

/// Run-length encode `input`, replacing the contents of `out`.
///
/// Empty input is rejected with [`SnapshotError::EmptyInput`].
pub fn encode_into(input: &[u8], out: &mut Vec<u8>) -> Result<()> {
    if input.is_empty() {
        return Err(SnapshotError::EmptyInput);
    }
    out.clear();

    let mut literal_start = 0;
    let mut i = 0;
    while i < input.len() {
        let byte = input[i];
        let run_len = input[i..].iter().take_while(|&&b| b == byte).count();
        if run_len >= MIN_RUN_LEN {
            push_literal(out, &input[literal_start..i])?;
            push_run(out, byte, run_len)?;
            literal_start = i + run_len;
        }
        i += run_len;
    }
    push_literal(out, &input[literal_start..])?;
    Ok(())
}

fn reserve(out: &mut Vec<u8>, additional: usize) -> Result<()> {
    out.try_reserve(additional)
        .map_err(|_| SnapshotError::OutOfMemory {
            len: out.len().saturating_add(additional),
        })
}

fn push_header(out: &mut Vec<u8>, kind: u8, len: usize) {
    out.push(kind);
    // `len` is capped at MAX_SPAN_LEN by both callers.
    out.extend_from_slice(&(len as u32).to_le_bytes());
}

fn push_literal(out: &mut Vec<u8>, bytes: &[u8]) -> Result<()> {
    for chunk in bytes.chunks(MAX_SPAN_LEN) {
        reserve(out, SPAN_HEADER_LEN + chunk.len())?;
        push_header(out, SPAN_LITERAL, chunk.len());
        out.extend_from_slice(chunk);
    }
    Ok(())
}

fn push_run(out: &mut Vec<u8>, byte: u8, mut len: usize) -> Result<()> {
    while len > 0 {
        let span_len = len.min(MAX_SPAN_LEN);
        reserve(out, SPAN_HEADER_LEN + 1)?;
        push_header(out, SPAN_RUN, span_len);
        out.push(byte);
        len -= span_len;
    }
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Span<'a> {
    Literal(&'a [u8]),
    Run { byte: u8, len: usize },
}

impl Span<'_> {
    fn len(&self) -> usize {
        match self {
            Span::Literal(bytes) => bytes.len(),
            Span::Run { len, .. } => *len,
        }
    }
}

/// Bounds-checked span parser. Every declared length is validated against the remaining input
/// before any payload is touched.
struct Spans<'a> {
    rest: &'a [u8],
}

impl<'a> Spans<'a> {
    fn new(encoded: &'a [u8]) -> Self {
        Self { rest: encoded }
    }

    fn parse_next(&mut self) -> Result<Span<'a>> {
        if self.rest.len() < SPAN_HEADER_LEN {
            return Err(SnapshotError::Decode("truncated span header"));
        }
        let (header, rest) = self.rest.split_at(SPAN_HEADER_LEN);
        let kind = header[0];
        let len = u32::from_le_bytes([header[1], header[2], header[3], header[4]]) as usize;
        match kind {
            SPAN_LITERAL => {
                if len > rest.len() {
                    return Err(SnapshotError::Decode(
                        "literal span length exceeds remaining input",
                    ));
                }
                let (payload, rest) = rest.split_at(len);
                self.rest = rest;
                Ok(Span::Literal(payload))
            }
            SPAN_RUN => {
                let (&byte, rest) = rest
                    .split_first()
                    .ok_or(SnapshotError::Decode("run span missing its byte"))?;
                self.rest = rest;
                Ok(Span::Run { byte, len })
            }
            _ => Err(SnapshotError::Decode("unknown span kind")),
        }
    }
}

impl<'a> Iterator for Spans<'a> {
    type Item = Result<Span<'a>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.rest.is_empty() {
            return None;
        }
        let span = self.parse_next();
        if span.is_err() {
            // Stop after the first malformed span.
            self.rest = &[];
        }
        Some(span)
    }
}

/// Validate `encoded` and return the number of bytes it decodes to.
pub fn decoded_len(encoded: &[u8]) -> Result<usize> {
    let mut total = 0usize;
    for span in Spans::new(encoded) {
        total = total
            .checked_add(span?.len())
            .ok_or(SnapshotError::Decode("decoded length overflow"))?;
    }
    Ok(total)
}

/// Decode a run-length stream into a fresh buffer.
pub fn decode(encoded: &[u8]) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    decode_into(encoded, &mut out)?;
    Ok(out)
}

/// Decode a run-length stream, replacing the contents of `out`.
pub fn decode_into(encoded: &[u8], out: &mut Vec<u8>) -> Result<()> {
    let len = decoded_len(encoded)?;
    replay(encoded, len, out)
}

/// Decode a stream that must expand to exactly `expected_len` bytes. The length is checked
/// before anything is allocated.
pub fn decode_exact_into(encoded: &[u8], expected_len: usize, out: &mut Vec<u8>) -> Result<()> {
    let len = decoded_len(encoded)?;
    if len != expected_len {
        return Err(SnapshotError::Decode("decoded length does not match expected length"));
    }
    replay(encoded, len, out)
}

fn replay(encoded: &[u8], len: usize, out: &mut Vec<u8>) -> Result<()> {
    out.clear();
    out.try_reserve_exact(len)
        .map_err(|_| SnapshotError::OutOfMemory { len })?;
    for span in Spans::new(encoded) {
        match span? {
            Span::Literal(bytes) => out.extend_from_slice(bytes),
            Span::Run { byte, len } => out.resize(out.len() + len, byte),
        }
    }
    Ok(())
}
