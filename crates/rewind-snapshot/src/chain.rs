use tracing::{debug, warn};

use crate::blob::{BlobId, BlobState, BlobStore};
use crate::codec::{decode_from_slice, encode_into_vec, StateCodec};
use crate::error::{Result, SnapshotError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChainOptions {
    /// Hand the buffer vacated by diffing the previous head to the next capture.
    pub recycle_buffers: bool,
    /// In debug builds, rehydrate the previous head right after diffing it and compare it with
    /// the bytes it held before. The blob is diffed again afterwards.
    pub verify_diffs: bool,
}

impl Default for ChainOptions {
    fn default() -> Self {
        Self {
            recycle_buffers: true,
            verify_diffs: false,
        }
    }
}

/// Handle to one captured state.
///
/// Handles are move-only: the chain tracks which blobs are still retained, so a handle must be
/// given back through [`SnapshotChain::release`] to let its storage be reclaimed. Dropping a
/// handle instead leaks its blob, and every older blob diffed against it, for the life of the
/// chain.
#[derive(Debug)]
#[must_use = "a dropped snapshot is never reclaimed; pass it to SnapshotChain::release"]
pub struct Snapshot {
    blob: BlobId,
    seq: u64,
    recycled: Option<Vec<u8>>,
}

impl Snapshot {
    /// Capture order within the chain, starting at 0.
    pub fn seq(&self) -> u64 {
        self.seq
    }

    pub fn blob(&self) -> BlobId {
        self.blob
    }

    /// Buffer waiting to be reused by the next capture that names this snapshot as `previous`.
    pub fn recycled_buffer(&self) -> Option<&[u8]> {
        self.recycled.as_deref()
    }
}

/// Append-only chain of snapshots where only the newest is kept in full.
///
/// Each capture diffs the previous head against the new one, so every older snapshot is a
/// run-length-encoded XOR delta against the snapshot captured right after it.
#[derive(Default)]
pub struct SnapshotChain {
    blobs: BlobStore,
    options: ChainOptions,
    next_seq: u64,
}

impl SnapshotChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_options(options: ChainOptions) -> Self {
        Self {
            options,
            ..Self::default()
        }
    }

    pub fn options(&self) -> ChainOptions {
        self.options
    }

    /// Serialize `state` as the new chain head and diff `previous` against it.
    #[must_use = "the returned snapshot must be released to reclaim its storage"]
    pub fn capture<T: StateCodec>(
        &mut self,
        state: &T,
        mut previous: Option<&mut Snapshot>,
    ) -> Result<Snapshot> {
        let mut buffer = self.take_recycled(previous.as_deref_mut());
        let recycled = buffer.capacity() > 0;
        if let Err(err) = encode_into_vec(state, &mut buffer) {
            if recycled {
                Self::put_back(previous, buffer);
            }
            return Err(err);
        }
        self.link(buffer, previous, recycled)
    }

    /// Thread an externally produced flat state buffer into the chain as the new head.
    #[must_use = "the returned snapshot must be released to reclaim its storage"]
    pub fn capture_bytes(
        &mut self,
        bytes: &[u8],
        mut previous: Option<&mut Snapshot>,
    ) -> Result<Snapshot> {
        let mut buffer = self.take_recycled(previous.as_deref_mut());
        let recycled = buffer.capacity() > 0;
        buffer.clear();
        if buffer.try_reserve_exact(bytes.len()).is_err() {
            if recycled {
                Self::put_back(previous, buffer);
            }
            return Err(SnapshotError::OutOfMemory { len: bytes.len() });
        }
        buffer.extend_from_slice(bytes);
        self.link(buffer, previous, recycled)
    }

    fn take_recycled(&self, previous: Option<&mut Snapshot>) -> Vec<u8> {
        if !self.options.recycle_buffers {
            return Vec::new();
        }
        previous
            .and_then(|prev| prev.recycled.take())
            .filter(|buf| buf.capacity() > 0)
            .unwrap_or_default()
    }

    fn put_back(previous: Option<&mut Snapshot>, buffer: Vec<u8>) {
        if let Some(prev) = previous {
            prev.recycled = Some(buffer);
        }
    }

    fn link(
        &mut self,
        bytes: Vec<u8>,
        previous: Option<&mut Snapshot>,
        recycled: bool,
    ) -> Result<Snapshot> {
        let size = bytes.len();
        let head = self.blobs.insert(bytes)?;

        let mut released = None;
        if let Some(prev) = previous {
            let diffed = match self.blobs.state(prev.blob) {
                Ok(BlobState::Materialized) => self.diff_previous(prev.blob, head).map(Some),
                Ok(BlobState::Diffed) => {
                    debug!(
                        previous = prev.seq,
                        "previous snapshot already diffed; capturing a new branch head"
                    );
                    Ok(None)
                }
                Err(err) => Err(err),
            };
            match diffed {
                Ok(buffer) => released = buffer,
                Err(err) => {
                    match self.blobs.discard(head) {
                        Ok(buffer) if recycled => Self::put_back(Some(prev), buffer),
                        Ok(_) => {}
                        Err(discard_err) => warn!(
                            previous = prev.seq,
                            error = %discard_err,
                            "failed to discard head of a failed capture"
                        ),
                    }
                    return Err(err);
                }
            }
        }

        let seq = self.next_seq;
        self.next_seq += 1;
        debug!(
            seq,
            size,
            recycled,
            footprint = self.blobs.footprint(),
            live = self.blobs.len(),
            "captured snapshot"
        );
        Ok(Snapshot {
            blob: head,
            seq,
            recycled: released.filter(|_| self.options.recycle_buffers),
        })
    }

    fn diff_previous(&mut self, previous: BlobId, head: BlobId) -> Result<Vec<u8>> {
        let expected = if self.options.verify_diffs && cfg!(debug_assertions) {
            Some(self.blobs.data(previous)?.to_vec())
        } else {
            None
        };

        let released = self.blobs.set_diff_parent(previous, head)?;

        if let Some(expected) = expected {
            let verified = match self.blobs.data(previous) {
                Ok(bytes) if bytes == expected.as_slice() => Ok(()),
                Ok(_) => Err(SnapshotError::Corrupt("diff verification failed")),
                Err(err) => Err(err),
            };
            if let Err(err) = verified {
                warn!(blob = previous.index(), error = %err, "diff verification failed");
                // Unlink `previous` from the head so the failed capture can be rolled back.
                self.blobs.rematerialize(previous, expected)?;
                return Err(err);
            }
            // Verification rehydrated the blob; diff it again so the chain shape is unchanged.
            self.blobs.set_diff_parent(previous, head)?;
        }
        Ok(released)
    }

    /// Decode the state held by `snapshot`.
    pub fn restore<T: StateCodec>(&mut self, snapshot: &Snapshot) -> Result<T> {
        decode_from_slice(self.blobs.data(snapshot.blob)?)
    }

    /// The flat serialized state held by `snapshot`, rehydrated if necessary.
    pub fn state_bytes(&mut self, snapshot: &Snapshot) -> Result<&[u8]> {
        self.blobs.data(snapshot.blob)
    }

    /// Bytes physically held for `snapshot` (full state or encoded delta).
    pub fn size(&self, snapshot: &Snapshot) -> Result<usize> {
        self.blobs.stored_len(snapshot.blob)
    }

    /// Length of the serialized state held by `snapshot`.
    pub fn logical_size(&self, snapshot: &Snapshot) -> Result<usize> {
        self.blobs.size(snapshot.blob)
    }

    pub fn is_materialized(&self, snapshot: &Snapshot) -> Result<bool> {
        Ok(self.blobs.state(snapshot.blob)? == BlobState::Materialized)
    }

    /// Give a snapshot back. Its storage is reclaimed once no older snapshot depends on it.
    pub fn release(&mut self, snapshot: Snapshot) -> Result<()> {
        self.blobs.release(snapshot.blob)
    }

    /// Live blobs, including released ones still needed to rebuild older snapshots.
    pub fn blob_count(&self) -> usize {
        self.blobs.len()
    }

    /// Physical bytes held by the whole chain.
    pub fn footprint(&self) -> usize {
        self.blobs.footprint()
    }

    pub fn blobs(&self) -> &BlobStore {
        &self.blobs
    }
}
