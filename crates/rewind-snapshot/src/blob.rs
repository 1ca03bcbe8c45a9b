//! Arena of byte blobs that can be stored as run-length-encoded XOR deltas against a newer blob.
//!
//! A blob is either *materialized* (owns its bytes) or *diffed* (owns an encoded delta plus the
//! id of its successor). Reading a diffed blob rehydrates it in place; the logical content never
//! changes, only its physical representation.
//!
//! Slots are reclaimed once no snapshot retains them and no diffed blob depends on them.

use tracing::{debug, trace, warn};

use crate::error::{Result, SnapshotError};
use crate::io::try_resize;
use crate::rle;

/// Generation-checked handle to a blob in a [`BlobStore`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlobId {
    index: u32,
    generation: u32,
}

impl BlobId {
    pub fn index(self) -> u32 {
        self.index
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlobState {
    Materialized,
    Diffed,
}

enum Repr {
    Materialized(Vec<u8>),
    Diffed { successor: BlobId, delta: Vec<u8> },
}

struct Entry {
    size: usize,
    repr: Repr,
    retained: bool,
    /// Number of diffed blobs whose successor is this blob.
    dependents: usize,
}

struct Slot {
    generation: u32,
    entry: Option<Entry>,
}

#[derive(Default)]
pub struct BlobStore {
    slots: Vec<Slot>,
    free: Vec<u32>,
    live: usize,
}

fn xor_in_place(dst: &mut [u8], src: &[u8]) {
    for (d, s) in dst.iter_mut().zip(src) {
        *d ^= *s;
    }
}

impl BlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live blobs.
    pub fn len(&self) -> usize {
        self.live
    }

    pub fn is_empty(&self) -> bool {
        self.live == 0
    }

    /// New materialized, zero-filled blob of `size` bytes.
    pub fn create(&mut self, size: usize) -> Result<BlobId> {
        self.create_from_buffer(Vec::new(), size)
    }

    /// New materialized blob taking ownership of `buffer`, resized or truncated to `size`.
    pub fn create_from_buffer(&mut self, mut buffer: Vec<u8>, size: usize) -> Result<BlobId> {
        try_resize(&mut buffer, size)?;
        self.alloc(Entry {
            size,
            repr: Repr::Materialized(buffer),
            retained: true,
            dependents: 0,
        })
    }

    /// New materialized blob holding exactly `buffer`.
    pub fn insert(&mut self, buffer: Vec<u8>) -> Result<BlobId> {
        let size = buffer.len();
        self.create_from_buffer(buffer, size)
    }

    fn alloc(&mut self, entry: Entry) -> Result<BlobId> {
        let id = match self.free.pop() {
            Some(index) => {
                let slot = &mut self.slots[index as usize];
                slot.entry = Some(entry);
                BlobId {
                    index,
                    generation: slot.generation,
                }
            }
            None => {
                let index = u32::try_from(self.slots.len())
                    .map_err(|_| SnapshotError::Corrupt("blob store index overflow"))?;
                self.slots.push(Slot {
                    generation: 0,
                    entry: Some(entry),
                });
                BlobId {
                    index,
                    generation: 0,
                }
            }
        };
        self.live += 1;
        Ok(id)
    }

    fn entry(&self, id: BlobId) -> Result<&Entry> {
        self.slots
            .get(id.index as usize)
            .filter(|slot| slot.generation == id.generation)
            .and_then(|slot| slot.entry.as_ref())
            .ok_or(SnapshotError::UnknownBlob)
    }

    fn entry_mut(&mut self, id: BlobId) -> Result<&mut Entry> {
        self.slots
            .get_mut(id.index as usize)
            .filter(|slot| slot.generation == id.generation)
            .and_then(|slot| slot.entry.as_mut())
            .ok_or(SnapshotError::UnknownBlob)
    }

    pub fn contains(&self, id: BlobId) -> bool {
        self.entry(id).is_ok()
    }

    /// Logical size. Fixed at creation; never requires rehydration.
    pub fn size(&self, id: BlobId) -> Result<usize> {
        Ok(self.entry(id)?.size)
    }

    pub fn state(&self, id: BlobId) -> Result<BlobState> {
        Ok(match self.entry(id)?.repr {
            Repr::Materialized(_) => BlobState::Materialized,
            Repr::Diffed { .. } => BlobState::Diffed,
        })
    }

    /// Bytes physically held: the raw buffer, or the encoded delta.
    pub fn stored_len(&self, id: BlobId) -> Result<usize> {
        Ok(match &self.entry(id)?.repr {
            Repr::Materialized(bytes) => bytes.len(),
            Repr::Diffed { delta, .. } => delta.len(),
        })
    }

    pub fn successor(&self, id: BlobId) -> Result<Option<BlobId>> {
        Ok(match self.entry(id)?.repr {
            Repr::Materialized(_) => None,
            Repr::Diffed { successor, .. } => Some(successor),
        })
    }

    /// Physical bytes held across every live blob.
    pub fn footprint(&self) -> usize {
        self.slots
            .iter()
            .filter_map(|slot| slot.entry.as_ref())
            .map(|entry| match &entry.repr {
                Repr::Materialized(bytes) => bytes.len(),
                Repr::Diffed { delta, .. } => delta.len(),
            })
            .sum()
    }

    /// Blob content, rehydrating it (and any diffed successors on the way) if needed.
    pub fn data(&mut self, id: BlobId) -> Result<&[u8]> {
        self.materialize(id)?;
        match &self.entry(id)?.repr {
            Repr::Materialized(bytes) => Ok(bytes.as_slice()),
            Repr::Diffed { .. } => {
                Err(SnapshotError::Corrupt("blob still diffed after rehydration"))
            }
        }
    }

    fn materialized_bytes(&self, id: BlobId) -> Option<&[u8]> {
        match &self.entry(id).ok()?.repr {
            Repr::Materialized(bytes) => Some(bytes.as_slice()),
            Repr::Diffed { .. } => None,
        }
    }

    fn materialize(&mut self, id: BlobId) -> Result<()> {
        // Collect the diffed prefix of the chain, then rehydrate newest-first so each step XORs
        // against an already materialized successor. Chain length never becomes stack depth.
        let mut path = Vec::new();
        let mut cur = id;
        while let Repr::Diffed { successor, .. } = self.entry(cur)?.repr {
            if path.len() >= self.live {
                return Err(SnapshotError::CycleDetected);
            }
            path.push(cur);
            cur = successor;
        }
        for &blob in path.iter().rev() {
            self.rehydrate_one(blob)?;
        }
        Ok(())
    }

    fn rehydrate_one(&mut self, id: BlobId) -> Result<()> {
        let entry = self.entry(id)?;
        let size = entry.size;
        let Repr::Diffed { successor, delta } = &entry.repr else {
            return Ok(());
        };
        let successor = *successor;

        let mut bytes = Vec::new();
        rle::decode_exact_into(delta, size, &mut bytes)?;
        let delta_len = delta.len();

        let Some(parent) = self.materialized_bytes(successor) else {
            return Err(SnapshotError::Corrupt("successor not materialized"));
        };
        let n = size.min(parent.len());
        xor_in_place(&mut bytes[..n], &parent[..n]);

        self.entry_mut(id)?.repr = Repr::Materialized(bytes);
        trace!(blob = id.index, size, delta_len, "rehydrated blob");
        self.drop_dependency(successor);
        Ok(())
    }

    /// Convert `id` into a delta against `successor`, returning its vacated raw buffer.
    ///
    /// `id` must be materialized and `successor` must not lead back to `id`. On error `id` is
    /// left exactly as it was.
    pub fn set_diff_parent(&mut self, id: BlobId, successor: BlobId) -> Result<Vec<u8>> {
        if !matches!(self.entry(id)?.repr, Repr::Materialized(_)) {
            return Err(SnapshotError::AlreadyDiffed);
        }
        let mut cur = successor;
        loop {
            if cur == id {
                warn!(blob = id.index, successor = successor.index, "rejected cyclic diff link");
                return Err(SnapshotError::CycleDetected);
            }
            match self.entry(cur)?.repr {
                Repr::Materialized(_) => break,
                Repr::Diffed { successor: next, .. } => cur = next,
            }
        }
        self.materialize(successor)?;

        let mut raw = match &mut self.entry_mut(id)?.repr {
            Repr::Materialized(bytes) => std::mem::take(bytes),
            Repr::Diffed { .. } => return Err(SnapshotError::AlreadyDiffed),
        };

        let Some(parent) = self.materialized_bytes(successor) else {
            self.entry_mut(id)?.repr = Repr::Materialized(raw);
            return Err(SnapshotError::Corrupt("successor not materialized"));
        };
        let n = raw.len().min(parent.len());
        xor_in_place(&mut raw[..n], &parent[..n]);

        let mut delta = Vec::new();
        let encoded = if raw.is_empty() {
            Ok(())
        } else {
            rle::encode_into(&raw, &mut delta)
        };
        if let Err(err) = encoded {
            // XOR is its own inverse; undo it and put the bytes back.
            xor_in_place(&mut raw[..n], &parent[..n]);
            self.entry_mut(id)?.repr = Repr::Materialized(raw);
            return Err(err);
        }

        trace!(
            blob = id.index,
            successor = successor.index,
            size = raw.len(),
            delta_len = delta.len(),
            "diffed blob"
        );
        self.entry_mut(id)?.repr = Repr::Diffed { successor, delta };
        self.entry_mut(successor)?.dependents += 1;
        Ok(raw)
    }

    /// Drop the caller's hold on `id`. The slot is reclaimed once no diffed blob depends on it.
    pub fn release(&mut self, id: BlobId) -> Result<()> {
        let entry = self.entry_mut(id)?;
        entry.retained = false;
        if entry.dependents == 0 {
            if let Some(successor) = self.free_slot(id) {
                self.drop_dependency(successor);
            }
        }
        Ok(())
    }

    fn drop_dependency(&mut self, mut id: BlobId) {
        let mut reclaimed = 0usize;
        loop {
            let Ok(entry) = self.entry_mut(id) else {
                break;
            };
            entry.dependents = entry.dependents.saturating_sub(1);
            if entry.retained || entry.dependents > 0 {
                break;
            }
            reclaimed += 1;
            match self.free_slot(id) {
                Some(next) => id = next,
                None => break,
            }
        }
        if reclaimed > 0 {
            debug!(reclaimed, live = self.live, "reclaimed unreferenced blobs");
        }
    }

    /// Make `bytes` the materialized content of `id`, dropping its delta link if it has one.
    pub(crate) fn rematerialize(&mut self, id: BlobId, bytes: Vec<u8>) -> Result<()> {
        let entry = self.entry_mut(id)?;
        if bytes.len() != entry.size {
            return Err(SnapshotError::Corrupt("rematerialized blob changes size"));
        }
        let old = std::mem::replace(&mut entry.repr, Repr::Materialized(bytes));
        if let Repr::Diffed { successor, .. } = old {
            self.drop_dependency(successor);
        }
        Ok(())
    }

    /// Remove a materialized blob that nothing depends on and hand back its buffer.
    pub(crate) fn discard(&mut self, id: BlobId) -> Result<Vec<u8>> {
        let entry = self.entry(id)?;
        if entry.dependents > 0 {
            return Err(SnapshotError::Corrupt("discarding a blob with dependents"));
        }
        if !matches!(entry.repr, Repr::Materialized(_)) {
            return Err(SnapshotError::AlreadyDiffed);
        }
        match self.take_slot(id).map(|entry| entry.repr) {
            Some(Repr::Materialized(bytes)) => Ok(bytes),
            _ => Err(SnapshotError::UnknownBlob),
        }
    }

    /// Empty the slot, returning the successor the freed blob depended on, if any.
    fn free_slot(&mut self, id: BlobId) -> Option<BlobId> {
        match self.take_slot(id)?.repr {
            Repr::Materialized(_) => None,
            Repr::Diffed { successor, .. } => Some(successor),
        }
    }

    fn take_slot(&mut self, id: BlobId) -> Option<Entry> {
        let slot = self.slots.get_mut(id.index as usize)?;
        if slot.generation != id.generation {
            return None;
        }
        let entry = slot.entry.take()?;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(id.index);
        self.live -= 1;
        Some(entry)
    }
}
