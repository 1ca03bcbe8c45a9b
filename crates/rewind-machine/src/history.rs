//! Per-emulator snapshot session: keyed snapshots over one diff chain.

use std::collections::BTreeMap;
use std::fmt;
use std::io::{Read, Write};

use rewind_snapshot::{
    decode_from_slice, encode_to_vec, read_state, write_state, ChainOptions, ReadOptions,
    SaveOptions, Snapshot, SnapshotChain,
};
use tracing::debug;

use crate::error::{HistoryError, Result};
use crate::rom::RomCache;
use crate::state::MachineState;

/// Caller-chosen name of a retained snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SnapshotKey(pub u64);

impl fmt::Display for SnapshotKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HistoryOptions {
    pub chain: ChainOptions,
}

/// Snapshot history of one emulated machine.
///
/// Every capture diffs the current head against the new state, so only the newest snapshot on
/// each branch is held in full. Reverting moves the head: the next capture starts a branch from
/// the reverted snapshot.
pub struct SnapshotHistory {
    chain: SnapshotChain,
    roms: RomCache,
    snapshots: BTreeMap<SnapshotKey, Snapshot>,
    head: Option<SnapshotKey>,
    next_key: u64,
}

impl Default for SnapshotHistory {
    fn default() -> Self {
        Self::new(HistoryOptions::default())
    }
}

impl SnapshotHistory {
    pub fn new(options: HistoryOptions) -> Self {
        Self {
            chain: SnapshotChain::with_options(options.chain),
            roms: RomCache::new(),
            snapshots: BTreeMap::new(),
            head: None,
            next_key: 0,
        }
    }

    /// Capture `state` under a fresh key.
    pub fn capture(&mut self, state: &MachineState) -> Result<SnapshotKey> {
        while self.snapshots.contains_key(&SnapshotKey(self.next_key)) {
            self.next_key += 1;
        }
        let key = SnapshotKey(self.next_key);
        self.create_snapshot(key, state)?;
        Ok(key)
    }

    /// Capture `state` under `key` and make it the head.
    pub fn create_snapshot(&mut self, key: SnapshotKey, state: &MachineState) -> Result<()> {
        if self.snapshots.contains_key(&key) {
            return Err(HistoryError::DuplicateKey(key));
        }
        // Anything captured must restore, and restoring validates.
        state.validate()?;
        let previous = match self.head {
            Some(head) => self.snapshots.get_mut(&head),
            None => None,
        };
        let snapshot = self.chain.capture(state, previous)?;
        debug!(
            key = key.0,
            parent = self.head.map(|k| k.0),
            footprint = self.chain.footprint(),
            "created snapshot"
        );
        self.snapshots.insert(key, snapshot);
        self.head = Some(key);
        Ok(())
    }

    /// Restore the state saved under `key` and continue history from there.
    pub fn revert_to_snapshot(&mut self, key: SnapshotKey) -> Result<MachineState> {
        let state = self.state_of(key)?;
        debug!(key = key.0, from = self.head.map(|k| k.0), "reverted to snapshot");
        self.head = Some(key);
        Ok(state)
    }

    /// Decode the state saved under `key` without moving the head.
    pub fn state_of(&mut self, key: SnapshotKey) -> Result<MachineState> {
        let snapshot = self
            .snapshots
            .get(&key)
            .ok_or(HistoryError::UnknownKey(key))?;
        let mut state: MachineState = self.chain.restore(snapshot)?;
        state.validate()?;
        state.memory.intern_roms(&mut self.roms);
        Ok(state)
    }

    /// Forget the snapshot saved under `key`. Its storage is reclaimed once no older snapshot
    /// needs it.
    pub fn delete_snapshot(&mut self, key: SnapshotKey) -> Result<()> {
        let snapshot = self
            .snapshots
            .remove(&key)
            .ok_or(HistoryError::UnknownKey(key))?;
        if self.head == Some(key) {
            self.head = None;
        }
        self.chain.release(snapshot)?;
        debug!(key = key.0, live = self.chain.blob_count(), "deleted snapshot");
        Ok(())
    }

    /// Serialize `state` into one flat buffer, independent of any snapshot.
    pub fn get_state(&self, state: &MachineState) -> Result<Vec<u8>> {
        state.validate()?;
        Ok(encode_to_vec(state)?)
    }

    /// Inverse of [`SnapshotHistory::get_state`].
    pub fn load_state(&mut self, bytes: &[u8]) -> Result<MachineState> {
        let mut state: MachineState = decode_from_slice(bytes)?;
        state.validate()?;
        state.memory.intern_roms(&mut self.roms);
        Ok(state)
    }

    /// Write the snapshot saved under `key` as a state file.
    pub fn save_to<W: Write>(
        &mut self,
        w: &mut W,
        key: SnapshotKey,
        options: SaveOptions,
    ) -> Result<()> {
        let snapshot = self
            .snapshots
            .get(&key)
            .ok_or(HistoryError::UnknownKey(key))?;
        let bytes = self.chain.state_bytes(snapshot)?;
        write_state(w, bytes, options)?;
        Ok(())
    }

    /// Read a state file written by [`SnapshotHistory::save_to`].
    pub fn load_from<R: Read>(&mut self, r: &mut R, options: ReadOptions) -> Result<MachineState> {
        let bytes = read_state(r, options)?;
        self.load_state(&bytes)
    }

    pub fn head(&self) -> Option<SnapshotKey> {
        self.head
    }

    pub fn contains(&self, key: SnapshotKey) -> bool {
        self.snapshots.contains_key(&key)
    }

    pub fn keys(&self) -> impl Iterator<Item = SnapshotKey> + '_ {
        self.snapshots.keys().copied()
    }

    pub fn len(&self) -> usize {
        self.snapshots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshots.is_empty()
    }

    /// Physical bytes held by all snapshots.
    pub fn footprint(&self) -> usize {
        self.chain.footprint()
    }

    /// Physical bytes held for the snapshot under `key`.
    pub fn size(&self, key: SnapshotKey) -> Result<usize> {
        let snapshot = self
            .snapshots
            .get(&key)
            .ok_or(HistoryError::UnknownKey(key))?;
        Ok(self.chain.size(snapshot)?)
    }

    pub fn roms(&self) -> &RomCache {
        &self.roms
    }

    pub fn chain(&self) -> &SnapshotChain {
        &self.chain
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rom::{Rom, ROM_LEN};

    fn machine(frame: u8) -> MachineState {
        let mut state = MachineState::default();
        state.ticks = u64::from(frame) * 19_968;
        state.z80.pc = 0x0100 + u16::from(frame);
        state.memory.banks[1].bytes_mut()[usize::from(frame)] = frame;
        state.memory.lower_rom = Rom::new([0xAA; ROM_LEN]);
        state.screen_height = 4;
        state.screen_pitch = 8;
        state.screen = vec![frame; 32];
        state
    }

    #[test]
    fn keyed_snapshots_restore_exactly() {
        let mut history = SnapshotHistory::default();
        history.create_snapshot(SnapshotKey(10), &machine(1)).unwrap();
        history.create_snapshot(SnapshotKey(20), &machine(2)).unwrap();
        history.create_snapshot(SnapshotKey(30), &machine(3)).unwrap();

        assert_eq!(history.state_of(SnapshotKey(10)).unwrap(), machine(1));
        assert_eq!(history.state_of(SnapshotKey(30)).unwrap(), machine(3));
        assert_eq!(history.state_of(SnapshotKey(20)).unwrap(), machine(2));
        assert_eq!(history.head(), Some(SnapshotKey(30)));
    }

    #[test]
    fn duplicate_and_unknown_keys_are_errors() {
        let mut history = SnapshotHistory::default();
        history.create_snapshot(SnapshotKey(1), &machine(1)).unwrap();
        assert!(matches!(
            history.create_snapshot(SnapshotKey(1), &machine(2)),
            Err(HistoryError::DuplicateKey(SnapshotKey(1)))
        ));
        assert!(matches!(
            history.revert_to_snapshot(SnapshotKey(2)),
            Err(HistoryError::UnknownKey(SnapshotKey(2)))
        ));
        assert!(matches!(
            history.delete_snapshot(SnapshotKey(2)),
            Err(HistoryError::UnknownKey(SnapshotKey(2)))
        ));
        assert_eq!(history.len(), 1);
    }

    #[test]
    fn auto_keys_skip_explicit_ones() {
        let mut history = SnapshotHistory::default();
        history.create_snapshot(SnapshotKey(0), &machine(0)).unwrap();
        history.create_snapshot(SnapshotKey(1), &machine(1)).unwrap();
        assert_eq!(history.capture(&machine(2)).unwrap(), SnapshotKey(2));
        assert_eq!(history.capture(&machine(3)).unwrap(), SnapshotKey(3));
    }

    #[test]
    fn revert_branches_the_history() {
        let mut history = SnapshotHistory::default();
        let a = history.capture(&machine(1)).unwrap();
        let b = history.capture(&machine(2)).unwrap();

        assert_eq!(history.revert_to_snapshot(a).unwrap(), machine(1));
        assert_eq!(history.head(), Some(a));

        let c = history.capture(&machine(9)).unwrap();
        assert_eq!(history.state_of(b).unwrap(), machine(2));
        assert_eq!(history.state_of(c).unwrap(), machine(9));
        assert_eq!(history.state_of(a).unwrap(), machine(1));
    }

    #[test]
    fn deleting_the_head_starts_a_fresh_chain() {
        let mut history = SnapshotHistory::default();
        let a = history.capture(&machine(1)).unwrap();
        let b = history.capture(&machine(2)).unwrap();
        history.delete_snapshot(b).unwrap();
        assert_eq!(history.head(), None);

        // `a` still needs b's blob until it is rehydrated.
        assert_eq!(history.state_of(a).unwrap(), machine(1));
        let c = history.capture(&machine(3)).unwrap();
        assert_eq!(history.state_of(c).unwrap(), machine(3));
        assert!(!history.contains(b));
    }

    #[test]
    fn restored_roms_share_storage() {
        let mut history = SnapshotHistory::default();
        let a = history.capture(&machine(1)).unwrap();
        let b = history.capture(&machine(2)).unwrap();
        let sa = history.state_of(a).unwrap();
        let sb = history.state_of(b).unwrap();
        assert!(sa.memory.lower_rom.shares_storage_with(&sb.memory.lower_rom));
        assert_eq!(history.roms().len(), 1);
    }

    #[test]
    fn flat_state_roundtrip() {
        let mut history = SnapshotHistory::default();
        let bytes = history.get_state(&machine(5)).unwrap();
        assert_eq!(history.load_state(&bytes).unwrap(), machine(5));
        assert!(history.load_state(&bytes[..bytes.len() - 1]).is_err());
    }

    #[test]
    fn invalid_decoded_state_is_rejected() {
        let mut history = SnapshotHistory::default();
        let mut bad = machine(1);
        bad.memory.ram_config = 9;
        let bytes = encode_to_vec(&bad).unwrap();
        assert!(matches!(
            history.load_state(&bytes),
            Err(HistoryError::InvalidState(_))
        ));
    }

    #[test]
    fn unrestorable_state_is_not_captured() {
        let mut history = SnapshotHistory::default();
        let a = history.capture(&machine(1)).unwrap();
        let blobs = history.chain().blob_count();

        let mut bad = machine(2);
        bad.screen = Vec::new();
        assert!(matches!(
            history.capture(&bad),
            Err(HistoryError::InvalidState("screen buffer size mismatch"))
        ));
        assert!(matches!(
            history.get_state(&bad),
            Err(HistoryError::InvalidState(_))
        ));
        assert_eq!(history.len(), 1);
        assert_eq!(history.head(), Some(a));
        assert_eq!(history.chain().blob_count(), blobs);

        // The head was not diffed, so the next capture still links to it.
        let b = history.capture(&machine(3)).unwrap();
        assert_eq!(history.state_of(a).unwrap(), machine(1));
        assert_eq!(history.state_of(b).unwrap(), machine(3));
    }

    #[test]
    fn state_file_roundtrip() {
        let mut history = SnapshotHistory::default();
        let a = history.capture(&machine(1)).unwrap();
        history.capture(&machine(2)).unwrap();

        let mut file = Vec::new();
        history
            .save_to(&mut file, a, SaveOptions::default())
            .unwrap();
        let loaded = history
            .load_from(&mut file.as_slice(), ReadOptions::default())
            .unwrap();
        assert_eq!(loaded, machine(1));
    }
}
