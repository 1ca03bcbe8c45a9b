//! Rewind history for a cycle-accurate home-computer emulator.
//!
//! [`snapshot`] holds the machine-agnostic parts: the state codec, the diffing snapshot chain and
//! the state file container. [`machine`] holds the emulated machine's state types and the keyed
//! history built on top of the chain.

pub use rewind_machine as machine;
pub use rewind_snapshot as snapshot;

pub use rewind_machine::{HistoryError, HistoryOptions, MachineState, SnapshotHistory, SnapshotKey};
pub use rewind_snapshot::{ChainOptions, ReadOptions, SaveOptions, SnapshotChain, SnapshotError};
