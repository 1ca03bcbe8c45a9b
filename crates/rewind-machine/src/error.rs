use rewind_snapshot::SnapshotError;
use thiserror::Error;

use crate::history::SnapshotKey;

pub type Result<T> = std::result::Result<T, HistoryError>;

#[derive(Debug, Error)]
pub enum HistoryError {
    #[error(transparent)]
    Snapshot(#[from] SnapshotError),

    #[error("snapshot {0} already exists")]
    DuplicateKey(SnapshotKey),

    #[error("no snapshot with key {0}")]
    UnknownKey(SnapshotKey),

    /// A decoded state that is well-formed on the wire but impossible for the machine.
    #[error("invalid machine state: {0}")]
    InvalidState(&'static str),
}
