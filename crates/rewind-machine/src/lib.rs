//! Machine state of an Amstrad-CPC-class home computer and a keyed rewind history over it.

mod error;

pub mod history;
pub mod rom;
pub mod state;

pub use crate::error::{HistoryError, Result};
pub use crate::history::{HistoryOptions, SnapshotHistory, SnapshotKey};
pub use crate::rom::{Rom, RomCache, RomId, ROM_LEN};
pub use crate::state::{
    Bank, CrtcState, FdcPhase, FdcState, FddState, GateArrayState, KeyboardState, MachineState,
    MemoryState, PpiState, PsgState, TapeDataBlock, TapePhase, TapeSpeedBlock, TapeState,
    Z80State, BANK_COUNT, BANK_LEN,
};
