//! Serializable state of every component of the emulated machine.
//!
//! Each type encodes its fields in declaration order with no tags or padding, so two builds agree
//! on the layout only if they agree on these field lists.

use std::collections::BTreeMap;

use rewind_snapshot::{Reader, Result, SnapshotError, StateCodec, Writer};

use crate::error::HistoryError;
use crate::rom::{Rom, RomCache};

pub const BANK_LEN: usize = 0x4000;
pub const BANK_COUNT: usize = 8;
pub const KEYBOARD_LINES: usize = 10;
pub const CRTC_REGISTERS: usize = 18;
pub const PSG_REGISTERS: usize = 16;
pub const PALETTE_LEN: usize = 16;
pub const FDC_COMMAND_LEN: usize = 9;
pub const FDC_RESULT_LEN: usize = 7;

/// Implement [`StateCodec`] by encoding the listed fields in order.
macro_rules! state_fields {
    ($ty:ident { $($field:ident),+ $(,)? }) => {
        impl StateCodec for $ty {
            fn encode_into(&self, w: &mut Writer<'_>) -> Result<()> {
                $(self.$field.encode_into(w)?;)+
                Ok(())
            }

            fn decode_from(r: &mut Reader<'_>) -> Result<Self> {
                Ok(Self {
                    $($field: StateCodec::decode_from(r)?,)+
                })
            }
        }
    };
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Z80State {
    pub af: u16,
    pub bc: u16,
    pub de: u16,
    pub hl: u16,
    pub ir: u16,
    pub af_alt: u16,
    pub bc_alt: u16,
    pub de_alt: u16,
    pub hl_alt: u16,
    pub ix: u16,
    pub iy: u16,
    pub pc: u16,
    pub sp: u16,
    pub iff1: bool,
    pub iff2: bool,
    pub interrupt_requested: bool,
    pub interrupt_mode: u8,
    pub ei_delay: u8,
    pub halted: bool,
}

state_fields!(Z80State {
    af,
    bc,
    de,
    hl,
    ir,
    af_alt,
    bc_alt,
    de_alt,
    hl_alt,
    ix,
    iy,
    pc,
    sp,
    iff1,
    iff2,
    interrupt_requested,
    interrupt_mode,
    ei_delay,
    halted,
});

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyboardState {
    /// One byte per scanned line, a clear bit means the key is held.
    pub matrix: [u8; KEYBOARD_LINES],
    pub matrix_clash: [u8; KEYBOARD_LINES],
    pub selected_line: u8,
}

impl Default for KeyboardState {
    fn default() -> Self {
        Self {
            matrix: [0xFF; KEYBOARD_LINES],
            matrix_clash: [0xFF; KEYBOARD_LINES],
            selected_line: 0,
        }
    }
}

state_fields!(KeyboardState {
    matrix,
    matrix_clash,
    selected_line,
});

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CrtcState {
    pub x: u8,
    pub y: u16,
    pub h_count: u8,
    pub v_count: u8,
    pub raster: u8,
    pub in_hsync: bool,
    pub hsync_count: u8,
    pub in_vsync: bool,
    pub vsync_count: u8,
    pub in_vtotal_adjust: bool,
    pub vtotal_adjust_count: u8,
    pub scan_line_count: u8,
    pub vsync_delay: u8,
    pub memory_address: u16,
    pub registers: [u8; CRTC_REGISTERS],
    pub selected_register: u8,
}

state_fields!(CrtcState {
    x,
    y,
    h_count,
    v_count,
    raster,
    in_hsync,
    hsync_count,
    in_vsync,
    vsync_count,
    in_vtotal_adjust,
    vtotal_adjust_count,
    scan_line_count,
    vsync_delay,
    memory_address,
    registers,
    selected_register,
});

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PsgState {
    pub bdir: bool,
    pub bc1: bool,
    pub selected_register: u8,
    pub registers: [u8; PSG_REGISTERS],
    pub tone_ticks: [u16; 3],
    pub channel_state: [bool; 3],
    pub noise_ticks: u16,
    pub noise_amplitude: bool,
    pub noise_random: u32,
    pub envelope_tick_counter: u16,
    pub envelope_step_count: u8,
    pub envelope_period_count: u16,
    pub envelope_state: u8,
    pub noise_tick_counter: u8,
    pub envelope_step_state: u8,
}

state_fields!(PsgState {
    bdir,
    bc1,
    selected_register,
    registers,
    tone_ticks,
    channel_state,
    noise_ticks,
    noise_amplitude,
    noise_random,
    envelope_tick_counter,
    envelope_step_count,
    envelope_period_count,
    envelope_state,
    noise_tick_counter,
    envelope_step_state,
});

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PpiState {
    pub printer_ready: bool,
    pub exp: bool,
    /// `true` for 50 Hz.
    pub refresh_rate: bool,
    pub manufacturer: u8,
    pub tape_write_data: bool,
    pub port_a: u8,
    pub port_b: u8,
    pub port_c: u8,
    pub control: u8,
}

state_fields!(PpiState {
    printer_ready,
    exp,
    refresh_rate,
    manufacturer,
    tape_write_data,
    port_a,
    port_b,
    port_c,
    control,
});

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GateArrayState {
    pub selected_pen: u8,
    pub pens: [u8; PALETTE_LEN],
    pub border: u8,
    pub mode: u8,
}

state_fields!(GateArrayState {
    selected_pen,
    pens,
    border,
    mode,
});

/// One 16 KiB RAM bank.
#[derive(Clone, PartialEq, Eq)]
pub struct Bank(Box<[u8; BANK_LEN]>);

impl Bank {
    pub fn bytes(&self) -> &[u8; BANK_LEN] {
        &self.0
    }

    pub fn bytes_mut(&mut self) -> &mut [u8; BANK_LEN] {
        &mut self.0
    }
}

impl Default for Bank {
    fn default() -> Self {
        Self(Box::new([0u8; BANK_LEN]))
    }
}

impl std::fmt::Debug for Bank {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let nonzero = self.0.iter().filter(|&&b| b != 0).count();
        f.debug_struct("Bank").field("nonzero_bytes", &nonzero).finish()
    }
}

impl StateCodec for Bank {
    fn encode_into(&self, w: &mut Writer<'_>) -> Result<()> {
        w.put(&self.0[..])
    }

    fn decode_from(r: &mut Reader<'_>) -> Result<Self> {
        let mut bank = Bank::default();
        bank.0.copy_from_slice(r.take(BANK_LEN)?);
        Ok(bank)
    }

    fn encoded_len(&self) -> usize {
        BANK_LEN
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MemoryState {
    pub banks: [Bank; BANK_COUNT],
    /// Index into the gate array's RAM banking table, 0..=7.
    pub ram_config: u8,
    pub lower_rom_enabled: bool,
    pub upper_rom_enabled: bool,
    pub selected_upper_rom: u8,
    pub lower_rom: Rom,
    /// Expansion ROMs by slot.
    pub upper_roms: BTreeMap<u8, Rom>,
}

state_fields!(MemoryState {
    banks,
    ram_config,
    lower_rom_enabled,
    upper_rom_enabled,
    selected_upper_rom,
    lower_rom,
    upper_roms,
});

impl MemoryState {
    pub fn validate(&self) -> std::result::Result<(), HistoryError> {
        if self.ram_config > 7 {
            return Err(HistoryError::InvalidState("ram config out of range"));
        }
        Ok(())
    }

    /// Point every ROM handle at the cache's shared copy of its image.
    pub fn intern_roms(&mut self, cache: &mut RomCache) {
        self.lower_rom = cache.intern_rom(&self.lower_rom).1;
        for rom in self.upper_roms.values_mut() {
            *rom = cache.intern_rom(rom).1;
        }
    }
}

/// Floppy drive.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FddState {
    pub current_sector: u8,
    pub current_track: u64,
    /// Raw image of the inserted disk, if any.
    pub disk_image: Option<Vec<u8>>,
}

state_fields!(FddState {
    current_sector,
    current_track,
    disk_image,
});

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[repr(u8)]
pub enum FdcPhase {
    #[default]
    Command = 0,
    Execute = 1,
    Result = 2,
}

impl StateCodec for FdcPhase {
    fn encode_into(&self, w: &mut Writer<'_>) -> Result<()> {
        w.put_u8(*self as u8)
    }

    fn decode_from(r: &mut Reader<'_>) -> Result<Self> {
        match r.take_u8()? {
            0 => Ok(FdcPhase::Command),
            1 => Ok(FdcPhase::Execute),
            2 => Ok(FdcPhase::Result),
            _ => Err(SnapshotError::Corrupt("invalid fdc phase")),
        }
    }

    fn encoded_len(&self) -> usize {
        1
    }
}

/// Floppy disk controller with its two drives.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FdcState {
    pub drives: [FddState; 2],
    pub read_timeout: i32,
    pub main_status: u8,
    pub data: u8,
    pub data_direction: u8,
    pub motor: bool,
    pub current_drive: u8,
    pub current_head: u8,
    pub status: [u8; 4],
    pub seek_completed: bool,
    pub status_changed: bool,
    pub phase: FdcPhase,
    pub command_bytes: [u8; FDC_COMMAND_LEN],
    pub command_byte_count: u8,
    pub exec_bytes: Vec<u8>,
    pub exec_byte_count: u32,
    pub exec_index: u32,
    pub result_bytes: [u8; FDC_RESULT_LEN],
    pub result_byte_count: u8,
    pub result_index: u8,
    pub step_read_time: u8,
    pub head_load_time: u8,
    pub head_unload_time: u8,
    pub non_dma_mode: bool,
    pub read_buffer: Vec<u8>,
    pub read_buffer_index: u32,
}

state_fields!(FdcState {
    drives,
    read_timeout,
    main_status,
    data,
    data_direction,
    motor,
    current_drive,
    current_head,
    status,
    seek_completed,
    status_changed,
    phase,
    command_bytes,
    command_byte_count,
    exec_bytes,
    exec_byte_count,
    exec_index,
    result_bytes,
    result_byte_count,
    result_index,
    step_read_time,
    head_load_time,
    head_unload_time,
    non_dma_mode,
    read_buffer,
    read_buffer_index,
});

impl FdcState {
    pub fn validate(&self) -> std::result::Result<(), HistoryError> {
        if usize::from(self.command_byte_count) > FDC_COMMAND_LEN {
            return Err(HistoryError::InvalidState("fdc command count exceeds buffer"));
        }
        if self.result_index > self.result_byte_count
            || usize::from(self.result_byte_count) > FDC_RESULT_LEN
        {
            return Err(HistoryError::InvalidState("fdc result count exceeds buffer"));
        }
        if self.exec_index > self.exec_byte_count
            || self.exec_byte_count as usize > self.exec_bytes.len()
        {
            return Err(HistoryError::InvalidState("fdc exec count exceeds buffer"));
        }
        if self.read_buffer_index as usize > self.read_buffer.len() {
            return Err(HistoryError::InvalidState("fdc read index exceeds buffer"));
        }
        if self.current_drive > 1 {
            return Err(HistoryError::InvalidState("fdc drive out of range"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[repr(u8)]
pub enum TapePhase {
    #[default]
    Start = 0,
    Pilot = 1,
    Sync1 = 2,
    Sync2 = 3,
    Data = 4,
    Pause = 5,
    End = 6,
}

impl StateCodec for TapePhase {
    fn encode_into(&self, w: &mut Writer<'_>) -> Result<()> {
        w.put_u8(*self as u8)
    }

    fn decode_from(r: &mut Reader<'_>) -> Result<Self> {
        Ok(match r.take_u8()? {
            0 => TapePhase::Start,
            1 => TapePhase::Pilot,
            2 => TapePhase::Sync1,
            3 => TapePhase::Sync2,
            4 => TapePhase::Data,
            5 => TapePhase::Pause,
            6 => TapePhase::End,
            _ => return Err(SnapshotError::Corrupt("invalid tape phase")),
        })
    }

    fn encoded_len(&self) -> usize {
        1
    }
}

/// Pulse timings of a tape data block.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TapeDataBlock {
    pub zero_length: u16,
    pub one_length: u16,
    pub used_bits_last_byte: u8,
    pub pause: u16,
    pub length: u32,
}

state_fields!(TapeDataBlock {
    zero_length,
    one_length,
    used_bits_last_byte,
    pause,
    length,
});

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TapeSpeedBlock {
    pub pilot_pulse_length: u16,
    pub sync1_length: u16,
    pub sync2_length: u16,
    pub pilot_pulse_count: u16,
}

state_fields!(TapeSpeedBlock {
    pilot_pulse_length,
    sync1_length,
    sync2_length,
    pilot_pulse_count,
});

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TapeState {
    pub current_block_index: i32,
    pub block_index: i32,
    pub phase: TapePhase,
    pub pulses_remaining: i32,
    pub data_index: u32,
    pub level_changed: bool,
    pub data_byte: u8,
    pub remaining_bits: i32,
    pub pulse_index: i32,
    pub pause: i32,
    pub data_block: TapeDataBlock,
    pub speed_block: TapeSpeedBlock,
    pub playing: bool,
    pub level: bool,
    pub motor: bool,
    pub tick_pos: u64,
    pub ticks_to_next_level_change: u64,
    /// Raw image of the inserted tape.
    pub buffer: Vec<u8>,
    pub has_tape: bool,
}

state_fields!(TapeState {
    current_block_index,
    block_index,
    phase,
    pulses_remaining,
    data_index,
    level_changed,
    data_byte,
    remaining_bits,
    pulse_index,
    pause,
    data_block,
    speed_block,
    playing,
    level,
    motor,
    tick_pos,
    ticks_to_next_level_change,
    buffer,
    has_tape,
});

/// Everything needed to resume the machine at one instant.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MachineState {
    pub z80: Z80State,
    pub keyboard: KeyboardState,
    pub crtc: CrtcState,
    pub psg: PsgState,
    pub ppi: PpiState,
    pub gate_array: GateArrayState,
    pub ticks: u64,
    pub frequency: u32,
    pub audio_tick_total: u64,
    pub audio_ticks_to_next_sample: u64,
    pub audio_sample_count: u64,
    pub screen_height: u16,
    pub screen_pitch: u16,
    pub memory: MemoryState,
    pub fdc: FdcState,
    pub tape: TapeState,
    pub screen: Vec<u8>,
}

state_fields!(MachineState {
    z80,
    keyboard,
    crtc,
    psg,
    ppi,
    gate_array,
    ticks,
    frequency,
    audio_tick_total,
    audio_ticks_to_next_sample,
    audio_sample_count,
    screen_height,
    screen_pitch,
    memory,
    fdc,
    tape,
    screen,
});

impl MachineState {
    /// Reject states that decode cleanly but could not have come from a running machine.
    pub fn validate(&self) -> std::result::Result<(), HistoryError> {
        self.memory.validate()?;
        self.fdc.validate()?;
        if self.z80.interrupt_mode > 2 {
            return Err(HistoryError::InvalidState("z80 interrupt mode out of range"));
        }
        if usize::from(self.keyboard.selected_line) >= 16 {
            return Err(HistoryError::InvalidState("keyboard line out of range"));
        }
        let screen_len = usize::from(self.screen_height) * usize::from(self.screen_pitch);
        if self.screen.len() != screen_len {
            return Err(HistoryError::InvalidState("screen buffer size mismatch"));
        }
        Ok(())
    }
}
