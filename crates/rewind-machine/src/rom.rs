//! Shared 16 KiB ROM images.
//!
//! Every restored snapshot decodes its own copy of each ROM. [`RomCache`] folds those copies back
//! onto one shared allocation per distinct image, so a long rewind history holds each ROM once.

use std::fmt;
use std::sync::Arc;

use rewind_snapshot::{Reader, Result, StateCodec, Writer};
use tracing::trace;

pub const ROM_LEN: usize = 0x4000;

/// Immutable, cheaply clonable ROM image.
#[derive(Clone, PartialEq, Eq)]
pub struct Rom(Arc<[u8; ROM_LEN]>);

impl Rom {
    pub fn new(image: [u8; ROM_LEN]) -> Self {
        Self(Arc::new(image))
    }

    /// Copy a ROM out of a slice; `None` unless it is exactly 16 KiB.
    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        let image: &[u8; ROM_LEN] = bytes.try_into().ok()?;
        Some(Self(Arc::new(*image)))
    }

    pub fn image(&self) -> &[u8; ROM_LEN] {
        &self.0
    }

    /// Whether both handles point at the same allocation.
    pub fn shares_storage_with(&self, other: &Rom) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl Default for Rom {
    fn default() -> Self {
        Self::new([0u8; ROM_LEN])
    }
}

impl fmt::Debug for Rom {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let nonzero = self.0.iter().filter(|&&b| b != 0).count();
        f.debug_struct("Rom").field("nonzero_bytes", &nonzero).finish()
    }
}

impl StateCodec for Rom {
    fn encode_into(&self, w: &mut Writer<'_>) -> Result<()> {
        w.put(&self.0[..])
    }

    fn decode_from(r: &mut Reader<'_>) -> Result<Self> {
        let mut image = Arc::new([0u8; ROM_LEN]);
        Arc::make_mut(&mut image).copy_from_slice(r.take(ROM_LEN)?);
        Ok(Self(image))
    }

    fn encoded_len(&self) -> usize {
        ROM_LEN
    }
}

/// Position of an image in its [`RomCache`], assigned in first-seen order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RomId(pub u32);

/// Content-addressed set of ROM images owned by one emulator session.
#[derive(Debug, Default)]
pub struct RomCache {
    roms: Vec<Rom>,
}

impl RomCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.roms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.roms.is_empty()
    }

    /// The cached handle for `image`, adding it on first sight.
    pub fn intern(&mut self, image: &[u8; ROM_LEN]) -> (RomId, Rom) {
        if let Some(id) = self.find(image) {
            return (id, self.roms[id.0 as usize].clone());
        }
        self.push(Rom::new(*image))
    }

    /// Like [`RomCache::intern`], but a new image keeps `rom`'s own allocation.
    pub fn intern_rom(&mut self, rom: &Rom) -> (RomId, Rom) {
        if let Some(id) = self.find(rom.image()) {
            return (id, self.roms[id.0 as usize].clone());
        }
        self.push(rom.clone())
    }

    pub fn get(&self, id: RomId) -> Option<&Rom> {
        self.roms.get(id.0 as usize)
    }

    pub fn id_of(&self, rom: &Rom) -> Option<RomId> {
        self.find(rom.image())
    }

    fn find(&self, image: &[u8; ROM_LEN]) -> Option<RomId> {
        // Sessions hold a handful of ROMs, a linear scan is enough.
        self.roms
            .iter()
            .position(|rom| rom.image() == image)
            .map(|i| RomId(i as u32))
    }

    fn push(&mut self, rom: Rom) -> (RomId, Rom) {
        let id = RomId(self.roms.len() as u32);
        trace!(rom = id.0, "interned new rom image");
        self.roms.push(rom.clone());
        (id, rom)
    }
}
