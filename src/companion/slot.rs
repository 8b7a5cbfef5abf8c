//! A/B update slots in external NOR flash
//!
//! Layout: two [`SLOT_SIZE`] image slots followed by one sector holding the
//! [`BootRecord`] that names the slot to boot.

use super::OtaSlot;
use crate::bootloader::{crc32, CRC_SEED};
use crate::config::{BOOT_RECORD_MAGIC, BOOT_RECORD_OFFSET, FLASH_SECTOR_SIZE, SLOT_OFFSETS, SLOT_SIZE};
use crate::drivers::{FlashBank, FlashError};

pub const BOOT_RECORD_LEN: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotError {
    /// No update in progress
    NotOpen,
    Full,
    /// Finish with no data written
    Empty,
    Flash(FlashError),
}

impl From<FlashError> for SlotError {
    fn from(err: FlashError) -> Self {
        SlotError::Flash(err)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BootRecord {
    pub slot: u32,
    pub length: u32,
    pub crc32: u32,
}

impl BootRecord {
    pub fn to_bytes(&self) -> [u8; BOOT_RECORD_LEN] {
        let mut bytes = [0u8; BOOT_RECORD_LEN];
        bytes[0..4].copy_from_slice(&BOOT_RECORD_MAGIC.to_le_bytes());
        bytes[4..8].copy_from_slice(&self.slot.to_le_bytes());
        bytes[8..12].copy_from_slice(&self.length.to_le_bytes());
        bytes[12..16].copy_from_slice(&self.crc32.to_le_bytes());
        bytes
    }

    /// None for an erased or foreign sector
    pub fn from_bytes(bytes: &[u8; BOOT_RECORD_LEN]) -> Option<Self> {
        let word = |i: usize| u32::from_le_bytes([bytes[i], bytes[i + 1], bytes[i + 2], bytes[i + 3]]);
        if word(0) != BOOT_RECORD_MAGIC {
            return None;
        }
        let record = Self {
            slot: word(4),
            length: word(8),
            crc32: word(12),
        };
        ((record.slot as usize) < SLOT_OFFSETS.len()).then_some(record)
    }
}

struct Pending {
    slot: u32,
    written: u32,
    erased: u32,
    crc: u32,
}

pub struct ExternalSlot<F> {
    flash: F,
    pending: Option<Pending>,
}

impl<F: FlashBank> ExternalSlot<F> {
    pub fn new(flash: F) -> Self {
        Self {
            flash,
            pending: None,
        }
    }

    pub fn release(self) -> F {
        self.flash
    }

    pub fn boot_record(&mut self) -> Result<Option<BootRecord>, SlotError> {
        let mut bytes = [0u8; BOOT_RECORD_LEN];
        self.flash.read(BOOT_RECORD_OFFSET, &mut bytes)?;
        Ok(BootRecord::from_bytes(&bytes))
    }
}

impl<F: FlashBank> OtaSlot for ExternalSlot<F> {
    type Error = SlotError;

    fn begin(&mut self) -> Result<(), SlotError> {
        let slot = match self.boot_record()? {
            Some(record) if record.slot == 0 => 1,
            _ => 0,
        };
        log::info!("slot: writing slot {}", slot);

        self.pending = Some(Pending {
            slot,
            written: 0,
            erased: 0,
            crc: CRC_SEED,
        });
        Ok(())
    }

    fn write(&mut self, data: &[u8]) -> Result<(), SlotError> {
        let pending = self.pending.as_mut().ok_or(SlotError::NotOpen)?;
        let base = SLOT_OFFSETS[pending.slot as usize];

        let end = pending
            .written
            .checked_add(data.len() as u32)
            .filter(|&end| end <= SLOT_SIZE)
            .ok_or(SlotError::Full)?;

        while pending.erased < end {
            self.flash.erase(base + pending.erased, FLASH_SECTOR_SIZE)?;
            pending.erased += FLASH_SECTOR_SIZE;
        }

        self.flash.program(base + pending.written, data)?;
        pending.crc = crc32(data, pending.crc);
        pending.written = end;
        Ok(())
    }

    fn finish(&mut self) -> Result<(), SlotError> {
        let pending = self.pending.take().ok_or(SlotError::NotOpen)?;
        if pending.written == 0 {
            return Err(SlotError::Empty);
        }

        let record = BootRecord {
            slot: pending.slot,
            length: pending.written,
            crc32: pending.crc,
        };
        self.flash.erase(BOOT_RECORD_OFFSET, FLASH_SECTOR_SIZE)?;
        self.flash.program(BOOT_RECORD_OFFSET, &record.to_bytes())?;

        log::info!("slot: slot {} bootable, {} bytes", record.slot, record.length);
        Ok(())
    }

    fn abort(&mut self) {
        self.pending = None;
    }
}
