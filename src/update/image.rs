//! Primary flash image staging

use super::hex::{HexRecord, RecordType};
use super::{Progress, Result, UpdateError};
use crate::bootloader::{BootHandoff, ImageHeader, HEADER_LEN};
use crate::config::{FLASH_SECTOR_SIZE, IMAGE_CAPACITY, IMAGE_FLASH_OFFSET};
use crate::drivers::FlashBank;

/// Header followed by the payload arena, laid out exactly as it is
/// programmed so the commit needs no second buffer.
pub struct FlashImageBuilder {
    buffer: [u8; HEADER_LEN + IMAGE_CAPACITY],
    offset: usize,
}

impl FlashImageBuilder {
    pub const fn new() -> Self {
        Self {
            buffer: [0; HEADER_LEN + IMAGE_CAPACITY],
            offset: 0,
        }
    }

    pub fn reset(&mut self) {
        self.offset = 0;
    }

    /// Bytes staged so far
    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn payload(&self) -> &[u8] {
        &self.buffer[HEADER_LEN..HEADER_LEN + self.offset]
    }

    pub fn apply(&mut self, record: &HexRecord) -> Result<Progress> {
        match record.kind {
            RecordType::Data => {
                let data = record.data();
                let end = self.offset + data.len();
                if end > IMAGE_CAPACITY {
                    return Err(UpdateError::FlashOverflow);
                }
                self.buffer[HEADER_LEN + self.offset..HEADER_LEN + end].copy_from_slice(data);
                self.offset = end;
                Ok(Progress::More)
            }
            RecordType::Eof => {
                if self.offset == 0 {
                    return Err(UpdateError::FlashEmpty);
                }
                Ok(Progress::Complete)
            }
            // The image is one contiguous region: a new linear segment restarts it.
            RecordType::ExtLinear => {
                self.offset = 0;
                Ok(Progress::More)
            }
            RecordType::ExtSegment | RecordType::StartSegment | RecordType::StartLinear => {
                Ok(Progress::More)
            }
        }
    }

    /// Write header and payload to the staging area and return the words the
    /// second stage needs to find it.
    ///
    /// Erase and program run inside one critical section so nothing else can
    /// touch the bank in between.
    pub fn commit<F: FlashBank>(&mut self, flash: &mut F) -> Result<BootHandoff> {
        if self.offset == 0 {
            return Err(UpdateError::FlashEmpty);
        }

        let header = ImageHeader::for_payload(self.payload());
        self.buffer[..HEADER_LEN].copy_from_slice(&header.to_bytes());

        let total = HEADER_LEN + self.offset;
        let erase_len = erase_length(total);
        let image = &self.buffer[..total];

        critical_section::with(|_| {
            flash.erase(IMAGE_FLASH_OFFSET, erase_len)?;
            flash.program(IMAGE_FLASH_OFFSET, image)
        })?;

        log::info!(
            "update: staged {} bytes, crc {:#010x}",
            header.length,
            header.crc32
        );

        Ok(BootHandoff::staged_image())
    }
}

impl Default for FlashImageBuilder {
    fn default() -> Self {
        Self::new()
    }
}

fn erase_length(total: usize) -> u32 {
    let sector = FLASH_SECTOR_SIZE as usize;
    (((total + sector - 1) / sector) * sector) as u32
}
