//! Handoff contract with the second-stage bootloader.
//!
//! The primary stages `{magic1, magic2, length, crc32, payload}` at
//! [`IMAGE_FLASH_OFFSET`], stores two words in memory that survives a reset
//! and resets. The second stage finds the words, checks the header with
//! [`verify_image`] and copies the payload over the application.

use crate::config::{IMAGE_CAPACITY, IMAGE_FLASH_BASE, IMAGE_FLASH_OFFSET, IMAGE_MAGIC1, IMAGE_MAGIC2};

pub const HEADER_LEN: usize = 16;
pub const CRC_SEED: u32 = 0xFFFF_FFFF;

const CRC_POLY: u32 = 0x04C1_1DB7;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageHeader {
    pub magic1: u32,
    pub magic2: u32,
    pub length: u32,
    pub crc32: u32,
}

impl ImageHeader {
    pub fn for_payload(payload: &[u8]) -> Self {
        Self {
            magic1: IMAGE_MAGIC1,
            magic2: IMAGE_MAGIC2,
            length: payload.len() as u32,
            crc32: crc32(payload, CRC_SEED),
        }
    }

    pub fn to_bytes(&self) -> [u8; HEADER_LEN] {
        let mut bytes = [0u8; HEADER_LEN];
        bytes[0..4].copy_from_slice(&self.magic1.to_le_bytes());
        bytes[4..8].copy_from_slice(&self.magic2.to_le_bytes());
        bytes[8..12].copy_from_slice(&self.length.to_le_bytes());
        bytes[12..16].copy_from_slice(&self.crc32.to_le_bytes());
        bytes
    }

    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        let word = |i: usize| {
            bytes
                .get(i..i + 4)
                .map(|w| u32::from_le_bytes([w[0], w[1], w[2], w[3]]))
        };
        Some(Self {
            magic1: word(0)?,
            magic2: word(4)?,
            length: word(8)?,
            crc32: word(12)?,
        })
    }
}

/// The two reset-surviving words read by the second stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BootHandoff {
    pub magic: u32,
    pub image_address: u32,
}

impl BootHandoff {
    pub const fn staged_image() -> Self {
        Self {
            magic: IMAGE_MAGIC1,
            image_address: IMAGE_FLASH_BASE + IMAGE_FLASH_OFFSET,
        }
    }

    pub fn words(&self) -> [u32; 2] {
        [self.magic, self.image_address]
    }
}

/// Platform side of the handoff: persist the words, then reset.
///
/// Implementations wait [`RESET_DELAY_MS`](crate::config::RESET_DELAY_MS)
/// after persisting the handoff and before the watchdog reset.
pub trait RebootContract {
    fn reboot(&mut self, handoff: BootHandoff) -> !;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerifyError {
    Truncated,
    BadMagic,
    BadLength,
    BadCrc,
}

/// Check a staged image the way the second stage does and return its payload.
pub fn verify_image(staged: &[u8]) -> Result<&[u8], VerifyError> {
    let header = ImageHeader::from_bytes(staged).ok_or(VerifyError::Truncated)?;

    if header.magic1 != IMAGE_MAGIC1 || header.magic2 != IMAGE_MAGIC2 {
        return Err(VerifyError::BadMagic);
    }

    let length = header.length as usize;
    if length == 0 || length > IMAGE_CAPACITY {
        return Err(VerifyError::BadLength);
    }

    let payload = staged
        .get(HEADER_LEN..HEADER_LEN + length)
        .ok_or(VerifyError::Truncated)?;

    if crc32(payload, CRC_SEED) != header.crc32 {
        return Err(VerifyError::BadCrc);
    }

    Ok(payload)
}

/// Bit-serial CRC-32, MSB first, no final XOR. Feeding the result back in as
/// `crc` continues the computation over a longer stream.
pub fn crc32(data: &[u8], mut crc: u32) -> u32 {
    for &byte in data {
        crc ^= (byte as u32) << 24;
        for _ in 0..8 {
            if crc & 0x8000_0000 != 0 {
                crc = (crc << 1) ^ CRC_POLY;
            } else {
                crc <<= 1;
            }
        }
    }
    crc
}
