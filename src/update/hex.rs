//! Hex record decoding

use super::{Result, UpdateError};

/// count + address (2) + type + checksum
const RECORD_OVERHEAD: usize = 5;
const MAX_RECORD_BYTES: usize = 255 + RECORD_OVERHEAD;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RecordType {
    Data = 0x00,
    Eof = 0x01,
    ExtSegment = 0x02,
    StartSegment = 0x03,
    ExtLinear = 0x04,
    StartLinear = 0x05,
}

impl TryFrom<u8> for RecordType {
    type Error = UpdateError;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0x00 => Ok(RecordType::Data),
            0x01 => Ok(RecordType::Eof),
            0x02 => Ok(RecordType::ExtSegment),
            0x03 => Ok(RecordType::StartSegment),
            0x04 => Ok(RecordType::ExtLinear),
            0x05 => Ok(RecordType::StartLinear),
            _ => Err(UpdateError::BadLine),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HexRecord {
    pub count: u8,
    pub address: u16,
    pub kind: RecordType,
    data: [u8; 256],
}

impl HexRecord {
    pub fn data(&self) -> &[u8] {
        &self.data[..self.count as usize]
    }
}

/// Decode one textual record such as `:0300300002337A1E`.
///
/// Every parsed byte, checksum included, must sum to zero mod 256.
pub fn parse_record(line: &[u8]) -> Result<HexRecord> {
    let start = line
        .iter()
        .position(|&c| c == b':')
        .ok_or(UpdateError::BadLine)?;

    let mut bytes = [0u8; MAX_RECORD_BYTES];
    let mut len = 0;
    let mut checksum: u8 = 0;

    for pair in line[start + 1..].chunks(2) {
        if pair.len() != 2 || len == MAX_RECORD_BYTES {
            return Err(UpdateError::BadLine);
        }
        let value = (nibble(pair[0])? << 4) | nibble(pair[1])?;
        bytes[len] = value;
        len += 1;
        checksum = checksum.wrapping_add(value);
    }

    if len == 0 {
        return Err(UpdateError::BadLine);
    }
    if checksum != 0 {
        return Err(UpdateError::BadChecksum);
    }

    let count = bytes[0];
    if len < RECORD_OVERHEAD || count as usize + RECORD_OVERHEAD != len {
        return Err(UpdateError::BadLine);
    }

    let mut data = [0u8; 256];
    data[..count as usize].copy_from_slice(&bytes[4..4 + count as usize]);

    Ok(HexRecord {
        count,
        address: u16::from_be_bytes([bytes[1], bytes[2]]),
        kind: RecordType::try_from(bytes[3])?,
        data,
    })
}

fn nibble(c: u8) -> Result<u8> {
    match c {
        b'0'..=b'9' => Ok(c - b'0'),
        b'a'..=b'f' => Ok(c - b'a' + 10),
        b'A'..=b'F' => Ok(c - b'A' + 10),
        _ => Err(UpdateError::BadLine),
    }
}
