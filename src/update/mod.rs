//! Firmware update subsystem of the primary chip
//!
//! Bytes written to the update data register are assembled into hex record
//! lines, then either staged into a flash image (primary target) or relayed
//! to the companion chip (companion target).

pub mod coordinator;
pub mod hex;
pub mod image;
pub mod line;
pub mod registers;

pub use coordinator::{Session, UpdateCoordinator};
pub use hex::{parse_record, HexRecord, RecordType};
pub use image::FlashImageBuilder;
pub use line::{Line, LineAssembler};
pub use registers::{HostPower, UpdateRegisters};

use crate::drivers::FlashError;
use crate::protocol::ProtocolError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum UpdateTarget {
    Primary = 0x01,
    Companion = 0x02,
}

impl UpdateTarget {
    pub fn from_register(value: u8) -> Option<Self> {
        match value {
            0x01 => Some(UpdateTarget::Primary),
            0x02 => Some(UpdateTarget::Companion),
            _ => None,
        }
    }
}

/// Status byte returned on every read of the update data register.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum UpdateStatus {
    Off = 0,
    Receiving = 1,
    Failed = 2,
    LineOverflow = 3,
    FlashEmpty = 4,
    FlashOverflow = 5,
    BadLine = 6,
    BadChecksum = 7,
    CommError = 8,
    UnsupportedPlatform = 9,
    AwaitingReboot = 10,
}

impl UpdateStatus {
    pub fn code(self) -> u8 {
        self as u8
    }

    pub fn is_failure(self) -> bool {
        !matches!(
            self,
            UpdateStatus::Off | UpdateStatus::Receiving | UpdateStatus::AwaitingReboot
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            UpdateStatus::Off => "off",
            UpdateStatus::Receiving => "receiving",
            UpdateStatus::Failed => "failed",
            UpdateStatus::LineOverflow => "line overflow",
            UpdateStatus::FlashEmpty => "flash empty",
            UpdateStatus::FlashOverflow => "flash overflow",
            UpdateStatus::BadLine => "bad line",
            UpdateStatus::BadChecksum => "bad checksum",
            UpdateStatus::CommError => "companion comm error",
            UpdateStatus::UnsupportedPlatform => "unsupported platform",
            UpdateStatus::AwaitingReboot => "awaiting reboot",
        }
    }
}

impl ufmt::uDisplay for UpdateStatus {
    fn fmt<W>(&self, f: &mut ufmt::Formatter<'_, W>) -> core::result::Result<(), W::Error>
    where
        W: ufmt::uWrite + ?Sized,
    {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateError {
    LineOverflow,
    FlashEmpty,
    FlashOverflow,
    BadLine,
    BadChecksum,
    CommError,
    UnsupportedPlatform,
    Flash(FlashError),
}

impl From<FlashError> for UpdateError {
    fn from(err: FlashError) -> Self {
        UpdateError::Flash(err)
    }
}

impl From<ProtocolError> for UpdateError {
    fn from(_: ProtocolError) -> Self {
        UpdateError::CommError
    }
}

impl From<UpdateError> for UpdateStatus {
    fn from(err: UpdateError) -> Self {
        match err {
            UpdateError::LineOverflow => UpdateStatus::LineOverflow,
            UpdateError::FlashEmpty => UpdateStatus::FlashEmpty,
            UpdateError::FlashOverflow => UpdateStatus::FlashOverflow,
            UpdateError::BadLine => UpdateStatus::BadLine,
            UpdateError::BadChecksum => UpdateStatus::BadChecksum,
            UpdateError::CommError => UpdateStatus::CommError,
            UpdateError::UnsupportedPlatform => UpdateStatus::UnsupportedPlatform,
            UpdateError::Flash(_) => UpdateStatus::Failed,
        }
    }
}

pub type Result<T> = core::result::Result<T, UpdateError>;

/// Outcome of feeding one byte or applying one record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Progress {
    /// More input expected
    More,
    /// The image is complete
    Complete,
    /// No session is active; the byte was discarded
    Idle,
}
