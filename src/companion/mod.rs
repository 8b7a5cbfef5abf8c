//! Companion side of the update link
//!
//! [`OtaReceiver`] turns link commands into slot operations, [`bridge`] feeds
//! it from the UART and [`slot`] stores images in external flash.

pub mod bridge;
pub mod slot;

pub use bridge::{CompanionBridge, ResetTrigger};
pub use slot::{BootRecord, ExternalSlot, SlotError};

use core::fmt::Debug;

use crate::protocol::{Command, Response};
use crate::update::{parse_record, RecordType};

/// Writable update slot on the companion.
pub trait OtaSlot {
    type Error: Debug;

    fn begin(&mut self) -> Result<(), Self::Error>;

    /// Append image bytes in order.
    fn write(&mut self, data: &[u8]) -> Result<(), Self::Error>;

    /// Close the slot and mark it bootable.
    fn finish(&mut self) -> Result<(), Self::Error>;

    fn abort(&mut self);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Reply {
    pub response: Response,
    /// Restart once the response has gone out
    pub reboot: bool,
}

impl Reply {
    const fn ok() -> Self {
        Self {
            response: Response::Ok,
            reboot: false,
        }
    }

    const fn error() -> Self {
        Self {
            response: Response::Error,
            reboot: false,
        }
    }
}

pub struct OtaReceiver<P> {
    slot: P,
    open: bool,
}

impl<P: OtaSlot> OtaReceiver<P> {
    pub fn new(slot: P) -> Self {
        Self { slot, open: false }
    }

    pub fn slot(&self) -> &P {
        &self.slot
    }

    pub fn is_open(&self) -> bool {
        self.open
    }

    pub fn handle(&mut self, command: u8, payload: &[u8]) -> Reply {
        let Ok(command) = Command::try_from(command) else {
            log::warn!("ota: unknown command {:#04x}", command);
            return Reply::error();
        };

        match command {
            Command::Ping => Reply::ok(),
            Command::BeginUpdate => self.begin(),
            Command::DataChunk => self.data_chunk(payload),
            Command::EndUpdate => self.end(),
            Command::AbortUpdate => {
                if self.open {
                    log::info!("ota: update aborted");
                    self.slot.abort();
                    self.open = false;
                }
                Reply::ok()
            }
            Command::Reboot => {
                log::info!("ota: reboot requested");
                Reply {
                    response: Response::Ok,
                    reboot: true,
                }
            }
        }
    }

    fn begin(&mut self) -> Reply {
        if self.open {
            log::warn!("ota: begin while an update is open");
            return Reply::error();
        }
        match self.slot.begin() {
            Ok(()) => {
                log::info!("ota: update started");
                self.open = true;
                Reply::ok()
            }
            Err(err) => {
                log::warn!("ota: begin failed: {:?}", err);
                Reply::error()
            }
        }
    }

    fn data_chunk(&mut self, payload: &[u8]) -> Reply {
        if !self.open {
            return Reply::error();
        }

        let record = match parse_record(payload) {
            Ok(record) => record,
            Err(err) => {
                log::warn!("ota: bad record: {:?}", err);
                return self.abort_with_error();
            }
        };

        if record.kind != RecordType::Data {
            return Reply::ok();
        }

        match self.slot.write(record.data()) {
            Ok(()) => Reply::ok(),
            Err(err) => {
                log::warn!("ota: write failed: {:?}", err);
                self.abort_with_error()
            }
        }
    }

    fn end(&mut self) -> Reply {
        if !self.open {
            return Reply::error();
        }
        self.open = false;

        match self.slot.finish() {
            Ok(()) => {
                log::info!("ota: update complete");
                Reply::ok()
            }
            Err(err) => {
                log::warn!("ota: finish failed: {:?}", err);
                self.slot.abort();
                Reply::error()
            }
        }
    }

    fn abort_with_error(&mut self) -> Reply {
        self.slot.abort();
        self.open = false;
        Reply::error()
    }
}
