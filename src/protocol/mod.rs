//! Primary <-> companion link protocol
//!
//! Each command is sent as a frame (see [`packet`]) and answered with one
//! response byte. The primary drives the exchange through [`CompanionLink`].

pub mod packet;
pub mod transport;

use embedded_hal::blocking::delay::DelayMs;
use embedded_hal::serial::{Read, Write};

use crate::config::{
    LINK_BUSY_BACKOFF_MS, LINK_COMMAND_TIMEOUT_MS, LINK_DETECT_ATTEMPTS, LINK_DETECT_INTERVAL_MS,
    LINK_MAX_BUSY_RETRIES, LINK_POLL_INTERVAL_MS, LINK_SETTLE_MS,
};
use packet::{FrameHeader, MAX_PAYLOAD_LEN};
use transport::Transport;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolError {
    Timeout,
    /// The companion answered with something other than Ok
    Rejected(Response),
    UnexpectedResponse(u8),
    Transport,
    PayloadTooLarge,
    NotConnected,
    UnknownCommand(u8),
}

pub type Result<T> = core::result::Result<T, ProtocolError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Command {
    Ping = 0x00,
    BeginUpdate = 0xA0,
    DataChunk = 0xA1,
    EndUpdate = 0xA2,
    AbortUpdate = 0xA3,
    Reboot = 0xA4,
}

impl TryFrom<u8> for Command {
    type Error = u8;

    fn try_from(value: u8) -> core::result::Result<Self, u8> {
        match value {
            0x00 => Ok(Command::Ping),
            0xA0 => Ok(Command::BeginUpdate),
            0xA1 => Ok(Command::DataChunk),
            0xA2 => Ok(Command::EndUpdate),
            0xA3 => Ok(Command::AbortUpdate),
            0xA4 => Ok(Command::Reboot),
            other => Err(other),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Response {
    Ok = 0xB0,
    Error = 0xB1,
    Busy = 0xB2,
    Ready = 0xB3,
}

impl TryFrom<u8> for Response {
    type Error = u8;

    fn try_from(value: u8) -> core::result::Result<Self, u8> {
        match value {
            0xB0 => Ok(Response::Ok),
            0xB1 => Ok(Response::Error),
            0xB2 => Ok(Response::Busy),
            0xB3 => Ok(Response::Ready),
            other => Err(other),
        }
    }
}

/// Command/response access to the companion as seen by the update coordinator.
pub trait CommandChannel {
    /// Check the companion answers, updating the connected flag.
    fn probe(&mut self) -> Result<()>;

    fn is_connected(&self) -> bool;

    fn execute(&mut self, command: Command, payload: &[u8]) -> Result<()>;

    /// Close the update and restart the companion into it.
    fn finish_update(&mut self) -> Result<()> {
        self.execute(Command::EndUpdate, &[])?;
        self.execute(Command::Reboot, &[])
    }
}

pub struct CompanionLink<S, D> {
    transport: Transport<S>,
    delay: D,
    connected: bool,
}

impl<S, D> CompanionLink<S, D>
where
    S: Read<u8> + Write<u8>,
    D: DelayMs<u16>,
{
    pub fn new(serial: S, delay: D) -> Self {
        Self {
            transport: Transport::new(serial),
            delay,
            connected: false,
        }
    }

    /// Ping a few times, spaced out, until the companion answers.
    pub fn detect(&mut self) -> bool {
        for attempt in 0..LINK_DETECT_ATTEMPTS {
            if attempt > 0 {
                self.delay.delay_ms(LINK_DETECT_INTERVAL_MS);
            }
            if self.ping().is_ok() {
                log::info!("link: companion detected");
                return true;
            }
        }
        log::warn!("link: companion not detected");
        false
    }

    pub fn ping(&mut self) -> Result<()> {
        let stale = self.transport.drain();
        if stale > 0 {
            log::debug!("link: dropped {} stale bytes", stale);
        }

        let result = self.exchange(Command::Ping, &[]);
        self.connected = result.is_ok();
        result
    }

    fn exchange(&mut self, command: Command, payload: &[u8]) -> Result<()> {
        let length = u32::try_from(payload.len())
            .ok()
            .filter(|&len| len <= MAX_PAYLOAD_LEN)
            .ok_or(ProtocolError::PayloadTooLarge)?;

        let header = FrameHeader {
            command: command as u8,
            length,
        };
        self.transport.write_all(&header.encode())?;
        if !payload.is_empty() {
            self.transport.write_all(payload)?;
        }

        self.await_response()
    }

    fn await_response(&mut self) -> Result<()> {
        let mut elapsed: u32 = 0;
        let mut busy: u8 = 0;

        loop {
            match self.transport.try_read()? {
                Some(byte) => match Response::try_from(byte) {
                    Ok(Response::Ok) => return Ok(()),
                    Ok(Response::Busy) => {
                        busy += 1;
                        if busy > LINK_MAX_BUSY_RETRIES {
                            return Err(ProtocolError::Rejected(Response::Busy));
                        }
                        self.delay.delay_ms(LINK_BUSY_BACKOFF_MS);
                        elapsed += u32::from(LINK_BUSY_BACKOFF_MS);
                    }
                    Ok(other) => return Err(ProtocolError::Rejected(other)),
                    Err(byte) => return Err(ProtocolError::UnexpectedResponse(byte)),
                },
                None => {
                    if elapsed >= LINK_COMMAND_TIMEOUT_MS {
                        return Err(ProtocolError::Timeout);
                    }
                    self.delay.delay_ms(LINK_POLL_INTERVAL_MS);
                    elapsed += u32::from(LINK_POLL_INTERVAL_MS);
                }
            }
        }
    }
}

impl<S, D> CommandChannel for CompanionLink<S, D>
where
    S: Read<u8> + Write<u8>,
    D: DelayMs<u16>,
{
    fn probe(&mut self) -> Result<()> {
        self.ping()
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    fn execute(&mut self, command: Command, payload: &[u8]) -> Result<()> {
        if !self.connected {
            return Err(ProtocolError::NotConnected);
        }

        let result = self.exchange(command, payload);
        if let Err(err) = result {
            log::warn!("link: {:?} failed: {:?}", command, err);
        }
        result
    }

    fn finish_update(&mut self) -> Result<()> {
        self.execute(Command::EndUpdate, &[])?;
        self.delay.delay_ms(LINK_SETTLE_MS);
        self.execute(Command::Reboot, &[])
    }
}
