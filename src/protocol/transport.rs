//! Byte transport over a polled serial port

use embedded_hal::serial::{Read, Write};

use super::{ProtocolError, Result};

/// Upper bound on bytes discarded by one [`Transport::drain`].
const DRAIN_LIMIT: usize = 256;

pub struct Transport<S> {
    serial: S,
}

impl<S> Transport<S>
where
    S: Read<u8> + Write<u8>,
{
    pub fn new(serial: S) -> Self {
        Self { serial }
    }

    pub fn write_all(&mut self, data: &[u8]) -> Result<()> {
        for &byte in data {
            nb::block!(self.serial.write(byte)).map_err(|_| ProtocolError::Transport)?;
        }
        nb::block!(self.serial.flush()).map_err(|_| ProtocolError::Transport)
    }

    /// Next received byte, if one is waiting.
    pub fn try_read(&mut self) -> Result<Option<u8>> {
        match self.serial.read() {
            Ok(byte) => Ok(Some(byte)),
            Err(nb::Error::WouldBlock) => Ok(None),
            Err(nb::Error::Other(_)) => Err(ProtocolError::Transport),
        }
    }

    /// Discard stale input. Returns the number of bytes dropped.
    pub fn drain(&mut self) -> usize {
        let mut dropped = 0;
        while dropped < DRAIN_LIMIT {
            match self.serial.read() {
                Ok(_) => dropped += 1,
                Err(_) => break,
            }
        }
        dropped
    }
}
