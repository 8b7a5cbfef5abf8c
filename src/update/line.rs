//! Hex line assembly from the register byte stream

use super::UpdateError;
use crate::config::{LINE_CAPACITY, SESSION_START_BYTE};

/// Longest line accepted, leaving room for the line-end marker and a spare
/// slot so the buffer never fills.
pub const MAX_LINE_CHARS: usize = LINE_CAPACITY - 2;

#[derive(Debug, PartialEq, Eq)]
pub enum Line<'a> {
    Continue,
    /// A complete line without its terminator
    Ready(&'a [u8]),
    Failed(UpdateError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    /// Discarding the session header up to the first line break
    SkipHeader,
    Normal,
    /// Overflowed; waits for a session start byte
    Overflowed,
}

pub struct LineAssembler {
    buffer: [u8; LINE_CAPACITY],
    len: usize,
    mode: Mode,
}

impl LineAssembler {
    pub const fn new() -> Self {
        Self {
            buffer: [0; LINE_CAPACITY],
            len: 0,
            mode: Mode::Normal,
        }
    }

    /// Drop any partial line and skip the header that follows a session start.
    pub fn restart(&mut self) {
        self.len = 0;
        self.mode = Mode::SkipHeader;
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn push(&mut self, byte: u8) -> Line<'_> {
        if byte == SESSION_START_BYTE {
            self.restart();
            return Line::Continue;
        }

        match self.mode {
            Mode::SkipHeader => {
                if is_line_end(byte) {
                    self.mode = Mode::Normal;
                }
                Line::Continue
            }
            Mode::Overflowed => Line::Failed(UpdateError::LineOverflow),
            Mode::Normal if is_line_end(byte) => {
                if self.len == 0 {
                    return Line::Continue;
                }
                let len = self.len;
                self.len = 0;
                Line::Ready(&self.buffer[..len])
            }
            Mode::Normal => {
                if self.len >= MAX_LINE_CHARS {
                    self.len = 0;
                    self.mode = Mode::Overflowed;
                    return Line::Failed(UpdateError::LineOverflow);
                }
                self.buffer[self.len] = byte;
                self.len += 1;
                Line::Continue
            }
        }
    }
}

impl Default for LineAssembler {
    fn default() -> Self {
        Self::new()
    }
}

fn is_line_end(byte: u8) -> bool {
    byte == b'\n' || byte == b'\r'
}
