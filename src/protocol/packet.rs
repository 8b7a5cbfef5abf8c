//! Link frame encoding and incremental decoding
//!
//! A frame is one command byte, a 24-bit little-endian payload length and the
//! payload. Every frame is answered with a single response byte.

use crate::config::{FRAME_CAPACITY, FRAME_HEADER_TIMEOUT_MS, FRAME_PAYLOAD_TIMEOUT_MS};

pub const HEADER_SIZE: usize = 4;
pub const MAX_PAYLOAD_LEN: u32 = 0x00FF_FFFF;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub command: u8,
    pub length: u32,
}

impl FrameHeader {
    pub fn encode(&self) -> [u8; HEADER_SIZE] {
        let len = self.length.to_le_bytes();
        [self.command, len[0], len[1], len[2]]
    }

    pub fn decode(bytes: [u8; HEADER_SIZE]) -> Self {
        Self {
            command: bytes[0],
            length: u32::from_le_bytes([bytes[1], bytes[2], bytes[3], 0]),
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
pub enum Frame<'a> {
    Complete { command: u8, payload: &'a [u8] },
    /// Payload did not fit and was discarded
    Oversized { command: u8, length: u32 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Command,
    Length(usize),
    Payload,
    Discard,
}

pub struct FrameDecoder {
    buffer: [u8; FRAME_CAPACITY],
    state: State,
    header: [u8; HEADER_SIZE],
    received: u32,
}

impl FrameDecoder {
    pub const fn new() -> Self {
        Self {
            buffer: [0; FRAME_CAPACITY],
            state: State::Command,
            header: [0; HEADER_SIZE],
            received: 0,
        }
    }

    pub fn reset(&mut self) {
        self.state = State::Command;
        self.received = 0;
    }

    /// True between frames
    pub fn is_idle(&self) -> bool {
        self.state == State::Command
    }

    /// How long the line may stay silent in the current state, if at all.
    pub fn timeout_ms(&self) -> Option<u32> {
        match self.state {
            State::Command => None,
            State::Length(_) => Some(FRAME_HEADER_TIMEOUT_MS),
            State::Payload | State::Discard => Some(FRAME_PAYLOAD_TIMEOUT_MS),
        }
    }

    pub fn push(&mut self, byte: u8) -> Option<Frame<'_>> {
        match self.state {
            State::Command => {
                self.header[0] = byte;
                self.state = State::Length(1);
                None
            }
            State::Length(i) => {
                self.header[i] = byte;
                if i + 1 < HEADER_SIZE {
                    self.state = State::Length(i + 1);
                    return None;
                }

                let header = FrameHeader::decode(self.header);
                self.received = 0;
                if header.length == 0 {
                    self.state = State::Command;
                    Some(Frame::Complete {
                        command: header.command,
                        payload: &[],
                    })
                } else if header.length as usize > FRAME_CAPACITY {
                    self.state = State::Discard;
                    None
                } else {
                    self.state = State::Payload;
                    None
                }
            }
            State::Payload => {
                let header = FrameHeader::decode(self.header);
                self.buffer[self.received as usize] = byte;
                self.received += 1;
                if self.received < header.length {
                    return None;
                }
                self.state = State::Command;
                Some(Frame::Complete {
                    command: header.command,
                    payload: &self.buffer[..header.length as usize],
                })
            }
            State::Discard => {
                let header = FrameHeader::decode(self.header);
                self.received += 1;
                if self.received < header.length {
                    return None;
                }
                self.state = State::Command;
                Some(Frame::Oversized {
                    command: header.command,
                    length: header.length,
                })
            }
        }
    }
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new()
    }
}
