//! Host-side fakes shared by the unit tests

use core::convert::Infallible;
use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::fmt::Write as _;
use std::rc::Rc;

use embedded_hal::blocking::delay::DelayMs;
use embedded_hal::serial;

use crate::bootloader::{BootHandoff, RebootContract};
use crate::companion::{OtaReceiver, OtaSlot, ResetTrigger};
use crate::config::{BOOT_RECORD_OFFSET, FLASH_SECTOR_SIZE};
use crate::drivers::{FlashBank, FlashError};
use crate::protocol::packet::{Frame, FrameDecoder};
use crate::protocol::{self, Command, CommandChannel, ProtocolError, Response};
use crate::update::{parse_record, HexRecord, HostPower, RecordType};

/// Textual record with a correct checksum.
pub fn encode_line(address: u16, kind: u8, data: &[u8]) -> String {
    let [hi, lo] = address.to_be_bytes();
    let count = data.len() as u8;

    let mut sum = count.wrapping_add(hi).wrapping_add(lo).wrapping_add(kind);
    let mut line = format!(":{:02X}{:04X}{:02X}", count, address, kind);
    for &b in data {
        sum = sum.wrapping_add(b);
        write!(line, "{:02X}", b).unwrap();
    }
    write!(line, "{:02X}", sum.wrapping_neg()).unwrap();
    line
}

pub fn record(address: u16, kind: RecordType, data: &[u8]) -> HexRecord {
    parse_record(encode_line(address, kind as u8, data).as_bytes()).unwrap()
}

/// NOR flash in RAM: erase sets 0xFF, program can only clear bits.
pub struct RamFlash {
    mem: Vec<u8>,
    erases: Vec<(u32, u32)>,
    fail_program: bool,
}

impl RamFlash {
    pub fn new() -> Self {
        Self {
            mem: vec![0xFF; (BOOT_RECORD_OFFSET + FLASH_SECTOR_SIZE) as usize],
            erases: Vec::new(),
            fail_program: false,
        }
    }

    pub fn fail_program(&mut self) {
        self.fail_program = true;
    }

    pub fn region(&self, offset: u32, len: usize) -> &[u8] {
        &self.mem[offset as usize..offset as usize + len]
    }

    pub fn erases(&self) -> &[(u32, u32)] {
        &self.erases
    }

    fn range(&self, offset: u32, len: usize) -> Result<core::ops::Range<usize>, FlashError> {
        let start = offset as usize;
        let end = start + len;
        if end > self.mem.len() {
            return Err(FlashError::OutOfRange);
        }
        Ok(start..end)
    }
}

impl FlashBank for RamFlash {
    fn read(&mut self, offset: u32, buffer: &mut [u8]) -> Result<(), FlashError> {
        let range = self.range(offset, buffer.len())?;
        buffer.copy_from_slice(&self.mem[range]);
        Ok(())
    }

    fn erase(&mut self, offset: u32, len: u32) -> Result<(), FlashError> {
        if offset % FLASH_SECTOR_SIZE != 0 || len % FLASH_SECTOR_SIZE != 0 {
            return Err(FlashError::Unaligned);
        }
        let range = self.range(offset, len as usize)?;
        self.mem[range].fill(0xFF);
        self.erases.push((offset, len));
        Ok(())
    }

    fn program(&mut self, offset: u32, data: &[u8]) -> Result<(), FlashError> {
        if self.fail_program {
            return Err(FlashError::WriteError);
        }
        let range = self.range(offset, data.len())?;
        for (cell, &byte) in self.mem[range].iter_mut().zip(data) {
            *cell &= byte;
        }
        Ok(())
    }
}

/// Serial port fed from a queue; everything written is recorded.
#[derive(Clone, Default)]
pub struct FakeSerial {
    inner: Rc<RefCell<SerialState>>,
}

#[derive(Default)]
struct SerialState {
    rx: VecDeque<u8>,
    tx: Vec<u8>,
}

impl FakeSerial {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn incoming(&self, bytes: &[u8]) {
        self.inner.borrow_mut().rx.extend(bytes);
    }

    pub fn pending(&self) -> usize {
        self.inner.borrow().rx.len()
    }

    pub fn sent(&self) -> Vec<u8> {
        self.inner.borrow().tx.clone()
    }
}

impl serial::Read<u8> for FakeSerial {
    type Error = Infallible;

    fn read(&mut self) -> nb::Result<u8, Infallible> {
        self.inner
            .borrow_mut()
            .rx
            .pop_front()
            .ok_or(nb::Error::WouldBlock)
    }
}

impl serial::Write<u8> for FakeSerial {
    type Error = Infallible;

    fn write(&mut self, word: u8) -> nb::Result<(), Infallible> {
        self.inner.borrow_mut().tx.push(word);
        Ok(())
    }

    fn flush(&mut self) -> nb::Result<(), Infallible> {
        Ok(())
    }
}

/// Delay that only counts.
#[derive(Clone, Default)]
pub struct FakeDelay {
    elapsed: Rc<Cell<u32>>,
}

impl FakeDelay {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn elapsed_ms(&self) -> u32 {
        self.elapsed.get()
    }
}

impl DelayMs<u16> for FakeDelay {
    fn delay_ms(&mut self, ms: u16) {
        self.elapsed.set(self.elapsed.get() + u32::from(ms));
    }
}

/// Command channel with a scripted companion behind it.
#[derive(Clone, Default)]
pub struct ScriptedChannel {
    inner: Rc<RefCell<ChannelState>>,
}

#[derive(Default)]
struct ChannelState {
    reachable: bool,
    connected: bool,
    rejects: Vec<Command>,
    sent: Vec<(Command, Vec<u8>)>,
}

impl ScriptedChannel {
    pub fn reachable() -> Self {
        let channel = Self::default();
        channel.inner.borrow_mut().reachable = true;
        channel
    }

    pub fn unreachable() -> Self {
        Self::default()
    }

    /// Answer Error to every future `command`.
    pub fn reject(&self, command: Command) {
        self.inner.borrow_mut().rejects.push(command);
    }

    pub fn commands(&self) -> Vec<Command> {
        self.inner.borrow().sent.iter().map(|(c, _)| *c).collect()
    }

    pub fn payloads(&self, command: Command) -> Vec<Vec<u8>> {
        self.inner
            .borrow()
            .sent
            .iter()
            .filter(|(c, _)| *c == command)
            .map(|(_, p)| p.clone())
            .collect()
    }
}

impl CommandChannel for ScriptedChannel {
    fn probe(&mut self) -> protocol::Result<()> {
        let mut state = self.inner.borrow_mut();
        state.connected = state.reachable;
        if state.connected {
            Ok(())
        } else {
            Err(ProtocolError::Timeout)
        }
    }

    fn is_connected(&self) -> bool {
        self.inner.borrow().connected
    }

    fn execute(&mut self, command: Command, payload: &[u8]) -> protocol::Result<()> {
        let mut state = self.inner.borrow_mut();
        if !state.connected {
            return Err(ProtocolError::NotConnected);
        }
        state.sent.push((command, payload.to_vec()));
        if state.rejects.contains(&command) {
            return Err(ProtocolError::Rejected(Response::Error));
        }
        Ok(())
    }
}

/// Remembers the handoff, then unwinds in place of a reset.
#[derive(Clone, Default)]
pub struct RecordingReboot {
    handoff: Rc<Cell<Option<BootHandoff>>>,
}

impl RecordingReboot {
    pub fn handoff(&self) -> Option<BootHandoff> {
        self.handoff.get()
    }
}

impl RebootContract for RecordingReboot {
    fn reboot(&mut self, handoff: BootHandoff) -> ! {
        self.handoff.set(Some(handoff));
        panic!("reboot into {:#x}", handoff.image_address);
    }
}

pub struct PanicReset;

impl ResetTrigger for PanicReset {
    fn reset(&mut self) -> ! {
        panic!("reset");
    }
}

#[derive(Default)]
pub struct RecordingHost {
    shutdown_requests: usize,
    power_off: Vec<u32>,
}

impl RecordingHost {
    pub fn shutdown_requests(&self) -> usize {
        self.shutdown_requests
    }

    pub fn power_off_delays(&self) -> Vec<u32> {
        self.power_off.clone()
    }
}

impl HostPower for RecordingHost {
    fn request_shutdown(&mut self) {
        self.shutdown_requests += 1;
    }

    fn schedule_power_off(&mut self, delay_ms: u32) {
        self.power_off.push(delay_ms);
    }
}

/// In-memory update slot.
pub struct RamSlot {
    capacity: usize,
    data: Option<Vec<u8>>,
    committed: Option<Vec<u8>>,
    aborts: usize,
}

#[derive(Debug, PartialEq, Eq)]
pub enum RamSlotError {
    NotOpen,
    Full,
}

impl RamSlot {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity,
            data: None,
            committed: None,
            aborts: 0,
        }
    }

    pub fn committed(&self) -> Option<&[u8]> {
        self.committed.as_deref()
    }

    pub fn aborts(&self) -> usize {
        self.aborts
    }
}

impl Default for RamSlot {
    fn default() -> Self {
        Self::with_capacity(1 << 20)
    }
}

impl OtaSlot for RamSlot {
    type Error = RamSlotError;

    fn begin(&mut self) -> Result<(), RamSlotError> {
        self.data = Some(Vec::new());
        Ok(())
    }

    fn write(&mut self, data: &[u8]) -> Result<(), RamSlotError> {
        let buffer = self.data.as_mut().ok_or(RamSlotError::NotOpen)?;
        if buffer.len() + data.len() > self.capacity {
            return Err(RamSlotError::Full);
        }
        buffer.extend_from_slice(data);
        Ok(())
    }

    fn finish(&mut self) -> Result<(), RamSlotError> {
        self.committed = Some(self.data.take().ok_or(RamSlotError::NotOpen)?);
        Ok(())
    }

    fn abort(&mut self) {
        self.data = None;
        self.aborts += 1;
    }
}

/// A companion behind a serial port: frames written to it are decoded and
/// answered by an [`OtaReceiver`] over a RAM slot.
#[derive(Clone)]
pub struct LoopbackCompanion {
    inner: Rc<RefCell<Loopback>>,
}

struct Loopback {
    decoder: FrameDecoder,
    receiver: OtaReceiver<RamSlot>,
    replies: VecDeque<u8>,
    reboot: bool,
}

impl LoopbackCompanion {
    pub fn new() -> Self {
        Self {
            inner: Rc::new(RefCell::new(Loopback {
                decoder: FrameDecoder::new(),
                receiver: OtaReceiver::new(RamSlot::default()),
                replies: VecDeque::new(),
                reboot: false,
            })),
        }
    }

    pub fn committed(&self) -> Option<Vec<u8>> {
        self.inner.borrow().receiver.slot().committed().map(<[u8]>::to_vec)
    }

    pub fn reboot_requested(&self) -> bool {
        self.inner.borrow().reboot
    }
}

impl serial::Read<u8> for LoopbackCompanion {
    type Error = Infallible;

    fn read(&mut self) -> nb::Result<u8, Infallible> {
        self.inner
            .borrow_mut()
            .replies
            .pop_front()
            .ok_or(nb::Error::WouldBlock)
    }
}

impl serial::Write<u8> for LoopbackCompanion {
    type Error = Infallible;

    fn write(&mut self, word: u8) -> nb::Result<(), Infallible> {
        let mut state = self.inner.borrow_mut();
        let Loopback {
            decoder,
            receiver,
            replies,
            reboot,
        } = &mut *state;

        let reply = match decoder.push(word) {
            None => return Ok(()),
            Some(Frame::Complete { command, payload }) => receiver.handle(command, payload),
            Some(Frame::Oversized { .. }) => {
                replies.push_back(Response::Error as u8);
                return Ok(());
            }
        };
        replies.push_back(reply.response as u8);
        *reboot |= reply.reboot;
        Ok(())
    }

    fn flush(&mut self) -> nb::Result<(), Infallible> {
        Ok(())
    }
}
