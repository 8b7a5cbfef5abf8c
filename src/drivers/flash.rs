//! External Flash Memory Driver (W25Q128)
//!
//! Also defines [`FlashBank`], the erase/program interface the update code
//! stages images through.

use embedded_hal::blocking::spi::{Transfer, Write};
use embedded_hal::digital::v2::OutputPin;

use crate::config::{FLASH_PAGE_SIZE, FLASH_SECTOR_SIZE};

const WRITE_ENABLE: u8 = 0x06;
const READ_STATUS: u8 = 0x05;
const READ_DATA: u8 = 0x03;
const PAGE_PROGRAM: u8 = 0x02;
const SECTOR_ERASE: u8 = 0x20;
const BLOCK_ERASE_64K: u8 = 0xD8;
const JEDEC_ID: u8 = 0x9F;

const STATUS_BUSY: u8 = 0x01;
const BLOCK_SIZE_64K: u32 = 65536;
const BUSY_POLL_LIMIT: u32 = 100_000;

const EXPECTED_JEDEC_ID: [u8; 3] = [0xEF, 0x40, 0x18];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlashError {
    WriteError,
    ReadError,
    EraseError,
    TimeoutError,
    WrongId,
    /// Erase request not aligned to a sector
    Unaligned,
    OutOfRange,
    /// SPI or chip-select failure
    Bus,
}

pub type Result<T> = core::result::Result<T, FlashError>;

/// A region of NOR flash that can be erased by sector and programmed by byte.
pub trait FlashBank {
    fn read(&mut self, offset: u32, buffer: &mut [u8]) -> Result<()>;

    /// Erase `len` bytes starting at `offset`. Both must be multiples of
    /// [`FLASH_SECTOR_SIZE`].
    fn erase(&mut self, offset: u32, len: u32) -> Result<()>;

    /// Program previously erased bytes. Page boundaries are handled by the
    /// implementation.
    fn program(&mut self, offset: u32, data: &[u8]) -> Result<()>;
}

pub struct Flash<SPI, CS> {
    spi: SPI,
    cs: CS,
}

impl<SPI, CS, E> Flash<SPI, CS>
where
    SPI: Transfer<u8, Error = E> + Write<u8, Error = E>,
    CS: OutputPin,
{
    pub fn new(spi: SPI, cs: CS) -> Result<Self> {
        let mut flash = Self { spi, cs };
        flash.init()?;
        Ok(flash)
    }

    fn init(&mut self) -> Result<()> {
        self.deselect()?;

        let id = self.read_jedec_id()?;
        if id != EXPECTED_JEDEC_ID {
            log::warn!("flash: unexpected JEDEC id {:02x?}", id);
            return Err(FlashError::WrongId);
        }

        Ok(())
    }

    fn erase_command(&mut self, opcode: u8, addr: u32) -> Result<()> {
        self.wait_busy()?;
        self.write_enable()?;
        self.command(&with_address(opcode, addr))
            .map_err(|_| FlashError::EraseError)?;
        self.wait_busy()
    }

    fn write_page(&mut self, addr: u32, data: &[u8]) -> Result<()> {
        self.wait_busy()?;
        self.write_enable()?;

        self.select()?;
        let result = self
            .spi
            .write(&with_address(PAGE_PROGRAM, addr))
            .and_then(|_| self.spi.write(data))
            .map_err(|_| FlashError::WriteError);
        self.deselect()?;
        result?;

        self.wait_busy()
    }

    fn write_enable(&mut self) -> Result<()> {
        self.command(&[WRITE_ENABLE])
    }

    fn read_status(&mut self) -> Result<u8> {
        let mut frame = [READ_STATUS, 0x00];
        self.transfer(&mut frame)?;
        Ok(frame[1])
    }

    fn wait_busy(&mut self) -> Result<()> {
        for _ in 0..BUSY_POLL_LIMIT {
            if self.read_status()? & STATUS_BUSY == 0 {
                return Ok(());
            }
        }
        Err(FlashError::TimeoutError)
    }

    fn read_jedec_id(&mut self) -> Result<[u8; 3]> {
        let mut frame = [JEDEC_ID, 0x00, 0x00, 0x00];
        self.transfer(&mut frame)?;
        Ok([frame[1], frame[2], frame[3]])
    }

    fn command(&mut self, bytes: &[u8]) -> Result<()> {
        self.select()?;
        let result = self.spi.write(bytes).map_err(|_| FlashError::Bus);
        self.deselect()?;
        result
    }

    fn transfer(&mut self, frame: &mut [u8]) -> Result<()> {
        self.select()?;
        let result = self.spi.transfer(frame).map(|_| ()).map_err(|_| FlashError::Bus);
        self.deselect()?;
        result
    }

    fn select(&mut self) -> Result<()> {
        self.cs.set_low().map_err(|_| FlashError::Bus)
    }

    fn deselect(&mut self) -> Result<()> {
        self.cs.set_high().map_err(|_| FlashError::Bus)
    }
}

impl<SPI, CS, E> FlashBank for Flash<SPI, CS>
where
    SPI: Transfer<u8, Error = E> + Write<u8, Error = E>,
    CS: OutputPin,
{
    fn read(&mut self, offset: u32, buffer: &mut [u8]) -> Result<()> {
        self.wait_busy()?;

        self.select()?;
        buffer.fill(0);
        let result = self
            .spi
            .write(&with_address(READ_DATA, offset))
            .and_then(|_| self.spi.transfer(buffer).map(|_| ()))
            .map_err(|_| FlashError::ReadError);
        self.deselect()?;
        result
    }

    fn erase(&mut self, offset: u32, len: u32) -> Result<()> {
        if offset % FLASH_SECTOR_SIZE != 0 || len % FLASH_SECTOR_SIZE != 0 {
            return Err(FlashError::Unaligned);
        }

        let end = offset.checked_add(len).ok_or(FlashError::OutOfRange)?;
        let mut addr = offset;
        while addr < end {
            if addr % BLOCK_SIZE_64K == 0 && end - addr >= BLOCK_SIZE_64K {
                self.erase_command(BLOCK_ERASE_64K, addr)?;
                addr += BLOCK_SIZE_64K;
            } else {
                self.erase_command(SECTOR_ERASE, addr)?;
                addr += FLASH_SECTOR_SIZE;
            }
        }
        Ok(())
    }

    fn program(&mut self, offset: u32, data: &[u8]) -> Result<()> {
        let mut addr = offset;
        let mut remaining = data;
        while !remaining.is_empty() {
            let room = (FLASH_PAGE_SIZE - addr % FLASH_PAGE_SIZE) as usize;
            let (chunk, rest) = remaining.split_at(room.min(remaining.len()));
            self.write_page(addr, chunk)?;
            addr += chunk.len() as u32;
            remaining = rest;
        }
        Ok(())
    }
}

fn with_address(opcode: u8, addr: u32) -> [u8; 4] {
    [opcode, (addr >> 16) as u8, (addr >> 8) as u8, addr as u8]
}

#[cfg(test)]
mod tests {
    use super::*;
    use embedded_hal_mock::pin::{Mock as PinMock, State as PinState, Transaction as PinTransaction};
    use embedded_hal_mock::spi::{Mock as SpiMock, Transaction as SpiTransaction};

    fn select_cycles(n: usize) -> Vec<PinTransaction> {
        let mut cycles = vec![PinTransaction::set(PinState::High)];
        for _ in 0..n {
            cycles.push(PinTransaction::set(PinState::Low));
            cycles.push(PinTransaction::set(PinState::High));
        }
        cycles
    }

    fn jedec(id: [u8; 3]) -> SpiTransaction {
        SpiTransaction::transfer(vec![JEDEC_ID, 0, 0, 0], vec![0xFF, id[0], id[1], id[2]])
    }

    #[test]
    fn init_checks_jedec_id() {
        let mut spi = SpiMock::new(&[jedec(EXPECTED_JEDEC_ID)]);
        let mut cs = PinMock::new(&select_cycles(1));

        assert!(Flash::new(spi.clone(), cs.clone()).is_ok());

        spi.done();
        cs.done();
    }

    #[test]
    fn init_rejects_unknown_part() {
        let mut spi = SpiMock::new(&[jedec([0xC2, 0x20, 0x18])]);
        let mut cs = PinMock::new(&select_cycles(1));

        assert_eq!(
            Flash::new(spi.clone(), cs.clone()).err(),
            Some(FlashError::WrongId)
        );

        spi.done();
        cs.done();
    }

    #[test]
    fn read_sends_address_then_clocks_data() {
        let mut spi = SpiMock::new(&[
            jedec(EXPECTED_JEDEC_ID),
            SpiTransaction::transfer(vec![READ_STATUS, 0], vec![0xFF, 0x00]),
            SpiTransaction::write(vec![READ_DATA, 0x02, 0x01, 0x00]),
            SpiTransaction::transfer(vec![0, 0, 0], vec![0xDE, 0xAD, 0x42]),
        ]);
        let mut cs = PinMock::new(&select_cycles(3));

        let mut flash = Flash::new(spi.clone(), cs.clone()).unwrap();
        let mut buf = [0u8; 3];
        flash.read(0x0002_0100, &mut buf).unwrap();
        assert_eq!(buf, [0xDE, 0xAD, 0x42]);

        spi.done();
        cs.done();
    }

    #[test]
    fn erase_rejects_unaligned_ranges() {
        let mut spi = SpiMock::new(&[jedec(EXPECTED_JEDEC_ID)]);
        let mut cs = PinMock::new(&select_cycles(1));

        let mut flash = Flash::new(spi.clone(), cs.clone()).unwrap();
        assert_eq!(flash.erase(0x100, FLASH_SECTOR_SIZE), Err(FlashError::Unaligned));
        assert_eq!(flash.erase(0, 100), Err(FlashError::Unaligned));

        spi.done();
        cs.done();
    }

    fn idle() -> SpiTransaction {
        SpiTransaction::transfer(vec![READ_STATUS, 0], vec![0xFF, 0x00])
    }

    #[test]
    fn program_splits_at_page_boundary() {
        let mut spi = SpiMock::new(&[
            jedec(EXPECTED_JEDEC_ID),
            idle(),
            SpiTransaction::write(vec![WRITE_ENABLE]),
            SpiTransaction::write(vec![PAGE_PROGRAM, 0x01, 0x00, 0xFE]),
            SpiTransaction::write(vec![0x11, 0x22]),
            idle(),
            idle(),
            SpiTransaction::write(vec![WRITE_ENABLE]),
            SpiTransaction::write(vec![PAGE_PROGRAM, 0x01, 0x01, 0x00]),
            SpiTransaction::write(vec![0x33, 0x44, 0x55]),
            idle(),
        ]);
        let mut cs = PinMock::new(&select_cycles(9));

        let mut flash = Flash::new(spi.clone(), cs.clone()).unwrap();
        flash.program(0x0001_00FE, &[0x11, 0x22, 0x33, 0x44, 0x55]).unwrap();

        spi.done();
        cs.done();
    }

    #[test]
    fn erase_uses_block_command_on_64k_boundaries() {
        let mut spi = SpiMock::new(&[
            jedec(EXPECTED_JEDEC_ID),
            idle(),
            SpiTransaction::write(vec![WRITE_ENABLE]),
            SpiTransaction::write(vec![SECTOR_ERASE, 0x00, 0xF0, 0x00]),
            idle(),
            idle(),
            SpiTransaction::write(vec![WRITE_ENABLE]),
            SpiTransaction::write(vec![BLOCK_ERASE_64K, 0x01, 0x00, 0x00]),
            idle(),
        ]);
        let mut cs = PinMock::new(&select_cycles(9));

        let mut flash = Flash::new(spi.clone(), cs.clone()).unwrap();
        flash
            .erase(0xF000, FLASH_SECTOR_SIZE + BLOCK_SIZE_64K)
            .unwrap();

        spi.done();
        cs.done();
    }

    #[test]
    fn busy_status_is_polled_until_clear() {
        let mut spi = SpiMock::new(&[
            jedec(EXPECTED_JEDEC_ID),
            SpiTransaction::transfer(vec![READ_STATUS, 0], vec![0xFF, STATUS_BUSY]),
            idle(),
            SpiTransaction::write(vec![WRITE_ENABLE]),
            SpiTransaction::write(vec![SECTOR_ERASE, 0x00, 0x10, 0x00]),
            idle(),
        ]);
        let mut cs = PinMock::new(&select_cycles(6));

        let mut flash = Flash::new(spi.clone(), cs.clone()).unwrap();
        flash.erase(0x1000, FLASH_SECTOR_SIZE).unwrap();

        spi.done();
        cs.done();
    }
}
