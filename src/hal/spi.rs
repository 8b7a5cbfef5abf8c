//! SPI master on the hardware SPI block

use avr_device::atmega128::SPI;
use core::convert::Infallible;
use core::marker::PhantomData;

use embedded_hal::blocking::spi::{Transfer, Write};

/// SPI clock prescaler options
#[derive(Clone, Copy)]
#[repr(u8)]
pub enum SpiPrescaler {
    Div4 = 0,
    Div16 = 1,
    Div64 = 2,
    Div128 = 3,
}

pub struct Spi {
    _spi: PhantomData<SPI>,
}

impl Spi {
    /// Master, mode 0, MSB first. SCK, MOSI and SS (PB1, PB2, PB0) become
    /// outputs.
    pub fn new(prescaler: SpiPrescaler) -> Self {
        unsafe {
            (*avr_device::atmega128::PORTB::ptr())
                .ddrb
                .modify(|r, w| w.bits(r.bits() | 0x07));

            let p = SPI::ptr();
            // SPE | MSTR
            (*p).spcr.write(|w| w.bits(0x50 | prescaler as u8));
        }

        Self { _spi: PhantomData }
    }

    fn exchange(&mut self, byte: u8) -> u8 {
        unsafe {
            let p = SPI::ptr();
            (*p).spdr.write(|w| w.bits(byte));
            // SPIF
            while (*p).spsr.read().bits() & 0x80 == 0 {}
            (*p).spdr.read().bits()
        }
    }
}

impl Transfer<u8> for Spi {
    type Error = Infallible;

    fn transfer<'w>(&mut self, words: &'w mut [u8]) -> Result<&'w [u8], Infallible> {
        for word in words.iter_mut() {
            *word = self.exchange(*word);
        }
        Ok(words)
    }
}

impl Write<u8> for Spi {
    type Error = Infallible;

    fn write(&mut self, words: &[u8]) -> Result<(), Infallible> {
        for &word in words {
            self.exchange(word);
        }
        Ok(())
    }
}
