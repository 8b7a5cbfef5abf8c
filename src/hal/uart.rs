//! Polled USART driver implementing the embedded-hal serial traits

use avr_device::atmega128::{USART0, USART1};
use core::marker::PhantomData;

use embedded_hal::serial::{Read, Write};

use crate::config::CPU_FREQ_HZ;

const RXC: u8 = 1 << 7;
const UDRE: u8 = 1 << 5;
const FE: u8 = 1 << 4;
const DOR: u8 = 1 << 3;
const RXEN: u8 = 1 << 4;
const TXEN: u8 = 1 << 3;
/// 8 data bits, no parity, 1 stop bit
const FRAME_8N1: u8 = 0x06;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    Framing,
    Overrun,
}

/// Register access for one USART instance.
pub trait UsartRegisters {
    fn set_baud(ubrr: u16);
    fn enable();
    fn status() -> u8;
    fn read_data() -> u8;
    fn write_data(byte: u8);
}

macro_rules! impl_usart {
    ($USART:ident, $ubrrh:ident, $ubrrl:ident, $ucsra:ident, $ucsrb:ident, $ucsrc:ident, $udr:ident) => {
        impl UsartRegisters for $USART {
            fn set_baud(ubrr: u16) {
                unsafe {
                    let p = $USART::ptr();
                    (*p).$ubrrh.write(|w| w.bits((ubrr >> 8) as u8));
                    (*p).$ubrrl.write(|w| w.bits(ubrr as u8));
                }
            }

            fn enable() {
                unsafe {
                    let p = $USART::ptr();
                    (*p).$ucsrc.write(|w| w.bits(FRAME_8N1));
                    (*p).$ucsrb.write(|w| w.bits(RXEN | TXEN));
                }
            }

            #[inline]
            fn status() -> u8 {
                unsafe { (*$USART::ptr()).$ucsra.read().bits() }
            }

            #[inline]
            fn read_data() -> u8 {
                unsafe { (*$USART::ptr()).$udr.read().bits() }
            }

            #[inline]
            fn write_data(byte: u8) {
                unsafe { (*$USART::ptr()).$udr.write(|w| w.bits(byte)) }
            }
        }
    };
}

impl_usart!(USART0, ubrr0h, ubrr0l, ucsr0a, ucsr0b, ucsr0c, udr0);
impl_usart!(USART1, ubrr1h, ubrr1l, ucsr1a, ucsr1b, ucsr1c, udr1);

pub struct Usart<U> {
    _usart: PhantomData<U>,
}

pub type Usart0 = Usart<USART0>;
pub type Usart1 = Usart<USART1>;

impl<U: UsartRegisters> Usart<U> {
    /// Take ownership of the peripheral and configure it for 8N1 at `baud`.
    pub fn new(_usart: U, baud: u32) -> Self {
        U::set_baud(ubrr_for(baud));
        U::enable();
        Self {
            _usart: PhantomData,
        }
    }
}

/// UBRR for normal speed mode, rounded to nearest
const fn ubrr_for(baud: u32) -> u16 {
    ((CPU_FREQ_HZ + 8 * baud) / (16 * baud) - 1) as u16
}

impl<U: UsartRegisters> Read<u8> for Usart<U> {
    type Error = Error;

    fn read(&mut self) -> nb::Result<u8, Error> {
        let status = U::status();
        if status & RXC == 0 {
            return Err(nb::Error::WouldBlock);
        }
        // UDR must be read to clear the flags either way
        let byte = U::read_data();
        if status & FE != 0 {
            return Err(nb::Error::Other(Error::Framing));
        }
        if status & DOR != 0 {
            return Err(nb::Error::Other(Error::Overrun));
        }
        Ok(byte)
    }
}

impl<U: UsartRegisters> Write<u8> for Usart<U> {
    type Error = Error;

    fn write(&mut self, word: u8) -> nb::Result<(), Error> {
        if U::status() & UDRE == 0 {
            return Err(nb::Error::WouldBlock);
        }
        U::write_data(word);
        Ok(())
    }

    fn flush(&mut self) -> nb::Result<(), Error> {
        if U::status() & UDRE == 0 {
            return Err(nb::Error::WouldBlock);
        }
        Ok(())
    }
}

impl<U: UsartRegisters> ufmt::uWrite for Usart<U> {
    type Error = Error;

    fn write_str(&mut self, s: &str) -> Result<(), Error> {
        for byte in s.bytes() {
            nb::block!(self.write(byte))?;
        }
        Ok(())
    }
}
