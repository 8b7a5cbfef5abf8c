//! Push-pull outputs on PORTB (flash chip select)

use avr_device::atmega128::PORTB;
use core::convert::Infallible;
use core::marker::PhantomData;

use embedded_hal::digital::v2::OutputPin;

pub struct Output;

pub struct Pin<PORT, const P: u8, MODE> {
    _port: PhantomData<PORT>,
    _mode: PhantomData<MODE>,
}

impl<const P: u8> Pin<PORTB, P, Output> {
    /// Configure the pin as an output driven high.
    pub fn portb_output() -> Self {
        unsafe {
            let p = PORTB::ptr();
            (*p).portb.modify(|r, w| w.bits(r.bits() | (1 << P)));
            (*p).ddrb.modify(|r, w| w.bits(r.bits() | (1 << P)));
        }
        Pin {
            _port: PhantomData,
            _mode: PhantomData,
        }
    }
}

impl<const P: u8> OutputPin for Pin<PORTB, P, Output> {
    type Error = Infallible;

    #[inline]
    fn set_high(&mut self) -> Result<(), Infallible> {
        unsafe {
            (*PORTB::ptr()).portb.modify(|r, w| w.bits(r.bits() | (1 << P)));
        }
        Ok(())
    }

    #[inline]
    fn set_low(&mut self) -> Result<(), Infallible> {
        unsafe {
            (*PORTB::ptr()).portb.modify(|r, w| w.bits(r.bits() & !(1 << P)));
        }
        Ok(())
    }
}

pub mod board {
    use super::*;

    /// W25Q chip select
    pub type FlashCs = Pin<PORTB, 0, Output>;
}
