//! Busy-wait millisecond delay on Timer0

use avr_device::atmega128::TC0;
use embedded_hal::blocking::delay::DelayMs;

/// clk/64 prescaler select
const PRESCALER_DIV64: u8 = 0x04;
/// 16 MHz / 64 = 250 kHz, so 250 counts per millisecond
const TICKS_PER_MS: u8 = 250;

pub struct Delay {
    _timer: TC0,
}

impl Delay {
    pub fn new(timer: TC0) -> Self {
        unsafe {
            let p = TC0::ptr();
            (*p).tccr0.write(|w| w.bits(0));
            (*p).tcnt0.write(|w| w.bits(0));
        }
        Self { _timer: timer }
    }
}

impl DelayMs<u16> for Delay {
    fn delay_ms(&mut self, ms: u16) {
        unsafe {
            let p = TC0::ptr();
            (*p).tcnt0.write(|w| w.bits(0));
            (*p).tccr0.write(|w| w.bits(PRESCALER_DIV64));

            for _ in 0..ms {
                while (*p).tcnt0.read().bits() < TICKS_PER_MS {}
                (*p).tcnt0.write(|w| w.bits(0));
            }

            (*p).tccr0.write(|w| w.bits(0));
        }
    }
}
