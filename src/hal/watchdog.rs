use avr_device::atmega128::WDT;

use crate::companion::ResetTrigger;

#[derive(Clone, Copy)]
#[repr(u8)]
pub enum WatchdogTimeout {
    Ms16 = 0,
    Ms32 = 1,
    Ms64 = 2,
    Ms125 = 3,
    Ms250 = 4,
    Ms500 = 5,
    Ms1000 = 6,
    Ms2000 = 7,
}

pub struct Watchdog {
    _wdt: WDT,
}

impl Watchdog {
    #[inline]
    pub fn new(wdt: WDT) -> Self {
        Self { _wdt: wdt }
    }

    #[inline]
    pub fn start(&mut self, timeout: WatchdogTimeout) {
        unsafe {
            let p = WDT::ptr();
            // WDCE | WDE, then the new timeout within four cycles
            (*p).wdtcr.write(|w| w.bits(0x18));
            (*p).wdtcr.write(|w| w.bits(0x08 | timeout as u8));
        }
    }

    #[inline]
    pub fn disable(&mut self) {
        unsafe {
            let p = WDT::ptr();
            (*p).wdtcr.write(|w| w.bits(0x18));
            (*p).wdtcr.write(|w| w.bits(0x00));
        }
    }
}

/// Resets the chip by letting the watchdog expire.
pub struct WatchdogReset {
    watchdog: Watchdog,
}

impl WatchdogReset {
    pub fn new(watchdog: Watchdog) -> Self {
        Self { watchdog }
    }
}

impl ResetTrigger for WatchdogReset {
    fn reset(&mut self) -> ! {
        log::info!("reset: watchdog");
        avr_device::interrupt::disable();
        self.watchdog.start(WatchdogTimeout::Ms16);
        loop {}
    }
}
