//! Companion chip firmware: receives update images from the primary over
//! USART1 and stores them in the external W25Q flash.
#![cfg_attr(target_arch = "avr", no_std)]
#![cfg_attr(target_arch = "avr", no_main)]

#[cfg(target_arch = "avr")]
mod firmware {
    use panic_halt as _;

    use avr_device::atmega128::Peripherals;
    use log::LevelFilter;

    use hid_companion_firmware::companion::{CompanionBridge, ExternalSlot, OtaReceiver};
    use hid_companion_firmware::config::COMPANION_BAUD;
    use hid_companion_firmware::drivers::{Flash, SerialConsole};
    use hid_companion_firmware::hal::gpio::board::FlashCs;
    use hid_companion_firmware::hal::spi::SpiPrescaler;
    use hid_companion_firmware::hal::{Delay, Spi, Usart1, Watchdog, WatchdogReset};

    #[cfg(feature = "debug")]
    const LOG_LEVEL: LevelFilter = LevelFilter::Debug;
    #[cfg(not(feature = "debug"))]
    const LOG_LEVEL: LevelFilter = LevelFilter::Info;

    fn halt() -> ! {
        loop {
            avr_device::asm::sleep();
        }
    }

    #[avr_device::entry]
    fn main() -> ! {
        let Some(dp) = Peripherals::take() else {
            halt()
        };

        SerialConsole::install(dp.USART0, LOG_LEVEL);
        SerialConsole::with(|uart| {
            let _ = ufmt::uwriteln!(uart, "HID companion v{}\r", env!("CARGO_PKG_VERSION"));
        });

        let mut watchdog = Watchdog::new(dp.WDT);
        // may still be armed by the reset that brought us here
        watchdog.disable();

        let flash = match Flash::new(Spi::new(SpiPrescaler::Div4), FlashCs::portb_output()) {
            Ok(flash) => flash,
            Err(err) => {
                log::error!("flash: init failed: {:?}", err);
                halt()
            }
        };

        let mut slot = ExternalSlot::new(flash);
        match slot.boot_record() {
            Ok(Some(record)) => log::info!(
                "boot: slot {}, {} bytes, crc {:#010x}",
                record.slot,
                record.length,
                record.crc32
            ),
            Ok(None) => log::info!("boot: no update installed"),
            Err(err) => log::warn!("boot: record unreadable: {:?}", err),
        }

        let mut bridge = CompanionBridge::new(
            Usart1::new(dp.USART1, COMPANION_BAUD),
            Delay::new(dp.TC0),
            OtaReceiver::new(slot),
            WatchdogReset::new(watchdog),
        );

        log::info!("bridge: ready");
        loop {
            if let Err(err) = bridge.poll() {
                log::warn!("bridge: {:?}", err);
            }
        }
    }
}

#[cfg(not(target_arch = "avr"))]
fn main() {}
