//! Debug console on USART0, installed as the `log` sink

use core::cell::RefCell;
use core::fmt::Write as _;

use avr_device::interrupt::{self, Mutex};
use log::{LevelFilter, Log, Metadata, Record};

use crate::config::CONSOLE_BAUD;
use crate::hal::Usart0;

static CONSOLE_UART: Mutex<RefCell<Option<Usart0>>> = Mutex::new(RefCell::new(None));
static CONSOLE: SerialConsole = SerialConsole;

pub struct SerialConsole;

impl SerialConsole {
    /// Take USART0 and route `log` records to it.
    pub fn install(usart: avr_device::atmega128::USART0, level: LevelFilter) {
        let uart = Usart0::new(usart, CONSOLE_BAUD);
        interrupt::free(|cs| CONSOLE_UART.borrow(cs).replace(Some(uart)));

        // No atomics on AVR; runs once before interrupts are enabled.
        unsafe {
            let _ = log::set_logger_racy(&CONSOLE);
            log::set_max_level_racy(level);
        }
    }

    /// Run `f` with the console UART, if installed.
    pub fn with<R>(f: impl FnOnce(&mut Usart0) -> R) -> Option<R> {
        interrupt::free(|cs| CONSOLE_UART.borrow(cs).borrow_mut().as_mut().map(f))
    }
}

struct FmtAdapter<'a>(&'a mut Usart0);

impl core::fmt::Write for FmtAdapter<'_> {
    fn write_str(&mut self, s: &str) -> core::fmt::Result {
        ufmt::uWrite::write_str(self.0, s).map_err(|_| core::fmt::Error)
    }
}

impl Log for SerialConsole {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        Self::with(|uart| {
            let _ = write!(FmtAdapter(uart), "[{}] {}\r\n", record.level(), record.args());
        });
    }

    fn flush(&self) {}
}
