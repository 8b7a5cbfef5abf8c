//! ATmega128 peripherals used by the companion firmware

pub mod gpio;
pub mod spi;
pub mod timer;
pub mod uart;
pub mod watchdog;

pub use gpio::{Output, Pin};
pub use spi::Spi;
pub use timer::Delay;
pub use uart::{Usart, Usart0, Usart1};
pub use watchdog::{Watchdog, WatchdogReset, WatchdogTimeout};
