pub mod flash;

#[cfg(target_arch = "avr")]
pub mod serial_console;

pub use flash::{Flash, FlashBank, FlashError};

#[cfg(target_arch = "avr")]
pub use serial_console::SerialConsole;
