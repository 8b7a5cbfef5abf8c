//! Configuration constants for the HID companion firmware

/// CPU frequency of the companion chip in Hz
pub const CPU_FREQ_HZ: u32 = 16_000_000;

/// Debug console baud rate (USART0 on the companion)
pub const CONSOLE_BAUD: u32 = 9600;

/// Primary <-> companion link baud rate
pub const COMPANION_BAUD: u32 = 115_200;

// --- Register interface ---

/// Streaming update data register: each write feeds one byte, reads return the status
pub const REG_UPDATE_DATA: u8 = 0x30;
/// Update target select register
pub const REG_UPDATE_TARGET: u8 = 0x31;
/// Companion link status register (read only)
pub const REG_COMPANION_STATUS: u8 = 0x32;
/// Raw companion command register (write only)
pub const REG_COMPANION_COMMAND: u8 = 0x33;

pub const COMPANION_STATUS_CONNECTED: u8 = 0x03;
pub const COMPANION_STATUS_ABSENT: u8 = 0x01;

/// Default shutdown grace written by the register file at boot, in seconds
pub const DEFAULT_SHUTDOWN_GRACE_S: u8 = 30;
/// Lower bound on the time the host gets to shut down before a commit
pub const MINIMUM_SHUTDOWN_GRACE_MS: u32 = 5000;
/// Extra delay between host power-off and the primary flash commit
pub const COMMIT_MARGIN_MS: u32 = 10;

// --- Update stream ---

/// Byte that starts (or restarts) an update session
pub const SESSION_START_BYTE: u8 = b'+';
/// Line buffer capacity, including room for the line-end marker
pub const LINE_CAPACITY: usize = 1024;
/// Largest primary image payload
pub const IMAGE_CAPACITY: usize = 65536;
/// Literal end-of-image record
pub const EOF_RECORD: &[u8] = b":00000001FF";

// --- Primary flash layout and bootloader handoff ---

pub const IMAGE_MAGIC1: u32 = 0x8AD5_C0EE;
pub const IMAGE_MAGIC2: u32 = 0x4A7E_1CB2;
/// Memory-mapped base of the primary's flash
pub const IMAGE_FLASH_BASE: u32 = 0x1000_0000;
/// Offset within flash of the staged image picked up by the second stage
pub const IMAGE_FLASH_OFFSET: u32 = 128 * 1024;
pub const FLASH_SECTOR_SIZE: u32 = 4096;
pub const FLASH_PAGE_SIZE: u32 = 256;
/// Forced delay before the watchdog reset that enters the second stage
pub const RESET_DELAY_MS: u32 = 1000;

// --- Companion link ---

pub const LINK_COMMAND_TIMEOUT_MS: u32 = 1000;
pub const LINK_POLL_INTERVAL_MS: u16 = 10;
pub const LINK_BUSY_BACKOFF_MS: u16 = 100;
pub const LINK_MAX_BUSY_RETRIES: u8 = 3;
pub const LINK_DETECT_ATTEMPTS: u8 = 3;
pub const LINK_DETECT_INTERVAL_MS: u16 = 100;
/// Pause between EndUpdate and Reboot
pub const LINK_SETTLE_MS: u16 = 100;

// --- Companion side ---

/// Largest frame payload the companion accepts
pub const FRAME_CAPACITY: usize = 1024;
pub const FRAME_HEADER_TIMEOUT_MS: u32 = 1000;
pub const FRAME_PAYLOAD_TIMEOUT_MS: u32 = 5000;
/// Time given to the Ok response to leave the UART before resetting
pub const COMPANION_REBOOT_DELAY_MS: u16 = 100;

/// OTA slots in the companion's external NOR flash
pub const SLOT_OFFSETS: [u32; 2] = [0x0000_0000, 0x0010_0000];
pub const SLOT_SIZE: u32 = 0x0010_0000;
pub const BOOT_RECORD_OFFSET: u32 = 0x0020_0000;
pub const BOOT_RECORD_MAGIC: u32 = 0xB007_DA7A;
