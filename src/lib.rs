//! Firmware update subsystem of the HID companion controller.
//!
//! The primary chip streams hex records from its register interface into
//! [`update::UpdateCoordinator`], which either stages a flash image for the
//! second-stage bootloader or relays the records to the companion chip over
//! [`protocol::CompanionLink`]. The companion side of that link lives in
//! [`companion`].
#![cfg_attr(not(test), no_std)]

pub mod bootloader;
pub mod companion;
pub mod config;
pub mod drivers;
pub mod protocol;
pub mod update;

#[cfg(target_arch = "avr")]
pub mod hal;

#[cfg(test)]
pub(crate) mod testing;
