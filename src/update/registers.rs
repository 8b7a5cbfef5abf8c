//! Register-file glue for the update subsystem
//!
//! The host drives updates through four byte registers. A finished primary
//! image is not committed right away: the host is asked to shut down first
//! and the commit runs from [`UpdateRegisters::poll`] once its grace period
//! has passed.

use super::coordinator::UpdateCoordinator;
use super::{Progress, UpdateStatus, UpdateTarget};
use crate::bootloader::RebootContract;
use crate::config::{
    COMMIT_MARGIN_MS, COMPANION_STATUS_ABSENT, COMPANION_STATUS_CONNECTED,
    DEFAULT_SHUTDOWN_GRACE_S, MINIMUM_SHUTDOWN_GRACE_MS, REG_COMPANION_COMMAND,
    REG_COMPANION_STATUS, REG_UPDATE_DATA, REG_UPDATE_TARGET, SESSION_START_BYTE,
};
use crate::drivers::FlashBank;
use crate::protocol::CommandChannel;

/// Host power sequencing used before a primary commit.
pub trait HostPower {
    /// Ask the host OS to shut down (power key press).
    fn request_shutdown(&mut self);

    fn schedule_power_off(&mut self, delay_ms: u32);
}

pub struct UpdateRegisters<F, R, C, H> {
    coordinator: UpdateCoordinator<F, R, C>,
    host: H,
    grace_s: u8,
    commit_at: Option<u32>,
}

impl<F, R, C, H> UpdateRegisters<F, R, C, H>
where
    F: FlashBank,
    R: RebootContract,
    C: CommandChannel,
    H: HostPower,
{
    pub fn new(coordinator: UpdateCoordinator<F, R, C>, host: H) -> Self {
        Self {
            coordinator,
            host,
            grace_s: DEFAULT_SHUTDOWN_GRACE_S,
            commit_at: None,
        }
    }

    pub fn coordinator(&self) -> &UpdateCoordinator<F, R, C> {
        &self.coordinator
    }

    pub fn host(&self) -> &H {
        &self.host
    }

    pub fn set_shutdown_grace(&mut self, seconds: u8) {
        self.grace_s = seconds;
    }

    /// Time at which the deferred commit runs, if one is pending.
    pub fn commit_pending(&self) -> Option<u32> {
        self.commit_at
    }

    pub fn write(&mut self, reg: u8, value: u8, now_ms: u32) {
        match reg {
            REG_UPDATE_DATA => {
                if value == SESSION_START_BYTE && self.commit_at.take().is_some() {
                    log::info!("update: pending commit cancelled");
                }

                let completed = matches!(self.coordinator.feed(value), Ok(Progress::Complete));
                if completed && self.coordinator.target() == UpdateTarget::Primary {
                    self.schedule_commit(now_ms);
                }
            }
            REG_UPDATE_TARGET => {
                // the staged image is bound to the primary until it commits
                if self.commit_at.is_some() {
                    log::warn!("update: target {} ignored, commit pending", value);
                    return;
                }
                self.coordinator.select_target(value);
            }
            REG_COMPANION_COMMAND => {
                if let Err(err) = self.coordinator.companion_command(value) {
                    log::debug!("update: companion command {:#04x} dropped: {:?}", value, err);
                }
            }
            _ => {}
        }
    }

    pub fn read(&mut self, reg: u8) -> u8 {
        match reg {
            REG_UPDATE_DATA => self.coordinator.status().code(),
            REG_UPDATE_TARGET => self.coordinator.target() as u8,
            REG_COMPANION_STATUS => {
                if self.coordinator.companion_connected() {
                    COMPANION_STATUS_CONNECTED
                } else {
                    COMPANION_STATUS_ABSENT
                }
            }
            _ => 0,
        }
    }

    /// Run the deferred commit once it is due. Only returns if the commit
    /// fails or nothing is due.
    pub fn poll(&mut self, now_ms: u32) -> UpdateStatus {
        match self.commit_at {
            Some(at) if now_ms.wrapping_sub(at) as i32 >= 0 => {
                self.commit_at = None;
                if let Err(err) = self.coordinator.commit_and_reboot() {
                    log::warn!("update: deferred commit failed: {:?}", err);
                }
            }
            _ => {}
        }
        self.coordinator.status()
    }

    fn schedule_commit(&mut self, now_ms: u32) {
        let grace_ms = (u32::from(self.grace_s) * 1000).max(MINIMUM_SHUTDOWN_GRACE_MS);

        self.host.request_shutdown();
        self.host.schedule_power_off(grace_ms);
        self.commit_at = Some(now_ms.wrapping_add(grace_ms + COMMIT_MARGIN_MS));

        log::info!("update: commit in {} ms", grace_ms + COMMIT_MARGIN_MS);
    }
}
