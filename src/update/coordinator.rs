//! Update session state machine

use core::convert::Infallible;

use super::hex::parse_record;
use super::image::FlashImageBuilder;
use super::line::{Line, LineAssembler};
use super::{Progress, Result, UpdateError, UpdateStatus, UpdateTarget};
use crate::bootloader::RebootContract;
use crate::config::{EOF_RECORD, SESSION_START_BYTE};
use crate::drivers::FlashBank;
use crate::protocol::{self, Command, CommandChannel, ProtocolError};

/// Per-session state, cleared on every session start byte.
pub struct Session {
    lines: LineAssembler,
    image: FlashImageBuilder,
    complete: bool,
}

impl Session {
    pub const fn new() -> Self {
        Self {
            lines: LineAssembler::new(),
            image: FlashImageBuilder::new(),
            complete: false,
        }
    }

    pub fn reset(&mut self) {
        self.lines.restart();
        self.image.reset();
        self.complete = false;
    }

    pub fn image(&self) -> &FlashImageBuilder {
        &self.image
    }

    /// An end-of-image record was accepted for the primary target
    pub fn is_complete(&self) -> bool {
        self.complete
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

pub struct UpdateCoordinator<F, R, C> {
    target: UpdateTarget,
    status: UpdateStatus,
    session: Session,
    flash: F,
    reboot: R,
    companion: Option<C>,
    /// The companion may still hold an open update slot
    companion_open: bool,
    /// Last target write was refused; sessions stay refused until a valid one
    target_rejected: bool,
}

impl<F, R, C> UpdateCoordinator<F, R, C>
where
    F: FlashBank,
    R: RebootContract,
    C: CommandChannel,
{
    pub fn new(flash: F, reboot: R, companion: Option<C>) -> Self {
        Self {
            target: UpdateTarget::Primary,
            status: UpdateStatus::Off,
            session: Session::new(),
            flash,
            reboot,
            companion,
            companion_open: false,
            target_rejected: false,
        }
    }

    pub fn target(&self) -> UpdateTarget {
        self.target
    }

    pub fn status(&self) -> UpdateStatus {
        self.status
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn flash(&self) -> &F {
        &self.flash
    }

    pub fn companion(&self) -> Option<&C> {
        self.companion.as_ref()
    }

    /// Handle a write to the target register. Unknown targets, or the
    /// companion on a board without one, leave the target unchanged, end any
    /// live session and refuse new ones until a valid target is selected.
    pub fn select_target(&mut self, raw: u8) {
        let target = match UpdateTarget::from_register(raw) {
            Some(UpdateTarget::Companion) if self.companion.is_none() => None,
            other => other,
        };

        let Some(target) = target else {
            log::warn!("update: unsupported target {}", raw);
            self.fail(UpdateError::UnsupportedPlatform);
            self.session.reset();
            self.target_rejected = true;
            return;
        };
        self.target_rejected = false;

        if target != self.target && self.status == UpdateStatus::Receiving {
            log::info!("update: target changed, session dropped");
            self.close_companion();
            self.session.reset();
            self.status = UpdateStatus::Off;
        }
        self.target = target;
    }

    /// Ping the companion and report whether it answered.
    pub fn companion_connected(&mut self) -> bool {
        match self.companion.as_mut() {
            Some(link) => link.probe().is_ok(),
            None => false,
        }
    }

    /// Forward a raw command byte without payload, if the companion is up.
    pub fn companion_command(&mut self, raw: u8) -> protocol::Result<()> {
        let link = self.companion.as_mut().ok_or(ProtocolError::NotConnected)?;
        if !link.is_connected() {
            return Err(ProtocolError::NotConnected);
        }
        let command = Command::try_from(raw).map_err(ProtocolError::UnknownCommand)?;
        link.execute(command, &[])
    }

    /// Feed one byte written to the update data register.
    pub fn feed(&mut self, byte: u8) -> Result<Progress> {
        if byte == SESSION_START_BYTE {
            return self.start_session();
        }

        if self.status != UpdateStatus::Receiving {
            return Ok(Progress::Idle);
        }

        let result = self.receive(byte);
        if let Err(err) = result {
            self.fail(err);
        }
        result
    }

    /// Stage the completed primary image and hand over to the bootloader.
    ///
    /// Only returns on failure, with the status set accordingly. Without a
    /// completed primary session there is nothing to commit: `FlashEmpty`.
    pub fn commit_and_reboot(&mut self) -> Result<Infallible> {
        if self.target != UpdateTarget::Primary || !self.session.complete {
            log::warn!("update: no completed primary image to commit");
            self.status = UpdateStatus::FlashEmpty;
            return Err(UpdateError::FlashEmpty);
        }

        match self.session.image.commit(&mut self.flash) {
            Ok(handoff) => {
                log::info!("update: rebooting into {:#x}", handoff.image_address);
                self.reboot.reboot(handoff)
            }
            Err(err) => {
                log::warn!("update: commit failed: {:?}", err);
                self.status = err.into();
                Err(err)
            }
        }
    }

    fn start_session(&mut self) -> Result<Progress> {
        self.session.reset();

        if self.target_rejected {
            self.status = UpdateStatus::UnsupportedPlatform;
            return Err(UpdateError::UnsupportedPlatform);
        }

        if self.target == UpdateTarget::Companion {
            if let Err(err) = self.open_companion() {
                self.fail(err);
                return Err(err);
            }
        }

        log::info!("update: session started for {:?}", self.target);
        self.status = UpdateStatus::Receiving;
        Ok(Progress::More)
    }

    fn open_companion(&mut self) -> Result<()> {
        if self.companion_open {
            self.close_companion();
        }

        let link = self
            .companion
            .as_mut()
            .ok_or(UpdateError::UnsupportedPlatform)?;
        link.probe()?;
        link.execute(Command::BeginUpdate, &[])?;
        self.companion_open = true;
        Ok(())
    }

    /// Best-effort abort of a companion slot left open.
    fn close_companion(&mut self) {
        if !self.companion_open {
            return;
        }
        if let Some(link) = self.companion.as_mut() {
            if link.execute(Command::AbortUpdate, &[]).is_err() {
                log::warn!("update: companion abort not acknowledged");
            }
        }
        self.companion_open = false;
    }

    fn receive(&mut self, byte: u8) -> Result<Progress> {
        let line = match self.session.lines.push(byte) {
            Line::Continue => return Ok(Progress::More),
            Line::Failed(err) => return Err(err),
            Line::Ready(line) => line,
        };

        match self.target {
            UpdateTarget::Primary => {
                let record = parse_record(line)?;
                log::debug!("update: record {:?} @{:#06x}", record.kind, record.address);

                let progress = self.session.image.apply(&record)?;
                if progress == Progress::Complete {
                    log::info!("update: image complete, {} bytes", self.session.image.offset());
                    self.session.complete = true;
                    self.status = UpdateStatus::Off;
                }
                Ok(progress)
            }
            UpdateTarget::Companion => {
                if !line.starts_with(b":") {
                    return Err(UpdateError::BadLine);
                }

                let link = self
                    .companion
                    .as_mut()
                    .ok_or(UpdateError::UnsupportedPlatform)?;
                link.execute(Command::DataChunk, line)?;

                if !line.starts_with(EOF_RECORD) {
                    return Ok(Progress::More);
                }

                link.finish_update()?;
                log::info!("update: companion image sent, awaiting reboot");
                self.companion_open = false;
                self.status = UpdateStatus::AwaitingReboot;
                Ok(Progress::Complete)
            }
        }
    }

    fn fail(&mut self, err: UpdateError) {
        log::warn!("update: session failed: {:?}", err);
        self.status = err.into();

        // After a link failure the companion state is unknown; the next
        // session start retries the abort.
        if self.target == UpdateTarget::Companion && err != UpdateError::CommError {
            self.close_companion();
        }
    }
}
