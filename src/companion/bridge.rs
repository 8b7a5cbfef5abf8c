//! UART front end of the companion's update receiver

use embedded_hal::blocking::delay::DelayMs;
use embedded_hal::serial::{Read, Write};

use super::{OtaReceiver, OtaSlot};
use crate::config::COMPANION_REBOOT_DELAY_MS;
use crate::protocol::packet::{Frame, FrameDecoder};
use crate::protocol::transport::Transport;
use crate::protocol::{Response, Result};

/// Hard reset of the companion chip.
pub trait ResetTrigger {
    fn reset(&mut self) -> !;
}

/// Silence tick used while a frame is in flight
const IDLE_TICK_MS: u16 = 1;

pub struct CompanionBridge<S, D, P, R> {
    transport: Transport<S>,
    delay: D,
    decoder: FrameDecoder,
    receiver: OtaReceiver<P>,
    reset: R,
    silent_ms: u32,
}

impl<S, D, P, R> CompanionBridge<S, D, P, R>
where
    S: Read<u8> + Write<u8>,
    D: DelayMs<u16>,
    P: OtaSlot,
    R: ResetTrigger,
{
    pub fn new(serial: S, delay: D, receiver: OtaReceiver<P>, reset: R) -> Self {
        Self {
            transport: Transport::new(serial),
            delay,
            decoder: FrameDecoder::new(),
            receiver,
            reset,
            silent_ms: 0,
        }
    }

    pub fn receiver(&self) -> &OtaReceiver<P> {
        &self.receiver
    }

    /// Handle at most one received byte. While a frame is partly received and
    /// the line is quiet, waits one tick and enforces the frame timeouts.
    pub fn poll(&mut self) -> Result<()> {
        let Some(byte) = self.transport.try_read()? else {
            return self.idle();
        };
        self.silent_ms = 0;

        let reply = match self.decoder.push(byte) {
            None => return Ok(()),
            Some(Frame::Complete { command, payload }) => {
                log::debug!("bridge: command {:#04x}, {} bytes", command, payload.len());
                self.receiver.handle(command, payload)
            }
            Some(Frame::Oversized { command, length }) => {
                log::warn!("bridge: command {:#04x} too large ({} bytes)", command, length);
                self.transport.write_all(&[Response::Error as u8])?;
                return Ok(());
            }
        };

        self.transport.write_all(&[reply.response as u8])?;
        if reply.reboot {
            self.delay.delay_ms(COMPANION_REBOOT_DELAY_MS);
            self.reset.reset();
        }
        Ok(())
    }

    fn idle(&mut self) -> Result<()> {
        let Some(limit) = self.decoder.timeout_ms() else {
            return Ok(());
        };

        self.delay.delay_ms(IDLE_TICK_MS);
        self.silent_ms += u32::from(IDLE_TICK_MS);
        if self.silent_ms < limit {
            return Ok(());
        }

        log::warn!("bridge: frame timed out");
        self.decoder.reset();
        self.silent_ms = 0;
        self.transport.write_all(&[Response::Error as u8])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{FRAME_CAPACITY, FRAME_HEADER_TIMEOUT_MS, FRAME_PAYLOAD_TIMEOUT_MS};
    use crate::protocol::packet::FrameHeader;
    use crate::testing::{FakeDelay, FakeSerial, PanicReset, RamSlot};
    use std::panic::{catch_unwind, AssertUnwindSafe};

    type Bridge = CompanionBridge<FakeSerial, FakeDelay, RamSlot, PanicReset>;

    fn bridge(serial: &FakeSerial, delay: &FakeDelay) -> Bridge {
        CompanionBridge::new(
            serial.clone(),
            delay.clone(),
            OtaReceiver::new(RamSlot::default()),
            PanicReset,
        )
    }

    fn frame(command: u8, payload: &[u8]) -> Vec<u8> {
        let mut bytes = FrameHeader {
            command,
            length: payload.len() as u32,
        }
        .encode()
        .to_vec();
        bytes.extend_from_slice(payload);
        bytes
    }

    fn pump(bridge: &mut Bridge, serial: &FakeSerial) {
        while serial.pending() > 0 {
            bridge.poll().unwrap();
        }
    }

    #[test]
    fn frames_are_answered_in_order() {
        let serial = FakeSerial::new();
        let delay = FakeDelay::new();
        let mut bridge = bridge(&serial, &delay);

        serial.incoming(&frame(0x00, &[]));
        serial.incoming(&frame(0xA0, &[]));
        serial.incoming(&frame(0xA1, b":0100000042BD"));
        serial.incoming(&frame(0xA2, &[]));
        pump(&mut bridge, &serial);

        assert_eq!(serial.sent(), vec![0xB0, 0xB0, 0xB0, 0xB0]);
        assert_eq!(bridge.receiver().slot().committed(), Some(&[0x42u8][..]));
    }

    #[test]
    fn oversized_frame_is_answered_error() {
        let serial = FakeSerial::new();
        let delay = FakeDelay::new();
        let mut bridge = bridge(&serial, &delay);

        serial.incoming(&frame(0xA1, &vec![b'0'; FRAME_CAPACITY + 1]));
        serial.incoming(&frame(0x00, &[]));
        pump(&mut bridge, &serial);

        assert_eq!(serial.sent(), vec![0xB1, 0xB0]);
    }

    #[test]
    fn stalled_header_times_out() {
        let serial = FakeSerial::new();
        let delay = FakeDelay::new();
        let mut bridge = bridge(&serial, &delay);

        serial.incoming(&[0xA0, 0x01]);
        pump(&mut bridge, &serial);
        for _ in 0..FRAME_HEADER_TIMEOUT_MS {
            bridge.poll().unwrap();
        }

        assert_eq!(serial.sent(), vec![0xB1]);
        assert_eq!(delay.elapsed_ms(), FRAME_HEADER_TIMEOUT_MS);

        // decoder is back at a frame boundary
        serial.incoming(&frame(0x00, &[]));
        pump(&mut bridge, &serial);
        assert_eq!(serial.sent(), vec![0xB1, 0xB0]);
    }

    #[test]
    fn stalled_payload_uses_longer_timeout() {
        let serial = FakeSerial::new();
        let delay = FakeDelay::new();
        let mut bridge = bridge(&serial, &delay);

        serial.incoming(&[0xA1, 0x04, 0x00, 0x00, b':']);
        pump(&mut bridge, &serial);
        for _ in 0..FRAME_HEADER_TIMEOUT_MS {
            bridge.poll().unwrap();
        }
        assert!(serial.sent().is_empty());

        for _ in FRAME_HEADER_TIMEOUT_MS..FRAME_PAYLOAD_TIMEOUT_MS {
            bridge.poll().unwrap();
        }
        assert_eq!(serial.sent(), vec![0xB1]);
    }

    #[test]
    fn idle_line_does_not_wait() {
        let serial = FakeSerial::new();
        let delay = FakeDelay::new();
        let mut bridge = bridge(&serial, &delay);

        for _ in 0..10 {
            bridge.poll().unwrap();
        }
        assert_eq!(delay.elapsed_ms(), 0);
        assert!(serial.sent().is_empty());
    }

    #[test]
    fn reboot_replies_then_resets() {
        let serial = FakeSerial::new();
        let delay = FakeDelay::new();
        let mut bridge = bridge(&serial, &delay);

        serial.incoming(&frame(0xA4, &[]));
        let outcome = catch_unwind(AssertUnwindSafe(|| pump(&mut bridge, &serial)));

        assert!(outcome.is_err());
        assert_eq!(serial.sent(), vec![0xB0]);
        assert_eq!(delay.elapsed_ms(), u32::from(COMPANION_REBOOT_DELAY_MS));
    }
}
