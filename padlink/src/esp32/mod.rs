//! ESP32 factory MAC over the ROM bootloader.
//!
//! The chip's first-stage loader speaks a SLIP-framed command protocol on
//! UART0. Reading the MAC needs only two commands: SYNC, to establish that
//! the loader is listening (resetting the chip into it if not), and READ_REG,
//! to fetch the two eFuse words holding the address.
//!
//! ```text
//! Unsynced -> Syncing -> Synced -> Reading -> Synced
//!                 \                    \
//!                  `-> Failed           `-> Failed
//! ```

use strum::Display;

use crate::{
    config::{Config, RegisterFallback},
    error::{Error, Result},
    mac::MacAddress,
    retry::Retry,
    tracing::prelude::*,
    transport::{self, ClearBuffer, SerialLink},
};

pub mod efuse;
pub mod esptool;
pub mod reset;
pub mod slip;

use efuse::{assemble_mac, EFUSE_MAC_HIGH, EFUSE_MAC_LOW};
use reset::{NamePatternClassifier, PortClassifier};
use slip::FrameDecoder;

/// Bootloader command opcodes
pub mod opcode {
    pub const SYNC: u8 = 0x08;
    pub const READ_REG: u8 = 0x0A;
}

const SYNC_PREAMBLE: [u8; 4] = [0x07, 0x07, 0x12, 0x20];
const SYNC_FILL: u8 = 0x55;
pub const SYNC_PAYLOAD_LEN: usize = 36;

/// Sync attempts before resorting to a reset
pub const FAST_SYNC: Retry = Retry::new("sync", 5);

/// Sync attempts after the reset
pub const FULL_SYNC: Retry = Retry::new("sync after reset", 20);

pub const READ_REG_RETRY: Retry = Retry::new("read_reg", 3);

/// Bytes in a READ_REG reply up to and including the value
const REG_REPLY_MIN_LEN: usize = 8;

/// The SYNC payload: a fixed preamble, then 0x55 fill the ROM autobauds on.
pub fn sync_payload() -> [u8; SYNC_PAYLOAD_LEN] {
    let mut payload = [SYNC_FILL; SYNC_PAYLOAD_LEN];
    payload[..SYNC_PREAMBLE.len()].copy_from_slice(&SYNC_PREAMBLE);
    payload
}

/// Extract the register value from a READ_REG reply.
fn parse_reg_reply(frame: &[u8]) -> Option<u32> {
    if frame.len() < REG_REPLY_MIN_LEN || frame[1] != opcode::READ_REG {
        return None;
    }
    Some(u32::from_le_bytes([frame[4], frame[5], frame[6], frame[7]]))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum SyncState {
    Unsynced,
    Syncing,
    Synced,
    Reading,
    Failed,
}

/// A conversation with the ROM loader over one serial link.
///
/// Owns the link; dropping the bootloader closes the port.
pub struct Bootloader<L: SerialLink> {
    link: L,
    decoder: FrameDecoder,
    classifier: Box<dyn PortClassifier>,
    fallback: RegisterFallback,
    state: SyncState,
}

impl<L: SerialLink> Bootloader<L> {
    pub fn new(link: L) -> Self {
        Self {
            link,
            decoder: FrameDecoder::default(),
            classifier: Box::new(NamePatternClassifier),
            fallback: RegisterFallback::default(),
            state: SyncState::Unsynced,
        }
    }

    pub fn with_classifier(mut self, classifier: Box<dyn PortClassifier>) -> Self {
        self.classifier = classifier;
        self
    }

    pub fn with_register_fallback(mut self, fallback: RegisterFallback) -> Self {
        self.fallback = fallback;
        self
    }

    pub fn with_decoder(mut self, decoder: FrameDecoder) -> Self {
        self.decoder = decoder;
        self
    }

    pub fn state(&self) -> SyncState {
        self.state
    }

    pub fn into_link(self) -> L {
        self.link
    }

    /// Send one command and wait for one frame.
    ///
    /// A write that times out counts as an attempt with no reply; a chip
    /// that is not reading its port stalls writes until it is reset.
    fn command(link: &mut L, decoder: &FrameDecoder, op: u8, payload: &[u8]) -> Result<Option<Vec<u8>>> {
        let frame = slip::encode(op, payload, 0)?;
        match link.write_all(&frame) {
            Ok(()) => {}
            Err(e) if e.is_timeout() => {
                debug!(port = %link.name(), opcode = %format!("0x{op:02x}"), error = %e, "Write timed out");
                return Ok(None);
            }
            Err(e) => return Err(e),
        }
        decoder.decode(link)
    }

    fn try_sync(link: &mut L, decoder: &FrameDecoder) -> Result<Option<()>> {
        let reply = Self::command(link, decoder, opcode::SYNC, &sync_payload())?;
        Ok(reply.filter(|frame| frame.len() > 1).map(|_| ()))
    }

    /// Establish contact with the loader.
    ///
    /// Tries [`FAST_SYNC`] times as-is, then resets the chip once and tries
    /// [`FULL_SYNC`] times more.
    pub fn sync(&mut self) -> Result<()> {
        self.state = SyncState::Syncing;
        let result = self.sync_inner();
        self.state = match result {
            Ok(()) => SyncState::Synced,
            Err(_) => SyncState::Failed,
        };
        result
    }

    fn sync_inner(&mut self) -> Result<()> {
        let decoder = self.decoder;

        if FAST_SYNC
            .run_with(&mut self.link, |link, _| Self::try_sync(link, &decoder), |_, _| Ok(()))?
            .is_some()
        {
            debug!(port = %self.link.name(), "Synced");
            return Ok(());
        }

        let strategy = self.classifier.classify(self.link.name());
        info!(port = %self.link.name(), %strategy, "No sync reply, resetting into bootloader");
        strategy.run(&mut self.link)?;
        self.link.clear(ClearBuffer::Input)?;

        if FULL_SYNC
            .run_with(&mut self.link, |link, _| Self::try_sync(link, &decoder), |_, _| Ok(()))?
            .is_some()
        {
            debug!(port = %self.link.name(), "Synced after reset");
            return Ok(());
        }

        let attempts = FAST_SYNC.attempts() + FULL_SYNC.attempts();
        warn!(port = %self.link.name(), attempts, "Bootloader never answered sync");
        Err(Error::ProtocolDesync { attempts })
    }

    /// Read a 32-bit register.
    ///
    /// The input buffer is cleared between attempts so a late reply to one
    /// attempt is not taken as the answer to the next.
    pub fn read_reg(&mut self, address: u32) -> Result<u32> {
        if self.state != SyncState::Synced {
            debug!(state = %self.state, "Register read before sync");
        }
        self.state = SyncState::Reading;

        let decoder = self.decoder;
        let payload = address.to_le_bytes();
        let value = READ_REG_RETRY.run_with(
            &mut self.link,
            |link, _| {
                let reply = Self::command(link, &decoder, opcode::READ_REG, &payload)?;
                Ok(reply.as_deref().and_then(parse_reg_reply))
            },
            |link, _| link.clear(ClearBuffer::Input),
        );

        let value = match value {
            Ok(Some(value)) => value,
            Ok(None) => match self.fallback {
                RegisterFallback::Zero => {
                    warn!(address = %format!("0x{address:08X}"), "Register read failed, using 0");
                    0
                }
                RegisterFallback::Error => {
                    self.state = SyncState::Failed;
                    return Err(Error::RegisterReadFailed { address });
                }
            },
            Err(e) => {
                self.state = SyncState::Failed;
                return Err(e);
            }
        };

        trace!(
            address = %format!("0x{address:08X}"),
            value = %format!("0x{value:08X}"),
            "Register read"
        );
        self.state = SyncState::Synced;
        Ok(value)
    }

    /// Sync, then read and assemble the factory MAC.
    pub fn read_mac(&mut self) -> Result<MacAddress> {
        self.link.clear(ClearBuffer::All)?;
        self.sync()?;
        self.link.clear(ClearBuffer::Input)?;

        let low = self.read_reg(EFUSE_MAC_LOW)?;
        let high = self.read_reg(EFUSE_MAC_HIGH)?;
        let mac = assemble_mac(low, high);

        info!(port = %self.link.name(), %mac, "Read ESP32 MAC");
        Ok(mac)
    }
}

/// Open `port`, read the MAC and close the port again.
pub fn read_mac_from_port(port: &str, config: &Config) -> Result<MacAddress> {
    let link = transport::open_port(port)?;
    Bootloader::new(link)
        .with_classifier(config.port_classifier.classifier())
        .with_register_fallback(config.register_fallback)
        .read_mac()
}

#[cfg(test)]
mod tests {
    use std::{cell::Cell, rc::Rc};

    use super::*;
    use crate::{
        esp32::reset::{Fixed, ResetStrategy},
        transport::testing::{FakePort, PortEvent},
    };
    use slip::{Command, END};

    /// Frame a reply the way the ROM does: direction 0x01, echoed opcode,
    /// length, 4-byte value, then status bytes.
    fn reply(op: u8, value: u32) -> Vec<u8> {
        let mut body = vec![0x01, op, 0x02, 0x00];
        body.extend_from_slice(&value.to_le_bytes());
        body.extend_from_slice(&[0x00, 0x00]);

        let mut frame = vec![END];
        for b in body {
            match b {
                slip::END => frame.extend_from_slice(&[slip::ESC, slip::ESC_END]),
                slip::ESC => frame.extend_from_slice(&[slip::ESC, slip::ESC_ESC]),
                _ => frame.push(b),
            }
        }
        frame.push(END);
        frame
    }

    fn unpack(frame: &[u8]) -> (u8, Vec<u8>) {
        let mut src = crate::transport::testing::Script::new(frame);
        let packet = FrameDecoder::default().decode(&mut src).unwrap().unwrap();
        let command = Command::parse(&packet).unwrap();
        (command.opcode, command.payload.to_vec())
    }

    /// A chip that answers sync after `deaf_syncs` ignored attempts and
    /// returns fixed eFuse words.
    fn chip(deaf_syncs: usize, low: u32, high: u32) -> impl FnMut(&[u8]) -> Vec<u8> {
        let mut syncs = 0;
        move |frame| {
            let (op, payload) = unpack(frame);
            match op {
                opcode::SYNC => {
                    syncs += 1;
                    if syncs > deaf_syncs {
                        reply(opcode::SYNC, 0)
                    } else {
                        Vec::new()
                    }
                }
                opcode::READ_REG => {
                    let address = u32::from_le_bytes(payload.try_into().unwrap());
                    match address {
                        EFUSE_MAC_LOW => reply(opcode::READ_REG, low),
                        EFUSE_MAC_HIGH => reply(opcode::READ_REG, high),
                        _ => reply(opcode::READ_REG, 0),
                    }
                }
                _ => Vec::new(),
            }
        }
    }

    fn fast_decoder() -> FrameDecoder {
        FrameDecoder::default().with_max_attempts(40)
    }

    fn bootloader(port: FakePort) -> Bootloader<FakePort> {
        Bootloader::new(port)
            .with_classifier(Box::new(Fixed(ResetStrategy::Bridge)))
            .with_decoder(fast_decoder())
    }

    #[test]
    fn sync_payload_layout() {
        let payload = sync_payload();
        assert_eq!(payload.len(), 36);
        assert_eq!(&payload[..4], &[0x07, 0x07, 0x12, 0x20]);
        assert!(payload[4..].iter().all(|&b| b == 0x55));
    }

    #[test]
    fn reads_mac_on_first_sync() {
        let port = FakePort::new("/dev/ttyUSB0", chip(0, 0x0102_0304, 0x0000_0506));
        let mut boot = bootloader(port);

        let mac = boot.read_mac().unwrap();
        assert_eq!(mac.to_string(), "05:06:01:02:03:04");
        assert_eq!(boot.state(), SyncState::Synced);

        let port = boot.into_link();
        assert_eq!(port.writes().len(), 3);
        assert!(!port.events.iter().any(|e| matches!(e, PortEvent::Dtr(_))));
        assert_eq!(port.events[0], PortEvent::Clear(ClearBuffer::All));
    }

    #[test]
    fn reset_runs_once_between_fast_and_full_sync() {
        let port = FakePort::new("/dev/ttyUSB0", chip(7, 0xAABB_CCDD, 0x0000_EEFF));
        let mut boot = bootloader(port);

        let mac = boot.read_mac().unwrap();
        assert_eq!(mac.to_string(), "EE:FF:AA:BB:CC:DD");

        let events = boot.into_link().events;
        let first_reset = events
            .iter()
            .position(|e| matches!(e, PortEvent::Dtr(_) | PortEvent::Rts(_)))
            .unwrap();
        let syncs_before_reset = events[..first_reset]
            .iter()
            .filter(|e| matches!(e, PortEvent::Write(_)))
            .count();
        assert_eq!(syncs_before_reset, FAST_SYNC.attempts());

        // Exactly one bridge sequence: it sets DTR four times
        let dtr_toggles = events.iter().filter(|e| matches!(e, PortEvent::Dtr(_))).count();
        assert_eq!(dtr_toggles, 4);

        let last_line_event = events
            .iter()
            .rposition(|e| matches!(e, PortEvent::Dtr(_) | PortEvent::Rts(_)))
            .unwrap();
        assert_eq!(events[last_line_event + 1], PortEvent::Clear(ClearBuffer::Input));
    }

    #[test]
    fn desync_after_both_budgets() {
        let mut boot = bootloader(FakePort::silent("/dev/ttyUSB0"));

        let err = boot.read_mac().unwrap_err();
        assert!(matches!(err, Error::ProtocolDesync { attempts: 25 }));
        assert_eq!(boot.state(), SyncState::Failed);

        let port = boot.into_link();
        assert_eq!(port.writes().len(), 25);
        assert!(port
            .writes()
            .iter()
            .all(|w| unpack(w).0 == opcode::SYNC));
    }

    #[test]
    fn stalled_writes_use_up_sync_budget() {
        let mut port = FakePort::silent("/dev/ttyUSB0");
        port.stall_writes = true;
        let mut boot = bootloader(port);

        let err = boot.sync().unwrap_err();
        assert!(matches!(err, Error::ProtocolDesync { attempts: 25 }));
        assert_eq!(boot.state(), SyncState::Failed);

        let port = boot.into_link();
        assert_eq!(port.writes().len(), 25);
        let dtr_toggles = port.events.iter().filter(|e| matches!(e, PortEvent::Dtr(_))).count();
        assert_eq!(dtr_toggles, 4);
        assert_eq!(port.idle_reads, 0);
    }

    #[test]
    fn stalled_register_writes_are_retried() {
        let mut port = FakePort::silent("/dev/ttyUSB0");
        port.stall_writes = true;
        let mut boot = bootloader(port);

        let err = boot.read_reg(EFUSE_MAC_LOW).unwrap_err();
        assert!(matches!(err, Error::RegisterReadFailed { address: EFUSE_MAC_LOW }));
        assert_eq!(boot.into_link().writes().len(), READ_REG_RETRY.attempts());
    }

    #[test]
    fn extra_sync_replies_are_dropped_before_register_reads() {
        // The ROM answers one SYNC with several identical frames
        let mut inner = chip(0, 0x0102_0304, 0x0000_0506);
        let port = FakePort::new("/dev/ttyUSB0", move |frame| {
            let out = inner(frame);
            if unpack(frame).0 == opcode::SYNC {
                out.repeat(8)
            } else {
                out
            }
        });
        let mut boot = bootloader(port);

        let mac = boot.read_mac().unwrap();
        assert_eq!(mac.to_string(), "05:06:01:02:03:04");

        let events = boot.into_link().events;
        let opcode_at = |i: usize| match &events[i] {
            PortEvent::Write(frame) => Some(unpack(frame).0),
            _ => None,
        };
        let last_sync = (0..events.len()).rfind(|&i| opcode_at(i) == Some(opcode::SYNC)).unwrap();
        let first_read = (0..events.len()).find(|&i| opcode_at(i) == Some(opcode::READ_REG)).unwrap();
        assert!(events[last_sync..first_read].contains(&PortEvent::Clear(ClearBuffer::Input)));

        // One sync, one read per word: no read was spent on a stale frame
        let writes = events.iter().filter(|e| matches!(e, PortEvent::Write(_))).count();
        assert_eq!(writes, 3);
    }

    #[test]
    fn one_byte_sync_reply_is_not_sync() {
        let port = FakePort::new("/dev/ttyUSB0", |_| vec![END, 0x01, END]);
        let mut boot = bootloader(port);
        assert!(matches!(boot.sync(), Err(Error::ProtocolDesync { .. })));
    }

    #[test]
    fn uses_classifier_for_port() {
        let port = FakePort::new("/dev/ttyACM0", chip(5, 0, 0));
        let mut boot = Bootloader::new(port).with_decoder(fast_decoder());
        boot.sync().unwrap();

        let events = boot.into_link().events;
        let first_line = events
            .iter()
            .find(|e| matches!(e, PortEvent::Dtr(_) | PortEvent::Rts(_)))
            .cloned();
        // usb-native starts DTR off, RTS on; the two sequences differ on the second step
        let second_line = events
            .iter()
            .filter(|e| matches!(e, PortEvent::Dtr(_) | PortEvent::Rts(_)))
            .nth(1)
            .cloned();
        assert_eq!(first_line, Some(PortEvent::Dtr(false)));
        assert_eq!(second_line, Some(PortEvent::Rts(true)));
    }

    #[test]
    fn register_reply_with_wrong_opcode_is_retried() {
        let bad_replies = Rc::new(Cell::new(2));
        let left = bad_replies.clone();
        let port = FakePort::new("/dev/ttyUSB0", move |frame| {
            let (op, _) = unpack(frame);
            if op == opcode::READ_REG && left.get() > 0 {
                left.set(left.get() - 1);
                return reply(opcode::SYNC, 0xFFFF_FFFF);
            }
            reply(op, 0x1234_5678)
        });
        let mut boot = bootloader(port);
        boot.sync().unwrap();

        assert_eq!(boot.read_reg(EFUSE_MAC_LOW).unwrap(), 0x1234_5678);
        assert_eq!(bad_replies.get(), 0);

        let port = boot.into_link();
        let clears = port
            .events
            .iter()
            .filter(|e| **e == PortEvent::Clear(ClearBuffer::Input))
            .count();
        assert_eq!(clears, 2);
    }

    #[test]
    fn short_register_reply_is_invalid() {
        assert_eq!(parse_reg_reply(&[0x01, opcode::READ_REG, 0x02, 0x00, 1, 2, 3]), None);
        assert_eq!(
            parse_reg_reply(&[0x01, opcode::READ_REG, 0x02, 0x00, 0x78, 0x56, 0x34, 0x12]),
            Some(0x1234_5678)
        );
    }

    fn mute_registers() -> impl FnMut(&[u8]) -> Vec<u8> {
        |frame| {
            if unpack(frame).0 == opcode::SYNC {
                reply(opcode::SYNC, 0)
            } else {
                Vec::new()
            }
        }
    }

    #[test]
    fn register_failure_is_error_by_default() {
        let mut boot = bootloader(FakePort::new("/dev/ttyUSB0", mute_registers()));
        let err = boot.read_mac().unwrap_err();
        assert!(matches!(err, Error::RegisterReadFailed { address: EFUSE_MAC_LOW }));
        assert_eq!(boot.state(), SyncState::Failed);
        assert_eq!(boot.into_link().writes().len(), 1 + READ_REG_RETRY.attempts());
    }

    #[test]
    fn register_failure_can_fall_back_to_zero() {
        let mut boot = bootloader(FakePort::new("/dev/ttyUSB0", mute_registers()))
            .with_register_fallback(RegisterFallback::Zero);
        let mac = boot.read_mac().unwrap();
        assert_eq!(mac, MacAddress::default());
        assert_eq!(boot.into_link().writes().len(), 1 + 2 * READ_REG_RETRY.attempts());
    }

    #[test]
    fn read_mac_from_invalid_port() {
        assert!(matches!(
            read_mac_from_port("/dev/tty;ls", &Config::default()),
            Err(Error::InvalidPort(_))
        ));
    }
}
