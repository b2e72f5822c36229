//! DTR/RTS sequences that drop the chip into its ROM bootloader.
//!
//! Which sequence a board needs depends on how its serial port is wired:
//! chips with built-in USB serial expose the lines directly, while boards
//! behind a UART bridge use the classic two-transistor auto-reset circuit.

use std::{sync::OnceLock, time::Duration};

use regex::Regex;
use strum::Display;

use crate::{error::Result, tracing::prelude::*, transport::SerialLink};

const STEP: Duration = Duration::from_millis(5);
const SETTLE: Duration = Duration::from_millis(50);

/// Port names that belong to a USB CDC-ACM device rather than a bridge chip.
const USB_NATIVE_PATTERN: &str = r"ttyACM\d+|usbmodem";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "kebab-case")]
pub enum ResetStrategy {
    UsbNative,
    Bridge,
}

impl ResetStrategy {
    /// Toggle the lines. Nothing is read back; only a later sync tells
    /// whether the chip entered the bootloader.
    pub fn run(self, link: &mut (impl SerialLink + ?Sized)) -> Result<()> {
        debug!(port = %link.name(), strategy = %self, "Resetting into bootloader");

        match self {
            Self::UsbNative => {
                link.set_dtr(false)?;
                link.set_rts(true)?;
                link.delay(STEP);
                link.set_dtr(true)?;
                link.delay(STEP);
                link.set_dtr(false)?;
                link.delay(SETTLE);
                link.set_rts(false)?;
            }
            Self::Bridge => {
                link.set_dtr(false)?;
                link.set_rts(false)?;
                link.delay(STEP);
                link.set_rts(true)?;
                link.delay(STEP);
                link.set_dtr(true)?;
                link.set_rts(false)?;
                link.delay(STEP);
                link.set_dtr(false)?;
                link.set_rts(true)?;
                link.delay(SETTLE);
                link.set_dtr(false)?;
                link.set_rts(false)?;
            }
        }

        Ok(())
    }
}

/// Chooses the reset sequence for a port.
pub trait PortClassifier {
    fn classify(&self, port: &str) -> ResetStrategy;
}

/// Classifies by the OS-assigned port name.
///
/// `ttyACM*` (Linux) and `*usbmodem*` (macOS) are USB-native; everything
/// else, including every BSD and Windows name, is treated as a bridge.
#[derive(Debug, Clone, Copy, Default)]
pub struct NamePatternClassifier;

impl NamePatternClassifier {
    fn regex() -> &'static Regex {
        static RE: OnceLock<Regex> = OnceLock::new();
        RE.get_or_init(|| Regex::new(USB_NATIVE_PATTERN).expect("valid usb-native pattern"))
    }
}

impl PortClassifier for NamePatternClassifier {
    fn classify(&self, port: &str) -> ResetStrategy {
        if Self::regex().is_match(port) {
            ResetStrategy::UsbNative
        } else {
            ResetStrategy::Bridge
        }
    }
}

/// Always picks the same sequence.
#[derive(Debug, Clone, Copy)]
pub struct Fixed(pub ResetStrategy);

impl PortClassifier for Fixed {
    fn classify(&self, _port: &str) -> ResetStrategy {
        self.0
    }
}
