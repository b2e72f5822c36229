//! Common error types for padlink.
//!
//! This module provides a centralized Error enum using thiserror,
//! with conversions from underlying error types used throughout the crate.

use thiserror::Error;

/// Main error type for padlink operations.
#[derive(Error, Debug)]
pub enum Error {
    /// No matching USB device, or a serial port that could not be opened
    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    /// A control transfer failed or returned too few bytes
    #[error("Transfer failed: {0}")]
    TransferFailed(String),

    /// The bootloader never answered a sync within the retry budget
    #[error("Protocol desync: no sync reply after {attempts} attempts")]
    ProtocolDesync { attempts: usize },

    /// A register read exhausted its retries without a valid reply
    #[error("Register read failed at 0x{address:08X}")]
    RegisterReadFailed { address: u32 },

    /// Text that does not parse as six colon-separated hex octets
    #[error("Invalid MAC address format: {0:?} (expected AA:BB:CC:DD:EE:FF)")]
    InvalidFormat(String),

    /// Port identifier rejected before any I/O
    #[error("Invalid port name: {0:?}")]
    InvalidPort(String),

    /// USB errors from libusb
    #[error("USB error: {0}")]
    Usb(#[from] rusb::Error),

    /// Serial port errors
    #[error("Serial port error: {0}")]
    Serial(#[from] tokio_serial::Error),

    /// I/O errors from std
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// The external esptool backend failed or is missing
    #[error("External tool error: {0}")]
    ExternalTool(String),
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Config(e.to_string())
    }
}

impl Error {
    /// Whether this is an I/O timeout rather than a broken device.
    pub fn is_timeout(&self) -> bool {
        match self {
            Error::Io(e) => e.kind() == std::io::ErrorKind::TimedOut,
            Error::Serial(e) => matches!(
                e.kind,
                tokio_serial::ErrorKind::Io(std::io::ErrorKind::TimedOut)
            ),
            _ => false,
        }
    }
}

/// Convenience type alias for Results using our Error type.
pub type Result<T> = std::result::Result<T, Error>;
