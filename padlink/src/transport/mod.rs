//! Physical transport layer for serial connections.
//!
//! This module handles low-level serial connections to the microcontroller
//! board. It provides discovery, port validation, and raw byte access with
//! control-line toggling, without any protocol knowledge.

use std::time::Duration;

use crate::error::Result;

pub mod ports;
pub mod serial;

pub use ports::{candidate_ports, check_port_format};
pub use serial::{open_port, SerialPortLink, BAUD_RATE, READ_TIMEOUT, WRITE_TIMEOUT};

/// Which receive/transmit buffers to discard.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClearBuffer {
    Input,
    Output,
    All,
}

/// A source of single bytes with a per-byte timeout.
pub trait ByteSource {
    /// Read one byte, or `None` if nothing arrived within `timeout`.
    fn read_byte(&mut self, timeout: Duration) -> Result<Option<u8>>;
}

/// An open serial port, as far as the bootloader protocol needs it.
pub trait SerialLink: ByteSource {
    /// OS name of the port, e.g. `/dev/ttyUSB0` or `COM3`.
    fn name(&self) -> &str;

    fn write_all(&mut self, data: &[u8]) -> Result<()>;

    fn clear(&mut self, buffer: ClearBuffer) -> Result<()>;

    /// Set the DTR line (`true` asserts it).
    fn set_dtr(&mut self, level: bool) -> Result<()>;

    /// Set the RTS line (`true` asserts it).
    fn set_rts(&mut self, level: bool) -> Result<()>;

    fn delay(&mut self, duration: Duration) {
        std::thread::sleep(duration);
    }
}
