//! Native serial ports.

use std::{
    io::{self, Read, Write},
    time::Duration,
};

use tokio_serial::{DataBits, FlowControl, Parity, SerialPort, StopBits};

use super::{check_port_format, ByteSource, ClearBuffer, SerialLink};
use crate::{
    error::{Error, Result},
    tracing::prelude::*,
};

/// Line speed the ROM bootloader autobauds to on sync
pub const BAUD_RATE: u32 = 115_200;

/// Per-byte read timeout
pub const READ_TIMEOUT: Duration = Duration::from_millis(10);

/// Timeout for writing one frame
pub const WRITE_TIMEOUT: Duration = Duration::from_millis(100);

/// An open serial port at 115200 8N1 without flow control.
///
/// The port closes when this is dropped.
pub struct SerialPortLink {
    port: Box<dyn SerialPort>,
    name: String,
    timeout: Duration,
}

/// Open and configure `name`.
///
/// Open failures are reported as [`Error::DeviceNotFound`]; the port may be
/// missing, busy or not ours to open, and callers treat those alike.
pub fn open_port(name: &str) -> Result<SerialPortLink> {
    if !check_port_format(name) {
        return Err(Error::InvalidPort(name.to_string()));
    }

    let port = tokio_serial::new(name, BAUD_RATE)
        .data_bits(DataBits::Eight)
        .parity(Parity::None)
        .stop_bits(StopBits::One)
        .flow_control(FlowControl::None)
        .timeout(READ_TIMEOUT)
        .open()
        .map_err(|e| Error::DeviceNotFound(format!("{name}: {e}")))?;

    debug!(port = name, baud = BAUD_RATE, "Opened serial port");

    Ok(SerialPortLink {
        port,
        name: name.to_string(),
        timeout: READ_TIMEOUT,
    })
}

impl SerialPortLink {
    fn set_timeout(&mut self, timeout: Duration) -> Result<()> {
        if self.timeout != timeout {
            self.port.set_timeout(timeout)?;
            self.timeout = timeout;
        }
        Ok(())
    }
}

impl ByteSource for SerialPortLink {
    fn read_byte(&mut self, timeout: Duration) -> Result<Option<u8>> {
        self.set_timeout(timeout)?;

        let mut byte = [0u8; 1];
        match self.port.read(&mut byte) {
            Ok(1) => Ok(Some(byte[0])),
            Ok(_) => Ok(None),
            Err(e) if matches!(e.kind(), io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock) => {
                Ok(None)
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

impl SerialLink for SerialPortLink {
    fn name(&self) -> &str {
        &self.name
    }

    fn write_all(&mut self, data: &[u8]) -> Result<()> {
        self.set_timeout(WRITE_TIMEOUT)?;
        self.port.write_all(data)?;
        self.port.flush()?;
        Ok(())
    }

    fn clear(&mut self, buffer: ClearBuffer) -> Result<()> {
        let which = match buffer {
            ClearBuffer::Input => tokio_serial::ClearBuffer::Input,
            ClearBuffer::Output => tokio_serial::ClearBuffer::Output,
            ClearBuffer::All => tokio_serial::ClearBuffer::All,
        };
        self.port.clear(which)?;
        Ok(())
    }

    fn set_dtr(&mut self, level: bool) -> Result<()> {
        self.port.write_data_terminal_ready(level)?;
        Ok(())
    }

    fn set_rts(&mut self, level: bool) -> Result<()> {
        self.port.write_request_to_send(level)?;
        Ok(())
    }
}

impl Drop for SerialPortLink {
    fn drop(&mut self) {
        trace!(port = %self.name, "Closing serial port");
    }
}
