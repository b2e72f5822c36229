//! SLIP framing for the ROM bootloader.
//!
//! Every command and response is a SLIP packet: delimited by END bytes, with
//! END and ESC inside the packet replaced by two-byte escape sequences.
//! A command packet carries an 8-byte header ahead of its payload:
//!
//! ```text
//! 0x00 | opcode | len (u16 LE) | checksum (u32 LE) | payload...
//! ```

use std::{io, time::Duration};

use bytes::{BufMut, BytesMut};
use tokio_util::codec::Encoder;

use crate::{error::Result, tracing::prelude::*, transport::ByteSource};

pub const END: u8 = 0xC0;
pub const ESC: u8 = 0xDB;
pub const ESC_END: u8 = 0xDC;
pub const ESC_ESC: u8 = 0xDD;

/// Direction byte of a host-to-device command
const DIRECTION_REQUEST: u8 = 0x00;

pub const HEADER_LEN: usize = 8;

/// Read attempts allowed for one frame
pub const MAX_READ_ATTEMPTS: usize = 200;

/// Largest decoded frame kept; further bytes are dropped
pub const MAX_FRAME_LEN: usize = 256;

/// A command packet before framing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Command<'a> {
    pub opcode: u8,
    pub payload: &'a [u8],
    pub checksum: u32,
}

impl<'a> Command<'a> {
    pub fn new(opcode: u8, payload: &'a [u8], checksum: u32) -> Self {
        Self {
            opcode,
            payload,
            checksum,
        }
    }

    /// Split unstuffed packet content back into a command.
    ///
    /// Returns `None` if the header is short or the length field disagrees
    /// with the bytes present.
    pub fn parse(packet: &'a [u8]) -> Option<Self> {
        if packet.len() < HEADER_LEN || packet[0] != DIRECTION_REQUEST {
            return None;
        }
        let len = u16::from_le_bytes([packet[2], packet[3]]) as usize;
        let payload = &packet[HEADER_LEN..];
        if payload.len() != len {
            return None;
        }
        let checksum = u32::from_le_bytes([packet[4], packet[5], packet[6], packet[7]]);
        Some(Self::new(packet[1], payload, checksum))
    }
}

fn put_stuffed(dst: &mut BytesMut, bytes: &[u8]) {
    for &b in bytes {
        match b {
            END => dst.put_slice(&[ESC, ESC_END]),
            ESC => dst.put_slice(&[ESC, ESC_ESC]),
            _ => dst.put_u8(b),
        }
    }
}

#[derive(Debug, Default)]
pub struct SlipCodec;

impl Encoder<Command<'_>> for SlipCodec {
    type Error = io::Error;

    fn encode(&mut self, command: Command<'_>, dst: &mut BytesMut) -> std::result::Result<(), Self::Error> {
        let len = u16::try_from(command.payload.len()).map_err(|_| {
            io::Error::new(io::ErrorKind::InvalidInput, "payload longer than 65535 bytes")
        })?;

        let mut header = [0u8; HEADER_LEN];
        header[0] = DIRECTION_REQUEST;
        header[1] = command.opcode;
        header[2..4].copy_from_slice(&len.to_le_bytes());
        header[4..8].copy_from_slice(&command.checksum.to_le_bytes());

        let start = dst.len();
        dst.reserve(2 + 2 * (HEADER_LEN + command.payload.len()));
        dst.put_u8(END);
        put_stuffed(dst, &header);
        put_stuffed(dst, command.payload);
        dst.put_u8(END);

        trace!(
            opcode = %format!("0x{:02x}", command.opcode),
            bytes = dst.len() - start,
            frame = %hex::encode(&dst[start..]),
            "TX SLIP"
        );

        Ok(())
    }
}

/// Frame one command.
pub fn encode(opcode: u8, payload: &[u8], checksum: u32) -> Result<BytesMut> {
    let mut frame = BytesMut::new();
    SlipCodec.encode(Command::new(opcode, payload, checksum), &mut frame)?;
    Ok(frame)
}

/// Reads one SLIP frame a byte at a time within a fixed attempt budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameDecoder {
    capacity: usize,
    max_attempts: usize,
    byte_timeout: Duration,
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self {
            capacity: MAX_FRAME_LEN,
            max_attempts: MAX_READ_ATTEMPTS,
            byte_timeout: crate::transport::READ_TIMEOUT,
        }
    }
}

impl FrameDecoder {
    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    pub fn with_max_attempts(mut self, max_attempts: usize) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// Read until a complete frame arrives.
    ///
    /// Every read counts against the attempt budget whether or not a byte
    /// arrived. Bytes before the opening END are discarded. Returns the
    /// unstuffed content, possibly empty, or `None` if no closing END came
    /// within the budget.
    pub fn decode(&self, src: &mut (impl ByteSource + ?Sized)) -> Result<Option<Vec<u8>>> {
        let mut frame = Vec::with_capacity(self.capacity);
        let mut in_frame = false;
        let mut escaped = false;

        let store = |frame: &mut Vec<u8>, b: u8| {
            if frame.len() < self.capacity {
                frame.push(b);
            }
        };

        for _ in 0..self.max_attempts {
            let Some(b) = src.read_byte(self.byte_timeout)? else {
                continue;
            };

            if escaped {
                escaped = false;
                let unescaped = match b {
                    ESC_END => END,
                    ESC_ESC => ESC,
                    other => {
                        debug!(byte = %format!("0x{:02x}", other), "Invalid SLIP escape");
                        other
                    }
                };
                store(&mut frame, unescaped);
                continue;
            }

            match b {
                END if in_frame => {
                    trace!(bytes = frame.len(), frame = %hex::encode(&frame), "RX SLIP");
                    return Ok(Some(frame));
                }
                END => {
                    in_frame = true;
                    frame.clear();
                }
                _ if !in_frame => {}
                ESC => escaped = true,
                _ => store(&mut frame, b),
            }
        }

        trace!(attempts = self.max_attempts, "No SLIP frame");
        Ok(None)
    }
}
