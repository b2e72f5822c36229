//! DualShock 4 paired-host address over USB HID feature reports.
//!
//! The controller remembers the Bluetooth address of the host it pairs with.
//! Over USB that address is exposed through vendor feature reports, read with
//! GET_REPORT and written with SET_REPORT control transfers. The two hardware
//! generations use different reports with opposite byte orders:
//!
//! - report 0x12 (both generations): at least 16 bytes, host address at
//!   offset 10, least significant octet first
//! - report 0x05 (fallback): at least 7 bytes, host address at offset 1, in
//!   display order
//!
//! Writing uses report 0x13 with the address least significant octet first.

use std::time::Duration;

use strum::Display;

use crate::{
    error::{Error, Result},
    mac::{MacAddress, MAC_LEN},
    tracing::prelude::*,
};

pub mod detach;
pub mod usb;

pub use usb::{Ds4Session, UsbDevice, UsbBus};

/// Sony USB vendor ID
pub const DS4_VID: u16 = 0x054C;

/// USB timeout for every control transfer
pub const USB_TIMEOUT: Duration = Duration::from_millis(5000);

/// The interface carrying the HID reports
pub const HID_INTERFACE: u8 = 0;

/// HID class requests (HID 1.11, section 7.2)
pub mod request {
    pub const GET_REPORT: u8 = 0x01;
    pub const SET_REPORT: u8 = 0x09;
}

/// bmRequestType for class requests addressed to an interface
pub mod request_type {
    pub const DIR_IN: u8 = 0x80;
    pub const DIR_OUT: u8 = 0x00;
    pub const TYPE_CLASS: u8 = 0x20;
    pub const RECIP_INTERFACE: u8 = 0x01;

    pub const HID_GET: u8 = DIR_IN | TYPE_CLASS | RECIP_INTERFACE;
    pub const HID_SET: u8 = DIR_OUT | TYPE_CLASS | RECIP_INTERFACE;
}

/// HID report type carried in the high byte of wValue
pub const REPORT_TYPE_FEATURE: u8 = 0x03;

/// Feature report IDs
pub mod report_id {
    /// Pairing info, host address reversed at offset 10
    pub const PAIRING: u8 = 0x12;
    /// Standard report, host address in order at offset 1
    pub const STANDARD: u8 = 0x05;
    /// Set paired host
    pub const WRITE: u8 = 0x13;
}

const READ_BUFFER_LEN: usize = 65;
const WRITE_BUFFER_LEN: usize = 32;

const PAIRING_MAC_OFFSET: usize = 10;
const STANDARD_MAC_OFFSET: usize = 1;

/// Controller hardware generations, by USB product ID.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum Generation {
    /// CUH-ZCT1
    #[strum(to_string = "DualShock 4 (gen 1)")]
    Gen1,
    /// CUH-ZCT2
    #[strum(to_string = "DualShock 4 (gen 2)")]
    Gen2,
}

impl Generation {
    /// Order tried when opening a controller.
    pub const OPEN_ORDER: [Generation; 2] = [Generation::Gen1, Generation::Gen2];

    pub const fn product_id(self) -> u16 {
        match self {
            Generation::Gen1 => 0x05C4,
            Generation::Gen2 => 0x09CC,
        }
    }
}

/// wValue for a feature report request.
pub const fn feature_report_value(report_id: u8) -> u16 {
    ((REPORT_TYPE_FEATURE as u16) << 8) | report_id as u16
}

/// The control-transfer half of a USB device handle.
///
/// Both calls return the number of bytes transferred.
pub trait ControlTransport {
    fn read_control(
        &mut self,
        request_type: u8,
        request: u8,
        value: u16,
        index: u16,
        buf: &mut [u8],
        timeout: Duration,
    ) -> Result<usize>;

    fn write_control(
        &mut self,
        request_type: u8,
        request: u8,
        value: u16,
        index: u16,
        buf: &[u8],
        timeout: Duration,
    ) -> Result<usize>;
}

fn get_feature_report(
    dev: &mut impl ControlTransport,
    report_id: u8,
    buf: &mut [u8],
) -> usize {
    buf.fill(0);
    let result = dev.read_control(
        request_type::HID_GET,
        request::GET_REPORT,
        feature_report_value(report_id),
        0,
        buf,
        USB_TIMEOUT,
    );

    match result {
        Ok(len) => {
            trace!(
                report = report_id,
                len,
                data = %hex::encode(&buf[..len.min(buf.len())]),
                "RX feature report"
            );
            len
        }
        Err(e) => {
            debug!(report = report_id, error = %e, "GET_REPORT failed");
            0
        }
    }
}

fn mac_at(buf: &[u8], offset: usize) -> MacAddress {
    let mut octets = [0u8; MAC_LEN];
    octets.copy_from_slice(&buf[offset..offset + MAC_LEN]);
    MacAddress::new(octets)
}

/// Read the host address the controller is paired with.
pub fn read_mac(dev: &mut impl ControlTransport) -> Result<MacAddress> {
    let mut buf = [0u8; READ_BUFFER_LEN];

    let len = get_feature_report(dev, report_id::PAIRING, &mut buf);
    if len > PAIRING_MAC_OFFSET + MAC_LEN - 1 {
        let mac = mac_at(&buf, PAIRING_MAC_OFFSET).reversed();
        debug!(%mac, "Read paired host from pairing report");
        return Ok(mac);
    }

    let len = get_feature_report(dev, report_id::STANDARD, &mut buf);
    if len > STANDARD_MAC_OFFSET + MAC_LEN - 1 {
        let mac = mac_at(&buf, STANDARD_MAC_OFFSET);
        debug!(%mac, "Read paired host from standard report");
        return Ok(mac);
    }

    Err(Error::TransferFailed(format!(
        "no feature report carried a host address (last length {len})"
    )))
}

/// Point the controller at a new host address.
///
/// Success only means the transfer went through; the controller is not read
/// back here.
pub fn write_mac(dev: &mut impl ControlTransport, mac: MacAddress) -> Result<()> {
    let mut buf = [0u8; WRITE_BUFFER_LEN];
    buf[0] = report_id::WRITE;
    buf[1..1 + MAC_LEN].copy_from_slice(&mac.reversed().octets());

    trace!(data = %hex::encode(buf), "TX feature report");

    dev.write_control(
        request_type::HID_SET,
        request::SET_REPORT,
        feature_report_value(report_id::WRITE),
        0,
        &buf,
        USB_TIMEOUT,
    )
    .map_err(|e| Error::TransferFailed(format!("SET_REPORT 0x13: {e}")))?;

    debug!(%mac, "Wrote paired host");
    Ok(())
}

/// Result of writing a host address and reading it back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pairing {
    pub previous: Option<MacAddress>,
    pub written: MacAddress,
    pub readback: MacAddress,
}

impl Pairing {
    /// Whether the controller now reports the address that was written.
    pub fn verified(&self) -> bool {
        self.written == self.readback
    }
}

/// Write `mac` as the paired host, then read the controller back.
///
/// A failed read before the write is tolerated, since a controller that was
/// never paired may not answer; the read after the write is not.
pub fn pair(dev: &mut impl ControlTransport, mac: MacAddress) -> Result<Pairing> {
    let previous = match read_mac(dev) {
        Ok(previous) => Some(previous),
        Err(e) => {
            debug!(error = %e, "No previous host address");
            None
        }
    };

    write_mac(dev, mac)?;
    let readback = read_mac(dev)?;

    let pairing = Pairing {
        previous,
        written: mac,
        readback,
    };
    if !pairing.verified() {
        warn!(written = %mac, %readback, "Controller did not keep the new host address");
    }
    Ok(pairing)
}
