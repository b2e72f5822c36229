//! USB session with a DualShock 4.
//!
//! A [`Ds4Session`] owns the device handle from the moment the controller is
//! found until it is dropped. The HID interface is claimed on open and
//! released exactly once on drop, before the handle itself is closed.

use std::time::Duration;

use rusb::UsbContext;

use super::{
    detach::{DriverDetach, PlatformDetach},
    ControlTransport, Generation, Pairing, DS4_VID, HID_INTERFACE,
};
use crate::{
    error::{Error, Result},
    mac::MacAddress,
    tracing::prelude::*,
};

/// An open USB device: control transfers plus interface ownership.
pub trait UsbDevice: ControlTransport {
    fn kernel_driver_active(&mut self, interface: u8) -> Result<bool>;
    fn detach_kernel_driver(&mut self, interface: u8) -> Result<()>;
    fn claim_interface(&mut self, interface: u8) -> Result<()>;
    fn release_interface(&mut self, interface: u8) -> Result<()>;
}

/// Something that can open a USB device by vendor and product ID.
pub trait UsbBus {
    type Device: UsbDevice;

    fn open(&self, vid: u16, pid: u16) -> Option<Self::Device>;
}

impl<C: UsbContext> ControlTransport for rusb::DeviceHandle<C> {
    fn read_control(
        &mut self,
        request_type: u8,
        request: u8,
        value: u16,
        index: u16,
        buf: &mut [u8],
        timeout: Duration,
    ) -> Result<usize> {
        Ok(rusb::DeviceHandle::read_control(
            self,
            request_type,
            request,
            value,
            index,
            buf,
            timeout,
        )?)
    }

    fn write_control(
        &mut self,
        request_type: u8,
        request: u8,
        value: u16,
        index: u16,
        buf: &[u8],
        timeout: Duration,
    ) -> Result<usize> {
        Ok(rusb::DeviceHandle::write_control(
            self,
            request_type,
            request,
            value,
            index,
            buf,
            timeout,
        )?)
    }
}

impl<C: UsbContext> UsbDevice for rusb::DeviceHandle<C> {
    fn kernel_driver_active(&mut self, interface: u8) -> Result<bool> {
        match rusb::DeviceHandle::kernel_driver_active(self, interface) {
            Ok(active) => Ok(active),
            // libusb reports NotSupported where there is no kernel driver concept
            Err(rusb::Error::NotSupported) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    fn detach_kernel_driver(&mut self, interface: u8) -> Result<()> {
        Ok(rusb::DeviceHandle::detach_kernel_driver(self, interface)?)
    }

    fn claim_interface(&mut self, interface: u8) -> Result<()> {
        Ok(rusb::DeviceHandle::claim_interface(self, interface)?)
    }

    fn release_interface(&mut self, interface: u8) -> Result<()> {
        Ok(rusb::DeviceHandle::release_interface(self, interface)?)
    }
}

impl UsbBus for rusb::Context {
    type Device = rusb::DeviceHandle<rusb::Context>;

    fn open(&self, vid: u16, pid: u16) -> Option<Self::Device> {
        self.open_device_with_vid_pid(vid, pid)
    }
}

/// An exclusive session with one controller.
pub struct Ds4Session<D: UsbDevice> {
    device: D,
    generation: Generation,
    claimed: bool,
}

impl Ds4Session<rusb::DeviceHandle<rusb::Context>> {
    /// Open the first DualShock 4 found on the system.
    pub fn open() -> Result<Self> {
        let context = rusb::Context::new()?;
        Self::open_with(&context, &PlatformDetach::default())
    }
}

impl<D: UsbDevice> Ds4Session<D> {
    /// Open a controller through `bus`, trying each generation's product
    /// ID in turn, then take the HID interface.
    pub fn open_with<P>(bus: &P, detach: &impl DriverDetach) -> Result<Self>
    where
        P: UsbBus<Device = D>,
    {
        let (device, generation) = Generation::OPEN_ORDER
            .iter()
            .find_map(|&generation| {
                trace!(
                    vid = %format!("{:04x}", DS4_VID),
                    pid = %format!("{:04x}", generation.product_id()),
                    "Trying controller"
                );
                bus
                    .open(DS4_VID, generation.product_id())
                    .map(|device| (device, generation))
            })
            .ok_or_else(|| {
                Error::DeviceNotFound(
                    "no DualShock 4 on USB (Linux: check permissions; \
                     Windows: install the WinUSB driver)"
                        .to_string(),
                )
            })?;

        info!(%generation, "Controller found");

        let mut session = Self {
            device,
            generation,
            claimed: false,
        };

        if let Err(e) = detach.detach_if_needed(&mut session.device, HID_INTERFACE) {
            warn!(error = %e, "Failed to detach kernel driver");
        }
        session.device.claim_interface(HID_INTERFACE)?;
        session.claimed = true;

        Ok(session)
    }

    pub fn generation(&self) -> Generation {
        self.generation
    }

    /// Read the host address the controller is paired with.
    pub fn read_mac(&mut self) -> Result<MacAddress> {
        super::read_mac(&mut self.device)
    }

    /// Point the controller at a new host address.
    pub fn write_mac(&mut self, mac: MacAddress) -> Result<()> {
        super::write_mac(&mut self.device, mac)
    }

    /// Write a new host address and read it back.
    pub fn pair(&mut self, mac: MacAddress) -> Result<Pairing> {
        super::pair(&mut self.device, mac)
    }

    /// Release the interface and close the device.
    pub fn close(self) {
        drop(self)
    }

    fn release(&mut self) {
        if !self.claimed {
            return;
        }
        self.claimed = false;
        if let Err(e) = self.device.release_interface(HID_INTERFACE) {
            debug!(error = %e, "Failed to release interface");
        }
    }
}

impl<D: UsbDevice> Drop for Ds4Session<D> {
    fn drop(&mut self) {
        // The device handle closes when the field drops, after this
        self.release();
    }
}
