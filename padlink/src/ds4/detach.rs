//! Releasing an operating system driver's claim on the HID interface.
//!
//! On Linux the kernel's hid driver binds the controller as soon as it is
//! plugged in, and the interface cannot be claimed until it is detached.
//! Other platforms have no such claim to release (Windows needs a WinUSB
//! driver installed instead), so the capability is selected per target via
//! [`PlatformDetach`].

use super::usb::UsbDevice;
use crate::{error::Result, tracing::prelude::*};

/// Release any OS-owned claim on an interface before taking it.
pub trait DriverDetach {
    fn detach_if_needed<D: UsbDevice>(&self, device: &mut D, interface: u8) -> Result<()>;
}

/// Detach an active kernel driver.
#[derive(Debug, Default, Clone, Copy)]
pub struct KernelDriverDetach;

impl DriverDetach for KernelDriverDetach {
    fn detach_if_needed<D: UsbDevice>(&self, device: &mut D, interface: u8) -> Result<()> {
        if device.kernel_driver_active(interface)? {
            debug!(interface, "Detaching kernel driver");
            device.detach_kernel_driver(interface)?;
        }
        Ok(())
    }
}

/// Nothing to release.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoDetach;

impl DriverDetach for NoDetach {
    fn detach_if_needed<D: UsbDevice>(&self, _device: &mut D, _interface: u8) -> Result<()> {
        Ok(())
    }
}

#[cfg(target_os = "linux")]
pub type PlatformDetach = KernelDriverDetach;

#[cfg(not(target_os = "linux"))]
pub type PlatformDetach = NoDetach;
