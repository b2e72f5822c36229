//! Pair a DualShock 4 with an ESP32.
//!
//! The controller stores the Bluetooth address of its host; the ESP32 carries
//! a factory MAC in eFuse. This crate reads the latter over the chip's ROM
//! bootloader (or through esptool) and writes it into the former over USB.

pub mod config;
pub mod ds4;
pub mod error;
pub mod esp32;
pub mod mac;
pub mod retry;
pub mod source;
pub mod tracing;
pub mod transport;

pub use error::{Error, Result};
pub use mac::MacAddress;
