//! Where an ESP32 MAC comes from.
//!
//! The native bootloader client and the esptool wrapper both answer the same
//! question for a port, so callers scanning ports pick one through
//! [`source_for`] and never care which.

use crate::{
    config::{Backend, Config},
    error::{Error, Result},
    esp32::{self, esptool::Esptool},
    mac::MacAddress,
    tracing::prelude::*,
    transport,
};

pub trait MacSource {
    fn read_mac(&self, port: &str) -> Result<MacAddress>;
}

/// Speaks the ROM bootloader protocol on the port directly.
pub struct Native {
    config: Config,
}

impl Native {
    pub fn new(config: Config) -> Self {
        Self { config }
    }
}

impl MacSource for Native {
    fn read_mac(&self, port: &str) -> Result<MacAddress> {
        esp32::read_mac_from_port(port, &self.config)
    }
}

impl MacSource for Esptool {
    fn read_mac(&self, port: &str) -> Result<MacAddress> {
        Esptool::read_mac(self, port)
    }
}

/// The backend the configuration asks for.
pub fn source_for(config: &Config) -> Box<dyn MacSource> {
    match config.backend {
        Backend::Native => Box::new(Native::new(config.clone())),
        Backend::Esptool => Box::new(Esptool::new(config.esptool_python.clone())),
    }
}

/// Ports to scan: the configured list, or discovery.
pub fn ports_to_scan(config: &Config) -> Result<Vec<String>> {
    match &config.ports {
        Some(ports) => Ok(ports.clone()),
        None => transport::candidate_ports(),
    }
}

/// Try each port in turn and return the first that yields a MAC.
pub fn find_any_mac<S, P>(source: &S, ports: P) -> Result<(String, MacAddress)>
where
    S: MacSource + ?Sized,
    P: IntoIterator,
    P::Item: AsRef<str>,
{
    let mut tried = 0;
    for port in ports {
        let port = port.as_ref();
        tried += 1;
        match source.read_mac(port) {
            Ok(mac) => {
                debug!(port, %mac, "Found ESP32");
                return Ok((port.to_string(), mac));
            }
            Err(e) => debug!(port, error = %e, "No ESP32 on port"),
        }
    }

    Err(Error::DeviceNotFound(format!(
        "no ESP32 answered on {tried} candidate port(s)"
    )))
}
