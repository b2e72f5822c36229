//! MAC via the external `esptool` Python module.

use std::process::{Command, Stdio};

use crate::{
    error::{Error, Result},
    mac::MacAddress,
    tracing::prelude::*,
    transport::check_port_format,
};

const MAC_PREFIX: &str = "MAC: ";

/// Runs `<python> -m esptool ...`.
#[derive(Debug, Clone)]
pub struct Esptool {
    python: String,
}

impl Esptool {
    pub fn new(python: impl Into<String>) -> Self {
        Self {
            python: python.into(),
        }
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.python);
        cmd.args(["-m", "esptool"]).stdin(Stdio::null());
        cmd
    }

    /// Whether the module can be run at all.
    pub fn check_installed(&self) -> bool {
        let status = self
            .command()
            .arg("version")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status();

        match status {
            Ok(status) => status.success(),
            Err(e) => {
                debug!(python = %self.python, error = %e, "Could not run esptool");
                false
            }
        }
    }

    /// Read the factory MAC of the chip on `port`.
    pub fn read_mac(&self, port: &str) -> Result<MacAddress> {
        if !check_port_format(port) {
            return Err(Error::InvalidPort(port.to_string()));
        }

        debug!(python = %self.python, port, "Running esptool read-mac");
        let output = self
            .command()
            .args(["--port", port, "read-mac"])
            .stderr(Stdio::null())
            .output()
            .map_err(|e| Error::ExternalTool(format!("{}: {e}", self.python)))?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        match parse_read_mac_output(&stdout) {
            Some(text) => MacAddress::parse(text),
            None if output.status.success() => Err(Error::ExternalTool(
                "esptool output has no MAC line".to_string(),
            )),
            None => Err(Error::DeviceNotFound(format!(
                "{port}: esptool exited with {}",
                output.status
            ))),
        }
    }
}

/// The address from the first `MAC: ` line.
fn parse_read_mac_output(stdout: &str) -> Option<&str> {
    stdout
        .lines()
        .find_map(|line| line.strip_prefix(MAC_PREFIX))
        .map(str::trim)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "\
esptool.py v4.7.0
Serial port /dev/ttyUSB0
Connecting....
Chip is ESP32-D0WD-V3 (revision v3.0)
Features: WiFi, BT, Dual Core, 240MHz
MAC: 24:0a:c4:12:34:56
Uploading stub...
MAC: ff:ff:ff:ff:ff:ff
Hard resetting via RTS pin...
";

    #[test]
    fn first_mac_line_wins() {
        assert_eq!(parse_read_mac_output(SAMPLE), Some("24:0a:c4:12:34:56"));
    }

    #[test]
    fn trims_whitespace_and_crlf() {
        assert_eq!(
            parse_read_mac_output("MAC:    aa:bb:cc:dd:ee:ff\r\n"),
            Some("aa:bb:cc:dd:ee:ff")
        );
    }

    #[test]
    fn prefix_must_start_line() {
        assert_eq!(parse_read_mac_output("Base MAC: 00:11:22:33:44:55\n"), None);
        assert_eq!(parse_read_mac_output(""), None);
    }

    #[test]
    fn output_parses_as_canonical_mac() {
        let text = parse_read_mac_output(SAMPLE).unwrap();
        assert_eq!(MacAddress::parse(text).unwrap().to_string(), "24:0A:C4:12:34:56");
    }

    #[test]
    fn rejects_port_before_running() {
        let tool = Esptool::new("padlink-no-such-python");
        assert!(matches!(
            tool.read_mac("COM1 & del *"),
            Err(Error::InvalidPort(_))
        ));
    }

    #[test]
    fn missing_interpreter_is_not_installed() {
        let tool = Esptool::new("padlink-no-such-python");
        assert!(!tool.check_installed());
        assert!(matches!(
            tool.read_mac("/dev/ttyUSB0"),
            Err(Error::ExternalTool(_))
        ));
    }
}
