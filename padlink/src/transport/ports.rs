//! Serial port discovery and validation.

use std::sync::OnceLock;

use regex::Regex;

use crate::{error::Result, tracing::prelude::*};

/// Port names worth scanning for a USB-attached board on this platform.
#[cfg(target_os = "linux")]
const CANDIDATE_PATTERN: &str = r"^/dev/tty(ACM|USB)\d+$";
#[cfg(target_os = "macos")]
const CANDIDATE_PATTERN: &str = r"^/dev/cu\.(usb|SLAB|wch)";
#[cfg(any(target_os = "freebsd", target_os = "openbsd"))]
const CANDIDATE_PATTERN: &str = r"^/dev/(cuaU|ttyU)";
#[cfg(windows)]
const CANDIDATE_PATTERN: &str = r"^COM\d+$";
#[cfg(not(any(
    target_os = "linux",
    target_os = "macos",
    target_os = "freebsd",
    target_os = "openbsd",
    windows
)))]
const CANDIDATE_PATTERN: &str = r".";

fn candidate_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(CANDIDATE_PATTERN).expect("valid candidate pattern"))
}

/// Whether `port` is safe to hand to the OS (or an external tool) as a port
/// identifier: non-empty, no `..`, only alphanumerics and `/ \ . _ -`.
pub fn check_port_format(port: &str) -> bool {
    !port.is_empty()
        && !port.contains("..")
        && port
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "/\\._-".contains(c))
}

/// Whether a validated port name looks like a USB serial device on this
/// platform.
pub fn is_candidate(port: &str) -> bool {
    check_port_format(port) && candidate_regex().is_match(port)
}

/// Serial ports that may have a board attached, in the order the OS lists
/// them.
pub fn candidate_ports() -> Result<Vec<String>> {
    let ports = tokio_serial::available_ports()?;

    let names: Vec<String> = ports
        .into_iter()
        .map(|info| info.port_name)
        .filter(|name| {
            let keep = is_candidate(name);
            if !keep {
                trace!(port = %name, "Skipping port");
            }
            keep
        })
        .collect();

    debug!(count = names.len(), ports = ?names, "Candidate serial ports");
    Ok(names)
}
