//! Hardware (MAC) addresses and their canonical text form.

use std::{fmt, str::FromStr};

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{Error, Result};

/// Number of octets in a hardware address.
pub const MAC_LEN: usize = 6;

/// A 6-byte hardware address.
///
/// Displays as six uppercase hex pairs joined by `:`, e.g.
/// `AA:BB:CC:DD:EE:FF`. Parsing accepts either case.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct MacAddress([u8; MAC_LEN]);

impl MacAddress {
    pub const fn new(octets: [u8; MAC_LEN]) -> Self {
        Self(octets)
    }

    pub const fn octets(&self) -> [u8; MAC_LEN] {
        self.0
    }

    /// The same address with its octets in reverse order.
    ///
    /// The controller stores the paired host address least significant
    /// octet first in some of its reports.
    pub fn reversed(&self) -> Self {
        let mut octets = self.0;
        octets.reverse();
        Self(octets)
    }

    /// Parse the canonical `AA:BB:CC:DD:EE:FF` form.
    pub fn parse(text: &str) -> Result<Self> {
        let invalid = || Error::InvalidFormat(text.to_string());

        let mut octets = [0u8; MAC_LEN];
        let mut parts = text.split(':');
        for octet in octets.iter_mut() {
            let part = parts.next().ok_or_else(invalid)?;
            if part.len() != 2 || !part.bytes().all(|b| b.is_ascii_hexdigit()) {
                return Err(invalid());
            }
            *octet = u8::from_str_radix(part, 16).map_err(|_| invalid())?;
        }

        if parts.next().is_some() {
            return Err(invalid());
        }

        Ok(Self(octets))
    }
}

impl From<[u8; MAC_LEN]> for MacAddress {
    fn from(octets: [u8; MAC_LEN]) -> Self {
        Self(octets)
    }
}

impl From<MacAddress> for [u8; MAC_LEN] {
    fn from(mac: MacAddress) -> Self {
        mac.0
    }
}

impl FromStr for MacAddress {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl fmt::Display for MacAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d, e, g] = self.0;
        write!(
            f,
            "{:02X}:{:02X}:{:02X}:{:02X}:{:02X}:{:02X}",
            a, b, c, d, e, g
        )
    }
}

impl Serialize for MacAddress {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for MacAddress {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        Self::parse(&text).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case("AA:BB:CC:DD:EE:FF", "AA:BB:CC:DD:EE:FF"; "uppercase")]
    #[test_case("aa:bb:cc:dd:ee:ff", "AA:BB:CC:DD:EE:FF"; "lowercase")]
    #[test_case("0a:B1:c2:D3:e4:F5", "0A:B1:C2:D3:E4:F5"; "mixed case")]
    #[test_case("00:00:00:00:00:00", "00:00:00:00:00:00"; "all zero")]
    fn canonical_form(input: &str, expected: &str) {
        let mac = MacAddress::parse(input).unwrap();
        assert_eq!(mac.to_string(), expected);
    }

    #[test_case(""; "empty")]
    #[test_case("AA:BB:CC:DD:EE"; "five octets")]
    #[test_case("AA:BB:CC:DD:EE:FF:00"; "seven octets")]
    #[test_case("AA-BB-CC-DD-EE-FF"; "dash separator")]
    #[test_case("AA:BB:CC:DD:EE:FG"; "non hex digit")]
    #[test_case("A:BB:CC:DD:EE:FF"; "short octet")]
    #[test_case("AAA:BB:CC:DD:EE:FF"; "long octet")]
    #[test_case("AA:BB:CC:DD:EE:FF:"; "trailing separator")]
    #[test_case(" AA:BB:CC:DD:EE:FF"; "leading space")]
    #[test_case("+A:BB:CC:DD:EE:FF"; "sign character")]
    fn rejects_malformed(input: &str) {
        assert!(matches!(
            MacAddress::parse(input),
            Err(Error::InvalidFormat(_))
        ));
    }

    #[test]
    fn display_zero_pads() {
        let mac = MacAddress::new([0x01, 0x02, 0x03, 0x0a, 0x0b, 0x00]);
        assert_eq!(mac.to_string(), "01:02:03:0A:0B:00");
    }

    #[test]
    fn reversed_flips_octet_order() {
        let mac = MacAddress::new([1, 2, 3, 4, 5, 6]);
        assert_eq!(mac.reversed().octets(), [6, 5, 4, 3, 2, 1]);
        assert_eq!(mac.reversed().reversed(), mac);
    }

    #[test]
    fn from_str_matches_parse() {
        let mac: MacAddress = "de:ad:be:ef:00:01".parse().unwrap();
        assert_eq!(mac.octets(), [0xde, 0xad, 0xbe, 0xef, 0x00, 0x01]);
    }

    #[test]
    fn serde_uses_text_form() {
        let mac = MacAddress::new([0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0xff]);
        let json = serde_json::to_string(&mac).unwrap();
        assert_eq!(json, "\"AA:BB:CC:DD:EE:FF\"");
        let back: MacAddress = serde_json::from_str("\"aa:bb:cc:dd:ee:ff\"").unwrap();
        assert_eq!(back, mac);
        assert!(serde_json::from_str::<MacAddress>("\"nope\"").is_err());
    }
}
