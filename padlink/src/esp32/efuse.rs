//! Factory MAC words in the eFuse block.

use crate::mac::MacAddress;

/// Low word: the last four octets, most significant first
pub const EFUSE_MAC_LOW: u32 = 0x3FF5_A004;

/// High word: the first two octets in bits 15..0
pub const EFUSE_MAC_HIGH: u32 = 0x3FF5_A008;

/// Combine the two eFuse words into the factory MAC.
pub fn assemble_mac(low: u32, high: u32) -> MacAddress {
    let [_, _, h1, h0] = high.to_be_bytes();
    let [l3, l2, l1, l0] = low.to_be_bytes();
    MacAddress::new([h1, h0, l3, l2, l1, l0])
}
