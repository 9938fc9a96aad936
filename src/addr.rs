//! `ControllerAddress` (spec §3) and the static-random address generator
//! (spec §4.1), grounded in
//! `original_source/tools/hci_throughput/hci.py`'s `gen_static_rand_addr`
//! and `cmd_addr_to_ba`/`ba_addr_to_str` byte-reversal helpers, and in
//! `bo-tie`'s `BluetoothDeviceAddress` newtype pattern (`src/lib.rs`).

use rand::RngCore;
use std::fmt;

/// A six-byte Bluetooth device address, stored in host (non-reversed)
/// byte order: `bytes[0]` is the first octet printed in `AA:BB:...` form.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct DeviceAddress(pub [u8; 6]);

impl DeviceAddress {
    pub const ZERO: DeviceAddress = DeviceAddress([0; 6]);

    /// Decode the six little-endian-on-the-wire bytes HCI uses for
    /// addresses into host order.
    pub fn from_wire_bytes(wire: &[u8; 6]) -> Self {
        let mut host = *wire;
        host.reverse();
        DeviceAddress(host)
    }

    /// Encode into the reversed order HCI puts on the wire.
    pub fn to_wire_bytes(self) -> [u8; 6] {
        let mut wire = self.0;
        wire.reverse();
        wire
    }
}

impl fmt::Display for DeviceAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let b = self.0;
        write!(
            f,
            "{:02X}:{:02X}:{:02X}:{:02X}:{:02X}:{:02X}",
            b[0], b[1], b[2], b[3], b[4], b[5]
        )
    }
}

impl fmt::Debug for DeviceAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum AddressType {
    Public,
    StaticRandom,
}

impl AddressType {
    /// The `own_address_type`/`peer_address_type` wire encoding (0/1).
    pub fn as_wire(self) -> u8 {
        match self {
            AddressType::Public => 0,
            AddressType::StaticRandom => 1,
        }
    }
}

/// `ControllerAddress`: created once during startup, never mutated
/// thereafter (spec §3 invariant).
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct ControllerAddress {
    pub address: DeviceAddress,
    pub kind: AddressType,
}

/// Generate a 48-bit static random address: top two bits set, and the
/// remaining 46 bits neither all-zero nor all-one (spec §3, §4.1, §8).
pub fn generate_static_random_address<R: RngCore>(rng: &mut R) -> DeviceAddress {
    loop {
        let mut bytes = [0u8; 6];
        rng.fill_bytes(&mut bytes);

        // Top two bits of the most-significant byte (bytes[5] in host
        // order, matching the wire's big-end-first string rendering) set
        // to 1 to mark a static address.
        bytes[5] |= 0b1100_0000;

        if is_valid_static_random_infix(&bytes) {
            return DeviceAddress(bytes);
        }
    }
}

fn is_valid_static_random_infix(bytes: &[u8; 6]) -> bool {
    // The remaining 46 bits (everything but the top two fixed bits) must
    // not be all-zero or all-one.
    let mut masked = *bytes;
    masked[5] &= 0b0011_1111;

    let all_zero = masked.iter().all(|&b| b == 0);
    let all_one = masked[0..5].iter().all(|&b| b == 0xff) && masked[5] == 0b0011_1111;

    !all_zero && !all_one
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    #[test]
    fn wire_roundtrip_reverses_bytes() {
        let addr = DeviceAddress([0x01, 0x02, 0x03, 0x04, 0x05, 0x06]);
        let wire = addr.to_wire_bytes();
        assert_eq!(wire, [0x06, 0x05, 0x04, 0x03, 0x02, 0x01]);
        assert_eq!(DeviceAddress::from_wire_bytes(&wire), addr);
    }

    #[test]
    fn display_format() {
        let addr = DeviceAddress([0xaa, 0xbb, 0xcc, 0x00, 0x11, 0x22]);
        assert_eq!(addr.to_string(), "AA:BB:CC:00:11:22");
    }

    #[test]
    fn generator_never_all_zero_or_all_one_infix() {
        let mut rng = StdRng::seed_from_u64(42);
        for _ in 0..2000 {
            let addr = generate_static_random_address(&mut rng);
            assert_eq!(addr.0[5] & 0b1100_0000, 0b1100_0000, "top two bits must be set");
            assert!(is_valid_static_random_infix(&addr.0));
        }
    }

    #[test]
    fn rejects_all_zero_infix() {
        assert!(!is_valid_static_random_infix(&[0x00, 0x00, 0x00, 0x00, 0x00, 0b1100_0000]));
    }

    #[test]
    fn rejects_all_one_infix() {
        assert!(!is_valid_static_random_infix(&[0xff, 0xff, 0xff, 0xff, 0xff, 0xff]));
    }
}
