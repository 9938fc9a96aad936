//! Parameter encoders for the commands this engine issues (spec §6).
//! Each function returns the parameter bytes only; `codec::encode_command`
//! wraps them with the packet-type octet, opcode, and length the same way
//! `bo-tie`'s per-command `CommandParameter` implementations hand their
//! bytes to the HCI layer.

use crate::addr::DeviceAddress;
use byteorder::{LittleEndian, WriteBytesExt};
use std::io::Write;

pub fn reset() -> Vec<u8> {
    Vec::new()
}

pub fn set_event_mask(mask: u64) -> Vec<u8> {
    let mut buf = Vec::with_capacity(8);
    buf.write_u64::<LittleEndian>(mask).unwrap();
    buf
}

pub fn le_set_event_mask(mask: u64) -> Vec<u8> {
    set_event_mask(mask)
}

pub fn le_read_buffer_size() -> Vec<u8> {
    Vec::new()
}

pub fn le_read_local_supported_features() -> Vec<u8> {
    Vec::new()
}

pub fn le_read_maximum_data_length() -> Vec<u8> {
    Vec::new()
}

pub fn le_read_suggested_default_data_length() -> Vec<u8> {
    Vec::new()
}

pub fn read_bd_addr() -> Vec<u8> {
    Vec::new()
}

pub fn le_set_random_address(address: DeviceAddress) -> Vec<u8> {
    address.to_wire_bytes().to_vec()
}

pub struct AdvertisingParameters {
    pub interval_min: u16,
    pub interval_max: u16,
    pub advertising_type: u8,
    pub own_address_type: u8,
    pub peer_address_type: u8,
    pub peer_address: DeviceAddress,
    pub advertising_channel_map: u8,
    pub advertising_filter_policy: u8,
}

pub fn le_set_advertising_parameters(p: &AdvertisingParameters) -> Vec<u8> {
    let mut buf = Vec::with_capacity(15);
    buf.write_u16::<LittleEndian>(p.interval_min).unwrap();
    buf.write_u16::<LittleEndian>(p.interval_max).unwrap();
    buf.push(p.advertising_type);
    buf.push(p.own_address_type);
    buf.push(p.peer_address_type);
    buf.write_all(&p.peer_address.to_wire_bytes()).unwrap();
    buf.push(p.advertising_channel_map);
    buf.push(p.advertising_filter_policy);
    buf
}

pub fn le_set_advertise_enable(enable: bool) -> Vec<u8> {
    vec![enable as u8]
}

pub struct ConnectionParameters {
    pub le_scan_interval: u16,
    pub le_scan_window: u16,
    pub initiator_filter_policy: u8,
    pub peer_address_type: u8,
    pub peer_address: DeviceAddress,
    pub own_address_type: u8,
    pub connection_interval_min: u16,
    pub connection_interval_max: u16,
    pub max_latency: u16,
    pub supervision_timeout: u16,
    pub min_ce_length: u16,
    pub max_ce_length: u16,
}

pub fn le_create_connection(p: &ConnectionParameters) -> Vec<u8> {
    let mut buf = Vec::with_capacity(25);
    buf.write_u16::<LittleEndian>(p.le_scan_interval).unwrap();
    buf.write_u16::<LittleEndian>(p.le_scan_window).unwrap();
    buf.push(p.initiator_filter_policy);
    buf.push(p.peer_address_type);
    buf.write_all(&p.peer_address.to_wire_bytes()).unwrap();
    buf.push(p.own_address_type);
    buf.write_u16::<LittleEndian>(p.connection_interval_min).unwrap();
    buf.write_u16::<LittleEndian>(p.connection_interval_max).unwrap();
    buf.write_u16::<LittleEndian>(p.max_latency).unwrap();
    buf.write_u16::<LittleEndian>(p.supervision_timeout).unwrap();
    buf.write_u16::<LittleEndian>(p.min_ce_length).unwrap();
    buf.write_u16::<LittleEndian>(p.max_ce_length).unwrap();
    buf
}

pub fn le_set_data_length(connection_handle: u16, tx_octets: u16, tx_time: u16) -> Vec<u8> {
    let mut buf = Vec::with_capacity(6);
    buf.write_u16::<LittleEndian>(connection_handle).unwrap();
    buf.write_u16::<LittleEndian>(tx_octets).unwrap();
    buf.write_u16::<LittleEndian>(tx_time).unwrap();
    buf
}

/// PHY values: 1=1M, 2=2M, 3=Coded (spec §4.6).
pub fn le_set_phy(connection_handle: u16, all_phys: u8, tx_phys: u8, rx_phys: u8, phy_options: u16) -> Vec<u8> {
    let mut buf = Vec::with_capacity(7);
    buf.write_u16::<LittleEndian>(connection_handle).unwrap();
    buf.push(all_phys);
    buf.push(tx_phys);
    buf.push(rx_phys);
    buf.write_u16::<LittleEndian>(phy_options).unwrap();
    buf
}

pub fn le_enable_encryption(connection_handle: u16, random_number: u64, encrypted_diversifier: u16, ltk: &[u8; 16]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(28);
    buf.write_u16::<LittleEndian>(connection_handle).unwrap();
    buf.write_u64::<LittleEndian>(random_number).unwrap();
    buf.write_u16::<LittleEndian>(encrypted_diversifier).unwrap();
    buf.write_all(ltk).unwrap();
    buf
}

pub fn le_ltk_request_reply(connection_handle: u16, ltk: &[u8; 16]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(18);
    buf.write_u16::<LittleEndian>(connection_handle).unwrap();
    buf.write_all(ltk).unwrap();
    buf
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_event_mask_is_little_endian() {
        let buf = set_event_mask(0x0000_0007_FFFF_FFFFu64);
        assert_eq!(buf, 0x0000_0007_FFFF_FFFFu64.to_le_bytes());
    }

    #[test]
    fn le_set_random_address_encodes_reversed_bytes() {
        let addr = DeviceAddress([0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0xff]);
        let buf = le_set_random_address(addr);
        assert_eq!(buf, vec![0xff, 0xee, 0xdd, 0xcc, 0xbb, 0xaa]);
    }

    #[test]
    fn le_create_connection_parameter_length() {
        let p = ConnectionParameters {
            le_scan_interval: 0x10,
            le_scan_window: 0x10,
            initiator_filter_policy: 0,
            peer_address_type: 0,
            peer_address: DeviceAddress::ZERO,
            own_address_type: 1,
            connection_interval_min: 0x10,
            connection_interval_max: 0x10,
            max_latency: 0,
            supervision_timeout: 0x100,
            min_ce_length: 0,
            max_ce_length: 0,
        };
        assert_eq!(le_create_connection(&p).len(), 25);
    }

    #[test]
    fn le_set_phy_places_phys_in_correct_slots() {
        let buf = le_set_phy(0x0040, 0, 0b010, 0b010, 0);
        assert_eq!(buf[3], 0b010); // tx_phys
        assert_eq!(buf[4], 0b010); // rx_phys
    }
}
