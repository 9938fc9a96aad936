//! Typed HCI/LE-Meta events (spec §4.1, §9 Design Notes). The source's
//! base-event/subevent inheritance hierarchy collapses to the two tagged
//! enums below, the same flattening `bo-tie`'s own `hci/events.rs` applies
//! to its `Events`/`EventsData` split — except here everything this
//! engine cares about lives in one `Event` variant set.

use super::codec::RawEvent;
use crate::addr::DeviceAddress;
use crate::error::{Error, Result};
use byteorder::{ByteOrder, LittleEndian};

pub const EVT_DISCONNECTION_COMPLETE: u8 = 0x05;
pub const EVT_ENCRYPTION_CHANGE: u8 = 0x08;
pub const EVT_COMMAND_COMPLETE: u8 = 0x0e;
pub const EVT_COMMAND_STATUS: u8 = 0x0f;
pub const EVT_NUMBER_OF_COMPLETED_PACKETS: u8 = 0x13;
pub const EVT_LE_META: u8 = 0x3e;

pub const SUBEVT_LTK_REQUEST: u8 = 0x05;
pub const SUBEVT_DATA_LENGTH_CHANGE: u8 = 0x07;
pub const SUBEVT_ENHANCED_CONNECTION_COMPLETE: u8 = 0x0a;
pub const SUBEVT_PHY_UPDATE_COMPLETE: u8 = 0x0c;
pub const SUBEVT_CHANNEL_SELECTION_ALGORITHM: u8 = 0x14;

/// Reasons that make Disconnection-Complete fatal (spec §4.4, §4.8).
pub const REASON_CONNECTION_TIMEOUT: u8 = 0x08;
pub const REASON_CONNECTION_FAILED_TO_BE_ESTABLISHED: u8 = 0x3e;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandComplete {
    pub num_hci_command_packets: u8,
    pub opcode: u16,
    pub return_parameters: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandStatus {
    pub status: u8,
    pub num_hci_command_packets: u8,
    pub opcode: u16,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DisconnectionComplete {
    pub status: u8,
    pub connection_handle: u16,
    pub reason: u8,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptionChange {
    pub status: u8,
    pub connection_handle: u16,
    pub encryption_enabled: u8,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NumberOfCompletedPackets {
    pub connection_handle: u16,
    pub num_completed: u16,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnhancedConnectionComplete {
    pub status: u8,
    pub connection_handle: u16,
    pub role: u8,
    pub peer_address_type: u8,
    pub peer_address: DeviceAddress,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataLengthChange {
    pub connection_handle: u16,
    pub max_tx_octets: u16,
    pub max_tx_time: u16,
    pub max_rx_octets: u16,
    pub max_rx_time: u16,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhyUpdateComplete {
    pub status: u8,
    pub connection_handle: u16,
    pub tx_phy: u8,
    pub rx_phy: u8,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LtkRequest {
    pub connection_handle: u16,
    pub random_number: u64,
    pub encrypted_diversifier: u16,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LeSubevent {
    EnhancedConnectionComplete(EnhancedConnectionComplete),
    DataLengthChange(DataLengthChange),
    PhyUpdateComplete(PhyUpdateComplete),
    ChannelSelectionAlgorithm { connection_handle: u16, algorithm: u8 },
    LtkRequest(LtkRequest),
    Other { subevent_code: u8, parameters: Vec<u8> },
}

/// The collapsed event hierarchy (spec §9 Design Notes).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Disconnect(DisconnectionComplete),
    CmdComplete(CommandComplete),
    CmdStatus(CommandStatus),
    EncryptionChange(EncryptionChange),
    LeMeta(LeSubevent),
    NumberOfCompletedPackets(Vec<NumberOfCompletedPackets>),
    Other { event_code: u8, parameters: Vec<u8> },
}

/// Parse a raw event's `event_code`/`parameters` into the typed `Event`.
/// An unrecognized event_code is *not* an error: it surfaces as
/// `Event::Other` so the router can log and move on (spec §4.1: "an
/// unknown event_code ... is reported as UnknownEvent and logged but not
/// fatal").
pub fn parse_event(raw: &RawEvent) -> Result<Event> {
    let p = &raw.parameters;
    match raw.event_code {
        EVT_DISCONNECTION_COMPLETE => {
            require_len(p, 4, "Disconnection-Complete")?;
            Ok(Event::Disconnect(DisconnectionComplete {
                status: p[0],
                connection_handle: LittleEndian::read_u16(&p[1..3]),
                reason: p[3],
            }))
        }
        EVT_COMMAND_COMPLETE => {
            require_len(p, 3, "Command-Complete")?;
            Ok(Event::CmdComplete(CommandComplete {
                num_hci_command_packets: p[0],
                opcode: LittleEndian::read_u16(&p[1..3]),
                return_parameters: p[3..].to_vec(),
            }))
        }
        EVT_COMMAND_STATUS => {
            require_len(p, 4, "Command-Status")?;
            Ok(Event::CmdStatus(CommandStatus {
                status: p[0],
                num_hci_command_packets: p[1],
                opcode: LittleEndian::read_u16(&p[2..4]),
            }))
        }
        EVT_ENCRYPTION_CHANGE => {
            require_len(p, 4, "Encryption-Change")?;
            Ok(Event::EncryptionChange(EncryptionChange {
                status: p[0],
                connection_handle: LittleEndian::read_u16(&p[1..3]),
                encryption_enabled: p[3],
            }))
        }
        EVT_NUMBER_OF_COMPLETED_PACKETS => parse_num_completed_packets(p).map(Event::NumberOfCompletedPackets),
        EVT_LE_META => parse_le_meta(p).map(Event::LeMeta),
        other => Ok(Event::Other {
            event_code: other,
            parameters: p.clone(),
        }),
    }
}

fn parse_num_completed_packets(p: &[u8]) -> Result<Vec<NumberOfCompletedPackets>> {
    require_len(p, 1, "Number-Of-Completed-Packets")?;
    let num_handles = p[0] as usize;
    let needed = 1 + num_handles * 4;
    if p.len() < needed {
        return Err(Error::MalformedFrame(format!(
            "Number-Of-Completed-Packets declared {num_handles} handles, only {} bytes available",
            p.len()
        )));
    }
    let mut out = Vec::with_capacity(num_handles);
    let handles = &p[1..1 + num_handles * 2];
    let counts = &p[1 + num_handles * 2..1 + num_handles * 4];
    for i in 0..num_handles {
        out.push(NumberOfCompletedPackets {
            connection_handle: LittleEndian::read_u16(&handles[i * 2..i * 2 + 2]),
            num_completed: LittleEndian::read_u16(&counts[i * 2..i * 2 + 2]),
        });
    }
    Ok(out)
}

fn parse_le_meta(p: &[u8]) -> Result<LeSubevent> {
    require_len(p, 1, "LE-Meta")?;
    let subevent_code = p[0];
    let sp = &p[1..];
    match subevent_code {
        SUBEVT_ENHANCED_CONNECTION_COMPLETE => {
            require_len(sp, 30, "LE-Enhanced-Connection-Complete")?;
            let mut wire = [0u8; 6];
            wire.copy_from_slice(&sp[5..11]);
            Ok(LeSubevent::EnhancedConnectionComplete(EnhancedConnectionComplete {
                status: sp[0],
                connection_handle: LittleEndian::read_u16(&sp[1..3]),
                role: sp[3],
                peer_address_type: sp[4],
                peer_address: DeviceAddress::from_wire_bytes(&wire),
            }))
        }
        SUBEVT_DATA_LENGTH_CHANGE => {
            require_len(sp, 10, "LE-Data-Length-Change")?;
            Ok(LeSubevent::DataLengthChange(DataLengthChange {
                connection_handle: LittleEndian::read_u16(&sp[0..2]),
                max_tx_octets: LittleEndian::read_u16(&sp[2..4]),
                max_tx_time: LittleEndian::read_u16(&sp[4..6]),
                max_rx_octets: LittleEndian::read_u16(&sp[6..8]),
                max_rx_time: LittleEndian::read_u16(&sp[8..10]),
            }))
        }
        SUBEVT_PHY_UPDATE_COMPLETE => {
            require_len(sp, 5, "LE-PHY-Update-Complete")?;
            Ok(LeSubevent::PhyUpdateComplete(PhyUpdateComplete {
                status: sp[0],
                connection_handle: LittleEndian::read_u16(&sp[1..3]),
                tx_phy: sp[3],
                rx_phy: sp[4],
            }))
        }
        SUBEVT_CHANNEL_SELECTION_ALGORITHM => {
            require_len(sp, 3, "LE-Channel-Selection-Algorithm")?;
            Ok(LeSubevent::ChannelSelectionAlgorithm {
                connection_handle: LittleEndian::read_u16(&sp[0..2]),
                algorithm: sp[2],
            })
        }
        SUBEVT_LTK_REQUEST => {
            require_len(sp, 12, "LE-Long-Term-Key-Request")?;
            Ok(LeSubevent::LtkRequest(LtkRequest {
                connection_handle: LittleEndian::read_u16(&sp[0..2]),
                random_number: LittleEndian::read_u64(&sp[2..10]),
                encrypted_diversifier: LittleEndian::read_u16(&sp[10..12]),
            }))
        }
        other => Ok(LeSubevent::Other {
            subevent_code: other,
            parameters: sp.to_vec(),
        }),
    }
}

fn require_len(p: &[u8], min: usize, what: &str) -> Result<()> {
    if p.len() < min {
        Err(Error::MalformedFrame(format!(
            "{what} parameters truncated: need {min} bytes, got {}",
            p.len()
        )))
    } else {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(event_code: u8, parameters: Vec<u8>) -> RawEvent {
        RawEvent { event_code, parameters }
    }

    #[test]
    fn parses_command_complete() {
        let evt = parse_event(&raw(EVT_COMMAND_COMPLETE, vec![0x01, 0x03, 0x0c, 0x00])).unwrap();
        match evt {
            Event::CmdComplete(cc) => {
                assert_eq!(cc.num_hci_command_packets, 1);
                assert_eq!(cc.opcode, 0x0c03);
                assert_eq!(cc.return_parameters, vec![0x00]);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn parses_command_status() {
        let evt = parse_event(&raw(EVT_COMMAND_STATUS, vec![0x00, 0x01, 0x0d, 0x20])).unwrap();
        match evt {
            Event::CmdStatus(cs) => {
                assert_eq!(cs.status, 0);
                assert_eq!(cs.opcode, 0x200d);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn parses_number_of_completed_packets_multi_handle() {
        // num_handles=2, handles=[0x0001, 0x0002], counts=[3, 5]
        let params = vec![2, 0x01, 0x00, 0x02, 0x00, 3, 0, 5, 0];
        let evt = parse_event(&raw(EVT_NUMBER_OF_COMPLETED_PACKETS, params)).unwrap();
        match evt {
            Event::NumberOfCompletedPackets(v) => {
                assert_eq!(v.len(), 2);
                assert_eq!(v[0], NumberOfCompletedPackets { connection_handle: 1, num_completed: 3 });
                assert_eq!(v[1], NumberOfCompletedPackets { connection_handle: 2, num_completed: 5 });
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn parses_le_enhanced_connection_complete() {
        let mut params = vec![0x00, 0x40, 0x00, 0x00, 0x01];
        // wire-order address AA:BB:CC:DD:EE:FF reversed: FF EE DD CC BB AA
        params.extend_from_slice(&[0xff, 0xee, 0xdd, 0xcc, 0xbb, 0xaa]);
        params.extend_from_slice(&[0u8; 30 - 5 - 6]);
        let mut event_params = vec![SUBEVT_ENHANCED_CONNECTION_COMPLETE];
        event_params.extend_from_slice(&params);
        let evt = parse_event(&raw(EVT_LE_META, event_params)).unwrap();
        match evt {
            Event::LeMeta(LeSubevent::EnhancedConnectionComplete(ecc)) => {
                assert_eq!(ecc.connection_handle, 0x0040);
                assert_eq!(ecc.peer_address.to_string(), "AA:BB:CC:DD:EE:FF");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn unknown_event_code_is_not_an_error() {
        let evt = parse_event(&raw(0x99, vec![1, 2, 3])).unwrap();
        match evt {
            Event::Other { event_code, parameters } => {
                assert_eq!(event_code, 0x99);
                assert_eq!(parameters, vec![1, 2, 3]);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn unknown_le_subevent_is_not_an_error() {
        let evt = parse_event(&raw(EVT_LE_META, vec![0xfe, 9, 9])).unwrap();
        match evt {
            Event::LeMeta(LeSubevent::Other { subevent_code, parameters }) => {
                assert_eq!(subevent_code, 0xfe);
                assert_eq!(parameters, vec![9, 9]);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn truncated_disconnection_complete_is_malformed() {
        assert!(parse_event(&raw(EVT_DISCONNECTION_COMPLETE, vec![0x00])).is_err());
    }
}
