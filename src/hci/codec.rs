//! Pure, stateless HCI/ACL/L2CAP framing (spec §4.1). No state is held
//! here; every function is a plain transform from typed values to bytes
//! or back. Multi-byte fields are little-endian throughout, read and
//! written with `byteorder`, the same crate `tokenize-inc-stm32wb-hci`
//! reaches for in its own HCI codec.

use super::opcodes::OpCode;
use crate::error::{Error, Result};
use byteorder::{ByteOrder, LittleEndian};

pub const HCI_COMMAND_PACKET: u8 = 0x01;
pub const HCI_ACL_DATA_PACKET: u8 = 0x02;
pub const HCI_EVENT_PACKET: u8 = 0x04;

/// PB flag meaning "first (or only) fragment of an L2CAP PDU, host to
/// controller or complete PDU, controller to host" (spec §3 invariant 3:
/// the receiver only accepts this one).
pub const PB_FLAG_START_OF_L2CAP_PDU: u8 = 0b10;

/// Encode an outbound HCI command packet: `[0x01, opcode_lo, opcode_hi, len, params...]`.
pub fn encode_command(opcode: OpCode, params: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(4 + params.len());
    out.push(HCI_COMMAND_PACKET);
    out.extend_from_slice(&opcode.as_u16().to_le_bytes());
    out.push(params.len() as u8);
    out.extend_from_slice(params);
    out
}

/// Encode an outbound ACL data packet: `[0x02, hdr_lo, hdr_hi, len_lo, len_hi, payload...]`
/// where `hdr = handle | (pb_flag<<12) | (bc_flag<<14)`.
pub fn encode_acl(handle: u16, pb_flag: u8, bc_flag: u8, payload: &[u8]) -> Vec<u8> {
    let hdr = (handle & 0x0fff) | ((pb_flag as u16) << 12) | ((bc_flag as u16) << 14);
    let mut out = Vec::with_capacity(5 + payload.len());
    out.push(HCI_ACL_DATA_PACKET);
    out.extend_from_slice(&hdr.to_le_bytes());
    out.extend_from_slice(&(payload.len() as u16).to_le_bytes());
    out.extend_from_slice(payload);
    out
}

/// Prepend the L2CAP `pdu_length`/`channel_id` header to an application
/// payload. `pdu_length` is the length of `payload` alone (the header
/// itself is not counted, per the Bluetooth core spec and
/// `original_source/.../hci.py`'s `L2CAP_Data_Send`).
pub fn encode_l2cap(channel_id: u16, payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(4 + payload.len());
    out.extend_from_slice(&(payload.len() as u16).to_le_bytes());
    out.extend_from_slice(&channel_id.to_le_bytes());
    out.extend_from_slice(payload);
    out
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AclFrame {
    pub handle: u16,
    pub pb_flag: u8,
    pub bc_flag: u8,
    pub payload: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct L2capPdu {
    pub pdu_length: u16,
    pub channel_id: u16,
    pub payload: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawEvent {
    pub event_code: u8,
    pub parameters: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodedFrame {
    Event(RawEvent),
    Acl(AclFrame),
    Unknown(u8),
}

/// Dispatch on the leading packet-type octet and decode the frame body.
/// A frame shorter than its declared length fails with `MalformedFrame`.
pub fn decode_frame(bytes: &[u8]) -> Result<DecodedFrame> {
    if bytes.is_empty() {
        return Err(Error::MalformedFrame("empty frame".into()));
    }
    match bytes[0] {
        HCI_EVENT_PACKET => decode_event(bytes).map(DecodedFrame::Event),
        HCI_ACL_DATA_PACKET => decode_acl(bytes).map(DecodedFrame::Acl),
        other => Ok(DecodedFrame::Unknown(other)),
    }
}

fn decode_event(bytes: &[u8]) -> Result<RawEvent> {
    if bytes.len() < 3 {
        return Err(Error::MalformedFrame("event header truncated".into()));
    }
    let event_code = bytes[1];
    let parameter_length = bytes[2] as usize;
    let parameters = &bytes[3..];
    if parameters.len() < parameter_length {
        return Err(Error::MalformedFrame(format!(
            "event declared {parameter_length} parameter bytes, got {}",
            parameters.len()
        )));
    }
    Ok(RawEvent {
        event_code,
        parameters: parameters[..parameter_length].to_vec(),
    })
}

fn decode_acl(bytes: &[u8]) -> Result<AclFrame> {
    if bytes.len() < 5 {
        return Err(Error::MalformedFrame("ACL header truncated".into()));
    }
    let hdr = LittleEndian::read_u16(&bytes[1..3]);
    let data_length = LittleEndian::read_u16(&bytes[3..5]) as usize;
    let handle = hdr & 0x0fff;
    let pb_flag = ((hdr >> 12) & 0b11) as u8;
    let bc_flag = ((hdr >> 14) & 0b11) as u8;
    let payload = &bytes[5..];
    if payload.len() < data_length {
        return Err(Error::MalformedFrame(format!(
            "ACL declared {data_length} data bytes, got {}",
            payload.len()
        )));
    }
    Ok(AclFrame {
        handle,
        pb_flag,
        bc_flag,
        payload: payload[..data_length].to_vec(),
    })
}

/// Decode the L2CAP header out of an ACL frame's payload. Only meaningful
/// for frames with `pb_flag == PB_FLAG_START_OF_L2CAP_PDU` (spec §3
/// invariant 3); continuation/broadcast frames are not L2CAP PDU starts.
pub fn decode_l2cap(payload: &[u8]) -> Result<L2capPdu> {
    if payload.len() < 4 {
        return Err(Error::MalformedFrame("L2CAP header truncated".into()));
    }
    let pdu_length = LittleEndian::read_u16(&payload[0..2]);
    let channel_id = LittleEndian::read_u16(&payload[2..4]);
    Ok(L2capPdu {
        pdu_length,
        channel_id,
        payload: payload[4..].to_vec(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hci::opcodes::RESET;

    #[test]
    fn command_roundtrip() {
        let params = [0xaa, 0xbb];
        let encoded = encode_command(RESET, &params);
        assert_eq!(encoded[0], HCI_COMMAND_PACKET);
        assert_eq!(&encoded[1..3], &RESET.as_u16().to_le_bytes());
        assert_eq!(encoded[3], 2);
        assert_eq!(&encoded[4..], &params);
    }

    #[test]
    fn acl_header_packs_handle_and_flags() {
        let encoded = encode_acl(0x0041, 0b10, 0b00, &[1, 2, 3]);
        let decoded = decode_acl(&encoded).unwrap();
        assert_eq!(decoded.handle, 0x0041);
        assert_eq!(decoded.pb_flag, 0b10);
        assert_eq!(decoded.bc_flag, 0b00);
        assert_eq!(decoded.payload, vec![1, 2, 3]);
    }

    #[test]
    fn l2cap_roundtrip() {
        let payload = [0u8; 27];
        let encoded = encode_l2cap(0x0044, &payload);
        let decoded = decode_l2cap(&encoded).unwrap();
        assert_eq!(decoded.channel_id, 0x0044);
        assert_eq!(decoded.pdu_length as usize, payload.len());
        assert_eq!(decoded.payload, payload);
    }

    #[test]
    fn decode_frame_dispatches_on_packet_type() {
        let event_bytes = [HCI_EVENT_PACKET, 0x0e, 0x01, 0x00];
        match decode_frame(&event_bytes).unwrap() {
            DecodedFrame::Event(e) => {
                assert_eq!(e.event_code, 0x0e);
                assert_eq!(e.parameters, vec![0x00]);
            }
            other => panic!("expected Event, got {other:?}"),
        }
    }

    #[test]
    fn decode_frame_rejects_truncated_event() {
        let truncated = [HCI_EVENT_PACKET, 0x0e, 0x05, 0x01];
        assert!(decode_frame(&truncated).is_err());
    }

    #[test]
    fn decode_frame_reports_unknown_packet_type_without_failing() {
        match decode_frame(&[0x03, 0x00]).unwrap() {
            DecodedFrame::Unknown(0x03) => {}
            other => panic!("expected Unknown(0x03), got {other:?}"),
        }
    }

    #[test]
    fn full_acl_l2cap_roundtrip_through_wire_bytes() {
        let l2cap = encode_l2cap(0x0044, &[9, 9, 9, 9]);
        let acl = encode_acl(7, PB_FLAG_START_OF_L2CAP_PDU, 0, &l2cap);
        let frame = decode_frame(&acl).unwrap();
        let DecodedFrame::Acl(acl_frame) = frame else {
            panic!("expected Acl frame")
        };
        assert_eq!(acl_frame.pb_flag, PB_FLAG_START_OF_L2CAP_PDU);
        let pdu = decode_l2cap(&acl_frame.payload).unwrap();
        assert_eq!(pdu.channel_id, 0x0044);
        assert_eq!(pdu.payload, vec![9, 9, 9, 9]);
    }
}

#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn acl_l2cap_roundtrip_for_arbitrary_handles_and_payloads(
            handle in 0u16..=0x0fff,
            bc_flag in 0u8..=0b11,
            payload in proptest::collection::vec(any::<u8>(), 0..512),
        ) {
            let l2cap = encode_l2cap(0x0044, &payload);
            let acl = encode_acl(handle, PB_FLAG_START_OF_L2CAP_PDU, bc_flag, &l2cap);
            let DecodedFrame::Acl(acl_frame) = decode_frame(&acl).unwrap() else {
                panic!("expected Acl frame")
            };
            prop_assert_eq!(acl_frame.handle, handle);
            prop_assert_eq!(acl_frame.bc_flag, bc_flag);
            let pdu = decode_l2cap(&acl_frame.payload).unwrap();
            prop_assert_eq!(pdu.channel_id, 0x0044);
            prop_assert_eq!(pdu.payload, payload);
        }
    }
}
