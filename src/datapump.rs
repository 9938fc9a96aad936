//! The data pump and verifier (spec §4.7): deterministic payload
//! generation and credit-flow-controlled transmission on one side,
//! fingerprint verification and completion signaling on the other.

use crate::csvlog::PacketLogWriter;
use crate::error::Result;
use crate::hci::codec::{decode_l2cap, encode_acl, encode_l2cap};
use crate::signals::Signals;
use crate::state::ControllerState;
use crate::transport::Transport;
use byteorder::{ByteOrder, LittleEndian};
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Instant;

pub const L2CAP_CHANNEL_ID: u16 = 0x0044;

/// `K = floor(bytes_per_packet / 4)`, the fingerprint constant for a run
/// (spec §3's `PacketFingerprint`).
pub fn fingerprint_constant(bytes_per_packet: u16) -> u32 {
    (bytes_per_packet as u32) / 4
}

/// Deterministic payload generator (spec §4.7). `rem` leading zero bytes
/// followed by `valid` little-endian u32 values continuing from the
/// previous packet's last counter value `last_counter`.
pub struct PayloadGenerator {
    bytes_per_packet: u16,
    rem: usize,
    valid: usize,
    last_counter: u32,
}

impl PayloadGenerator {
    pub fn new(bytes_per_packet: u16) -> Self {
        let rem = (bytes_per_packet % 4) as usize;
        let valid = ((bytes_per_packet as usize) - rem) / 4;
        PayloadGenerator {
            bytes_per_packet,
            rem,
            valid,
            last_counter: 0,
        }
    }

    pub fn fingerprint(&self) -> u32 {
        self.valid as u32
    }

    /// Produce the next payload and advance internal state.
    pub fn next_payload(&mut self) -> Vec<u8> {
        let mut out = vec![0u8; self.bytes_per_packet as usize];
        for i in 0..self.valid {
            let counter = self.last_counter + 1 + i as u32;
            LittleEndian::write_u32(&mut out[self.rem + i * 4..self.rem + i * 4 + 4], counter);
        }
        self.last_counter += self.valid as u32;
        out
    }
}

/// Transmit-side credit-flow loop (spec §4.7, §5, §3 `Credit` invariant).
pub struct TransmitPump<'a> {
    transport: &'a dyn Transport,
    state: &'a ControllerState,
    signals: &'a Signals,
    connection_handle: u16,
    generator: PayloadGenerator,
    credits: u32,
    to_send: u32,
    sent_so_far: u32,
    log: PacketLogWriter,
    started_at: Instant,
}

impl<'a> TransmitPump<'a> {
    pub fn new(
        transport: &'a dyn Transport,
        state: &'a ControllerState,
        signals: &'a Signals,
        connection_handle: u16,
        bytes_per_packet: u16,
        total_packets: u32,
        initial_credits: u32,
        log: PacketLogWriter,
    ) -> Self {
        TransmitPump {
            transport,
            state,
            signals,
            connection_handle,
            generator: PayloadGenerator::new(bytes_per_packet),
            credits: initial_credits,
            to_send: total_packets,
            sent_so_far: 0,
            log,
            started_at: Instant::now(),
        }
    }

    /// Run until `sent_so_far >= total_packets` (spec §4.7). Records
    /// `(timestamp, sent_so_far)` to the per-packet CSV once per
    /// Number-Of-Completed-Packets batch, the same granularity the
    /// original records at.
    pub async fn run(&mut self) -> Result<u32> {
        self.state.take_completed_packets();
        let total_packets = self.to_send;
        while self.sent_so_far < total_packets {
            if self.credits > 0 && self.to_send > 0 {
                let payload = self.generator.next_payload();
                let l2cap = encode_l2cap(L2CAP_CHANNEL_ID, &payload);
                let acl = encode_acl(self.connection_handle, 0b00, 0b00, &l2cap);
                self.transport.send(&acl).await?;
                self.credits -= 1;
                self.to_send -= 1;
            } else {
                self.signals.credits_available.wait().await;
                let (completed, completed_at) = self.state.take_completed_packets();
                if completed > 0 {
                    self.sent_so_far += completed;
                    self.credits += completed;
                    let elapsed = completed_at.unwrap_or_else(Instant::now).duration_since(self.started_at);
                    self.log.write_row(elapsed, self.sent_so_far as i64)?;
                }
            }
        }
        Ok(self.sent_so_far)
    }
}

/// Receive-side fingerprint verifier (spec §4.7). Consumes ACL frames
/// the router forwards and appends `(timestamp, packet_number)` rows to
/// the per-packet CSV as it goes.
pub struct Verifier {
    fingerprint: u32,
    total_packets: u32,
    expected: AtomicU32,
    valid_recv_data: AtomicU32,
    started_at: Instant,
}

impl Verifier {
    pub fn new(fingerprint: u32, total_packets: u32) -> Self {
        Verifier {
            fingerprint,
            total_packets,
            expected: AtomicU32::new(0),
            valid_recv_data: AtomicU32::new(0),
            started_at: Instant::now(),
        }
    }

    pub fn valid_recv_data(&self) -> u32 {
        self.valid_recv_data.load(Ordering::SeqCst)
    }

    /// Process one ACL payload (already confirmed to be a start-of-L2CAP-PDU
    /// frame by the router per spec §3 invariant 3). Returns `true` once
    /// the expected packet count has been reached, signaling
    /// `recv_data_finish` is the caller's responsibility.
    pub fn process_l2cap_payload(&self, payload: &[u8], received_at: Instant, log: &mut PacketLogWriter) -> Result<bool> {
        let pdu = decode_l2cap(payload)?;
        if pdu.payload.len() < 4 {
            return Ok(false);
        }
        let received = LittleEndian::read_u32(&pdu.payload[pdu.payload.len() - 4..]);
        let expected = self.expected.fetch_add(self.fingerprint, Ordering::SeqCst) + self.fingerprint;
        if received == expected {
            self.valid_recv_data.fetch_add(1, Ordering::SeqCst);
        }
        let packet_number = received / self.fingerprint - 1;
        let elapsed = received_at.duration_since(self.started_at);
        log.write_row(elapsed, packet_number as i64)?;
        Ok(packet_number as u32 + 1 >= self.total_packets)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fingerprint_is_floor_of_bytes_over_four() {
        assert_eq!(fingerprint_constant(27), 6);
        assert_eq!(fingerprint_constant(247), 61);
    }

    #[test]
    fn payload_generator_sequence_matches_k_times_n() {
        let mut gen = PayloadGenerator::new(27);
        let k = gen.fingerprint();
        for n in 1..=10u32 {
            let payload = gen.next_payload();
            let trailing = LittleEndian::read_u32(&payload[payload.len() - 4..]);
            assert_eq!(trailing, n * k);
        }
    }

    #[test]
    fn payload_generator_leaves_rem_leading_zero_bytes() {
        let mut gen = PayloadGenerator::new(27);
        let payload = gen.next_payload();
        assert_eq!(&payload[..27 % 4], &[0u8; 27 % 4]);
    }

    #[test]
    fn payload_generator_handles_multiple_of_four_with_zero_rem() {
        let mut gen = PayloadGenerator::new(16);
        let payload = gen.next_payload();
        assert_eq!(payload.len(), 16);
        let trailing = LittleEndian::read_u32(&payload[12..16]);
        assert_eq!(trailing, gen.fingerprint());
    }
}

#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn trailing_counter_is_always_n_times_k(bytes_per_packet in 4u16..=512, n in 1u32..=50) {
            let mut gen = PayloadGenerator::new(bytes_per_packet);
            let k = gen.fingerprint();
            let mut payload = Vec::new();
            for _ in 0..n {
                payload = gen.next_payload();
            }
            let trailing = LittleEndian::read_u32(&payload[payload.len() - 4..]);
            prop_assert_eq!(trailing, n * k);
            let rem = (bytes_per_packet % 4) as usize;
            prop_assert_eq!(&payload[..rem], vec![0u8; rem].as_slice());
        }
    }
}
