//! Controller state (spec §4.5): everything learned from the controller
//! so far. Single-writer (the router), multi-reader (orchestrator and
//! dispatcher). Replaces the source's module-level globals — connection
//! handle, buffer size, completed-packets counter — with one record
//! passed by shared reference (spec §9 Design Notes).

use crate::addr::{ControllerAddress, DeviceAddress};
use crate::hci::events::Event;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU16, AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Instant;

/// One entry in the append-only diagnostic event log (spec §3's
/// `EventLog`). `seq` is monotonic across the run, purely so tests and
/// logs can assert ordering without relying on `Vec` position.
#[derive(Debug, Clone)]
pub struct EventLogEntry {
    pub seq: u64,
    pub event: Event,
}

/// Current PHY, as reported by LE-PHY-Update-Complete (1=1M, 2=2M, 3=Coded).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CurrentPhy {
    pub tx: u8,
    pub rx: u8,
}

#[derive(Debug, Clone, Default)]
pub struct LinkParameters {
    pub supported_features: u64,
    pub max_tx_octets: u16,
    pub max_tx_time: u16,
    pub max_rx_octets: u16,
    pub max_rx_time: u16,
    pub current_phy: CurrentPhy,
}

/// The authoritative, in-memory record of everything the router has
/// learned from the controller (spec §4.5). No persistence; lives for
/// one run.
#[derive(Debug)]
pub struct ControllerState {
    pub address: Mutex<Option<ControllerAddress>>,
    pub total_num_le_acl_data_packets: AtomicU16,
    pub le_acl_data_packet_length: AtomicU16,
    pub link: Mutex<LinkParameters>,
    connection_handle: AtomicI64,
    /// Packets the controller has acknowledged since the last read;
    /// read-modify-written under a mutex shared by router and pump (spec §5).
    completed_packets_counter: Mutex<u32>,
    /// Receipt time of the most recent Number-Of-Completed-Packets event,
    /// carried into the next drain so the pump can timestamp its CSV row
    /// (spec §4.4, §4.7).
    completed_packets_timestamp: Mutex<Option<Instant>>,
    fatal: AtomicBool,
    event_log: Mutex<Vec<EventLogEntry>>,
    event_seq: AtomicU64,
}

/// `connection_handle` is a u12; `-1` (no handle) is encoded out-of-band
/// via `NO_HANDLE` rather than widening every read site with an `Option`.
const NO_HANDLE: i64 = -1;

impl Default for ControllerState {
    fn default() -> Self {
        ControllerState {
            address: Mutex::new(None),
            total_num_le_acl_data_packets: AtomicU16::new(0),
            le_acl_data_packet_length: AtomicU16::new(0),
            link: Mutex::new(LinkParameters::default()),
            connection_handle: AtomicI64::new(NO_HANDLE),
            completed_packets_counter: Mutex::new(0),
            completed_packets_timestamp: Mutex::new(None),
            fatal: AtomicBool::new(false),
            event_log: Mutex::new(Vec::new()),
            event_seq: AtomicU64::new(0),
        }
    }
}

impl ControllerState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_address(&self, address: DeviceAddress, kind: crate::addr::AddressType) {
        *self.address.lock().unwrap() = Some(ControllerAddress { address, kind });
    }

    pub fn address(&self) -> Option<ControllerAddress> {
        *self.address.lock().unwrap()
    }

    /// Set on LE-Enhanced-Connection-Complete; valid only until
    /// Disconnection-Complete clears it (spec §3 invariant 2).
    pub fn set_connection_handle(&self, handle: u16) {
        self.connection_handle.store(handle as i64, Ordering::SeqCst);
    }

    pub fn clear_connection_handle(&self) {
        self.connection_handle.store(NO_HANDLE, Ordering::SeqCst);
    }

    pub fn connection_handle(&self) -> Option<u16> {
        match self.connection_handle.load(Ordering::SeqCst) {
            NO_HANDLE => None,
            handle => Some(handle as u16),
        }
    }

    pub fn record_command_status(&self, status: u8, opcode: u16) {
        if status != 0 {
            log::warn!("command 0x{opcode:04x} returned non-zero status 0x{status:02x}");
        }
    }

    /// Credit bookkeeping lives in `ControllerState` so the dispatcher can
    /// populate the starting value straight from LE-Read-Buffer-Size, and
    /// the pump can drain it (spec §3's `Credit` entity). `at` is the
    /// receipt time of the Number-Of-Completed-Packets event that reported
    /// `count`, recorded so the pump can timestamp its CSV row.
    pub fn add_completed_packets(&self, count: u16, at: Instant) {
        let mut counter = self.completed_packets_counter.lock().unwrap();
        *counter += count as u32;
        *self.completed_packets_timestamp.lock().unwrap() = Some(at);
    }

    /// Read and zero the completed-packets counter, along with the
    /// timestamp of the event that last updated it (spec §4.7: "read and
    /// zero the completed-packets counter").
    pub fn take_completed_packets(&self) -> (u32, Option<Instant>) {
        let mut counter = self.completed_packets_counter.lock().unwrap();
        let count = std::mem::take(&mut *counter);
        let at = self.completed_packets_timestamp.lock().unwrap().take();
        (count, at)
    }

    pub fn mark_fatal(&self) {
        self.fatal.store(true, Ordering::SeqCst);
    }

    pub fn is_fatal(&self) -> bool {
        self.fatal.load(Ordering::SeqCst)
    }

    /// Append one event to the diagnostic log (spec §3's `EventLog`).
    /// Called by the router for every decoded event, successful or not.
    pub fn log_event(&self, event: Event) {
        let seq = self.event_seq.fetch_add(1, Ordering::SeqCst) + 1;
        self.event_log.lock().unwrap().push(EventLogEntry { seq, event });
    }

    pub fn event_log_snapshot(&self) -> Vec<EventLogEntry> {
        self.event_log.lock().unwrap().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::addr::AddressType;

    #[test]
    fn connection_handle_round_trips_and_clears() {
        let state = ControllerState::new();
        assert_eq!(state.connection_handle(), None);
        state.set_connection_handle(0x0040);
        assert_eq!(state.connection_handle(), Some(0x0040));
        state.clear_connection_handle();
        assert_eq!(state.connection_handle(), None);
    }

    #[test]
    fn completed_packets_accumulate_and_drain_to_zero() {
        let state = ControllerState::new();
        let now = Instant::now();
        state.add_completed_packets(3, now);
        state.add_completed_packets(4, now);
        let (count, at) = state.take_completed_packets();
        assert_eq!(count, 7);
        assert_eq!(at, Some(now));
        let (count, at) = state.take_completed_packets();
        assert_eq!(count, 0);
        assert_eq!(at, None);
    }

    #[test]
    fn address_set_once_is_observable() {
        let state = ControllerState::new();
        assert!(state.address().is_none());
        state.set_address(DeviceAddress::ZERO, AddressType::StaticRandom);
        assert_eq!(state.address().unwrap().kind, AddressType::StaticRandom);
    }

    #[test]
    fn event_log_sequence_numbers_are_monotonic() {
        let state = ControllerState::new();
        state.log_event(Event::Other { event_code: 0x01, parameters: vec![] });
        state.log_event(Event::Other { event_code: 0x02, parameters: vec![] });
        let log = state.event_log_snapshot();
        assert_eq!(log.len(), 2);
        assert_eq!(log[0].seq, 1);
        assert_eq!(log[1].seq, 2);
    }
}
