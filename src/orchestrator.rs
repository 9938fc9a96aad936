//! The connection orchestrator (spec §4.6): the shared init prelude plus
//! the receiver-role and transmitter-role sequences, driving the engine
//! from Reset through the data phase to teardown.

use crate::addr::{generate_static_random_address, AddressType, DeviceAddress};
use crate::config::{Config, Init, PhyChoice};
use crate::datapump::TransmitPump;
use crate::dispatcher::CommandDispatcher;
use crate::error::{Error, Result};
use crate::hci::commands::{self, AdvertisingParameters, ConnectionParameters};
use crate::hci::opcodes::{self, OpCode};
use crate::signals::Signals;
use crate::state::ControllerState;
use crate::transport::Transport;
use byteorder::{ByteOrder, LittleEndian};
use rand::rngs::OsRng;
use std::time::Duration;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(25);
const LINK_NEGOTIATION_TIMEOUT: Duration = Duration::from_secs(5);
const ENCRYPTION_TIMEOUT: Duration = Duration::from_secs(10);

/// Set-Event-Mask value used for every run (spec §4.6).
const EVENT_MASK: u64 = 0x2000_8000_0204_e090;
/// LE-Set-Event-Mask value used for every run (spec §4.6).
const LE_EVENT_MASK: u64 = 0x0000_0007_FFFF_FFFF;

/// The pieces every run's orchestrator needs. Built by the demo binary
/// (or any other caller) and threaded through both sequences.
pub struct Engine<'a> {
    pub transport: &'a dyn Transport,
    pub state: &'a ControllerState,
    pub dispatcher: &'a CommandDispatcher,
    pub signals: &'a Signals,
}

impl<'a> Engine<'a> {
    async fn issue(&self, opcode: OpCode, params: &[u8]) -> Result<crate::dispatcher::CommandOutcome> {
        self.dispatcher.issue(self.transport, opcode, params).await
    }

    /// Reset → (random addr) → Set-Event-Mask → LE-Set-Event-Mask →
    /// LE-Read-Local-Supported-Features → LE-Read-Buffer-Size →
    /// LE-Read-Maximum-Data-Length, with the packet-size validation at
    /// the end (spec §4.6).
    pub async fn init(&self, init_cfg: &Init, cfg: &Config) -> Result<()> {
        self.issue(opcodes::RESET, &commands::reset()).await?;

        if init_cfg.own_address_type == AddressType::StaticRandom.as_wire() {
            let address = match &init_cfg.own_address {
                Some(fixed) => parse_address(fixed)?,
                None => generate_static_random_address(&mut OsRng),
            };
            self.state.set_address(address, AddressType::StaticRandom);
            self.issue(opcodes::LE_SET_RANDOM_ADDRESS, &commands::le_set_random_address(address)).await?;
        } else {
            self.state.set_address(DeviceAddress::ZERO, AddressType::Public);
        }

        self.issue(opcodes::SET_EVENT_MASK, &commands::set_event_mask(EVENT_MASK)).await?;
        self.issue(opcodes::LE_SET_EVENT_MASK, &commands::le_set_event_mask(LE_EVENT_MASK)).await?;

        let features = self.issue(opcodes::LE_READ_LOCAL_SUPPORTED_FEATURES, &commands::le_read_local_supported_features()).await?;
        if features.return_parameters.len() >= 9 {
            self.state.link.lock().unwrap().supported_features = LittleEndian::read_u64(&features.return_parameters[1..9]);
        }

        let buffer_size = self.issue(opcodes::LE_READ_BUFFER_SIZE_V1, &commands::le_read_buffer_size()).await?;
        if buffer_size.return_parameters.len() >= 4 {
            self.state
                .le_acl_data_packet_length
                .store(LittleEndian::read_u16(&buffer_size.return_parameters[1..3]), std::sync::atomic::Ordering::SeqCst);
            self.state
                .total_num_le_acl_data_packets
                .store(buffer_size.return_parameters[3] as u16, std::sync::atomic::Ordering::SeqCst);
        }

        let max_data_length = self.issue(opcodes::LE_READ_MAXIMUM_DATA_LENGTH, &commands::le_read_maximum_data_length()).await?;
        let supported_max_tx_octets = if max_data_length.return_parameters.len() >= 3 {
            LittleEndian::read_u16(&max_data_length.return_parameters[1..3])
        } else {
            251
        };
        cfg.validate_against_max_tx_octets(supported_max_tx_octets)?;

        Ok(())
    }

    /// Receiver sequence (spec §4.6). The verifier itself lives on the
    /// router's [`crate::router::AclSink`], constructed by the caller
    /// before this runs; the orchestrator here only drives commands and
    /// waits on the signals the router sets.
    pub async fn run_receiver(&self, init_cfg: &Init, cfg: &Config) -> Result<()> {
        let peer_address = parse_address(&cfg.adv.peer_address)?;
        let params = AdvertisingParameters {
            interval_min: cfg.adv.advertising_interval_min,
            interval_max: cfg.adv.advertising_interval_max,
            advertising_type: cfg.adv.advertising_type,
            own_address_type: init_cfg.own_address_type,
            peer_address_type: init_cfg.peer_address_type,
            peer_address,
            advertising_channel_map: cfg.adv.advertising_channel_map,
            advertising_filter_policy: cfg.adv.advertising_filter_policy,
        };
        self.issue(opcodes::LE_SET_ADVERTISING_PARAMETERS, &commands::le_set_advertising_parameters(&params)).await?;
        self.issue(opcodes::LE_SET_ADVERTISE_ENABLE, &commands::le_set_advertise_enable(true)).await?;

        timeout(CONNECT_TIMEOUT, self.signals.connected.wait(), Error::ConnectTimeout).await?;
        let handle = self.state.connection_handle().ok_or(Error::ConnectTimeout)?;

        self.issue(opcodes::LE_SET_DATA_LENGTH, &commands::le_set_data_length(handle, u16::MAX, u16::MAX)).await?;
        timeout(LINK_NEGOTIATION_TIMEOUT, self.signals.data_len_updated.wait(), Error::CommandTimeout).await?;

        // No bound on this wait per spec §4.6: only connection, data-length,
        // PHY, and encryption negotiation carry orchestrator timeouts.
        self.signals.recv_data_finish.wait().await;

        self.issue(opcodes::LE_SET_ADVERTISE_ENABLE, &commands::le_set_advertise_enable(false)).await?;
        Ok(())
    }

    /// Transmitter sequence (spec §4.6). `log` receives one
    /// `(timestamp, sent_so_far)` row per Number-Of-Completed-Packets
    /// batch (spec §4.7, §6).
    pub async fn run_transmitter(&self, init_cfg: &Init, cfg: &Config, ltk: [u8; 16], log: crate::csvlog::PacketLogWriter) -> Result<u32> {
        let peer_address = parse_address(&init_cfg.peer_address)?;
        let params = ConnectionParameters {
            le_scan_interval: cfg.conn.le_scan_interval,
            le_scan_window: cfg.conn.le_scan_window,
            initiator_filter_policy: cfg.conn.initiator_filter_policy,
            peer_address_type: init_cfg.peer_address_type,
            peer_address,
            own_address_type: init_cfg.own_address_type,
            connection_interval_min: cfg.conn.connection_interval_min,
            connection_interval_max: cfg.conn.connection_interval_max,
            max_latency: cfg.conn.max_latency,
            supervision_timeout: cfg.conn.supervision_timeout,
            min_ce_length: cfg.conn.min_ce_length,
            max_ce_length: cfg.conn.max_ce_length,
        };
        self.issue(opcodes::LE_CREATE_CONNECTION, &commands::le_create_connection(&params)).await?;
        timeout(CONNECT_TIMEOUT, self.signals.connected.wait(), Error::ConnectTimeout).await?;
        let handle = self.state.connection_handle().ok_or(Error::ConnectTimeout)?;

        self.issue(opcodes::LE_SET_DATA_LENGTH, &commands::le_set_data_length(handle, u16::MAX, u16::MAX)).await?;
        timeout(LINK_NEGOTIATION_TIMEOUT, self.signals.data_len_updated.wait(), Error::CommandTimeout).await?;

        self.set_phy(cfg.phy, handle).await?;

        if cfg.enable_encryption {
            self.issue(opcodes::LE_ENABLE_ENCRYPTION, &commands::le_enable_encryption(handle, 0, 0, &ltk)).await?;
            timeout(ENCRYPTION_TIMEOUT, self.signals.encryption_enabled.wait(), Error::CommandTimeout).await?;
        }

        let initial_credits = self
            .state
            .total_num_le_acl_data_packets
            .load(std::sync::atomic::Ordering::SeqCst) as u32;
        let mut pump = TransmitPump::new(
            self.transport,
            self.state,
            self.signals,
            handle,
            cfg.num_of_bytes_to_send,
            cfg.num_of_packets_to_send,
            initial_credits,
            log,
        );
        pump.run().await
    }

    /// Set PHY according to configuration and the controller's
    /// supported-features bitfield (spec §4.6).
    async fn set_phy(&self, phy: PhyChoice, handle: u16) -> Result<()> {
        let features = self.state.link.lock().unwrap().supported_features;
        let (phy_bits, which) = match phy {
            PhyChoice::OneM => (1u8, "1M"),
            PhyChoice::TwoM => {
                if features & opcodes::LE_FEATURE_2M_PHY == 0 {
                    return Err(Error::UnsupportedPhy("2M"));
                }
                (2, "2M")
            }
            PhyChoice::Coded => {
                if features & opcodes::LE_FEATURE_CODED_PHY == 0 {
                    return Err(Error::UnsupportedPhy("Coded"));
                }
                (3, "Coded")
            }
        };
        log::info!("negotiating PHY {which}");
        self.issue(opcodes::LE_SET_PHY, &commands::le_set_phy(handle, 0, phy_bits, phy_bits, 0)).await?;
        timeout(LINK_NEGOTIATION_TIMEOUT, self.signals.phy_updated.wait(), Error::CommandTimeout).await
    }
}

async fn timeout<F: std::future::Future<Output = ()>>(duration: Duration, fut: F, on_timeout: Error) -> Result<()> {
    tokio::time::timeout(duration, fut).await.map_err(|_| on_timeout)
}

fn parse_address(s: &str) -> Result<DeviceAddress> {
    let mut bytes = [0u8; 6];
    let mut parts = s.split(':');
    for b in bytes.iter_mut() {
        let part = parts.next().ok_or_else(|| Error::Configuration(format!("malformed address: {s}")))?;
        *b = u8::from_str_radix(part, 16).map_err(|_| Error::Configuration(format!("malformed address: {s}")))?;
    }
    if parts.next().is_some() {
        return Err(Error::Configuration(format!("malformed address: {s}")));
    }
    Ok(DeviceAddress(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_address_roundtrips_display_format() {
        let addr = parse_address("AA:BB:CC:DD:EE:FF").unwrap();
        assert_eq!(addr.to_string(), "AA:BB:CC:DD:EE:FF");
    }

    #[test]
    fn parse_address_rejects_short_input() {
        assert!(parse_address("AA:BB:CC").is_err());
    }

    #[test]
    fn parse_address_rejects_non_hex() {
        assert!(parse_address("ZZ:BB:CC:DD:EE:FF").is_err());
    }
}
