//! Configuration inputs (spec §6), loadable from YAML with `serde_yaml` —
//! the data-only half of
//! `original_source/tools/hci_throughput/hci_device.py`'s
//! `parse_cfg_files`. Argument parsing, parameter sweeps, and directory
//! layout stay out of scope; this struct is what the orchestrator reads.

use serde::Deserialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub enum PhyChoice {
    #[serde(rename = "1M")]
    OneM,
    #[serde(rename = "2M")]
    TwoM,
    Coded,
}

impl PhyChoice {
    pub fn label(self) -> &'static str {
        match self {
            PhyChoice::OneM => "1M",
            PhyChoice::TwoM => "2M",
            PhyChoice::Coded => "Coded",
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AdvertisingConfig {
    pub advertising_interval_min: u16,
    pub advertising_interval_max: u16,
    pub advertising_type: u8,
    pub advertising_channel_map: u8,
    pub advertising_filter_policy: u8,
    pub peer_address: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ConnectionConfig {
    pub le_scan_interval: u16,
    pub le_scan_window: u16,
    pub initiator_filter_policy: u8,
    pub connection_interval_min: u16,
    pub connection_interval_max: u16,
    pub max_latency: u16,
    pub supervision_timeout: u16,
    pub min_ce_length: u16,
    pub max_ce_length: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ThroughputConfig {
    pub data_type: String,
    pub flag_plot_packets: bool,
    pub sample_time: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub num_of_bytes_to_send: u16,
    pub num_of_packets_to_send: u32,
    pub enable_encryption: bool,
    /// Hex-encoded 16-byte long-term key, required when `enable_encryption`
    /// is set (spec §4.6, §4.4's LE-LTK-Request-Reply auto-reply rule).
    pub ltk: Option<String>,
    pub phy: PhyChoice,
    pub adv: AdvertisingConfig,
    pub conn: ConnectionConfig,
    pub tp: ThroughputConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Init {
    pub own_address: Option<String>,
    pub own_address_type: u8,
    pub dev_index: String,
    pub peer_address: String,
    pub peer_address_type: u8,
    pub peer_dev_index: Option<String>,
}

impl Config {
    pub fn from_yaml_str(s: &str) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(s)
    }

    /// Fatal before the data phase begins if the configured packet size
    /// cannot fit in the controller's negotiated max TX octets (spec §4.6,
    /// Invariant check at end of init; spec §8 boundary behavior).
    pub fn validate_against_max_tx_octets(&self, supported_max_tx_octets: u16) -> crate::error::Result<()> {
        const L2CAP_HDR_BYTES: u16 = 4;
        if self.num_of_bytes_to_send + L2CAP_HDR_BYTES > supported_max_tx_octets {
            return Err(crate::error::Error::Configuration(format!(
                "num_of_bytes_to_send ({}) + {L2CAP_HDR_BYTES} exceeds supported_max_tx_octets ({supported_max_tx_octets})",
                self.num_of_bytes_to_send
            )));
        }
        Ok(())
    }

    /// Decode `ltk` as 16 bytes of hex, defaulting to the all-zero LTK
    /// when encryption is not configured.
    pub fn ltk_bytes(&self) -> crate::error::Result<[u8; 16]> {
        let Some(hex) = &self.ltk else {
            return Ok([0u8; 16]);
        };
        let mut out = [0u8; 16];
        if hex.len() != 32 {
            return Err(crate::error::Error::Configuration(format!("ltk must be 32 hex characters, got {}", hex.len())));
        }
        for (i, byte) in out.iter_mut().enumerate() {
            *byte = u8::from_str_radix(&hex[i * 2..i * 2 + 2], 16)
                .map_err(|_| crate::error::Error::Configuration(format!("ltk is not valid hex: {hex}")))?;
        }
        Ok(out)
    }
}

impl Init {
    pub fn from_yaml_str(s: &str) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_accepts_minimum_packet_size() {
        let cfg = sample_config(27);
        cfg.validate_against_max_tx_octets(251).unwrap();
    }

    #[test]
    fn validate_rejects_boundary_overflow() {
        // supported_max_tx_octets - 3 must be rejected (spec §8 boundary).
        let cfg = sample_config(251 - 3);
        assert!(cfg.validate_against_max_tx_octets(251).is_err());
    }

    #[test]
    fn validate_accepts_boundary_exact_fit() {
        // supported_max_tx_octets - 4 must be accepted.
        let cfg = sample_config(251 - 4);
        cfg.validate_against_max_tx_octets(251).unwrap();
    }

    #[test]
    fn ltk_bytes_defaults_to_zero_when_absent() {
        let cfg = sample_config(27);
        assert_eq!(cfg.ltk_bytes().unwrap(), [0u8; 16]);
    }

    #[test]
    fn ltk_bytes_decodes_hex() {
        let mut cfg = sample_config(27);
        cfg.ltk = Some("000102030405060708090a0b0c0d0e0f".into());
        assert_eq!(cfg.ltk_bytes().unwrap(), [0, 1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13, 14, 15]);
    }

    #[test]
    fn ltk_bytes_rejects_wrong_length() {
        let mut cfg = sample_config(27);
        cfg.ltk = Some("00".into());
        assert!(cfg.ltk_bytes().is_err());
    }

    fn sample_config(bytes: u16) -> Config {
        Config {
            num_of_bytes_to_send: bytes,
            num_of_packets_to_send: 10,
            enable_encryption: false,
            ltk: None,
            phy: PhyChoice::OneM,
            adv: AdvertisingConfig {
                advertising_interval_min: 0x20,
                advertising_interval_max: 0x20,
                advertising_type: 0,
                advertising_channel_map: 0x7,
                advertising_filter_policy: 0,
                peer_address: "00:00:00:00:00:00".into(),
            },
            conn: ConnectionConfig {
                le_scan_interval: 0x10,
                le_scan_window: 0x10,
                initiator_filter_policy: 0,
                connection_interval_min: 0x10,
                connection_interval_max: 0x10,
                max_latency: 0,
                supervision_timeout: 0x100,
                min_ce_length: 0,
                max_ce_length: 0,
            },
            tp: ThroughputConfig {
                data_type: "kb".into(),
                flag_plot_packets: false,
                sample_time: 1.0,
            },
        }
    }
}
