//! Error taxonomy for the engine (spec §7).
//!
//! Hand-rolled rather than derive-macro generated, matching the style of
//! `bo-tie-linux`'s own `Error` type: a flat enum, a `Display` impl that
//! writes a human sentence per variant, and `std::error::Error` for free
//! interop with `?` at call sites that return `anyhow`-free `Result`s.

use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// A received frame was shorter than its declared length.
    MalformedFrame(String),
    /// An event or LE-subevent code this engine does not recognize.
    /// Logged, not fatal, unless it leaves an orchestrator wait stranded.
    UnknownEvent(u8),
    /// A dispatcher wait outlived its orchestrator-imposed bound.
    CommandTimeout,
    /// LE-Create-Connection / advertising did not complete within 25s.
    ConnectTimeout,
    /// Disconnection-Complete with reason ConnectionTimeout or
    /// ConnectionFailedToBeEstablished.
    LinkLost { reason: u8 },
    /// The configured PHY is not in the controller's supported-features set.
    UnsupportedPhy(&'static str),
    /// Encryption-Change arrived with a non-zero status or enabled=0.
    EncryptionFailed { status: u8, enabled: u8 },
    /// Binding the HCI user-channel socket failed even after one recovery
    /// retry.
    TransportBind(String),
    /// A configuration value is inconsistent with what the controller
    /// reported (e.g. packet size exceeds `supported_max_tx_octets`).
    Configuration(String),
    /// Clean shutdown requested externally (signal, or caller-driven
    /// cancellation); unwinds the current wait.
    Cancelled,
    /// Opaque OS-level I/O failure from the transport.
    Io(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::MalformedFrame(reason) => write!(f, "malformed frame: {reason}"),
            Error::UnknownEvent(code) => write!(f, "unknown event/subevent code: 0x{code:02x}"),
            Error::CommandTimeout => write!(f, "command did not complete in time"),
            Error::ConnectTimeout => write!(f, "connection was not established in time"),
            Error::LinkLost { reason } => write!(f, "link lost, disconnect reason 0x{reason:02x}"),
            Error::UnsupportedPhy(which) => write!(f, "PHY {which} is not supported by the controller"),
            Error::EncryptionFailed { status, enabled } => write!(
                f,
                "encryption failed: status=0x{status:02x} enabled={enabled}"
            ),
            Error::TransportBind(reason) => write!(f, "failed to bind HCI user channel: {reason}"),
            Error::Configuration(reason) => write!(f, "invalid configuration: {reason}"),
            Error::Cancelled => write!(f, "cancelled"),
            Error::Io(reason) => write!(f, "I/O error: {reason}"),
        }
    }
}

impl std::error::Error for Error {}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Io(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
