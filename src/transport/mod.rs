//! The transport adapter (spec §4.2): a uniform async interface over
//! whatever bidirectional byte-message channel carries HCI frames.
//! `bo-tie`'s own split between a generic interface trait (`HostInterface`)
//! and a concrete Linux backend (`hci::unix`) is the model this follows.

pub mod unix_channel;

use crate::error::Result;
use async_trait::async_trait;
use std::time::Instant;
use tokio::sync::mpsc;

/// One inbound frame, timestamped at the moment of receipt from the
/// underlying channel — not at the moment the router dequeues it (spec
/// §4.2, §9 Design Notes).
#[derive(Debug, Clone)]
pub struct InboundFrame {
    pub bytes: Vec<u8>,
    pub received_at: Instant,
}

/// Default bound for the reader-to-router queue. Chosen generously: the
/// reader thread timestamps on receipt, so a full queue only delays when
/// the router observes a frame, never its timestamp.
pub const INBOUND_QUEUE_CAPACITY: usize = 4096;

#[async_trait]
pub trait Transport: Send + Sync {
    /// Write a frame to the underlying channel. Completes once the
    /// underlying channel has accepted the write.
    async fn send(&self, bytes: &[u8]) -> Result<()>;

    /// Launch the background reader. Idempotent: calling `start` twice
    /// without an intervening `stop` is a logic error in the caller, not
    /// guarded against here.
    fn start(&mut self) -> Result<()>;

    /// Signal the background reader to terminate and join it. Idempotent;
    /// always safe to call from a cleanup path even if `start` was never
    /// called or already stopped (spec §4.8, §5 Cancellation).
    fn stop(&mut self);
}

/// Handle returned alongside a `Transport` for consuming inbound frames.
/// Kept separate from the trait object so callers can `tokio::select!`
/// on it directly.
pub type InboundReceiver = mpsc::Receiver<InboundFrame>;
