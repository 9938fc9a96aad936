//! Named condition events the orchestrator suspends on and the router
//! sets (spec §4.4, §5, §9). Each is a one-shot [`Latch`]: the router
//! sets state in [`crate::state::ControllerState`] before signaling, and
//! the orchestrator's wait clears the latch on return, so a late waiter
//! still observes the transition exactly once.

use crate::latch::Latch;

#[derive(Debug, Default)]
pub struct Signals {
    pub connected: Latch,
    pub data_len_updated: Latch,
    pub phy_updated: Latch,
    pub encryption_enabled: Latch,
    pub credits_available: Latch,
    pub recv_data_finish: Latch,
    pub cancelled: Latch,
}

impl Signals {
    pub fn new() -> Self {
        Self::default()
    }
}
