//! A level-set, one-shot condition event.
//!
//! Spec §5: "`credits_available` signals are level-set so that a late
//! awaiter still observes the transition exactly once per event" and more
//! generally "the router sets state before signaling ... each signal is a
//! one-shot latch that the awaiter clears." `tokio::sync::Notify` alone is
//! edge-triggered: a `notify_one()` that lands before anyone calls
//! `notified()` is lost. Pairing it with an `AtomicBool` gives the latch
//! semantics the router/orchestrator handshake in `bo-tie`'s `HostInterface`
//! relies on (see `hci/unix/event.rs`'s waker bookkeeping), without the
//! manual-future machinery that predates stable `async`/`await`.

use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Notify;

#[derive(Debug, Default)]
pub struct Latch {
    set: AtomicBool,
    notify: Notify,
}

impl Latch {
    pub fn new() -> Self {
        Self {
            set: AtomicBool::new(false),
            notify: Notify::new(),
        }
    }

    /// Set the latch and wake any current or future waiter exactly once.
    pub fn set(&self) {
        self.set.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
        // Also cover a waiter that starts its wait in the gap between the
        // store above and this call.
        self.notify.notify_one();
    }

    /// Wait until the latch is set, then clear it (one-shot: the next
    /// `wait()` blocks again until `set()` is called anew).
    pub async fn wait(&self) {
        loop {
            if self.set.swap(false, Ordering::SeqCst) {
                return;
            }
            let notified = self.notify.notified();
            if self.set.load(Ordering::SeqCst) {
                continue;
            }
            notified.await;
        }
    }

    pub fn is_set(&self) -> bool {
        self.set.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn set_before_wait_is_observed() {
        let latch = Arc::new(Latch::new());
        latch.set();
        // Must not hang: the set() happened before wait() was called.
        latch.wait().await;
    }

    #[tokio::test]
    async fn wait_wakes_on_concurrent_set() {
        let latch = Arc::new(Latch::new());
        let waiter = {
            let latch = latch.clone();
            tokio::spawn(async move {
                latch.wait().await;
            })
        };
        tokio::task::yield_now().await;
        latch.set();
        waiter.await.unwrap();
    }

    #[tokio::test]
    async fn latch_is_cleared_after_wait() {
        let latch = Latch::new();
        latch.set();
        latch.wait().await;
        assert!(!latch.is_set());
    }
}
