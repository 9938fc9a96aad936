//! The command dispatcher (spec §4.3): serializes command issuance,
//! waits for the matching Command-Complete or Command-Status, and hands
//! the caller the decoded return parameters (if any) once the router has
//! already folded them into [`crate::state::ControllerState`].

use crate::error::{Error, Result};
use crate::hci::codec::encode_command;
use crate::hci::opcodes::OpCode;
use crate::latch::Latch;
use crate::transport::Transport;
use std::sync::Mutex;
use tokio::sync::{Mutex as AsyncMutex, MutexGuard};

/// Outcome of a completed command: the status byte plus whatever return
/// parameters followed it (empty for Command-Status and for
/// parameterless Command-Complete replies).
#[derive(Debug, Clone, Default)]
pub struct CommandOutcome {
    pub status: u8,
    pub return_parameters: Vec<u8>,
}

struct Pending {
    opcode: u16,
    outcome: Option<CommandOutcome>,
}

/// `issue()` callers hold this guard for the lifetime of one in-flight
/// command; it is the capacity-1 mutex from spec §4.3.
pub struct CommandDispatcher {
    in_flight: AsyncMutex<()>,
    pending: Mutex<Option<Pending>>,
    cmd_end: Latch,
}

impl Default for CommandDispatcher {
    fn default() -> Self {
        CommandDispatcher {
            in_flight: AsyncMutex::new(()),
            pending: Mutex::new(None),
            cmd_end: Latch::new(),
        }
    }
}

impl CommandDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Issue a command and wait for its matching Command-Complete or
    /// Command-Status. At most one command is in flight on this
    /// dispatcher at a time (spec §3 invariant 1).
    pub async fn issue(&self, transport: &dyn Transport, opcode: OpCode, params: &[u8]) -> Result<CommandOutcome> {
        let _guard: MutexGuard<'_, ()> = self.in_flight.lock().await;
        *self.pending.lock().unwrap() = Some(Pending {
            opcode: opcode.as_u16(),
            outcome: None,
        });

        let frame = encode_command(opcode, params);
        transport.send(&frame).await?;
        self.cmd_end.wait().await;

        let outcome = self
            .pending
            .lock()
            .unwrap()
            .take()
            .and_then(|p| p.outcome)
            .ok_or(Error::CommandTimeout)?;
        Ok(outcome)
    }

    /// Called by the router for every Command-Complete. Returns `true` if
    /// the opcode matched the pending command (which it completes);
    /// otherwise the router keeps waiting, per spec §4.3: "opcode
    /// mismatch ... is ignored, not an error."
    pub fn complete_on_command_complete(&self, opcode: u16, status: u8, return_parameters: Vec<u8>) -> bool {
        self.complete(opcode, CommandOutcome { status, return_parameters })
    }

    /// Called by the router for every Command-Status. For LE-Create-Connection,
    /// status=0 here means "accepted, awaiting LE-Enhanced-Connection-Complete" —
    /// the dispatcher still completes without waiting for the connection
    /// itself (spec §4.3).
    pub fn complete_on_command_status(&self, opcode: u16, status: u8) -> bool {
        self.complete(opcode, CommandOutcome { status, return_parameters: Vec::new() })
    }

    fn complete(&self, opcode: u16, outcome: CommandOutcome) -> bool {
        let mut guard = self.pending.lock().unwrap();
        match guard.as_mut() {
            Some(pending) if pending.opcode == opcode => {
                pending.outcome = Some(outcome);
                drop(guard);
                self.cmd_end.set();
                true
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hci::opcodes::RESET;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct CountingTransport {
        sends: AtomicUsize,
    }

    #[async_trait]
    impl Transport for CountingTransport {
        async fn send(&self, _bytes: &[u8]) -> Result<()> {
            self.sends.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
        fn start(&mut self) -> Result<()> {
            Ok(())
        }
        fn stop(&mut self) {}
    }

    #[tokio::test]
    async fn issue_completes_on_matching_command_complete() {
        let dispatcher = Arc::new(CommandDispatcher::new());
        let transport = CountingTransport { sends: AtomicUsize::new(0) };

        let d2 = dispatcher.clone();
        let responder = tokio::spawn(async move {
            tokio::task::yield_now().await;
            assert!(d2.complete_on_command_complete(RESET.as_u16(), 0, vec![]));
        });

        let outcome = dispatcher.issue(&transport, RESET, &[]).await.unwrap();
        assert_eq!(outcome.status, 0);
        responder.await.unwrap();
    }

    #[tokio::test]
    async fn mismatched_opcode_does_not_complete() {
        let dispatcher = CommandDispatcher::new();
        *dispatcher.pending.lock().unwrap() = Some(Pending { opcode: RESET.as_u16(), outcome: None });
        assert!(!dispatcher.complete_on_command_complete(0x1234, 0, vec![]));
    }
}
