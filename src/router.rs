//! The event router (spec §4.4): the single cooperative task that
//! consumes the inbound queue and dispatches decoded frames to the
//! dispatcher, the named signals, or the data verifier. The router is
//! the sole writer of [`crate::state::ControllerState`]; every signal it
//! sets happens after the state update it describes (spec §4.5, §5).

use crate::csvlog::PacketLogWriter;
use crate::datapump::Verifier;
use crate::dispatcher::CommandDispatcher;
use crate::error::{Error, Result};
use crate::hci::codec::{decode_frame, DecodedFrame};
use crate::hci::commands;
use crate::hci::events::{self, Event, LeSubevent};
use crate::hci::opcodes::LE_LTK_REQUEST_REPLY;
use crate::signals::Signals;
use crate::state::ControllerState;
use crate::transport::{InboundReceiver, Transport};
use log::{info, warn};
use std::sync::Arc;

/// Role this router plays, determining what it does with inbound ACL
/// frames (spec §4.4's dispatch table: "Forward to verifier (receiver)
/// or ignore (transmitter)").
pub enum AclSink {
    Verify { verifier: Arc<Verifier>, log: PacketLogWriter },
    Ignore,
}

pub struct EventRouter<'a> {
    transport: &'a dyn Transport,
    state: &'a ControllerState,
    dispatcher: &'a CommandDispatcher,
    signals: &'a Signals,
    ltk: [u8; 16],
    acl_sink: AclSink,
}

impl<'a> EventRouter<'a> {
    pub fn new(
        transport: &'a dyn Transport,
        state: &'a ControllerState,
        dispatcher: &'a CommandDispatcher,
        signals: &'a Signals,
        ltk: [u8; 16],
        acl_sink: AclSink,
    ) -> Self {
        EventRouter {
            transport,
            state,
            dispatcher,
            signals,
            ltk,
            acl_sink,
        }
    }

    /// Drain `inbound` until the channel closes or a fatal error is
    /// observed. Runs as the router's single cooperative task (spec §5).
    pub async fn run(&mut self, mut inbound: InboundReceiver) -> Result<()> {
        while let Some(frame) = inbound.recv().await {
            match decode_frame(&frame.bytes) {
                Ok(DecodedFrame::Event(raw)) => match events::parse_event(&raw) {
                    Ok(event) => self.handle_event(event, frame.received_at).await?,
                    Err(Error::MalformedFrame(reason)) => warn!("malformed event frame: {reason}"),
                    Err(e) => return Err(e),
                },
                Ok(DecodedFrame::Acl(acl)) => {
                    self.handle_acl(acl, frame.received_at).await?;
                }
                Ok(DecodedFrame::Unknown(packet_type)) => {
                    warn!("ignoring frame with unknown packet type 0x{packet_type:02x}");
                }
                Err(Error::MalformedFrame(reason)) => warn!("malformed inbound frame: {reason}"),
                Err(e) => return Err(e),
            }
            if self.state.is_fatal() {
                return Ok(());
            }
        }
        Ok(())
    }

    async fn handle_event(&mut self, event: Event, received_at: std::time::Instant) -> Result<()> {
        self.state.log_event(event.clone());
        match event {
            Event::CmdComplete(cc) => {
                self.state.record_command_status(0, cc.opcode);
                self.dispatcher
                    .complete_on_command_complete(cc.opcode, return_status_byte(&cc.return_parameters), cc.return_parameters);
            }
            Event::CmdStatus(cs) => {
                self.state.record_command_status(cs.status, cs.opcode);
                self.dispatcher.complete_on_command_status(cs.opcode, cs.status);
            }
            Event::EncryptionChange(ec) => {
                if ec.status == 0 && ec.encryption_enabled != 0 {
                    self.signals.encryption_enabled.set();
                } else {
                    self.state.mark_fatal();
                    return Err(Error::EncryptionFailed { status: ec.status, enabled: ec.encryption_enabled });
                }
            }
            Event::NumberOfCompletedPackets(entries) => {
                for entry in entries {
                    self.state.add_completed_packets(entry.num_completed, received_at);
                }
                self.signals.credits_available.set();
            }
            Event::Disconnect(dc) => {
                self.state.clear_connection_handle();
                if dc.reason == events::REASON_CONNECTION_TIMEOUT || dc.reason == events::REASON_CONNECTION_FAILED_TO_BE_ESTABLISHED {
                    self.state.mark_fatal();
                    return Err(Error::LinkLost { reason: dc.reason });
                }
                info!("disconnected, reason=0x{:02x}, status=0x{:02x}", dc.reason, dc.status);
            }
            Event::LeMeta(sub) => self.handle_le_subevent(sub).await?,
            Event::Other { event_code, .. } => {
                warn!("unhandled event code 0x{event_code:02x}");
            }
        }
        Ok(())
    }

    async fn handle_le_subevent(&mut self, sub: LeSubevent) -> Result<()> {
        match sub {
            LeSubevent::EnhancedConnectionComplete(ecc) => {
                self.state.set_connection_handle(ecc.connection_handle);
                self.signals.connected.set();
            }
            LeSubevent::DataLengthChange(dlc) => {
                let mut link = self.state.link.lock().unwrap();
                link.max_tx_octets = dlc.max_tx_octets;
                link.max_tx_time = dlc.max_tx_time;
                link.max_rx_octets = dlc.max_rx_octets;
                link.max_rx_time = dlc.max_rx_time;
                drop(link);
                self.signals.data_len_updated.set();
            }
            LeSubevent::PhyUpdateComplete(puc) => {
                let mut link = self.state.link.lock().unwrap();
                link.current_phy.tx = puc.tx_phy;
                link.current_phy.rx = puc.rx_phy;
                drop(link);
                self.signals.phy_updated.set();
            }
            LeSubevent::ChannelSelectionAlgorithm { .. } => {
                // Recorded implicitly via the EventLog the caller may keep; no waiter (spec §4.4).
            }
            LeSubevent::LtkRequest(req) => {
                // Fire-and-forget: reply with the preconfigured LTK without
                // waiting on the dispatcher (spec §4.4).
                let params = commands::le_ltk_request_reply(req.connection_handle, &self.ltk);
                let frame = crate::hci::codec::encode_command(LE_LTK_REQUEST_REPLY, &params);
                self.transport.send(&frame).await?;
            }
            LeSubevent::Other { subevent_code, .. } => {
                warn!("unhandled LE subevent code 0x{subevent_code:02x}");
            }
        }
        Ok(())
    }

    async fn handle_acl(&mut self, acl: crate::hci::codec::AclFrame, received_at: std::time::Instant) -> Result<()> {
        use crate::hci::codec::PB_FLAG_START_OF_L2CAP_PDU;
        if acl.pb_flag != PB_FLAG_START_OF_L2CAP_PDU {
            return Ok(());
        }
        match &mut self.acl_sink {
            AclSink::Ignore => {}
            AclSink::Verify { verifier, log } => {
                if verifier.process_l2cap_payload(&acl.payload, received_at, log)? {
                    self.signals.recv_data_finish.set();
                }
            }
        }
        Ok(())
    }
}

fn return_status_byte(return_parameters: &[u8]) -> u8 {
    return_parameters.first().copied().unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hci::codec::{encode_l2cap, AclFrame};
    use async_trait::async_trait;

    struct NullTransport;

    #[async_trait]
    impl Transport for NullTransport {
        async fn send(&self, _bytes: &[u8]) -> Result<()> {
            Ok(())
        }
        fn start(&mut self) -> Result<()> {
            Ok(())
        }
        fn stop(&mut self) {}
    }

    #[tokio::test]
    async fn enhanced_connection_complete_sets_handle_and_signal() {
        let state = ControllerState::new();
        let dispatcher = CommandDispatcher::new();
        let signals = Signals::new();
        let transport = NullTransport;
        let mut router = EventRouter::new(&transport, &state, &dispatcher, &signals, [0u8; 16], AclSink::Ignore);

        let event = Event::LeMeta(LeSubevent::EnhancedConnectionComplete(events::EnhancedConnectionComplete {
            status: 0,
            connection_handle: 0x0040,
            role: 0,
            peer_address_type: 0,
            peer_address: crate::addr::DeviceAddress::ZERO,
        }));
        router.handle_event(event, std::time::Instant::now()).await.unwrap();
        assert_eq!(state.connection_handle(), Some(0x0040));
        assert!(signals.connected.is_set());
    }

    #[tokio::test]
    async fn non_start_of_pdu_acl_is_ignored() {
        let state = ControllerState::new();
        let dispatcher = CommandDispatcher::new();
        let signals = Signals::new();
        let transport = NullTransport;
        let mut router = EventRouter::new(&transport, &state, &dispatcher, &signals, [0u8; 16], AclSink::Ignore);
        let acl = AclFrame { handle: 1, pb_flag: 0b01, bc_flag: 0, payload: encode_l2cap(0x0044, &[0u8; 4]) };
        router.handle_acl(acl, std::time::Instant::now()).await.unwrap();
        assert!(!signals.recv_data_finish.is_set());
    }

    #[tokio::test]
    async fn disconnect_with_connection_timeout_is_fatal() {
        let state = ControllerState::new();
        let dispatcher = CommandDispatcher::new();
        let signals = Signals::new();
        let transport = NullTransport;
        let mut router = EventRouter::new(&transport, &state, &dispatcher, &signals, [0u8; 16], AclSink::Ignore);
        let event = Event::Disconnect(events::DisconnectionComplete {
            status: 0,
            connection_handle: 0x0040,
            reason: events::REASON_CONNECTION_TIMEOUT,
        });
        let result = router.handle_event(event, std::time::Instant::now()).await;
        assert!(matches!(result, Err(Error::LinkLost { reason: events::REASON_CONNECTION_TIMEOUT })));
        assert!(state.is_fatal());
    }
}
