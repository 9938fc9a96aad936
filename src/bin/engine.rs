//! Thin two-role demo binary wiring transport, dispatcher, router, and
//! orchestrator together. CLI parsing and YAML loading are deliberately
//! minimal (spec §1: out of scope beyond the data this struct reads),
//! grounded in `original_source/tools/hci_throughput/hci_device.py`'s
//! `main()`/`async_main_rx`/`async_main_tx` and `bo-tie`'s own
//! `connect-master.rs`/`connect-slave.rs` demos.

use ble_hci_throughput::config::{Config, Init};
use ble_hci_throughput::csvlog::PacketLogWriter;
use ble_hci_throughput::datapump::{fingerprint_constant, Verifier};
use ble_hci_throughput::dispatcher::CommandDispatcher;
use ble_hci_throughput::orchestrator::Engine;
use ble_hci_throughput::router::{AclSink, EventRouter};
use ble_hci_throughput::signals::Signals;
use ble_hci_throughput::state::ControllerState;
use ble_hci_throughput::transport::unix_channel::UnixChannelTransport;
use ble_hci_throughput::transport::Transport;
use std::sync::Arc;

fn usage() -> ! {
    eprintln!("usage: engine <rx|tx> <init.yaml> <config.yaml>");
    std::process::exit(2);
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    env_logger::init();

    let mut args = std::env::args().skip(1);
    let role = args.next().unwrap_or_else(|| usage());
    let init_path = args.next().unwrap_or_else(|| usage());
    let config_path = args.next().unwrap_or_else(|| usage());

    if let Err(e) = run(&role, &init_path, &config_path).await {
        log::error!("fatal: {e}");
        std::process::exit(1);
    }
}

async fn run(role: &str, init_path: &str, config_path: &str) -> ble_hci_throughput::Result<()> {
    let init_yaml = std::fs::read_to_string(init_path)?;
    let config_yaml = std::fs::read_to_string(config_path)?;
    let init_cfg = Init::from_yaml_str(&init_yaml)
        .map_err(|e| ble_hci_throughput::Error::Configuration(format!("init.yaml: {e}")))?;
    let cfg = Config::from_yaml_str(&config_yaml)
        .map_err(|e| ble_hci_throughput::Error::Configuration(format!("config.yaml: {e}")))?;

    let device_index: u16 = init_cfg
        .dev_index
        .trim_start_matches("hci")
        .parse()
        .map_err(|_| ble_hci_throughput::Error::Configuration(format!("bad dev_index: {}", init_cfg.dev_index)))?;

    let (mut transport, inbound) = UnixChannelTransport::open(device_index)?;
    transport.start()?;

    let state = ControllerState::new();
    let dispatcher = CommandDispatcher::new();
    let signals = Signals::new();
    let ltk = cfg.ltk_bytes()?;

    let engine = Engine {
        transport: &transport,
        state: &state,
        dispatcher: &dispatcher,
        signals: &signals,
    };

    let result = match role {
        "rx" => run_receiver(&engine, &init_cfg, &cfg, ltk, inbound).await,
        "tx" => run_transmitter(&engine, &init_cfg, &cfg, ltk, inbound).await,
        _ => usage(),
    };

    transport.stop();
    result
}

async fn run_receiver(
    engine: &Engine<'_>,
    init_cfg: &Init,
    cfg: &Config,
    ltk: [u8; 16],
    inbound: ble_hci_throughput::transport::InboundReceiver,
) -> ble_hci_throughput::Result<()> {
    let fingerprint = fingerprint_constant(cfg.num_of_bytes_to_send);
    let verifier = Arc::new(Verifier::new(fingerprint, cfg.num_of_packets_to_send));
    let log = PacketLogWriter::create("tp_receiver.csv")?;

    let mut router = EventRouter::new(
        engine.transport,
        engine.state,
        engine.dispatcher,
        engine.signals,
        ltk,
        AclSink::Verify { verifier: verifier.clone(), log },
    );

    let router_task = async { router.run(inbound).await };
    let orchestrator_task = async {
        engine.init(init_cfg, cfg).await?;
        engine.run_receiver(init_cfg, cfg).await
    };

    tokio::select! {
        r = router_task => r,
        r = orchestrator_task => r,
    }?;

    log::info!("receiver done: valid_recv_data={}", verifier.valid_recv_data());
    Ok(())
}

async fn run_transmitter(
    engine: &Engine<'_>,
    init_cfg: &Init,
    cfg: &Config,
    ltk: [u8; 16],
    inbound: ble_hci_throughput::transport::InboundReceiver,
) -> ble_hci_throughput::Result<()> {
    let mut router = EventRouter::new(engine.transport, engine.state, engine.dispatcher, engine.signals, ltk, AclSink::Ignore);
    let log = PacketLogWriter::create("tp_transmitter.csv")?;

    let router_task = async { router.run(inbound).await };
    let orchestrator_task = async {
        engine.init(init_cfg, cfg).await?;
        engine.run_transmitter(init_cfg, cfg, ltk, log).await
    };

    let sent = tokio::select! {
        r = router_task => { r?; 0 }
        r = orchestrator_task => r?,
    };

    log::info!("transmitter done: sent_packets_counter={sent}");
    Ok(())
}
