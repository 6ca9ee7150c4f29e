#![forbid(unsafe_code)]

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

use upf_ebpf::loader::{decode_cp_notification, decode_no_neigh_notification};
use upf_ebpf::{UpfConfig, UpfLoader};
use upf_lib::config::{Config, PdrKey};
use upf_lib::telemetry::{
    init_metrics, init_tracing_with_otel, shutdown_tracing, start_observability_server, Collector,
};
use upf_lib::{load_from_path, ResolvedConfig};

#[derive(Parser, Debug)]
#[command(author, version, about = "5G UPF XDP datapath")]
struct Cli {
    /// Path to configuration TOML file
    #[arg(short, long, value_name = "FILE", default_value = "upf.toml")]
    config: PathBuf,
}

#[derive(Error, Debug)]
enum SeedError {
    #[error("invalid rule: {0}")]
    Invalid(#[from] upf_lib::error::ConfigError),
    #[error("BPF map unavailable: {0}")]
    Map(#[from] upf_ebpf::UpfError),
    #[error("failed to write map entry: {0}")]
    Insert(#[from] aya::maps::MapError),
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    // Config must load before tracing can be initialized from it; a load
    // failure here has nowhere to go but stderr.
    let resolved = match load_from_path(&cli.config) {
        Ok(r) => r,
        Err(err) => {
            eprintln!("failed to load configuration: {err}");
            std::process::exit(1);
        }
    };

    if let Err(err) = init_tracing_with_otel(
        resolved.config.logging.level.clone(),
        resolved.config.logging.show_target,
        resolved.config.telemetry.otel_log_level.clone(),
    ) {
        eprintln!("failed to initialize tracing: {err}");
        std::process::exit(1);
    }

    let result = run(resolved).await;
    if let Err(err) = &result {
        error!(%err, "upf exited with error");
    }
    shutdown_tracing();

    if result.is_err() {
        std::process::exit(1);
    }
}

async fn run(resolved: ResolvedConfig) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let ResolvedConfig {
        config,
        n3_ifindex,
        n6_ifindex,
    } = resolved;

    let loader_config = UpfConfig {
        n3_ifindex,
        n6_ifindex,
        n3_vlan: config.n3_vlan,
        n6_vlan: config.n6_vlan,
        masquerade: config.masquerade,
        flowact: config.flowact,
    };

    let mut loader =
        UpfLoader::load(&config.n3_interface, &config.n6_interface, loader_config)?;

    seed_tables(&mut loader, &config)?;

    let urr_ids: Vec<u32> = config.urrs.iter().map(|u| u.urr_id).collect();
    let loader = Arc::new(Mutex::new(loader));

    let (metrics, registry) = init_metrics()?;

    let mut tasks = Vec::new();

    if let Some(port) = config.telemetry.metrics_port {
        let registry = registry.clone();
        let loader = loader.clone();
        tasks.push(tokio::spawn(async move {
            if let Err(err) = start_observability_server(port, registry, loader).await {
                error!(%err, "observability server exited with error");
            }
        }));
    }

    let collector = Collector::new(loader.clone(), metrics, urr_ids);
    tasks.push(tokio::spawn(collector.run(Duration::from_secs(5))));

    tasks.push(tokio::spawn(drain_notifications(loader.clone())));

    info!(
        n3_interface = %config.n3_interface,
        n6_interface = %config.n6_interface,
        "upf running"
    );
    wait_for_shutdown().await;
    info!("shutdown signal received, stopping");

    for task in tasks {
        task.abort();
    }

    Ok(())
}

/// Seeds the PDR/FAR/QER tables from the static configuration. The control
/// plane is free to overwrite or add entries once the process is running;
/// this only gets the datapath pre-provisioned at load time.
fn seed_tables(loader: &mut UpfLoader, config: &Config) -> Result<(), SeedError> {
    let mut fars = loader.fars()?;
    for far in &config.fars {
        let info = far.to_info()?;
        fars.insert(far.far_id, info, 0)?;
    }

    let mut qers = loader.qers()?;
    for qer in &config.qers {
        qers.insert(qer.qer_id, qer.to_info(), 0)?;
    }

    let mut pdrs_uplink = loader.pdrs_uplink()?;
    let mut pdrs_downlink_ip4 = loader.pdrs_downlink_ip4()?;
    let mut pdrs_downlink_ip6 = loader.pdrs_downlink_ip6()?;

    for pdr in &config.pdrs {
        let info = pdr.to_info()?;
        match &pdr.key {
            PdrKey::Uplink { teid } => {
                pdrs_uplink.insert(*teid, info, 0)?;
            }
            PdrKey::DownlinkV4 { ue_addr } => {
                pdrs_downlink_ip4.insert(u32::from(*ue_addr), info, 0)?;
            }
            PdrKey::DownlinkV6 { ue_addr } => {
                pdrs_downlink_ip6.insert(ue_addr.octets(), info, 0)?;
            }
        }
    }

    Ok(())
}

/// Drains the control-plane notification and no-neighbor ring buffers on a
/// short poll interval. Both are fire-and-forget diagnostic channels: a
/// missed notification is surfaced again by ordinary traffic on the same
/// flow, so simple polling is enough and avoids juggling two `AsyncFd`
/// wakeups against one shared loader lock.
async fn drain_notifications(loader: Arc<Mutex<UpfLoader>>) {
    let mut ticker = tokio::time::interval(Duration::from_millis(20));
    loop {
        ticker.tick().await;
        let mut guard = loader.lock().await;

        if let Ok(mut ring) = guard.cp_notifications() {
            while let Some(item) = ring.next() {
                match decode_cp_notification(&item) {
                    Some(notif) => info!(?notif, "control-plane notification"),
                    None => warn!("malformed control-plane notification record"),
                }
            }
        }

        if let Ok(mut ring) = guard.no_neigh_notifications() {
            while let Some(item) = ring.next() {
                match decode_no_neigh_notification(&item) {
                    Some(notif) => info!(?notif, "no-neighbor notification"),
                    None => warn!("malformed no-neighbor notification record"),
                }
            }
        }
    }
}

async fn wait_for_shutdown() {
    let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
        .expect("failed to install SIGTERM handler");
    let mut sigint = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::interrupt())
        .expect("failed to install SIGINT handler");

    tokio::select! {
        _ = sigterm.recv() => {}
        _ = sigint.recv() => {}
    }
}
