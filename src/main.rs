// Network & VPN State Orchestrator Daemon

use anyhow::{Context, Result};
use clap::Parser;
use netpanel::{
    config::load_config,
    geoip::GeoRefresher,
    interfaces::InterfaceResolver,
    raspap::RaspApClient,
    runner::CommandRunner,
    scheduler::Poller,
    state::StatusSnapshot,
    system::SystemProbe,
    vpn::VpnController,
    wifi::{Backends, WifiReader},
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;

#[derive(Parser)]
#[command(name = "netpaneld")]
#[command(about = "Network and VPN state orchestrator daemon", long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "/etc/netpanel/config.json")]
    config: PathBuf,
}

fn main() -> Result<()> {
    // Small fixed thread pool: 1 for the poll loop, 1 for process spawns
    // and HTTP requests.
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .thread_name("netpaneld")
        .thread_stack_size(2 * 1024 * 1024)
        .enable_time()
        .enable_io()
        .build()?;

    runtime.block_on(async_main())
}

async fn async_main() -> Result<()> {
    let args = Args::parse();

    // Config loading fails soft to defaults; only parsed nonsense aborts.
    let config = load_config(&args.config)
        .with_context(|| format!("Invalid config at {:?}", args.config))?;

    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(&config.log_level),
    )
    .init();

    log::info!("Starting netpaneld");
    log::info!("Poll interval: {}s", config.update_interval);
    log::info!("GeoIP interval: {}s", config.geoip_interval);
    log::info!("VPN profiles: {}", config.vpn_profiles.len());

    let runner = CommandRunner::new();

    let backends = Backends::probe();
    if !backends.any() {
        log::warn!("Neither nmcli nor wpa_cli found; Wi-Fi state will be empty");
    }

    let resolver = InterfaceResolver::new(&config.hostapd_conf);
    let wifi = WifiReader::new(runner.clone(), backends, &config.wpa_supplicant_conf);
    let vpn = Arc::new(VpnController::new(runner.clone(), &config.ovpn_dir));
    let geo = GeoRefresher::new(Duration::from_secs(config.geoip_interval));
    let system = SystemProbe::new(runner.clone());
    let raspap = RaspApClient::from_env();

    let (poller, mut rx) = Poller::new(&config, resolver, wifi, vpn, geo, system, raspap);

    let poll_handle = tokio::spawn(poller.run());

    let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate())
        .context("Failed to set up SIGTERM handler")?;
    let mut sigint = signal::unix::signal(signal::unix::SignalKind::interrupt())
        .context("Failed to set up SIGINT handler")?;

    log::info!("Daemon started successfully");

    loop {
        tokio::select! {
            _ = sigterm.recv() => {
                log::info!("Received SIGTERM");
                break;
            }
            _ = sigint.recv() => {
                log::info!("Received SIGINT");
                break;
            }
            changed = rx.changed() => {
                match changed {
                    Ok(()) => {
                        let snap = rx.borrow_and_update().clone();
                        log_snapshot(&snap);
                    }
                    Err(_) => {
                        // The poll loop dropped its sender; nothing left to do.
                        log::error!("Poll loop terminated unexpectedly");
                        anyhow::bail!("poll loop terminated, aborting for systemd restart");
                    }
                }
            }
        }
    }

    // Dropping the poll task also kills any in-flight child processes.
    poll_handle.abort();
    log::info!("Shutdown complete");

    Ok(())
}

fn log_snapshot(snap: &StatusSnapshot) {
    log::debug!(
        "Snapshot: ssid={:?} vpn={:?} networks={} clients={} geo={:?}",
        snap.wifi.connected_ssid,
        snap.vpn,
        snap.wifi.entries.len(),
        snap.connected_clients,
        snap.geo.as_ref().map(|g| g.display()),
    );
}
