// Fixed-period polling scheduler

//! Polling scheduler
//!
//! One control loop drives everything: each tick re-resolves interface
//! roles, reads Wi-Fi state, probes the VPN process, gathers system
//! readings, and publishes the whole snapshot over a watch channel. Tick
//! work runs inline in the loop, so a slow tick can never overlap the next
//! one (queue-depth-one by construction); external tools are the only
//! blocking operations and each carries its own timeout.
//!
//! Connectivity transitions are detected by diffing a coarse signature
//! between ticks and fire the debounced geolocation trigger; a second,
//! longer timer fires the periodic trigger independently.

use crate::config::Config;
use crate::geoip::{GeoRefresher, RefreshReason};
use crate::interfaces::InterfaceResolver;
use crate::raspap::RaspApClient;
use crate::state::{StatusSnapshot, VpnState};
use crate::system::SystemProbe;
use crate::vpn::VpnController;
use crate::wifi::WifiReader;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::time::{interval, MissedTickBehavior};

/// Coarse connectivity signature: Wi-Fi association presence plus the VPN
/// state. A change between ticks is what counts as a state transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnSignature {
    pub wifi_connected: bool,
    pub vpn: VpnState,
}

impl ConnSignature {
    pub fn of(snapshot: &StatusSnapshot) -> Self {
        Self {
            wifi_connected: snapshot.wifi.connected_ssid.is_some(),
            vpn: snapshot.vpn.clone(),
        }
    }
}

/// The poll loop and everything it owns.
pub struct Poller {
    update_interval: Duration,
    geoip_interval: Duration,
    resolver: InterfaceResolver,
    wifi: WifiReader,
    vpn: Arc<VpnController>,
    geo: GeoRefresher,
    system: SystemProbe,
    raspap: RaspApClient,
    tx: watch::Sender<StatusSnapshot>,
    prev_sig: Option<ConnSignature>,
}

impl Poller {
    /// Wire up a poller from its components. Returns the receiver half the
    /// presentation layer subscribes to.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: &Config,
        mut resolver: InterfaceResolver,
        wifi: WifiReader,
        vpn: Arc<VpnController>,
        geo: GeoRefresher,
        system: SystemProbe,
        raspap: RaspApClient,
    ) -> (Self, watch::Receiver<StatusSnapshot>) {
        let initial = StatusSnapshot::initial(resolver.resolve());
        let (tx, rx) = watch::channel(initial);

        (
            Self {
                update_interval: Duration::from_secs(config.update_interval),
                geoip_interval: Duration::from_secs(config.geoip_interval),
                resolver,
                wifi,
                vpn,
                geo,
                system,
                raspap,
                tx,
                prev_sig: None,
            },
            rx,
        )
    }

    /// Run one poll cycle and publish the resulting snapshot.
    pub async fn tick(&mut self) {
        let roles = self.resolver.resolve();

        let wifi = self.wifi.read(&roles).await;
        let vpn = self.vpn.probe().await;
        let system = self.system.read(&roles, self.resolver.ap_ssid()).await;
        let connected_clients = self.raspap.active_clients(&roles.ap_iface).await;

        let snapshot = StatusSnapshot {
            roles,
            wifi,
            vpn,
            geo: self.geo.current().cloned(),
            system,
            connected_clients,
        };

        let sig = ConnSignature::of(&snapshot);
        let changed = self.prev_sig.as_ref() != Some(&sig);
        if changed && self.prev_sig.is_some() {
            log::info!(
                "Connectivity changed: wifi={}, vpn={:?}",
                sig.wifi_connected,
                sig.vpn
            );
            self.geo
                .maybe_refresh(RefreshReason::StateChange, Instant::now())
                .await;
        }
        self.prev_sig = Some(sig);

        // Pick up a location the state-change trigger may just have fetched.
        let snapshot = StatusSnapshot {
            geo: self.geo.current().cloned(),
            ..snapshot
        };
        self.tx.send_replace(snapshot);
    }

    /// Drive the loop until the future is dropped (the daemon selects this
    /// against its shutdown signals). Fires the one-time startup
    /// geolocation trigger, then alternates between the poll tick and the
    /// periodic geolocation timer.
    pub async fn run(mut self) {
        let mut tick = interval(self.update_interval);
        // A slow tick should push the next one out, not cause a burst.
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut geo_tick = interval(self.geoip_interval);
        geo_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // interval() fires immediately; the startup trigger covers that.
        geo_tick.reset();

        self.geo
            .maybe_refresh(RefreshReason::Startup, Instant::now())
            .await;

        loop {
            tokio::select! {
                _ = tick.tick() => {
                    self.tick().await;
                }
                _ = geo_tick.tick() => {
                    if self
                        .geo
                        .maybe_refresh(RefreshReason::Periodic, Instant::now())
                        .await
                        .is_some()
                    {
                        self.tx.send_modify(|snap| snap.geo = self.geo.current().cloned());
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interfaces::InterfaceRoles;
    use crate::runner::CommandRunner;
    use crate::state::{VpnProfile, WifiState};
    use crate::wifi::Backends;

    fn snapshot(wifi_connected: bool, vpn: VpnState) -> StatusSnapshot {
        let mut snap = StatusSnapshot::initial(InterfaceRoles::default());
        snap.wifi = WifiState {
            connected_ssid: wifi_connected.then(|| "HomeNet".to_string()),
            entries: Vec::new(),
            backends_unavailable: false,
        };
        snap.vpn = vpn;
        snap
    }

    fn profile() -> VpnProfile {
        VpnProfile {
            display_name: "Home".to_string(),
            file: "home.ovpn".to_string(),
        }
    }

    #[test]
    fn test_signature_tracks_wifi_presence() {
        let a = ConnSignature::of(&snapshot(false, VpnState::Disconnected));
        let b = ConnSignature::of(&snapshot(true, VpnState::Disconnected));
        assert_ne!(a, b);
    }

    #[test]
    fn test_signature_ignores_ssid_identity() {
        // The signature is about presence, not which network: roaming from
        // one SSID to another does not count as a transition.
        let mut one = snapshot(true, VpnState::Disconnected);
        let mut two = snapshot(true, VpnState::Disconnected);
        one.wifi.connected_ssid = Some("A".to_string());
        two.wifi.connected_ssid = Some("B".to_string());
        assert_eq!(ConnSignature::of(&one), ConnSignature::of(&two));
    }

    #[test]
    fn test_signature_tracks_vpn_transitions() {
        let disconnected = ConnSignature::of(&snapshot(true, VpnState::Disconnected));
        let connecting = ConnSignature::of(&snapshot(true, VpnState::Connecting(profile())));
        let connected = ConnSignature::of(&snapshot(true, VpnState::Connected(profile())));
        assert_ne!(disconnected, connecting);
        assert_ne!(connecting, connected);
        assert_ne!(disconnected, connected);
    }

    #[tokio::test]
    async fn test_tick_publishes_snapshot_with_degraded_sources() {
        // No backends, no API key, no hostapd file: a tick still publishes
        // a valid (empty) snapshot rather than failing.
        let runner = CommandRunner::new();
        let config = Config::default();
        let resolver = InterfaceResolver::new("/nonexistent/hostapd.conf");
        let wifi = WifiReader::new(
            runner.clone(),
            Backends {
                nmcli: false,
                wpa_cli: false,
            },
            "/nonexistent/wpa_supplicant.conf",
        );
        let vpn = Arc::new(VpnController::new(runner.clone(), "/tmp"));
        let geo = GeoRefresher::with_url(
            Duration::from_secs(300),
            "http://127.0.0.1:9/".to_string(),
        );
        let system = SystemProbe::new(runner.clone());
        let raspap = RaspApClient::new("http://127.0.0.1:9".to_string(), None);

        let (mut poller, rx) =
            Poller::new(&config, resolver, wifi, vpn, geo, system, raspap);
        poller.tick().await;

        let snap = rx.borrow().clone();
        assert_eq!(snap.roles, InterfaceRoles::default());
        assert!(snap.wifi.backends_unavailable);
        assert!(snap.wifi.entries.is_empty());
        assert_eq!(snap.connected_clients, 0);
    }

    #[tokio::test]
    async fn test_first_tick_does_not_fire_state_change() {
        // prev_sig is None on the first tick; establishing the baseline is
        // not a transition.
        let runner = CommandRunner::new();
        let config = Config::default();
        let wifi = WifiReader::new(
            runner.clone(),
            Backends {
                nmcli: false,
                wpa_cli: false,
            },
            "/nonexistent/wpa_supplicant.conf",
        );
        let vpn = Arc::new(VpnController::new(runner.clone(), "/tmp"));
        let geo = GeoRefresher::with_url(
            Duration::from_secs(300),
            "http://127.0.0.1:9/".to_string(),
        );

        let (mut poller, _rx) = Poller::new(
            &config,
            InterfaceResolver::new("/nonexistent/hostapd.conf"),
            wifi,
            vpn,
            geo,
            SystemProbe::new(runner.clone()),
            RaspApClient::new("http://127.0.0.1:9".to_string(), None),
        );

        assert!(poller.prev_sig.is_none());
        poller.tick().await;
        assert!(poller.prev_sig.is_some());
        // A failed state-change fetch would have seeded an error marker;
        // none may exist because no trigger fired.
        assert!(poller.geo.current().is_none());
    }
}
