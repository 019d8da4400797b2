// Wi-Fi state reader: nmcli + wpa_cli reconciliation

//! Wi-Fi state reading and reconciliation
//!
//! Queries two independent backends (NetworkManager's `nmcli` and the
//! supplicant's `wpa_cli`) for saved networks, live scan results, and the
//! active association, then merges them into one saved/in-range view.
//! Either backend failing degrades to an empty contribution from that
//! source; the read itself never fails.
//!
//! The backend mix is probed once at startup and kept, instead of
//! re-probing each poll. Scans are serialized through a mutex because the
//! radio is a shared, stateful resource; concurrent scans against the same
//! interface commonly fail or return stale results.

use crate::interfaces::InterfaceRoles;
use crate::runner::{CommandRunner, RunnerError};
use crate::state::{ScanEntry, WifiState};
use anyhow::{Context, Result};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::Mutex;

/// wpa_cli scan results are polled a few times while the radio settles.
const WPA_SCAN_ATTEMPTS: u32 = 4;
const WPA_SCAN_SETTLE: Duration = Duration::from_millis(800);

const SCAN_TIMEOUT: Duration = Duration::from_secs(10);
const QUERY_TIMEOUT: Duration = Duration::from_secs(6);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(35);

/// Which scan/association backends exist on this host.
///
/// Determined once at startup; the chosen mix stays fixed for the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backends {
    pub nmcli: bool,
    pub wpa_cli: bool,
}

impl Backends {
    /// Probe PATH for the two backend CLIs.
    pub fn probe() -> Self {
        let backends = Self {
            nmcli: crate::runner::has_tool("nmcli"),
            wpa_cli: crate::runner::has_tool("wpa_cli"),
        };
        log::info!(
            "Wi-Fi backends: nmcli={}, wpa_cli={}",
            backends.nmcli,
            backends.wpa_cli
        );
        backends
    }

    pub fn any(&self) -> bool {
        self.nmcli || self.wpa_cli
    }
}

/// Convert a dBm reading to the 0-100 scale nmcli reports, so both
/// backends merge in one unit space.
pub fn dbm_to_percent(dbm: i32) -> u8 {
    (2 * (dbm + 100)).clamp(0, 100) as u8
}

/// Reads and reconciles Wi-Fi state from the available backends.
pub struct WifiReader {
    runner: CommandRunner,
    backends: Backends,
    wpa_conf_path: PathBuf,
    scan_lock: Mutex<()>,
}

impl WifiReader {
    pub fn new<P: AsRef<Path>>(runner: CommandRunner, backends: Backends, wpa_conf: P) -> Self {
        Self {
            runner,
            backends,
            wpa_conf_path: wpa_conf.as_ref().to_path_buf(),
            scan_lock: Mutex::new(()),
        }
    }

    /// Produce the current Wi-Fi view for the client interface.
    ///
    /// An empty entry set is valid output; only the total absence of both
    /// backends is flagged on the returned state.
    pub async fn read(&self, roles: &InterfaceRoles) -> WifiState {
        if !self.backends.any() {
            return WifiState {
                connected_ssid: None,
                entries: Vec::new(),
                backends_unavailable: true,
            };
        }

        let iface = roles.client_iface.as_str();
        let saved = self.saved_networks(iface).await;
        let scan = self.scan(iface).await;
        let connected_ssid = self.connected_ssid(iface).await;

        WifiState {
            connected_ssid,
            entries: build_entries(&saved, &scan),
            backends_unavailable: false,
        }
    }

    /// Saved-network set: supplicant list, the supplicant config file, and
    /// NetworkManager's stored Wi-Fi connections, unioned.
    async fn saved_networks(&self, iface: &str) -> HashSet<String> {
        let mut saved = HashSet::new();

        if self.backends.wpa_cli {
            match self
                .runner
                .run("wpa_cli", &["-i", iface, "list_networks"], true, QUERY_TIMEOUT)
                .await
            {
                Ok(out) if out.success() => {
                    saved.extend(parse_wpa_list_networks(&out.stdout).into_iter().map(|(_, s)| s));
                }
                Ok(out) => log::debug!("wpa_cli list_networks failed: {}", out.stderr.trim()),
                Err(e) => log::debug!("wpa_cli list_networks unavailable: {}", e),
            }
        }

        if let Ok(content) = std::fs::read_to_string(&self.wpa_conf_path) {
            saved.extend(parse_wpa_supplicant_conf(&content));
        }

        if self.backends.nmcli {
            saved.extend(self.nmcli_saved_connections().await);
        }

        saved
    }

    async fn nmcli_saved_connections(&self) -> HashSet<String> {
        let mut ssids = HashSet::new();
        let out = match self
            .runner
            .run(
                "nmcli",
                &["-t", "-f", "NAME,TYPE", "connection", "show"],
                false,
                QUERY_TIMEOUT,
            )
            .await
        {
            Ok(out) if out.success() => out,
            Ok(out) => {
                log::debug!("nmcli connection show failed: {}", out.stderr.trim());
                return ssids;
            }
            Err(e) => {
                log::debug!("nmcli connection show unavailable: {}", e);
                return ssids;
            }
        };

        for name in parse_nmcli_wifi_connections(&out.stdout) {
            // The stored connection name is not necessarily the SSID.
            match self
                .runner
                .run(
                    "nmcli",
                    &["-s", "-g", "802-11-wireless.ssid", "connection", "show", &name],
                    false,
                    QUERY_TIMEOUT,
                )
                .await
            {
                Ok(out) => {
                    if let Some(ssid) = out.stdout_trimmed() {
                        ssids.insert(ssid.to_string());
                    }
                }
                Err(e) => log::debug!("nmcli ssid lookup for '{}' failed: {}", name, e),
            }
        }
        ssids
    }

    /// Live scan from every available backend, merged with the optimistic
    /// max-signal rule.
    async fn scan(&self, iface: &str) -> HashMap<String, u8> {
        let _guard = self.scan_lock.lock().await;

        let mut merged = HashMap::new();
        if self.backends.nmcli {
            merge_scan(&mut merged, self.scan_nmcli(iface).await);
        }
        if self.backends.wpa_cli {
            merge_scan(&mut merged, self.scan_wpa(iface).await);
        }
        merged
    }

    async fn scan_nmcli(&self, iface: &str) -> HashMap<String, u8> {
        // Rescan failures are non-fatal; the list may simply be cached.
        if let Err(e) = self
            .runner
            .run(
                "nmcli",
                &["device", "wifi", "rescan", "ifname", iface],
                false,
                QUERY_TIMEOUT,
            )
            .await
        {
            log::debug!("nmcli rescan failed: {}", e);
        }

        match self
            .runner
            .run(
                "nmcli",
                &[
                    "-t", "--escape", "no", "-f", "SSID,SIGNAL,SECURITY", "device", "wifi",
                    "list", "ifname", iface,
                ],
                false,
                SCAN_TIMEOUT,
            )
            .await
        {
            Ok(out) if out.success() => parse_nmcli_scan(&out.stdout),
            Ok(out) => {
                log::debug!("nmcli wifi list failed: {}", out.stderr.trim());
                HashMap::new()
            }
            Err(e) => {
                log::debug!("nmcli wifi list unavailable: {}", e);
                HashMap::new()
            }
        }
    }

    async fn scan_wpa(&self, iface: &str) -> HashMap<String, u8> {
        if let Err(e) = self
            .runner
            .run("wpa_cli", &["-i", iface, "scan"], true, QUERY_TIMEOUT)
            .await
        {
            log::debug!("wpa_cli scan trigger failed: {}", e);
            return HashMap::new();
        }

        for _ in 0..WPA_SCAN_ATTEMPTS {
            tokio::time::sleep(WPA_SCAN_SETTLE).await;
            match self
                .runner
                .run("wpa_cli", &["-i", iface, "scan_results"], true, SCAN_TIMEOUT)
                .await
            {
                Ok(out) if out.success() => {
                    let results = parse_wpa_scan_results(&out.stdout);
                    if !results.is_empty() {
                        return results;
                    }
                }
                Ok(out) => log::debug!("wpa_cli scan_results failed: {}", out.stderr.trim()),
                Err(e) => log::debug!("wpa_cli scan_results unavailable: {}", e),
            }
        }
        HashMap::new()
    }

    /// Active association on the client interface. When both backends
    /// answer, nmcli is authoritative.
    async fn connected_ssid(&self, iface: &str) -> Option<String> {
        if self.backends.nmcli {
            if let Ok(out) = self
                .runner
                .run(
                    "nmcli",
                    &[
                        "-t", "--escape", "no", "-f", "ACTIVE,SSID", "device", "wifi", "list",
                        "ifname", iface,
                    ],
                    false,
                    QUERY_TIMEOUT,
                )
                .await
            {
                if out.success() {
                    if let Some(ssid) = parse_nmcli_active_ssid(&out.stdout) {
                        return Some(ssid);
                    }
                }
            }
        }

        if self.backends.wpa_cli {
            if let Ok(out) = self
                .runner
                .run("wpa_cli", &["-i", iface, "status"], true, QUERY_TIMEOUT)
                .await
            {
                if out.success() {
                    return parse_wpa_status_ssid(&out.stdout);
                }
            }
        }

        None
    }

    /// Connect the client interface to an already-saved network.
    ///
    /// Tries the supplicant select/enable/save path first, then falls back
    /// to `nmcli device wifi connect` when nmcli is present.
    pub async fn connect_saved(&self, roles: &InterfaceRoles, ssid: &str) -> Result<()> {
        let iface = roles.client_iface.as_str();

        if self.backends.wpa_cli && self.connect_wpa(iface, ssid).await? {
            return Ok(());
        }

        if self.backends.nmcli {
            self.runner
                .run_checked(
                    "nmcli",
                    &["device", "wifi", "connect", ssid, "ifname", iface],
                    true,
                    CONNECT_TIMEOUT,
                )
                .await
                .with_context(|| format!("nmcli connect to '{}' failed", ssid))?;
            return Ok(());
        }

        anyhow::bail!("'{}' is not a saved network on any backend", ssid)
    }

    async fn connect_wpa(&self, iface: &str, ssid: &str) -> Result<bool, RunnerError> {
        let out = self
            .runner
            .run("wpa_cli", &["-i", iface, "list_networks"], true, QUERY_TIMEOUT)
            .await?;
        if !out.success() {
            return Ok(false);
        }

        let Some(id) = parse_wpa_list_networks(&out.stdout)
            .into_iter()
            .find(|(_, s)| s == ssid)
            .map(|(id, _)| id)
        else {
            return Ok(false);
        };

        self.runner
            .run("wpa_cli", &["-i", iface, "select_network", &id], true, QUERY_TIMEOUT)
            .await?;
        self.runner
            .run("wpa_cli", &["-i", iface, "enable_network", &id], true, QUERY_TIMEOUT)
            .await?;
        self.runner
            .run("wpa_cli", &["-i", iface, "save_config"], true, QUERY_TIMEOUT)
            .await?;
        Ok(true)
    }

    /// Disconnect the client interface and flush its addresses.
    /// Best-effort: every step tolerates an already-disconnected state.
    pub async fn disconnect(&self, roles: &InterfaceRoles) {
        let iface = roles.client_iface.as_str();

        if self.backends.nmcli {
            if let Err(e) = self
                .runner
                .run(
                    "nmcli",
                    &["device", "disconnect", iface],
                    true,
                    QUERY_TIMEOUT,
                )
                .await
            {
                log::debug!("nmcli device disconnect failed: {}", e);
            }
        } else if self.backends.wpa_cli {
            if let Err(e) = self.disconnect_wpa(iface).await {
                log::debug!("wpa_cli disconnect failed: {}", e);
            }
        }

        if let Err(e) = self
            .runner
            .run("ip", &["addr", "flush", "dev", iface], true, QUERY_TIMEOUT)
            .await
        {
            log::debug!("ip addr flush failed: {}", e);
        }
    }

    async fn disconnect_wpa(&self, iface: &str) -> Result<(), RunnerError> {
        self.runner
            .run("wpa_cli", &["-i", iface, "disconnect"], true, QUERY_TIMEOUT)
            .await?;

        let out = self
            .runner
            .run("wpa_cli", &["-i", iface, "list_networks"], true, QUERY_TIMEOUT)
            .await?;
        if out.success() {
            for (id, _) in parse_wpa_list_networks(&out.stdout) {
                let _ = self
                    .runner
                    .run(
                        "wpa_cli",
                        &["-i", iface, "disable_network", &id],
                        true,
                        QUERY_TIMEOUT,
                    )
                    .await;
            }
        }

        self.runner
            .run("wpa_cli", &["-i", iface, "save_config"], true, QUERY_TIMEOUT)
            .await?;
        Ok(())
    }
}

/// Fold one backend's scan into the merged map, keeping the best signal
/// for SSIDs both backends see.
fn merge_scan(merged: &mut HashMap<String, u8>, source: HashMap<String, u8>) {
    for (ssid, signal) in source {
        merged
            .entry(ssid)
            .and_modify(|s| *s = (*s).max(signal))
            .or_insert(signal);
    }
}

/// Build the ordered entry list from the saved set and the merged scan:
/// saved in-range by descending signal, then unsaved in-range by descending
/// signal, then saved out-of-range alphabetically.
fn build_entries(saved: &HashSet<String>, scan: &HashMap<String, u8>) -> Vec<ScanEntry> {
    let mut entries: Vec<ScanEntry> = Vec::with_capacity(saved.len() + scan.len());

    for (ssid, &signal) in scan {
        entries.push(ScanEntry {
            ssid: ssid.clone(),
            signal,
            saved: saved.contains(ssid),
            in_range: true,
        });
    }

    for ssid in saved {
        if !scan.contains_key(ssid) {
            entries.push(ScanEntry {
                ssid: ssid.clone(),
                signal: 0,
                saved: true,
                in_range: false,
            });
        }
    }

    entries.sort_by(|a, b| {
        let group = |e: &ScanEntry| match (e.in_range, e.saved) {
            (true, true) => 0u8,
            (true, false) => 1,
            (false, _) => 2,
        };
        group(a)
            .cmp(&group(b))
            .then_with(|| b.signal.cmp(&a.signal))
            .then_with(|| a.ssid.cmp(&b.ssid))
    });

    entries
}

/// Parse `wpa_cli list_networks` output into (network id, ssid) pairs.
/// Format after the header line: "id\tssid\tbssid\tflags".
fn parse_wpa_list_networks(output: &str) -> Vec<(String, String)> {
    output
        .lines()
        .skip(1)
        .filter_map(|line| {
            let mut parts = line.split('\t');
            let id = parts.next()?.trim();
            let ssid = parts.next()?.trim();
            (!id.is_empty() && !ssid.is_empty())
                .then(|| (id.to_string(), ssid.to_string()))
        })
        .collect()
}

/// Parse `wpa_cli scan_results`: "bssid\tfreq\tlevel\tflags\tssid" per line
/// after the header. Levels are dBm and get normalized; duplicate SSIDs
/// keep the strongest reading.
fn parse_wpa_scan_results(output: &str) -> HashMap<String, u8> {
    let mut results = HashMap::new();
    for line in output.lines().skip(1) {
        let parts: Vec<&str> = line.split('\t').collect();
        if parts.len() < 5 {
            continue;
        }
        let ssid = parts[4].trim();
        if ssid.is_empty() {
            continue;
        }
        let level_dbm = parts[2].parse::<i32>().unwrap_or(-90);
        let pct = dbm_to_percent(level_dbm);
        results
            .entry(ssid.to_string())
            .and_modify(|s: &mut u8| *s = (*s).max(pct))
            .or_insert(pct);
    }
    results
}

/// Parse `nmcli -t --escape no -f SSID,SIGNAL,SECURITY device wifi list`.
/// Fields split from the right so SSIDs containing ':' survive.
fn parse_nmcli_scan(output: &str) -> HashMap<String, u8> {
    let mut results = HashMap::new();
    for line in output.lines() {
        if line.is_empty() {
            continue;
        }
        let mut fields = line.rsplitn(3, ':');
        let _security = fields.next();
        let Some(signal) = fields.next() else { continue };
        let Some(ssid) = fields.next() else { continue };
        let ssid = ssid.trim();
        if ssid.is_empty() {
            continue;
        }
        let signal = signal.parse::<i32>().unwrap_or(0).clamp(0, 100) as u8;
        results
            .entry(ssid.to_string())
            .and_modify(|s: &mut u8| *s = (*s).max(signal))
            .or_insert(signal);
    }
    results
}

/// Names of stored Wi-Fi connections from
/// `nmcli -t -f NAME,TYPE connection show`.
fn parse_nmcli_wifi_connections(output: &str) -> Vec<String> {
    output
        .lines()
        .filter_map(|line| {
            let (name, typ) = line.rsplit_once(':')?;
            matches!(typ, "wifi" | "802-11-wireless").then(|| name.to_string())
        })
        .collect()
}

/// Active SSID from `nmcli -t --escape no -f ACTIVE,SSID device wifi list`.
fn parse_nmcli_active_ssid(output: &str) -> Option<String> {
    output.lines().find_map(|line| {
        let ssid = line.strip_prefix("yes:")?.trim();
        (!ssid.is_empty()).then(|| ssid.to_string())
    })
}

/// Associated SSID from `wpa_cli status` output (`ssid=` line, only
/// meaningful once the association completed).
fn parse_wpa_status_ssid(output: &str) -> Option<String> {
    let completed = output
        .lines()
        .any(|l| l.trim() == "wpa_state=COMPLETED");
    if !completed {
        return None;
    }
    output.lines().find_map(|line| {
        let ssid = line.trim().strip_prefix("ssid=")?;
        (!ssid.is_empty()).then(|| ssid.to_string())
    })
}

/// Saved SSIDs from a wpa_supplicant.conf: `ssid="..."` lines inside
/// `network={ ... }` blocks.
fn parse_wpa_supplicant_conf(content: &str) -> HashSet<String> {
    let mut ssids = HashSet::new();
    let mut in_block = false;
    for line in content.lines() {
        let line = line.trim();
        if line.starts_with("network={") {
            in_block = true;
        } else if in_block && line.starts_with('}') {
            in_block = false;
        } else if in_block {
            if let Some(value) = line.strip_prefix("ssid=") {
                let value = value.trim().trim_matches('"');
                if !value.is_empty() {
                    ssids.insert(value.to_string());
                }
            }
        }
    }
    ssids
}
