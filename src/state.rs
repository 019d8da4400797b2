// Shared state types for the orchestrator

//! Composite state model
//!
//! This module defines the data types that make up a published status
//! snapshot: Wi-Fi scan results, VPN state, geolocation, and the system
//! probe readings. Snapshots are always replaced wholesale so readers
//! never observe a partially updated state.

use crate::interfaces::InterfaceRoles;
use serde::Deserialize;
use std::time::SystemTime;

/// One network as seen by the merged scan view.
///
/// `signal` is normalized to 0-100 regardless of which backend reported it.
/// Saved networks absent from the live scan are retained with
/// `in_range = false` and `signal = 0`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanEntry {
    pub ssid: String,
    pub signal: u8,
    pub saved: bool,
    pub in_range: bool,
}

/// Current Wi-Fi view on the client interface.
///
/// Produced wholesale by the Wi-Fi reader each poll; read-only everywhere
/// else. `entries` is ordered: in-range saved networks first by descending
/// signal, then in-range unsaved by descending signal, then saved
/// out-of-range networks alphabetically.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WifiState {
    pub connected_ssid: Option<String>,
    pub entries: Vec<ScanEntry>,
    /// Set when neither scan backend is usable at all. The presentation
    /// layer shows this as "feature unavailable" rather than an empty list.
    pub backends_unavailable: bool,
}

/// A VPN profile from configuration. Immutable after load.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct VpnProfile {
    pub display_name: String,
    pub file: String,
}

/// VPN lifecycle states.
///
/// Owned exclusively by the VPN controller; transitions happen only through
/// `connect`, `disconnect`, and the liveness probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VpnState {
    Disconnected,
    Connecting(VpnProfile),
    Connected(VpnProfile),
    Disconnecting,
}

impl VpnState {
    /// Profile associated with an in-flight or established connection.
    pub fn profile(&self) -> Option<&VpnProfile> {
        match self {
            VpnState::Connecting(p) | VpnState::Connected(p) => Some(p),
            _ => None,
        }
    }

    pub fn is_connected(&self) -> bool {
        matches!(self, VpnState::Connected(_))
    }
}

/// Outcome of the most recent geolocation fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GeoStatus {
    Ok,
    Error,
}

/// Last-known-good geolocation. A failed fetch never clears a previous
/// value; it stays published until superseded.
#[derive(Debug, Clone, PartialEq)]
pub struct GeoLocation {
    pub status: GeoStatus,
    pub country: Option<String>,
    pub city: Option<String>,
    pub fetched_at: SystemTime,
}

impl GeoLocation {
    /// "City, Country" display form, or a placeholder when unknown.
    pub fn display(&self) -> String {
        match (&self.city, &self.country) {
            (Some(city), Some(country)) => format!("{}, {}", city, country),
            (Some(one), None) | (None, Some(one)) => one.clone(),
            (None, None) => "Unknown".to_string(),
        }
    }
}

/// Host-level readings gathered by the system probe. Everything fails soft
/// to `None`; a probe error never fails the poll.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SystemInfo {
    pub ap_active: bool,
    pub ap_ssid: Option<String>,
    pub ap_ip: Option<String>,
    pub client_ip: Option<String>,
    pub cpu_temp_c: Option<f32>,
    pub hostname: Option<String>,
    pub uptime: Option<String>,
}

/// The whole published state, swapped atomically each poll cycle.
#[derive(Debug, Clone, PartialEq)]
pub struct StatusSnapshot {
    pub roles: InterfaceRoles,
    pub wifi: WifiState,
    pub vpn: VpnState,
    pub geo: Option<GeoLocation>,
    pub system: SystemInfo,
    pub connected_clients: u32,
}

impl StatusSnapshot {
    /// Initial snapshot before the first poll completes.
    pub fn initial(roles: InterfaceRoles) -> Self {
        Self {
            roles,
            wifi: WifiState::default(),
            vpn: VpnState::Disconnected,
            geo: None,
            system: SystemInfo::default(),
            connected_clients: 0,
        }
    }
}
