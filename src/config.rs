// Configuration file parser

//! Configuration loading and validation
//!
//! The panel's `config.json` is optional: a missing or unparsable file
//! falls back to built-in defaults for every field. Theme and font keys in
//! the same file belong to the presentation layer and are ignored here.

use crate::state::VpnProfile;
use anyhow::Result;
use serde::Deserialize;
use std::fs;
use std::path::Path;

/// Orchestrator configuration. Unknown keys (theme, fonts) are ignored.
#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    /// Poll period for Wi-Fi/VPN/system state, in seconds.
    #[serde(default = "default_update_interval")]
    pub update_interval: u64,
    /// Periodic floor for geolocation refresh, in seconds.
    #[serde(default = "default_geoip_interval")]
    pub geoip_interval: u64,
    /// Selectable VPN profiles, in display order.
    #[serde(default)]
    pub vpn_profiles: Vec<VpnProfile>,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Directory holding the OpenVPN client configs named by the profiles.
    #[serde(default = "default_ovpn_dir")]
    pub ovpn_dir: String,
    #[serde(default = "default_hostapd_conf")]
    pub hostapd_conf: String,
    #[serde(default = "default_wpa_supplicant_conf")]
    pub wpa_supplicant_conf: String,
}

fn default_update_interval() -> u64 {
    2
}

fn default_geoip_interval() -> u64 {
    300 // 5 minutes
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_ovpn_dir() -> String {
    "/etc/netpanel/ovpn".to_string()
}

fn default_hostapd_conf() -> String {
    "/etc/hostapd/hostapd.conf".to_string()
}

fn default_wpa_supplicant_conf() -> String {
    "/etc/wpa_supplicant/wpa_supplicant.conf".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            update_interval: default_update_interval(),
            geoip_interval: default_geoip_interval(),
            vpn_profiles: Vec::new(),
            log_level: default_log_level(),
            ovpn_dir: default_ovpn_dir(),
            hostapd_conf: default_hostapd_conf(),
            wpa_supplicant_conf: default_wpa_supplicant_conf(),
        }
    }
}

/// Load configuration from a JSON file.
///
/// A missing or unparsable file yields the defaults with a logged warning.
/// A file that parses but contains nonsense values (zero intervals, profile
/// entries without a file name) is rejected.
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config> {
    let config = match fs::read_to_string(path.as_ref()) {
        Ok(contents) => match serde_json::from_str::<Config>(&contents) {
            Ok(config) => config,
            Err(e) => {
                log::warn!(
                    "Could not parse {:?}: {}. Using default values.",
                    path.as_ref(),
                    e
                );
                Config::default()
            }
        },
        Err(e) => {
            log::warn!(
                "Could not read {:?}: {}. Using default values.",
                path.as_ref(),
                e
            );
            Config::default()
        }
    };

    validate_config(&config)?;
    Ok(config)
}

/// Validate configuration values.
fn validate_config(config: &Config) -> Result<()> {
    if config.update_interval == 0 {
        anyhow::bail!("update_interval must be > 0");
    }

    if config.geoip_interval == 0 {
        anyhow::bail!("geoip_interval must be > 0");
    }

    for profile in &config.vpn_profiles {
        if profile.file.is_empty() {
            anyhow::bail!(
                "vpn profile '{}' has an empty file name",
                profile.display_name
            );
        }
    }

    Ok(())
}
