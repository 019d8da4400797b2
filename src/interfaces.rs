// Interface role resolution from hostapd configuration

//! AP / client radio role resolution
//!
//! Works out which wireless interface is the access point and which is the
//! outward-facing client radio by reading the hostapd configuration. The
//! resolver fails soft: a missing file, a missing key, or an unexpected
//! interface name all fall back to the fixed default pair.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

/// Default AP radio when detection fails.
pub const DEFAULT_AP_IFACE: &str = "wlan1";
/// Default client radio when detection fails.
pub const DEFAULT_CLIENT_IFACE: &str = "wlan0";

/// Which radio hosts the AP and which connects outward.
///
/// The two fields are never equal; the resolver only ever produces the
/// fixed two-interface pairs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterfaceRoles {
    pub ap_iface: String,
    pub client_iface: String,
}

impl Default for InterfaceRoles {
    fn default() -> Self {
        Self {
            ap_iface: DEFAULT_AP_IFACE.to_string(),
            client_iface: DEFAULT_CLIENT_IFACE.to_string(),
        }
    }
}

/// Values extracted from one parse of the hostapd config.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct HostapdValues {
    iface: Option<String>,
    ssid: Option<String>,
}

/// Resolves interface roles from a hostapd-style config file.
///
/// Re-reads only when the file's mtime changes, so calling it every poll
/// tick is cheap while still reflecting config edits within a run.
pub struct InterfaceResolver {
    conf_path: PathBuf,
    cached_mtime: Option<SystemTime>,
    cached: HostapdValues,
}

impl InterfaceResolver {
    pub fn new<P: AsRef<Path>>(conf_path: P) -> Self {
        Self {
            conf_path: conf_path.as_ref().to_path_buf(),
            cached_mtime: None,
            cached: HostapdValues::default(),
        }
    }

    /// Resolve the AP/client role pair. Never fails; unknown or missing
    /// configuration yields the default pair.
    pub fn resolve(&mut self) -> InterfaceRoles {
        self.refresh();
        match self.cached.iface.as_deref() {
            Some("wlan0") => InterfaceRoles {
                ap_iface: "wlan0".to_string(),
                client_iface: "wlan1".to_string(),
            },
            Some("wlan1") => InterfaceRoles::default(),
            other => {
                if let Some(name) = other {
                    log::warn!(
                        "Unexpected AP interface '{}' in {:?}, using defaults",
                        name,
                        self.conf_path
                    );
                }
                InterfaceRoles::default()
            }
        }
    }

    /// The SSID the AP is broadcasting, if the config declares one.
    pub fn ap_ssid(&mut self) -> Option<String> {
        self.refresh();
        self.cached.ssid.clone()
    }

    fn refresh(&mut self) {
        let mtime = fs::metadata(&self.conf_path)
            .and_then(|m| m.modified())
            .ok();

        if mtime.is_some() && mtime == self.cached_mtime {
            return;
        }

        match fs::read_to_string(&self.conf_path) {
            Ok(content) => {
                self.cached = parse_hostapd(&content);
                self.cached_mtime = mtime;
            }
            Err(e) => {
                log::debug!("Could not read {:?}: {}", self.conf_path, e);
                self.cached = HostapdValues::default();
                self.cached_mtime = None;
            }
        }
    }
}

/// Extract the first `interface=` and `ssid=` values from hostapd config
/// text. Comments and unrelated keys are ignored.
fn parse_hostapd(content: &str) -> HostapdValues {
    let mut values = HostapdValues::default();
    for line in content.lines() {
        let line = line.trim();
        if line.starts_with('#') {
            continue;
        }
        if values.iface.is_none() {
            if let Some(v) = line.strip_prefix("interface=") {
                if !v.is_empty() {
                    values.iface = Some(v.to_string());
                }
            }
        }
        if values.ssid.is_none() {
            if let Some(v) = line.strip_prefix("ssid=") {
                if !v.is_empty() {
                    values.ssid = Some(v.to_string());
                }
            }
        }
        if values.iface.is_some() && values.ssid.is_some() {
            break;
        }
    }
    values
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_parse_hostapd_both_keys() {
        let conf = "driver=nl80211\ninterface=wlan1\nssid=MyAP\nchannel=6\n";
        let values = parse_hostapd(conf);
        assert_eq!(values.iface.as_deref(), Some("wlan1"));
        assert_eq!(values.ssid.as_deref(), Some("MyAP"));
    }

    #[test]
    fn test_parse_hostapd_first_match_wins() {
        let conf = "interface=wlan1\ninterface=wlan0\nssid=First\nssid=Second\n";
        let values = parse_hostapd(conf);
        assert_eq!(values.iface.as_deref(), Some("wlan1"));
        assert_eq!(values.ssid.as_deref(), Some("First"));
    }

    #[test]
    fn test_parse_hostapd_ignores_comments_and_blanks() {
        let conf = "# interface=wlan0\n\nssid=Real\ninterface=wlan1\n";
        let values = parse_hostapd(conf);
        assert_eq!(values.iface.as_deref(), Some("wlan1"));
        assert_eq!(values.ssid.as_deref(), Some("Real"));
    }

    #[test]
    fn test_resolve_wlan1_ap() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "interface=wlan1").unwrap();
        let mut resolver = InterfaceResolver::new(file.path());
        let roles = resolver.resolve();
        assert_eq!(roles.ap_iface, "wlan1");
        assert_eq!(roles.client_iface, "wlan0");
    }

    #[test]
    fn test_resolve_wlan0_ap_swaps_roles() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "interface=wlan0").unwrap();
        let mut resolver = InterfaceResolver::new(file.path());
        let roles = resolver.resolve();
        assert_eq!(roles.ap_iface, "wlan0");
        assert_eq!(roles.client_iface, "wlan1");
    }

    #[test]
    fn test_resolve_missing_file_uses_defaults() {
        let mut resolver = InterfaceResolver::new("/nonexistent/hostapd.conf");
        let roles = resolver.resolve();
        assert_eq!(roles, InterfaceRoles::default());
        assert_eq!(roles.ap_iface, "wlan1");
        assert_eq!(roles.client_iface, "wlan0");
    }

    #[test]
    fn test_resolve_unknown_interface_uses_defaults() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "interface=eth0").unwrap();
        let mut resolver = InterfaceResolver::new(file.path());
        assert_eq!(resolver.resolve(), InterfaceRoles::default());
    }

    #[test]
    fn test_roles_never_equal() {
        for conf in ["interface=wlan0", "interface=wlan1", "interface=junk", ""] {
            let mut file = NamedTempFile::new().unwrap();
            writeln!(file, "{}", conf).unwrap();
            let mut resolver = InterfaceResolver::new(file.path());
            let roles = resolver.resolve();
            assert_ne!(roles.ap_iface, roles.client_iface);
        }
    }

    #[test]
    fn test_ap_ssid_from_conf() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "interface=wlan1\nssid=PanelAP").unwrap();
        let mut resolver = InterfaceResolver::new(file.path());
        assert_eq!(resolver.ap_ssid().as_deref(), Some("PanelAP"));
    }

    #[test]
    fn test_ap_ssid_missing() {
        let mut resolver = InterfaceResolver::new("/nonexistent/hostapd.conf");
        assert!(resolver.ap_ssid().is_none());
    }
}
