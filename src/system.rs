// Host-level status probe

//! System probe
//!
//! Gathers the host readings the panel displays alongside network state:
//! interface addresses, AP service health, CPU temperature, hostname, and
//! uptime. Every reading fails soft; a missing tool or file just leaves
//! its field empty.

use crate::interfaces::InterfaceRoles;
use crate::runner::CommandRunner;
use crate::state::SystemInfo;
use std::time::Duration;

const PROBE_TIMEOUT: Duration = Duration::from_secs(5);
const THERMAL_ZONE: &str = "/sys/class/thermal/thermal_zone0/temp";

/// Collects [`SystemInfo`] readings through the command runner.
pub struct SystemProbe {
    runner: CommandRunner,
}

impl SystemProbe {
    pub fn new(runner: CommandRunner) -> Self {
        Self { runner }
    }

    /// Gather all readings for one snapshot. `ap_ssid` comes from the
    /// interface resolver, which already parsed the hostapd config.
    pub async fn read(&self, roles: &InterfaceRoles, ap_ssid: Option<String>) -> SystemInfo {
        SystemInfo {
            ap_active: self.service_active("hostapd").await,
            ap_ssid,
            ap_ip: self.interface_ip(&roles.ap_iface).await,
            client_ip: self.interface_ip(&roles.client_iface).await,
            cpu_temp_c: read_cpu_temp(THERMAL_ZONE),
            hostname: self.simple_query("hostname", &[]).await,
            uptime: self
                .simple_query("uptime", &["-p"])
                .await
                .map(|s| parse_uptime(&s)),
        }
    }

    /// IPv4 address on an interface via `ip -j -4 addr show`.
    pub async fn interface_ip(&self, iface: &str) -> Option<String> {
        let out = self
            .runner
            .run("ip", &["-j", "-4", "addr", "show", iface], false, PROBE_TIMEOUT)
            .await
            .ok()?;
        if !out.success() {
            return None;
        }
        parse_ip_json(&out.stdout)
    }

    async fn service_active(&self, unit: &str) -> bool {
        match self
            .runner
            .run("systemctl", &["is-active", unit], false, PROBE_TIMEOUT)
            .await
        {
            Ok(out) => out.stdout_trimmed() == Some("active"),
            Err(e) => {
                log::debug!("systemctl is-active {} failed: {}", unit, e);
                false
            }
        }
    }

    async fn simple_query(&self, tool: &str, args: &[&str]) -> Option<String> {
        match self.runner.run(tool, args, false, PROBE_TIMEOUT).await {
            Ok(out) if out.success() => out.stdout_trimmed().map(str::to_string),
            Ok(out) => {
                log::debug!("{} failed: {}", tool, out.stderr.trim());
                None
            }
            Err(e) => {
                log::debug!("{} unavailable: {}", tool, e);
                None
            }
        }
    }
}

/// First local IPv4 address from `ip -j -4 addr show <iface>` JSON output.
fn parse_ip_json(output: &str) -> Option<String> {
    let parsed: serde_json::Value = serde_json::from_str(output).ok()?;
    parsed
        .as_array()?
        .first()?
        .get("addr_info")?
        .as_array()?
        .first()?
        .get("local")?
        .as_str()
        .map(str::to_string)
}

/// Millidegrees from the thermal zone file, converted to Celsius.
fn read_cpu_temp(path: &str) -> Option<f32> {
    let raw = std::fs::read_to_string(path).ok()?;
    let millideg: i32 = raw.trim().parse().ok()?;
    Some(millideg as f32 / 1000.0)
}

/// `uptime -p` prints "up 3 hours, 12 minutes"; the prefix is noise.
fn parse_uptime(output: &str) -> String {
    output.trim().trim_start_matches("up ").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_parse_ip_json() {
        let out = r#"[{"ifindex":3,"ifname":"wlan0","addr_info":[
            {"family":"inet","local":"192.168.1.42","prefixlen":24}
        ]}]"#;
        assert_eq!(parse_ip_json(out), Some("192.168.1.42".to_string()));
    }

    #[test]
    fn test_parse_ip_json_no_address() {
        assert_eq!(parse_ip_json(r#"[{"ifname":"wlan0","addr_info":[]}]"#), None);
        assert_eq!(parse_ip_json("[]"), None);
        assert_eq!(parse_ip_json("not json"), None);
        assert_eq!(parse_ip_json(""), None);
    }

    #[test]
    fn test_read_cpu_temp() {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "48230\n").unwrap();
        let temp = read_cpu_temp(file.path().to_str().unwrap()).unwrap();
        assert!((temp - 48.23).abs() < 0.001);
    }

    #[test]
    fn test_read_cpu_temp_missing_or_garbage() {
        assert_eq!(read_cpu_temp("/nonexistent/temp"), None);

        let mut file = NamedTempFile::new().unwrap();
        write!(file, "warm").unwrap();
        assert_eq!(read_cpu_temp(file.path().to_str().unwrap()), None);
    }

    #[test]
    fn test_parse_uptime() {
        assert_eq!(parse_uptime("up 3 hours, 12 minutes\n"), "3 hours, 12 minutes");
        assert_eq!(parse_uptime("up 1 minute"), "1 minute");
    }
}
