// OpenVPN client lifecycle controller

//! VPN lifecycle state machine
//!
//! Owns the [`VpnState`] and the OpenVPN client process. `connect` and
//! `disconnect` are the only public mutation paths; a liveness probe
//! reconciles the stored state when the process dies behind our back.
//!
//! One async mutex covers the state transition *and* the external call:
//! overlapping connect/disconnect invocations race on the real OS process
//! table (kill-by-name versus a fresh daemonized start), so this is the one
//! place where the lock deliberately spans the blocking call.

use crate::interfaces::InterfaceRoles;
use crate::runner::{CommandRunner, RunnerError};
use crate::state::{VpnProfile, VpnState};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Mutex;

const VPN_CMD_TIMEOUT: Duration = Duration::from_secs(10);
const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// VPN operation failures. Everything else in this module is best-effort.
#[derive(Debug, Error)]
pub enum VpnError {
    /// The profile's config file does not exist under the asset directory.
    #[error("VPN config file not found: {path:?}")]
    ProfileNotFound { path: PathBuf },

    /// Launching the client process failed.
    #[error(transparent)]
    Runner(#[from] RunnerError),
}

/// Controller for the OpenVPN client process.
pub struct VpnController {
    runner: CommandRunner,
    ovpn_dir: PathBuf,
    state: Mutex<VpnState>,
}

impl VpnController {
    pub fn new<P: AsRef<Path>>(runner: CommandRunner, ovpn_dir: P) -> Self {
        Self {
            runner,
            ovpn_dir: ovpn_dir.as_ref().to_path_buf(),
            state: Mutex::new(VpnState::Disconnected),
        }
    }

    /// Current state snapshot.
    pub async fn state(&self) -> VpnState {
        self.state.lock().await.clone()
    }

    /// Start the VPN client for `profile` and transition to `Connecting`.
    ///
    /// Idempotent: while a connection is in flight or established, returns
    /// the current state without spawning a second process. Actual
    /// `Connected` status is determined by a later [`probe`](Self::probe),
    /// not by blocking here.
    ///
    /// # Errors
    ///
    /// [`VpnError::ProfileNotFound`] when the config file is missing (state
    /// stays `Disconnected`, nothing is launched), or a runner error when
    /// the launch itself fails.
    pub async fn connect(&self, profile: &VpnProfile) -> Result<VpnState, VpnError> {
        let mut state = self.state.lock().await;

        match &*state {
            VpnState::Connecting(_) | VpnState::Connected(_) => {
                log::debug!("VPN connect while {:?}, ignoring", *state);
                return Ok(state.clone());
            }
            VpnState::Disconnected | VpnState::Disconnecting => {}
        }

        let config_path = self.ovpn_dir.join(&profile.file);
        if !config_path.is_file() {
            return Err(VpnError::ProfileNotFound { path: config_path });
        }

        // Stale clients from a previous run would fight over the tunnel
        // device. Best-effort, same as disconnect.
        if let Err(e) = self
            .runner
            .run("killall", &["openvpn"], true, VPN_CMD_TIMEOUT)
            .await
        {
            log::debug!("pre-connect killall failed: {}", e);
        }

        let config_arg = config_path.to_string_lossy();
        self.runner
            .run_checked(
                "openvpn",
                &["--daemon", "--config", &config_arg],
                true,
                VPN_CMD_TIMEOUT,
            )
            .await?;

        log::info!("VPN client launched for profile '{}'", profile.display_name);
        *state = VpnState::Connecting(profile.clone());
        Ok(state.clone())
    }

    /// Stop any VPN client instance and clear routes on the client
    /// interface. Best-effort: succeeds from every prior state, including
    /// `Disconnected` with no process running.
    pub async fn disconnect(&self, roles: &InterfaceRoles) -> VpnState {
        let mut state = self.state.lock().await;
        *state = VpnState::Disconnecting;

        if let Err(e) = self
            .runner
            .run("killall", &["openvpn"], true, VPN_CMD_TIMEOUT)
            .await
        {
            log::debug!("killall openvpn failed: {}", e);
        }

        if let Err(e) = self
            .runner
            .run(
                "ip",
                &["route", "flush", "dev", &roles.client_iface],
                true,
                VPN_CMD_TIMEOUT,
            )
            .await
        {
            log::debug!("ip route flush failed: {}", e);
        }

        *state = VpnState::Disconnected;
        log::info!("VPN disconnected");
        state.clone()
    }

    /// Reconcile the stored state against process reality.
    ///
    /// Promotes `Connecting` to `Connected` once the client process is
    /// alive, and demotes `Connecting`/`Connected` to `Disconnected` when
    /// it died unexpectedly. Returns the (possibly updated) state.
    pub async fn probe(&self) -> VpnState {
        let mut state = self.state.lock().await;

        let alive = match self
            .runner
            .run("pgrep", &["-x", "openvpn"], false, PROBE_TIMEOUT)
            .await
        {
            Ok(out) => out.success() && out.stdout_trimmed().is_some(),
            Err(e) => {
                log::debug!("pgrep probe failed: {}", e);
                false
            }
        };

        let next = match (&*state, alive) {
            (VpnState::Connecting(profile), true) => {
                log::info!("VPN '{}' is up", profile.display_name);
                Some(VpnState::Connected(profile.clone()))
            }
            (VpnState::Connecting(profile) | VpnState::Connected(profile), false) => {
                log::warn!(
                    "VPN process for '{}' is gone, marking disconnected",
                    profile.display_name
                );
                Some(VpnState::Disconnected)
            }
            _ => None,
        };

        if let Some(next) = next {
            *state = next;
        }
        state.clone()
    }
}
