// Network & VPN State Orchestrator Library
// Shared modules for daemon and tests

//! Network & VPN State Orchestrator Library
//!
//! This library provides the backend of a touch-panel network controller for
//! a Raspberry Pi access point: it reconciles Wi-Fi state from `nmcli` and
//! `wpa_cli`, drives an OpenVPN client lifecycle, and polls everything on a
//! fixed period into a single published status snapshot.
//!
//! # Main Components
//!
//! - [`config`]: Configuration file parsing and validation
//! - [`interfaces`]: AP/client interface role resolution from hostapd
//! - [`runner`]: Timed, sandboxed external command execution
//! - [`wifi`]: Wi-Fi scan/saved-network reconciliation and connect/disconnect
//! - [`vpn`]: OpenVPN client state machine
//! - [`geoip`]: Debounced geolocation lookups
//! - [`system`]: Host-level readings (addresses, temperature, uptime)
//! - [`raspap`]: RaspAP REST API client for AP station counts
//! - [`scheduler`]: The poll loop and snapshot publishing
//! - [`state`]: Shared data structures

pub mod config;
pub mod geoip;
pub mod interfaces;
pub mod raspap;
pub mod runner;
pub mod scheduler;
pub mod state;
pub mod system;
pub mod vpn;
pub mod wifi;
