// Debounced geolocation lookup

//! Geolocation refresher
//!
//! Fetches coarse location from a remote lookup service, throttled by two
//! independent rules: a periodic floor (`geoip_interval`) and a short
//! debounce window for connectivity-state transitions, so Wi-Fi and VPN
//! flapping in the same tick cannot cause a burst of fetches. The first
//! `Startup` trigger always fetches, exactly once per process lifetime.
//!
//! Failures keep the previous value (last-known-good) and leave all timers
//! untouched, so the next natural trigger may retry promptly. There is no
//! retry loop of its own.

use crate::state::{GeoLocation, GeoStatus};
use anyhow::{Context, Result};
use serde::Deserialize;
use std::time::{Duration, Instant, SystemTime};

/// Default lookup endpoint. `status` is "success" on a usable answer.
pub const GEOIP_URL: &str = "http://ip-api.com/json/?fields=status,message,country,city";

/// Debounce window for state-change triggers.
const STATE_CHANGE_DEBOUNCE: Duration = Duration::from_secs(3);

const FETCH_TIMEOUT: Duration = Duration::from_secs(5);

/// Why a refresh is being requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshReason {
    /// First trigger after process start; fires exactly once per lifetime.
    Startup,
    /// The long periodic timer.
    Periodic,
    /// The connectivity signature changed since the last poll tick.
    StateChange,
}

#[derive(Debug, Deserialize)]
struct GeoApiResponse {
    status: String,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    country: Option<String>,
    #[serde(default)]
    city: Option<String>,
}

/// Throttled fetcher for the geolocation endpoint.
pub struct GeoRefresher {
    http: reqwest::Client,
    url: String,
    geoip_interval: Duration,
    debounce: Duration,
    last_fetch: Option<Instant>,
    last_state_fetch: Option<Instant>,
    startup_fired: bool,
    current: Option<GeoLocation>,
}

impl GeoRefresher {
    pub fn new(geoip_interval: Duration) -> Self {
        Self::with_url(geoip_interval, GEOIP_URL.to_string())
    }

    /// Like [`new`](Self::new) with a custom endpoint (used by tests).
    pub fn with_url(geoip_interval: Duration, url: String) -> Self {
        Self {
            http: reqwest::Client::new(),
            url,
            geoip_interval,
            debounce: STATE_CHANGE_DEBOUNCE,
            last_fetch: None,
            last_state_fetch: None,
            startup_fired: false,
            current: None,
        }
    }

    /// Last published location, if any fetch has ever been attempted.
    pub fn current(&self) -> Option<&GeoLocation> {
        self.current.as_ref()
    }

    /// The pure gating decision, separated from I/O so tests can drive it
    /// with synthetic clocks.
    fn should_fetch(&self, reason: RefreshReason, now: Instant) -> bool {
        let floor_elapsed = match self.last_fetch {
            None => true,
            Some(t) => now.duration_since(t) >= self.geoip_interval,
        };

        match reason {
            RefreshReason::Startup => !self.startup_fired,
            RefreshReason::Periodic => floor_elapsed,
            RefreshReason::StateChange => {
                floor_elapsed
                    || match self.last_state_fetch {
                        None => true,
                        Some(t) => now.duration_since(t) >= self.debounce,
                    }
            }
        }
    }

    /// Fetch the location if the trigger passes the throttle rules.
    ///
    /// Returns the freshly fetched location, or `None` when the trigger
    /// was suppressed or the fetch failed (previous value stays current
    /// either way).
    pub async fn maybe_refresh(
        &mut self,
        reason: RefreshReason,
        now: Instant,
    ) -> Option<GeoLocation> {
        if !self.should_fetch(reason, now) {
            return None;
        }

        // The startup trigger is once-only even when the fetch fails;
        // retries ride the next periodic or state-change trigger.
        if reason == RefreshReason::Startup {
            self.startup_fired = true;
        }

        match self.fetch().await {
            Ok(geo) => {
                self.last_fetch = Some(now);
                if reason == RefreshReason::StateChange {
                    self.last_state_fetch = Some(now);
                }
                log::info!("GeoIP updated: {}", geo.display());
                self.current = Some(geo.clone());
                Some(geo)
            }
            Err(e) => {
                log::warn!("GeoIP lookup failed: {:#}", e);
                // Keep last-known-good; only seed an error marker when
                // there has never been a good value to show.
                if self.current.is_none() {
                    self.current = Some(GeoLocation {
                        status: GeoStatus::Error,
                        country: None,
                        city: None,
                        fetched_at: SystemTime::now(),
                    });
                }
                None
            }
        }
    }

    async fn fetch(&self) -> Result<GeoLocation> {
        let response: GeoApiResponse = self
            .http
            .get(&self.url)
            .timeout(FETCH_TIMEOUT)
            .send()
            .await
            .context("geolocation request failed")?
            .error_for_status()
            .context("geolocation endpoint returned an error status")?
            .json()
            .await
            .context("geolocation response was not valid JSON")?;

        if response.status != "success" {
            anyhow::bail!(
                "lookup rejected: {}",
                response.message.as_deref().unwrap_or("no message")
            );
        }

        Ok(GeoLocation {
            status: GeoStatus::Ok,
            country: response.country,
            city: response.city,
            fetched_at: SystemTime::now(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::method;
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn refresher(interval_secs: u64) -> GeoRefresher {
        GeoRefresher::with_url(
            Duration::from_secs(interval_secs),
            "http://127.0.0.1:9/unused".to_string(),
        )
    }

    #[test]
    fn test_startup_gating_is_once_only() {
        let mut r = refresher(300);
        let now = Instant::now();

        assert!(r.should_fetch(RefreshReason::Startup, now));
        r.startup_fired = true;
        assert!(!r.should_fetch(RefreshReason::Startup, now));
        // Even much later, a second startup trigger never forces a fetch.
        assert!(!r.should_fetch(RefreshReason::Startup, now + Duration::from_secs(3600)));
    }

    #[test]
    fn test_periodic_floor_boundary() {
        let mut r = refresher(300);
        let t0 = Instant::now();
        r.last_fetch = Some(t0);

        assert!(!r.should_fetch(RefreshReason::Periodic, t0 + Duration::from_secs(299)));
        assert!(r.should_fetch(RefreshReason::Periodic, t0 + Duration::from_secs(300)));
    }

    #[test]
    fn test_periodic_with_no_prior_fetch() {
        let r = refresher(300);
        assert!(r.should_fetch(RefreshReason::Periodic, Instant::now()));
    }

    #[test]
    fn test_state_change_debounce() {
        let mut r = refresher(300);
        let t0 = Instant::now();
        r.last_fetch = Some(t0);
        r.last_state_fetch = Some(t0);

        // Within the debounce window and under the floor: suppressed.
        assert!(!r.should_fetch(RefreshReason::StateChange, t0 + Duration::from_secs(1)));
        // Past the debounce window: allowed even though the floor has not
        // elapsed.
        assert!(r.should_fetch(RefreshReason::StateChange, t0 + Duration::from_secs(5)));
    }

    #[test]
    fn test_state_change_first_ever_is_allowed() {
        let mut r = refresher(300);
        r.last_fetch = Some(Instant::now());
        // Floor not elapsed, but no state-triggered fetch has happened yet.
        assert!(r.should_fetch(RefreshReason::StateChange, Instant::now()));
    }

    #[tokio::test]
    async fn test_fetch_success_updates_current() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "status": "success",
                "country": "Germany",
                "city": "Berlin"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let mut r = GeoRefresher::with_url(Duration::from_secs(300), server.uri());
        let geo = r
            .maybe_refresh(RefreshReason::Startup, Instant::now())
            .await
            .unwrap();

        assert_eq!(geo.status, GeoStatus::Ok);
        assert_eq!(geo.display(), "Berlin, Germany");
        assert_eq!(r.current().unwrap(), &geo);
    }

    #[tokio::test]
    async fn test_startup_fetches_exactly_once() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "status": "success",
                "country": "Germany",
                "city": "Berlin"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let mut r = GeoRefresher::with_url(Duration::from_secs(300), server.uri());
        let now = Instant::now();

        assert!(r.maybe_refresh(RefreshReason::Startup, now).await.is_some());
        // A second startup trigger within the debounce window is ignored.
        assert!(r.maybe_refresh(RefreshReason::Startup, now).await.is_none());
    }

    #[tokio::test]
    async fn test_api_level_failure_keeps_previous_value() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "status": "fail",
                "message": "private range"
            })))
            .mount(&server)
            .await;

        let mut r = GeoRefresher::with_url(Duration::from_secs(300), server.uri());
        let previous = GeoLocation {
            status: GeoStatus::Ok,
            country: Some("Germany".to_string()),
            city: Some("Berlin".to_string()),
            fetched_at: SystemTime::now(),
        };
        r.current = Some(previous.clone());
        let t0 = Instant::now();
        r.last_fetch = Some(t0);

        let result = r
            .maybe_refresh(RefreshReason::Periodic, t0 + Duration::from_secs(300))
            .await;

        assert!(result.is_none());
        // Previous value untouched, timers untouched: a retry is allowed
        // on the very next trigger.
        assert_eq!(r.current(), Some(&previous));
        assert_eq!(r.last_fetch, Some(t0));
        assert!(r.should_fetch(RefreshReason::Periodic, t0 + Duration::from_secs(300)));
    }

    #[tokio::test]
    async fn test_transport_failure_seeds_error_marker() {
        // Nothing listens on this port; the request fails outright.
        let mut r = GeoRefresher::with_url(
            Duration::from_secs(300),
            "http://127.0.0.1:9/".to_string(),
        );

        let result = r
            .maybe_refresh(RefreshReason::Startup, Instant::now())
            .await;

        assert!(result.is_none());
        assert_eq!(r.current().unwrap().status, GeoStatus::Error);
        // Startup latch is set even though the fetch failed.
        assert!(r.startup_fired);
        assert!(r.last_fetch.is_none());
    }

    #[tokio::test]
    async fn test_periodic_floor_enforced_end_to_end() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "status": "success",
                "country": "Germany",
                "city": "Berlin"
            })))
            .expect(2)
            .mount(&server)
            .await;

        let mut r = GeoRefresher::with_url(Duration::from_secs(300), server.uri());
        let t0 = Instant::now();

        assert!(r.maybe_refresh(RefreshReason::Periodic, t0).await.is_some());
        assert!(r
            .maybe_refresh(RefreshReason::Periodic, t0 + Duration::from_secs(299))
            .await
            .is_none());
        assert!(r
            .maybe_refresh(RefreshReason::Periodic, t0 + Duration::from_secs(300))
            .await
            .is_some());
    }
}
