//! Probe Client
//!
//! Single-request checks:
//! - Connectivity: asks a public-address service who we are
//! - Latency: times one small request to a selectable endpoint
//! - Latency series: repeated probes with jitter and loss statistics

use super::types::{ConnectivityReport, LatencyStats, LatencyTarget};
use crate::error::{NetcheckError, Result};
use log::{debug, info, warn};
use reqwest::Client;
use reqwest::header::CACHE_CONTROL;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

/// Public-address lookup, returns `{"ip": "..."}`
pub const IP_LOOKUP_URL: &str = "https://api.ipify.org?format=json";

/// Latency endpoint used by [`LatencyTarget::Httpbin`]
pub const HTTPBIN_PING_URL: &str = "https://httpbin.org/status/200";

/// Latency endpoint used by [`LatencyTarget::Cloudflare`]
pub const CLOUDFLARE_PING_URL: &str = "https://speed.cloudflare.com/__down?bytes=1";

/// Endpoints the probes talk to
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProbeEndpoints {
    pub ip_lookup_url: String,
    pub httpbin_ping_url: String,
    pub cloudflare_ping_url: String,
}

impl Default for ProbeEndpoints {
    fn default() -> Self {
        Self {
            ip_lookup_url: IP_LOOKUP_URL.to_string(),
            httpbin_ping_url: HTTPBIN_PING_URL.to_string(),
            cloudflare_ping_url: CLOUDFLARE_PING_URL.to_string(),
        }
    }
}

impl ProbeEndpoints {
    pub fn ping_url(&self, target: LatencyTarget) -> &str {
        match target {
            LatencyTarget::Httpbin => &self.httpbin_ping_url,
            LatencyTarget::Cloudflare => &self.cloudflare_ping_url,
        }
    }
}

#[derive(Debug, Deserialize)]
struct IpResponse {
    ip: String,
}

/// Issues connectivity and latency probes. No retries.
#[derive(Clone)]
pub struct ProbeClient {
    client: Client,
    endpoints: ProbeEndpoints,
}

impl ProbeClient {
    pub fn new(endpoints: ProbeEndpoints, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("netcheck/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| NetcheckError::HttpClient(e.to_string()))?;

        Ok(Self { client, endpoints })
    }

    pub fn endpoints(&self) -> &ProbeEndpoints {
        &self.endpoints
    }

    /// Look up our public address. Any failure means offline.
    pub async fn check_connectivity(&self) -> ConnectivityReport {
        match self.lookup_address().await {
            Ok(ip) => {
                info!("Connectivity check: online as {}", ip);
                ConnectivityReport::online(ip)
            }
            Err(e) => {
                warn!("Connectivity check failed: {}", e);
                ConnectivityReport::offline()
            }
        }
    }

    async fn lookup_address(&self) -> std::result::Result<String, String> {
        let response = self
            .client
            .get(&self.endpoints.ip_lookup_url)
            .header(CACHE_CONTROL, "no-cache")
            .send()
            .await
            .map_err(|e| format!("Address lookup failed: {}", e))?;

        if !response.status().is_success() {
            return Err(format!(
                "Address lookup failed with status: {}",
                response.status()
            ));
        }

        let body: IpResponse = response
            .json()
            .await
            .map_err(|e| format!("Malformed address response: {}", e))?;
        Ok(body.ip)
    }

    /// Time one request to `target`, rounded to the nearest millisecond.
    ///
    /// `None` when the request errors or returns a non-success status.
    /// Callers must only probe after a successful connectivity check.
    pub async fn measure_latency(&self, target: LatencyTarget) -> Option<u32> {
        let url = self.endpoints.ping_url(target);
        let start = Instant::now();

        let result = self
            .client
            .get(url)
            .header(CACHE_CONTROL, "no-cache")
            .send()
            .await;
        let elapsed = start.elapsed();

        match result {
            Ok(response) if response.status().is_success() => {
                let ms = round_millis(elapsed);
                debug!("Ping {}: {}ms", target.label(), ms);
                Some(ms)
            }
            Ok(response) => {
                debug!("Ping {} failed with status: {}", target.label(), response.status());
                None
            }
            Err(e) => {
                debug!("Ping {} failed: {}", target.label(), e);
                None
            }
        }
    }

    /// Run `count` probes spaced by `interval` and summarize them.
    ///
    /// Returns `None` when every probe failed.
    pub async fn measure_latency_series(
        &self,
        target: LatencyTarget,
        count: u32,
        interval: Duration,
    ) -> Option<LatencyStats> {
        info!("Starting latency series: {} probes to {}", count, target.label());

        let mut successful: Vec<u32> = Vec::with_capacity(count as usize);
        let mut lost: u32 = 0;

        for i in 0..count {
            match self.measure_latency(target).await {
                Some(ms) => successful.push(ms),
                None => lost += 1,
            }

            if i + 1 < count {
                tokio::time::sleep(interval).await;
            }
        }

        let stats = calculate_statistics(&successful, count, lost)?;
        info!(
            "Latency series complete: avg={:.1}ms, jitter={:.1}ms, loss={:.1}%",
            stats.avg_ms, stats.jitter_ms, stats.packet_loss
        );
        Some(stats)
    }
}

/// Round a duration to the nearest whole millisecond
pub fn round_millis(elapsed: Duration) -> u32 {
    let ms = (elapsed.as_nanos() + 500_000) / 1_000_000;
    u32::try_from(ms).unwrap_or(u32::MAX)
}

/// Summarize successful probe times; `None` without any success
fn calculate_statistics(
    successful: &[u32],
    total_attempts: u32,
    lost: u32,
) -> Option<LatencyStats> {
    if successful.is_empty() {
        return None;
    }
    let count = successful.len();

    let sum: u64 = successful.iter().map(|&ms| ms as u64).sum();
    let avg_ms = sum as f64 / count as f64;

    let min_ms = *successful.iter().min()?;
    let max_ms = *successful.iter().max()?;

    // Jitter is the population standard deviation
    let variance = successful
        .iter()
        .map(|&ms| {
            let diff = ms as f64 - avg_ms;
            diff * diff
        })
        .sum::<f64>()
        / count as f64;

    let packet_loss = if total_attempts == 0 {
        0.0
    } else {
        (lost as f64 / total_attempts as f64) * 100.0
    };

    Some(LatencyStats {
        avg_ms,
        min_ms,
        max_ms,
        jitter_ms: variance.sqrt(),
        packet_loss,
        sample_count: count,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_millis() {
        assert_eq!(round_millis(Duration::from_micros(41_499)), 41);
        assert_eq!(round_millis(Duration::from_micros(41_500)), 42);
        assert_eq!(round_millis(Duration::ZERO), 0);
    }

    #[test]
    fn test_calculate_statistics_normal() {
        let stats = calculate_statistics(&[20, 25, 30, 22, 28], 5, 0).unwrap();

        assert!((stats.avg_ms - 25.0).abs() < 0.01);
        assert_eq!(stats.min_ms, 20);
        assert_eq!(stats.max_ms, 30);
        assert!(stats.jitter_ms > 0.0);
        assert_eq!(stats.packet_loss, 0.0);
        assert_eq!(stats.sample_count, 5);
    }

    #[test]
    fn test_calculate_statistics_with_loss() {
        let stats = calculate_statistics(&[50, 60, 55, 58], 5, 1).unwrap();
        assert_eq!(stats.packet_loss, 20.0);
        assert_eq!(stats.sample_count, 4);
    }

    #[test]
    fn test_calculate_statistics_jitter_is_std_dev() {
        // mean 15, deviations +-5
        let stats = calculate_statistics(&[10, 20, 10, 20], 4, 0).unwrap();
        assert!((stats.jitter_ms - 5.0).abs() < 1e-9);
    }

    #[test]
    fn test_calculate_statistics_all_lost() {
        assert!(calculate_statistics(&[], 10, 10).is_none());
    }

    #[test]
    fn test_ping_url_by_target() {
        let endpoints = ProbeEndpoints::default();
        assert_eq!(endpoints.ping_url(LatencyTarget::Httpbin), HTTPBIN_PING_URL);
        assert_eq!(
            endpoints.ping_url(LatencyTarget::Cloudflare),
            CLOUDFLARE_PING_URL
        );
    }

    #[tokio::test]
    async fn test_unreachable_address_lookup_is_offline() {
        let endpoints = ProbeEndpoints {
            // discard port, nothing listens there
            ip_lookup_url: "http://127.0.0.1:9/ip".to_string(),
            ..ProbeEndpoints::default()
        };
        let probe = ProbeClient::new(endpoints, Duration::from_secs(2)).unwrap();

        let report = probe.check_connectivity().await;
        assert!(!report.is_online());
        assert_eq!(report.address, "Unable to retrieve");
    }
}
