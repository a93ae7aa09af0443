//! Diagnostics session
//!
//! [`NetworkChecker`] ties the probes, the throughput estimator and the
//! history log together and keeps the [`CheckerState`] a front end renders.
//! Every completed measurement appends one record to the history log.

use crate::error::{NetcheckError, Result};
use crate::history::HistoryLog;
use crate::network_analyzer::{
    CheckerState, ConnectivityReport, DiagnosticRecord, Direction, LatencyStats, LatencyTarget,
    ProbeClient, SpeedTestPhase, SpeedTestResults, SpeedTestState, ThroughputEstimator,
    ThroughputEvent, ThroughputMeasurement, ThroughputSample,
};
use crate::preferences::Preferences;
use crate::settings::NetcheckSettings;
use crate::store::{KeyValueStore, get_json, set_json};
use futures_util::StreamExt;
use log::{error, info, warn};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Store key holding the samples of the last speed test
pub const LAST_SAMPLES_KEY: &str = "last_throughput_samples";

/// Pause between probes of the latency series run before a speed test
const LATENCY_SERIES_INTERVAL_MS: u64 = 100;

/// Per-direction samples of the most recent speed test
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct LastSamples {
    #[serde(default)]
    pub download: Vec<ThroughputSample>,
    #[serde(default)]
    pub upload: Vec<ThroughputSample>,
}

pub struct NetworkChecker<S> {
    probe: ProbeClient,
    estimator: ThroughputEstimator,
    history: HistoryLog<S>,
    state: CheckerState,
    latency_samples: u32,
}

impl<S: KeyValueStore> NetworkChecker<S> {
    pub fn new(
        probe: ProbeClient,
        estimator: ThroughputEstimator,
        history: HistoryLog<S>,
        latency_samples: u32,
    ) -> Self {
        Self {
            probe,
            estimator,
            history,
            state: CheckerState::default(),
            latency_samples,
        }
    }

    pub fn from_settings(settings: &NetcheckSettings, store: S) -> Result<Self> {
        let probe = ProbeClient::new(
            settings.endpoints.probes.clone(),
            settings.request_timeout(),
        )?;
        let estimator = ThroughputEstimator::new(
            settings.endpoints.download_url.clone(),
            settings.endpoints.upload_url.clone(),
            settings.download.clone(),
            settings.upload.clone(),
        )?;
        let history = HistoryLog::new(store, settings.history_capacity);

        Ok(Self::new(
            probe,
            estimator,
            history,
            settings.latency_samples,
        ))
    }

    pub fn state(&self) -> &CheckerState {
        &self.state
    }

    pub fn history(&self) -> &HistoryLog<S> {
        &self.history
    }

    pub fn history_mut(&mut self) -> &mut HistoryLog<S> {
        &mut self.history
    }

    pub fn estimator_mut(&mut self) -> &mut ThroughputEstimator {
        &mut self.estimator
    }

    pub fn preferences(&self) -> Preferences {
        Preferences::load(self.history.store())
    }

    pub fn save_preferences(&mut self, preferences: &Preferences) -> Result<()> {
        preferences.save(self.history.store_mut())
    }

    pub fn last_samples(&self) -> Option<LastSamples> {
        get_json(self.history.store(), LAST_SAMPLES_KEY)
    }

    /// Probe connectivity and record the outcome. Never fails; an
    /// unreachable lookup service reports offline.
    pub async fn check_connectivity(&mut self) -> ConnectivityReport {
        self.state.checking = true;
        let report = self.probe.check_connectivity().await;

        self.state.connectivity = Some(report.clone());
        self.state.last_checked = Some(chrono::Utc::now());
        self.state.checking = false;

        self.record(DiagnosticRecord::connectivity(&report));
        report
    }

    /// Probe latency once and record the outcome.
    ///
    /// Returns [`NetcheckError::Offline`] unless the last connectivity check
    /// succeeded. `Ok(None)` means the probe itself failed.
    pub async fn measure_latency(&mut self, target: LatencyTarget) -> Result<Option<u32>> {
        if !self.state.is_online() {
            return Err(NetcheckError::Offline);
        }

        self.state.pinging = true;
        let latency = self.probe.measure_latency(target).await;
        self.state.pinging = false;
        self.state.last_latency = Some(latency);

        let record = DiagnosticRecord::latency(self.state.source_address(), latency);
        self.record(record);
        Ok(latency)
    }

    /// Probe latency `count` times. Not recorded in the history log.
    pub async fn measure_latency_series(
        &mut self,
        target: LatencyTarget,
        count: u32,
    ) -> Result<Option<LatencyStats>> {
        if !self.state.is_online() {
            return Err(NetcheckError::Offline);
        }

        self.state.pinging = true;
        let stats = self
            .probe
            .measure_latency_series(
                target,
                count,
                Duration::from_millis(LATENCY_SERIES_INTERVAL_MS),
            )
            .await;
        self.state.pinging = false;
        Ok(stats)
    }

    /// Run a full speed test: latency series (when online), download, then
    /// upload if requested and the download succeeded.
    ///
    /// `on_update` sees the speed test state after every change. A throughput
    /// record is appended whatever the outcome; a failed download is returned
    /// as the error after recording.
    pub async fn run_speed_test<F>(
        &mut self,
        target: LatencyTarget,
        include_upload: bool,
        mut on_update: F,
    ) -> Result<SpeedTestResults>
    where
        F: FnMut(&SpeedTestState),
    {
        self.state.speed = SpeedTestState {
            running: true,
            ..Default::default()
        };

        let latency = if self.state.is_online() && self.latency_samples > 0 {
            self.state.speed.phase = SpeedTestPhase::Latency;
            self.state.speed.message = "MEASURING LATENCY...".to_string();
            on_update(&self.state.speed);
            self.measure_latency_series(target, self.latency_samples)
                .await
                .unwrap_or(None)
        } else {
            None
        };

        let mut samples = LastSamples::default();

        let download = self.run_phase(Direction::Download, &mut on_update).await;
        let download = match download {
            Ok(measurement) => measurement,
            Err(e) => {
                error!("Download test failed: {}", e);
                self.record(DiagnosticRecord::throughput(
                    self.state.source_address(),
                    None,
                    None,
                ));
                self.state.speed.running = false;
                self.state.speed.phase = SpeedTestPhase::Idle;
                self.state.speed.message = "SPEED TEST FAILED - NETWORK ERROR".to_string();
                on_update(&self.state.speed);
                return Err(e);
            }
        };
        samples.download = download.samples.clone();

        let upload_mbps = if include_upload {
            match self.run_phase(Direction::Upload, &mut on_update).await {
                Ok(measurement) => {
                    samples.upload = measurement.samples.clone();
                    Some(measurement.mbps)
                }
                Err(e) => {
                    warn!("Upload test failed: {}", e);
                    None
                }
            }
        } else {
            None
        };

        let results = SpeedTestResults {
            download_mbps: Some(download.mbps),
            upload_mbps,
            latency,
            server: self.estimator.server(),
            timestamp: chrono::Utc::now(),
        };
        info!(
            "Speed test complete: {:.1} Mbps down, {:?} Mbps up",
            download.mbps, upload_mbps
        );

        if let Err(e) = set_json(self.history.store_mut(), LAST_SAMPLES_KEY, &samples) {
            warn!("Failed to persist speed test samples: {}", e);
        }
        self.record(DiagnosticRecord::throughput(
            self.state.source_address(),
            results.download_mbps,
            results.upload_mbps,
        ));

        self.state.speed.running = false;
        self.state.speed.phase = SpeedTestPhase::Complete;
        self.state.speed.phase_progress = 1.0;
        self.state.speed.message = "BANDWIDTH ANALYSIS COMPLETE".to_string();
        self.state.speed.results = Some(results.clone());
        on_update(&self.state.speed);

        Ok(results)
    }

    async fn run_phase<F>(
        &mut self,
        direction: Direction,
        on_update: &mut F,
    ) -> Result<ThroughputMeasurement>
    where
        F: FnMut(&SpeedTestState),
    {
        let speed = &mut self.state.speed;
        speed.phase = match direction {
            Direction::Download => SpeedTestPhase::Download,
            Direction::Upload => SpeedTestPhase::Upload,
        };
        speed.current_speed = 0.0;
        speed.phase_progress = 0.0;
        speed.samples.clear();
        speed.message = match direction {
            Direction::Download => "INITIATING DOWNSTREAM BANDWIDTH ANALYSIS...",
            Direction::Upload => "INITIATING UPSTREAM BANDWIDTH ANALYSIS...",
        }
        .to_string();
        on_update(&*speed);

        let mut run = match direction {
            Direction::Download => self.estimator.measure_download(),
            Direction::Upload => self.estimator.measure_upload(),
        };

        while let Some(event) = run.next().await {
            match event {
                ThroughputEvent::Progress(progress) => {
                    let speed = &mut self.state.speed;
                    speed.current_speed = progress.sample.speed_mbps;
                    speed.phase_progress = progress.fraction;
                    speed.message = progress.message;
                    speed.samples.push(progress.sample);
                    on_update(&*speed);
                }
                ThroughputEvent::Finished(result) => {
                    if let Ok(measurement) = &result {
                        self.state.speed.current_speed = measurement.mbps;
                    }
                    return result;
                }
            }
        }

        Err(NetcheckError::AllConnectionsFailed(
            "measurement task stopped unexpectedly".to_string(),
        ))
    }

    /// Append to the history log. A failed write is logged, the measurement
    /// result still stands.
    fn record(&mut self, record: DiagnosticRecord) {
        if let Err(e) = self.history.append(record) {
            warn!("Failed to persist history record: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network_analyzer::{DiagnosticKind, UNAVAILABLE_ADDRESS};
    use crate::settings::Endpoints;
    use crate::store::MemoryStore;

    // Nothing listens on the discard port
    const DEAD_URL: &str = "http://127.0.0.1:9/";

    fn unreachable_checker() -> NetworkChecker<MemoryStore> {
        let mut settings = NetcheckSettings::default();
        settings.endpoints = Endpoints {
            probes: crate::network_analyzer::ProbeEndpoints {
                ip_lookup_url: DEAD_URL.to_string(),
                httpbin_ping_url: DEAD_URL.to_string(),
                cloudflare_ping_url: DEAD_URL.to_string(),
            },
            download_url: DEAD_URL.to_string(),
            upload_url: DEAD_URL.to_string(),
        };
        settings.request_timeout_secs = 2;
        settings.history_capacity = 5;
        settings.download.hard_timeout_ms = 2_000;
        NetworkChecker::from_settings(&settings, MemoryStore::new()).unwrap()
    }

    #[tokio::test]
    async fn test_latency_requires_connectivity() {
        let mut checker = unreachable_checker();

        let result = checker.measure_latency(LatencyTarget::Httpbin).await;
        assert!(matches!(result, Err(NetcheckError::Offline)));
        assert!(checker.history().load_all().is_empty());
        assert!(checker.state().last_latency.is_none());
    }

    #[tokio::test]
    async fn test_offline_check_is_recorded() {
        let mut checker = unreachable_checker();

        let report = checker.check_connectivity().await;
        assert!(!report.is_online());
        assert!(!checker.state().checking);
        assert!(checker.state().last_checked.is_some());

        let records = checker.history().load_all();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].kind(), DiagnosticKind::Connectivity);
        assert_eq!(records[0].source_address, UNAVAILABLE_ADDRESS);

        // still offline, so latency stays refused
        let result = checker.measure_latency(LatencyTarget::Cloudflare).await;
        assert!(matches!(result, Err(NetcheckError::Offline)));
    }

    #[tokio::test]
    async fn test_failed_speed_test_records_empty_throughput() {
        let mut checker = unreachable_checker();
        let mut updates = 0;

        let result = checker
            .run_speed_test(LatencyTarget::Httpbin, true, |_| updates += 1)
            .await;
        assert!(result.is_err());
        assert!(updates >= 2);

        let state = checker.state();
        assert!(!state.speed.running);
        assert!(state.speed.results.is_none());

        let records = checker.history().load_all();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].kind(), DiagnosticKind::Throughput);
        assert_eq!(records[0].download_mbps(), None);
        assert_eq!(records[0].upload_mbps(), None);
        assert!(checker.last_samples().is_none());
    }

    #[test]
    fn test_preferences_share_the_history_store() {
        let mut checker = unreachable_checker();
        let prefs = Preferences {
            animation_enabled: false,
            latency_target: LatencyTarget::Cloudflare,
        };
        checker.save_preferences(&prefs).unwrap();
        assert_eq!(checker.preferences(), prefs);
        assert!(checker.history().load_all().is_empty());
    }
}
