//! Throughput Estimator
//!
//! Measures download and upload bandwidth against Cloudflare's speed test
//! endpoints (`__down?bytes=N` streams N bytes back, `__up` accepts any body).
//! Several connections run at once to get past single-connection ceilings;
//! their byte counts feed one running total that is sampled on a fixed cadence.

use super::types::{
    Direction, StopReason, ThroughputEvent, ThroughputMeasurement, ThroughputProgress,
    ThroughputSample,
};
use crate::error::{NetcheckError, Result};
use futures_util::future::join_all;
use futures_util::{Stream, StreamExt};
use log::{debug, error, info, warn};
use rand::RngCore;
use reqwest::header::{CACHE_CONTROL, CONTENT_LENGTH, CONTENT_TYPE};
use reqwest::{Body, Client};
use serde::{Deserialize, Serialize};
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

/// Cloudflare speed test download endpoint
/// __down?bytes=N returns N random bytes
pub const DOWNLOAD_URL: &str = "https://speed.cloudflare.com/__down";

/// Cloudflare speed test upload endpoint
pub const UPLOAD_URL: &str = "https://speed.cloudflare.com/__up";

/// Chunk size for upload bodies (64 KB)
const CHUNK_SIZE: usize = 65536;

/// Connect timeout; the run itself is bounded by the hard timeout
const CONNECT_TIMEOUT_SECS: u64 = 10;

/// Early stop once recent interval speeds converge
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StabilityConfig {
    /// Never stop on stability before this much time has passed
    pub min_duration_ms: u64,
    /// Number of most recent interval speeds inspected
    pub window: usize,
    /// Stable when variance < threshold * mean
    pub threshold: f64,
}

impl Default for StabilityConfig {
    fn default() -> Self {
        Self {
            min_duration_ms: 15_000,
            window: 5,
            threshold: 0.1,
        }
    }
}

impl StabilityConfig {
    pub fn min_duration(&self) -> Duration {
        Duration::from_millis(self.min_duration_ms)
    }
}

/// How the final figure is derived from a run
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum FinalEstimate {
    /// Total bytes over total elapsed time
    #[default]
    Average,
    /// Highest of the last `window` running-average samples, which hides a
    /// slow TCP ramp-up
    PeakSustained { window: usize },
}

/// Parameters of one throughput direction
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ThroughputConfig {
    /// Bytes requested across all connections
    pub total_bytes: u64,
    /// Concurrent connections
    pub connections: usize,
    /// In-flight connections are cancelled after this long
    pub hard_timeout_ms: u64,
    /// Progress sampling cadence
    pub sample_interval_ms: u64,
    /// `None` disables the stability stop
    pub stability: Option<StabilityConfig>,
    pub final_estimate: FinalEstimate,
}

impl Default for ThroughputConfig {
    fn default() -> Self {
        Self::download_default()
    }
}

impl ThroughputConfig {
    /// 100 MB over 4 connections
    pub fn download_default() -> Self {
        Self {
            total_bytes: 100_000_000,
            connections: 4,
            hard_timeout_ms: 30_000,
            sample_interval_ms: 100,
            stability: Some(StabilityConfig::default()),
            final_estimate: FinalEstimate::Average,
        }
    }

    /// 25 MB over 4 connections - upload is typically slower
    pub fn upload_default() -> Self {
        Self {
            total_bytes: 25_000_000,
            ..Self::download_default()
        }
    }

    pub fn hard_timeout(&self) -> Duration {
        Duration::from_millis(self.hard_timeout_ms)
    }

    pub fn sample_interval(&self) -> Duration {
        Duration::from_millis(self.sample_interval_ms)
    }

    pub fn validate(&self) -> Result<()> {
        if self.connections == 0 {
            return Err(NetcheckError::InvalidConfig(
                "connections must be at least 1".to_string(),
            ));
        }
        if self.total_bytes == 0 {
            return Err(NetcheckError::InvalidConfig(
                "total_bytes must be greater than 0".to_string(),
            ));
        }
        if self.sample_interval_ms == 0 {
            return Err(NetcheckError::InvalidConfig(
                "sample_interval_ms must be greater than 0".to_string(),
            ));
        }
        if self.hard_timeout_ms == 0 {
            return Err(NetcheckError::InvalidConfig(
                "hard_timeout_ms must be greater than 0".to_string(),
            ));
        }
        if let FinalEstimate::PeakSustained { window: 0 } = self.final_estimate {
            return Err(NetcheckError::InvalidConfig(
                "peak sustained window must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Split `total` bytes across `connections` as evenly as possible.
///
/// The remainder goes one byte at a time to the first connections, so the
/// shares differ by at most one and always sum to `total`.
pub fn partition_bytes(total: u64, connections: usize) -> Vec<u64> {
    if connections == 0 {
        return Vec::new();
    }
    let count = connections as u64;
    let base = total / count;
    let remainder = total % count;
    (0..count).map(|i| base + u64::from(i < remainder)).collect()
}

/// Megabits per second for `bytes` moved in `elapsed`
pub fn compute_mbps(bytes: u64, elapsed: Duration) -> f64 {
    let secs = elapsed.as_secs_f64();
    if secs <= 0.0 {
        return 0.0;
    }
    (bytes as f64 * 8.0) / secs / 1_000_000.0
}

/// True once more than `window` speeds exist and the last `window` of them
/// have a population variance below `threshold * mean`.
pub fn is_stable(speeds: &[f64], window: usize, threshold: f64) -> bool {
    if window == 0 || speeds.len() <= window {
        return false;
    }
    let recent = &speeds[speeds.len() - window..];
    let mean = recent.iter().sum::<f64>() / window as f64;
    if mean <= 0.0 {
        return false;
    }
    let variance = recent
        .iter()
        .map(|speed| {
            let diff = speed - mean;
            diff * diff
        })
        .sum::<f64>()
        / window as f64;
    variance < mean * threshold
}

/// Final Mbps figure for a run under the given policy
pub fn final_estimate(
    policy: FinalEstimate,
    bytes: u64,
    elapsed: Duration,
    samples: &[ThroughputSample],
) -> f64 {
    let average = compute_mbps(bytes, elapsed);
    match policy {
        FinalEstimate::Average => average,
        FinalEstimate::PeakSustained { window } => samples
            .iter()
            .rev()
            .take(window)
            .map(|s| s.speed_mbps)
            .reduce(f64::max)
            .unwrap_or(average),
    }
}

/// How a single connection ended
#[derive(Debug, PartialEq, Eq)]
enum ConnectionOutcome {
    Completed(u64),
    /// Cancelled by timeout, stability stop or the caller
    Aborted(u64),
    Failed { bytes: u64, error: String },
}

/// Runs download and upload measurements
#[derive(Clone)]
pub struct ThroughputEstimator {
    client: Client,
    download_url: String,
    upload_url: String,
    download: ThroughputConfig,
    upload: ThroughputConfig,
}

impl ThroughputEstimator {
    pub fn new(
        download_url: impl Into<String>,
        upload_url: impl Into<String>,
        download: ThroughputConfig,
        upload: ThroughputConfig,
    ) -> Result<Self> {
        // No overall request timeout: long transfers are bounded by the
        // per-run hard timeout instead.
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS))
            .user_agent(concat!("netcheck/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| NetcheckError::HttpClient(e.to_string()))?;

        Ok(Self {
            client,
            download_url: download_url.into(),
            upload_url: upload_url.into(),
            download,
            upload,
        })
    }

    pub fn download_config(&self) -> &ThroughputConfig {
        &self.download
    }

    pub fn download_config_mut(&mut self) -> &mut ThroughputConfig {
        &mut self.download
    }

    pub fn upload_config(&self) -> &ThroughputConfig {
        &self.upload
    }

    pub fn upload_config_mut(&mut self) -> &mut ThroughputConfig {
        &mut self.upload
    }

    /// Host name of the download endpoint, for display
    pub fn server(&self) -> String {
        reqwest::Url::parse(&self.download_url)
            .ok()
            .and_then(|url| url.host_str().map(str::to_string))
            .unwrap_or_else(|| self.download_url.clone())
    }

    /// Start a download measurement.
    ///
    /// Must be called from within a Tokio runtime. The returned run yields
    /// progress events and ends with exactly one `Finished` event.
    pub fn measure_download(&self) -> ThroughputRun {
        self.start(Direction::Download)
    }

    /// Start an upload measurement. Same contract as [`measure_download`].
    ///
    /// [`measure_download`]: ThroughputEstimator::measure_download
    pub fn measure_upload(&self) -> ThroughputRun {
        self.start(Direction::Upload)
    }

    fn start(&self, direction: Direction) -> ThroughputRun {
        let (url, config) = match direction {
            Direction::Download => (self.download_url.clone(), self.download.clone()),
            Direction::Upload => (self.upload_url.clone(), self.upload.clone()),
        };
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();

        let test = ThroughputTest {
            client: self.client.clone(),
            url,
            config,
            direction,
            cancel: cancel.clone(),
            events: events_tx,
        };

        tokio::spawn(async move {
            let result = test.execute().await;
            let _ = test.events.send(ThroughputEvent::Finished(result));
        });

        ThroughputRun {
            events: events_rx,
            cancel,
        }
    }
}

/// Handle to a running measurement.
///
/// Consume it as a [`Stream`] of [`ThroughputEvent`]s, or call
/// [`finish`](ThroughputRun::finish) to skip progress. Dropping the handle
/// cancels every in-flight connection.
pub struct ThroughputRun {
    events: mpsc::UnboundedReceiver<ThroughputEvent>,
    cancel: CancellationToken,
}

impl ThroughputRun {
    /// Stop the run early; the partial result is still reported
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Wait for the final result, discarding progress events
    pub async fn finish(mut self) -> Result<ThroughputMeasurement> {
        while let Some(event) = self.next().await {
            if let ThroughputEvent::Finished(result) = event {
                return result;
            }
        }
        Err(NetcheckError::AllConnectionsFailed(
            "measurement task stopped unexpectedly".to_string(),
        ))
    }
}

impl Stream for ThroughputRun {
    type Item = ThroughputEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.events.poll_recv(cx)
    }
}

impl Drop for ThroughputRun {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// One in-flight measurement, owned by its spawned task
struct ThroughputTest {
    client: Client,
    url: String,
    config: ThroughputConfig,
    direction: Direction,
    cancel: CancellationToken,
    events: mpsc::UnboundedSender<ThroughputEvent>,
}

impl ThroughputTest {
    async fn execute(&self) -> Result<ThroughputMeasurement> {
        self.config.validate()?;

        let shares = partition_bytes(self.config.total_bytes, self.config.connections);
        info!(
            "Starting {} test: {} bytes over {} connections to {}",
            self.direction.label(),
            self.config.total_bytes,
            shares.len(),
            self.url
        );

        let total = Arc::new(AtomicU64::new(0));
        let start = Instant::now();
        let deadline = start + self.config.hard_timeout();

        let transfers = join_all(
            shares
                .iter()
                .enumerate()
                .map(|(index, &share)| self.transfer(index, share, Arc::clone(&total))),
        );
        tokio::pin!(transfers);

        let mut ticker = tokio::time::interval_at(
            start + self.config.sample_interval(),
            self.config.sample_interval(),
        );
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let mut samples: Vec<ThroughputSample> = Vec::new();
        let mut interval_speeds: Vec<f64> = Vec::new();
        let mut last_bytes: u64 = 0;
        let mut last_tick = start;
        let mut stop_reason: Option<StopReason> = None;

        let outcomes = loop {
            tokio::select! {
                outcomes = &mut transfers => break outcomes,
                _ = tokio::time::sleep_until(deadline), if stop_reason.is_none() => {
                    info!(
                        "{} test reached hard timeout after {:?}",
                        self.direction.label(),
                        self.config.hard_timeout()
                    );
                    stop_reason = Some(StopReason::TimedOut);
                    self.cancel.cancel();
                }
                now = ticker.tick() => {
                    let bytes = total.load(Ordering::Relaxed);
                    let elapsed = now.duration_since(start);
                    let sample = ThroughputSample {
                        elapsed_seconds: elapsed.as_secs_f64(),
                        speed_mbps: compute_mbps(bytes, elapsed),
                    };
                    interval_speeds.push(compute_mbps(
                        bytes.saturating_sub(last_bytes),
                        now.duration_since(last_tick),
                    ));
                    last_bytes = bytes;
                    last_tick = now;
                    samples.push(sample);

                    let progress = self.progress(sample, bytes, elapsed);
                    if self.events.send(ThroughputEvent::Progress(progress)).is_err() {
                        debug!("Progress receiver dropped, cancelling {} test", self.direction.label());
                        self.cancel.cancel();
                    }

                    if stop_reason.is_none() {
                        if let Some(stability) = &self.config.stability {
                            if elapsed >= stability.min_duration()
                                && is_stable(&interval_speeds, stability.window, stability.threshold)
                            {
                                info!(
                                    "{} speed stable at {:.2} Mbps after {:.1}s",
                                    self.direction.label(),
                                    sample.speed_mbps,
                                    sample.elapsed_seconds
                                );
                                stop_reason = Some(StopReason::Stable);
                                self.cancel.cancel();
                            }
                        }
                    }
                }
            }
        };

        let elapsed = start.elapsed();
        let connection_count = outcomes.len();
        let mut bytes_transferred: u64 = 0;
        let mut completed = 0;
        let mut aborted = 0;
        let mut failed = 0;
        let mut last_error = String::new();

        for (index, outcome) in outcomes.into_iter().enumerate() {
            match outcome {
                ConnectionOutcome::Completed(bytes) => {
                    completed += 1;
                    bytes_transferred += bytes;
                }
                ConnectionOutcome::Aborted(bytes) => {
                    aborted += 1;
                    bytes_transferred += bytes;
                }
                ConnectionOutcome::Failed { bytes, error } => {
                    warn!(
                        "{} connection {} failed after {} bytes, dropping it: {}",
                        self.direction.label(),
                        index,
                        bytes,
                        error
                    );
                    failed += 1;
                    last_error = error;
                }
            }
        }

        if failed == connection_count {
            error!(
                "{} test failed: all {} connections failed",
                self.direction.label(),
                connection_count
            );
            return Err(NetcheckError::AllConnectionsFailed(format!(
                "{} of {} connections failed, last error: {}",
                failed, connection_count, last_error
            )));
        }

        if bytes_transferred == 0 {
            return Err(NetcheckError::NoData);
        }

        let mbps = final_estimate(
            self.config.final_estimate,
            bytes_transferred,
            elapsed,
            &samples,
        );

        info!(
            "{} test complete: {:.2} Mbps ({} bytes in {:.2}s, {} ok, {} aborted, {} failed)",
            self.direction.label(),
            mbps,
            bytes_transferred,
            elapsed.as_secs_f64(),
            completed,
            aborted,
            failed
        );

        Ok(ThroughputMeasurement {
            direction: self.direction,
            bytes_transferred,
            elapsed,
            mbps,
            samples,
            connections_completed: completed,
            connections_aborted: aborted,
            connections_failed: failed,
            stop_reason: stop_reason.unwrap_or(StopReason::Completed),
        })
    }

    fn progress(&self, sample: ThroughputSample, bytes: u64, elapsed: Duration) -> ThroughputProgress {
        let byte_fraction = bytes as f64 / self.config.total_bytes as f64;
        let time_fraction = elapsed.as_secs_f64() / self.config.hard_timeout().as_secs_f64();
        let verb = match self.direction {
            Direction::Download => "DOWNLOADING",
            Direction::Upload => "UPLOADING",
        };

        ThroughputProgress {
            direction: self.direction,
            sample,
            bytes_transferred: bytes,
            fraction: byte_fraction.max(time_fraction).min(1.0),
            message: format!(
                "{} {:.1} MB @ {:.1} Mbps",
                verb,
                bytes as f64 / 1_000_000.0,
                sample.speed_mbps
            ),
        }
    }

    async fn transfer(&self, index: usize, share: u64, total: Arc<AtomicU64>) -> ConnectionOutcome {
        let outcome = match self.direction {
            Direction::Download => {
                self.download_connection(index, share, Arc::clone(&total))
                    .await
            }
            Direction::Upload => {
                self.upload_connection(index, share, Arc::clone(&total))
                    .await
            }
        };

        // Failed connections leave the live total as well as the final one
        if let ConnectionOutcome::Failed { bytes, .. } = &outcome {
            total.fetch_sub(*bytes, Ordering::Relaxed);
        }
        outcome
    }

    async fn download_connection(
        &self,
        index: usize,
        share: u64,
        total: Arc<AtomicU64>,
    ) -> ConnectionOutcome {
        debug!("Connection {} requesting {} bytes from {}", index, share, self.url);

        let request = self
            .client
            .get(&self.url)
            .query(&[("bytes", share)])
            .header(CACHE_CONTROL, "no-cache")
            .send();

        let response = tokio::select! {
            _ = self.cancel.cancelled() => return ConnectionOutcome::Aborted(0),
            response = request => response,
        };

        let response = match response {
            Ok(r) => r,
            Err(e) => {
                return ConnectionOutcome::Failed {
                    bytes: 0,
                    error: format!("Download request failed: {}", e),
                };
            }
        };

        if !response.status().is_success() {
            return ConnectionOutcome::Failed {
                bytes: 0,
                error: format!("Download failed with status: {}", response.status()),
            };
        }

        let mut stream = response.bytes_stream();
        let mut received: u64 = 0;

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    debug!("Connection {} aborted after {} bytes", index, received);
                    return ConnectionOutcome::Aborted(received);
                }
                chunk = stream.next() => match chunk {
                    Some(Ok(chunk)) => {
                        let len = chunk.len() as u64;
                        received += len;
                        total.fetch_add(len, Ordering::Relaxed);
                    }
                    Some(Err(e)) => {
                        return ConnectionOutcome::Failed {
                            bytes: received,
                            error: format!("Download stream error: {}", e),
                        };
                    }
                    None => {
                        debug!("Connection {} finished: {} bytes", index, received);
                        return ConnectionOutcome::Completed(received);
                    }
                },
            }
        }
    }

    async fn upload_connection(
        &self,
        index: usize,
        share: u64,
        total: Arc<AtomicU64>,
    ) -> ConnectionOutcome {
        debug!("Connection {} uploading {} bytes to {}", index, share, self.url);

        let sent = Arc::new(AtomicU64::new(0));
        let request = self
            .client
            .post(&self.url)
            .header(CONTENT_TYPE, "application/octet-stream")
            .header(CONTENT_LENGTH, share.to_string())
            .header(CACHE_CONTROL, "no-cache")
            .body(random_body(share, Arc::clone(&sent), total))
            .send();

        let response = tokio::select! {
            _ = self.cancel.cancelled() => {
                let bytes = sent.load(Ordering::Relaxed);
                debug!("Connection {} aborted after {} bytes", index, bytes);
                return ConnectionOutcome::Aborted(bytes);
            }
            response = request => response,
        };

        let bytes = sent.load(Ordering::Relaxed);
        match response {
            Ok(r) if r.status().is_success() => {
                debug!("Connection {} finished: {} bytes", index, bytes);
                ConnectionOutcome::Completed(bytes)
            }
            Ok(r) => ConnectionOutcome::Failed {
                bytes,
                error: format!("Upload failed with status: {}", r.status()),
            },
            Err(e) => ConnectionOutcome::Failed {
                bytes,
                error: format!("Upload request failed: {}", e),
            },
        }
    }
}

/// Streaming body of `len` uniformly random bytes, generated one chunk at a
/// time. Each chunk is counted when the HTTP client pulls it from the body,
/// so a cancelled upload may include one chunk still buffered in the client.
fn random_body(len: u64, sent: Arc<AtomicU64>, total: Arc<AtomicU64>) -> Body {
    let chunks = (0..len)
        .step_by(CHUNK_SIZE)
        .map(move |offset| (len - offset).min(CHUNK_SIZE as u64) as usize);

    let stream = futures_util::stream::iter(chunks).map(move |size| {
        let mut chunk = vec![0u8; size];
        rand::thread_rng().fill_bytes(&mut chunk);
        sent.fetch_add(size as u64, Ordering::Relaxed);
        total.fetch_add(size as u64, Ordering::Relaxed);
        Ok::<_, std::io::Error>(chunk)
    });

    Body::wrap_stream(stream)
}
