//! Network Analyzer Types
//!
//! State structs, enums, and result types for network diagnostics

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Address reported when the public address could not be looked up
pub const UNAVAILABLE_ADDRESS: &str = "Unable to retrieve";

// ═══════════════════════════════════════════════════════════════════════════════
//  CONNECTIVITY & LATENCY
// ═══════════════════════════════════════════════════════════════════════════════

/// Reachability reported by a connectivity probe
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectivityStatus {
    Online,
    Offline,
}

/// Outcome of a single connectivity probe
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConnectivityReport {
    pub status: ConnectivityStatus,
    /// Public address of this device, or [`UNAVAILABLE_ADDRESS`]
    pub address: String,
}

impl ConnectivityReport {
    pub fn online(address: impl Into<String>) -> Self {
        Self {
            status: ConnectivityStatus::Online,
            address: address.into(),
        }
    }

    pub fn offline() -> Self {
        Self {
            status: ConnectivityStatus::Offline,
            address: UNAVAILABLE_ADDRESS.to_string(),
        }
    }

    pub fn is_online(&self) -> bool {
        self.status == ConnectivityStatus::Online
    }
}

/// Which endpoint a latency probe targets
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LatencyTarget {
    #[default]
    Httpbin,
    Cloudflare,
}

impl LatencyTarget {
    pub fn label(&self) -> &'static str {
        match self {
            LatencyTarget::Httpbin => "httpbin.org",
            LatencyTarget::Cloudflare => "Cloudflare",
        }
    }
}

/// Statistics over a series of latency probes
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LatencyStats {
    /// Average latency in milliseconds
    pub avg_ms: f64,
    pub min_ms: u32,
    pub max_ms: u32,
    /// Jitter (standard deviation) in milliseconds
    pub jitter_ms: f64,
    /// Failed probes as a percentage (0.0 - 100.0)
    pub packet_loss: f64,
    /// Number of successful probes
    pub sample_count: usize,
}

// ═══════════════════════════════════════════════════════════════════════════════
//  HISTORY RECORDS
// ═══════════════════════════════════════════════════════════════════════════════

/// Category of a history record
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DiagnosticKind {
    Connectivity,
    Latency,
    Throughput,
}

/// Measured values of a history record, tagged by kind.
///
/// Only the fields belonging to a kind exist on that variant; absent values
/// are skipped when serialized rather than written as zero.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum DiagnosticOutcome {
    Connectivity {
        online: bool,
    },
    Latency {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        latency_ms: Option<u32>,
    },
    Throughput {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        download_mbps: Option<f64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        upload_mbps: Option<f64>,
    },
}

/// One entry in the history log. Immutable once created.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DiagnosticRecord {
    pub source_address: String,
    pub observed_at: chrono::DateTime<chrono::Utc>,
    #[serde(flatten)]
    pub outcome: DiagnosticOutcome,
}

impl DiagnosticRecord {
    pub fn connectivity(report: &ConnectivityReport) -> Self {
        Self::now(
            &report.address,
            DiagnosticOutcome::Connectivity {
                online: report.is_online(),
            },
        )
    }

    pub fn latency(source_address: &str, latency_ms: Option<u32>) -> Self {
        Self::now(source_address, DiagnosticOutcome::Latency { latency_ms })
    }

    /// Negative or non-finite figures are dropped, never stored.
    pub fn throughput(
        source_address: &str,
        download_mbps: Option<f64>,
        upload_mbps: Option<f64>,
    ) -> Self {
        let valid = |v: f64| v.is_finite() && v >= 0.0;
        Self::now(
            source_address,
            DiagnosticOutcome::Throughput {
                download_mbps: download_mbps.filter(|v| valid(*v)),
                upload_mbps: upload_mbps.filter(|v| valid(*v)),
            },
        )
    }

    fn now(source_address: &str, outcome: DiagnosticOutcome) -> Self {
        Self {
            source_address: source_address.to_string(),
            observed_at: chrono::Utc::now(),
            outcome,
        }
    }

    pub fn kind(&self) -> DiagnosticKind {
        match self.outcome {
            DiagnosticOutcome::Connectivity { .. } => DiagnosticKind::Connectivity,
            DiagnosticOutcome::Latency { .. } => DiagnosticKind::Latency,
            DiagnosticOutcome::Throughput { .. } => DiagnosticKind::Throughput,
        }
    }

    pub fn latency_ms(&self) -> Option<u32> {
        match self.outcome {
            DiagnosticOutcome::Latency { latency_ms } => latency_ms,
            _ => None,
        }
    }

    pub fn download_mbps(&self) -> Option<f64> {
        match self.outcome {
            DiagnosticOutcome::Throughput { download_mbps, .. } => download_mbps,
            _ => None,
        }
    }

    pub fn upload_mbps(&self) -> Option<f64> {
        match self.outcome {
            DiagnosticOutcome::Throughput { upload_mbps, .. } => upload_mbps,
            _ => None,
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
//  THROUGHPUT TYPES
// ═══════════════════════════════════════════════════════════════════════════════

/// Transfer direction of a throughput run
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Download,
    Upload,
}

impl Direction {
    pub fn label(&self) -> &'static str {
        match self {
            Direction::Download => "Download",
            Direction::Upload => "Upload",
        }
    }
}

/// One instantaneous measurement during a running throughput test
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct ThroughputSample {
    pub elapsed_seconds: f64,
    /// Running average since the start of the run
    pub speed_mbps: f64,
}

/// Why a throughput run stopped
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StopReason {
    /// Every connection finished its transfer
    Completed,
    /// Recent speed samples converged
    Stable,
    /// Hard timeout cancelled in-flight connections
    TimedOut,
}

/// Progress update emitted on every sampling tick
#[derive(Clone, Debug)]
pub struct ThroughputProgress {
    pub direction: Direction,
    pub sample: ThroughputSample,
    /// Bytes received (or handed to the transport) so far
    pub bytes_transferred: u64,
    /// Progress 0.0 - 1.0, the larger of bytes and time fractions
    pub fraction: f64,
    /// Human-readable phase message
    pub message: String,
}

/// Final result of one throughput direction
#[derive(Clone, Debug)]
pub struct ThroughputMeasurement {
    pub direction: Direction,
    pub bytes_transferred: u64,
    pub elapsed: Duration,
    pub mbps: f64,
    pub samples: Vec<ThroughputSample>,
    pub connections_completed: usize,
    pub connections_aborted: usize,
    pub connections_failed: usize,
    pub stop_reason: StopReason,
}

/// Event yielded by a running throughput test
#[derive(Debug)]
pub enum ThroughputEvent {
    Progress(ThroughputProgress),
    /// Always the last event of a run
    Finished(crate::error::Result<ThroughputMeasurement>),
}

// ═══════════════════════════════════════════════════════════════════════════════
//  SESSION STATE
// ═══════════════════════════════════════════════════════════════════════════════

/// Current phase of the speed test
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SpeedTestPhase {
    Idle,
    Latency,
    Download,
    Upload,
    Complete,
}

impl SpeedTestPhase {
    pub fn label(&self) -> &'static str {
        match self {
            SpeedTestPhase::Idle => "Ready",
            SpeedTestPhase::Latency => "Measuring Latency",
            SpeedTestPhase::Download => "Testing Download",
            SpeedTestPhase::Upload => "Testing Upload",
            SpeedTestPhase::Complete => "Complete",
        }
    }
}

/// Results from a completed speed test
#[derive(Clone, Debug, PartialEq)]
pub struct SpeedTestResults {
    /// Download speed in Mbps, `None` when the download phase failed
    pub download_mbps: Option<f64>,
    /// Upload speed in Mbps, `None` when skipped or failed
    pub upload_mbps: Option<f64>,
    /// Latency series taken before the transfers
    pub latency: Option<LatencyStats>,
    /// Host the test ran against
    pub server: String,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

/// State of the speed test
#[derive(Clone, Debug)]
pub struct SpeedTestState {
    pub running: bool,
    pub phase: SpeedTestPhase,
    /// Latest running speed in Mbps for the current phase
    pub current_speed: f64,
    /// Progress 0.0 - 1.0 for current phase
    pub phase_progress: f64,
    /// Latest phase message
    pub message: String,
    /// Samples of the current phase
    pub samples: Vec<ThroughputSample>,
    pub results: Option<SpeedTestResults>,
}

impl Default for SpeedTestState {
    fn default() -> Self {
        Self {
            running: false,
            phase: SpeedTestPhase::Idle,
            current_speed: 0.0,
            phase_progress: 0.0,
            message: String::new(),
            samples: Vec::new(),
            results: None,
        }
    }
}

/// Everything a front end needs to render one diagnostics session
#[derive(Clone, Debug, Default)]
pub struct CheckerState {
    /// Result of the last connectivity probe, `None` before the first one
    pub connectivity: Option<ConnectivityReport>,
    pub checking: bool,
    pub pinging: bool,
    /// Last latency result; `Some(None)` means the probe failed
    pub last_latency: Option<Option<u32>>,
    pub last_checked: Option<chrono::DateTime<chrono::Utc>>,
    pub speed: SpeedTestState,
}

impl CheckerState {
    pub fn is_online(&self) -> bool {
        self.connectivity
            .as_ref()
            .is_some_and(ConnectivityReport::is_online)
    }

    /// Address to stamp on new records
    pub fn source_address(&self) -> &str {
        self.connectivity
            .as_ref()
            .map(|c| c.address.as_str())
            .unwrap_or(UNAVAILABLE_ADDRESS)
    }
}
