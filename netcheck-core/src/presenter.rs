//! Status presentation helpers
//!
//! Severity bands and display strings for measured values. Front ends pick
//! colors from [`Severity`]; nothing here does I/O.

use crate::network_analyzer::{
    CheckerState, ConnectivityReport, DiagnosticOutcome, DiagnosticRecord, SpeedTestResults,
};

/// Display severity of a result
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Good,
    Moderate,
    High,
    Critical,
}

impl Severity {
    /// Latency bands: < 500ms, < 750ms, < 1000ms, everything else.
    /// A failed probe is critical.
    pub fn from_latency(latency_ms: Option<u32>) -> Self {
        match latency_ms {
            Some(ms) if ms < 500 => Severity::Good,
            Some(ms) if ms < 750 => Severity::Moderate,
            Some(ms) if ms < 1000 => Severity::High,
            _ => Severity::Critical,
        }
    }

    /// Throughput bands on the mean of download and upload:
    /// > 800 Mbps, > 400 Mbps, > 100 Mbps, everything else.
    /// Without an upload figure the download is rated alone; without a
    /// download figure the run is critical.
    pub fn from_throughput(download_mbps: Option<f64>, upload_mbps: Option<f64>) -> Self {
        let Some(download) = download_mbps else {
            return Severity::Critical;
        };
        let avg = match upload_mbps {
            Some(upload) => (download + upload) / 2.0,
            None => download,
        };
        if avg > 800.0 {
            Severity::Good
        } else if avg > 400.0 {
            Severity::Moderate
        } else if avg > 100.0 {
            Severity::High
        } else {
            Severity::Critical
        }
    }

    pub fn from_connectivity(online: bool) -> Self {
        if online {
            Severity::Good
        } else {
            Severity::Critical
        }
    }

    pub fn from_record(record: &DiagnosticRecord) -> Self {
        match record.outcome {
            DiagnosticOutcome::Connectivity { online } => Severity::from_connectivity(online),
            DiagnosticOutcome::Latency { latency_ms } => Severity::from_latency(latency_ms),
            DiagnosticOutcome::Throughput {
                download_mbps,
                upload_mbps,
            } => Severity::from_throughput(download_mbps, upload_mbps),
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Severity::Good => "Good",
            Severity::Moderate => "Moderate",
            Severity::High => "High",
            Severity::Critical => "Critical",
        }
    }
}

/// Short status shown for a history record
pub fn record_status(record: &DiagnosticRecord) -> String {
    match record.outcome {
        DiagnosticOutcome::Connectivity { online: true } => "ONLINE".to_string(),
        DiagnosticOutcome::Connectivity { online: false } => "OFFLINE".to_string(),
        DiagnosticOutcome::Latency {
            latency_ms: Some(ms),
        } => format!("{}ms", ms),
        DiagnosticOutcome::Latency { latency_ms: None } => "PING FAIL".to_string(),
        DiagnosticOutcome::Throughput {
            download_mbps: Some(down),
            upload_mbps: Some(up),
        } => format!("{:.0}/{:.0} Mbps", down, up),
        DiagnosticOutcome::Throughput {
            download_mbps: Some(down),
            upload_mbps: None,
        } => format!("{:.0} Mbps down", down),
        DiagnosticOutcome::Throughput { .. } => "SPEED FAIL".to_string(),
    }
}

/// Banner text after a connectivity check
pub fn connectivity_banner(report: &ConnectivityReport) -> &'static str {
    if report.is_online() {
        "CONNECTED"
    } else {
        "DISCONNECTED"
    }
}

/// Banner text after a latency probe
pub fn latency_banner(latency_ms: Option<u32>) -> String {
    match latency_ms {
        Some(ms) => format!("{}ms", ms),
        None => "PING FAILED".to_string(),
    }
}

/// Banner text after a speed test
pub fn speed_banner(results: &SpeedTestResults) -> String {
    match (results.download_mbps, results.upload_mbps) {
        (Some(down), Some(up)) => format!("{:.1}/{:.1} Mbps", down, up),
        (Some(down), None) => format!("{:.1} Mbps", down),
        _ => "SPEED TEST FAILED".to_string(),
    }
}

/// Severity of whatever the session measured last
pub fn current_severity(state: &CheckerState) -> Severity {
    if let Some(results) = &state.speed.results {
        return Severity::from_throughput(results.download_mbps, results.upload_mbps);
    }
    if let Some(latency) = state.last_latency {
        return Severity::from_latency(latency);
    }
    Severity::from_connectivity(state.is_online())
}

/// Format speed for display (e.g., "125.5 Mbps" or "1.2 Gbps")
pub fn format_speed(mbps: f64) -> String {
    if mbps >= 1000.0 {
        format!("{:.1} Gbps", mbps / 1000.0)
    } else if mbps >= 100.0 {
        format!("{:.0} Mbps", mbps)
    } else if mbps >= 10.0 {
        format!("{:.1} Mbps", mbps)
    } else {
        format!("{:.2} Mbps", mbps)
    }
}
