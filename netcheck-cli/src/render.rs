//! Terminal output

use chrono::Local;
use netcheck_core::network_analyzer::{
    DiagnosticKind, DiagnosticRecord, LatencyStats, SpeedTestPhase, SpeedTestResults,
    SpeedTestState,
};
use netcheck_core::presenter::{Severity, format_speed, record_status};
use std::io::{IsTerminal, Write};
use std::time::Duration;

const RULE: &str = "━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━";
const BAR_WIDTH: usize = 30;
const TYPE_DELAY_MS: u64 = 100;

pub fn print_header() {
    println!("╔══════════════════════════════════════════════════════════════════╗");
    println!("║           NETCHECK // network diagnostics                        ║");
    println!("╚══════════════════════════════════════════════════════════════════╝");
}

pub fn print_section(title: &str) {
    println!("\n{}", RULE);
    println!("{}", title);
    println!("{}", RULE);
}

/// Print `text` one character at a time when animation is on and stdout is
/// a terminal, otherwise all at once
pub async fn type_line(text: &str, animate: bool) {
    let mut stdout = std::io::stdout();
    if !animate || !stdout.is_terminal() {
        println!("{}", text);
        return;
    }

    for c in text.chars() {
        print!("{}", c);
        let _ = stdout.flush();
        tokio::time::sleep(Duration::from_millis(TYPE_DELAY_MS)).await;
    }
    println!();
}

pub fn severity_tag(severity: Severity) -> String {
    format!("[{}]", severity.label().to_uppercase())
}

fn progress_bar(fraction: f64) -> String {
    let filled = (fraction.clamp(0.0, 1.0) * BAR_WIDTH as f64).round() as usize;
    format!("{}{}", "█".repeat(filled), "░".repeat(BAR_WIDTH - filled))
}

/// One redrawable line for the running speed test
pub fn progress_line(state: &SpeedTestState) -> String {
    match state.phase {
        SpeedTestPhase::Download | SpeedTestPhase::Upload => format!(
            "  {:<16} {} {:>5.1}%  {}",
            state.phase.label(),
            progress_bar(state.phase_progress),
            state.phase_progress * 100.0,
            format_speed(state.current_speed)
        ),
        _ => format!("  {:<16} {}", state.phase.label(), state.message),
    }
}

pub fn print_progress(state: &SpeedTestState) {
    let mut stdout = std::io::stdout();
    if stdout.is_terminal() {
        print!("\r\x1b[2K{}", progress_line(state));
        let _ = stdout.flush();
    }
}

pub fn print_latency_stats(stats: &LatencyStats) {
    println!(
        "  Min: {}ms | Avg: {:.1}ms | Max: {}ms | Jitter: {:.1}ms | Loss: {:.0}%",
        stats.min_ms, stats.avg_ms, stats.max_ms, stats.jitter_ms, stats.packet_loss
    );
}

pub fn print_results(results: &SpeedTestResults) {
    print_section("Results Summary");

    if let Some(latency) = &results.latency {
        println!(
            "  Latency:    {:.1} ms (jitter: {:.1} ms)",
            latency.avg_ms, latency.jitter_ms
        );
    }
    match results.download_mbps {
        Some(mbps) => println!("  Download:   {}", format_speed(mbps)),
        None => println!("  Download:   FAILED"),
    }
    match results.upload_mbps {
        Some(mbps) => println!("  Upload:     {}", format_speed(mbps)),
        None => println!("  Upload:     --"),
    }
    println!("  Server:     {}", results.server);
    println!(
        "  Rating:     {}",
        severity_tag(Severity::from_throughput(
            results.download_mbps,
            results.upload_mbps
        ))
    );
    println!("{}", RULE);
}

fn kind_label(kind: DiagnosticKind) -> &'static str {
    match kind {
        DiagnosticKind::Connectivity => "CONN",
        DiagnosticKind::Latency => "PING",
        DiagnosticKind::Throughput => "SPEED",
    }
}

pub fn history_row(record: &DiagnosticRecord) -> String {
    format!(
        "  {}  {:<5}  {:<18}  {:<10}  {}",
        record
            .observed_at
            .with_timezone(&Local)
            .format("%Y-%m-%d %H:%M:%S"),
        kind_label(record.kind()),
        record_status(record),
        severity_tag(Severity::from_record(record)),
        record.source_address
    )
}

pub fn print_history(records: &[DiagnosticRecord]) {
    print_section("Connection Log");
    if records.is_empty() {
        println!("  No entries");
        return;
    }
    for record in records {
        println!("{}", history_row(record));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_progress_bar_bounds() {
        assert_eq!(progress_bar(0.0).chars().filter(|&c| c == '█').count(), 0);
        assert_eq!(progress_bar(1.0).chars().filter(|&c| c == '█').count(), BAR_WIDTH);
        assert_eq!(progress_bar(2.0).chars().count(), BAR_WIDTH);
        assert_eq!(progress_bar(0.5).chars().filter(|&c| c == '░').count(), 15);
    }

    #[test]
    fn test_progress_line_shows_message_outside_transfers() {
        let state = SpeedTestState {
            phase: SpeedTestPhase::Latency,
            message: "MEASURING LATENCY...".to_string(),
            ..Default::default()
        };
        let line = progress_line(&state);
        assert!(line.contains("Measuring Latency"));
        assert!(line.contains("MEASURING LATENCY..."));
    }

    #[test]
    fn test_progress_line_during_download() {
        let state = SpeedTestState {
            phase: SpeedTestPhase::Download,
            phase_progress: 0.25,
            current_speed: 50.5,
            ..Default::default()
        };
        let line = progress_line(&state);
        assert!(line.contains("25.0%"));
        assert!(line.contains("50.5 Mbps"));
    }

    #[test]
    fn test_history_row() {
        let record = DiagnosticRecord::latency("203.0.113.7", Some(620));
        let row = history_row(&record);
        assert!(row.contains("PING"));
        assert!(row.contains("620ms"));
        assert!(row.contains("[MODERATE]"));
        assert!(row.ends_with("203.0.113.7"));
    }
}
