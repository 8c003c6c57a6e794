//! Progress reporting for long-running batch work.
//!
//! The queue emits [`BatchProgress`](crate::queue::BatchProgress)
//! snapshots through a plain callback; this module provides the stock
//! sinks those callbacks usually feed. [`StderrProgress`] writes a
//! human-readable line per update, [`JsonProgress`] writes one JSON
//! object per line for machine consumption, and [`NoProgress`] discards
//! everything. [`ProgressMode`] picks between them from configuration.

use serde::{Deserialize, Serialize};
use std::io::Write;

use crate::queue::BatchProgress;

/// A sink for batch progress snapshots.
pub trait ProgressReporter: Send + Sync {
    /// Record one progress update. `label` names the batch being run
    /// (e.g. a source id or an operation name).
    fn report(&self, label: &str, progress: &BatchProgress);
}

/// Which stock reporter to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProgressMode {
    #[default]
    Off,
    Human,
    Json,
}

impl ProgressMode {
    /// Build the reporter this mode names.
    pub fn reporter(&self) -> Box<dyn ProgressReporter> {
        match self {
            ProgressMode::Off => Box::new(NoProgress),
            ProgressMode::Human => Box::new(StderrProgress),
            ProgressMode::Json => Box::new(JsonProgress),
        }
    }
}

/// Discards all updates.
pub struct NoProgress;

impl ProgressReporter for NoProgress {
    fn report(&self, _label: &str, _progress: &BatchProgress) {}
}

/// Writes a human-readable line per update to stderr.
pub struct StderrProgress;

impl ProgressReporter for StderrProgress {
    fn report(&self, label: &str, progress: &BatchProgress) {
        let mut stderr = std::io::stderr().lock();
        let _ = writeln!(
            stderr,
            "{label}: {}/{} done, {} failed, {} in flight",
            format_number(progress.completed),
            format_number(progress.total),
            format_number(progress.failed),
            progress.in_flight,
        );
    }
}

/// Writes one JSON object per update to stderr.
///
/// Each line is a self-contained object with the label and the four
/// counters, suitable for line-oriented log processing.
pub struct JsonProgress;

impl ProgressReporter for JsonProgress {
    fn report(&self, label: &str, progress: &BatchProgress) {
        #[derive(Serialize)]
        struct Line<'a> {
            label: &'a str,
            #[serde(flatten)]
            progress: &'a BatchProgress,
        }
        if let Ok(line) = serde_json::to_string(&Line { label, progress }) {
            let mut stderr = std::io::stderr().lock();
            let _ = writeln!(stderr, "{line}");
        }
    }
}

/// Format a count with comma separators (1234567 -> "1,234,567").
fn format_number(n: usize) -> String {
    let digits = n.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(ch);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_number() {
        assert_eq!(format_number(0), "0");
        assert_eq!(format_number(999), "999");
        assert_eq!(format_number(1000), "1,000");
        assert_eq!(format_number(1234567), "1,234,567");
    }

    #[test]
    fn test_mode_parses_from_config() {
        let mode: ProgressMode = serde_json::from_str("\"json\"").unwrap();
        assert_eq!(mode, ProgressMode::Json);
        assert_eq!(ProgressMode::default(), ProgressMode::Off);
    }

    #[test]
    fn test_no_progress_is_silent() {
        // Smoke test: must not panic on any snapshot.
        NoProgress.report("batch", &BatchProgress::default());
    }
}
