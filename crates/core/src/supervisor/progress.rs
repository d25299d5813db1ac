//! Progress artifact parsing.
//!
//! The encoder appends `key=value` lines to a well-known file. Only
//! `out_time_ms` (microseconds of output, despite the name), `total_size`
//! (bytes written) and `progress` (`continue` or `end`) are used, and the
//! last occurrence of each wins.

use std::time::Duration;

use serde::Serialize;

/// Cumulative values parsed from the progress artifact.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProgressReport {
    pub out_time_us: Option<u64>,
    pub total_size: Option<u64>,
    /// `progress=end` was the last progress value seen.
    pub ended: bool,
}

impl ProgressReport {
    /// Nothing recognisable has been written yet.
    pub fn is_empty(&self) -> bool {
        self.out_time_us.is_none() && self.total_size.is_none() && !self.ended
    }
}

/// Parse the artifact contents.
///
/// A trailing line without a newline may still be being written and is
/// ignored, as are unknown keys and values that don't parse (ffmpeg writes
/// `N/A` before the first frame).
pub fn parse_progress(text: &str) -> ProgressReport {
    let complete = match text.rfind('\n') {
        Some(idx) => &text[..idx],
        None => return ProgressReport::default(),
    };

    let mut report = ProgressReport::default();
    for line in complete.lines() {
        let Some((key, value)) = line.trim().split_once('=') else {
            continue;
        };
        let value = value.trim();
        match key.trim() {
            "out_time_ms" => {
                if let Ok(v) = value.parse() {
                    report.out_time_us = Some(v);
                }
            }
            "total_size" => {
                if let Ok(v) = value.parse() {
                    report.total_size = Some(v);
                }
            }
            "progress" => report.ended = value == "end",
            _ => {}
        }
    }
    report
}

/// One observation of a running encode.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProgressSample {
    /// 0..=100, never decreasing within one monitor.
    pub percent: f64,
    /// Output media time encoded so far.
    pub out_time: Duration,
    /// Bytes written so far.
    pub total_size: u64,
    /// Wall-clock time since the encode started.
    pub elapsed: Duration,
    /// Bytes written per second of wall-clock time.
    pub bytes_per_sec: f64,
    /// Estimated time remaining.
    pub eta: Duration,
    /// The encoder reported completion.
    pub ended: bool,
}

/// Turns successive reports into samples for one encode.
#[derive(Debug, Clone)]
pub struct ProgressTracker {
    total_duration: Duration,
    last: Option<ProgressReport>,
    max_percent: f64,
}

impl ProgressTracker {
    pub fn new(total_duration: Duration) -> Self {
        Self {
            total_duration,
            last: None,
            max_percent: 0.0,
        }
    }

    /// Produce a sample if the report carries new information.
    pub fn observe(&mut self, report: ProgressReport, elapsed: Duration) -> Option<ProgressSample> {
        if report.is_empty() || self.last == Some(report) {
            return None;
        }
        self.last = Some(report);

        let out_time = Duration::from_micros(report.out_time_us.unwrap_or(0));
        let size = report.total_size.unwrap_or(0) as f64;

        let total_secs = self.total_duration.as_secs_f64();
        let raw_percent = if total_secs > 0.0 {
            out_time.as_secs_f64() / total_secs * 100.0
        } else {
            0.0
        };
        let percent = raw_percent.clamp(0.0, 100.0).max(self.max_percent);
        self.max_percent = percent;

        let bytes_per_sec = size / elapsed.as_secs_f64().max(1.0);
        let estimated_size = size / (percent / 100.0).max(0.01);
        let eta_secs = ((estimated_size - size) / bytes_per_sec.max(0.01)).max(0.0);

        Some(ProgressSample {
            percent,
            out_time,
            total_size: size as u64,
            elapsed,
            bytes_per_sec,
            eta: Duration::from_secs_f64(eta_secs.min(u32::MAX as f64)),
            ended: report.ended,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_last_occurrence_wins() {
        let text = "frame=10\nout_time_ms=500000\ntotal_size=1000\nprogress=continue\n\
                    frame=20\nout_time_ms=900000\ntotal_size=2000\nprogress=continue\n";
        let report = parse_progress(text);
        assert_eq!(report.out_time_us, Some(900_000));
        assert_eq!(report.total_size, Some(2000));
        assert!(!report.ended);
    }

    #[test]
    fn test_parse_end_sentinel() {
        let report = parse_progress("out_time_ms=1\nprogress=end\n");
        assert!(report.ended);
    }

    #[test]
    fn test_parse_empty_and_partial() {
        assert!(parse_progress("").is_empty());
        // Nothing complete yet.
        assert!(parse_progress("out_time_ms=12").is_empty());
        // The half-written tail is ignored.
        let report = parse_progress("out_time_ms=100\ntotal_size=5\nout_time_ms=2");
        assert_eq!(report.out_time_us, Some(100));
        assert_eq!(report.total_size, Some(5));
    }

    #[test]
    fn test_parse_ignores_unknown_and_unparsable() {
        let report = parse_progress("bitrate=N/A\nout_time_ms=N/A\nspeed=1.2x\ntotal_size=42\n");
        assert_eq!(report.out_time_us, None);
        assert_eq!(report.total_size, Some(42));
    }

    #[test]
    fn test_tracker_percent_and_rates() {
        let mut tracker = ProgressTracker::new(Duration::from_secs(2));
        let sample = tracker
            .observe(
                parse_progress("out_time_ms=500000\ntotal_size=1000000\n"),
                Duration::from_secs(4),
            )
            .unwrap();
        assert!((sample.percent - 25.0).abs() < 1e-9);
        assert_eq!(sample.total_size, 1_000_000);
        assert!((sample.bytes_per_sec - 250_000.0).abs() < 1e-6);
        // 1 MB at 25% means ~3 MB to go at 250 kB/s.
        assert_eq!(sample.eta.as_secs(), 12);
        assert!(!sample.ended);
    }

    #[test]
    fn test_tracker_skips_unchanged_reports() {
        let mut tracker = ProgressTracker::new(Duration::from_secs(10));
        let report = parse_progress("out_time_ms=1000000\n");
        assert!(tracker.observe(report, Duration::from_secs(1)).is_some());
        assert!(tracker.observe(report, Duration::from_secs(2)).is_none());
        assert!(tracker
            .observe(ProgressReport::default(), Duration::from_secs(3))
            .is_none());
    }

    #[test]
    fn test_tracker_percent_never_decreases_or_overflows() {
        let mut tracker = ProgressTracker::new(Duration::from_secs(1));
        let high = tracker
            .observe(parse_progress("out_time_ms=800000\n"), Duration::ZERO)
            .unwrap();
        let lower = tracker
            .observe(parse_progress("out_time_ms=400000\n"), Duration::ZERO)
            .unwrap();
        assert!(lower.percent >= high.percent);

        let over = tracker
            .observe(parse_progress("out_time_ms=5000000\n"), Duration::ZERO)
            .unwrap();
        assert_eq!(over.percent, 100.0);
    }

    #[test]
    fn test_tracker_zero_duration_and_zero_size() {
        let mut tracker = ProgressTracker::new(Duration::ZERO);
        let sample = tracker
            .observe(parse_progress("progress=continue\ntotal_size=0\n"), Duration::ZERO)
            .unwrap();
        assert_eq!(sample.percent, 0.0);
        assert_eq!(sample.eta, Duration::ZERO);
    }
}
