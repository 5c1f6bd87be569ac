use crate::signal::Metric;
use crate::telemetry::MonitoringLogEntry;

/// Normalized anomaly score for one device's evidence, in [0, 1].
///
/// Score is the exceed ratio of the worst observation,
/// `(max - threshold) / threshold`, capped at 1. No evidence means no
/// anomaly claim; a non-positive threshold scores 0 rather than dividing
/// (signal validation rules it out, the scorer still must not fail on it).
pub fn anomaly_score(entries: &[MonitoringLogEntry], metric: Metric, threshold: f64) -> f64 {
    if entries.is_empty() || threshold <= 0.0 {
        return 0.0;
    }

    let max = entries
        .iter()
        .map(|e| e.metric_value(metric))
        .fold(f64::NEG_INFINITY, f64::max);

    if max <= threshold {
        return 0.0;
    }

    ((max - threshold) / threshold).min(1.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::telemetry::GeoPoint;
    use chrono::{TimeZone, Utc};

    fn entry(cpu: f64) -> MonitoringLogEntry {
        MonitoringLogEntry {
            serial_number: "X1".to_string(),
            owner_ref: "gQ-01247486-nk".to_string(),
            timestamp: Utc.with_ymd_and_hms(2026, 2, 2, 2, 30, 0).unwrap(),
            power_uw: 2.0,
            cpu_pct: cpu,
            latency_ms: 20.0,
            location: GeoPoint::new(-73.9780, 40.6782),
        }
    }

    #[test]
    fn exceed_ratio_matches_scenario_b() {
        // cpu 96 against threshold 48: (96-48)/48 = 1.0
        let score = anomaly_score(&[entry(96.0)], Metric::CpuUsagePct, 48.0);
        assert_eq!(score, 1.0);
    }

    #[test]
    fn at_or_below_threshold_scores_zero() {
        assert_eq!(
            anomaly_score(&[entry(48.0)], Metric::CpuUsagePct, 48.0),
            0.0
        );
        assert_eq!(
            anomaly_score(&[entry(10.0), entry(30.0)], Metric::CpuUsagePct, 48.0),
            0.0
        );
    }

    #[test]
    fn partial_exceed_is_proportional_and_capped() {
        let score = anomaly_score(&[entry(60.0)], Metric::CpuUsagePct, 48.0);
        assert!((score - 0.25).abs() < 1e-9);

        // 10x the threshold still caps at 1
        let score = anomaly_score(&[entry(480.0)], Metric::CpuUsagePct, 48.0);
        assert_eq!(score, 1.0);
    }

    #[test]
    fn max_entry_drives_the_score() {
        let entries = [entry(50.0), entry(72.0), entry(49.0)];
        let score = anomaly_score(&entries, Metric::CpuUsagePct, 48.0);
        assert!((score - 0.5).abs() < 1e-9);
    }

    #[test]
    fn no_evidence_means_no_claim() {
        assert_eq!(anomaly_score(&[], Metric::CpuUsagePct, 48.0), 0.0);
    }

    #[test]
    fn non_positive_threshold_guard() {
        assert_eq!(anomaly_score(&[entry(96.0)], Metric::CpuUsagePct, 0.0), 0.0);
        assert_eq!(
            anomaly_score(&[entry(96.0)], Metric::CpuUsagePct, -1.0),
            0.0
        );
    }

    #[test]
    fn deterministic_for_identical_input() {
        let entries = [entry(60.0), entry(91.5)];
        let a = anomaly_score(&entries, Metric::CpuUsagePct, 48.0);
        let b = anomaly_score(&entries, Metric::CpuUsagePct, 48.0);
        assert_eq!(a, b);
    }
}
