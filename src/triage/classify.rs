use crate::signal::IncidentSignal;
use crate::telemetry::EvidenceSet;
use crate::triage::RiskLevel;

/// Classify the risk level of an evidence set against a signal.
///
/// Counts entries whose selected metric is at or above the threshold and
/// applies a fixed ladder, first match wins:
///
/// - exceed >= 60 and devices >= 5 -> CRITICAL
/// - exceed >= 30 and devices >= 3 -> HIGH
/// - exceed >= 10                  -> MEDIUM
/// - otherwise                     -> LOW
pub fn classify_risk(evidence: &EvidenceSet, signal: &IncidentSignal) -> RiskLevel {
    if evidence.is_empty() {
        return RiskLevel::Low;
    }

    let distinct_devices = evidence.len();

    let exceed_count = evidence
        .groups()
        .iter()
        .flat_map(|g| g.entries.iter())
        .filter(|e| e.metric_value(signal.metric()) >= signal.threshold())
        .count();

    if exceed_count >= 60 && distinct_devices >= 5 {
        RiskLevel::Critical
    } else if exceed_count >= 30 && distinct_devices >= 3 {
        RiskLevel::High
    } else if exceed_count >= 10 {
        RiskLevel::Medium
    } else {
        RiskLevel::Low
    }
}
