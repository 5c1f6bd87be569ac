use crate::signal::IncidentSignal;
use crate::triage::{AffectedDevice, EstimatedBlastRadius};

/// How many distinct lots/models the summary carries at most.
const SUMMARY_CAP: usize = 5;

/// Aggregate the ranked device list into blast-radius statistics.
///
/// Lots and models are deduplicated in first-encountered order and capped
/// at 5 each; blank or unresolved values are skipped. An empty list is a
/// valid input and yields a zero-count radius.
pub fn estimate_blast_radius(
    affected: &[AffectedDevice],
    signal: &IncidentSignal,
) -> EstimatedBlastRadius {
    let affected_lots = distinct_capped(affected.iter().filter_map(|d| d.lot_number.as_deref()));
    let affected_models = distinct_capped(affected.iter().filter_map(|d| d.model.as_deref()));

    let geo_summary = format!(
        "Within {:.0}m of ({:.5}, {:.5})",
        signal.radius_meters(),
        signal.latitude(),
        signal.longitude()
    );
    let time_summary = format!(
        "From {} to {}",
        signal.from().format("%Y-%m-%dT%H:%M:%S"),
        signal.to().format("%Y-%m-%dT%H:%M:%S")
    );

    EstimatedBlastRadius {
        affected_count: affected.len(),
        affected_lots,
        affected_models,
        geo_summary,
        time_summary,
    }
}

fn distinct_capped<'a>(values: impl Iterator<Item = &'a str>) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for v in values {
        if v.trim().is_empty() {
            continue;
        }
        if out.iter().any(|seen| seen == v) {
            continue;
        }
        out.push(v.to_string());
        if out.len() == SUMMARY_CAP {
            break;
        }
    }
    out
}
