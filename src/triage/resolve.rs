use crate::registry::DeviceRegistry;
use crate::signal::IncidentSignal;
use crate::telemetry::{EvidenceGroup, EvidenceSet};
use crate::triage::score::anomaly_score;
use crate::triage::{AffectedDevice, RegistryResolutionGap};
use std::cmp::Ordering;
use tracing::warn;

/// Resolver output: the ranked devices plus any per-device registry gaps.
#[derive(Debug, Default)]
pub struct ResolvedDevices {
    pub devices: Vec<AffectedDevice>,
    pub gaps: Vec<RegistryResolutionGap>,
}

/// Score and enrich every evidence group, ranked descending by anomaly score.
///
/// Ties keep the evidence set's encounter order (stable sort). Per-device
/// registry misses and lookup errors become `RegistryResolutionGap`
/// diagnostics on the output -- one unresolvable device never aborts the
/// run. Devices with empty evidence get a zero score and no registry call.
pub async fn resolve_affected_devices(
    evidence: &EvidenceSet,
    signal: &IncidentSignal,
    registry: &dyn DeviceRegistry,
) -> ResolvedDevices {
    // Scoring and lookups are independent per device; fan out concurrently.
    // join_all preserves input order, so the stable sort below sees groups
    // in encounter order regardless of completion order.
    let resolutions = futures::future::join_all(
        evidence
            .groups()
            .iter()
            .map(|group| resolve_one(group, signal, registry)),
    )
    .await;

    let mut resolved = ResolvedDevices::default();
    for (device, gap) in resolutions {
        resolved.devices.push(device);
        if let Some(gap) = gap {
            warn!(serial = %gap.serial_number, detail = %gap.detail, "Registry resolution gap");
            resolved.gaps.push(gap);
        }
    }

    // Stable: equal scores retain encounter order.
    resolved.devices.sort_by(|a, b| {
        b.anomaly_score
            .partial_cmp(&a.anomaly_score)
            .unwrap_or(Ordering::Equal)
    });

    resolved
}

async fn resolve_one(
    group: &EvidenceGroup,
    signal: &IncidentSignal,
    registry: &dyn DeviceRegistry,
) -> (AffectedDevice, Option<RegistryResolutionGap>) {
    let serial = group.serial_number.clone();

    if group.entries.is_empty() {
        // No evidence: zero score, unknown enrichment, and no registry
        // traffic for a device we have nothing on.
        return (
            AffectedDevice {
                serial_number: serial,
                lot_number: None,
                model: None,
                owner_ref: None,
                anomaly_score: 0.0,
            },
            None,
        );
    }

    let score = anomaly_score(&group.entries, signal.metric(), signal.threshold());

    match registry.resolve_device(&serial).await {
        Ok(Some(record)) => (
            AffectedDevice {
                serial_number: serial,
                lot_number: Some(record.lot_number),
                model: Some(record.model),
                owner_ref: Some(record.owner_ref),
                anomaly_score: score,
            },
            None,
        ),
        Ok(None) => {
            let gap = RegistryResolutionGap {
                serial_number: serial.clone(),
                detail: "device has telemetry evidence but no registry record".to_string(),
            };
            (degraded(serial, score), Some(gap))
        }
        Err(e) => {
            let gap = RegistryResolutionGap {
                serial_number: serial.clone(),
                detail: format!("registry lookup failed: {e:#}"),
            };
            (degraded(serial, score), Some(gap))
        }
    }
}

fn degraded(serial_number: String, anomaly_score: f64) -> AffectedDevice {
    AffectedDevice {
        serial_number,
        lot_number: None,
        model: None,
        owner_ref: None,
        anomaly_score,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::DeviceRecord;
    use crate::signal::{Metric, SignalSpec};
    use crate::telemetry::{GeoPoint, MonitoringLogEntry};
    use anyhow::{anyhow, Result};
    use chrono::{TimeZone, Utc};
    use std::collections::HashMap;

    struct StaticRegistry {
        records: HashMap<String, DeviceRecord>,
        fail_on: Option<String>,
    }

    impl StaticRegistry {
        fn with(serials: &[&str]) -> Self {
            let records = serials
                .iter()
                .map(|s| (s.to_string(), record(s)))
                .collect();
            Self {
                records,
                fail_on: None,
            }
        }
    }

    #[async_trait::async_trait]
    impl DeviceRegistry for StaticRegistry {
        async fn resolve_device(&self, serial_number: &str) -> Result<Option<DeviceRecord>> {
            if self.fail_on.as_deref() == Some(serial_number) {
                return Err(anyhow!("registry unreachable"));
            }
            Ok(self.records.get(serial_number).cloned())
        }

        async fn find_serials_by_lot(&self, lot_number: &str) -> Result<Vec<String>> {
            Ok(self
                .records
                .values()
                .filter(|r| r.lot_number == lot_number)
                .map(|r| r.serial_number.clone())
                .collect())
        }
    }

    fn record(serial: &str) -> DeviceRecord {
        DeviceRecord {
            serial_number: serial.to_string(),
            kind: "limb".to_string(),
            model: "Model-Dvb688".to_string(),
            firmware_version: "2.2".to_string(),
            manufacturer: "MechaMed".to_string(),
            lot_number: "536".to_string(),
            owner_ref: "Ww-33252326-jv".to_string(),
            installed_at: "2025-03-21".to_string(),
        }
    }

    fn signal() -> IncidentSignal {
        IncidentSignal::new(SignalSpec {
            longitude: -73.9780,
            latitude: 40.6782,
            radius_meters: 2000.0,
            from: Utc.with_ymd_and_hms(2026, 2, 2, 2, 0, 0).unwrap(),
            to: Utc.with_ymd_and_hms(2026, 2, 2, 4, 0, 0).unwrap(),
            metric: Metric::CpuUsagePct,
            threshold: 48.0,
        })
        .unwrap()
    }

    fn entry(serial: &str, cpu: f64) -> MonitoringLogEntry {
        MonitoringLogEntry {
            serial_number: serial.to_string(),
            owner_ref: "Ww-33252326-jv".to_string(),
            timestamp: Utc.with_ymd_and_hms(2026, 2, 2, 2, 30, 0).unwrap(),
            power_uw: 2.0,
            cpu_pct: cpu,
            latency_ms: 20.0,
            location: GeoPoint::new(-73.9780, 40.6782),
        }
    }

    #[tokio::test]
    async fn ranks_descending_with_enrichment() {
        let evidence: EvidenceSet = vec![
            entry("A-1", 60.0), // score 0.25
            entry("B-2", 96.0), // score 1.0
            entry("C-3", 72.0), // score 0.5
        ]
        .into_iter()
        .collect();
        let registry = StaticRegistry::with(&["A-1", "B-2", "C-3"]);

        let resolved = resolve_affected_devices(&evidence, &signal(), &registry).await;

        let order: Vec<&str> = resolved
            .devices
            .iter()
            .map(|d| d.serial_number.as_str())
            .collect();
        assert_eq!(order, ["B-2", "C-3", "A-1"]);
        assert!(resolved.gaps.is_empty());
        assert_eq!(resolved.devices[0].lot_number.as_deref(), Some("536"));
        assert_eq!(resolved.devices[0].owner_ref.as_deref(), Some("Ww-33252326-jv"));
    }

    #[tokio::test]
    async fn equal_scores_keep_encounter_order() {
        let evidence: EvidenceSet = vec![
            entry("Z-9", 96.0),
            entry("A-1", 96.0),
            entry("M-5", 96.0),
        ]
        .into_iter()
        .collect();
        let registry = StaticRegistry::with(&["Z-9", "A-1", "M-5"]);

        let resolved = resolve_affected_devices(&evidence, &signal(), &registry).await;

        let order: Vec<&str> = resolved
            .devices
            .iter()
            .map(|d| d.serial_number.as_str())
            .collect();
        assert_eq!(order, ["Z-9", "A-1", "M-5"]);
    }

    #[tokio::test]
    async fn empty_evidence_group_scores_zero_without_error() {
        let mut evidence = EvidenceSet::new();
        evidence.push_empty_group("X2");
        let registry = StaticRegistry::with(&[]);

        let resolved = resolve_affected_devices(&evidence, &signal(), &registry).await;

        assert_eq!(resolved.devices.len(), 1);
        let d = &resolved.devices[0];
        assert_eq!(d.serial_number, "X2");
        assert_eq!(d.anomaly_score, 0.0);
        assert_eq!(d.lot_number, None);
        assert_eq!(d.model, None);
        assert_eq!(d.owner_ref, None);
        assert!(resolved.gaps.is_empty());
    }

    #[tokio::test]
    async fn missing_registry_record_becomes_a_gap() {
        let evidence: EvidenceSet = vec![entry("X3", 96.0)].into_iter().collect();
        let registry = StaticRegistry::with(&[]); // nothing resolvable

        let resolved = resolve_affected_devices(&evidence, &signal(), &registry).await;

        assert_eq!(resolved.devices.len(), 1);
        let d = &resolved.devices[0];
        assert_eq!(d.serial_number, "X3");
        assert_eq!(d.anomaly_score, 1.0);
        assert_eq!(d.lot_number, None);

        assert_eq!(resolved.gaps.len(), 1);
        assert_eq!(resolved.gaps[0].serial_number, "X3");
    }

    #[tokio::test]
    async fn registry_error_degrades_one_device_not_the_run() {
        let evidence: EvidenceSet = vec![entry("A-1", 96.0), entry("B-2", 72.0)]
            .into_iter()
            .collect();
        let mut registry = StaticRegistry::with(&["A-1", "B-2"]);
        registry.fail_on = Some("A-1".to_string());

        let resolved = resolve_affected_devices(&evidence, &signal(), &registry).await;

        assert_eq!(resolved.devices.len(), 2);
        assert_eq!(resolved.gaps.len(), 1);
        assert_eq!(resolved.gaps[0].serial_number, "A-1");
        // the other device still resolved fully
        let b = resolved
            .devices
            .iter()
            .find(|d| d.serial_number == "B-2")
            .unwrap();
        assert_eq!(b.model.as_deref(), Some("Model-Dvb688"));
    }
}
