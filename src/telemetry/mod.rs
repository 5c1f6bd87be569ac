//! Telemetry domain types and the evidence store gateway contract.

use crate::signal::Metric;
use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A WGS84 point, longitude first (matches the store's x/y convention).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lon: f64,
    pub lat: f64,
}

impl GeoPoint {
    pub fn new(lon: f64, lat: f64) -> Self {
        Self { lon, lat }
    }

    /// Great-circle distance to `other` in meters (haversine).
    pub fn distance_meters(&self, other: &GeoPoint) -> f64 {
        const EARTH_RADIUS_M: f64 = 6_371_000.0;

        let lat1 = self.lat.to_radians();
        let lat2 = other.lat.to_radians();
        let d_lat = (other.lat - self.lat).to_radians();
        let d_lon = (other.lon - self.lon).to_radians();

        let a = (d_lat / 2.0).sin().powi(2)
            + lat1.cos() * lat2.cos() * (d_lon / 2.0).sin().powi(2);
        let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());

        EARTH_RADIUS_M * c
    }
}

/// One telemetry observation reported by an implanted device.
///
/// Owned by the evidence store; the pipeline only reads these.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitoringLogEntry {
    pub serial_number: String,
    pub owner_ref: String,
    pub timestamp: DateTime<Utc>,
    pub power_uw: f64,
    pub cpu_pct: f64,
    pub latency_ms: f64,
    pub location: GeoPoint,
}

impl MonitoringLogEntry {
    /// The single metric lookup used by classification and scoring.
    pub fn metric_value(&self, metric: Metric) -> f64 {
        match metric {
            Metric::NeuralLatencyMs => self.latency_ms,
            Metric::CpuUsagePct => self.cpu_pct,
            Metric::PowerUsageUw => self.power_uw,
        }
    }
}

/// One device's log entries inside the signal window.
#[derive(Debug, Clone)]
pub struct EvidenceGroup {
    pub serial_number: String,
    pub entries: Vec<MonitoringLogEntry>,
}

/// Evidence grouped per device, in the store's encounter order.
///
/// Group order is load-bearing: it is the tie-break order when ranking
/// devices with equal anomaly scores. Keys are unique.
#[derive(Debug, Clone, Default)]
pub struct EvidenceSet {
    groups: Vec<EvidenceGroup>,
    index: HashMap<String, usize>,
}

impl EvidenceSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an entry to its device's group, creating the group on first
    /// encounter. Entries keep their push order within the group.
    pub fn push(&mut self, entry: MonitoringLogEntry) {
        match self.index.get(&entry.serial_number) {
            Some(&i) => self.groups[i].entries.push(entry),
            None => {
                self.index
                    .insert(entry.serial_number.clone(), self.groups.len());
                self.groups.push(EvidenceGroup {
                    serial_number: entry.serial_number.clone(),
                    entries: vec![entry],
                });
            }
        }
    }

    /// Register a device key with no entries (a valid zero-evidence group).
    pub fn push_empty_group(&mut self, serial_number: &str) {
        if !self.index.contains_key(serial_number) {
            self.index
                .insert(serial_number.to_string(), self.groups.len());
            self.groups.push(EvidenceGroup {
                serial_number: serial_number.to_string(),
                entries: Vec::new(),
            });
        }
    }

    /// Number of distinct devices.
    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    /// Total log entries across all devices.
    pub fn total_entries(&self) -> usize {
        self.groups.iter().map(|g| g.entries.len()).sum()
    }

    pub fn groups(&self) -> &[EvidenceGroup] {
        &self.groups
    }
}

impl FromIterator<MonitoringLogEntry> for EvidenceSet {
    fn from_iter<I: IntoIterator<Item = MonitoringLogEntry>>(iter: I) -> Self {
        let mut set = EvidenceSet::new();
        for entry in iter {
            set.push(entry);
        }
        set
    }
}

/// Per-device averages over a time window.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitoringStats {
    pub serial_number: String,
    pub avg_power_uw: f64,
    pub avg_cpu_pct: f64,
    pub avg_latency_ms: f64,
    pub sample_count: u64,
}

/// Gateway to the geo+time indexed telemetry store.
///
/// The pipeline has no knowledge of the storage engine; distance semantics
/// (great-circle vs projected) are the store's call. An empty result is a
/// valid `Ok`, never an error.
#[async_trait::async_trait]
pub trait EvidenceStore: Send + Sync {
    /// All entries within `radius_meters` of `center` with
    /// `from <= timestamp <= to` (inclusive both ends), grouped by serial.
    async fn find_logs_by_area_and_time(
        &self,
        center: GeoPoint,
        radius_meters: f64,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<EvidenceSet>;

    /// Window averages for one device, `None` when it has no rows there.
    async fn aggregate_stats(
        &self,
        serial_number: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Option<MonitoringStats>>;
}
