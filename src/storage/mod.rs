//! SQLite storage layer -- schema, queries, migrations.
//!
//! Implements both gateway contracts ([`EvidenceStore`], [`DeviceRegistry`])
//! on an embedded database. The time-range predicate runs in SQL; the radial
//! filter runs in the application over the fetched window (fetch-and-filter
//! is fine for embedded-scale windows). The pipeline itself never sees any
//! of this -- it only talks to the traits.

pub mod schema;

use crate::registry::{DeviceRecord, DeviceRegistry};
use crate::telemetry::{EvidenceSet, EvidenceStore, GeoPoint, MonitoringLogEntry, MonitoringStats};
use crate::triage::IncidentCase;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use r2d2::Pool as R2D2Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{params, OptionalExtension};

/// Connection Pool type
pub type Pool = R2D2Pool<SqliteConnectionManager>;

/// Open (or create) the SQLite database and return a connection pool.
pub fn open_pool(path: &str) -> Result<Pool> {
    if let Some(parent) = std::path::Path::new(path).parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let manager = SqliteConnectionManager::file(path).with_init(|c| {
        c.execute_batch(
            "PRAGMA journal_mode = WAL;
                 PRAGMA synchronous = NORMAL;
                 PRAGMA temp_store = MEMORY;
                 PRAGMA foreign_keys = ON;
                 PRAGMA busy_timeout = 5000;",
        )
    });

    let pool = R2D2Pool::new(manager)?;

    // Run migrations on a single connection
    let conn = pool.get()?;
    schema::migrate(&conn)?;

    Ok(pool)
}

/// Register (or replace) a device record.
pub fn save_device(pool: &Pool, device: &DeviceRecord) -> Result<()> {
    let conn = pool.get()?;
    conn.execute(
        "INSERT OR REPLACE INTO devices
         (serial_number, kind, model, firmware_version, manufacturer, lot_number, owner_ref, installed_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            device.serial_number,
            device.kind,
            device.model,
            device.firmware_version,
            device.manufacturer,
            device.lot_number,
            device.owner_ref,
            device.installed_at,
        ],
    )?;
    Ok(())
}

/// Append telemetry observations in one transaction.
pub fn save_log_entries(pool: &Pool, entries: &[MonitoringLogEntry]) -> Result<()> {
    let mut conn = pool.get()?;
    let tx = conn.transaction()?;
    {
        let mut stmt = tx.prepare(
            "INSERT INTO monitoring_logs
             (serial_number, owner_ref, ts, power_uw, cpu_pct, latency_ms, lon, lat)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        )?;
        for e in entries {
            stmt.execute(params![
                e.serial_number,
                e.owner_ref,
                e.timestamp.to_rfc3339(),
                e.power_uw,
                e.cpu_pct,
                e.latency_ms,
                e.location.lon,
                e.location.lat,
            ])?;
        }
    }
    tx.commit()?;
    Ok(())
}

/// Persist an assembled case for the incidents listing.
pub fn save_case(pool: &Pool, case: &IncidentCase) -> Result<()> {
    let conn = pool.get()?;
    let case_json = serde_json::to_string(case)?;
    conn.execute(
        "INSERT INTO incident_cases (id, risk_level, case_json, created_at)
         VALUES (?1, ?2, ?3, ?4)",
        params![
            case.id.to_string(),
            case.assessment.risk_level.to_string(),
            case_json,
            case.created_at.to_rfc3339(),
        ],
    )?;
    Ok(())
}

/// Most recent cases, newest first.
pub fn list_recent_cases(pool: &Pool, limit: usize) -> Result<Vec<IncidentCase>> {
    let conn = pool.get()?;
    let mut stmt = conn.prepare(
        "SELECT case_json FROM incident_cases ORDER BY created_at DESC LIMIT ?1",
    )?;
    let rows = stmt.query_map([limit], |row| row.get::<_, String>(0))?;

    let mut cases = Vec::new();
    for r in rows {
        let json = r?;
        cases.push(serde_json::from_str(&json).context("corrupt case_json in incident_cases")?);
    }
    Ok(cases)
}

pub fn count_devices(pool: &Pool) -> Result<i64> {
    let conn = pool.get()?;
    let count = conn.query_row("SELECT COUNT(*) FROM devices", [], |row| row.get(0))?;
    Ok(count)
}

/// Both gateways, backed by the embedded database.
#[derive(Clone)]
pub struct SqliteStore {
    pool: Pool,
}

impl SqliteStore {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl EvidenceStore for SqliteStore {
    async fn find_logs_by_area_and_time(
        &self,
        center: GeoPoint,
        radius_meters: f64,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<EvidenceSet> {
        let pool = self.pool.clone();
        let from_s = from.to_rfc3339();
        let to_s = to.to_rfc3339();

        // Time filter in SQL (inclusive both ends); the window is then
        // filtered radially in-app. Row order fixes the group encounter
        // order: timestamp, then serial, then insert order.
        let entries = tokio::task::spawn_blocking(move || -> Result<Vec<MonitoringLogEntry>> {
            let conn = pool.get()?;
            let mut stmt = conn.prepare(
                "SELECT serial_number, owner_ref, ts, power_uw, cpu_pct, latency_ms, lon, lat
                 FROM monitoring_logs
                 WHERE ts >= ?1 AND ts <= ?2
                 ORDER BY ts ASC, serial_number ASC, id ASC",
            )?;

            let rows = stmt.query_map(params![from_s, to_s], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, f64>(3)?,
                    row.get::<_, f64>(4)?,
                    row.get::<_, f64>(5)?,
                    row.get::<_, f64>(6)?,
                    row.get::<_, f64>(7)?,
                ))
            })?;

            let mut entries = Vec::new();
            for r in rows {
                let (serial_number, owner_ref, ts, power_uw, cpu_pct, latency_ms, lon, lat) = r?;
                let timestamp = DateTime::parse_from_rfc3339(&ts)
                    .context("bad timestamp in monitoring_logs")?
                    .with_timezone(&Utc);
                entries.push(MonitoringLogEntry {
                    serial_number,
                    owner_ref,
                    timestamp,
                    power_uw,
                    cpu_pct,
                    latency_ms,
                    location: GeoPoint::new(lon, lat),
                });
            }
            Ok(entries)
        })
        .await??;

        Ok(entries
            .into_iter()
            .filter(|e| center.distance_meters(&e.location) <= radius_meters)
            .collect())
    }

    async fn aggregate_stats(
        &self,
        serial_number: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Option<MonitoringStats>> {
        let pool = self.pool.clone();
        let serial = serial_number.to_string();
        let from_s = from.to_rfc3339();
        let to_s = to.to_rfc3339();

        tokio::task::spawn_blocking(move || -> Result<Option<MonitoringStats>> {
            let conn = pool.get()?;
            let (count, power, cpu, latency): (u64, Option<f64>, Option<f64>, Option<f64>) = conn
                .query_row(
                    "SELECT COUNT(*), AVG(power_uw), AVG(cpu_pct), AVG(latency_ms)
                     FROM monitoring_logs
                     WHERE serial_number = ?1 AND ts >= ?2 AND ts <= ?3",
                    params![serial, from_s, to_s],
                    |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
                )?;

            if count == 0 {
                return Ok(None);
            }
            Ok(Some(MonitoringStats {
                serial_number: serial,
                avg_power_uw: power.unwrap_or(0.0),
                avg_cpu_pct: cpu.unwrap_or(0.0),
                avg_latency_ms: latency.unwrap_or(0.0),
                sample_count: count,
            }))
        })
        .await?
    }
}

#[async_trait::async_trait]
impl DeviceRegistry for SqliteStore {
    async fn resolve_device(&self, serial_number: &str) -> Result<Option<DeviceRecord>> {
        let pool = self.pool.clone();
        let serial = serial_number.to_string();

        tokio::task::spawn_blocking(move || -> Result<Option<DeviceRecord>> {
            let conn = pool.get()?;
            let record = conn
                .query_row(
                    "SELECT serial_number, kind, model, firmware_version, manufacturer,
                            lot_number, owner_ref, installed_at
                     FROM devices WHERE serial_number = ?1",
                    params![serial],
                    |row| {
                        Ok(DeviceRecord {
                            serial_number: row.get(0)?,
                            kind: row.get(1)?,
                            model: row.get(2)?,
                            firmware_version: row.get(3)?,
                            manufacturer: row.get(4)?,
                            lot_number: row.get(5)?,
                            owner_ref: row.get(6)?,
                            installed_at: row.get(7)?,
                        })
                    },
                )
                .optional()?;
            Ok(record)
        })
        .await?
    }

    async fn find_serials_by_lot(&self, lot_number: &str) -> Result<Vec<String>> {
        let pool = self.pool.clone();
        let lot = lot_number.to_string();

        tokio::task::spawn_blocking(move || -> Result<Vec<String>> {
            let conn = pool.get()?;
            let mut stmt = conn.prepare(
                "SELECT serial_number FROM devices WHERE lot_number = ?1 ORDER BY serial_number",
            )?;
            let rows = stmt.query_map(params![lot], |row| row.get::<_, String>(0))?;
            let mut serials = Vec::new();
            for r in rows {
                serials.push(r?);
            }
            Ok(serials)
        })
        .await?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tempfile::TempDir;

    fn test_pool() -> (TempDir, Pool) {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("test.db");
        let pool = open_pool(path.to_str().unwrap()).unwrap();
        (dir, pool)
    }

    fn entry(serial: &str, ts: DateTime<Utc>, cpu: f64, loc: GeoPoint) -> MonitoringLogEntry {
        MonitoringLogEntry {
            serial_number: serial.to_string(),
            owner_ref: "dJ-71032254-JQ".to_string(),
            timestamp: ts,
            power_uw: 2.0,
            cpu_pct: cpu,
            latency_ms: 20.0,
            location: loc,
        }
    }

    fn device(serial: &str, lot: &str) -> DeviceRecord {
        DeviceRecord {
            serial_number: serial.to_string(),
            kind: "ocular".to_string(),
            model: "Model-gOq543".to_string(),
            firmware_version: "3.8".to_string(),
            manufacturer: "SynthForge".to_string(),
            lot_number: lot.to_string(),
            owner_ref: "dJ-71032254-JQ".to_string(),
            installed_at: "2024-01-17".to_string(),
        }
    }

    #[tokio::test]
    async fn time_bounds_are_inclusive_both_ends() {
        let (_dir, pool) = test_pool();
        let here = GeoPoint::new(-73.9855, 40.7580);
        let from = Utc.with_ymd_and_hms(2026, 2, 2, 2, 0, 0).unwrap();
        let to = Utc.with_ymd_and_hms(2026, 2, 2, 4, 0, 0).unwrap();

        save_log_entries(
            &pool,
            &[
                entry("A-1", from - chrono::Duration::seconds(1), 50.0, here),
                entry("A-1", from, 51.0, here),
                entry("A-1", to, 52.0, here),
                entry("A-1", to + chrono::Duration::seconds(1), 53.0, here),
            ],
        )
        .unwrap();

        let store = SqliteStore::new(pool);
        let set = store
            .find_logs_by_area_and_time(here, 1000.0, from, to)
            .await
            .unwrap();

        assert_eq!(set.total_entries(), 2);
        let cpus: Vec<f64> = set.groups()[0].entries.iter().map(|e| e.cpu_pct).collect();
        assert_eq!(cpus, [51.0, 52.0]);
    }

    #[tokio::test]
    async fn radial_filter_drops_distant_devices() {
        let (_dir, pool) = test_pool();
        let brooklyn = GeoPoint::new(-73.9780, 40.6782);
        let boston = GeoPoint::new(-71.0589, 42.3601);
        let ts = Utc.with_ymd_and_hms(2026, 2, 2, 2, 30, 0).unwrap();
        let from = Utc.with_ymd_and_hms(2026, 2, 2, 2, 0, 0).unwrap();
        let to = Utc.with_ymd_and_hms(2026, 2, 2, 4, 0, 0).unwrap();

        save_log_entries(
            &pool,
            &[
                entry("NEAR-1", ts, 50.0, brooklyn),
                entry("FAR-1", ts, 99.0, boston),
            ],
        )
        .unwrap();

        let store = SqliteStore::new(pool);
        let set = store
            .find_logs_by_area_and_time(brooklyn, 5000.0, from, to)
            .await
            .unwrap();

        assert_eq!(set.len(), 1);
        assert_eq!(set.groups()[0].serial_number, "NEAR-1");
    }

    #[tokio::test]
    async fn empty_window_is_ok_not_error() {
        let (_dir, pool) = test_pool();
        let store = SqliteStore::new(pool);
        let from = Utc.with_ymd_and_hms(2026, 2, 2, 2, 0, 0).unwrap();
        let to = Utc.with_ymd_and_hms(2026, 2, 2, 4, 0, 0).unwrap();

        let set = store
            .find_logs_by_area_and_time(GeoPoint::new(0.0, 0.0), 1000.0, from, to)
            .await
            .unwrap();
        assert!(set.is_empty());
    }

    #[tokio::test]
    async fn groups_follow_timestamp_then_serial_order() {
        let (_dir, pool) = test_pool();
        let here = GeoPoint::new(-73.9855, 40.7580);
        let from = Utc.with_ymd_and_hms(2026, 2, 2, 2, 0, 0).unwrap();
        let to = Utc.with_ymd_and_hms(2026, 2, 2, 4, 0, 0).unwrap();

        save_log_entries(
            &pool,
            &[
                entry("B-2", from + chrono::Duration::minutes(5), 50.0, here),
                entry("A-1", from + chrono::Duration::minutes(10), 50.0, here),
                entry("C-3", from + chrono::Duration::minutes(1), 50.0, here),
            ],
        )
        .unwrap();

        let store = SqliteStore::new(pool);
        let set = store
            .find_logs_by_area_and_time(here, 1000.0, from, to)
            .await
            .unwrap();

        let serials: Vec<&str> = set
            .groups()
            .iter()
            .map(|g| g.serial_number.as_str())
            .collect();
        assert_eq!(serials, ["C-3", "B-2", "A-1"]);
    }

    #[tokio::test]
    async fn stats_average_the_window_and_miss_as_none() {
        let (_dir, pool) = test_pool();
        let here = GeoPoint::new(-73.9855, 40.7580);
        let from = Utc.with_ymd_and_hms(2026, 2, 2, 2, 0, 0).unwrap();
        let to = Utc.with_ymd_and_hms(2026, 2, 2, 4, 0, 0).unwrap();

        save_log_entries(
            &pool,
            &[
                entry("A-1", from, 40.0, here),
                entry("A-1", to, 60.0, here),
            ],
        )
        .unwrap();

        let store = SqliteStore::new(pool);
        let stats = store.aggregate_stats("A-1", from, to).await.unwrap().unwrap();
        assert_eq!(stats.sample_count, 2);
        assert!((stats.avg_cpu_pct - 50.0).abs() < 1e-9);

        assert!(store
            .aggregate_stats("NOPE", from, to)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn registry_resolves_and_lists_lots() {
        let (_dir, pool) = test_pool();
        save_device(&pool, &device("SF-746-OCU-1001", "746")).unwrap();
        save_device(&pool, &device("SF-746-OCU-1002", "746")).unwrap();
        save_device(&pool, &device("NC-289-CAR-1001", "289")).unwrap();

        let store = SqliteStore::new(pool);

        let rec = store.resolve_device("SF-746-OCU-1001").await.unwrap().unwrap();
        assert_eq!(rec.lot_number, "746");
        assert_eq!(rec.manufacturer, "SynthForge");

        assert!(store.resolve_device("GHOST-1").await.unwrap().is_none());

        let lot = store.find_serials_by_lot("746").await.unwrap();
        assert_eq!(lot, ["SF-746-OCU-1001", "SF-746-OCU-1002"]);
    }

    #[test]
    fn cases_round_trip_through_the_log() {
        use crate::signal::{IncidentSignal, Metric, SignalSpec};
        use crate::triage::*;

        let (_dir, pool) = test_pool();
        let signal = IncidentSignal::new(SignalSpec {
            longitude: -73.9780,
            latitude: 40.6782,
            radius_meters: 2000.0,
            from: Utc.with_ymd_and_hms(2026, 2, 2, 2, 0, 0).unwrap(),
            to: Utc.with_ymd_and_hms(2026, 2, 2, 4, 0, 0).unwrap(),
            metric: Metric::CpuUsagePct,
            threshold: 90.0,
        })
        .unwrap();

        let case = IncidentCase {
            id: uuid::Uuid::new_v4(),
            created_at: Utc::now(),
            signal: signal.clone(),
            assessment: IncidentAssessment {
                signal,
                evidence_group_count: 0,
                risk_level: RiskLevel::Low,
            },
            affected: vec![],
            gaps: vec![],
            hypothesis: RootCauseHypothesis {
                kind: HypothesisType::Environmental,
                confidence: 0.4,
                evidence: vec!["no clustering".to_string()],
            },
            plan: ContainmentPlan {
                steps: vec![ContainmentStep {
                    text: "Monitor the window for recurrence".to_string(),
                }],
                requires_approval: false,
                estimated_blast_radius: EstimatedBlastRadius {
                    affected_count: 0,
                    affected_lots: vec![],
                    affected_models: vec![],
                    geo_summary: "Within 2000m of (40.67820, -73.97800)".to_string(),
                    time_summary: "From 2026-02-02T02:00:00 to 2026-02-02T04:00:00".to_string(),
                },
            },
        };

        save_case(&pool, &case).unwrap();
        let cases = list_recent_cases(&pool, 10).unwrap();
        assert_eq!(cases.len(), 1);
        assert_eq!(cases[0].id, case.id);
        assert_eq!(cases[0].assessment.risk_level, RiskLevel::Low);
    }
}
