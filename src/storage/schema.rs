//! Database schema and migrations.

use anyhow::Result;
use rusqlite::Connection;

/// Run all pending migrations.
pub fn migrate(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE TABLE IF NOT EXISTS devices (
            serial_number TEXT PRIMARY KEY,
            kind TEXT NOT NULL,
            model TEXT NOT NULL,
            firmware_version TEXT NOT NULL,
            manufacturer TEXT NOT NULL,
            lot_number TEXT NOT NULL,
            owner_ref TEXT NOT NULL,
            installed_at TEXT NOT NULL,
            created_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE TABLE IF NOT EXISTS monitoring_logs (
            id INTEGER PRIMARY KEY,
            serial_number TEXT NOT NULL,
            owner_ref TEXT NOT NULL,
            ts TEXT NOT NULL,
            power_uw REAL NOT NULL,
            cpu_pct REAL NOT NULL,
            latency_ms REAL NOT NULL,
            lon REAL NOT NULL,
            lat REAL NOT NULL
        );

        CREATE TABLE IF NOT EXISTS incident_cases (
            id TEXT PRIMARY KEY,
            risk_level TEXT NOT NULL,
            case_json TEXT NOT NULL,
            created_at TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_monitoring_logs_ts ON monitoring_logs(ts);
        CREATE INDEX IF NOT EXISTS idx_monitoring_logs_serial ON monitoring_logs(serial_number);
        CREATE INDEX IF NOT EXISTS idx_devices_lot ON devices(lot_number);
        CREATE INDEX IF NOT EXISTS idx_incident_cases_created ON incident_cases(created_at);",
    )?;

    Ok(())
}
