//! Deterministic demo data -- a small implant fleet with three story arcs:
//! a multi-day telemetry baseline, a recall-likely lot spiking hard in one
//! borough, and a multivendor CPU-spike cluster that looks like an attack.

use crate::registry::DeviceRecord;
use crate::storage::{self, Pool};
use crate::telemetry::{GeoPoint, MonitoringLogEntry};
use anyhow::Result;
use chrono::{DateTime, Duration, Timelike, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::info;

const NYC_MIDTOWN: GeoPoint = GeoPoint {
    lon: -73.9855,
    lat: 40.7580,
};
const NYC_BROOKLYN: GeoPoint = GeoPoint {
    lon: -73.9780,
    lat: 40.6782,
};
const NYC_QUEENS: GeoPoint = GeoPoint {
    lon: -73.7949,
    lat: 40.7282,
};
const BOS_DOWNTOWN: GeoPoint = GeoPoint {
    lon: -71.0589,
    lat: 42.3601,
};
const PHL_CENTER: GeoPoint = GeoPoint {
    lon: -75.1652,
    lat: 39.9526,
};
const DC_DOWNTOWN: GeoPoint = GeoPoint {
    lon: -77.0369,
    lat: 38.9072,
};

const RECALL_LOT: &str = "536";

/// Owner references (national-ID style), stable across runs.
const OWNER_REFS: [&str; 14] = [
    "Ni-96751543-BP",
    "NP-59909166-Wg",
    "gQ-01247486-nk",
    "Ww-33252326-jv",
    "dJ-71032254-JQ",
    "Ew-42902984-rX",
    "Zy-82483905-hw",
    "fI-88901036-kD",
    "YD-99086969-CP",
    "MP-66879496-vg",
    "Qm-10488329-xA",
    "Jp-22019411-pL",
    "Rt-39012004-fQ",
    "Vb-48100291-qS",
];

/// Populate the database with the demo fleet and telemetry. No-op when
/// devices already exist.
pub fn seed_demo_data(pool: &Pool) -> Result<()> {
    if storage::count_devices(pool)? > 0 {
        info!("Demo data already present, skipping seed");
        return Ok(());
    }

    let mut rng = StdRng::seed_from_u64(7331);
    let devices = build_fleet();
    for d in &devices {
        storage::save_device(pool, d)?;
    }

    let now = Utc::now().with_second(0).unwrap().with_nanosecond(0).unwrap();
    let mut logs: Vec<MonitoringLogEntry> = Vec::new();

    // Baseline: 3 days, every 3 hours, for all devices.
    for d in &devices {
        let city = home_location(d);
        add_series(
            &mut logs,
            &mut rng,
            d,
            now - Duration::days(3),
            24,
            180,
            Baseline {
                power_uw: 1.6,
                cpu_pct: 18.0,
                latency_ms: 18.0,
                power_jitter: 0.6,
                cpu_jitter: 6.0,
                latency_jitter: 5.0,
            },
            city,
            0.010,
        );
    }

    // Richer 7-day history for a subset.
    for d in devices.iter().take(10) {
        let city = home_location(d);
        add_series(
            &mut logs,
            &mut rng,
            d,
            now - Duration::days(7),
            42,
            240,
            Baseline {
                power_uw: 1.7,
                cpu_pct: 20.0,
                latency_ms: 19.0,
                power_jitter: 0.7,
                cpu_jitter: 7.0,
                latency_jitter: 6.0,
            },
            city,
            0.012,
        );
    }

    // Incident anchor window for demo investigations.
    let incident_base = (now - Duration::days(1))
        .with_hour(2)
        .unwrap()
        .with_minute(0)
        .unwrap();

    // Recall-likely cluster: the MechaMed limb lot spikes latency and CPU,
    // tightly clustered in Brooklyn.
    for d in devices
        .iter()
        .filter(|d| d.manufacturer == "MechaMed" && d.lot_number == RECALL_LOT)
    {
        add_series(
            &mut logs,
            &mut rng,
            d,
            incident_base + Duration::minutes(10),
            30,
            2,
            Baseline {
                power_uw: 6.8,
                cpu_pct: 92.0,
                latency_ms: 160.0,
                power_jitter: 0.8,
                cpu_jitter: 4.0,
                latency_jitter: 12.0,
            },
            NYC_BROOKLYN,
            0.003,
        );
    }

    // Attack-likely cluster: many different devices spike CPU in the same
    // place and window; power stays near normal.
    for d in devices
        .iter()
        .filter(|d| !(d.manufacturer == "MechaMed" && d.lot_number == RECALL_LOT))
        .take(12)
    {
        add_series(
            &mut logs,
            &mut rng,
            d,
            incident_base + Duration::minutes(20),
            20,
            3,
            Baseline {
                power_uw: 2.2,
                cpu_pct: 96.0,
                latency_ms: 85.0,
                power_jitter: 0.5,
                cpu_jitter: 3.0,
                latency_jitter: 10.0,
            },
            NYC_QUEENS,
            0.004,
        );
    }

    // A single distant outlier to exercise false-positive handling.
    if let Some(d) = devices.last() {
        add_series(
            &mut logs,
            &mut rng,
            d,
            (now - Duration::days(5)).with_hour(23).unwrap().with_minute(15).unwrap(),
            25,
            4,
            Baseline {
                power_uw: 3.5,
                cpu_pct: 55.0,
                latency_ms: 200.0,
                power_jitter: 0.7,
                cpu_jitter: 8.0,
                latency_jitter: 18.0,
            },
            PHL_CENTER,
            0.006,
        );
    }

    storage::save_log_entries(pool, &logs)?;
    info!(devices = devices.len(), logs = logs.len(), "Demo data seeded");
    Ok(())
}

fn build_fleet() -> Vec<DeviceRecord> {
    let mut devices = Vec::new();

    // Recall-likely group: MechaMed limb lot 536, two models.
    make_batch(&mut devices, "limb", "Model-Dvb688", "2.2", "MechaMed", RECALL_LOT, "MM-536-DVB-", 4, "2025-03-21");
    make_batch(&mut devices, "limb", "Model-Jtv413", "1.3", "MechaMed", RECALL_LOT, "MM-536-JTV-", 2, "2025-04-03");

    // Known-bug-ish ocular lot (SynthForge).
    make_batch(&mut devices, "ocular", "Model-gOq543", "3.8", "SynthForge", "746", "SF-746-OCU-", 4, "2024-01-17");

    // NeuroCore cardiac lot for variety.
    make_batch(&mut devices, "cardiac", "Model-Gkf965", "2.3", "NeuroCore", "289", "NC-289-CAR-", 4, "2024-05-29");

    // Mixed background pool.
    for (kind, model, fw, maker, lot, serial, installed) in [
        ("ocular", "Model-fXX373", "1.2", "NeuroCore", "617", "NC-617-OCU-447327", "2023-07-03"),
        ("cardiac", "Model-OMt936", "1.1", "SynthForge", "141", "SF-141-CAR-905785", "2024-09-06"),
        ("limb", "Model-Yjx053", "3.8", "MechaMed", "490", "MM-490-LIM-984050", "2024-02-11"),
        ("cardiac", "Model-mUw025", "2.8", "MechaMed", "415", "MM-415-CAR-226330", "2023-07-04"),
        ("ocular", "Model-mZd159", "1.9", "SynthForge", "664", "SF-664-OCU-624181", "2023-10-16"),
        ("limb", "Model-VVo800", "3.8", "NeuroCore", "817", "NC-817-LIM-893238", "2024-12-07"),
    ] {
        devices.push(DeviceRecord {
            serial_number: serial.to_string(),
            kind: kind.to_string(),
            model: model.to_string(),
            firmware_version: fw.to_string(),
            manufacturer: maker.to_string(),
            lot_number: lot.to_string(),
            owner_ref: String::new(),
            installed_at: installed.to_string(),
        });
    }

    assign_owners(&mut devices);
    devices
}

#[allow(clippy::too_many_arguments)]
fn make_batch(
    devices: &mut Vec<DeviceRecord>,
    kind: &str,
    model: &str,
    firmware: &str,
    manufacturer: &str,
    lot: &str,
    serial_prefix: &str,
    count: usize,
    installed_at: &str,
) {
    for i in 1..=count {
        devices.push(DeviceRecord {
            serial_number: format!("{serial_prefix}{}", 1000 + i),
            kind: kind.to_string(),
            model: model.to_string(),
            firmware_version: firmware.to_string(),
            manufacturer: manufacturer.to_string(),
            lot_number: lot.to_string(),
            owner_ref: String::new(),
            installed_at: installed_at.to_string(),
        });
    }
}

/// Each owner takes one device; every third owner takes a second one.
fn assign_owners(devices: &mut [DeviceRecord]) {
    let mut cursor = 0;
    let mut owner = 0;
    while cursor < devices.len() {
        let owner_ref = OWNER_REFS[owner % OWNER_REFS.len()];
        devices[cursor].owner_ref = owner_ref.to_string();
        cursor += 1;
        if owner % 3 == 0 && cursor < devices.len() {
            devices[cursor].owner_ref = owner_ref.to_string();
            cursor += 1;
        }
        owner += 1;
    }
}

fn home_location(device: &DeviceRecord) -> GeoPoint {
    if device.manufacturer == "MechaMed" && device.lot_number == RECALL_LOT {
        return NYC_MIDTOWN;
    }
    let bucket: usize = device
        .serial_number
        .bytes()
        .map(|b| b as usize)
        .sum::<usize>()
        % 4;
    match bucket {
        0 => NYC_MIDTOWN,
        1 => BOS_DOWNTOWN,
        2 => PHL_CENTER,
        _ => DC_DOWNTOWN,
    }
}

struct Baseline {
    power_uw: f64,
    cpu_pct: f64,
    latency_ms: f64,
    power_jitter: f64,
    cpu_jitter: f64,
    latency_jitter: f64,
}

#[allow(clippy::too_many_arguments)]
fn add_series(
    logs: &mut Vec<MonitoringLogEntry>,
    rng: &mut StdRng,
    device: &DeviceRecord,
    start: DateTime<Utc>,
    points: usize,
    step_minutes: i64,
    base: Baseline,
    center: GeoPoint,
    location_jitter: f64,
) {
    for i in 0..points {
        let ts = start + Duration::minutes(i as i64 * step_minutes);

        let power = (base.power_uw + rand_signed(rng) * base.power_jitter).max(0.0);
        let cpu = (base.cpu_pct + rand_signed(rng) * base.cpu_jitter).clamp(0.0, 100.0);
        let latency = (base.latency_ms + rand_signed(rng) * base.latency_jitter).max(0.0);

        let location = GeoPoint::new(
            center.lon + rand_signed(rng) * location_jitter,
            center.lat + rand_signed(rng) * location_jitter,
        );

        logs.push(MonitoringLogEntry {
            serial_number: device.serial_number.clone(),
            owner_ref: device.owner_ref.clone(),
            timestamp: ts,
            power_uw: power,
            cpu_pct: cpu,
            latency_ms: latency,
            location,
        });
    }
}

fn rand_signed(rng: &mut StdRng) -> f64 {
    rng.gen::<f64>() * 2.0 - 1.0
}
