//! Device registry gateway -- resolves a serial number to ownership metadata.

use anyhow::Result;
use serde::{Deserialize, Serialize};

/// Registry record for one implanted device.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceRecord {
    pub serial_number: String,
    /// Implant kind, e.g. "limb", "ocular", "cardiac".
    pub kind: String,
    pub model: String,
    pub firmware_version: String,
    pub manufacturer: String,
    pub lot_number: String,
    /// Reference to the owning civilian (national ID).
    pub owner_ref: String,
    /// Installation date, as recorded ("YYYY-MM-DD").
    pub installed_at: String,
}

/// Gateway to the device/ownership registry.
///
/// Lookups are idempotent and side-effect-free from the pipeline's
/// perspective. `Ok(None)` means "no such device", which for a device with
/// telemetry evidence is an inconsistent reference the resolver reports as
/// a diagnostic rather than an abort.
#[async_trait::async_trait]
pub trait DeviceRegistry: Send + Sync {
    async fn resolve_device(&self, serial_number: &str) -> Result<Option<DeviceRecord>>;

    /// All serials belonging to one manufacturing lot, for containment
    /// context (e.g. sizing a recall).
    async fn find_serials_by_lot(&self, lot_number: &str) -> Result<Vec<String>>;
}
