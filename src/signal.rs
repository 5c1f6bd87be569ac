//! Incident signals -- the validated geo/time/metric query driving a triage run.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Telemetry metric an incident signal selects on.
///
/// Closed set: an unrecognized metric name is rejected when the signal is
/// built, so downstream lookups can never miss.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Metric {
    #[serde(rename = "neuralLatencyMs")]
    NeuralLatencyMs,
    #[serde(rename = "cpuUsagePct")]
    CpuUsagePct,
    #[serde(rename = "powerUsageUw")]
    PowerUsageUw,
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Metric::NeuralLatencyMs => write!(f, "neuralLatencyMs"),
            Metric::CpuUsagePct => write!(f, "cpuUsagePct"),
            Metric::PowerUsageUw => write!(f, "powerUsageUw"),
        }
    }
}

impl FromStr for Metric {
    type Err = SignalError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "neuralLatencyMs" => Ok(Metric::NeuralLatencyMs),
            "cpuUsagePct" => Ok(Metric::CpuUsagePct),
            "powerUsageUw" => Ok(Metric::PowerUsageUw),
            other => Err(SignalError::UnknownMetric(other.to_string())),
        }
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum SignalError {
    #[error("longitude {0} outside [-180, 180]")]
    LongitudeOutOfRange(f64),
    #[error("latitude {0} outside [-90, 90]")]
    LatitudeOutOfRange(f64),
    #[error("radius must be positive and finite, got {0}m")]
    InvalidRadius(f64),
    #[error("time window is empty: {to} is not after {from}")]
    EmptyWindow {
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    },
    #[error("threshold must be positive and finite, got {0}")]
    InvalidThreshold(f64),
    #[error("unknown metric '{0}' (expected neuralLatencyMs, cpuUsagePct or powerUsageUw)")]
    UnknownMetric(String),
}

/// Raw, unvalidated signal parameters as they arrive from the CLI or API.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalSpec {
    pub longitude: f64,
    pub latitude: f64,
    #[serde(rename = "radiusMeters")]
    pub radius_meters: f64,
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
    pub metric: Metric,
    pub threshold: f64,
}

/// Validated, immutable query spec for one investigation.
///
/// Only constructible through validation, so every `IncidentSignal` in the
/// pipeline satisfies the coordinate/radius/window/threshold invariants.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "SignalSpec")]
pub struct IncidentSignal {
    longitude: f64,
    latitude: f64,
    #[serde(rename = "radiusMeters")]
    radius_meters: f64,
    from: DateTime<Utc>,
    to: DateTime<Utc>,
    metric: Metric,
    threshold: f64,
}

impl TryFrom<SignalSpec> for IncidentSignal {
    type Error = SignalError;

    fn try_from(spec: SignalSpec) -> Result<Self, Self::Error> {
        IncidentSignal::new(spec)
    }
}

impl IncidentSignal {
    pub fn new(spec: SignalSpec) -> Result<Self, SignalError> {
        if !(-180.0..=180.0).contains(&spec.longitude) || !spec.longitude.is_finite() {
            return Err(SignalError::LongitudeOutOfRange(spec.longitude));
        }
        if !(-90.0..=90.0).contains(&spec.latitude) || !spec.latitude.is_finite() {
            return Err(SignalError::LatitudeOutOfRange(spec.latitude));
        }
        if !(spec.radius_meters > 0.0) || !spec.radius_meters.is_finite() {
            return Err(SignalError::InvalidRadius(spec.radius_meters));
        }
        if spec.to <= spec.from {
            return Err(SignalError::EmptyWindow {
                from: spec.from,
                to: spec.to,
            });
        }
        if !(spec.threshold > 0.0) || !spec.threshold.is_finite() {
            return Err(SignalError::InvalidThreshold(spec.threshold));
        }

        Ok(Self {
            longitude: spec.longitude,
            latitude: spec.latitude,
            radius_meters: spec.radius_meters,
            from: spec.from,
            to: spec.to,
            metric: spec.metric,
            threshold: spec.threshold,
        })
    }

    pub fn longitude(&self) -> f64 {
        self.longitude
    }

    pub fn latitude(&self) -> f64 {
        self.latitude
    }

    pub fn radius_meters(&self) -> f64 {
        self.radius_meters
    }

    pub fn from(&self) -> DateTime<Utc> {
        self.from
    }

    pub fn to(&self) -> DateTime<Utc> {
        self.to
    }

    pub fn metric(&self) -> Metric {
        self.metric
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }
}
