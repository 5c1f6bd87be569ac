//! Incident triage pipeline -- classification, scoring, resolution,
//! blast-radius estimation, and orchestration.

pub mod classify;
pub mod pipeline;
pub mod radius;
pub mod resolve;
pub mod score;

use crate::signal::{IncidentSignal, SignalError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Discrete incident severity, ordered low to critical.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Critical,
}

impl std::fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RiskLevel::Low => write!(f, "LOW"),
            RiskLevel::Medium => write!(f, "MEDIUM"),
            RiskLevel::High => write!(f, "HIGH"),
            RiskLevel::Critical => write!(f, "CRITICAL"),
        }
    }
}

/// A device implicated by the investigation, ranked by anomaly score.
///
/// Enrichment fields are `None` when the registry cannot resolve the
/// device -- a deliberately degraded record, not a discarded one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AffectedDevice {
    pub serial_number: String,
    pub lot_number: Option<String>,
    pub model: Option<String>,
    pub owner_ref: Option<String>,
    pub anomaly_score: f64,
}

/// A device with telemetry evidence but no resolvable registry record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryResolutionGap {
    pub serial_number: String,
    pub detail: String,
}

/// Risk verdict for one triage run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IncidentAssessment {
    pub signal: IncidentSignal,
    pub evidence_group_count: usize,
    pub risk_level: RiskLevel,
}

/// Aggregate scope of an incident.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EstimatedBlastRadius {
    pub affected_count: usize,
    /// Up to 5 distinct lots, first-encountered order.
    pub affected_lots: Vec<String>,
    /// Up to 5 distinct models, first-encountered order.
    pub affected_models: Vec<String>,
    pub geo_summary: String,
    pub time_summary: String,
}

/// Root-cause hypothesis, produced by the external completion service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HypothesisType {
    FirmwareRegression,
    BadLot,
    AttackPattern,
    Environmental,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RootCauseHypothesis {
    #[serde(rename = "type")]
    pub kind: HypothesisType,
    /// 0..1
    pub confidence: f64,
    /// Short bullets naming the specific signals behind the hypothesis.
    pub evidence: Vec<String>,
}

/// One short imperative containment action.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContainmentStep {
    pub text: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContainmentPlan {
    pub steps: Vec<ContainmentStep>,
    pub requires_approval: bool,
    pub estimated_blast_radius: EstimatedBlastRadius,
}

/// Everything the deterministic stages compute, before external generation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriageOutcome {
    pub signal: IncidentSignal,
    pub assessment: IncidentAssessment,
    pub affected: Vec<AffectedDevice>,
    pub gaps: Vec<RegistryResolutionGap>,
    pub blast_radius: EstimatedBlastRadius,
}

/// Terminal artifact of a completed investigation. Assembled once, never
/// mutated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IncidentCase {
    pub id: Uuid,
    pub created_at: DateTime<Utc>,
    pub signal: IncidentSignal,
    pub assessment: IncidentAssessment,
    pub affected: Vec<AffectedDevice>,
    pub gaps: Vec<RegistryResolutionGap>,
    pub hypothesis: RootCauseHypothesis,
    pub plan: ContainmentPlan,
}

/// Stage-identifying failures of a triage run.
///
/// Invalid signals and retrieval failures stop the pipeline before any
/// classification; generation failures keep the already-computed outcome.
#[derive(Debug, Error)]
pub enum TriageError {
    #[error(transparent)]
    InvalidSignal(#[from] SignalError),

    #[error("evidence retrieval failed")]
    EvidenceRetrieval(#[source] anyhow::Error),

    #[error("downstream generation failed after assessment")]
    Generation {
        /// The valid assessment and ranking computed before the failure.
        outcome: Box<TriageOutcome>,
        #[source]
        source: anyhow::Error,
    },
}
