//! Triage orchestrator -- the linear stage machine
//! `SignalReady -> EvidenceRetrieved -> RiskClassified -> DevicesResolved ->
//! BlastRadiusEstimated -> (external generation) -> CaseAssembled`.
//!
//! Each stage consumes the previous stage's output; nothing re-queries an
//! earlier stage and there are no retry loops here. Retries, if any, belong
//! to the store, registry, and completion gateways.

use crate::llm::{complete_as, CompletionService};
use crate::registry::DeviceRegistry;
use crate::signal::IncidentSignal;
use crate::telemetry::{EvidenceStore, GeoPoint};
use crate::triage::classify::classify_risk;
use crate::triage::radius::estimate_blast_radius;
use crate::triage::resolve::resolve_affected_devices;
use crate::triage::{
    ContainmentPlan, ContainmentStep, HypothesisType, IncidentAssessment, IncidentCase,
    RiskLevel, RootCauseHypothesis, TriageError, TriageOutcome,
};
use anyhow::Result;
use chrono::Utc;
use serde::Deserialize;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

pub const HYPOTHESIS_SCHEMA: &str = "RootCauseHypothesis { type: FIRMWARE_REGRESSION | BAD_LOT | ATTACK_PATTERN | ENVIRONMENTAL, confidence: number 0..1, evidence: [string] }";
pub const PLAN_STEPS_SCHEMA: &str = "ContainmentSteps { steps: [{ text: string }] }";

/// The steps list is the only part of the plan the completion service
/// produces; approval and blast radius are computed here.
#[derive(Debug, Deserialize)]
struct ContainmentSteps {
    steps: Vec<ContainmentStep>,
}

pub struct TriagePipeline {
    store: Arc<dyn EvidenceStore>,
    registry: Arc<dyn DeviceRegistry>,
    completion: Arc<dyn CompletionService>,
}

impl TriagePipeline {
    pub fn new(
        store: Arc<dyn EvidenceStore>,
        registry: Arc<dyn DeviceRegistry>,
        completion: Arc<dyn CompletionService>,
    ) -> Self {
        Self {
            store,
            registry,
            completion,
        }
    }

    /// Run the deterministic stages: retrieval, classification, resolution,
    /// blast-radius estimation. Store failure is fatal; registry gaps are
    /// collected into the outcome.
    pub async fn triage(&self, signal: &IncidentSignal) -> Result<TriageOutcome, TriageError> {
        let center = GeoPoint::new(signal.longitude(), signal.latitude());
        let evidence = self
            .store
            .find_logs_by_area_and_time(center, signal.radius_meters(), signal.from(), signal.to())
            .await
            .map_err(TriageError::EvidenceRetrieval)?;
        info!(
            devices = evidence.len(),
            entries = evidence.total_entries(),
            "Evidence retrieved"
        );

        let risk_level = classify_risk(&evidence, signal);
        let assessment = IncidentAssessment {
            signal: signal.clone(),
            evidence_group_count: evidence.len(),
            risk_level,
        };

        let resolved = resolve_affected_devices(&evidence, signal, self.registry.as_ref()).await;
        let blast_radius = estimate_blast_radius(&resolved.devices, signal);

        info!(
            risk = %risk_level,
            affected = resolved.devices.len(),
            gaps = resolved.gaps.len(),
            "Triage stages complete"
        );

        Ok(TriageOutcome {
            signal: signal.clone(),
            assessment,
            affected: resolved.devices,
            gaps: resolved.gaps,
            blast_radius,
        })
    }

    /// Full investigation: triage, then hypothesis and plan generation, then
    /// case assembly. A generation failure keeps the computed outcome inside
    /// the error so callers do not lose the valid assessment.
    pub async fn investigate(&self, signal: IncidentSignal) -> Result<IncidentCase, TriageError> {
        let outcome = self.triage(&signal).await?;

        match self.generate(&outcome).await {
            Ok((hypothesis, plan)) => {
                let case = IncidentCase {
                    id: Uuid::new_v4(),
                    created_at: Utc::now(),
                    signal: outcome.signal,
                    assessment: outcome.assessment,
                    affected: outcome.affected,
                    gaps: outcome.gaps,
                    hypothesis,
                    plan,
                };
                info!(case_id = %case.id, risk = %case.assessment.risk_level, "Incident case assembled");
                Ok(case)
            }
            Err(source) => Err(TriageError::Generation {
                outcome: Box::new(outcome),
                source,
            }),
        }
    }

    async fn generate(
        &self,
        outcome: &TriageOutcome,
    ) -> Result<(RootCauseHypothesis, ContainmentPlan)> {
        let hypothesis: RootCauseHypothesis = complete_as(
            self.completion.as_ref(),
            &hypothesis_prompt(outcome),
            HYPOTHESIS_SCHEMA,
        )
        .await?;

        let steps: ContainmentSteps = complete_as(
            self.completion.as_ref(),
            &plan_prompt(outcome, &hypothesis),
            PLAN_STEPS_SCHEMA,
        )
        .await?;

        let plan = ContainmentPlan {
            steps: steps.steps,
            requires_approval: requires_approval(outcome.assessment.risk_level, &hypothesis),
            estimated_blast_radius: outcome.blast_radius.clone(),
        };

        Ok((hypothesis, plan))
    }
}

/// High-severity incidents and suspected attacks never auto-execute.
pub fn requires_approval(risk: RiskLevel, hypothesis: &RootCauseHypothesis) -> bool {
    matches!(risk, RiskLevel::High | RiskLevel::Critical)
        || hypothesis.kind == HypothesisType::AttackPattern
}

fn hypothesis_prompt(outcome: &TriageOutcome) -> String {
    let top_affected: Vec<String> = outcome
        .affected
        .iter()
        .take(10)
        .map(|d| {
            format!(
                "{} (lot {}, model {}, score {:.2})",
                d.serial_number,
                d.lot_number.as_deref().unwrap_or("unknown"),
                d.model.as_deref().unwrap_or("unknown"),
                d.anomaly_score
            )
        })
        .collect();

    format!(
        "Based on the incident details, choose a root cause hypothesis.\n\
         \n\
         Rules:\n\
         - type must be one of: FIRMWARE_REGRESSION, BAD_LOT, ATTACK_PATTERN, ENVIRONMENTAL\n\
         - confidence is 0..1\n\
         - evidence is a short bullet list of specific signals from the inputs\n\
         \n\
         IncidentSignal: {:?}\n\
         Triage: risk={}, evidenceGroups={}\n\
         Top affected devices: {:?}",
        outcome.signal,
        outcome.assessment.risk_level,
        outcome.assessment.evidence_group_count,
        top_affected
    )
}

fn plan_prompt(outcome: &TriageOutcome, hypothesis: &RootCauseHypothesis) -> String {
    format!(
        "Produce a containment steps list.\n\
         \n\
         Rules:\n\
         - steps must be a list of objects like: {{ \"text\": \"...\" }}\n\
         - 4-8 steps max, short imperative text\n\
         \n\
         Inputs:\n\
         - riskLevel: {}\n\
         - hypothesis: {:?}\n\
         - blastRadius: {:?}",
        outcome.assessment.risk_level, hypothesis, outcome.blast_radius
    )
}
