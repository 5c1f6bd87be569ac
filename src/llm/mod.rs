//! Opaque completion-service boundary for hypothesis and plan generation.
//!
//! The pipeline treats language understanding as an external capability:
//! a prompt plus a schema description goes in, a structured object comes
//! back. No retries, no caching, no prompt logic beyond formatting lives
//! here.

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use std::collections::HashMap;

/// External completion capability, `complete(prompt, schema) -> T`.
///
/// `schema` is a short textual description of the requested object shape;
/// how the service honors it (tool call, JSON mode, ...) is its business.
#[async_trait::async_trait]
pub trait CompletionService: Send + Sync {
    async fn complete(&self, prompt: &str, schema: &str) -> Result<serde_json::Value>;
}

/// Run a completion and deserialize the result into the requested type.
/// A schema-invalid response surfaces as an error; the caller decides what
/// survives it.
pub async fn complete_as<T: DeserializeOwned>(
    service: &dyn CompletionService,
    prompt: &str,
    schema: &str,
) -> Result<T> {
    let value = service.complete(prompt, schema).await?;
    serde_json::from_value(value).context("completion returned a schema-invalid object")
}

/// Canned completion service for the demo host and tests.
///
/// Responses are keyed by the schema's leading identifier, so the same
/// instance answers every call of a given shape deterministically.
#[derive(Debug, Default)]
pub struct ScriptedCompletion {
    responses: HashMap<String, serde_json::Value>,
}

impl ScriptedCompletion {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_response(mut self, schema: &str, response: serde_json::Value) -> Self {
        self.responses
            .insert(schema_key(schema).to_string(), response);
        self
    }
}

fn schema_key(schema: &str) -> &str {
    schema.split_whitespace().next().unwrap_or(schema)
}

/// Scripted responses for the demo host: a lot-recall hypothesis and a
/// conservative containment step list.
pub fn demo_completion() -> ScriptedCompletion {
    use crate::triage::pipeline::{HYPOTHESIS_SCHEMA, PLAN_STEPS_SCHEMA};

    ScriptedCompletion::new()
        .with_response(
            HYPOTHESIS_SCHEMA,
            serde_json::json!({
                "type": "BAD_LOT",
                "confidence": 0.72,
                "evidence": [
                    "highest-scoring devices share a manufacturing lot",
                    "metric exceeds threshold in a tight geo/time cluster",
                ],
            }),
        )
        .with_response(
            PLAN_STEPS_SCHEMA,
            serde_json::json!({
                "steps": [
                    { "text": "Throttle firmware duty cycle for the implicated lot" },
                    { "text": "Notify owners of the highest-scoring devices" },
                    { "text": "Quarantine new telemetry from the lot for review" },
                    { "text": "Schedule field inspection of the top affected devices" },
                ],
            }),
        )
}

#[async_trait::async_trait]
impl CompletionService for ScriptedCompletion {
    async fn complete(&self, _prompt: &str, schema: &str) -> Result<serde_json::Value> {
        self.responses
            .get(schema_key(schema))
            .cloned()
            .with_context(|| format!("no scripted response for schema '{}'", schema_key(schema)))
    }
}
