//! Implantmedic -- Appliance-grade incident triage for implanted device telemetry.
//!
//! This crate provides the core library for geo-temporal evidence retrieval,
//! risk classification, per-device anomaly scoring, blast-radius estimation,
//! and incident case assembly.

pub mod api;
pub mod llm;
pub mod registry;
pub mod seed;
pub mod signal;
pub mod storage;
pub mod telemetry;
pub mod triage;

use crate::triage::pipeline::TriagePipeline;
use anyhow::Result;
use std::sync::Arc;

/// Start the Implantmedic daemon: API server backed by the local database.
///
/// The completion service is the scripted demo one; real model wiring
/// belongs to the host deployment, not this library.
pub async fn serve(bind: &str, db_path: &str) -> Result<()> {
    tracing::info!(%db_path, "Initializing database");
    let pool = storage::open_pool(db_path)?;

    let store = Arc::new(storage::SqliteStore::new(pool.clone()));
    let pipeline = Arc::new(TriagePipeline::new(
        store.clone(),
        store,
        Arc::new(llm::demo_completion()),
    ));

    let state = api::state::AppState { pool, pipeline };
    let app = api::router(state);

    let addr: std::net::SocketAddr = bind.parse()?;
    tracing::info!(%addr, "Implantmedic listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
