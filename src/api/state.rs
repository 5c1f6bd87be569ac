use crate::storage::Pool;
use crate::triage::pipeline::TriagePipeline;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub pool: Pool,
    pub pipeline: Arc<TriagePipeline>,
}
