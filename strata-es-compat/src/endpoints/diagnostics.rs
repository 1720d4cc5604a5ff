//! Routing diagnostics

use super::search::EsCompatState;
use axum::extract::State;
use axum::Json;
use serde::Serialize;
use strata::resolver::PatternDecisions;

#[derive(Debug, Serialize)]
pub struct TableResolverReport {
    pub pipelines: Vec<String>,
    pub decisions: Vec<PatternDecisions>,
}

/// GET /_strata/table_resolver - Recent decisions per pattern and pipeline
pub async fn table_resolver_handler(State(state): State<EsCompatState>) -> Json<TableResolverReport> {
    let resolver = state.runner.resolver();
    Json(TableResolverReport {
        pipelines: resolver.pipelines(),
        decisions: resolver.recent_decisions(),
    })
}
