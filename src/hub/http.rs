//! Informational HTTP surface.
//!
//! Read-only endpoints beside the control socket: protocol overview,
//! health, a paginated directory view and aggregate counters. These are
//! collaborators for dashboards and probes; agents speak the control
//! channel.

use std::sync::Arc;

use axum::{
    extract::{Query, State},
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use serde::Deserialize;

use crate::wire::{self, AgentStatus, DiscoverQuery};

use super::HubState;

/// Create the informational router
pub fn create_router(state: Arc<HubState>) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/health", get(health))
        .route("/agents", get(agents))
        .route("/stats", get(stats))
        .with_state(state)
}

/// Protocol overview and quickstart pointers
async fn index(State(state): State<Arc<HubState>>) -> impl IntoResponse {
    Json(serde_json::json!({
        "name": "m2m-fabric hub",
        "version": env!("CARGO_PKG_VERSION"),
        "control": {
            "transport": "tcp, newline-delimited JSON objects",
            "actions": [
                "register", "heartbeat", "discover", "find",
                "lookup", "status", "disconnect", "stats"
            ],
        },
        "quickstart": {
            "register": {
                "action": "register",
                "correlationId": "<16 hex>",
                "address": "host:port",
                "capabilities": ["example"],
            },
        },
        "endpoints": ["/health", "/agents", "/stats"],
        "uptimeSecs": state.uptime_secs(),
    }))
}

/// Liveness probe
async fn health() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "timestamp": wire::unix_millis(),
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// Query parameters for the directory view
#[derive(Debug, Default, Deserialize)]
pub struct AgentsQuery {
    pub capability: Option<String>,
    pub status: Option<AgentStatus>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

/// Paginated directory view; offline records are excluded
async fn agents(
    State(state): State<Arc<HubState>>,
    Query(query): Query<AgentsQuery>,
) -> impl IntoResponse {
    let page = state
        .registry
        .discover(&DiscoverQuery {
            id: None,
            capabilities: query.capability.map(|c| vec![c]),
            status: query.status,
            limit: query.limit,
            offset: query.offset,
        })
        .await;

    Json(page)
}

/// Aggregate counters
async fn stats(State(state): State<Arc<HubState>>) -> impl IntoResponse {
    Json(state.stats().await)
}
