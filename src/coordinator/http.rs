//! HTTP status API for the coordinator
//!
//! Read-only: health, consensus role, the transaction log, merged edge
//! lists and Prometheus counters. Writes go through gRPC only.

use crate::coordinator::engine::Coordinator;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Router,
};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;

#[derive(Clone)]
pub struct CoordState {
    pub coordinator: Arc<Coordinator>,
}

pub fn create_router(state: CoordState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/status", get(status))
        .route("/transactions", get(transactions))
        .route("/edges/:id", get(edges))
        .route("/metrics", get(metrics))
        .with_state(state)
}

/// Health check endpoint for liveness and consensus role.
async fn health(State(state): State<CoordState>) -> impl IntoResponse {
    let consensus = state.coordinator.consensus();
    axum::Json(json!({
        "status": "healthy",
        "role": consensus.role(),
        "is_leader": consensus.is_leader(),
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

async fn status(State(state): State<CoordState>) -> impl IntoResponse {
    let coordinator = &state.coordinator;
    let snapshot = coordinator.consensus().snapshot();
    let shards: Vec<_> = coordinator
        .router()
        .shards()
        .iter()
        .map(|s| {
            json!({
                "shard_id": s.shard_id,
                "range": s.range.to_string(),
                "address": s.address,
            })
        })
        .collect();
    axum::Json(json!({
        "node_id": coordinator.node_id(),
        "role": snapshot.role,
        "term": snapshot.term,
        "leader_id": snapshot.leader_id,
        "cluster_size": coordinator.consensus().cluster_size(),
        "shards": shards,
        "transactions": coordinator.transaction_log().total(),
    }))
}

const DEFAULT_TXN_PAGE: usize = 100;

#[derive(Debug, Deserialize)]
struct TxnQuery {
    limit: Option<usize>,
}

/// The most recent transactions, oldest first. `?limit=` sets the page size.
async fn transactions(
    State(state): State<CoordState>,
    Query(query): Query<TxnQuery>,
) -> impl IntoResponse {
    let limit = query.limit.unwrap_or(DEFAULT_TXN_PAGE);
    axum::Json(state.coordinator.transaction_log().recent(limit))
}

async fn edges(State(state): State<CoordState>, Path(id): Path<i64>) -> impl IntoResponse {
    let edges = state.coordinator.get_edges(id).await;
    axum::Json(json!({ "node": id, "count": edges.len(), "edges": edges }))
}

// Endpoint Prometheus /metrics
async fn metrics(State(state): State<CoordState>) -> impl IntoResponse {
    let coordinator = &state.coordinator;
    let snapshot = coordinator.consensus().snapshot();
    let mut out = coordinator.metrics().to_prometheus();
    out += &format!("socialgraph_consensus_term {}\n", snapshot.term);
    out += &format!(
        "socialgraph_is_leader {}\n",
        u8::from(coordinator.consensus().is_leader())
    );
    (StatusCode::OK, out)
}
