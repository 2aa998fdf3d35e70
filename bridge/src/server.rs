// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

use crate::coordinator::AnchorCoordinator;
use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use ethers::types::Address;
use prometheus::{Encoder, Registry, TextEncoder};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{error, info};

pub const HEALTH_PATH: &str = "/health";
pub const PING_PATH: &str = "/ping";
pub const METRICS_PATH: &str = "/metrics";

// Anchor's public metadata that is accessible via the `/ping` endpoint.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct AnchorNodePublicMetadata {
    pub version: &'static str,
    pub anchor_address: Address,
    pub main_chain_id: u64,
    pub sub_chain_id: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct PingResponse {
    #[serde(flatten)]
    pub metadata: AnchorNodePublicMetadata,
    pub role: String,
}

#[derive(Clone)]
struct ServerState {
    metadata: Arc<AnchorNodePublicMetadata>,
    coordinator: Arc<dyn AnchorCoordinator>,
    registry: Registry,
}

pub async fn run_server(
    socket_address: SocketAddr,
    metadata: AnchorNodePublicMetadata,
    coordinator: Arc<dyn AnchorCoordinator>,
    registry: Registry,
) -> anyhow::Result<tokio::task::JoinHandle<()>> {
    let listener = tokio::net::TcpListener::bind(socket_address).await?;
    info!("Anchor status server listening on {}", socket_address);
    let router = make_router(metadata, coordinator, registry);
    Ok(tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, router).await {
            error!("Anchor status server error: {:?}", e);
        }
    }))
}

fn make_router(
    metadata: AnchorNodePublicMetadata,
    coordinator: Arc<dyn AnchorCoordinator>,
    registry: Registry,
) -> Router {
    Router::new()
        .route("/", get(health_check))
        .route(HEALTH_PATH, get(health_check))
        .route(PING_PATH, get(ping))
        .route(METRICS_PATH, get(metrics))
        .with_state(ServerState {
            metadata: Arc::new(metadata),
            coordinator,
            registry,
        })
}

async fn health_check() -> StatusCode {
    StatusCode::OK
}

async fn ping(State(state): State<ServerState>) -> Json<PingResponse> {
    let role = match state.coordinator.role().await {
        Ok(role) => role.to_string(),
        Err(e) => {
            error!("Failed to query anchor role: {}", e);
            "unknown".to_string()
        }
    };
    Json(PingResponse {
        metadata: state.metadata.as_ref().clone(),
        role,
    })
}

async fn metrics(State(state): State<ServerState>) -> (StatusCode, String) {
    match encode_metrics(&state.registry) {
        Ok(text) => (StatusCode::OK, text),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("Failed to encode metrics: {}", e),
        ),
    }
}

/// Prometheus text exposition of everything in `registry`
pub fn encode_metrics(registry: &Registry) -> anyhow::Result<String> {
    let mut buffer = vec![];
    TextEncoder::new().encode(&registry.gather(), &mut buffer)?;
    Ok(String::from_utf8(buffer)?)
}
