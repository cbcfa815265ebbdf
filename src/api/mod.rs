//! Read-only HTTP status/metrics API, consumed by dashboard/export
//! tooling. Out of scope: anything that mutates pipeline state.

pub mod handlers;

use crate::alert::AlertEngine;
use crate::config::PipelineConfig;
use crate::flow_tracker::FlowTracker;
use crate::metrics_store::MetricsStore;
use crate::pipeline::PacketPipeline;
use axum::{routing::get, Router};
use serde::Serialize;
use std::sync::{Arc, Mutex};
use tokio::sync::RwLock;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Shared application state handed to every route handler.
pub struct ApiState {
    pub store: Arc<MetricsStore>,
    pub tracker: Arc<FlowTracker>,
    pub pipeline: Arc<RwLock<PacketPipeline>>,
    pub alerts: Mutex<AlertEngine>,
    pub config: PipelineConfig,
}

/// Uniform response envelope for every route.
#[derive(Debug, Serialize)]
pub struct ApiResponse<T: Serialize> {
    pub success: bool,
    pub data: Option<T>,
    pub error: Option<String>,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message.into()),
        }
    }
}

pub fn build_router(state: Arc<ApiState>) -> Router {
    Router::new()
        .route("/api/status", get(handlers::get_status))
        .route("/api/interfaces", get(handlers::list_interfaces))
        .route("/api/metrics/:interface", get(handlers::get_snapshot))
        .route("/api/metrics", get(handlers::all_snapshots))
        .route(
            "/api/metrics/:interface/series/:metric",
            get(handlers::get_time_series),
        )
        .route("/api/flows/top", get(handlers::top_flows))
        .route("/api/bottlenecks/:interface", get(handlers::bottlenecks))
        .route("/api/compare/:a/:b", get(handlers::compare_interfaces))
        .route("/api/alerts", get(handlers::active_alerts))
        .route("/api/alerts/history", get(handlers::alert_history))
        .route("/api/debug", get(handlers::debug_info))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any))
        .with_state(state)
}
