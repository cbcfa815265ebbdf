//! Route handlers. Each bridges the synchronous core types into async
//! axum responses, using `spawn_blocking` for anything that would
//! otherwise hold a sync lock across an await point.

use super::{ApiResponse, ApiState};
use crate::bottleneck::BottleneckDetector;
use crate::comparator::InterfaceComparator;
use crate::metrics_store::{SeriesMetric, SortBy};
use axum::extract::{Path, State};
use axum::Json;
use serde::Serialize;
use std::sync::Arc;

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub interfaces: Vec<String>,
    pub http_port: u16,
    pub flow_count: usize,
    pub max_flows: usize,
}

pub async fn get_status(State(state): State<Arc<ApiState>>) -> Json<ApiResponse<StatusResponse>> {
    let response = StatusResponse {
        interfaces: state.config.interfaces.clone(),
        http_port: state.config.http_port,
        flow_count: state.tracker.flow_count(),
        max_flows: state.config.max_flows,
    };
    Json(ApiResponse::success(response))
}

pub async fn list_interfaces(
    State(state): State<Arc<ApiState>>,
) -> Json<ApiResponse<Vec<String>>> {
    Json(ApiResponse::success(state.config.interfaces.clone()))
}

pub async fn get_snapshot(
    State(state): State<Arc<ApiState>>,
    Path(interface): Path<String>,
) -> Json<ApiResponse<crate::metrics::MetricsSnapshot>> {
    match state.store.get_snapshot(&interface) {
        Some(snap) => Json(ApiResponse::success(snap)),
        None => Json(ApiResponse::error(format!("no snapshot for {interface}"))),
    }
}

pub async fn all_snapshots(
    State(state): State<Arc<ApiState>>,
) -> Json<ApiResponse<Vec<crate::metrics::MetricsSnapshot>>> {
    Json(ApiResponse::success(state.store.all_snapshots()))
}

pub async fn get_time_series(
    State(state): State<Arc<ApiState>>,
    Path((interface, metric)): Path<(String, String)>,
) -> Json<ApiResponse<Vec<f64>>> {
    let metric = match metric.as_str() {
        "pps" => SeriesMetric::PacketsPerSecond,
        "bandwidth_mbps" => SeriesMetric::BandwidthMbps,
        "latency_ms" => SeriesMetric::LatencyMs,
        "jitter_ms" => SeriesMetric::JitterMs,
        "loss_percent" => SeriesMetric::LossPercent,
        other => return Json(ApiResponse::error(format!("unknown metric {other}"))),
    };
    Json(ApiResponse::success(state.store.time_series(&interface, metric, 300)))
}

pub async fn top_flows(
    State(state): State<Arc<ApiState>>,
) -> Json<ApiResponse<Vec<crate::flow::FlowKey>>> {
    let flows = state.store.top_flows(20, SortBy::Bytes);
    Json(ApiResponse::success(flows.into_iter().map(|f| f.key).collect()))
}

pub async fn bottlenecks(
    State(state): State<Arc<ApiState>>,
    Path(interface): Path<String>,
) -> Json<ApiResponse<crate::bottleneck::HealthReport>> {
    match state.store.get_snapshot(&interface) {
        Some(snap) => Json(ApiResponse::success(BottleneckDetector::analyze(
            &interface, &snap,
        ))),
        None => Json(ApiResponse::error(format!("no snapshot for {interface}"))),
    }
}

pub async fn compare_interfaces(
    State(state): State<Arc<ApiState>>,
    Path((a, b)): Path<(String, String)>,
) -> Json<ApiResponse<crate::comparator::ComparisonResult>> {
    let (Some(snap_a), Some(snap_b)) = (state.store.get_snapshot(&a), state.store.get_snapshot(&b))
    else {
        return Json(ApiResponse::error("one or both interfaces have no snapshot yet"));
    };
    Json(ApiResponse::success(InterfaceComparator::compare(&snap_a, &snap_b)))
}

pub async fn active_alerts(
    State(state): State<Arc<ApiState>>,
) -> Json<ApiResponse<Vec<crate::alert::Alert>>> {
    let alerts = state.alerts.lock().unwrap().active_alerts();
    Json(ApiResponse::success(alerts))
}

pub async fn alert_history(
    State(state): State<Arc<ApiState>>,
) -> Json<ApiResponse<Vec<crate::alert::Alert>>> {
    let history = state.alerts.lock().unwrap().history().to_vec();
    Json(ApiResponse::success(history))
}

pub async fn debug_info(
    State(state): State<Arc<ApiState>>,
) -> Json<ApiResponse<crate::pipeline::PipelineDebugInfo>> {
    let info = state.pipeline.read().await.debug_info();
    Json(ApiResponse::success(info))
}
