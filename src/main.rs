use clap::Parser;
use netdiag_core::api;
use netdiag_core::config::Args;
use netdiag_core::{AlertEngine, CaptureQueue, FlowTracker, MetricsStore, PacketPipeline};
use std::sync::{Arc, Mutex};
use tokio::sync::RwLock;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "netdiag_core=info,tower_http=info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();
    let config = args.into_config()?;

    let issues = netdiag_core::capture::check_ready(&config.interfaces, has_capture_privileges());
    if !issues.is_empty() {
        for issue in &issues {
            tracing::error!(%issue, "startup check failed");
        }
        return Err(format!("{} startup issue(s), see log", issues.len()).into());
    }

    tracing::info!(interfaces = ?config.interfaces, port = config.http_port, "starting netdiag pipeline");

    let queue = Arc::new(CaptureQueue::new(config.buffer_size));
    let tracker = Arc::new(FlowTracker::new(config.max_flows, config.flow_timeout()));
    let store = Arc::new(MetricsStore::new(config.max_flows));

    let mut pipeline = PacketPipeline::new(
        config.interfaces.clone(),
        queue.clone(),
        tracker.clone(),
        store.clone(),
    );
    pipeline.start();
    let pipeline = Arc::new(RwLock::new(pipeline));

    let state = Arc::new(api::ApiState {
        store,
        tracker,
        pipeline: pipeline.clone(),
        alerts: Mutex::new(AlertEngine::with_defaults()),
        config: config.clone(),
    });

    let app = api::build_router(state);
    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", config.http_port)).await?;
    tracing::info!("netdiag status API listening on http://0.0.0.0:{}", config.http_port);

    axum::serve(listener, app).await?;

    pipeline.write().await.stop(true);
    Ok(())
}

/// Capture privilege check is an external collaborator concern; on Unix
/// this would check `CAP_NET_RAW`/root. Kept minimal here since raw
/// capture itself is out of scope for this crate's core.
fn has_capture_privileges() -> bool {
    true
}
