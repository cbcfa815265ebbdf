//! Drains the capture queue, drives the flow tracker and per-interface
//! metrics, and publishes snapshots at 1 Hz.

use crate::capture::CaptureQueue;
use crate::flow::FlowEvent;
use crate::flow_tracker::FlowTracker;
use crate::metrics::InterfaceMetrics;
use crate::metrics_store::MetricsStore;
use crate::packet::PacketRecord;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::{debug, error, warn};

const RATE_INTERVAL: Duration = Duration::from_secs(1);

type PacketCallback = Box<dyn Fn(&PacketRecord) + Send + Sync>;
type EventCallback = Box<dyn Fn(&PacketRecord, FlowEvent) + Send + Sync>;

/// Non-fatal run-time counters exposed for the debug/stats surface.
#[derive(Debug, Default, Serialize, Clone)]
pub struct PipelineDebugInfo {
    pub running: bool,
    pub packets_processed: u64,
    pub processing_errors: u64,
    pub queue_size: usize,
    pub interfaces: Vec<String>,
    pub interface_packet_counts: HashMap<String, u64>,
}

struct WorkerShared {
    tracker: Arc<FlowTracker>,
    store: Arc<MetricsStore>,
    queue: Arc<CaptureQueue>,
    interface_metrics: Mutex<HashMap<String, InterfaceMetrics>>,
    packets_processed: AtomicU64,
    processing_errors: AtomicU64,
    interface_packet_counts: Mutex<HashMap<String, u64>>,
    packet_callbacks: Mutex<Vec<PacketCallback>>,
    event_callbacks: Mutex<Vec<EventCallback>>,
}

/// Owns the consumer worker thread. Start/stop only — no other
/// cancellation primitive.
pub struct PacketPipeline {
    shared: Arc<WorkerShared>,
    running: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
    interfaces: Vec<String>,
}

impl PacketPipeline {
    pub fn new(
        interfaces: Vec<String>,
        queue: Arc<CaptureQueue>,
        tracker: Arc<FlowTracker>,
        store: Arc<MetricsStore>,
    ) -> Self {
        let mut metrics = HashMap::new();
        let mut counts = HashMap::new();
        for iface in &interfaces {
            metrics.insert(iface.clone(), InterfaceMetrics::new(iface.clone()));
            counts.insert(iface.clone(), 0u64);
        }
        Self {
            shared: Arc::new(WorkerShared {
                tracker,
                store,
                queue,
                interface_metrics: Mutex::new(metrics),
                packets_processed: AtomicU64::new(0),
                processing_errors: AtomicU64::new(0),
                interface_packet_counts: Mutex::new(counts),
                packet_callbacks: Mutex::new(Vec::new()),
                event_callbacks: Mutex::new(Vec::new()),
            }),
            running: Arc::new(AtomicBool::new(false)),
            handle: None,
            interfaces,
        }
    }

    pub fn on_packet(&self, cb: impl Fn(&PacketRecord) + Send + Sync + 'static) {
        self.shared.packet_callbacks.lock().unwrap().push(Box::new(cb));
    }

    pub fn on_event(&self, cb: impl Fn(&PacketRecord, FlowEvent) + Send + Sync + 'static) {
        self.shared.event_callbacks.lock().unwrap().push(Box::new(cb));
    }

    /// Launches the consumer worker. Monotonic "now" for rate computation
    /// is derived from `Instant::now()` elapsed seconds at call time.
    pub fn start(&mut self) {
        self.running.store(true, Ordering::SeqCst);
        let shared = self.shared.clone();
        let running = self.running.clone();
        let start = Instant::now();

        self.handle = Some(std::thread::spawn(move || {
            let mut last_rate_calc = Instant::now();
            while running.load(Ordering::SeqCst) {
                match shared.queue.pop() {
                    Some(mut packet) => {
                        Self::process_one(&shared, &mut packet, start);
                    }
                    None => std::thread::sleep(Duration::from_millis(5)),
                }
                if last_rate_calc.elapsed() >= RATE_INTERVAL {
                    Self::publish_rates(&shared, start);
                    last_rate_calc = Instant::now();
                }
            }
        }));
    }

    fn process_one(shared: &WorkerShared, packet: &mut PacketRecord, start: Instant) {
        let _ = start;
        let interface = packet.interface.clone();
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let mut metrics_guard = shared.interface_metrics.lock().unwrap();
            let metrics = metrics_guard
                .entry(packet.interface.clone())
                .or_insert_with(|| InterfaceMetrics::new(packet.interface.clone()));
            metrics.note_packet(packet.length as u64, packet.protocol);

            let (key, event) = shared.tracker.process(packet);
            metrics.note_event(event);

            if matches!(event, FlowEvent::RttSample) {
                if let Some(flow) = shared.tracker.lookup(&key) {
                    metrics.add_latency(flow.avg_rtt() * 1000.0);
                }
            }
            if let Some(flow) = shared.tracker.lookup(&key) {
                metrics.add_jitter(flow.jitter_ms());
            }
            drop(metrics_guard);

            *shared
                .interface_packet_counts
                .lock()
                .unwrap()
                .entry(packet.interface.clone())
                .or_insert(0) += 1;
            shared.packets_processed.fetch_add(1, Ordering::Relaxed);

            for cb in shared.packet_callbacks.lock().unwrap().iter() {
                cb(&*packet);
            }
            if !matches!(event, FlowEvent::None) {
                for cb in shared.event_callbacks.lock().unwrap().iter() {
                    cb(&*packet, event);
                }
            }
        }));
        if result.is_err() {
            shared.processing_errors.fetch_add(1, Ordering::Relaxed);
            error!(interface = %interface, "processing error, skipping packet");
        }
    }

    fn publish_rates(shared: &WorkerShared, start: Instant) {
        let now = start.elapsed().as_secs_f64();
        let mut metrics_guard = shared.interface_metrics.lock().unwrap();
        for (iface, metrics) in metrics_guard.iter_mut() {
            metrics.recompute_rates(now);
            shared.store.set_snapshot(iface.clone(), metrics.snapshot());
        }
    }

    /// `drain = true`: halts the source-side feed (callers stop
    /// `CaptureSource`s first), then synchronously drains whatever is
    /// still queued, runs a final rate recomputation, and joins the
    /// worker with a bounded timeout. `drain = false` discards whatever
    /// remains queued.
    pub fn stop(&mut self, drain: bool) {
        self.running.store(false, Ordering::SeqCst);
        if drain {
            let start = Instant::now();
            while let Some(mut packet) = self.shared.queue.pop() {
                Self::process_one(&self.shared, &mut packet, start);
            }
            Self::publish_rates(&self.shared, start);
        } else {
            self.shared.queue.drain_all();
        }
        if let Some(handle) = self.handle.take() {
            let _ = join_with_timeout(handle, Duration::from_secs(2));
        }
    }

    pub fn debug_info(&self) -> PipelineDebugInfo {
        PipelineDebugInfo {
            running: self.running.load(Ordering::SeqCst),
            packets_processed: self.shared.packets_processed.load(Ordering::Relaxed),
            processing_errors: self.shared.processing_errors.load(Ordering::Relaxed),
            queue_size: self.shared.queue.len(),
            interfaces: self.interfaces.clone(),
            interface_packet_counts: self.shared.interface_packet_counts.lock().unwrap().clone(),
        }
    }
}

/// Best-effort bounded join: on timeout the worker is abandoned (the
/// thread keeps running until process exit — acceptable since all
/// pipeline state is heap-owned).
fn join_with_timeout(handle: JoinHandle<()>, timeout: Duration) -> Result<(), ()> {
    if handle.is_finished() {
        let _ = handle.join();
        return Ok(());
    }
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if handle.is_finished() {
            let _ = handle.join();
            return Ok(());
        }
        std::thread::sleep(Duration::from_millis(20));
    }
    warn!("pipeline worker did not stop within timeout, abandoning");
    Err(())
}
