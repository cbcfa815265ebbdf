//! Snapshot cache and per-interface time-series rings.
//!
//! Each collection (snapshots, time series, flow cache) gets its own
//! mutex — no nested locking across them.

use crate::flow::{Flow, FlowKey};
use crate::metrics::MetricsSnapshot;
use crate::ring::StatsWindow;
use std::collections::HashMap;
use std::sync::Mutex;

const DEFAULT_SERIES_CAPACITY: usize = 3600;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SeriesMetric {
    PacketsPerSecond,
    BandwidthMbps,
    LatencyMs,
    JitterMs,
    LossPercent,
}

impl SeriesMetric {
    const ALL: [SeriesMetric; 5] = [
        SeriesMetric::PacketsPerSecond,
        SeriesMetric::BandwidthMbps,
        SeriesMetric::LatencyMs,
        SeriesMetric::JitterMs,
        SeriesMetric::LossPercent,
    ];

    fn value_from(&self, snap: &MetricsSnapshot) -> f64 {
        match self {
            SeriesMetric::PacketsPerSecond => snap.packets_per_second,
            SeriesMetric::BandwidthMbps => snap.bandwidth_mbps,
            SeriesMetric::LatencyMs => snap.avg_latency_ms,
            SeriesMetric::JitterMs => snap.avg_jitter_ms,
            SeriesMetric::LossPercent => snap.loss_rate,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortBy {
    Bytes,
    Packets,
    Retransmits,
}

struct SnapshotCache {
    snapshots: HashMap<String, MetricsSnapshot>,
}

struct TimeSeriesCache {
    series: HashMap<String, HashMap<SeriesMetric, StatsWindow>>,
    capacity: usize,
}

struct FlowCache {
    flows: HashMap<FlowKey, Flow>,
    max_flows: usize,
}

/// Thread-safe in-memory cache read by `LossLocalizer`, `BottleneckDetector`,
/// `InterfaceComparator`, `AlertEngine`, and the HTTP API. Written only by
/// the pipeline worker (snapshots/time-series) or callers explicitly
/// caching flow projections (`add_flow`).
pub struct MetricsStore {
    snapshots: Mutex<SnapshotCache>,
    time_series: Mutex<TimeSeriesCache>,
    flows: Mutex<FlowCache>,
}

impl MetricsStore {
    pub fn new(max_flows: usize) -> Self {
        Self {
            snapshots: Mutex::new(SnapshotCache {
                snapshots: HashMap::new(),
            }),
            time_series: Mutex::new(TimeSeriesCache {
                series: HashMap::new(),
                capacity: DEFAULT_SERIES_CAPACITY,
            }),
            flows: Mutex::new(FlowCache {
                flows: HashMap::new(),
                max_flows,
            }),
        }
    }

    /// Caches the snapshot and appends one sample to each of the five
    /// per-interface scalar time-series rings.
    pub fn set_snapshot(&self, interface: String, snapshot: MetricsSnapshot) {
        {
            let mut ts = self.time_series.lock().unwrap();
            let capacity = ts.capacity;
            let series = ts
                .series
                .entry(interface.clone())
                .or_insert_with(|| {
                    SeriesMetric::ALL
                        .iter()
                        .map(|&m| (m, StatsWindow::new(capacity)))
                        .collect()
                });
            for &metric in &SeriesMetric::ALL {
                let v = metric.value_from(&snapshot);
                series.entry(metric).or_insert_with(|| StatsWindow::new(capacity)).append(v);
            }
        }
        self.snapshots.lock().unwrap().snapshots.insert(interface, snapshot);
    }

    pub fn get_snapshot(&self, interface: &str) -> Option<MetricsSnapshot> {
        self.snapshots.lock().unwrap().snapshots.get(interface).cloned()
    }

    pub fn all_snapshots(&self) -> Vec<MetricsSnapshot> {
        self.snapshots.lock().unwrap().snapshots.values().cloned().collect()
    }

    pub fn time_series(&self, interface: &str, metric: SeriesMetric, last_n: usize) -> Vec<f64> {
        self.time_series
            .lock()
            .unwrap()
            .series
            .get(interface)
            .and_then(|m| m.get(&metric))
            .map(|w| w.recent(last_n))
            .unwrap_or_default()
    }

    pub fn add_flow(&self, flow: Flow) {
        let mut cache = self.flows.lock().unwrap();
        cache.flows.insert(flow.key, flow);
        if cache.flows.len() > cache.max_flows {
            Self::evict_oldest_flows(&mut cache, 0.20);
        }
    }

    fn evict_oldest_flows(cache: &mut FlowCache, fraction: f64) {
        let mut entries: Vec<(FlowKey, f64)> = cache
            .flows
            .iter()
            .map(|(&k, f)| (k, f.last_seen))
            .collect();
        entries.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap());
        let evict_count = ((cache.flows.len() as f64) * fraction).ceil() as usize;
        for (key, _) in entries.into_iter().take(evict_count.min(cache.flows.len())) {
            cache.flows.remove(&key);
        }
    }

    pub fn get_flow(&self, key: &FlowKey) -> Option<Flow> {
        self.flows.lock().unwrap().flows.get(key).cloned()
    }

    pub fn top_flows(&self, n: usize, sort_by: SortBy) -> Vec<Flow> {
        let cache = self.flows.lock().unwrap();
        let mut flows: Vec<Flow> = cache.flows.values().cloned().collect();
        flows.sort_by(|a, b| {
            let key_of = |f: &Flow| match sort_by {
                SortBy::Bytes => f.total_bytes() as f64,
                SortBy::Packets => f.total_packets() as f64,
                SortBy::Retransmits => f.retransmits as f64,
            };
            key_of(b).partial_cmp(&key_of(a)).unwrap()
        });
        flows.truncate(n);
        flows
    }

    pub fn flow_count(&self) -> usize {
        self.flows.lock().unwrap().flows.len()
    }

    pub fn clear(&self) {
        self.snapshots.lock().unwrap().snapshots.clear();
        self.time_series.lock().unwrap().series.clear();
        self.flows.lock().unwrap().flows.clear();
    }
}
