//! Per-interface rolling aggregates: counters, protocol histograms, and
//! latency/jitter rings, plus rate computation over an elapsed window.

use crate::packet::Protocol;
use crate::ring::StatsWindow;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

const LATENCY_CAPACITY: usize = 1000;
const JITTER_CAPACITY: usize = 1000;

/// Rolling, mutable metrics for one capture interface. Owned exclusively
/// by the pipeline worker thread; readers only ever see a
/// [`MetricsSnapshot`] copy published through `MetricsStore`.
#[derive(Debug, Clone)]
pub struct InterfaceMetrics {
    pub interface: String,

    pub total_packets: u64,
    pub total_bytes: u64,
    pub retransmissions: u64,
    pub out_of_order: u64,
    pub duplicate_acks: u64,
    pub rx_dropped: u64,
    pub tx_dropped: u64,
    pub rx_errors: u64,
    pub tx_errors: u64,

    pub protocol_counts: HashMap<Protocol, u64>,
    pub protocol_bytes: HashMap<Protocol, u64>,

    pub latency_ms: StatsWindow,
    pub jitter_ms: StatsWindow,

    pub link_speed_mbps: Option<f64>,

    pub packets_per_second: f64,
    pub bytes_per_second: f64,
    pub bandwidth_mbps: f64,
    pub utilization_percent: Option<f64>,

    last_update: Option<f64>,
    last_packets: u64,
    last_bytes: u64,
}

impl InterfaceMetrics {
    pub fn new(interface: impl Into<String>) -> Self {
        Self {
            interface: interface.into(),
            total_packets: 0,
            total_bytes: 0,
            retransmissions: 0,
            out_of_order: 0,
            duplicate_acks: 0,
            rx_dropped: 0,
            tx_dropped: 0,
            rx_errors: 0,
            tx_errors: 0,
            protocol_counts: HashMap::new(),
            protocol_bytes: HashMap::new(),
            latency_ms: StatsWindow::new(LATENCY_CAPACITY),
            jitter_ms: StatsWindow::new(JITTER_CAPACITY),
            link_speed_mbps: None,
            packets_per_second: 0.0,
            bytes_per_second: 0.0,
            bandwidth_mbps: 0.0,
            utilization_percent: None,
            last_update: None,
            last_packets: 0,
            last_bytes: 0,
        }
    }

    pub fn with_link_speed(mut self, mbps: f64) -> Self {
        self.link_speed_mbps = Some(mbps);
        self
    }

    pub fn add_latency(&mut self, ms: f64) {
        self.latency_ms.append(ms);
    }

    pub fn add_jitter(&mut self, ms: f64) {
        self.jitter_ms.append(ms);
    }

    pub fn note_packet(&mut self, bytes: u64, proto: Protocol) {
        self.total_packets += 1;
        self.total_bytes += bytes;
        *self.protocol_counts.entry(proto).or_insert(0) += 1;
        *self.protocol_bytes.entry(proto).or_insert(0) += bytes;
    }

    /// Event counters from a `FlowEvent`. `RttSample`/`NewFlow`/`None`
    /// carry no dedicated InterfaceMetrics counter.
    pub fn note_event(&mut self, event: crate::flow::FlowEvent) {
        use crate::flow::FlowEvent;
        match event {
            FlowEvent::Retransmit => self.retransmissions += 1,
            FlowEvent::OutOfOrder => self.out_of_order += 1,
            FlowEvent::DuplicateAck => self.duplicate_acks += 1,
            FlowEvent::NewFlow | FlowEvent::RttSample | FlowEvent::None => {}
        }
    }

    pub fn note_drop(&mut self, rx_dropped: u64, tx_dropped: u64, rx_errors: u64, tx_errors: u64) {
        self.rx_dropped += rx_dropped;
        self.tx_dropped += tx_dropped;
        self.rx_errors += rx_errors;
        self.tx_errors += tx_errors;
    }

    /// Recomputes packet/byte rates only when `now > last_update`. The
    /// first call establishes baselines and yields zero rates.
    pub fn recompute_rates(&mut self, now: f64) {
        if let Some(last_update) = self.last_update {
            if now > last_update {
                let dt = now - last_update;
                self.packets_per_second =
                    (self.total_packets - self.last_packets) as f64 / dt;
                self.bytes_per_second = (self.total_bytes - self.last_bytes) as f64 / dt;
                self.bandwidth_mbps = self.bytes_per_second * 8.0 / 1e6;
                self.utilization_percent = self
                    .link_speed_mbps
                    .filter(|&speed| speed > 0.0)
                    .map(|speed| (self.bandwidth_mbps / speed * 100.0).min(100.0));
            }
        }
        self.last_update = Some(now);
        self.last_packets = self.total_packets;
        self.last_bytes = self.total_bytes;
    }

    pub fn percentile(&self, p: f64) -> f64 {
        self.latency_ms.percentile(p)
    }

    pub fn packet_loss_rate(&self) -> f64 {
        if self.total_packets == 0 {
            0.0
        } else {
            self.retransmissions as f64 / self.total_packets as f64 * 100.0
        }
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            interface: self.interface.clone(),
            total_packets: self.total_packets,
            total_bytes: self.total_bytes,
            retransmissions: self.retransmissions,
            out_of_order: self.out_of_order,
            duplicate_acks: self.duplicate_acks,
            rx_dropped: self.rx_dropped,
            tx_dropped: self.tx_dropped,
            rx_errors: self.rx_errors,
            tx_errors: self.tx_errors,
            protocol_counts: self.protocol_counts.clone(),
            protocol_bytes: self.protocol_bytes.clone(),
            packets_per_second: self.packets_per_second,
            bytes_per_second: self.bytes_per_second,
            bandwidth_mbps: self.bandwidth_mbps,
            utilization_percent: self.utilization_percent,
            loss_rate: self.packet_loss_rate(),
            avg_latency_ms: self.latency_ms.mean(),
            min_latency_ms: self.latency_ms.min_value(),
            max_latency_ms: self.latency_ms.max_value(),
            p95_latency_ms: self.latency_ms.percentile(95.0),
            p99_latency_ms: self.latency_ms.percentile(99.0),
            avg_jitter_ms: self.jitter_ms.mean(),
            sample_count: self.latency_ms.len(),
        }
    }
}

/// An immutable, shareable-across-threads copy of an interface's metrics
/// at a point in time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub interface: String,
    pub total_packets: u64,
    pub total_bytes: u64,
    pub retransmissions: u64,
    pub out_of_order: u64,
    pub duplicate_acks: u64,
    pub rx_dropped: u64,
    pub tx_dropped: u64,
    pub rx_errors: u64,
    pub tx_errors: u64,
    pub protocol_counts: HashMap<Protocol, u64>,
    pub protocol_bytes: HashMap<Protocol, u64>,
    pub packets_per_second: f64,
    pub bytes_per_second: f64,
    pub bandwidth_mbps: f64,
    pub utilization_percent: Option<f64>,
    pub loss_rate: f64,
    pub avg_latency_ms: f64,
    pub min_latency_ms: Option<f64>,
    pub max_latency_ms: Option<f64>,
    pub p95_latency_ms: f64,
    pub p99_latency_ms: f64,
    pub avg_jitter_ms: f64,
    pub sample_count: usize,
}
