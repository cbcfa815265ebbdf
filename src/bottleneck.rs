//! Rule-based multi-signal bottleneck classifier.

use crate::metrics::MetricsSnapshot;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum BottleneckType {
    Bandwidth,
    Latency,
    PacketLoss,
    Jitter,
    Buffer,
}

#[derive(Debug, Clone, Serialize)]
pub struct Bottleneck {
    pub bottleneck_type: BottleneckType,
    pub location: String,
    pub severity: f64,
    pub description: String,
    pub evidence: Vec<String>,
    pub recommendations: Vec<String>,
}

impl Bottleneck {
    pub fn severity_label(&self) -> &'static str {
        severity_label(self.severity)
    }
}

fn severity_label(severity: f64) -> &'static str {
    if severity >= 0.9 {
        "critical"
    } else if severity >= 0.7 {
        "high"
    } else if severity >= 0.5 {
        "medium"
    } else {
        "low"
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub bottlenecks: Vec<Bottleneck>,
    pub health_score: u8,
    pub status: String,
}

pub struct BottleneckDetector;

impl BottleneckDetector {
    /// Pure function: runs all five independent rules and derives the
    /// health score/status from the emitted bottlenecks' max severity.
    pub fn analyze(interface: &str, snapshot: &MetricsSnapshot) -> HealthReport {
        let mut bottlenecks = Vec::new();
        if let Some(b) = Self::check_bandwidth(interface, snapshot) {
            bottlenecks.push(b);
        }
        if let Some(b) = Self::check_latency(interface, snapshot) {
            bottlenecks.push(b);
        }
        if let Some(b) = Self::check_packet_loss(interface, snapshot) {
            bottlenecks.push(b);
        }
        if let Some(b) = Self::check_jitter(interface, snapshot) {
            bottlenecks.push(b);
        }
        if let Some(b) = Self::check_buffer(interface, snapshot) {
            bottlenecks.push(b);
        }

        let max_severity = bottlenecks.iter().map(|b| b.severity).fold(0.0, f64::max);
        let health_score = if bottlenecks.is_empty() {
            100
        } else {
            ((1.0 - max_severity) * 100.0).round().clamp(0.0, 100.0) as u8
        };
        let status = if max_severity >= 0.8 {
            "critical"
        } else if max_severity >= 0.6 {
            "degraded"
        } else if max_severity >= 0.4 {
            "warning"
        } else if max_severity > 0.0 {
            "minor_issues"
        } else {
            "healthy"
        };

        HealthReport {
            bottlenecks,
            health_score,
            status: status.to_string(),
        }
    }

    fn check_bandwidth(interface: &str, snap: &MetricsSnapshot) -> Option<Bottleneck> {
        let util = snap.utilization_percent?;
        let severity = if util >= 95.0 {
            0.95
        } else if util >= 80.0 {
            0.7
        } else {
            return None;
        };
        Some(Bottleneck {
            bottleneck_type: BottleneckType::Bandwidth,
            location: interface.to_string(),
            severity,
            description: format!("link utilization at {util:.1}%"),
            evidence: vec![format!("utilization_percent={util:.1}")],
            recommendations: vec!["consider traffic shaping or link upgrade".into()],
        })
    }

    fn check_latency(interface: &str, snap: &MetricsSnapshot) -> Option<Bottleneck> {
        let avg = snap.avg_latency_ms;
        let severity = if avg >= 500.0 {
            0.9
        } else if avg >= 100.0 {
            0.6
        } else {
            return None;
        };
        Some(Bottleneck {
            bottleneck_type: BottleneckType::Latency,
            location: interface.to_string(),
            severity,
            description: format!("average latency {avg:.1} ms"),
            evidence: vec![format!("avg_latency_ms={avg:.1}")],
            recommendations: vec!["investigate routing path / queuing delay".into()],
        })
    }

    fn check_packet_loss(interface: &str, snap: &MetricsSnapshot) -> Option<Bottleneck> {
        let loss = snap.loss_rate;
        let severity = if loss >= 5.0 {
            0.95
        } else if loss >= 1.0 {
            0.7
        } else {
            return None;
        };
        Some(Bottleneck {
            bottleneck_type: BottleneckType::PacketLoss,
            location: interface.to_string(),
            severity,
            description: format!("packet loss rate {loss:.2}%"),
            evidence: vec![format!("loss_rate={loss:.2}%")],
            recommendations: vec!["correlate with LossLocalizer output".into()],
        })
    }

    fn check_jitter(interface: &str, snap: &MetricsSnapshot) -> Option<Bottleneck> {
        let jitter = snap.avg_jitter_ms;
        let severity = if jitter >= 100.0 {
            0.8
        } else if jitter >= 30.0 {
            0.5
        } else {
            return None;
        };
        Some(Bottleneck {
            bottleneck_type: BottleneckType::Jitter,
            location: interface.to_string(),
            severity,
            description: format!("average jitter {jitter:.1} ms"),
            evidence: vec![format!("avg_jitter_ms={jitter:.1}")],
            recommendations: vec!["check for queuing/buffering along the path".into()],
        })
    }

    fn check_buffer(interface: &str, snap: &MetricsSnapshot) -> Option<Bottleneck> {
        let dropped = snap.rx_dropped + snap.tx_dropped;
        if dropped == 0 {
            return None;
        }
        let drop_rate = if snap.total_packets == 0 {
            0.0
        } else {
            dropped as f64 / snap.total_packets as f64 * 100.0
        };
        let severity = if drop_rate >= 1.0 {
            0.85
        } else if drop_rate >= 0.1 {
            0.6
        } else {
            0.4
        };
        Some(Bottleneck {
            bottleneck_type: BottleneckType::Buffer,
            location: interface.to_string(),
            severity,
            description: format!("{dropped} packets dropped ({drop_rate:.3}%)"),
            evidence: vec![format!("rx_dropped+tx_dropped={dropped}")],
            recommendations: vec!["increase receive buffer size / ring depth".into()],
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(avg_latency_ms: f64, loss_rate: f64, avg_jitter_ms: f64, utilization: f64) -> MetricsSnapshot {
        MetricsSnapshot {
            interface: "eth0".into(),
            total_packets: 10_000,
            total_bytes: 0,
            retransmissions: 0,
            out_of_order: 0,
            duplicate_acks: 0,
            rx_dropped: 0,
            tx_dropped: 0,
            rx_errors: 0,
            tx_errors: 0,
            protocol_counts: Default::default(),
            protocol_bytes: Default::default(),
            packets_per_second: 0.0,
            bytes_per_second: 0.0,
            bandwidth_mbps: 0.0,
            utilization_percent: Some(utilization),
            loss_rate,
            avg_latency_ms,
            min_latency_ms: None,
            max_latency_ms: None,
            p95_latency_ms: 0.0,
            p99_latency_ms: 0.0,
            avg_jitter_ms,
            sample_count: 100,
        }
    }

    #[test]
    fn s5_bottleneck_ranking() {
        let snap = snapshot(600.0, 6.0, 10.0, 50.0);
        let report = BottleneckDetector::analyze("eth0", &snap);
        assert_eq!(report.bottlenecks.len(), 2);
        let latency = report
            .bottlenecks
            .iter()
            .find(|b| b.bottleneck_type == BottleneckType::Latency)
            .unwrap();
        assert!((latency.severity - 0.9).abs() < 1e-9);
        let loss = report
            .bottlenecks
            .iter()
            .find(|b| b.bottleneck_type == BottleneckType::PacketLoss)
            .unwrap();
        assert!((loss.severity - 0.95).abs() < 1e-9);
        assert_eq!(report.health_score, 5);
        assert_eq!(report.status, "critical");
    }

    #[test]
    fn p8_health_score_bucket_matches_max_severity() {
        let snap = snapshot(0.0, 0.0, 0.0, 0.0);
        let report = BottleneckDetector::analyze("eth0", &snap);
        assert!(report.bottlenecks.is_empty());
        assert_eq!(report.health_score, 100);
        assert_eq!(report.status, "healthy");
    }
}
