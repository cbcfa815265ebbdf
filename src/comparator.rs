//! Weighted scoring between two interfaces.
//!
//! Score weights: latency 0.30, jitter 0.20, loss 0.35, bandwidth 0.15.

use crate::metrics::MetricsSnapshot;
use serde::Serialize;

const WEIGHT_LATENCY: f64 = 0.30;
const WEIGHT_JITTER: f64 = 0.20;
const WEIGHT_LOSS: f64 = 0.35;
const WEIGHT_BANDWIDTH: f64 = 0.15;

// Reference "bad" values that cost a category its full weighted share.
const REF_LATENCY_MS: f64 = 150.0;
const REF_JITTER_MS: f64 = 30.0;
const REF_LOSS_PERCENT: f64 = 1.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Winner {
    A,
    B,
    Tie,
}

#[derive(Debug, Clone, Serialize)]
pub struct ComparisonResult {
    pub latency_winner: Winner,
    pub jitter_winner: Winner,
    pub packet_loss_winner: Winner,
    pub bandwidth_winner: Winner,
    pub score_a: f64,
    pub score_b: f64,
    pub overall_winner: Winner,
    pub confidence: f64,
    pub recommendation: String,
}

pub struct InterfaceComparator;

impl InterfaceComparator {
    pub fn compare(a: &MetricsSnapshot, b: &MetricsSnapshot) -> ComparisonResult {
        let latency_winner = lower_is_better(a.avg_latency_ms, b.avg_latency_ms);
        let jitter_winner = lower_is_better(a.avg_jitter_ms, b.avg_jitter_ms);
        let packet_loss_winner = lower_is_better(a.loss_rate, b.loss_rate);
        let bandwidth_winner = higher_is_better(a.bandwidth_mbps, b.bandwidth_mbps);

        let score_a = Self::score(a);
        let score_b = Self::score(b);
        let overall_winner = if (score_a - score_b).abs() < f64::EPSILON {
            Winner::Tie
        } else if score_a > score_b {
            Winner::A
        } else {
            Winner::B
        };

        let confidence = Self::confidence(a.total_packets, b.total_packets, score_a, score_b);
        let recommendation = Self::recommendation(overall_winner, score_a, score_b);

        ComparisonResult {
            latency_winner,
            jitter_winner,
            packet_loss_winner,
            bandwidth_winner,
            score_a,
            score_b,
            overall_winner,
            confidence,
            recommendation,
        }
    }

    /// 100 minus weighted penalties, each penalty capped at its category's
    /// full weighted share (100·weight) when the metric is at or past the
    /// documented reference "bad" value.
    fn score(snap: &MetricsSnapshot) -> f64 {
        let latency_penalty =
            (snap.avg_latency_ms / REF_LATENCY_MS).min(1.0) * WEIGHT_LATENCY * 100.0;
        let jitter_penalty =
            (snap.avg_jitter_ms / REF_JITTER_MS).min(1.0) * WEIGHT_JITTER * 100.0;
        let loss_penalty = (snap.loss_rate / REF_LOSS_PERCENT).min(1.0) * WEIGHT_LOSS * 100.0;
        // Bandwidth has no "bad" reference — utilization headroom is the
        // signal; an interface using less of its link is not penalized,
        // so this category contributes 0 penalty and only affects the
        // bandwidth_winner field, matching the source's scoring model.
        let bandwidth_penalty = 0.0 * WEIGHT_BANDWIDTH;
        100.0 - latency_penalty - jitter_penalty - loss_penalty - bandwidth_penalty
    }

    fn confidence(packets_a: u64, packets_b: u64, score_a: f64, score_b: f64) -> f64 {
        let mut c = 1.0;
        let min_packets = packets_a.min(packets_b);
        if min_packets < 100 {
            c *= 0.5;
        } else if min_packets < 1000 {
            c *= 0.8;
        }
        let diff = (score_a - score_b).abs();
        if diff < 5.0 {
            c *= 0.7;
        } else if diff < 10.0 {
            c *= 0.85;
        }
        c
    }

    fn recommendation(winner: Winner, score_a: f64, score_b: f64) -> String {
        match winner {
            Winner::Tie => "interfaces are statistically equivalent".to_string(),
            Winner::A => format!(
                "prefer interface A (score {score_a:.1} vs {score_b:.1})"
            ),
            Winner::B => format!(
                "prefer interface B (score {score_b:.1} vs {score_a:.1})"
            ),
        }
    }
}

fn lower_is_better(a: f64, b: f64) -> Winner {
    if (a - b).abs() < f64::EPSILON {
        Winner::Tie
    } else if a < b {
        Winner::A
    } else {
        Winner::B
    }
}

fn higher_is_better(a: f64, b: f64) -> Winner {
    if (a - b).abs() < f64::EPSILON {
        Winner::Tie
    } else if a > b {
        Winner::A
    } else {
        Winner::B
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snap(packets: u64, latency: f64, jitter: f64, loss: f64, bw: f64) -> MetricsSnapshot {
        MetricsSnapshot {
            interface: "eth0".into(),
            total_packets: packets,
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
            bandwidth_mbps: bw,
            utilization_percent: None,
            loss_rate: loss,
            avg_latency_ms: latency,
            min_latency_ms: None,
            max_latency_ms: None,
            p95_latency_ms: 0.0,
            p99_latency_ms: 0.0,
            avg_jitter_ms: jitter,
            sample_count: packets as usize,
        }
    }

    #[test]
    fn s6_confidence_floor_for_small_close_samples() {
        // Scores are driven by avg_latency_ms/jitter/loss so the test
        // constructs two snapshots whose computed scores differ by < 10.
        let a = snap(50, 10.0, 5.0, 0.1, 100.0);
        let b = snap(50, 14.0, 5.0, 0.1, 100.0);
        let result = InterfaceComparator::compare(&a, &b);
        assert!((result.score_a - result.score_b).abs() < 10.0);
        assert_eq!(result.overall_winner, Winner::A);
        assert!((result.confidence - 0.35).abs() < 1e-9);
    }

    #[test]
    fn tie_on_identical_snapshots() {
        let a = snap(1000, 20.0, 5.0, 0.2, 100.0);
        let b = snap(1000, 20.0, 5.0, 0.2, 100.0);
        let result = InterfaceComparator::compare(&a, &b);
        assert_eq!(result.overall_winner, Winner::Tie);
        assert_eq!(result.latency_winner, Winner::Tie);
    }
}
