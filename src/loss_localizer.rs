//! Correlates interface-counter deltas with TCP retransmit patterns to
//! classify loss location.

use crate::metrics::MetricsSnapshot;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

#[derive(Debug, Clone, Serialize)]
pub struct LossLocation {
    pub location: String,
    pub interface: String,
    pub evidence: Vec<String>,
    pub severity: Severity,
    pub action: String,
}

/// OS interface-counter deltas supplied by the platform collaborator
/// between two evaluation ticks (rx_dropped, rx_fifo_errors etc.).
#[derive(Debug, Clone, Copy, Default)]
pub struct InterfaceCounterDelta {
    pub rx_dropped: u64,
    pub rx_fifo_errors: u64,
    pub rx_missed_errors: u64,
    pub rx_errors: u64,
    /// Optional, Linux-only `/proc/net/snmp` UDP receive-buffer error delta.
    pub udp_rcvbuf_errors: Option<u64>,
}

/// Retransmit-delay classification accumulated over an evaluation window,
/// fed from `FlowEvent::Retransmit` observations. Fast retransmits
/// (< 200 ms delay) suggest congestion; timeout retransmits suggest a
/// path problem.
#[derive(Debug, Clone, Copy, Default)]
pub struct RetransmitWindow {
    pub fast_retransmits: u64,
    pub timeout_retransmits: u64,
}

impl RetransmitWindow {
    pub fn total(&self) -> u64 {
        self.fast_retransmits + self.timeout_retransmits
    }

    pub fn record(&mut self, delay_seconds: f64) {
        if delay_seconds < 0.200 {
            self.fast_retransmits += 1;
        } else {
            self.timeout_retransmits += 1;
        }
    }
}

/// Pure rule evaluator: zero or more `LossLocation`s per call, each rule
/// independent.
pub struct LossLocalizer;

impl LossLocalizer {
    pub fn localize(
        interface: &str,
        snapshot: &MetricsSnapshot,
        delta: &InterfaceCounterDelta,
        retransmits: &RetransmitWindow,
    ) -> Vec<LossLocation> {
        let mut out = Vec::new();
        if let Some(loc) = Self::check_interface_drops(interface, delta) {
            out.push(loc);
        }
        if let Some(loc) = Self::check_network_loss(interface, snapshot, retransmits) {
            out.push(loc);
        }
        if let Some(loc) = Self::check_socket_buffer(interface, delta) {
            out.push(loc);
        }
        out
    }

    fn check_interface_drops(
        interface: &str,
        delta: &InterfaceCounterDelta,
    ) -> Option<LossLocation> {
        let total = delta.rx_dropped + delta.rx_fifo_errors + delta.rx_missed_errors;
        if total == 0 && delta.rx_errors == 0 {
            return None;
        }
        let severity = if total > 100 {
            Severity::Critical
        } else if total > 10 {
            Severity::High
        } else {
            Severity::Medium
        };
        Some(LossLocation {
            location: "interface".into(),
            interface: interface.to_string(),
            evidence: vec![
                format!("rx_dropped+rx_fifo+rx_missed={total}"),
                format!("rx_errors={}", delta.rx_errors),
            ],
            severity,
            action: "check NIC driver/ring-buffer configuration".into(),
        })
    }

    fn check_network_loss(
        interface: &str,
        snapshot: &MetricsSnapshot,
        retransmits: &RetransmitWindow,
    ) -> Option<LossLocation> {
        let total_retransmits = retransmits.total();
        if total_retransmits < 5 {
            return None;
        }
        let location = if retransmits.fast_retransmits > retransmits.timeout_retransmits {
            "network_congestion"
        } else {
            "network_path"
        };
        let loss_rate = if snapshot.total_packets == 0 {
            0.0
        } else {
            total_retransmits as f64 / snapshot.total_packets as f64 * 100.0
        };
        let severity = if loss_rate > 5.0 {
            Severity::Critical
        } else if loss_rate > 2.0 {
            Severity::High
        } else if loss_rate > 1.0 {
            Severity::Medium
        } else {
            Severity::Low
        };
        Some(LossLocation {
            location: location.to_string(),
            interface: interface.to_string(),
            evidence: vec![
                format!("total_retransmits={total_retransmits}"),
                format!("loss_rate={loss_rate:.2}%"),
            ],
            severity,
            action: if location == "network_congestion" {
                "investigate upstream congestion / QoS".into()
            } else {
                "investigate path MTU/routing instability".into()
            },
        })
    }

    fn check_socket_buffer(
        interface: &str,
        delta: &InterfaceCounterDelta,
    ) -> Option<LossLocation> {
        let errs = delta.udp_rcvbuf_errors?;
        if errs == 0 {
            return None;
        }
        Some(LossLocation {
            location: "socket_buffer".into(),
            interface: interface.to_string(),
            evidence: vec![format!("udp_rcvbuf_errors={errs}")],
            severity: Severity::Medium,
            action: "increase SO_RCVBUF / application read rate".into(),
        })
    }
}
