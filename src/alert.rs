//! Threshold alerting with per-key hysteresis and cooldown.

use crate::metrics::MetricsSnapshot;
use serde::Serialize;
use std::collections::HashMap;
use uuid::Uuid;

const DEFAULT_HISTORY_CAPACITY: usize = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub enum AlertSeverity {
    Warning,
    Critical,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Metric {
    PacketLoss,
    Latency,
    Jitter,
    Utilization,
    RetransmitRate,
}

impl Metric {
    fn extract(&self, snap: &MetricsSnapshot) -> Option<f64> {
        match self {
            Metric::PacketLoss => Some(snap.loss_rate),
            Metric::Latency => Some(snap.avg_latency_ms),
            Metric::Jitter => Some(snap.avg_jitter_ms),
            Metric::Utilization => snap.utilization_percent,
            Metric::RetransmitRate => {
                if snap.total_packets == 0 {
                    Some(0.0)
                } else {
                    Some(snap.retransmissions as f64 / snap.total_packets as f64 * 100.0)
                }
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct AlertRule {
    pub name: String,
    pub metric: Metric,
    pub threshold_warning: f64,
    pub threshold_critical: f64,
    pub cooldown_seconds: f64,
    pub hysteresis_count: u32,
    pub enabled: bool,
}

impl AlertRule {
    fn new(
        name: &str,
        metric: Metric,
        warning: f64,
        critical: f64,
        cooldown_seconds: f64,
    ) -> Self {
        Self {
            name: name.to_string(),
            metric,
            threshold_warning: warning,
            threshold_critical: critical,
            cooldown_seconds,
            hysteresis_count: 3,
            enabled: true,
        }
    }

    /// The five default rules.
    pub fn defaults() -> Vec<AlertRule> {
        vec![
            AlertRule::new("high_packet_loss", Metric::PacketLoss, 1.0, 5.0, 60.0),
            AlertRule::new("high_latency", Metric::Latency, 150.0, 400.0, 60.0),
            AlertRule::new("high_jitter", Metric::Jitter, 30.0, 100.0, 60.0),
            AlertRule::new(
                "bandwidth_saturation",
                Metric::Utilization,
                80.0,
                95.0,
                120.0,
            ),
            AlertRule::new(
                "tcp_retransmit_spike",
                Metric::RetransmitRate,
                2.0,
                5.0,
                120.0,
            ),
        ]
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Alert {
    pub id: String,
    pub interface: String,
    pub rule_name: String,
    pub metric: Metric,
    pub severity: AlertSeverity,
    pub value: f64,
    pub threshold: f64,
    pub raised_at: f64,
    pub resolved: bool,
    pub resolved_at: Option<f64>,
}

struct EngineState {
    rules: Vec<AlertRule>,
    active: HashMap<String, Alert>,
    history: Vec<Alert>,
    violation_count: HashMap<String, u32>,
    last_alert_time: HashMap<String, f64>,
}

/// Not internally synchronized — callers must serialize `evaluate` calls
/// on a given engine (typically invoked once per tick from the pipeline
/// worker or a dedicated ticker thread, never both).
pub struct AlertEngine {
    state: EngineState,
    callbacks: Vec<Box<dyn Fn(&Alert) + Send + Sync>>,
}

impl AlertEngine {
    pub fn new(rules: Vec<AlertRule>) -> Self {
        Self {
            state: EngineState {
                rules,
                active: HashMap::new(),
                history: Vec::new(),
                violation_count: HashMap::new(),
                last_alert_time: HashMap::new(),
            },
            callbacks: Vec::new(),
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(AlertRule::defaults())
    }

    pub fn subscribe(&mut self, cb: impl Fn(&Alert) + Send + Sync + 'static) {
        self.callbacks.push(Box::new(cb));
    }

    pub fn active_alerts(&self) -> Vec<Alert> {
        self.state.active.values().cloned().collect()
    }

    pub fn history(&self) -> &[Alert] {
        &self.state.history
    }

    pub fn violation_count(&self, interface: &str, metric_name: &str) -> u32 {
        let key = format!("{interface}:{metric_name}");
        *self.state.violation_count.get(&key).unwrap_or(&0)
    }

    /// One evaluation tick for one interface: every enabled rule is
    /// checked against the snapshot. Single-threaded per tick; see the
    /// struct docs for the serialization contract.
    pub fn evaluate(&mut self, interface: &str, snapshot: &MetricsSnapshot, now: f64) {
        let rules = self.state.rules.clone();
        for rule in rules.iter().filter(|r| r.enabled) {
            let key = format!("{interface}:{}", rule.name);
            let Some(value) = rule.metric.extract(snapshot) else {
                continue;
            };

            if value >= rule.threshold_critical {
                self.handle_violation(&key, interface, rule, AlertSeverity::Critical, value, now);
            } else if value >= rule.threshold_warning {
                self.handle_violation(&key, interface, rule, AlertSeverity::Warning, value, now);
            } else {
                self.handle_no_violation(&key);
            }
        }
    }

    fn handle_violation(
        &mut self,
        key: &str,
        interface: &str,
        rule: &AlertRule,
        severity: AlertSeverity,
        value: f64,
        now: f64,
    ) {
        let count = self.state.violation_count.entry(key.to_string()).or_insert(0);
        *count += 1;
        if *count < rule.hysteresis_count {
            return;
        }

        if let Some(last) = self.state.last_alert_time.get(key).copied() {
            if now - last < rule.cooldown_seconds {
                return;
            }
        }

        let threshold = if severity == AlertSeverity::Critical {
            rule.threshold_critical
        } else {
            rule.threshold_warning
        };

        if let Some(existing) = self.state.active.get_mut(key) {
            if severity > existing.severity {
                existing.severity = severity;
                existing.value = value;
                existing.threshold = threshold;
                self.state.last_alert_time.insert(key.to_string(), now);
            }
            return;
        }

        let alert = Alert {
            id: Uuid::new_v4().to_string()[..8].to_string(),
            interface: interface.to_string(),
            rule_name: rule.name.clone(),
            metric: rule.metric,
            severity,
            value,
            threshold,
            raised_at: now,
            resolved: false,
            resolved_at: None,
        };
        self.state.active.insert(key.to_string(), alert.clone());
        self.state.last_alert_time.insert(key.to_string(), now);
        self.push_history(alert.clone());
        self.notify(&alert);
    }

    fn handle_no_violation(&mut self, key: &str) {
        self.state.violation_count.remove(key);
        if let Some(mut alert) = self.state.active.remove(key) {
            alert.resolved = true;
            self.push_history(alert);
        }
    }

    fn push_history(&mut self, alert: Alert) {
        self.state.history.push(alert);
        if self.state.history.len() > DEFAULT_HISTORY_CAPACITY {
            let excess = self.state.history.len() - DEFAULT_HISTORY_CAPACITY;
            self.state.history.drain(0..excess);
        }
    }

    /// Callback failures are isolated: `catch_unwind` prevents a panicking
    /// subscriber from stalling evaluation for the rest of the ticks.
    fn notify(&self, alert: &Alert) {
        for cb in &self.callbacks {
            let _ = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| cb(alert)));
        }
    }
}

/// Per-profile warning/critical thresholds for a quality rating. Not part
/// of `AlertRule` evaluation — a separate convenience surface for
/// classifying a single metric reading.
#[derive(Debug, Clone, Copy)]
pub enum TrafficProfile {
    Voip,
    Video,
    Gaming,
    General,
}

#[derive(Debug, Clone, Copy)]
struct ThresholdPair {
    warning: f64,
    critical: f64,
}

fn thresholds_for(profile: TrafficProfile, metric: Metric) -> ThresholdPair {
    match (profile, metric) {
        (TrafficProfile::Voip, Metric::PacketLoss) => ThresholdPair {
            warning: 0.5,
            critical: 2.0,
        },
        (TrafficProfile::Voip, Metric::Latency) => ThresholdPair {
            warning: 100.0,
            critical: 200.0,
        },
        (TrafficProfile::Voip, Metric::Jitter) => ThresholdPair {
            warning: 20.0,
            critical: 50.0,
        },
        (TrafficProfile::Video, Metric::PacketLoss) => ThresholdPair {
            warning: 1.0,
            critical: 3.0,
        },
        (TrafficProfile::Video, Metric::Latency) => ThresholdPair {
            warning: 150.0,
            critical: 300.0,
        },
        (TrafficProfile::Video, Metric::Jitter) => ThresholdPair {
            warning: 30.0,
            critical: 80.0,
        },
        (TrafficProfile::Gaming, Metric::PacketLoss) => ThresholdPair {
            warning: 0.5,
            critical: 2.0,
        },
        (TrafficProfile::Gaming, Metric::Latency) => ThresholdPair {
            warning: 50.0,
            critical: 100.0,
        },
        (TrafficProfile::Gaming, Metric::Jitter) => ThresholdPair {
            warning: 10.0,
            critical: 30.0,
        },
        (_, Metric::PacketLoss) => ThresholdPair {
            warning: 1.0,
            critical: 5.0,
        },
        (_, Metric::Latency) => ThresholdPair {
            warning: 150.0,
            critical: 400.0,
        },
        (_, Metric::Jitter) => ThresholdPair {
            warning: 30.0,
            critical: 100.0,
        },
        (_, Metric::Utilization) => ThresholdPair {
            warning: 80.0,
            critical: 95.0,
        },
        (_, Metric::RetransmitRate) => ThresholdPair {
            warning: 2.0,
            critical: 5.0,
        },
    }
}

/// "excellent" | "good" | "acceptable" | "poor" | "critical".
pub fn quality_rating(profile: TrafficProfile, metric: Metric, value: f64) -> &'static str {
    let t = thresholds_for(profile, metric);
    if value >= t.critical {
        "critical"
    } else if value >= t.warning {
        "poor"
    } else if value >= t.warning * 0.66 {
        "acceptable"
    } else if value >= t.warning * 0.33 {
        "good"
    } else {
        "excellent"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot_with_latency(latency: f64) -> MetricsSnapshot {
        MetricsSnapshot {
            interface: "eth0".into(),
            total_packets: 1000,
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
            utilization_percent: None,
            loss_rate: 0.0,
            avg_latency_ms: latency,
            min_latency_ms: None,
            max_latency_ms: None,
            p95_latency_ms: 0.0,
            p99_latency_ms: 0.0,
            avg_jitter_ms: 0.0,
            sample_count: 0,
        }
    }

    #[test]
    fn s4_hysteresis_and_cooldown() {
        let rule = AlertRule::new("high_latency", Metric::Latency, 150.0, 400.0, 60.0);
        let mut engine = AlertEngine::new(vec![rule]);
        let snap = snapshot_with_latency(200.0);

        engine.evaluate("eth0", &snap, 0.0);
        assert!(engine.active_alerts().is_empty());
        engine.evaluate("eth0", &snap, 1.0);
        assert!(engine.active_alerts().is_empty());
        engine.evaluate("eth0", &snap, 2.0);
        assert_eq!(engine.active_alerts().len(), 1);
        assert_eq!(engine.active_alerts()[0].severity, AlertSeverity::Warning);

        engine.evaluate("eth0", &snap, 3.0);
        engine.evaluate("eth0", &snap, 4.0);
        assert_eq!(engine.active_alerts().len(), 1);

        let clear = snapshot_with_latency(50.0);
        engine.evaluate("eth0", &clear, 5.0);
        assert!(engine.active_alerts().is_empty());
        assert_eq!(engine.violation_count("eth0", "high_latency"), 0);
    }

    #[test]
    fn p6_no_violation_resets_count() {
        let rule = AlertRule::new("high_latency", Metric::Latency, 150.0, 400.0, 60.0);
        let mut engine = AlertEngine::new(vec![rule]);
        engine.evaluate("eth0", &snapshot_with_latency(10.0), 0.0);
        assert_eq!(engine.violation_count("eth0", "high_latency"), 0);
    }

    #[test]
    fn critical_severity_upgrades_active_alert_after_cooldown() {
        let rule = AlertRule::new("high_latency", Metric::Latency, 150.0, 400.0, 60.0);
        let mut engine = AlertEngine::new(vec![rule]);
        let warn = snapshot_with_latency(200.0);
        engine.evaluate("eth0", &warn, 0.0);
        engine.evaluate("eth0", &warn, 1.0);
        engine.evaluate("eth0", &warn, 2.0);
        assert_eq!(engine.active_alerts()[0].severity, AlertSeverity::Warning);

        let critical = snapshot_with_latency(500.0);
        engine.evaluate("eth0", &critical, 30.0);
        assert_eq!(engine.active_alerts()[0].severity, AlertSeverity::Warning);

        engine.evaluate("eth0", &critical, 62.0);
        assert_eq!(engine.active_alerts()[0].severity, AlertSeverity::Critical);
        assert_eq!(engine.active_alerts().len(), 1);
    }
}
