//! Integration tests exercising the public `netdiag_core` API against the
//! concrete scenarios (S1-S6) and invariants (P1-P8) this crate commits to.

use netdiag_core::{
    AlertEngine, AlertRule, BottleneckDetector, FlowEvent, FlowTracker, InterfaceComparator,
    InterfaceMetrics, L4Protocol, MetricsStore, PacketRecord,
};
use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;

fn ip(o: u8) -> IpAddr {
    IpAddr::V4(Ipv4Addr::new(10, 0, 0, o))
}

fn tcp(ts: f64, src_ip: u8, sp: u16, dst_ip: u8, dp: u16, flags: netdiag_core::packet::TcpFlags, seq: u32, ack: u32) -> PacketRecord {
    PacketRecord::new(ts, "eth0", ip(src_ip), ip(dst_ip), L4Protocol::Tcp, 64, 64)
        .with_ports(sp, dp)
        .with_tcp(flags, seq, ack, 65535)
}

#[test]
fn s1_retransmit_detection() {
    let tracker = FlowTracker::new(10_000, Duration::from_secs(300));
    let ack_flags = netdiag_core::packet::TcpFlags {
        ack: true,
        ..Default::default()
    };

    let (_, e1) = tracker.process(&mut tcp(0.000, 1, 5000, 2, 80, ack_flags, 1000, 1));
    let (_, e2) = tracker.process(&mut tcp(0.050, 1, 5000, 2, 80, ack_flags, 2000, 1));
    let (key, e3) = tracker.process(&mut tcp(0.150, 1, 5000, 2, 80, ack_flags, 1000, 1));

    assert_eq!(e1, FlowEvent::NewFlow);
    assert_eq!(e2, FlowEvent::None);
    assert_eq!(e3, FlowEvent::Retransmit);

    let flow = tracker.lookup(&key).unwrap();
    assert_eq!(flow.retransmits, 1);

    let mut metrics = InterfaceMetrics::new("eth0");
    metrics.note_event(e1);
    metrics.note_event(e2);
    metrics.note_event(e3);
    assert_eq!(metrics.retransmissions, 1);
}

#[test]
fn s2_syn_synack_rtt() {
    let tracker = FlowTracker::new(10_000, Duration::from_secs(300));
    let syn = netdiag_core::packet::TcpFlags {
        syn: true,
        ..Default::default()
    };
    let syn_ack = netdiag_core::packet::TcpFlags {
        syn: true,
        ack: true,
        ..Default::default()
    };
    let ack = netdiag_core::packet::TcpFlags {
        ack: true,
        ..Default::default()
    };

    tracker.process(&mut tcp(1.000, 1, 5000, 2, 80, syn, 100, 0));
    let (key, e2) = tracker.process(&mut tcp(1.040, 2, 80, 1, 5000, syn_ack, 500, 101));
    tracker.process(&mut tcp(1.045, 1, 5000, 2, 80, ack, 101, 501));

    assert_eq!(e2, FlowEvent::RttSample);
    let flow = tracker.lookup(&key).unwrap();
    assert!((flow.avg_rtt_ms() - 40.0).abs() < 1e-6);
    assert_eq!(flow.tcp.unwrap().state, netdiag_core::TcpState::Established);

    let mut metrics = InterfaceMetrics::new("eth0");
    metrics.add_latency(flow.avg_rtt() * 1000.0);
    assert!((metrics.snapshot().avg_latency_ms - 40.0).abs() < 1e-6);
}

#[test]
fn s3_bidirectional_canonicalization() {
    let tracker = FlowTracker::new(10_000, Duration::from_secs(300));
    let flags = netdiag_core::packet::TcpFlags {
        ack: true,
        ..Default::default()
    };

    let (k1, _) = tracker.process(&mut tcp(0.0, 1, 5000, 2, 80, flags, 10, 1));
    let (k2, _) = tracker.process(&mut tcp(0.1, 2, 80, 1, 5000, flags, 20, 11));

    assert_eq!(k1, k2);
    let flow = tracker.lookup(&k1).unwrap();
    assert_eq!(flow.packets_sent, 1);
    assert_eq!(flow.packets_received, 1);
}

#[test]
fn s4_alert_hysteresis_and_cooldown() {
    let rule = AlertRule::defaults().into_iter().find(|r| r.name == "high_latency").unwrap();
    assert_eq!(rule.threshold_warning, 150.0);
    assert_eq!(rule.threshold_critical, 400.0);

    let mut engine = AlertEngine::new(vec![rule]);
    let mut metrics = InterfaceMetrics::new("eth0");
    metrics.add_latency(200.0);
    let snap = metrics.snapshot();

    for t in [0.0, 1.0, 2.0] {
        engine.evaluate("eth0", &snap, t);
    }
    assert_eq!(engine.active_alerts().len(), 1);

    for t in [3.0, 4.0] {
        engine.evaluate("eth0", &snap, t);
    }
    assert_eq!(engine.active_alerts().len(), 1);

    let mut clear_metrics = InterfaceMetrics::new("eth0");
    clear_metrics.add_latency(50.0);
    engine.evaluate("eth0", &clear_metrics.snapshot(), 5.0);
    assert!(engine.active_alerts().is_empty());
    assert_eq!(engine.violation_count("eth0", "high_latency"), 0);
}

#[test]
fn s5_bottleneck_ranking() {
    let mut metrics = InterfaceMetrics::new("eth0").with_link_speed(1000.0);
    for _ in 0..100 {
        metrics.note_packet(1000, netdiag_core::Protocol::Tcp);
    }
    metrics.retransmissions = 6;
    for _ in 0..6 {
        metrics.note_event(FlowEvent::Retransmit);
    }
    metrics.add_latency(600.0);
    metrics.add_jitter(10.0);
    metrics.total_packets = 100;
    metrics.retransmissions = 6; // loss_rate = 6%

    let snap = metrics.snapshot();
    let report = BottleneckDetector::analyze("eth0", &snap);
    assert_eq!(report.bottlenecks.len(), 2);
    assert_eq!(report.health_score, 5);
    assert_eq!(report.status, "critical");
}

#[test]
fn s6_comparator_confidence_floor() {
    let mut a = InterfaceMetrics::new("eth0");
    let mut b = InterfaceMetrics::new("eth1");
    for _ in 0..50 {
        a.note_packet(100, netdiag_core::Protocol::Tcp);
        b.note_packet(100, netdiag_core::Protocol::Tcp);
    }
    a.add_latency(10.0);
    b.add_latency(14.0);

    let result = InterfaceComparator::compare(&a.snapshot(), &b.snapshot());
    assert!((result.score_a - result.score_b).abs() < 10.0);
    assert!((result.confidence - 0.35).abs() < 1e-9);
}

#[test]
fn p1_sent_plus_received_equals_total() {
    let tracker = FlowTracker::new(10_000, Duration::from_secs(300));
    let flags = netdiag_core::packet::TcpFlags {
        ack: true,
        ..Default::default()
    };
    let mut key = None;
    for i in 0..5u32 {
        let (k, _) = tracker.process(&mut tcp(i as f64, 1, 5000, 2, 80, flags, i, 0));
        key = Some(k);
    }
    let flow = tracker.lookup(&key.unwrap()).unwrap();
    assert_eq!(flow.packets_sent + flow.packets_received, flow.total_packets());
}

#[test]
fn p2_flow_count_bounded_by_max_flows() {
    let tracker = FlowTracker::new(8, Duration::from_secs(300));
    for i in 0..200u8 {
        let mut p = PacketRecord::new(
            i as f64,
            "eth0",
            ip(i),
            ip(i.wrapping_add(50)),
            L4Protocol::Udp,
            64,
            64,
        )
        .with_ports(1000 + i as u16, 2000 + i as u16);
        tracker.process(&mut p);
        assert!(tracker.flow_count() <= 8);
    }
}

#[test]
fn p3_canonicalization_symmetric_for_any_packet() {
    use netdiag_core::FlowKey;
    let k1 = FlowKey::canonical(ip(9), 1234, ip(5), 80, L4Protocol::Tcp);
    let k2 = FlowKey::canonical(ip(5), 80, ip(9), 1234, L4Protocol::Tcp);
    assert_eq!(k1, k2);
}

#[test]
fn p5_ring_buffer_never_exceeds_capacity_and_mean_matches() {
    let mut metrics = InterfaceMetrics::new("eth0");
    for v in 0..2000 {
        metrics.add_latency(v as f64);
    }
    assert!(metrics.latency_ms.len() <= 1000);
}

#[test]
fn p6_no_violation_after_tick_resets_count() {
    let rule = AlertRule::defaults().into_iter().find(|r| r.name == "high_latency").unwrap();
    let mut engine = AlertEngine::new(vec![rule]);
    let mut m = InterfaceMetrics::new("eth0");
    m.add_latency(10.0);
    engine.evaluate("eth0", &m.snapshot(), 0.0);
    assert_eq!(engine.violation_count("eth0", "high_latency"), 0);
}

#[test]
fn p8_health_score_matches_severity_bucket() {
    let mut m = InterfaceMetrics::new("eth0");
    m.total_packets = 1000;
    m.retransmissions = 60; // 6% loss -> severity 0.95
    let report = BottleneckDetector::analyze("eth0", &m.snapshot());
    assert_eq!(report.health_score, 5);
}

#[test]
fn store_round_trip_flow_projection() {
    let store = MetricsStore::new(100);
    let tracker = FlowTracker::new(100, Duration::from_secs(300));
    let flags = netdiag_core::packet::TcpFlags {
        ack: true,
        ..Default::default()
    };
    let (key, _) = tracker.process(&mut tcp(0.0, 1, 5000, 2, 80, flags, 1, 0));
    let flow = tracker.lookup(&key).unwrap();
    store.add_flow(flow.clone());
    let fetched = store.get_flow(&key).unwrap();
    assert_eq!(fetched.packets_sent, flow.packets_sent);
    assert_eq!(fetched.total_bytes(), flow.total_bytes());
}
