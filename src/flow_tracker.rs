//! Owns the flow table; classifies every packet and evicts by LRU/timeout.

use crate::flow::{Flow, FlowEvent, FlowKey};
use crate::packet::{L4Protocol, PacketRecord};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

/// Pending half-open TCP handshakes, keyed by flow key, used to pair a
/// SYN with its SYN-ACK for RTT sampling.
type PendingSyn = HashMap<FlowKey, f64>;

struct Table {
    flows: HashMap<FlowKey, Flow>,
    pending_syn: PendingSyn,
    max_flows: usize,
    flow_timeout: f64,
}

/// Thread-safe owner of the flow table. All mutation and all reads
/// (including `all_flows`) take the single internal mutex; callers only
/// ever receive owned copies, never references into the table.
pub struct FlowTracker {
    table: Mutex<Table>,
}

impl FlowTracker {
    pub fn new(max_flows: usize, flow_timeout: Duration) -> Self {
        Self {
            table: Mutex::new(Table {
                flows: HashMap::new(),
                pending_syn: HashMap::new(),
                max_flows,
                flow_timeout: flow_timeout.as_secs_f64(),
            }),
        }
    }

    pub fn flow_count(&self) -> usize {
        self.table.lock().unwrap().flows.len()
    }

    pub fn lookup(&self, key: &FlowKey) -> Option<Flow> {
        self.table.lock().unwrap().flows.get(key).cloned()
    }

    pub fn all_flows(&self) -> Vec<Flow> {
        self.table.lock().unwrap().flows.values().cloned().collect()
    }

    pub fn active_flows(&self, max_age: Duration, now: f64) -> Vec<Flow> {
        let max_age = max_age.as_secs_f64();
        self.table
            .lock()
            .unwrap()
            .flows
            .values()
            .filter(|f| now - f.last_seen <= max_age)
            .cloned()
            .collect()
    }

    pub fn tcp_connections(&self) -> Vec<Flow> {
        self.table
            .lock()
            .unwrap()
            .flows
            .values()
            .filter(|f| f.tcp.is_some())
            .cloned()
            .collect()
    }

    /// Removes all flows whose idle time exceeds `flow_timeout`. Returns
    /// the number of flows removed.
    pub fn sweep_expired(&self, now: f64) -> usize {
        let mut table = self.table.lock().unwrap();
        let timeout = table.flow_timeout;
        let before = table.flows.len();
        table.flows.retain(|_, f| now - f.last_seen <= timeout);
        before - table.flows.len()
    }

    /// Processes one packet under the table lock, returning the flow key
    /// it belongs to and the classified event. Also fills in the packet's
    /// `is_retransmit`/`rtt` fields once it's known which event, if any,
    /// the packet produced.
    pub fn process(&self, packet: &mut PacketRecord) -> (FlowKey, FlowEvent) {
        let mut table = self.table.lock().unwrap();
        let now = packet.timestamp;

        let (src_port, dst_port) = match (packet.src_port, packet.dst_port) {
            (Some(s), Some(d)) => (s, d),
            _ => return Self::process_portless(&mut table, packet, now),
        };

        let key = FlowKey::canonical(
            packet.src_ip,
            src_port,
            packet.dst_ip,
            dst_port,
            packet.l4_protocol,
        );

        let mut event = FlowEvent::None;
        let is_new = !table.flows.contains_key(&key);
        if is_new {
            if table.flows.len() >= table.max_flows {
                Self::evict_oldest_fraction(&mut table, now, 0.10);
            }
            let is_tcp = matches!(packet.l4_protocol, L4Protocol::Tcp);
            table.flows.insert(key, Flow::new(key, now, is_tcp));
            event = FlowEvent::NewFlow;
        }

        let forward = key.is_forward(packet.src_ip, src_port);
        let bytes = packet.length as u64;

        // Pull pending-SYN state out before borrowing the flow mutably,
        // to avoid a second mutable borrow of `table`.
        let pending_syn_at = table.pending_syn.get(&key).copied();

        let flow = table.flows.get_mut(&key).expect("flow just inserted or present");
        flow.record_direction(forward, bytes, now);

        let mut tcp_event = FlowEvent::None;
        let mut tcp_rtt = None;
        let mut consumed_pending_syn = false;
        if let (Some(flags), true) = (packet.tcp_flags, matches!(packet.l4_protocol, L4Protocol::Tcp))
        {
            if flags.syn && !flags.ack {
                table.pending_syn.insert(key, now);
            }
            let window = packet.window.unwrap_or(0);
            let (ev, rtt) = flow.process_tcp_flags(flags, window, now);
            tcp_event = ev;
            tcp_rtt = rtt;
            if flags.syn && flags.ack && pending_syn_at.is_some() {
                consumed_pending_syn = true;
            }

            if let Some(ack) = packet.ack {
                if flags.ack {
                    let ack_event = flow.process_ack(forward, ack);
                    if matches!(tcp_event, FlowEvent::None) {
                        tcp_event = ack_event;
                    }
                }
            }
        }
        if consumed_pending_syn {
            table.pending_syn.remove(&key);
        }

        let mut seq_event = FlowEvent::None;
        let mut seq_rtt = None;
        if let Some(seq) = packet.seq {
            let (ev, rtt) = flow.process_sequence(seq, now);
            seq_event = ev;
            seq_rtt = rtt;
        }

        // Priority: Retransmit > OutOfOrder > RttSample > NewFlow > None.
        event = Self::pick_most_severe(event, seq_event, tcp_event);

        packet.is_retransmit = matches!(event, FlowEvent::Retransmit);
        packet.rtt = match event {
            FlowEvent::Retransmit => seq_rtt,
            FlowEvent::RttSample => tcp_rtt,
            _ => None,
        };

        (key, event)
    }

    /// ICMP and other port-less protocols don't have a bidirectional
    /// conversation to track: no canonicalization, no IAT/jitter, no
    /// sequence/dup-ack bookkeeping. Just a minimal per-direction counter
    /// bumped under the same table lock and eviction policy as everything
    /// else.
    fn process_portless(
        table: &mut Table,
        packet: &PacketRecord,
        now: f64,
    ) -> (FlowKey, FlowEvent) {
        let key = FlowKey::raw(packet.src_ip, packet.dst_ip, packet.l4_protocol);
        let bytes = packet.length as u64;

        let event = if table.flows.contains_key(&key) {
            FlowEvent::None
        } else {
            if table.flows.len() >= table.max_flows {
                Self::evict_oldest_fraction(table, now, 0.10);
            }
            table.flows.insert(key, Flow::new(key, now, false));
            FlowEvent::NewFlow
        };

        let flow = table.flows.get_mut(&key).expect("flow just inserted or present");
        flow.last_seen = now;
        flow.packets_sent += 1;
        flow.bytes_sent += bytes;

        (key, event)
    }

    fn pick_most_severe(new_flow: FlowEvent, seq: FlowEvent, tcp: FlowEvent) -> FlowEvent {
        fn rank(e: FlowEvent) -> u8 {
            match e {
                FlowEvent::Retransmit => 4,
                FlowEvent::OutOfOrder => 3,
                FlowEvent::RttSample => 2,
                FlowEvent::DuplicateAck => 2,
                FlowEvent::NewFlow => 1,
                FlowEvent::None => 0,
            }
        }
        [new_flow, seq, tcp]
            .into_iter()
            .max_by_key(|&e| rank(e))
            .unwrap_or(FlowEvent::None)
    }

    /// Evicts the oldest `fraction` of flows by `last_seen`, never
    /// touching a flow seen within `max(1s, flow_timeout/60)` of `now`.
    fn evict_oldest_fraction(table: &mut Table, now: f64, fraction: f64) {
        let protect_window = (table.flow_timeout / 60.0).max(1.0);
        let mut candidates: Vec<(FlowKey, f64)> = table
            .flows
            .iter()
            .filter(|(_, f)| now - f.last_seen > protect_window)
            .map(|(&k, f)| (k, f.last_seen))
            .collect();
        if candidates.is_empty() {
            return;
        }
        candidates.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap());
        let evict_count = ((table.flows.len() as f64) * fraction).ceil() as usize;
        let evict_count = evict_count.min(candidates.len());
        for (key, _) in candidates.into_iter().take(evict_count) {
            table.flows.remove(&key);
            table.pending_syn.remove(&key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::{PacketRecord, TcpFlags};
    use std::net::{IpAddr, Ipv4Addr};

    fn addr(o: u8) -> IpAddr {
        IpAddr::V4(Ipv4Addr::new(10, 0, 0, o))
    }

    fn tcp_packet(ts: f64, sp: u16, dp: u16, flags: TcpFlags, seq: u32, ack: u32) -> PacketRecord {
        PacketRecord::new(ts, "eth0", addr(1), addr(2), L4Protocol::Tcp, 64, 64)
            .with_ports(sp, dp)
            .with_tcp(flags, seq, ack, 65535)
    }

    #[test]
    fn s1_retransmit_detection() {
        let tracker = FlowTracker::new(10_000, Duration::from_secs(300));
        let flags = TcpFlags {
            ack: true,
            ..Default::default()
        };
        let mut p1 = tcp_packet(0.000, 5000, 80, flags, 1000, 1);
        let mut p2 = tcp_packet(0.050, 5000, 80, flags, 2000, 1);
        let mut p3 = tcp_packet(0.150, 5000, 80, flags, 1000, 1);

        let (_, e1) = tracker.process(&mut p1);
        let (_, e2) = tracker.process(&mut p2);
        let (key, e3) = tracker.process(&mut p3);

        assert_eq!(e1, FlowEvent::NewFlow);
        assert_eq!(e2, FlowEvent::None);
        assert_eq!(e3, FlowEvent::Retransmit);
        assert!(!p1.is_retransmit);
        assert!(p3.is_retransmit);
        assert!((p3.rtt.unwrap() - 0.150).abs() < 1e-6);

        let flow = tracker.lookup(&key).unwrap();
        assert_eq!(flow.retransmits, 1);
        assert!((flow.rtt_samples.mean() - 0.150).abs() < 1e-6);
    }

    #[test]
    fn s2_syn_synack_rtt() {
        let tracker = FlowTracker::new(10_000, Duration::from_secs(300));
        let syn = TcpFlags {
            syn: true,
            ..Default::default()
        };
        let syn_ack = TcpFlags {
            syn: true,
            ack: true,
            ..Default::default()
        };
        let ack = TcpFlags {
            ack: true,
            ..Default::default()
        };

        let mut p1 = tcp_packet(1.000, 5000, 80, syn, 100, 0);
        let mut p2 = PacketRecord::new(1.040, "eth0", addr(2), addr(1), L4Protocol::Tcp, 64, 64)
            .with_ports(80, 5000)
            .with_tcp(syn_ack, 500, 101, 65535);
        let mut p3 = tcp_packet(1.045, 5000, 80, ack, 101, 501);

        tracker.process(&mut p1);
        let (key, e2) = tracker.process(&mut p2);
        tracker.process(&mut p3);

        assert_eq!(e2, FlowEvent::RttSample);
        assert!((p2.rtt.unwrap() - 0.040).abs() < 1e-6);
        let flow = tracker.lookup(&key).unwrap();
        assert!((flow.avg_rtt_ms() - 40.0).abs() < 1e-6);
        assert_eq!(flow.tcp.unwrap().state, crate::flow::TcpState::Established);
    }

    #[test]
    fn s3_bidirectional_canonicalization() {
        let tracker = FlowTracker::new(10_000, Duration::from_secs(300));
        let flags = TcpFlags {
            ack: true,
            ..Default::default()
        };
        let mut p1 = tcp_packet(0.0, 5000, 80, flags, 10, 1);
        let mut p2 = PacketRecord::new(0.1, "eth0", addr(2), addr(1), L4Protocol::Tcp, 64, 64)
            .with_ports(80, 5000)
            .with_tcp(flags, 20, 11, 65535);

        let (k1, _) = tracker.process(&mut p1);
        let (k2, _) = tracker.process(&mut p2);
        assert_eq!(k1, k2);

        let flow = tracker.lookup(&k1).unwrap();
        assert_eq!(flow.packets_sent, 1);
        assert_eq!(flow.packets_received, 1);
    }

    #[test]
    fn p2_flow_count_never_exceeds_max() {
        let tracker = FlowTracker::new(4, Duration::from_secs(300));
        for i in 0..20u8 {
            let mut p = PacketRecord::new(
                i as f64 * 2.0,
                "eth0",
                addr(i),
                addr(i.wrapping_add(100)),
                L4Protocol::Udp,
                64,
                64,
            )
            .with_ports(1000 + i as u16, 2000 + i as u16);
            tracker.process(&mut p);
            assert!(tracker.flow_count() <= 4);
        }
    }

    #[test]
    fn sweep_expired_removes_idle_flows() {
        let tracker = FlowTracker::new(10_000, Duration::from_secs(1));
        let mut p = PacketRecord::new(0.0, "eth0", addr(1), addr(2), L4Protocol::Udp, 64, 64)
            .with_ports(1111, 2222);
        tracker.process(&mut p);
        assert_eq!(tracker.flow_count(), 1);
        let removed = tracker.sweep_expired(10.0);
        assert_eq!(removed, 1);
        assert_eq!(tracker.flow_count(), 0);
    }

    #[test]
    fn icmp_packet_does_not_enter_the_bidirectional_path() {
        let tracker = FlowTracker::new(10_000, Duration::from_secs(300));
        let mut p1 = PacketRecord::new(0.0, "eth0", addr(1), addr(2), L4Protocol::Icmp, 64, 64);
        let mut p2 = PacketRecord::new(0.1, "eth0", addr(1), addr(2), L4Protocol::Icmp, 64, 64);

        let (key1, e1) = tracker.process(&mut p1);
        let (key2, e2) = tracker.process(&mut p2);

        assert_eq!(e1, FlowEvent::NewFlow);
        assert_eq!(e2, FlowEvent::None);
        assert_eq!(key1, key2);

        let flow = tracker.lookup(&key1).unwrap();
        assert_eq!(flow.packets_sent, 2);
        assert_eq!(flow.packets_received, 0);
        assert!(flow.iat_samples.is_empty());
        assert!(flow.tcp.is_none());
    }

    #[test]
    fn icmp_reply_gets_its_own_pseudo_flow_not_folded_into_the_request() {
        let tracker = FlowTracker::new(10_000, Duration::from_secs(300));
        let mut request = PacketRecord::new(0.0, "eth0", addr(1), addr(2), L4Protocol::Icmp, 64, 64);
        let mut reply = PacketRecord::new(0.01, "eth0", addr(2), addr(1), L4Protocol::Icmp, 64, 64);

        let (key_req, _) = tracker.process(&mut request);
        let (key_reply, _) = tracker.process(&mut reply);

        assert_ne!(key_req, key_reply);
        assert_eq!(tracker.flow_count(), 2);
    }
}
