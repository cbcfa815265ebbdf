//! Flow identity and per-flow state: `FlowKey` canonicalization, `Flow`
//! counters, and the TCP-specific extension `TcpFlow`.

use crate::packet::L4Protocol;
use crate::ring::StatsWindow;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::net::IpAddr;

const RTT_SAMPLE_CAPACITY: usize = 100;
const IAT_SAMPLE_CAPACITY: usize = 100;
const WINDOW_SIZE_CAPACITY: usize = 100;
const SEQ_HISTORY_CAP: usize = 1000;
const SEQ_HISTORY_PRUNE_TO: usize = 500;

/// A canonical 5-tuple: whichever endpoint has the lexicographically
/// smaller `(ip, port)` pair is always stored first, so both directions of
/// a conversation hash identically.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FlowKey {
    pub ip_lo: IpAddr,
    pub port_lo: u16,
    pub ip_hi: IpAddr,
    pub port_hi: u16,
    pub protocol: L4Protocol,
}

impl FlowKey {
    /// Swaps endpoints iff `(src_ip, src_port) > (dst_ip, dst_port)`. Only
    /// meaningful for protocols that actually carry ports; port-less
    /// traffic goes through [`FlowKey::raw`] instead.
    pub fn canonical(
        src_ip: IpAddr,
        src_port: u16,
        dst_ip: IpAddr,
        dst_port: u16,
        protocol: L4Protocol,
    ) -> Self {
        if (src_ip, src_port) <= (dst_ip, dst_port) {
            FlowKey {
                ip_lo: src_ip,
                port_lo: src_port,
                ip_hi: dst_ip,
                port_hi: dst_port,
                protocol,
            }
        } else {
            FlowKey {
                ip_lo: dst_ip,
                port_lo: dst_port,
                ip_hi: src_ip,
                port_hi: src_port,
                protocol,
            }
        }
    }

    /// Minimal key for protocols with no ports to canonicalize on (ICMP,
    /// "other"). Stored in literal src/dst order rather than swapped —
    /// there's no bidirectional conversation to fold the two directions
    /// into, so each direction gets its own pseudo-flow.
    pub fn raw(src_ip: IpAddr, dst_ip: IpAddr, protocol: L4Protocol) -> Self {
        FlowKey {
            ip_lo: src_ip,
            port_lo: 0,
            ip_hi: dst_ip,
            port_hi: 0,
            protocol,
        }
    }

    /// True when `(src_ip, src_port)` matches this key's first endpoint —
    /// i.e. the packet travels in the "sent" direction for this flow.
    pub fn is_forward(&self, src_ip: IpAddr, src_port: u16) -> bool {
        (src_ip, src_port) == (self.ip_lo, self.port_lo)
    }
}

impl std::fmt::Display for FlowKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}:{}-{}:{}/{:?}",
            self.ip_lo, self.port_lo, self.ip_hi, self.port_hi, self.protocol
        )
    }
}

/// TCP connection state machine, driven solely by observed flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum TcpState {
    #[default]
    Unknown,
    SynSent,
    SynReceived,
    Established,
    FinWait,
    Closed,
}

/// The classification FlowTracker assigns to the packet just processed.
/// Priority order when more than one condition is true for a single
/// packet: `Retransmit > OutOfOrder > RttSample > NewFlow > None`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowEvent {
    NewFlow,
    Retransmit,
    OutOfOrder,
    DuplicateAck,
    RttSample,
    None,
}

/// Sequence-number memory used for retransmit/out-of-order detection.
/// Bounded to [`SEQ_HISTORY_CAP`] entries; on overflow, pruned down to the
/// [`SEQ_HISTORY_PRUNE_TO`] most-recent-by-timestamp entries (also
/// purging the companion `seen` set).
#[derive(Debug, Clone, Default)]
pub struct SeqHistory {
    first_seen: HashMap<u32, f64>,
    seen: HashSet<u32>,
}

impl SeqHistory {
    pub fn contains(&self, seq: u32) -> bool {
        self.seen.contains(&seq)
    }

    pub fn first_seen_at(&self, seq: u32) -> Option<f64> {
        self.first_seen.get(&seq).copied()
    }

    pub fn record(&mut self, seq: u32, now: f64) {
        self.first_seen.insert(seq, now);
        self.seen.insert(seq);
        if self.first_seen.len() > SEQ_HISTORY_CAP {
            self.prune();
        }
    }

    fn prune(&mut self) {
        let mut entries: Vec<(u32, f64)> =
            self.first_seen.iter().map(|(&s, &t)| (s, t)).collect();
        // Oldest-by-time first; keep the most recent SEQ_HISTORY_PRUNE_TO.
        entries.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap());
        let drop_count = entries.len().saturating_sub(SEQ_HISTORY_PRUNE_TO);
        for (seq, _) in entries.into_iter().take(drop_count) {
            self.first_seen.remove(&seq);
            self.seen.remove(&seq);
        }
    }

    pub fn len(&self) -> usize {
        self.first_seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.first_seen.is_empty()
    }
}

/// Per-direction last-N ACK tracking for duplicate-ACK detection. Three
/// consecutive identical ACK numbers on one direction emits
/// `FlowEvent::DuplicateAck`.
#[derive(Debug, Clone, Default)]
struct DupAckTracker {
    forward_last_ack: Option<u32>,
    forward_repeat: u32,
    reverse_last_ack: Option<u32>,
    reverse_repeat: u32,
}

impl DupAckTracker {
    fn observe(&mut self, forward: bool, ack: u32) -> bool {
        let (last, repeat) = if forward {
            (&mut self.forward_last_ack, &mut self.forward_repeat)
        } else {
            (&mut self.reverse_last_ack, &mut self.reverse_repeat)
        };
        if *last == Some(ack) {
            *repeat += 1;
        } else {
            *last = Some(ack);
            *repeat = 1;
        }
        *repeat == 3
    }
}

/// A bidirectional conversation, keyed by [`FlowKey`]. Owned and mutated
/// exclusively by `FlowTracker` under its flow-table lock.
#[derive(Debug, Clone)]
pub struct Flow {
    pub key: FlowKey,
    pub start_time: f64,
    pub last_seen: f64,

    pub packets_sent: u64,
    pub packets_received: u64,
    pub bytes_sent: u64,
    pub bytes_received: u64,

    pub retransmits: u64,
    pub out_of_order: u64,
    pub duplicate_acks: u64,

    pub rtt_samples: StatsWindow,
    pub iat_samples: StatsWindow,
    last_packet_time: Option<f64>,

    pub(crate) seq_history: SeqHistory,
    pub highest_seq: Option<u32>,
    dup_ack: DupAckTracker,

    pub tcp: Option<TcpFlow>,
}

/// TCP-specific extension to [`Flow`].
#[derive(Debug, Clone)]
pub struct TcpFlow {
    pub state: TcpState,
    pub syn_time: Option<f64>,
    pub syn_ack_time: Option<f64>,
    pub established_time: Option<f64>,
    pub window_sizes: StatsWindow,
    pub ecn_echo_count: u64,
    pub window_reductions: u64,
    pending_syn: Option<f64>,
    last_window: Option<u16>,
}

impl Default for TcpFlow {
    fn default() -> Self {
        Self {
            state: TcpState::Unknown,
            syn_time: None,
            syn_ack_time: None,
            established_time: None,
            window_sizes: StatsWindow::new(WINDOW_SIZE_CAPACITY),
            ecn_echo_count: 0,
            window_reductions: 0,
            pending_syn: None,
            last_window: None,
        }
    }
}

impl Flow {
    pub fn new(key: FlowKey, now: f64, is_tcp: bool) -> Self {
        Self {
            key,
            start_time: now,
            last_seen: now,
            packets_sent: 0,
            packets_received: 0,
            bytes_sent: 0,
            bytes_received: 0,
            retransmits: 0,
            out_of_order: 0,
            duplicate_acks: 0,
            rtt_samples: StatsWindow::new(RTT_SAMPLE_CAPACITY),
            iat_samples: StatsWindow::new(IAT_SAMPLE_CAPACITY),
            last_packet_time: None,
            seq_history: SeqHistory::default(),
            highest_seq: None,
            dup_ack: DupAckTracker::default(),
            tcp: if is_tcp {
                Some(TcpFlow::default())
            } else {
                None
            },
        }
    }

    pub fn duration(&self) -> f64 {
        self.last_seen - self.start_time
    }

    pub fn total_packets(&self) -> u64 {
        self.packets_sent + self.packets_received
    }

    pub fn total_bytes(&self) -> u64 {
        self.bytes_sent + self.bytes_received
    }

    pub fn avg_rtt(&self) -> f64 {
        self.rtt_samples.mean()
    }

    pub fn avg_rtt_ms(&self) -> f64 {
        self.avg_rtt() * 1000.0
    }

    pub fn packet_loss_rate(&self) -> f64 {
        let total = self.total_packets();
        if total == 0 {
            0.0
        } else {
            self.retransmits as f64 / total as f64
        }
    }

    /// Mean absolute difference between consecutive IAT samples. Requires
    /// at least 2 samples; otherwise 0.0.
    pub fn jitter(&self) -> f64 {
        let samples = self.iat_samples.values();
        if samples.len() < 2 {
            return 0.0;
        }
        let mut sum = 0.0;
        for w in samples.windows(2) {
            sum += (w[1] - w[0]).abs();
        }
        sum / (samples.len() - 1) as f64
    }

    pub fn jitter_ms(&self) -> f64 {
        self.jitter() * 1000.0
    }

    /// Records forward/reverse byte+packet counters, IAT, and touches
    /// `last_seen`. Returns the contribution to the event that should be
    /// reported if nothing more severe is found afterwards (always
    /// `FlowEvent::None` here — direction bookkeeping never itself
    /// produces an event).
    pub(crate) fn record_direction(&mut self, forward: bool, bytes: u64, now: f64) {
        self.last_seen = now;
        if forward {
            self.packets_sent += 1;
            self.bytes_sent += bytes;
        } else {
            self.packets_received += 1;
            self.bytes_received += bytes;
        }
        if let Some(last) = self.last_packet_time {
            self.iat_samples.append(now - last);
        }
        self.last_packet_time = Some(now);
    }

    /// TCP sequence-based retransmit/out-of-order detection. Returns the
    /// event this step alone would produce, plus the delay-since-first-seen
    /// sample when that event is a retransmit.
    pub(crate) fn process_sequence(&mut self, seq: u32, now: f64) -> (FlowEvent, Option<f64>) {
        if let Some(first_seen) = self.seq_history.first_seen_at(seq) {
            self.retransmits += 1;
            let delay = (now - first_seen).max(0.0);
            self.rtt_samples.append(delay);
            return (FlowEvent::Retransmit, Some(delay));
        }
        let highest = self.highest_seq.unwrap_or(seq);
        if self.highest_seq.is_some() && seq < highest && !self.seq_history.contains(seq) {
            self.out_of_order += 1;
            return (FlowEvent::OutOfOrder, None);
        }
        self.seq_history.record(seq, now);
        self.highest_seq = Some(self.highest_seq.map_or(seq, |h| h.max(seq)));
        (FlowEvent::None, None)
    }

    /// Per-direction duplicate-ACK tracking.
    pub(crate) fn process_ack(&mut self, forward: bool, ack: u32) -> FlowEvent {
        if self.dup_ack.observe(forward, ack) {
            self.duplicate_acks += 1;
            FlowEvent::DuplicateAck
        } else {
            FlowEvent::None
        }
    }

    /// TCP state-machine transition driven by observed flags. `forward`
    /// indicates whether the packet travels in the flow's canonical
    /// "sent" direction.
    pub(crate) fn process_tcp_flags(
        &mut self,
        flags: crate::packet::TcpFlags,
        window: u16,
        now: f64,
    ) -> (FlowEvent, Option<f64>) {
        let mut event = FlowEvent::None;
        let mut rtt = None;
        let tcp = self.tcp.get_or_insert_with(TcpFlow::default);

        if flags.syn && !flags.ack {
            tcp.state = TcpState::SynSent;
            tcp.syn_time = Some(now);
            tcp.pending_syn = Some(now);
        } else if flags.syn && flags.ack {
            tcp.state = TcpState::SynReceived;
            tcp.syn_ack_time = Some(now);
            if let Some(syn_time) = tcp.pending_syn.take() {
                let sample = (now - syn_time).max(0.0);
                self.rtt_samples.append(sample);
                event = FlowEvent::RttSample;
                rtt = Some(sample);
            }
        } else if flags.ack
            && matches!(tcp.state, TcpState::SynSent | TcpState::SynReceived)
        {
            tcp.state = TcpState::Established;
            tcp.established_time = Some(now);
        }

        if flags.fin {
            tcp.state = TcpState::FinWait;
        }
        if flags.rst {
            tcp.state = TcpState::Closed;
        }

        if let Some(last) = tcp.last_window {
            if window < last {
                tcp.window_reductions += 1;
            }
        }
        tcp.last_window = Some(window);
        tcp.window_sizes.append(window as f64);
        if flags.ece {
            tcp.ecn_echo_count += 1;
        }

        (event, rtt)
    }
}

impl TcpFlow {
    pub fn handshake_time(&self) -> Option<f64> {
        match (self.syn_time, self.established_time) {
            (Some(s), Some(e)) => Some(e - s),
            _ => None,
        }
    }

    pub fn handshake_time_ms(&self) -> Option<f64> {
        self.handshake_time().map(|t| t * 1000.0)
    }

    pub fn avg_window_size(&self) -> f64 {
        self.window_sizes.mean()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    fn a(o: u8) -> IpAddr {
        IpAddr::V4(Ipv4Addr::new(10, 0, 0, o))
    }

    #[test]
    fn canonicalization_is_symmetric() {
        let k1 = FlowKey::canonical(a(1), 5000, a(2), 80, L4Protocol::Tcp);
        let k2 = FlowKey::canonical(a(2), 80, a(1), 5000, L4Protocol::Tcp);
        assert_eq!(k1, k2);
    }

    #[test]
    fn forward_direction_matches_first_endpoint() {
        let k = FlowKey::canonical(a(1), 5000, a(2), 80, L4Protocol::Tcp);
        assert!(k.is_forward(a(1), 5000));
        assert!(!k.is_forward(a(2), 80));
    }

    #[test]
    fn retransmit_detected_on_repeated_seq() {
        let key = FlowKey::canonical(a(1), 5000, a(2), 80, L4Protocol::Tcp);
        let mut flow = Flow::new(key, 0.0, true);
        assert_eq!(flow.process_sequence(1000, 0.0).0, FlowEvent::None);
        assert_eq!(flow.process_sequence(2000, 0.05).0, FlowEvent::None);
        let (event, rtt) = flow.process_sequence(1000, 0.15);
        assert_eq!(event, FlowEvent::Retransmit);
        assert!((rtt.unwrap() - 0.15).abs() < 1e-9);
        assert_eq!(flow.retransmits, 1);
        assert!((flow.rtt_samples.mean() - 0.15).abs() < 1e-9);
    }

    #[test]
    fn out_of_order_below_highest_not_seen() {
        let key = FlowKey::canonical(a(1), 5000, a(2), 80, L4Protocol::Tcp);
        let mut flow = Flow::new(key, 0.0, true);
        flow.process_sequence(5000, 0.0);
        assert_eq!(flow.process_sequence(4000, 0.01).0, FlowEvent::OutOfOrder);
        assert_eq!(flow.out_of_order, 1);
    }

    #[test]
    fn seq_history_prunes_when_over_cap() {
        let key = FlowKey::canonical(a(1), 5000, a(2), 80, L4Protocol::Tcp);
        let mut flow = Flow::new(key, 0.0, true);
        for i in 0..1001u32 {
            flow.process_sequence(i, i as f64);
        }
        assert!(flow.seq_history.len() <= SEQ_HISTORY_PRUNE_TO);
    }

    #[test]
    fn duplicate_ack_on_third_repeat() {
        let key = FlowKey::canonical(a(1), 5000, a(2), 80, L4Protocol::Tcp);
        let mut flow = Flow::new(key, 0.0, true);
        assert_eq!(flow.process_ack(true, 42), FlowEvent::None);
        assert_eq!(flow.process_ack(true, 42), FlowEvent::None);
        assert_eq!(flow.process_ack(true, 42), FlowEvent::DuplicateAck);
        assert_eq!(flow.duplicate_acks, 1);
    }

    #[test]
    fn jitter_requires_two_iat_samples() {
        let key = FlowKey::canonical(a(1), 5000, a(2), 80, L4Protocol::Tcp);
        let mut flow = Flow::new(key, 0.0, true);
        flow.record_direction(true, 100, 0.0);
        assert_eq!(flow.jitter(), 0.0);
        flow.record_direction(true, 100, 0.1);
        assert_eq!(flow.jitter(), 0.0); // only 1 IAT sample so far
        flow.record_direction(true, 100, 0.25);
        assert!(flow.jitter() > 0.0);
    }
}
