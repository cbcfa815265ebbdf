//! Parsed L3/L4 header summary — the unit of work handed from a
//! [`crate::capture::CaptureSource`] into the pipeline.

use serde::{Deserialize, Serialize};
use std::net::IpAddr;

/// Application-layer classification derived from well-known ports, not
/// payload inspection (out of scope per the Non-goals).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Protocol {
    Tcp,
    Udp,
    Icmp,
    Dns,
    Http,
    Https,
    Other,
}

impl Protocol {
    /// Classify a transport-layer protocol plus destination/source port
    /// into the richer application tag used for histograms.
    pub fn classify(l4: L4Protocol, src_port: Option<u16>, dst_port: Option<u16>) -> Self {
        match l4 {
            L4Protocol::Icmp => return Protocol::Icmp,
            L4Protocol::Other => return Protocol::Other,
            L4Protocol::Tcp | L4Protocol::Udp => {}
        }
        let port = dst_port.or(src_port);
        match (l4, port) {
            (L4Protocol::Udp, Some(53)) => Protocol::Dns,
            (L4Protocol::Tcp, Some(53)) => Protocol::Dns,
            (L4Protocol::Tcp, Some(80)) => Protocol::Http,
            (L4Protocol::Tcp, Some(443)) => Protocol::Https,
            (L4Protocol::Tcp, _) => Protocol::Tcp,
            (L4Protocol::Udp, _) => Protocol::Udp,
            _ => Protocol::Other,
        }
    }
}

/// The raw transport-layer protocol, independent of port-based
/// classification. Used for flow-key canonicalization (`FlowKey` only
/// cares about TCP vs UDP vs "other").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum L4Protocol {
    Tcp,
    Udp,
    Icmp,
    Other,
}

/// Decoded TCP flag byte: FIN, SYN, RST, PSH, ACK, URG, ECE, CWR.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TcpFlags {
    pub fin: bool,
    pub syn: bool,
    pub rst: bool,
    pub psh: bool,
    pub ack: bool,
    pub urg: bool,
    pub ece: bool,
    pub cwr: bool,
}

impl TcpFlags {
    pub fn from_byte(b: u8) -> Self {
        Self {
            fin: b & 0x01 != 0,
            syn: b & 0x02 != 0,
            rst: b & 0x04 != 0,
            psh: b & 0x08 != 0,
            ack: b & 0x10 != 0,
            urg: b & 0x20 != 0,
            ece: b & 0x40 != 0,
            cwr: b & 0x80 != 0,
        }
    }

    pub fn to_byte(self) -> u8 {
        (self.fin as u8)
            | (self.syn as u8) << 1
            | (self.rst as u8) << 2
            | (self.psh as u8) << 3
            | (self.ack as u8) << 4
            | (self.urg as u8) << 5
            | (self.ece as u8) << 6
            | (self.cwr as u8) << 7
    }
}

/// An immutable, parsed packet record. Derived fields (`is_retransmit`,
/// `rtt`) start unset and are filled in by the pipeline as it classifies
/// the packet through `FlowTracker::process`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PacketRecord {
    /// Monotonic seconds, fractional, stamped by the capture source.
    pub timestamp: f64,
    pub interface: String,
    pub src_ip: IpAddr,
    pub dst_ip: IpAddr,
    pub src_port: Option<u16>,
    pub dst_port: Option<u16>,
    pub l4_protocol: L4Protocol,
    pub protocol: Protocol,
    pub length: usize,
    pub ttl: u8,
    /// Present only for TCP packets.
    pub tcp_flags: Option<TcpFlags>,
    pub seq: Option<u32>,
    pub ack: Option<u32>,
    pub window: Option<u16>,
    /// Set by the pipeline once `FlowTracker::process` classifies the
    /// packet as a retransmission.
    pub is_retransmit: bool,
    /// Set by the pipeline when this packet yielded an RTT sample
    /// (SYN/SYN-ACK timing, or a retransmit-delay proxy), in seconds.
    pub rtt: Option<f64>,
}

impl PacketRecord {
    pub fn new(
        timestamp: f64,
        interface: impl Into<String>,
        src_ip: IpAddr,
        dst_ip: IpAddr,
        l4_protocol: L4Protocol,
        length: usize,
        ttl: u8,
    ) -> Self {
        let protocol = Protocol::classify(l4_protocol, None, None);
        Self {
            timestamp,
            interface: interface.into(),
            src_ip,
            dst_ip,
            src_port: None,
            dst_port: None,
            l4_protocol,
            protocol,
            length,
            ttl,
            tcp_flags: None,
            seq: None,
            ack: None,
            window: None,
            is_retransmit: false,
            rtt: None,
        }
    }

    pub fn with_ports(mut self, src_port: u16, dst_port: u16) -> Self {
        self.src_port = Some(src_port);
        self.dst_port = Some(dst_port);
        self.protocol = Protocol::classify(self.l4_protocol, Some(src_port), Some(dst_port));
        self
    }

    pub fn with_tcp(mut self, flags: TcpFlags, seq: u32, ack: u32, window: u16) -> Self {
        self.tcp_flags = Some(flags);
        self.seq = Some(seq);
        self.ack = Some(ack);
        self.window = Some(window);
        self
    }

    pub fn tcp_flags(&self) -> Option<TcpFlags> {
        self.tcp_flags
    }

    pub fn is_tcp(&self) -> bool {
        matches!(self.l4_protocol, L4Protocol::Tcp)
    }

    pub fn is_udp(&self) -> bool {
        matches!(self.l4_protocol, L4Protocol::Udp)
    }

    pub fn is_icmp(&self) -> bool {
        matches!(self.l4_protocol, L4Protocol::Icmp)
    }
}
