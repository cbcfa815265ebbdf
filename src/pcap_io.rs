//! PCAP save/load and CSV export — an outer-surface convenience, not part
//! of the library's core contract.
//!
//! Global/packet header layout follows the classic PCAP format (magic
//! `0xa1b2c3d4`, swapped/nanosecond magic variants accepted on read).
//! Since `PacketRecord` carries parsed fields rather than a raw
//! link-layer frame, each "packet" body here is this crate's own
//! fixed-layout record encoding, not a real Ethernet frame — these files
//! are meant to be read back by `load_pcap`, not by Wireshark.

use crate::error::{NetdiagError, Result};
use crate::flow::Flow;
use crate::packet::{L4Protocol, PacketRecord, Protocol, TcpFlags};
use std::fs::File;
use std::io::{BufWriter, Read, Write};
use std::net::IpAddr;
use std::path::Path;

const PCAP_MAGIC: u32 = 0xa1b2c3d4;
const PCAP_VERSION_MAJOR: u16 = 2;
const PCAP_VERSION_MINOR: u16 = 4;
const PCAP_THISZONE: i32 = 0;
const PCAP_SIGFIGS: u32 = 0;
const PCAP_SNAPLEN: u32 = 65535;
const PCAP_LINKTYPE_RAW_RECORD: u32 = 147; // LINKTYPE_USER0: private record encoding.

pub struct PcapHandler;

impl PcapHandler {
    pub fn save_pcap(records: &[PacketRecord], path: &Path) -> Result<usize> {
        let file = File::create(path)?;
        let mut writer = BufWriter::new(file);
        Self::write_global_header(&mut writer)?;
        let mut count = 0;
        for record in records {
            let body = encode_record(record);
            Self::write_packet_header(&mut writer, record.timestamp, body.len())?;
            writer.write_all(&body)?;
            count += 1;
        }
        writer.flush()?;
        Ok(count)
    }

    pub fn load_pcap(path: &Path) -> Result<Vec<PacketRecord>> {
        let mut file = File::open(path)?;
        let mut buffer = Vec::new();
        file.read_to_end(&mut buffer)?;
        Self::load_pcap_from_bytes(&buffer)
    }

    pub fn save_pcap_to_bytes(records: &[PacketRecord]) -> Result<Vec<u8>> {
        let mut buffer = Vec::new();
        Self::write_global_header(&mut buffer)?;
        for record in records {
            let body = encode_record(record);
            Self::write_packet_header(&mut buffer, record.timestamp, body.len())?;
            buffer.extend_from_slice(&body);
        }
        Ok(buffer)
    }

    pub fn load_pcap_from_bytes(buffer: &[u8]) -> Result<Vec<PacketRecord>> {
        if buffer.len() < 24 {
            return Err(NetdiagError::MalformedPcap("file too short".into()));
        }
        let magic = u32::from_le_bytes([buffer[0], buffer[1], buffer[2], buffer[3]]);
        let (is_swapped, is_nano) = match magic {
            0xa1b2c3d4 => (false, false),
            0xd4c3b2a1 => (true, false),
            0xa1b23c4d => (false, true),
            0x4d3cb2a1 => (true, true),
            other => {
                return Err(NetdiagError::MalformedPcap(format!(
                    "unrecognized pcap magic 0x{other:08X}"
                )))
            }
        };

        let mut offset = 24;
        let mut records = Vec::new();
        while offset + 16 <= buffer.len() {
            let read_u32 = |o: usize| {
                let b = [buffer[o], buffer[o + 1], buffer[o + 2], buffer[o + 3]];
                if is_swapped {
                    u32::from_be_bytes(b)
                } else {
                    u32::from_le_bytes(b)
                }
            };
            let ts_sec = read_u32(offset);
            let ts_sub = read_u32(offset + 4);
            let incl_len = read_u32(offset + 8) as usize;
            offset += 16;

            if offset + incl_len > buffer.len() {
                break;
            }
            let body = &buffer[offset..offset + incl_len];
            offset += incl_len;

            let frac = if is_nano {
                ts_sub as f64 / 1e9
            } else {
                ts_sub as f64 / 1e6
            };
            let timestamp = ts_sec as f64 + frac;

            if let Some(record) = decode_record(timestamp, body) {
                records.push(record);
            }
        }
        Ok(records)
    }

    fn write_global_header<W: Write>(w: &mut W) -> Result<()> {
        w.write_all(&PCAP_MAGIC.to_le_bytes())?;
        w.write_all(&PCAP_VERSION_MAJOR.to_le_bytes())?;
        w.write_all(&PCAP_VERSION_MINOR.to_le_bytes())?;
        w.write_all(&PCAP_THISZONE.to_le_bytes())?;
        w.write_all(&PCAP_SIGFIGS.to_le_bytes())?;
        w.write_all(&PCAP_SNAPLEN.to_le_bytes())?;
        w.write_all(&PCAP_LINKTYPE_RAW_RECORD.to_le_bytes())?;
        Ok(())
    }

    fn write_packet_header<W: Write>(w: &mut W, timestamp: f64, body_len: usize) -> Result<()> {
        let ts_sec = timestamp.trunc() as u32;
        let ts_usec = (timestamp.fract() * 1e6) as u32;
        let len = body_len as u32;
        w.write_all(&ts_sec.to_le_bytes())?;
        w.write_all(&ts_usec.to_le_bytes())?;
        w.write_all(&len.to_le_bytes())?;
        w.write_all(&len.to_le_bytes())?; // orig_len == incl_len, no truncation
        Ok(())
    }
}

/// Fixed-layout encoding of the fields `FlowTracker`/`InterfaceMetrics`
/// actually consume: 1 byte protocol tag, 1 byte l4 tag, 1 byte ttl,
/// 4-byte length, 2+2 byte ports, 4+4 byte seq/ack, 2 byte window, 1 byte
/// tcp-flags, then 17 bytes of address (1 byte v4/v6 tag + 16 bytes).
fn encode_record(r: &PacketRecord) -> Vec<u8> {
    let mut buf = Vec::with_capacity(64);
    buf.push(protocol_tag(r.protocol));
    buf.push(l4_tag(r.l4_protocol));
    buf.push(r.ttl);
    buf.extend_from_slice(&(r.length as u32).to_le_bytes());
    buf.extend_from_slice(&r.src_port.unwrap_or(0).to_le_bytes());
    buf.extend_from_slice(&r.dst_port.unwrap_or(0).to_le_bytes());
    buf.extend_from_slice(&r.seq.unwrap_or(0).to_le_bytes());
    buf.extend_from_slice(&r.ack.unwrap_or(0).to_le_bytes());
    buf.extend_from_slice(&r.window.unwrap_or(0).to_le_bytes());
    buf.push(r.tcp_flags.map(|f| f.to_byte()).unwrap_or(0));
    encode_addr(r.src_ip, &mut buf);
    encode_addr(r.dst_ip, &mut buf);
    buf
}

fn decode_record(timestamp: f64, body: &[u8]) -> Option<PacketRecord> {
    if body.len() < 21 {
        return None;
    }
    let protocol = protocol_from_tag(body[0]);
    let l4 = l4_from_tag(body[1]);
    let ttl = body[2];
    let length = u32::from_le_bytes(body[3..7].try_into().ok()?) as usize;
    let src_port = u16::from_le_bytes(body[7..9].try_into().ok()?);
    let dst_port = u16::from_le_bytes(body[9..11].try_into().ok()?);
    let seq = u32::from_le_bytes(body[11..15].try_into().ok()?);
    let ack = u32::from_le_bytes(body[15..19].try_into().ok()?);
    let window = u16::from_le_bytes(body[19..21].try_into().ok()?);
    let flags_byte = *body.get(21)?;
    let mut offset = 22;
    let src_ip = decode_addr(body, &mut offset)?;
    let dst_ip = decode_addr(body, &mut offset)?;

    let mut record = PacketRecord::new(timestamp, "pcap", src_ip, dst_ip, l4, length, ttl);
    record.protocol = protocol;
    if matches!(l4, L4Protocol::Tcp | L4Protocol::Udp) {
        record = record.with_ports(src_port, dst_port);
        record.protocol = protocol;
    }
    if matches!(l4, L4Protocol::Tcp) {
        record = record.with_tcp(TcpFlags::from_byte(flags_byte), seq, ack, window);
    }
    Some(record)
}

fn encode_addr(addr: IpAddr, buf: &mut Vec<u8>) {
    match addr {
        IpAddr::V4(v4) => {
            buf.push(4);
            buf.extend_from_slice(&v4.octets());
            buf.extend_from_slice(&[0u8; 12]);
        }
        IpAddr::V6(v6) => {
            buf.push(6);
            buf.extend_from_slice(&v6.octets());
        }
    }
}

fn decode_addr(body: &[u8], offset: &mut usize) -> Option<IpAddr> {
    let tag = *body.get(*offset)?;
    let start = *offset + 1;
    *offset += 17;
    match tag {
        4 => {
            let bytes: [u8; 4] = body.get(start..start + 4)?.try_into().ok()?;
            Some(IpAddr::V4(std::net::Ipv4Addr::from(bytes)))
        }
        6 => {
            let bytes: [u8; 16] = body.get(start..start + 16)?.try_into().ok()?;
            Some(IpAddr::V6(std::net::Ipv6Addr::from(bytes)))
        }
        _ => None,
    }
}

fn protocol_tag(p: Protocol) -> u8 {
    match p {
        Protocol::Tcp => 0,
        Protocol::Udp => 1,
        Protocol::Icmp => 2,
        Protocol::Dns => 3,
        Protocol::Http => 4,
        Protocol::Https => 5,
        Protocol::Other => 6,
    }
}

fn protocol_from_tag(b: u8) -> Protocol {
    match b {
        0 => Protocol::Tcp,
        1 => Protocol::Udp,
        2 => Protocol::Icmp,
        3 => Protocol::Dns,
        4 => Protocol::Http,
        5 => Protocol::Https,
        _ => Protocol::Other,
    }
}

fn l4_tag(p: L4Protocol) -> u8 {
    match p {
        L4Protocol::Tcp => 0,
        L4Protocol::Udp => 1,
        L4Protocol::Icmp => 2,
        L4Protocol::Other => 3,
    }
}

fn l4_from_tag(b: u8) -> L4Protocol {
    match b {
        0 => L4Protocol::Tcp,
        1 => L4Protocol::Udp,
        2 => L4Protocol::Icmp,
        _ => L4Protocol::Other,
    }
}

/// CSV export of flow projections, CLI-only convenience (not part of the
/// library's public contract surface).
pub fn flows_to_csv(flows: &[Flow], path: &Path) -> Result<usize> {
    let mut file = File::create(path)?;
    writeln!(
        file,
        "flow_key,start_time,last_seen,packets_sent,packets_received,bytes_sent,bytes_received,retransmits,out_of_order,duplicate_acks,avg_rtt_ms,jitter_ms"
    )?;
    for flow in flows {
        writeln!(
            file,
            "{},{},{},{},{},{},{},{},{},{},{:.3},{:.3}",
            flow.key,
            flow.start_time,
            flow.last_seen,
            flow.packets_sent,
            flow.packets_received,
            flow.bytes_sent,
            flow.bytes_received,
            flow.retransmits,
            flow.out_of_order,
            flow.duplicate_acks,
            flow.avg_rtt_ms(),
            flow.jitter_ms(),
        )?;
    }
    Ok(flows.len())
}
