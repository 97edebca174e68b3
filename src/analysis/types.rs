//! Statistics produced by the capture analyzer.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Number of entries reporting collaborators show for "top" maps by default.
pub const DEFAULT_TOP_LIMIT: usize = 10;

/// Frequency map keyed by address, port or protocol label.
pub type Frequency<K> = BTreeMap<K, u64>;

/// Protocol layers counted in the protocol distribution.
///
/// One packet may be counted under several layers: an IPv4/TCP segment
/// increments both `IPv4` and `TCP`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ProtocolLayer {
    IPv4,
    IPv6,
    TCP,
    UDP,
    ICMP,
    ICMPv6,
}

impl ProtocolLayer {
    pub fn as_str(self) -> &'static str {
        match self {
            ProtocolLayer::IPv4 => "IPv4",
            ProtocolLayer::IPv6 => "IPv6",
            ProtocolLayer::TCP => "TCP",
            ProtocolLayer::UDP => "UDP",
            ProtocolLayer::ICMP => "ICMP",
            ProtocolLayer::ICMPv6 => "ICMPv6",
        }
    }
}

impl fmt::Display for ProtocolLayer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// TLS record version seen in the first bytes of a TCP/443 payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TlsVersion {
    Tls10,
    Tls11,
    Tls12,
    Tls13,
    Unknown,
}

impl TlsVersion {
    /// Classifies an application payload.
    ///
    /// Only a handshake record (`0x16`) with a full 5-byte record header is
    /// classified; anything else, including an empty payload, is `Unknown`.
    pub fn classify(payload: &[u8]) -> Self {
        if payload.len() < 5 || payload[0] != 0x16 {
            return TlsVersion::Unknown;
        }
        match u16::from_be_bytes([payload[1], payload[2]]) {
            0x0301 => TlsVersion::Tls10,
            0x0302 => TlsVersion::Tls11,
            0x0303 => TlsVersion::Tls12,
            0x0304 => TlsVersion::Tls13,
            _ => TlsVersion::Unknown,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TlsVersion::Tls10 => "TLS1.0",
            TlsVersion::Tls11 => "TLS1.1",
            TlsVersion::Tls12 => "TLS1.2",
            TlsVersion::Tls13 => "TLS1.3",
            TlsVersion::Unknown => "Unknown",
        }
    }
}

/// Aggregate statistics for one capture file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AnalysisReport {
    pub packet_count: u64,
    pub total_bytes: u64,
    pub protocol_distribution: Frequency<String>,
    pub top_src_ips: Frequency<String>,
    pub top_dst_ips: Frequency<String>,
    pub top_tcp_src_ports: Frequency<u16>,
    pub top_tcp_dst_ports: Frequency<u16>,
    pub top_udp_src_ports: Frequency<u16>,
    pub top_udp_dst_ports: Frequency<u16>,
    pub tls_versions: Frequency<String>,
    pub dns_queries: u64,
    pub packet_rate: f64,
    pub avg_packet_size: f64,
    pub duration_seconds: i64,
    pub first_packet_time: Option<DateTime<Utc>>,
    pub last_packet_time: Option<DateTime<Utc>>,
}

/// Returns the `limit` most frequent entries, highest count first, ties by key.
pub fn top_n<K: Ord + Clone>(map: &Frequency<K>, limit: usize) -> Vec<(K, u64)> {
    let mut entries: Vec<(K, u64)> = map.iter().map(|(k, v)| (k.clone(), *v)).collect();
    entries.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    entries.truncate(limit);
    entries
}
