//! Minimal layer decoder for captured frames.
//!
//! Only the fields the analyzer aggregates are decoded: network addresses,
//! transport ports and the transport payload. Truncated or malformed headers
//! stop decoding at the last complete layer instead of failing the frame.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

const ETHERTYPE_IPV4: u16 = 0x0800;
const ETHERTYPE_IPV6: u16 = 0x86DD;
const ETHERTYPE_VLAN: u16 = 0x8100;
const ETHERTYPE_QINQ: u16 = 0x88A8;

const IP_PROTO_ICMP: u8 = 1;
const IP_PROTO_TCP: u8 = 6;
const IP_PROTO_UDP: u8 = 17;
const IP_PROTO_ICMPV6: u8 = 58;

/// Link-layer framing of the records in a capture.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkType {
    Ethernet,
    /// BSD loopback: 4-byte address family in host byte order.
    Null,
    /// Raw IP, version taken from the first nibble.
    Raw,
    Ipv4,
    Ipv6,
    LinuxSll,
    LinuxSll2,
}

impl LinkType {
    pub fn from_raw(linktype: i32) -> Option<Self> {
        match linktype {
            0 | 108 => Some(LinkType::Null),
            1 => Some(LinkType::Ethernet),
            12 | 14 | 101 => Some(LinkType::Raw),
            113 => Some(LinkType::LinuxSll),
            228 => Some(LinkType::Ipv4),
            229 => Some(LinkType::Ipv6),
            276 => Some(LinkType::LinuxSll2),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkLayer {
    V4 { src: Ipv4Addr, dst: Ipv4Addr },
    V6 { src: Ipv6Addr, dst: Ipv6Addr },
}

impl NetworkLayer {
    pub fn src(&self) -> IpAddr {
        match self {
            NetworkLayer::V4 { src, .. } => IpAddr::V4(*src),
            NetworkLayer::V6 { src, .. } => IpAddr::V6(*src),
        }
    }

    pub fn dst(&self) -> IpAddr {
        match self {
            NetworkLayer::V4 { dst, .. } => IpAddr::V4(*dst),
            NetworkLayer::V6 { dst, .. } => IpAddr::V6(*dst),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportLayer<'a> {
    Tcp {
        src_port: u16,
        dst_port: u16,
        payload: &'a [u8],
    },
    Udp {
        src_port: u16,
        dst_port: u16,
        payload: &'a [u8],
    },
    Icmp,
    Icmpv6,
}

/// Layers recovered from one frame.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DecodedPacket<'a> {
    pub network: Option<NetworkLayer>,
    pub transport: Option<TransportLayer<'a>>,
}

pub fn decode(linktype: LinkType, frame: &[u8]) -> DecodedPacket<'_> {
    match linktype {
        LinkType::Ethernet => decode_ethernet(frame),
        LinkType::Null => {
            if frame.len() < 4 {
                return DecodedPacket::default();
            }
            decode_ip(&frame[4..])
        }
        LinkType::Raw => decode_ip(frame),
        LinkType::Ipv4 => decode_ipv4(frame),
        LinkType::Ipv6 => decode_ipv6(frame),
        LinkType::LinuxSll => {
            if frame.len() < 16 {
                return DecodedPacket::default();
            }
            let proto = u16::from_be_bytes([frame[14], frame[15]]);
            decode_ethertype(proto, &frame[16..])
        }
        LinkType::LinuxSll2 => {
            if frame.len() < 20 {
                return DecodedPacket::default();
            }
            let proto = u16::from_be_bytes([frame[0], frame[1]]);
            decode_ethertype(proto, &frame[20..])
        }
    }
}

fn decode_ethernet(frame: &[u8]) -> DecodedPacket<'_> {
    if frame.len() < 14 {
        return DecodedPacket::default();
    }
    let mut ethertype = u16::from_be_bytes([frame[12], frame[13]]);
    let mut offset = 14;
    // stacked 802.1Q / 802.1ad tags
    while ethertype == ETHERTYPE_VLAN || ethertype == ETHERTYPE_QINQ {
        if frame.len() < offset + 4 {
            return DecodedPacket::default();
        }
        ethertype = u16::from_be_bytes([frame[offset + 2], frame[offset + 3]]);
        offset += 4;
    }
    decode_ethertype(ethertype, &frame[offset..])
}

fn decode_ethertype(ethertype: u16, data: &[u8]) -> DecodedPacket<'_> {
    match ethertype {
        ETHERTYPE_IPV4 => decode_ipv4(data),
        ETHERTYPE_IPV6 => decode_ipv6(data),
        _ => DecodedPacket::default(),
    }
}

fn decode_ip(data: &[u8]) -> DecodedPacket<'_> {
    match data.first().map(|b| b >> 4) {
        Some(4) => decode_ipv4(data),
        Some(6) => decode_ipv6(data),
        _ => DecodedPacket::default(),
    }
}

fn decode_ipv4(data: &[u8]) -> DecodedPacket<'_> {
    if data.len() < 20 || data[0] >> 4 != 4 {
        return DecodedPacket::default();
    }
    let ihl = usize::from(data[0] & 0x0f) * 4;
    if ihl < 20 || data.len() < ihl {
        return DecodedPacket::default();
    }
    let src = Ipv4Addr::new(data[12], data[13], data[14], data[15]);
    let dst = Ipv4Addr::new(data[16], data[17], data[18], data[19]);
    let network = Some(NetworkLayer::V4 { src, dst });

    // Ethernet padding follows the datagram; trust total length when sane.
    let total_len = usize::from(u16::from_be_bytes([data[2], data[3]]));
    let end = if total_len >= ihl && total_len <= data.len() {
        total_len
    } else {
        data.len()
    };
    let fragment_offset = u16::from_be_bytes([data[6], data[7]]) & 0x1fff;
    let transport = if fragment_offset == 0 {
        decode_transport(data[9], &data[ihl..end])
    } else {
        None
    };
    DecodedPacket { network, transport }
}

fn decode_ipv6(data: &[u8]) -> DecodedPacket<'_> {
    if data.len() < 40 || data[0] >> 4 != 6 {
        return DecodedPacket::default();
    }
    let mut src = [0u8; 16];
    let mut dst = [0u8; 16];
    src.copy_from_slice(&data[8..24]);
    dst.copy_from_slice(&data[24..40]);
    let network = Some(NetworkLayer::V6 {
        src: Ipv6Addr::from(src),
        dst: Ipv6Addr::from(dst),
    });

    let payload_len = usize::from(u16::from_be_bytes([data[4], data[5]]));
    let end = if payload_len > 0 && 40 + payload_len <= data.len() {
        40 + payload_len
    } else {
        data.len()
    };
    let mut next_header = data[6];
    let mut offset = 40;
    loop {
        match next_header {
            // hop-by-hop, routing, destination options
            0 | 43 | 60 => {
                if end < offset + 8 {
                    return DecodedPacket { network, transport: None };
                }
                next_header = data[offset];
                offset += (usize::from(data[offset + 1]) + 1) * 8;
            }
            // fragment header: only the first fragment carries the transport header
            44 => {
                if end < offset + 8 {
                    return DecodedPacket { network, transport: None };
                }
                let frag = u16::from_be_bytes([data[offset + 2], data[offset + 3]]) >> 3;
                if frag != 0 {
                    return DecodedPacket { network, transport: None };
                }
                next_header = data[offset];
                offset += 8;
            }
            // authentication header
            51 => {
                if end < offset + 8 {
                    return DecodedPacket { network, transport: None };
                }
                next_header = data[offset];
                offset += (usize::from(data[offset + 1]) + 2) * 4;
            }
            _ => break,
        }
        if offset > end {
            return DecodedPacket { network, transport: None };
        }
    }
    DecodedPacket {
        network,
        transport: decode_transport(next_header, &data[offset..end]),
    }
}

fn decode_transport(protocol: u8, data: &[u8]) -> Option<TransportLayer<'_>> {
    match protocol {
        IP_PROTO_TCP => {
            if data.len() < 20 {
                return None;
            }
            let header_len = usize::from(data[12] >> 4) * 4;
            if header_len < 20 || data.len() < header_len {
                return None;
            }
            Some(TransportLayer::Tcp {
                src_port: u16::from_be_bytes([data[0], data[1]]),
                dst_port: u16::from_be_bytes([data[2], data[3]]),
                payload: &data[header_len..],
            })
        }
        IP_PROTO_UDP => {
            if data.len() < 8 {
                return None;
            }
            let udp_len = usize::from(u16::from_be_bytes([data[4], data[5]]));
            let end = if udp_len >= 8 && udp_len <= data.len() {
                udp_len
            } else {
                data.len()
            };
            Some(TransportLayer::Udp {
                src_port: u16::from_be_bytes([data[0], data[1]]),
                dst_port: u16::from_be_bytes([data[2], data[3]]),
                payload: &data[8..end],
            })
        }
        IP_PROTO_ICMP => Some(TransportLayer::Icmp),
        IP_PROTO_ICMPV6 => Some(TransportLayer::Icmpv6),
        _ => None,
    }
}

/// True when a UDP payload carries a DNS message with the QR bit clear.
pub fn is_dns_query(payload: &[u8]) -> bool {
    payload.len() >= 12 && payload[2] & 0x80 == 0
}
