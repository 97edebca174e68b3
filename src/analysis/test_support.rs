//! Builders for synthetic capture files used across the crate's tests.

use std::fs;
use std::path::Path;

const MAC_A: [u8; 6] = [0x02, 0, 0, 0, 0, 0x01];
const MAC_B: [u8; 6] = [0x02, 0, 0, 0, 0, 0x02];

pub fn tcp_segment(src_port: u16, dst_port: u16, payload: &[u8]) -> Vec<u8> {
    let mut seg = Vec::with_capacity(20 + payload.len());
    seg.extend_from_slice(&src_port.to_be_bytes());
    seg.extend_from_slice(&dst_port.to_be_bytes());
    seg.extend_from_slice(&1u32.to_be_bytes()); // seq
    seg.extend_from_slice(&0u32.to_be_bytes()); // ack
    seg.push(5 << 4); // data offset
    seg.push(0x18); // PSH|ACK
    seg.extend_from_slice(&0xffffu16.to_be_bytes()); // window
    seg.extend_from_slice(&[0, 0, 0, 0]); // checksum, urgent
    seg.extend_from_slice(payload);
    seg
}

pub fn udp_datagram(src_port: u16, dst_port: u16, payload: &[u8]) -> Vec<u8> {
    let mut dgram = Vec::with_capacity(8 + payload.len());
    dgram.extend_from_slice(&src_port.to_be_bytes());
    dgram.extend_from_slice(&dst_port.to_be_bytes());
    dgram.extend_from_slice(&((8 + payload.len()) as u16).to_be_bytes());
    dgram.extend_from_slice(&[0, 0]);
    dgram.extend_from_slice(payload);
    dgram
}

pub fn ethernet_ipv4(src: [u8; 4], dst: [u8; 4], protocol: u8, transport: &[u8]) -> Vec<u8> {
    let mut frame = Vec::with_capacity(34 + transport.len());
    frame.extend_from_slice(&MAC_B);
    frame.extend_from_slice(&MAC_A);
    frame.extend_from_slice(&0x0800u16.to_be_bytes());
    frame.push(0x45);
    frame.push(0);
    frame.extend_from_slice(&((20 + transport.len()) as u16).to_be_bytes());
    frame.extend_from_slice(&[0, 1, 0x40, 0]); // id, DF
    frame.push(64);
    frame.push(protocol);
    frame.extend_from_slice(&[0, 0]);
    frame.extend_from_slice(&src);
    frame.extend_from_slice(&dst);
    frame.extend_from_slice(transport);
    frame
}

/// IPv6 frame between `2001:db8::<src>` and `2001:db8::<dst>`.
pub fn ethernet_ipv6(src: u16, dst: u16, next_header: u8, transport: &[u8]) -> Vec<u8> {
    let mut frame = Vec::with_capacity(54 + transport.len());
    frame.extend_from_slice(&MAC_B);
    frame.extend_from_slice(&MAC_A);
    frame.extend_from_slice(&0x86DDu16.to_be_bytes());
    frame.extend_from_slice(&[0x60, 0, 0, 0]);
    frame.extend_from_slice(&(transport.len() as u16).to_be_bytes());
    frame.push(next_header);
    frame.push(64);
    for last in [src, dst] {
        frame.extend_from_slice(&[0x20, 0x01, 0x0d, 0xb8]);
        frame.extend_from_slice(&[0u8; 10]);
        frame.extend_from_slice(&last.to_be_bytes());
    }
    frame.extend_from_slice(transport);
    frame
}

/// First bytes of a handshake record advertising `version`.
pub fn tls_handshake(version: u16) -> Vec<u8> {
    let mut record = vec![0x16];
    record.extend_from_slice(&version.to_be_bytes());
    record.extend_from_slice(&[0x00, 0x05, 0x01, 0x00, 0x00, 0x01, 0x00]);
    record
}

pub fn dns_message(response: bool) -> Vec<u8> {
    let mut msg = vec![0x12, 0x34];
    msg.push(if response { 0x81 } else { 0x01 });
    msg.push(0x00);
    msg.extend_from_slice(&[0, 1, 0, 0, 0, 0, 0, 0]);
    msg.extend_from_slice(b"\x07example\x03com\x00\x00\x01\x00\x01");
    msg
}

/// ICMPv6 echo request from `2001:db8::<src>` to `2001:db8::<dst>`, without
/// any link-layer header.
pub fn ipv6_icmpv6_packet(src: u16, dst: u16) -> Vec<u8> {
    ethernet_ipv6(src, dst, 58, &[128, 0, 0, 0, 0, 1, 0, 1])[14..].to_vec()
}

/// Linux cooked capture (v1) header followed by `packet`.
pub fn sll_frame(ethertype: u16, packet: &[u8]) -> Vec<u8> {
    let mut frame = Vec::with_capacity(16 + packet.len());
    frame.extend_from_slice(&0u16.to_be_bytes()); // packet type: to us
    frame.extend_from_slice(&1u16.to_be_bytes()); // ARPHRD_ETHER
    frame.extend_from_slice(&6u16.to_be_bytes());
    frame.extend_from_slice(&MAC_A);
    frame.extend_from_slice(&[0, 0]);
    frame.extend_from_slice(&ethertype.to_be_bytes());
    frame.extend_from_slice(packet);
    frame
}

/// Linux cooked capture v2 header followed by `packet`.
pub fn sll2_frame(ethertype: u16, packet: &[u8]) -> Vec<u8> {
    let mut frame = Vec::with_capacity(20 + packet.len());
    frame.extend_from_slice(&ethertype.to_be_bytes());
    frame.extend_from_slice(&[0, 0]);
    frame.extend_from_slice(&2u32.to_be_bytes()); // interface index
    frame.extend_from_slice(&1u16.to_be_bytes());
    frame.push(0);
    frame.push(6);
    frame.extend_from_slice(&MAC_A);
    frame.extend_from_slice(&[0, 0]);
    frame.extend_from_slice(packet);
    frame
}

/// BSD loopback header (address family in little-endian host order).
pub fn null_frame(family: u32, packet: &[u8]) -> Vec<u8> {
    let mut frame = family.to_le_bytes().to_vec();
    frame.extend_from_slice(packet);
    frame
}

/// Legacy pcap writer. Little-endian with microsecond timestamps unless
/// told otherwise.
pub struct PcapFileBuilder {
    linktype: u32,
    big_endian: bool,
    nanosecond: bool,
    records: Vec<(u32, u32, Vec<u8>)>,
}

impl PcapFileBuilder {
    pub fn ethernet() -> Self {
        Self::with_linktype(1)
    }

    pub fn with_linktype(linktype: u32) -> Self {
        Self {
            linktype,
            big_endian: false,
            nanosecond: false,
            records: Vec::new(),
        }
    }

    pub fn big_endian(mut self) -> Self {
        self.big_endian = true;
        self
    }

    /// Writes the nanosecond magic; the second timestamp field of each
    /// record is then read as nanoseconds.
    pub fn nanosecond(mut self) -> Self {
        self.nanosecond = true;
        self
    }

    pub fn packet(mut self, ts_sec: u32, ts_frac: u32, frame: Vec<u8>) -> Self {
        self.records.push((ts_sec, ts_frac, frame));
        self
    }

    fn u32_bytes(&self, value: u32) -> [u8; 4] {
        if self.big_endian {
            value.to_be_bytes()
        } else {
            value.to_le_bytes()
        }
    }

    fn u16_bytes(&self, value: u16) -> [u8; 2] {
        if self.big_endian {
            value.to_be_bytes()
        } else {
            value.to_le_bytes()
        }
    }

    pub fn build(&self) -> Vec<u8> {
        let magic = if self.nanosecond { 0xa1b23c4d } else { 0xa1b2c3d4 };
        let mut out = Vec::new();
        out.extend_from_slice(&self.u32_bytes(magic));
        out.extend_from_slice(&self.u16_bytes(2));
        out.extend_from_slice(&self.u16_bytes(4));
        out.extend_from_slice(&self.u32_bytes(0)); // thiszone
        out.extend_from_slice(&self.u32_bytes(0)); // sigfigs
        out.extend_from_slice(&self.u32_bytes(65535));
        out.extend_from_slice(&self.u32_bytes(self.linktype));
        for (ts_sec, ts_frac, frame) in &self.records {
            out.extend_from_slice(&self.u32_bytes(*ts_sec));
            out.extend_from_slice(&self.u32_bytes(*ts_frac));
            out.extend_from_slice(&self.u32_bytes(frame.len() as u32));
            out.extend_from_slice(&self.u32_bytes(frame.len() as u32));
            out.extend_from_slice(frame);
        }
        out
    }

    pub fn write_to(&self, path: &Path) {
        fs::write(path, self.build()).unwrap();
    }
}

/// Little-endian pcapng writer: one section, one interface with the default
/// microsecond resolution, enhanced packet blocks only.
pub struct PcapNgFileBuilder {
    linktype: u16,
    packets: Vec<(u64, Vec<u8>)>,
}

impl PcapNgFileBuilder {
    pub fn with_linktype(linktype: u16) -> Self {
        Self {
            linktype,
            packets: Vec::new(),
        }
    }

    pub fn packet(mut self, ts_micros: u64, frame: Vec<u8>) -> Self {
        self.packets.push((ts_micros, frame));
        self
    }

    pub fn build(&self) -> Vec<u8> {
        let mut out = Vec::new();
        // section header
        out.extend_from_slice(&0x0A0D_0D0Au32.to_le_bytes());
        out.extend_from_slice(&28u32.to_le_bytes());
        out.extend_from_slice(&0x1A2B_3C4Du32.to_le_bytes());
        out.extend_from_slice(&1u16.to_le_bytes());
        out.extend_from_slice(&0u16.to_le_bytes());
        out.extend_from_slice(&(-1i64).to_le_bytes());
        out.extend_from_slice(&28u32.to_le_bytes());
        // interface description
        out.extend_from_slice(&1u32.to_le_bytes());
        out.extend_from_slice(&20u32.to_le_bytes());
        out.extend_from_slice(&self.linktype.to_le_bytes());
        out.extend_from_slice(&0u16.to_le_bytes());
        out.extend_from_slice(&65535u32.to_le_bytes());
        out.extend_from_slice(&20u32.to_le_bytes());
        for (ts, frame) in &self.packets {
            let padded = (frame.len() + 3) / 4 * 4;
            let block_len = (32 + padded) as u32;
            out.extend_from_slice(&6u32.to_le_bytes());
            out.extend_from_slice(&block_len.to_le_bytes());
            out.extend_from_slice(&0u32.to_le_bytes()); // interface id
            out.extend_from_slice(&((ts >> 32) as u32).to_le_bytes());
            out.extend_from_slice(&(*ts as u32).to_le_bytes());
            out.extend_from_slice(&(frame.len() as u32).to_le_bytes());
            out.extend_from_slice(&(frame.len() as u32).to_le_bytes());
            out.extend_from_slice(frame);
            out.resize(out.len() + padded - frame.len(), 0);
            out.extend_from_slice(&block_len.to_le_bytes());
        }
        out
    }
}

/// A small mixed capture: 2 TLS1.2 handshakes, 1 DNS query, 1 DNS response,
/// 1 IPv6 UDP datagram; spanning 10 seconds.
pub fn sample_capture() -> PcapFileBuilder {
    PcapFileBuilder::ethernet()
        .packet(
            1_700_000_000,
            0,
            ethernet_ipv4([10, 0, 0, 1], [93, 184, 216, 34], 6, &tcp_segment(50000, 443, &tls_handshake(0x0303))),
        )
        .packet(
            1_700_000_002,
            500_000,
            ethernet_ipv4([10, 0, 0, 1], [93, 184, 216, 34], 6, &tcp_segment(50001, 443, &tls_handshake(0x0303))),
        )
        .packet(
            1_700_000_004,
            0,
            ethernet_ipv4([10, 0, 0, 1], [10, 0, 0, 53], 17, &udp_datagram(40000, 53, &dns_message(false))),
        )
        .packet(
            1_700_000_005,
            0,
            ethernet_ipv4([10, 0, 0, 53], [10, 0, 0, 1], 17, &udp_datagram(53, 40000, &dns_message(true))),
        )
        .packet(
            1_700_000_010,
            0,
            ethernet_ipv6(1, 2, 17, &udp_datagram(1234, 5678, b"v6")),
        )
}
