//! Streaming statistics over a capture file.
//!
//! The file is read once, record by record, through `pcap-parser`; no record
//! is retained after it has been folded into the running totals. Both legacy
//! pcap and pcapng are accepted, and gzip-compressed input is detected by its
//! magic bytes and decoded on the fly.

use std::fs::File;
use std::io::{BufRead, BufReader, Read};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use flate2::read::MultiGzDecoder;
use log::{debug, trace, warn};
use pcap_parser::{create_reader, Block, PcapBlockOwned, PcapError};

use super::dissector::{self, DecodedPacket, LinkType, TransportLayer};
use super::types::{AnalysisReport, Frequency, ProtocolLayer, TlsVersion};
use crate::error_handling::types::AnalysisError;

const READ_BUFFER_CAPACITY: usize = 1 << 20;
const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];
const HTTPS_PORT: u16 = 443;
const DNS_PORT: u16 = 53;

/// Analyzes the capture at `path`.
///
/// Any open or parse failure aborts the whole analysis; partial statistics
/// are never returned.
pub fn analyze_file(path: &Path) -> Result<AnalysisReport, AnalysisError> {
    debug!("Analyzing capture {}", path.display());
    let file = File::open(path).map_err(AnalysisError::OpenFailed)?;
    let mut reader = BufReader::new(file);
    let compressed = reader
        .fill_buf()
        .map_err(AnalysisError::ReadFailed)?
        .starts_with(&GZIP_MAGIC);
    let report = if compressed {
        debug!("{} is gzip-compressed", path.display());
        analyze_reader(MultiGzDecoder::new(reader))?
    } else {
        analyze_reader(reader)?
    };
    debug!(
        "Analyzed {}: packets={}, bytes={}, duration={}s",
        path.display(),
        report.packet_count,
        report.total_bytes,
        report.duration_seconds
    );
    Ok(report)
}

/// Analyzes an uncompressed pcap or pcapng stream.
pub fn analyze_reader<R: Read + Send>(input: R) -> Result<AnalysisReport, AnalysisError> {
    let exhausted = Arc::new(AtomicBool::new(false));
    let tracked = ExhaustionTracker {
        inner: input,
        exhausted: Arc::clone(&exhausted),
    };
    let mut reader = create_reader(READ_BUFFER_CAPACITY, tracked)
        .map_err(|e| AnalysisError::ParseFailed(format!("{:?}", e)))?;

    let mut stats = StatsAccumulator::default();
    let mut legacy = LegacyFormat::default();
    let mut interfaces: Vec<Interface> = Vec::new();

    loop {
        match reader.next() {
            Ok((offset, block)) => {
                match block {
                    PcapBlockOwned::LegacyHeader(header) => {
                        legacy.linktype = LinkType::from_raw(header.network.0);
                        legacy.nanosecond = header.is_nanosecond_precision();
                        if legacy.linktype.is_none() {
                            warn!(
                                "Link type {} not decoded; only packet totals are counted",
                                header.network.0
                            );
                        }
                    }
                    PcapBlockOwned::Legacy(record) => {
                        let subsec_nanos = if legacy.nanosecond {
                            record.ts_usec
                        } else {
                            record.ts_usec.saturating_mul(1_000)
                        };
                        let ts = DateTime::from_timestamp(i64::from(record.ts_sec), subsec_nanos);
                        let frame = truncate(record.data, record.caplen);
                        stats.record(ts, frame.len(), legacy.linktype, frame);
                    }
                    PcapBlockOwned::NG(Block::SectionHeader(_)) => {
                        interfaces.clear();
                    }
                    PcapBlockOwned::NG(Block::InterfaceDescription(idb)) => {
                        let linktype = LinkType::from_raw(idb.linktype.0);
                        if linktype.is_none() {
                            warn!(
                                "Link type {} not decoded; only packet totals are counted",
                                idb.linktype.0
                            );
                        }
                        interfaces.push(Interface {
                            linktype,
                            ticks_per_second: ticks_per_second(idb.if_tsresol),
                            offset_seconds: idb.if_tsoffset,
                        });
                    }
                    PcapBlockOwned::NG(Block::EnhancedPacket(epb)) => {
                        let iface = interfaces.get(epb.if_id as usize).copied();
                        let ts = iface.and_then(|i| {
                            let raw = (u64::from(epb.ts_high) << 32) | u64::from(epb.ts_low);
                            i.timestamp(raw)
                        });
                        let frame = truncate(epb.data, epb.caplen);
                        stats.record(ts, frame.len(), iface.and_then(|i| i.linktype), frame);
                    }
                    PcapBlockOwned::NG(Block::SimplePacket(spb)) => {
                        let linktype = interfaces.first().and_then(|i| i.linktype);
                        stats.record(None, spb.data.len(), linktype, spb.data);
                    }
                    PcapBlockOwned::NG(_) => {}
                }
                reader.consume(offset);
            }
            Err(PcapError::Eof) => break,
            Err(PcapError::Incomplete(_)) => {
                if exhausted.load(Ordering::Relaxed) {
                    debug!("Reached end of capture data");
                    break;
                }
                reader
                    .refill()
                    .map_err(|e| AnalysisError::ParseFailed(format!("refill error: {:?}", e)))?;
            }
            Err(e) => return Err(AnalysisError::ParseFailed(format!("{:?}", e))),
        }
    }

    Ok(stats.finish())
}

fn truncate(data: &[u8], caplen: u32) -> &[u8] {
    let len = (caplen as usize).min(data.len());
    &data[..len]
}

/// Ticks per second for a pcapng `if_tsresol` value (default microseconds).
fn ticks_per_second(if_tsresol: u8) -> u64 {
    let exponent = u32::from(if_tsresol & 0x7f);
    let ticks = if if_tsresol & 0x80 == 0 {
        10u64.checked_pow(exponent)
    } else {
        1u64.checked_shl(exponent)
    };
    match ticks {
        Some(t) if t > 0 => t,
        _ => 1_000_000,
    }
}

#[derive(Debug, Default)]
struct LegacyFormat {
    linktype: Option<LinkType>,
    nanosecond: bool,
}

#[derive(Debug, Clone, Copy)]
struct Interface {
    linktype: Option<LinkType>,
    ticks_per_second: u64,
    offset_seconds: i64,
}

impl Interface {
    fn timestamp(&self, raw: u64) -> Option<DateTime<Utc>> {
        let secs = i64::try_from(raw / self.ticks_per_second).ok()?;
        let rem = raw % self.ticks_per_second;
        let nanos = (u128::from(rem) * 1_000_000_000 / u128::from(self.ticks_per_second)) as u32;
        DateTime::from_timestamp(secs.checked_add(self.offset_seconds)?, nanos)
    }
}

/// Flags when the wrapped reader has reported end of input, so a trailing
/// partial record can be told apart from a buffer that merely needs a refill.
struct ExhaustionTracker<R> {
    inner: R,
    exhausted: Arc<AtomicBool>,
}

impl<R: Read> Read for ExhaustionTracker<R> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let n = self.inner.read(buf)?;
        if n == 0 && !buf.is_empty() {
            self.exhausted.store(true, Ordering::Relaxed);
        }
        Ok(n)
    }
}

/// Running totals folded from each record.
#[derive(Debug, Default)]
struct StatsAccumulator {
    packet_count: u64,
    total_bytes: u64,
    first: Option<DateTime<Utc>>,
    last: Option<DateTime<Utc>>,
    protocols: Frequency<String>,
    src_ips: Frequency<String>,
    dst_ips: Frequency<String>,
    tcp_src_ports: Frequency<u16>,
    tcp_dst_ports: Frequency<u16>,
    udp_src_ports: Frequency<u16>,
    udp_dst_ports: Frequency<u16>,
    tls_versions: Frequency<String>,
    dns_queries: u64,
}

impl StatsAccumulator {
    fn record(
        &mut self,
        ts: Option<DateTime<Utc>>,
        captured_len: usize,
        linktype: Option<LinkType>,
        frame: &[u8],
    ) {
        self.packet_count += 1;
        self.total_bytes += captured_len as u64;
        if let Some(ts) = ts {
            if self.first.is_none() {
                self.first = Some(ts);
            }
            self.last = Some(ts);
        }

        let Some(linktype) = linktype else {
            return;
        };
        let decoded = dissector::decode(linktype, frame);
        trace!("record {}: {:?}", self.packet_count, decoded);
        self.fold(decoded);
    }

    fn fold(&mut self, decoded: DecodedPacket<'_>) {
        if let Some(network) = decoded.network {
            let layer = match network {
                dissector::NetworkLayer::V4 { .. } => ProtocolLayer::IPv4,
                dissector::NetworkLayer::V6 { .. } => ProtocolLayer::IPv6,
            };
            bump(&mut self.protocols, layer.as_str().to_string());
            bump(&mut self.src_ips, network.src().to_string());
            bump(&mut self.dst_ips, network.dst().to_string());
        }

        match decoded.transport {
            Some(TransportLayer::Tcp {
                src_port,
                dst_port,
                payload,
            }) => {
                bump(&mut self.protocols, ProtocolLayer::TCP.as_str().to_string());
                bump(&mut self.tcp_src_ports, src_port);
                bump(&mut self.tcp_dst_ports, dst_port);
                if dst_port == HTTPS_PORT {
                    let version = TlsVersion::classify(payload);
                    bump(&mut self.tls_versions, version.as_str().to_string());
                }
            }
            Some(TransportLayer::Udp {
                src_port,
                dst_port,
                payload,
            }) => {
                bump(&mut self.protocols, ProtocolLayer::UDP.as_str().to_string());
                bump(&mut self.udp_src_ports, src_port);
                bump(&mut self.udp_dst_ports, dst_port);
                if dst_port == DNS_PORT && dissector::is_dns_query(payload) {
                    self.dns_queries += 1;
                }
            }
            Some(TransportLayer::Icmp) => {
                bump(&mut self.protocols, ProtocolLayer::ICMP.as_str().to_string());
            }
            Some(TransportLayer::Icmpv6) => {
                bump(&mut self.protocols, ProtocolLayer::ICMPv6.as_str().to_string());
            }
            None => {}
        }
    }

    fn finish(self) -> AnalysisReport {
        let duration_seconds = match (self.first, self.last) {
            (Some(first), Some(last)) => (last - first).num_seconds().max(0),
            _ => 0,
        };
        let avg_packet_size = if self.packet_count > 0 {
            self.total_bytes as f64 / self.packet_count as f64
        } else {
            0.0
        };
        let packet_rate = if duration_seconds > 0 {
            self.packet_count as f64 / duration_seconds as f64
        } else {
            0.0
        };
        AnalysisReport {
            packet_count: self.packet_count,
            total_bytes: self.total_bytes,
            protocol_distribution: self.protocols,
            top_src_ips: self.src_ips,
            top_dst_ips: self.dst_ips,
            top_tcp_src_ports: self.tcp_src_ports,
            top_tcp_dst_ports: self.tcp_dst_ports,
            top_udp_src_ports: self.udp_src_ports,
            top_udp_dst_ports: self.udp_dst_ports,
            tls_versions: self.tls_versions,
            dns_queries: self.dns_queries,
            packet_rate,
            avg_packet_size,
            duration_seconds,
            first_packet_time: self.first,
            last_packet_time: self.last,
        }
    }
}

fn bump<K: Ord>(map: &mut Frequency<K>, key: K) {
    *map.entry(key).or_insert(0) += 1;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::test_support::*;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::io::Write;
    use tempfile::TempDir;

    #[test]
    fn test_tls12_handshakes_counted() {
        let _ = env_logger::builder().is_test(true).try_init();
        let k = 7;
        let mut builder = PcapFileBuilder::ethernet();
        for i in 0..k {
            let payload = [0x16, 0x03, 0x03, 0x00, 0x10, 0x01];
            builder = builder.packet(
                1_700_000_000 + i,
                0,
                ethernet_ipv4([10, 0, 0, 1], [10, 0, 0, 2], 6, &tcp_segment(40000 + i as u16, 443, &payload)),
            );
        }
        let report = analyze_reader(builder.build().as_slice()).unwrap();
        assert_eq!(report.packet_count, k as u64);
        assert_eq!(report.tls_versions.get("TLS1.2"), Some(&(k as u64)));
        assert_eq!(report.tls_versions.len(), 1);
    }

    #[test]
    fn test_sample_capture_statistics() {
        let report = analyze_reader(sample_capture().build().as_slice()).unwrap();
        assert_eq!(report.packet_count, 5);
        assert_eq!(report.protocol_distribution.get("IPv4"), Some(&4));
        assert_eq!(report.protocol_distribution.get("IPv6"), Some(&1));
        assert_eq!(report.protocol_distribution.get("TCP"), Some(&2));
        assert_eq!(report.protocol_distribution.get("UDP"), Some(&3));
        assert_eq!(report.tls_versions.get("TLS1.2"), Some(&2));
        // the response travels from port 53, not to it
        assert_eq!(report.dns_queries, 1);
        assert_eq!(report.top_src_ips.get("10.0.0.1"), Some(&3));
        assert_eq!(report.top_dst_ips.get("93.184.216.34"), Some(&2));
        assert_eq!(report.top_src_ips.get("2001:db8::1"), Some(&1));
        assert_eq!(report.top_tcp_dst_ports.get(&443), Some(&2));
        assert_eq!(report.top_udp_dst_ports.get(&53), Some(&1));
        assert_eq!(report.top_udp_src_ports.get(&53), Some(&1));
        assert_eq!(report.top_udp_dst_ports.get(&5678), Some(&1));
        assert_eq!(report.duration_seconds, 10);
        assert!((report.packet_rate - 0.5).abs() < f64::EPSILON);
        let expected_avg = report.total_bytes as f64 / 5.0;
        assert!((report.avg_packet_size - expected_avg).abs() < f64::EPSILON);
        assert_eq!(
            report.first_packet_time,
            DateTime::from_timestamp(1_700_000_000, 0)
        );
        assert_eq!(
            report.last_packet_time,
            DateTime::from_timestamp(1_700_000_010, 0)
        );
    }

    #[test]
    fn test_tcp_without_payload_to_443_is_unknown() {
        let builder = PcapFileBuilder::ethernet().packet(
            1,
            0,
            ethernet_ipv4([10, 0, 0, 1], [10, 0, 0, 2], 6, &tcp_segment(1000, 443, &[])),
        );
        let report = analyze_reader(builder.build().as_slice()).unwrap();
        assert_eq!(report.tls_versions.get("Unknown"), Some(&1));
    }

    #[test]
    fn test_empty_capture_has_zero_rates() {
        let report = analyze_reader(PcapFileBuilder::ethernet().build().as_slice()).unwrap();
        assert_eq!(report.packet_count, 0);
        assert_eq!(report.avg_packet_size, 0.0);
        assert_eq!(report.packet_rate, 0.0);
        assert_eq!(report.duration_seconds, 0);
        assert!(report.first_packet_time.is_none());
    }

    #[test]
    fn test_sub_second_capture_has_zero_rate() {
        let builder = PcapFileBuilder::ethernet()
            .packet(10, 0, ethernet_ipv4([1, 1, 1, 1], [2, 2, 2, 2], 17, &udp_datagram(1, 2, b"a")))
            .packet(10, 900_000, ethernet_ipv4([1, 1, 1, 1], [2, 2, 2, 2], 17, &udp_datagram(1, 2, b"b")));
        let report = analyze_reader(builder.build().as_slice()).unwrap();
        assert_eq!(report.packet_count, 2);
        assert_eq!(report.duration_seconds, 0);
        assert_eq!(report.packet_rate, 0.0);
        assert!(report.avg_packet_size > 0.0);
    }

    #[test]
    fn test_garbage_input_fails() {
        let garbage = b"this is definitely not a capture file, just some text padding it out";
        assert!(matches!(
            analyze_reader(&garbage[..]),
            Err(AnalysisError::ParseFailed(_))
        ));
    }

    #[test]
    fn test_missing_file_fails_to_open() {
        let dir = TempDir::new().unwrap();
        assert!(matches!(
            analyze_file(&dir.path().join("absent.pcap")),
            Err(AnalysisError::OpenFailed(_))
        ));
    }

    #[test]
    fn test_gzip_file_is_decoded() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("capture.pcap.gz");
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(&sample_capture().build()).unwrap();
        std::fs::write(&path, encoder.finish().unwrap()).unwrap();
        let report = analyze_file(&path).unwrap();
        assert_eq!(report.packet_count, 5);
        assert_eq!(report.dns_queries, 1);
    }

    #[test]
    fn test_plain_file_analysis() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("capture.pcap");
        sample_capture().write_to(&path);
        let report = analyze_file(&path).unwrap();
        assert_eq!(report.packet_count, 5);
    }

    #[test]
    fn test_unknown_linktype_still_counts_packets() {
        let builder = PcapFileBuilder::with_linktype(147).packet(5, 0, vec![0xde, 0xad, 0xbe, 0xef]);
        let report = analyze_reader(builder.build().as_slice()).unwrap();
        assert_eq!(report.packet_count, 1);
        assert_eq!(report.total_bytes, 4);
        assert!(report.protocol_distribution.is_empty());
    }

    #[test]
    fn test_icmpv6_decoded_under_every_cooked_link_type() {
        let packet = ipv6_icmpv6_packet(1, 2);
        let cases = [
            (113, sll_frame(0x86DD, &packet)),
            (276, sll2_frame(0x86DD, &packet)),
            (0, null_frame(30, &packet)),
            (101, packet.clone()),
        ];
        for (linktype, frame) in cases {
            let builder = PcapFileBuilder::with_linktype(linktype).packet(1, 0, frame);
            let report = analyze_reader(builder.build().as_slice()).unwrap();
            assert_eq!(report.packet_count, 1, "linktype {}", linktype);
            assert_eq!(report.protocol_distribution.len(), 2, "linktype {}", linktype);
            assert_eq!(report.protocol_distribution.get("IPv6"), Some(&1));
            assert_eq!(report.protocol_distribution.get("ICMPv6"), Some(&1));
            assert_eq!(report.top_src_ips.get("2001:db8::1"), Some(&1));
            assert_eq!(report.top_dst_ips.get("2001:db8::2"), Some(&1));
        }
    }

    #[test]
    fn test_nanosecond_timestamps() {
        let frame = || ethernet_ipv4([1, 1, 1, 1], [2, 2, 2, 2], 17, &udp_datagram(1, 2, b"x"));
        let builder = PcapFileBuilder::ethernet()
            .nanosecond()
            .packet(1, 999_999_999, frame())
            .packet(3, 0, frame());
        let report = analyze_reader(builder.build().as_slice()).unwrap();
        assert_eq!(report.packet_count, 2);
        assert_eq!(
            report.first_packet_time,
            DateTime::from_timestamp(1, 999_999_999)
        );
        assert_eq!(report.last_packet_time, DateTime::from_timestamp(3, 0));
        assert_eq!(report.duration_seconds, 1);
    }

    #[test]
    fn test_big_endian_capture_matches_little_endian() {
        let little = analyze_reader(sample_capture().build().as_slice()).unwrap();
        let big = analyze_reader(sample_capture().big_endian().build().as_slice()).unwrap();
        assert_eq!(big.packet_count, 5);
        assert_eq!(big, little);
    }

    #[test]
    fn test_truncated_final_record_is_dropped() {
        let bytes = sample_capture().build();
        for cut in [3, 10, 20] {
            let report = analyze_reader(&bytes[..bytes.len() - cut]).unwrap();
            assert_eq!(report.packet_count, 4, "cut {}", cut);
            assert_eq!(report.dns_queries, 1);
            assert_eq!(report.protocol_distribution.get("IPv6"), None);
            assert_eq!(report.last_packet_time, DateTime::from_timestamp(1_700_000_005, 0));
        }
    }

    #[test]
    fn test_pcapng_capture() {
        let frame = || {
            // 65 bytes, so each block needs padding
            let mut payload = tls_handshake(0x0304);
            payload.push(0);
            ethernet_ipv4([10, 0, 0, 1], [10, 0, 0, 2], 6, &tcp_segment(50000, 443, &payload))
        };
        let base = 1_700_000_000_000_000u64;
        let builder = PcapNgFileBuilder::with_linktype(1)
            .packet(base, frame())
            .packet(base + 5_000_000, frame())
            .packet(base + 10_000_000, frame());
        let report = analyze_reader(builder.build().as_slice()).unwrap();
        assert_eq!(report.packet_count, 3);
        assert_eq!(report.total_bytes, 3 * 65);
        assert_eq!(report.duration_seconds, 10);
        assert_eq!(report.tls_versions.get("TLS1.3"), Some(&3));
        assert_eq!(report.protocol_distribution.get("TCP"), Some(&3));
        assert_eq!(
            report.first_packet_time,
            DateTime::from_timestamp(1_700_000_000, 0)
        );
    }

    #[test]
    fn test_ticks_per_second() {
        assert_eq!(ticks_per_second(6), 1_000_000);
        assert_eq!(ticks_per_second(9), 1_000_000_000);
        assert_eq!(ticks_per_second(0x80 | 10), 1024);
    }
}
