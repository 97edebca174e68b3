use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::analysis::types::{AnalysisReport, Frequency};

/// A capture file known to the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Capture {
    pub id: i64,
    pub hostname: String,
    pub scenario: String,
    pub capture_datetime: DateTime<Utc>,
    /// Current on-disk location; follows every relocation.
    pub file_path: PathBuf,
    pub file_size: u64,
    pub compressed: bool,
    pub archived: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Metadata for a capture about to be inserted.
#[derive(Debug, Clone, PartialEq)]
pub struct NewCapture {
    pub hostname: String,
    pub scenario: String,
    pub capture_datetime: DateTime<Utc>,
    pub file_path: PathBuf,
    pub file_size: u64,
    pub compressed: bool,
}

/// Persisted statistics row, 1:1 with its capture.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaptureStats {
    pub capture_id: i64,
    pub packet_count: u64,
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

impl CaptureStats {
    pub fn from_report(capture_id: i64, report: &AnalysisReport) -> Self {
        CaptureStats {
            capture_id,
            packet_count: report.packet_count,
            protocol_distribution: report.protocol_distribution.clone(),
            top_src_ips: report.top_src_ips.clone(),
            top_dst_ips: report.top_dst_ips.clone(),
            top_tcp_src_ports: report.top_tcp_src_ports.clone(),
            top_tcp_dst_ports: report.top_tcp_dst_ports.clone(),
            top_udp_src_ports: report.top_udp_src_ports.clone(),
            top_udp_dst_ports: report.top_udp_dst_ports.clone(),
            tls_versions: report.tls_versions.clone(),
            dns_queries: report.dns_queries,
            packet_rate: report.packet_rate,
            avg_packet_size: report.avg_packet_size,
            duration_seconds: report.duration_seconds,
            first_packet_time: report.first_packet_time,
            last_packet_time: report.last_packet_time,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CaptureFilter {
    pub hostname: Option<String>,
    pub scenario: Option<String>,
    pub archived: Option<bool>,
    pub compressed: Option<bool>,
}

/// Store-wide totals.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StoreSummary {
    pub total_captures: u64,
    pub captures_with_stats: u64,
    pub total_file_size: u64,
    pub total_packets: u64,
    pub avg_packet_rate: f64,
    pub avg_packet_size: f64,
    pub total_duration_seconds: i64,
    pub unique_hostnames: u64,
    pub unique_scenarios: u64,
}

/// Totals for the captures sharing one hostname or scenario.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupStats {
    pub key: String,
    pub capture_count: u64,
    pub total_file_size: u64,
    pub total_packets: u64,
    pub avg_packet_rate: f64,
    pub avg_packet_size: f64,
    pub total_duration_seconds: i64,
}
