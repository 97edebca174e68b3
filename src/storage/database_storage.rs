use std::collections::HashSet;
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use log::{debug, info};
use sqlx::{
    sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions},
    Pool, Sqlite,
};

use crate::analysis::types::AnalysisReport;
use crate::error_handling::types::StorageError;
use crate::storage::storage_trait::Storage;
use crate::storage::types::{
    Capture, CaptureFilter, CaptureStats, GroupStats, NewCapture, StoreSummary,
};

const CAPTURE_COLUMNS: &str = "id, hostname, scenario, capture_datetime, file_path, file_size, \
     compressed, archived, created_at, updated_at";

const STATS_COLUMNS: &str = "capture_id, packet_count, protocol_distribution, top_src_ips, \
     top_dst_ips, top_tcp_src_ports, top_tcp_dst_ports, top_udp_src_ports, top_udp_dst_ports, \
     tls_versions, dns_queries, packet_rate, avg_packet_size, duration_seconds, \
     first_packet_time, last_packet_time";

/// Timestamps are stored with whole seconds and a `Z` suffix so text order
/// equals time order.
fn format_ts(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Secs, true)
}

fn parse_ts(s: &str) -> Result<DateTime<Utc>, StorageError> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StorageError::ReadFailed(format!("bad timestamp {:?}: {}", s, e)))
}

fn to_json<T: serde::Serialize>(value: &T) -> Result<String, StorageError> {
    serde_json::to_string(value).map_err(|e| StorageError::WriteFailed(e.to_string()))
}

fn from_json<T: serde::de::DeserializeOwned>(s: &str) -> Result<T, StorageError> {
    serde_json::from_str(s).map_err(|e| StorageError::ReadFailed(e.to_string()))
}

fn path_text(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

// Internal row mapping for captures to avoid manual try_get
#[derive(Debug, sqlx::FromRow)]
struct CaptureRow {
    id: i64,
    hostname: String,
    scenario: String,
    capture_datetime: String,
    file_path: String,
    file_size: i64,
    compressed: bool,
    archived: bool,
    created_at: String,
    updated_at: String,
}

impl CaptureRow {
    fn into_capture(self) -> Result<Capture, StorageError> {
        Ok(Capture {
            id: self.id,
            hostname: self.hostname,
            scenario: self.scenario,
            capture_datetime: parse_ts(&self.capture_datetime)?,
            file_path: PathBuf::from(self.file_path),
            file_size: self.file_size.max(0) as u64,
            compressed: self.compressed,
            archived: self.archived,
            created_at: parse_ts(&self.created_at)?,
            updated_at: parse_ts(&self.updated_at)?,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct StatsRow {
    capture_id: i64,
    packet_count: i64,
    protocol_distribution: String,
    top_src_ips: String,
    top_dst_ips: String,
    top_tcp_src_ports: String,
    top_tcp_dst_ports: String,
    top_udp_src_ports: String,
    top_udp_dst_ports: String,
    tls_versions: String,
    dns_queries: i64,
    packet_rate: f64,
    avg_packet_size: f64,
    duration_seconds: i64,
    first_packet_time: Option<String>,
    last_packet_time: Option<String>,
}

impl StatsRow {
    fn into_stats(self) -> Result<CaptureStats, StorageError> {
        Ok(CaptureStats {
            capture_id: self.capture_id,
            packet_count: self.packet_count.max(0) as u64,
            protocol_distribution: from_json(&self.protocol_distribution)?,
            top_src_ips: from_json(&self.top_src_ips)?,
            top_dst_ips: from_json(&self.top_dst_ips)?,
            top_tcp_src_ports: from_json(&self.top_tcp_src_ports)?,
            top_tcp_dst_ports: from_json(&self.top_tcp_dst_ports)?,
            top_udp_src_ports: from_json(&self.top_udp_src_ports)?,
            top_udp_dst_ports: from_json(&self.top_udp_dst_ports)?,
            tls_versions: from_json(&self.tls_versions)?,
            dns_queries: self.dns_queries.max(0) as u64,
            packet_rate: self.packet_rate,
            avg_packet_size: self.avg_packet_size,
            duration_seconds: self.duration_seconds,
            first_packet_time: self.first_packet_time.as_deref().map(parse_ts).transpose()?,
            last_packet_time: self.last_packet_time.as_deref().map(parse_ts).transpose()?,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct GroupRow {
    key: String,
    capture_count: i64,
    total_file_size: i64,
    total_packets: i64,
    avg_packet_rate: f64,
    avg_packet_size: f64,
    total_duration_seconds: i64,
}

impl GroupRow {
    fn into_group(self) -> GroupStats {
        GroupStats {
            key: self.key,
            capture_count: self.capture_count.max(0) as u64,
            total_file_size: self.total_file_size.max(0) as u64,
            total_packets: self.total_packets.max(0) as u64,
            avg_packet_rate: self.avg_packet_rate,
            avg_packet_size: self.avg_packet_size,
            total_duration_seconds: self.total_duration_seconds,
        }
    }
}

pub struct DatabaseStorage {
    pool: Pool<Sqlite>,
}

impl DatabaseStorage {
    /// Default database filename used in the application's working directory
    pub const DEFAULT_DB_FILE: &'static str = "pcapStore.db";

    /// Environment variable overriding the default database location
    pub const DB_PATH_ENV: &'static str = "PCAP_SORTER_DB";

    /// Database location used when none is configured: `$PCAP_SORTER_DB`,
    /// else the default filename in the current working directory.
    pub fn default_path() -> Result<PathBuf, StorageError> {
        if let Some(path) = env::var_os(Self::DB_PATH_ENV).filter(|p| !p.is_empty()) {
            return Ok(PathBuf::from(path));
        }
        let cwd = env::current_dir().map_err(|e| StorageError::ConnectionFailed(e.to_string()))?;
        Ok(cwd.join(Self::DEFAULT_DB_FILE))
    }

    /// Create or open the database at the default location
    pub async fn new() -> Result<Self, StorageError> {
        Self::new_file(Self::default_path()?).await
    }

    pub async fn new_file<P: AsRef<Path>>(path: P) -> Result<Self, StorageError> {
        let path_ref = path.as_ref();
        if let Some(parent) = path_ref.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .map_err(|e| StorageError::ConnectionFailed(e.to_string()))?;
        }
        let opts = SqliteConnectOptions::new()
            .filename(path_ref)
            .create_if_missing(true)
            .foreign_keys(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(5));
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(opts)
            .await
            .map_err(|e| StorageError::ConnectionFailed(e.to_string()))?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS captures (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                hostname TEXT NOT NULL,
                scenario TEXT NOT NULL,
                capture_datetime TEXT NOT NULL,
                file_path TEXT NOT NULL,
                file_size INTEGER NOT NULL,
                compressed INTEGER NOT NULL DEFAULT 0,
                archived INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );",
        )
        .execute(&pool)
        .await
        .map_err(|e| StorageError::WriteFailed(e.to_string()))?;
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS capture_stats (
                capture_id INTEGER PRIMARY KEY,
                packet_count INTEGER NOT NULL,
                protocol_distribution TEXT NOT NULL,
                top_src_ips TEXT NOT NULL,
                top_dst_ips TEXT NOT NULL,
                top_tcp_src_ports TEXT NOT NULL,
                top_tcp_dst_ports TEXT NOT NULL,
                top_udp_src_ports TEXT NOT NULL,
                top_udp_dst_ports TEXT NOT NULL,
                tls_versions TEXT NOT NULL,
                dns_queries INTEGER NOT NULL,
                packet_rate REAL NOT NULL,
                avg_packet_size REAL NOT NULL,
                duration_seconds INTEGER NOT NULL,
                first_packet_time TEXT,
                last_packet_time TEXT,
                FOREIGN KEY(capture_id) REFERENCES captures(id) ON DELETE CASCADE
            );",
        )
        .execute(&pool)
        .await
        .map_err(|e| StorageError::WriteFailed(e.to_string()))?;
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_captures_datetime ON captures(capture_datetime);",
        )
        .execute(&pool)
        .await
        .map_err(|e| StorageError::WriteFailed(e.to_string()))?;

        info!("Opened capture store at {}", path_ref.display());
        Ok(Self { pool })
    }

    async fn fetch_captures(
        &self,
        sql: &str,
        binds: &[String],
    ) -> Result<Vec<Capture>, StorageError> {
        let mut q = sqlx::query_as::<_, CaptureRow>(sql);
        for b in binds {
            q = q.bind(b);
        }
        let rows: Vec<CaptureRow> = q
            .fetch_all(&self.pool)
            .await
            .map_err(|e| StorageError::ReadFailed(e.to_string()))?;
        rows.into_iter().map(CaptureRow::into_capture).collect()
    }

    async fn update_one(&self, id: i64, sql: &str, path: &Path) -> Result<(), StorageError> {
        let result = sqlx::query(sql)
            .bind(path_text(path))
            .bind(format_ts(Utc::now()))
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| StorageError::WriteFailed(e.to_string()))?;
        if result.rows_affected() == 0 {
            return Err(StorageError::NotFound(id));
        }
        Ok(())
    }

    async fn group_stats(&self, column: &str) -> Result<Vec<GroupStats>, StorageError> {
        let sql = format!(
            "SELECT c.{col} AS key,
                    COUNT(*) AS capture_count,
                    COALESCE(SUM(c.file_size), 0) AS total_file_size,
                    COALESCE(SUM(s.packet_count), 0) AS total_packets,
                    COALESCE(AVG(s.packet_rate), 0.0) AS avg_packet_rate,
                    COALESCE(AVG(s.avg_packet_size), 0.0) AS avg_packet_size,
                    COALESCE(SUM(s.duration_seconds), 0) AS total_duration_seconds
             FROM captures c LEFT JOIN capture_stats s ON s.capture_id = c.id
             GROUP BY c.{col} ORDER BY c.{col}",
            col = column
        );
        let rows: Vec<GroupRow> = sqlx::query_as(&sql)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| StorageError::ReadFailed(e.to_string()))?;
        Ok(rows.into_iter().map(GroupRow::into_group).collect())
    }
}

#[async_trait]
impl Storage for DatabaseStorage {
    async fn insert_capture_with_stats(
        &self,
        capture: &NewCapture,
        report: &AnalysisReport,
    ) -> Result<i64, StorageError> {
        let now = format_ts(Utc::now());
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| StorageError::WriteFailed(e.to_string()))?;

        let id = sqlx::query(
            "INSERT INTO captures (hostname, scenario, capture_datetime, file_path, file_size,
                                   compressed, archived, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, 0, ?7, ?7)",
        )
        .bind(&capture.hostname)
        .bind(&capture.scenario)
        .bind(format_ts(capture.capture_datetime))
        .bind(path_text(&capture.file_path))
        .bind(capture.file_size as i64)
        .bind(capture.compressed)
        .bind(&now)
        .execute(&mut *tx)
        .await
        .map_err(|e| StorageError::WriteFailed(e.to_string()))?
        .last_insert_rowid();

        sqlx::query(&format!(
            "INSERT INTO capture_stats ({}) VALUES \
             (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)",
            STATS_COLUMNS
        ))
        .bind(id)
        .bind(report.packet_count as i64)
        .bind(to_json(&report.protocol_distribution)?)
        .bind(to_json(&report.top_src_ips)?)
        .bind(to_json(&report.top_dst_ips)?)
        .bind(to_json(&report.top_tcp_src_ports)?)
        .bind(to_json(&report.top_tcp_dst_ports)?)
        .bind(to_json(&report.top_udp_src_ports)?)
        .bind(to_json(&report.top_udp_dst_ports)?)
        .bind(to_json(&report.tls_versions)?)
        .bind(report.dns_queries as i64)
        .bind(report.packet_rate)
        .bind(report.avg_packet_size)
        .bind(report.duration_seconds)
        .bind(report.first_packet_time.map(|t| t.to_rfc3339_opts(SecondsFormat::AutoSi, true)))
        .bind(report.last_packet_time.map(|t| t.to_rfc3339_opts(SecondsFormat::AutoSi, true)))
        .execute(&mut *tx)
        .await
        .map_err(|e| StorageError::WriteFailed(e.to_string()))?;

        tx.commit()
            .await
            .map_err(|e| StorageError::WriteFailed(e.to_string()))?;
        debug!("Inserted capture {} ({})", id, capture.file_path.display());
        Ok(id)
    }

    async fn get_capture(&self, id: i64) -> Result<Capture, StorageError> {
        let row: Option<CaptureRow> =
            sqlx::query_as(&format!("SELECT {} FROM captures WHERE id = ?1", CAPTURE_COLUMNS))
                .bind(id)
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| StorageError::ReadFailed(e.to_string()))?;
        row.ok_or(StorageError::NotFound(id))?.into_capture()
    }

    async fn get_captures(&self, filter: &CaptureFilter) -> Result<Vec<Capture>, StorageError> {
        let mut sql = format!("SELECT {} FROM captures", CAPTURE_COLUMNS);
        let mut clauses: Vec<String> = Vec::new();
        let mut binds: Vec<String> = Vec::new();
        if let Some(ref hostname) = filter.hostname {
            clauses.push("hostname = ?".into());
            binds.push(hostname.clone());
        }
        if let Some(ref scenario) = filter.scenario {
            clauses.push("scenario = ?".into());
            binds.push(scenario.clone());
        }
        if let Some(archived) = filter.archived {
            clauses.push(format!("archived = {}", archived as i32));
        }
        if let Some(compressed) = filter.compressed {
            clauses.push(format!("compressed = {}", compressed as i32));
        }
        if !clauses.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&clauses.join(" AND "));
        }
        sql.push_str(" ORDER BY capture_datetime DESC, id DESC");
        self.fetch_captures(&sql, &binds).await
    }

    async fn get_capture_stats(&self, id: i64) -> Result<Option<CaptureStats>, StorageError> {
        let row: Option<StatsRow> = sqlx::query_as(&format!(
            "SELECT {} FROM capture_stats WHERE capture_id = ?1",
            STATS_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| StorageError::ReadFailed(e.to_string()))?;
        row.map(StatsRow::into_stats).transpose()
    }

    async fn get_captures_for_archive(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<Capture>, StorageError> {
        let sql = format!(
            "SELECT {} FROM captures WHERE archived = 0 AND capture_datetime < ? \
             ORDER BY capture_datetime ASC",
            CAPTURE_COLUMNS
        );
        self.fetch_captures(&sql, &[format_ts(cutoff)]).await
    }

    async fn get_old_archived_captures(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<Capture>, StorageError> {
        let sql = format!(
            "SELECT {} FROM captures WHERE archived = 1 AND capture_datetime < ? \
             ORDER BY capture_datetime ASC",
            CAPTURE_COLUMNS
        );
        self.fetch_captures(&sql, &[format_ts(cutoff)]).await
    }

    async fn get_pending_compressions(&self, limit: usize) -> Result<Vec<Capture>, StorageError> {
        let sql = format!(
            "SELECT {} FROM captures WHERE compressed = 0 AND archived = 0 \
             ORDER BY capture_datetime ASC LIMIT {}",
            CAPTURE_COLUMNS,
            limit.min(i64::MAX as usize)
        );
        self.fetch_captures(&sql, &[]).await
    }

    async fn mark_capture_compressed(&self, id: i64, path: &Path) -> Result<(), StorageError> {
        self.update_one(
            id,
            "UPDATE captures SET file_path = ?1, compressed = 1, updated_at = ?2 WHERE id = ?3",
            path,
        )
        .await
    }

    async fn mark_capture_archived(&self, id: i64, path: &Path) -> Result<(), StorageError> {
        self.update_one(
            id,
            "UPDATE captures SET file_path = ?1, archived = 1, updated_at = ?2 WHERE id = ?3",
            path,
        )
        .await
    }

    async fn update_file_path(&self, id: i64, path: &Path) -> Result<(), StorageError> {
        self.update_one(
            id,
            "UPDATE captures SET file_path = ?1, updated_at = ?2 WHERE id = ?3",
            path,
        )
        .await
    }

    async fn delete_capture(&self, id: i64) -> Result<(), StorageError> {
        let result = sqlx::query("DELETE FROM captures WHERE id = ?1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| StorageError::WriteFailed(e.to_string()))?;
        if result.rows_affected() == 0 {
            return Err(StorageError::NotFound(id));
        }
        Ok(())
    }

    async fn get_all_file_paths(&self) -> Result<HashSet<PathBuf>, StorageError> {
        let paths: Vec<String> = sqlx::query_scalar("SELECT file_path FROM captures")
            .fetch_all(&self.pool)
            .await
            .map_err(|e| StorageError::ReadFailed(e.to_string()))?;
        Ok(paths.into_iter().map(PathBuf::from).collect())
    }

    async fn get_summary(&self) -> Result<StoreSummary, StorageError> {
        let (total_captures, total_file_size, unique_hostnames, unique_scenarios): (
            i64,
            i64,
            i64,
            i64,
        ) = sqlx::query_as(
            "SELECT COUNT(*), COALESCE(SUM(file_size), 0),
                    COUNT(DISTINCT hostname), COUNT(DISTINCT scenario)
             FROM captures",
        )
        .fetch_one(&self.pool)
        .await
        .map_err(|e| StorageError::ReadFailed(e.to_string()))?;

        let (captures_with_stats, total_packets, avg_packet_rate, avg_packet_size, total_duration): (
            i64,
            i64,
            f64,
            f64,
            i64,
        ) = sqlx::query_as(
            "SELECT COUNT(*), COALESCE(SUM(packet_count), 0),
                    COALESCE(AVG(packet_rate), 0.0), COALESCE(AVG(avg_packet_size), 0.0),
                    COALESCE(SUM(duration_seconds), 0)
             FROM capture_stats",
        )
        .fetch_one(&self.pool)
        .await
        .map_err(|e| StorageError::ReadFailed(e.to_string()))?;

        Ok(StoreSummary {
            total_captures: total_captures.max(0) as u64,
            captures_with_stats: captures_with_stats.max(0) as u64,
            total_file_size: total_file_size.max(0) as u64,
            total_packets: total_packets.max(0) as u64,
            avg_packet_rate,
            avg_packet_size,
            total_duration_seconds: total_duration,
            unique_hostnames: unique_hostnames.max(0) as u64,
            unique_scenarios: unique_scenarios.max(0) as u64,
        })
    }

    async fn get_stats_by_hostname(&self) -> Result<Vec<GroupStats>, StorageError> {
        self.group_stats("hostname").await
    }

    async fn get_stats_by_scenario(&self) -> Result<Vec<GroupStats>, StorageError> {
        self.group_stats("scenario").await
    }
}
