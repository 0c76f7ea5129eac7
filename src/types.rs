//! Core data structures shared across the crate
//!
//! Timestamps are `DateTime<Utc>` in memory and Unix milliseconds in SQLite.

use chrono::{DateTime, Utc};
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Report sources that count as manual (human-entered) submissions
///
/// Everything else is considered automated (screenshot recognition, clients).
pub const MANUAL_SOURCES: [&str; 2] = ["frontend-v2", "plus-one"];

/// Reliability of a trusted report
pub const RELIABILITY_TRUSTED: i32 = 0;

/// Reliability of a soft-deleted report
pub const RELIABILITY_INVALIDATED: i32 = -1;

/// Game server region
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Server {
    CN,
    US,
    JP,
    KR,
}

impl Server {
    pub fn as_str(&self) -> &'static str {
        match self {
            Server::CN => "CN",
            Server::US => "US",
            Server::JP => "JP",
            Server::KR => "KR",
        }
    }

    pub fn from_name(s: &str) -> Option<Self> {
        match s {
            "CN" => Some(Server::CN),
            "US" => Some(Server::US),
            "JP" => Some(Server::JP),
            "KR" => Some(Server::KR),
            _ => None,
        }
    }

    pub fn all() -> [Server; 4] {
        [Server::CN, Server::US, Server::JP, Server::KR]
    }

    /// Fixed UTC offset (seconds) the server's daily reset is defined in
    pub fn utc_offset_secs(&self) -> i64 {
        let hours = match self {
            Server::CN => 8,
            Server::US => -7,
            Server::JP => 9,
            Server::KR => 9,
        };
        hours * 3600
    }
}

impl ToSql for Server {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

impl FromSql for Server {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        let name = value.as_str()?;
        Server::from_name(name)
            .ok_or_else(|| FromSqlError::Other(format!("unknown server {:?}", name).into()))
    }
}

/// Which report sources an aggregation covers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceCategory {
    All,
    Automated,
    Manual,
}

impl SourceCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceCategory::All => "all",
            SourceCategory::Automated => "automated",
            SourceCategory::Manual => "manual",
        }
    }

    pub fn from_name(s: &str) -> Option<Self> {
        match s {
            "all" => Some(SourceCategory::All),
            "automated" => Some(SourceCategory::Automated),
            "manual" => Some(SourceCategory::Manual),
            _ => None,
        }
    }

    pub fn is_manual_source(source_name: &str) -> bool {
        MANUAL_SOURCES.contains(&source_name)
    }
}

impl ToSql for SourceCategory {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

impl FromSql for SourceCategory {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        let name = value.as_str()?;
        SourceCategory::from_name(name)
            .ok_or_else(|| FromSqlError::Other(format!("unknown source category {:?}", name).into()))
    }
}

/// Half-open time window `[start, end)`; a missing bound is unbounded
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeRange {
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
}

impl TimeRange {
    pub fn new(start: Option<DateTime<Utc>>, end: Option<DateTime<Utc>>) -> Self {
        Self { start, end }
    }

    pub fn unbounded() -> Self {
        Self::default()
    }

    pub fn contains(&self, t: DateTime<Utc>) -> bool {
        self.start.map_or(true, |s| t >= s) && self.end.map_or(true, |e| t < e)
    }
}

/// Stage id -> item ids the stage is scoped to
///
/// A `BTreeMap` keeps generated SQL and result order stable between runs.
pub type StageItemScope = BTreeMap<i64, Vec<i64>>;

/// Anonymous reporting identity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub account_id: i64,
    pub penguin_id: String,
    pub created_at: DateTime<Utc>,
}

/// One (item, quantity) in a submitted report
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemDrop {
    pub item_id: i64,
    pub quantity: i64,
}

impl ItemDrop {
    pub fn new(item_id: i64, quantity: i64) -> Self {
        Self {
            item_id,
            quantity,
        }
    }
}

/// Optional client metadata attached to a report
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportMetadata {
    /// Digest of the recognized screenshot
    pub md5: Option<String>,
}

/// A single stage clear inside a report task
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SingleReport {
    pub stage_id: i64,
    pub drops: Vec<ItemDrop>,
    pub times: i64,
    pub metadata: Option<ReportMetadata>,
}

/// A submission: one identity, one server/source, one or more stage clears
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportTask {
    pub account_id: Option<i64>,
    pub server: Server,
    pub source_name: String,
    pub version: String,
    pub reports: Vec<SingleReport>,
}

/// A persisted row of `drop_reports`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DropReport {
    pub report_id: i64,
    pub account_id: Option<i64>,
    pub server: Server,
    pub stage_id: i64,
    pub pattern_id: i64,
    pub times: i64,
    pub source_name: String,
    pub version: String,
    pub reliability: i32,
    pub md5: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Fields of a report about to be inserted
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewDropReport {
    pub account_id: Option<i64>,
    pub server: Server,
    pub stage_id: i64,
    pub pattern_id: i64,
    pub times: i64,
    pub source_name: String,
    pub version: String,
    pub reliability: i32,
    pub md5: Option<String>,
    pub created_at: DateTime<Utc>,
}

pub fn to_millis(t: DateTime<Utc>) -> i64 {
    t.timestamp_millis()
}

/// Read a millisecond timestamp column
pub fn from_millis(ms: i64) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::from_timestamp_millis(ms).ok_or(rusqlite::Error::IntegralValueOutOfRange(0, ms))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_server_round_trip_names() {
        for server in Server::all() {
            assert_eq!(Server::from_name(server.as_str()), Some(server));
        }
        assert_eq!(Server::from_name("EU"), None);
    }

    #[test]
    fn test_server_offsets() {
        assert_eq!(Server::CN.utc_offset_secs(), 8 * 3600);
        assert_eq!(Server::US.utc_offset_secs(), -7 * 3600);
        assert_eq!(Server::KR.utc_offset_secs(), 9 * 3600);
    }

    #[test]
    fn test_manual_sources() {
        assert!(SourceCategory::is_manual_source("frontend-v2"));
        assert!(SourceCategory::is_manual_source("plus-one"));
        assert!(!SourceCategory::is_manual_source("MeoAssistant"));
        assert_eq!(SourceCategory::from_name("manual"), Some(SourceCategory::Manual));
        assert_eq!(SourceCategory::from_name("everything"), None);
    }

    #[test]
    fn test_time_range_half_open() {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let end = Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap();
        let range = TimeRange::new(Some(start), Some(end));

        assert!(range.contains(start));
        assert!(!range.contains(end));
        assert!(TimeRange::unbounded().contains(end));
    }

    #[test]
    fn test_server_sql_column() {
        let conn = rusqlite::Connection::open_in_memory().unwrap();
        let server: Server = conn
            .query_row("SELECT ?1", [Server::JP], |row| row.get(0))
            .unwrap();
        assert_eq!(server, Server::JP);

        let bad: rusqlite::Result<Server> = conn.query_row("SELECT 'EU'", [], |row| row.get(0));
        assert!(bad.is_err());
    }

    #[test]
    fn test_millis_round_trip() {
        let t = Utc.with_ymd_and_hms(2024, 5, 1, 12, 30, 0).unwrap();
        assert_eq!(from_millis(to_millis(t)).unwrap(), t);
    }
}
