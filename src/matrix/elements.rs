use super::MatrixRow;
use crate::error::Result;
use crate::types::{from_millis, to_millis, Server, SourceCategory};
use chrono::{DateTime, Utc};
use rusqlite::types::{Type, Value};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Per (stage, item) drop totals
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DropMatrixElement {
    pub server: Server,
    pub stage_id: i64,
    pub item_id: i64,
    pub quantity: i64,
    pub times: i64,
    /// Quantity dropped in one report -> number of reports with that quantity
    pub quantity_buckets: BTreeMap<i64, i64>,
    pub source_category: SourceCategory,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
}

/// Per (stage, pattern) single-run report counts
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatternMatrixElement {
    pub server: Server,
    pub stage_id: i64,
    pub pattern_id: i64,
    pub quantity: i64,
    pub times: i64,
    pub source_category: SourceCategory,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
}

/// Per (stage, item, interval) drop totals
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrendElement {
    pub server: Server,
    pub stage_id: i64,
    pub item_id: i64,
    pub group_id: i64,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub quantity: i64,
    pub times: i64,
    pub source_category: SourceCategory,
}

fn opt_millis(t: Option<DateTime<Utc>>) -> Value {
    t.map(to_millis).into()
}

fn read_opt_millis(row: &rusqlite::Row<'_>, idx: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
    row.get::<_, Option<i64>>(idx)?.map(from_millis).transpose()
}

impl MatrixRow for DropMatrixElement {
    const TABLE: &'static str = "drop_matrix_elements";
    const COLUMNS: &'static [&'static str] = &[
        "server",
        "stage_id",
        "item_id",
        "quantity",
        "times",
        "quantity_buckets",
        "source_category",
        "start_time",
        "end_time",
    ];

    fn server(&self) -> Server {
        self.server
    }

    fn source_category(&self) -> SourceCategory {
        self.source_category
    }

    fn to_values(&self) -> Result<Vec<Value>> {
        Ok(vec![
            self.server.as_str().to_string().into(),
            self.stage_id.into(),
            self.item_id.into(),
            self.quantity.into(),
            self.times.into(),
            serde_json::to_string(&self.quantity_buckets)?.into(),
            self.source_category.as_str().to_string().into(),
            opt_millis(self.start_time),
            opt_millis(self.end_time),
        ])
    }

    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        let buckets: String = row.get(5)?;
        let quantity_buckets = serde_json::from_str(&buckets)
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(5, Type::Text, Box::new(e)))?;

        Ok(Self {
            server: row.get(0)?,
            stage_id: row.get(1)?,
            item_id: row.get(2)?,
            quantity: row.get(3)?,
            times: row.get(4)?,
            quantity_buckets,
            source_category: row.get(6)?,
            start_time: read_opt_millis(row, 7)?,
            end_time: read_opt_millis(row, 8)?,
        })
    }
}

impl MatrixRow for PatternMatrixElement {
    const TABLE: &'static str = "pattern_matrix_elements";
    const COLUMNS: &'static [&'static str] = &[
        "server",
        "stage_id",
        "pattern_id",
        "quantity",
        "times",
        "source_category",
        "start_time",
        "end_time",
    ];

    fn server(&self) -> Server {
        self.server
    }

    fn source_category(&self) -> SourceCategory {
        self.source_category
    }

    fn to_values(&self) -> Result<Vec<Value>> {
        Ok(vec![
            self.server.as_str().to_string().into(),
            self.stage_id.into(),
            self.pattern_id.into(),
            self.quantity.into(),
            self.times.into(),
            self.source_category.as_str().to_string().into(),
            opt_millis(self.start_time),
            opt_millis(self.end_time),
        ])
    }

    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            server: row.get(0)?,
            stage_id: row.get(1)?,
            pattern_id: row.get(2)?,
            quantity: row.get(3)?,
            times: row.get(4)?,
            source_category: row.get(5)?,
            start_time: read_opt_millis(row, 6)?,
            end_time: read_opt_millis(row, 7)?,
        })
    }
}

impl MatrixRow for TrendElement {
    const TABLE: &'static str = "trend_elements";
    const COLUMNS: &'static [&'static str] = &[
        "server",
        "stage_id",
        "item_id",
        "group_id",
        "start_time",
        "end_time",
        "quantity",
        "times",
        "source_category",
    ];

    fn server(&self) -> Server {
        self.server
    }

    fn source_category(&self) -> SourceCategory {
        self.source_category
    }

    fn to_values(&self) -> Result<Vec<Value>> {
        Ok(vec![
            self.server.as_str().to_string().into(),
            self.stage_id.into(),
            self.item_id.into(),
            self.group_id.into(),
            to_millis(self.start_time).into(),
            to_millis(self.end_time).into(),
            self.quantity.into(),
            self.times.into(),
            self.source_category.as_str().to_string().into(),
        ])
    }

    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            server: row.get(0)?,
            stage_id: row.get(1)?,
            item_id: row.get(2)?,
            group_id: row.get(3)?,
            start_time: from_millis(row.get(4)?)?,
            end_time: from_millis(row.get(5)?)?,
            quantity: row.get(6)?,
            times: row.get(7)?,
            source_category: row.get(8)?,
        })
    }
}
