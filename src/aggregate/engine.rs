//! Aggregation queries over the `drop_reports` fact table
//!
//! Every query has the same two-level shape: an inner select that applies the
//! report scope (reliability, account, server, time, stage/item) and an outer
//! select that applies the source-category filter and groups. Results come
//! back ordered by their group keys.

use crate::aggregate::predicate::{render_where, Predicate};
use crate::aggregate::trend::TrendWindow;
use crate::db::Database;
use crate::error::Result;
use crate::types::{
    from_millis, to_millis, Server, SourceCategory, StageItemScope, TimeRange, MANUAL_SOURCES,
    RELIABILITY_TRUSTED,
};
use chrono::{DateTime, Utc};
use rusqlite::types::Value;
use serde::{Deserialize, Serialize};

/// Which reports an aggregation covers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AggregationFilter {
    pub server: Server,
    pub time_range: TimeRange,
    /// Personal statistics: count only this account's non-invalidated reports
    pub account_id: Option<i64>,
    pub source_category: SourceCategory,
}

impl AggregationFilter {
    pub fn new(server: Server) -> Self {
        Self {
            server,
            time_range: TimeRange::unbounded(),
            account_id: None,
            source_category: SourceCategory::All,
        }
    }

    pub fn with_time_range(mut self, time_range: TimeRange) -> Self {
        self.time_range = time_range;
        self
    }

    pub fn with_account(mut self, account_id: i64) -> Self {
        self.account_id = Some(account_id);
        self
    }

    pub fn with_source_category(mut self, source_category: SourceCategory) -> Self {
        self.source_category = source_category;
        self
    }

    /// Predicates on `drop_reports AS dr` shared by every query
    fn report_predicates(&self) -> Vec<Predicate> {
        let mut predicates = Vec::new();

        match self.account_id {
            Some(account_id) => {
                predicates.push(Predicate::ge("dr.reliability", RELIABILITY_TRUSTED as i64));
                predicates.push(Predicate::eq("dr.account_id", account_id));
            }
            None => predicates.push(Predicate::eq("dr.reliability", RELIABILITY_TRUSTED as i64)),
        }

        if let Some(start) = self.time_range.start {
            predicates.push(Predicate::ge("dr.created_at", to_millis(start)));
        }
        if let Some(end) = self.time_range.end {
            predicates.push(Predicate::lt("dr.created_at", to_millis(end)));
        }

        predicates.push(Predicate::eq("dr.server", self.server.as_str().to_string()));
        predicates
    }

    /// Outer-query predicate on the derived `source_name` column
    fn source_predicates(&self) -> Vec<Predicate> {
        match self.source_category {
            SourceCategory::All => Vec::new(),
            SourceCategory::Manual => vec![Predicate::in_list("source_name", manual_sources())],
            SourceCategory::Automated => vec![Predicate::not_in("source_name", manual_sources())],
        }
    }
}

fn manual_sources() -> impl Iterator<Item = String> {
    MANUAL_SOURCES.iter().map(|s| s.to_string())
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TotalQuantityResultForDropMatrix {
    pub stage_id: i64,
    pub item_id: i64,
    pub total_quantity: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TotalQuantityResultForPatternMatrix {
    pub stage_id: i64,
    pub pattern_id: i64,
    pub total_quantity: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TotalTimesResult {
    pub stage_id: i64,
    pub total_times: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuantityUniqCountResult {
    pub stage_id: i64,
    pub item_id: i64,
    pub quantity: i64,
    pub count: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TotalQuantityResultForTrend {
    pub group_id: i64,
    pub interval_start: DateTime<Utc>,
    pub interval_end: DateTime<Utc>,
    pub stage_id: i64,
    pub item_id: i64,
    pub total_quantity: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TotalTimesResultForTrend {
    pub group_id: i64,
    pub interval_start: DateTime<Utc>,
    pub interval_end: DateTime<Utc>,
    pub stage_id: i64,
    pub total_times: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UniqueUserCountBySource {
    pub source_name: String,
    pub count: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TotalStageTimes {
    pub stage_id: i64,
    pub ark_stage_id: String,
    pub total_times: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TotalItemQuantity {
    pub item_id: i64,
    pub ark_item_id: String,
    pub total_quantity: i64,
}

/// Stage left out of site-wide stage statistics
pub const RECRUIT_STAGE_ID: &str = "recruit";

/// Item types counted by site-wide item statistics
pub const SITE_STATS_ITEM_TYPES: [&str; 3] = ["MATERIAL", "FURNITURE", "CHIP"];

/// A two-level aggregation query under construction
struct DerivedQuery {
    cte: Option<(String, Vec<Value>)>,
    columns: &'static str,
    from: &'static str,
    predicates: Vec<Predicate>,
    outer_columns: &'static str,
    outer_predicates: Vec<Predicate>,
    group_by: &'static str,
}

impl DerivedQuery {
    fn render(&self) -> (String, Vec<Value>) {
        let mut sql = String::new();
        let mut params = Vec::new();

        if let Some((cte, cte_params)) = &self.cte {
            sql.push_str(cte);
            sql.push(' ');
            params.extend(cte_params.iter().cloned());
        }

        sql.push_str("SELECT ");
        sql.push_str(self.outer_columns);
        sql.push_str(" FROM (SELECT ");
        sql.push_str(self.columns);
        sql.push_str(" FROM ");
        sql.push_str(self.from);
        render_where(&self.predicates, &mut sql, &mut params);
        sql.push_str(") AS a");
        render_where(&self.outer_predicates, &mut sql, &mut params);
        sql.push_str(" GROUP BY ");
        sql.push_str(self.group_by);
        sql.push_str(" ORDER BY ");
        sql.push_str(self.group_by);

        (sql, params)
    }
}

/// `(dr.stage_id = ? AND dpe.item_id ...) OR ...`, one arm per stage
fn stage_item_predicate(scope: &StageItemScope) -> Predicate {
    Predicate::Or(
        scope
            .iter()
            .map(|(stage_id, item_ids)| {
                Predicate::And(vec![
                    Predicate::eq("dr.stage_id", *stage_id),
                    Predicate::in_list("dpe.item_id", item_ids.iter().copied()),
                ])
            })
            .collect(),
    )
}

fn stage_predicate(stage_ids: &[i64]) -> Predicate {
    Predicate::in_list("dr.stage_id", stage_ids.iter().copied())
}

/// `WITH intervals(group_id, interval_start, interval_end) AS (VALUES ...)`
fn intervals_cte(window: &TrendWindow) -> (String, Vec<Value>) {
    let intervals = window.intervals();
    let mut params = Vec::with_capacity(intervals.len() * 3);
    let rows: Vec<&str> = intervals
        .iter()
        .map(|interval| {
            params.push(Value::Integer(interval.group_id));
            params.push(Value::Integer(to_millis(interval.start)));
            params.push(Value::Integer(to_millis(interval.end)));
            "(?, ?, ?)"
        })
        .collect();

    (
        format!(
            "WITH intervals(group_id, interval_start, interval_end) AS (VALUES {})",
            rows.join(", ")
        ),
        params,
    )
}

/// Predicates bounding `dr.created_at` to the whole trend window
fn window_predicates(window: &TrendWindow) -> [Predicate; 2] {
    [
        Predicate::ge("dr.created_at", to_millis(window.anchor())),
        Predicate::lt("dr.created_at", to_millis(window.end())),
    ]
}

pub struct AggregationEngine {
    db: Database,
}

impl AggregationEngine {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    fn query<T, F>(&self, query: DerivedQuery, map: F) -> Result<Vec<T>>
    where
        F: FnMut(&rusqlite::Row<'_>) -> rusqlite::Result<T>,
    {
        let (sql, params) = query.render();
        let conn = self.db.lock()?;
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(rusqlite::params_from_iter(params.iter()), map)?;
        let results = rows.collect::<rusqlite::Result<Vec<T>>>()?;
        Ok(results)
    }

    /// Sum of dropped quantity per (stage, item)
    pub fn calc_total_quantity_for_drop_matrix(
        &self,
        filter: &AggregationFilter,
        scope: &StageItemScope,
    ) -> Result<Vec<TotalQuantityResultForDropMatrix>> {
        if scope.is_empty() {
            return Ok(Vec::new());
        }

        let mut predicates = filter.report_predicates();
        predicates.push(stage_item_predicate(scope));

        let results = self.query(
            DerivedQuery {
                cte: None,
                columns: "dr.stage_id, dr.source_name, dpe.item_id, dpe.quantity",
                from: "drop_reports AS dr \
                       JOIN drop_pattern_elements AS dpe ON dpe.drop_pattern_id = dr.pattern_id",
                predicates,
                outer_columns: "stage_id, item_id, SUM(quantity) AS total_quantity",
                outer_predicates: filter.source_predicates(),
                group_by: "stage_id, item_id",
            },
            |row| {
                Ok(TotalQuantityResultForDropMatrix {
                    stage_id: row.get(0)?,
                    item_id: row.get(1)?,
                    total_quantity: row.get(2)?,
                })
            },
        )?;

        log::debug!(
            "📊 Drop matrix totals for {}/{}: {} rows",
            filter.server.as_str(),
            filter.source_category.as_str(),
            results.len()
        );
        Ok(results)
    }

    /// Number of single-run reports per (stage, pattern)
    pub fn calc_total_quantity_for_pattern_matrix(
        &self,
        filter: &AggregationFilter,
        stage_ids: &[i64],
    ) -> Result<Vec<TotalQuantityResultForPatternMatrix>> {
        if stage_ids.is_empty() {
            return Ok(Vec::new());
        }

        let mut predicates = filter.report_predicates();
        predicates.push(stage_predicate(stage_ids));
        predicates.push(Predicate::eq("dr.times", 1i64));

        self.query(
            DerivedQuery {
                cte: None,
                columns: "dr.source_name, dr.stage_id, dr.pattern_id",
                from: "drop_reports AS dr",
                predicates,
                outer_columns: "stage_id, pattern_id, COUNT(*) AS total_quantity",
                outer_predicates: filter.source_predicates(),
                group_by: "stage_id, pattern_id",
            },
            |row| {
                Ok(TotalQuantityResultForPatternMatrix {
                    stage_id: row.get(0)?,
                    pattern_id: row.get(1)?,
                    total_quantity: row.get(2)?,
                })
            },
        )
    }

    /// Sum of `times` per stage, optionally counting single-run reports only
    pub fn calc_total_times(
        &self,
        filter: &AggregationFilter,
        stage_ids: &[i64],
        exclude_non_one_times: bool,
    ) -> Result<Vec<TotalTimesResult>> {
        if stage_ids.is_empty() {
            return Ok(Vec::new());
        }

        let mut predicates = filter.report_predicates();
        if exclude_non_one_times {
            predicates.push(Predicate::eq("dr.times", 1i64));
        }
        predicates.push(stage_predicate(stage_ids));

        self.query(
            DerivedQuery {
                cte: None,
                columns: "dr.source_name, dr.stage_id, dr.times",
                from: "drop_reports AS dr",
                predicates,
                outer_columns: "stage_id, SUM(times) AS total_times",
                outer_predicates: filter.source_predicates(),
                group_by: "stage_id",
            },
            |row| {
                Ok(TotalTimesResult {
                    stage_id: row.get(0)?,
                    total_times: row.get(1)?,
                })
            },
        )
    }

    /// Number of reports per (stage, item, quantity)
    pub fn calc_quantity_uniq_count(
        &self,
        filter: &AggregationFilter,
        scope: &StageItemScope,
    ) -> Result<Vec<QuantityUniqCountResult>> {
        if scope.is_empty() {
            return Ok(Vec::new());
        }

        let mut predicates = filter.report_predicates();
        predicates.push(stage_item_predicate(scope));

        self.query(
            DerivedQuery {
                cte: None,
                columns: "dr.source_name, dr.stage_id, dpe.item_id, dpe.quantity",
                from: "drop_reports AS dr \
                       JOIN drop_pattern_elements AS dpe ON dpe.drop_pattern_id = dr.pattern_id",
                predicates,
                outer_columns: "stage_id, item_id, quantity, COUNT(*) AS count",
                outer_predicates: filter.source_predicates(),
                group_by: "stage_id, item_id, quantity",
            },
            |row| {
                Ok(QuantityUniqCountResult {
                    stage_id: row.get(0)?,
                    item_id: row.get(1)?,
                    quantity: row.get(2)?,
                    count: row.get(3)?,
                })
            },
        )
    }

    /// Drop matrix totals split into trend intervals
    ///
    /// The window bounds `created_at`; `filter.time_range` narrows it further
    /// when set.
    pub fn calc_total_quantity_for_trend(
        &self,
        filter: &AggregationFilter,
        window: &TrendWindow,
        scope: &StageItemScope,
    ) -> Result<Vec<TotalQuantityResultForTrend>> {
        if scope.is_empty() || window.is_empty() {
            return Ok(Vec::new());
        }

        let mut predicates = filter.report_predicates();
        predicates.extend(window_predicates(window));
        predicates.push(stage_item_predicate(scope));

        self.query(
            DerivedQuery {
                cte: Some(intervals_cte(window)),
                columns: "dr.source_name, sub.group_id, sub.interval_start, sub.interval_end, \
                          dr.stage_id, dpe.item_id, dpe.quantity",
                from: "drop_reports AS dr \
                       JOIN drop_pattern_elements AS dpe ON dpe.drop_pattern_id = dr.pattern_id \
                       JOIN intervals AS sub \
                       ON dr.created_at >= sub.interval_start AND dr.created_at < sub.interval_end",
                predicates,
                outer_columns: "group_id, interval_start, interval_end, stage_id, item_id, \
                                SUM(quantity) AS total_quantity",
                outer_predicates: filter.source_predicates(),
                group_by: "group_id, interval_start, interval_end, stage_id, item_id",
            },
            |row| {
                Ok(TotalQuantityResultForTrend {
                    group_id: row.get(0)?,
                    interval_start: from_millis(row.get(1)?)?,
                    interval_end: from_millis(row.get(2)?)?,
                    stage_id: row.get(3)?,
                    item_id: row.get(4)?,
                    total_quantity: row.get(5)?,
                })
            },
        )
    }

    /// Total times split into trend intervals
    pub fn calc_total_times_for_trend(
        &self,
        filter: &AggregationFilter,
        window: &TrendWindow,
        stage_ids: &[i64],
    ) -> Result<Vec<TotalTimesResultForTrend>> {
        if stage_ids.is_empty() || window.is_empty() {
            return Ok(Vec::new());
        }

        let mut predicates = filter.report_predicates();
        predicates.extend(window_predicates(window));
        predicates.push(stage_predicate(stage_ids));

        self.query(
            DerivedQuery {
                cte: Some(intervals_cte(window)),
                columns: "dr.source_name, sub.group_id, sub.interval_start, sub.interval_end, \
                          dr.stage_id, dr.times",
                from: "drop_reports AS dr \
                       JOIN intervals AS sub \
                       ON dr.created_at >= sub.interval_start AND dr.created_at < sub.interval_end",
                predicates,
                outer_columns: "group_id, interval_start, interval_end, stage_id, \
                                SUM(times) AS total_times",
                outer_predicates: filter.source_predicates(),
                group_by: "group_id, interval_start, interval_end, stage_id",
            },
            |row| {
                Ok(TotalTimesResultForTrend {
                    group_id: row.get(0)?,
                    interval_start: from_millis(row.get(1)?)?,
                    interval_end: from_millis(row.get(2)?)?,
                    stage_id: row.get(3)?,
                    total_times: row.get(4)?,
                })
            },
        )
    }

    /// Distinct reporting accounts per source over `[since, until)`
    ///
    /// All anonymous reports of a source count as one user. Reliability is
    /// ignored since this measures activity.
    pub fn calc_recent_unique_user_count_by_source(
        &self,
        since: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Result<Vec<UniqueUserCountBySource>> {
        self.query(
            DerivedQuery {
                cte: None,
                columns: "DISTINCT dr.source_name, dr.account_id",
                from: "drop_reports AS dr",
                predicates: vec![
                    Predicate::ge("dr.created_at", to_millis(since)),
                    Predicate::lt("dr.created_at", to_millis(until)),
                ],
                outer_columns: "source_name, COUNT(*) AS count",
                outer_predicates: Vec::new(),
                group_by: "source_name",
            },
            |row| {
                Ok(UniqueUserCountBySource {
                    source_name: row.get(0)?,
                    count: row.get(1)?,
                })
            },
        )
    }

    /// Sanity spent on all trusted reports of a server
    ///
    /// Stages without a known sanity cost contribute nothing.
    pub fn calc_total_sanity_cost_for_site_stats(&self, server: Server) -> Result<i64> {
        let mut sql = String::from(
            "SELECT COALESCE(SUM(st.sanity * dr.times), 0) FROM drop_reports AS dr \
             JOIN stages AS st ON st.stage_id = dr.stage_id",
        );
        let mut params = Vec::new();
        render_where(&site_stats_predicates(server), &mut sql, &mut params);

        let conn = self.db.lock()?;
        let sanity = conn.query_row(&sql, rusqlite::params_from_iter(params.iter()), |row| {
            row.get(0)
        })?;
        Ok(sanity)
    }

    /// Sum of `times` per stage, recruitment excluded
    ///
    /// With `since` set only reports created at or after it count.
    pub fn calc_total_stage_times_for_site_stats(
        &self,
        server: Server,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<TotalStageTimes>> {
        let mut predicates = site_stats_predicates(server);
        predicates.push(Predicate::not_in("st.ark_stage_id", [RECRUIT_STAGE_ID.to_string()]));
        if let Some(since) = since {
            predicates.push(Predicate::ge("dr.created_at", to_millis(since)));
        }

        self.query(
            DerivedQuery {
                cte: None,
                columns: "st.stage_id, st.ark_stage_id, dr.times",
                from: "drop_reports AS dr JOIN stages AS st ON st.stage_id = dr.stage_id",
                predicates,
                outer_columns: "stage_id, ark_stage_id, SUM(times) AS total_times",
                outer_predicates: Vec::new(),
                group_by: "stage_id, ark_stage_id",
            },
            |row| {
                Ok(TotalStageTimes {
                    stage_id: row.get(0)?,
                    ark_stage_id: row.get(1)?,
                    total_times: row.get(2)?,
                })
            },
        )
    }

    /// Sum of dropped quantity per item, limited to `SITE_STATS_ITEM_TYPES`
    pub fn calc_total_item_quantity_for_site_stats(
        &self,
        server: Server,
    ) -> Result<Vec<TotalItemQuantity>> {
        let mut predicates = site_stats_predicates(server);
        predicates.push(Predicate::in_list(
            "it.item_type",
            SITE_STATS_ITEM_TYPES.iter().map(|t| t.to_string()),
        ));

        self.query(
            DerivedQuery {
                cte: None,
                columns: "it.item_id, it.ark_item_id, dpe.quantity",
                from: "drop_reports AS dr \
                       JOIN drop_pattern_elements AS dpe ON dpe.drop_pattern_id = dr.pattern_id \
                       JOIN items AS it ON it.item_id = dpe.item_id",
                predicates,
                outer_columns: "item_id, ark_item_id, SUM(quantity) AS total_quantity",
                outer_predicates: Vec::new(),
                group_by: "item_id, ark_item_id",
            },
            |row| {
                Ok(TotalItemQuantity {
                    item_id: row.get(0)?,
                    ark_item_id: row.get(1)?,
                    total_quantity: row.get(2)?,
                })
            },
        )
    }
}

/// Trusted reports of one server, regardless of account or source
fn site_stats_predicates(server: Server) -> Vec<Predicate> {
    vec![
        Predicate::eq("dr.reliability", RELIABILITY_TRUSTED as i64),
        Predicate::eq("dr.server", server.as_str().to_string()),
    ]
}
