//! One compaction pass: rebuild the matrix and trend tables of a scope
//!
//! The pass reads the current report set through `AggregationEngine` and
//! replaces the drop matrix, pattern matrix and trend rows of one
//! (server, source category) scope.

use crate::aggregate::{AggregationEngine, AggregationFilter, TrendWindow};
use crate::db::Database;
use crate::error::{Result, StoreError};
use crate::gameday;
use crate::matrix::{
    DropMatrixElement, DropMatrixRepo, PatternMatrixElement, PatternMatrixRepo, TrendElement,
    TrendRepo,
};
use crate::refdata::ReferenceData;
use crate::types::{Server, SourceCategory, StageItemScope};
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

/// Row counts written by one pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CompactionSummary {
    pub drop_matrix_rows: usize,
    pub pattern_matrix_rows: usize,
    pub trend_rows: usize,
}

pub struct MatrixCompactor {
    engine: AggregationEngine,
    refdata: Arc<dyn ReferenceData>,
    drop_matrix: DropMatrixRepo,
    pattern_matrix: PatternMatrixRepo,
    trends: TrendRepo,
    trend_interval_length: Duration,
    trend_interval_num: usize,
}

impl MatrixCompactor {
    pub fn new(
        db: Database,
        refdata: Arc<dyn ReferenceData>,
        trend_interval_length: Duration,
        trend_interval_num: usize,
    ) -> Self {
        Self {
            engine: AggregationEngine::new(db.clone()),
            refdata,
            drop_matrix: DropMatrixRepo::new(db.clone()),
            pattern_matrix: PatternMatrixRepo::new(db.clone()),
            trends: TrendRepo::new(db),
            trend_interval_length,
            trend_interval_num,
        }
    }

    /// Trend window ending at the end of the game day containing `now`
    ///
    /// The intervals must add up to whole game days, otherwise the anchor
    /// could not sit on a game-day start while the last interval still ends
    /// at the next reset.
    pub fn trend_window(&self, server: Server, now: DateTime<Utc>) -> Result<TrendWindow> {
        let end = gameday::next_start_time(server, now);
        let span = TrendWindow::new(
            server,
            end,
            self.trend_interval_length,
            self.trend_interval_num,
        )?
        .span();

        if span.num_milliseconds() % Duration::days(1).num_milliseconds() != 0 {
            return Err(StoreError::InvalidArgument(format!(
                "{} trend intervals of {}h do not cover whole game days",
                self.trend_interval_num,
                self.trend_interval_length.num_hours()
            )));
        }

        TrendWindow::new(
            server,
            end - span,
            self.trend_interval_length,
            self.trend_interval_num,
        )
    }

    /// Rebuild drop matrix, pattern matrix and trends of one scope
    pub fn run(
        &self,
        server: Server,
        source_category: SourceCategory,
        now: DateTime<Utc>,
    ) -> Result<CompactionSummary> {
        let matrices = self.run_matrices(server, source_category)?;
        let trend_rows = self.run_trends(server, source_category, now)?;
        Ok(CompactionSummary {
            trend_rows,
            ..matrices
        })
    }

    /// Rebuild the drop and pattern matrices of one scope
    pub fn run_matrices(
        &self,
        server: Server,
        source_category: SourceCategory,
    ) -> Result<CompactionSummary> {
        let scope = self.refdata.drop_scope(server)?;
        let filter = AggregationFilter::new(server).with_source_category(source_category);

        log::info!(
            "🔄 Compacting matrices for {}/{} ({} stages in scope)",
            server.as_str(),
            source_category.as_str(),
            scope.len()
        );

        let drop_rows = self.build_drop_matrix(&filter, &scope)?;
        let pattern_rows = self.build_pattern_matrix(&filter, &scope)?;

        let summary = CompactionSummary {
            drop_matrix_rows: self
                .drop_matrix
                .replace_for_server(server, source_category, &drop_rows)?,
            pattern_matrix_rows: self
                .pattern_matrix
                .replace_for_server(server, source_category, &pattern_rows)?,
            trend_rows: 0,
        };

        log::info!(
            "✅ Matrices {}/{} done: {} drop rows, {} pattern rows",
            server.as_str(),
            source_category.as_str(),
            summary.drop_matrix_rows,
            summary.pattern_matrix_rows
        );
        Ok(summary)
    }

    /// Rebuild the trend rows of one scope, returning the row count
    pub fn run_trends(
        &self,
        server: Server,
        source_category: SourceCategory,
        now: DateTime<Utc>,
    ) -> Result<usize> {
        let scope = self.refdata.drop_scope(server)?;
        let filter = AggregationFilter::new(server).with_source_category(source_category);

        let trend_rows = self.build_trends(&filter, &scope, now)?;
        let written = self
            .trends
            .replace_for_server(server, source_category, &trend_rows)?;

        log::info!(
            "✅ Trends {}/{} done: {} rows",
            server.as_str(),
            source_category.as_str(),
            written
        );
        Ok(written)
    }

    fn build_drop_matrix(
        &self,
        filter: &AggregationFilter,
        scope: &StageItemScope,
    ) -> Result<Vec<DropMatrixElement>> {
        let stage_ids: Vec<i64> = scope.keys().copied().collect();

        let times: HashMap<i64, i64> = self
            .engine
            .calc_total_times(filter, &stage_ids, false)?
            .into_iter()
            .map(|r| (r.stage_id, r.total_times))
            .collect();
        let quantities: HashMap<(i64, i64), i64> = self
            .engine
            .calc_total_quantity_for_drop_matrix(filter, scope)?
            .into_iter()
            .map(|r| ((r.stage_id, r.item_id), r.total_quantity))
            .collect();

        let mut buckets: HashMap<(i64, i64), BTreeMap<i64, i64>> = HashMap::new();
        for r in self.engine.calc_quantity_uniq_count(filter, scope)? {
            buckets
                .entry((r.stage_id, r.item_id))
                .or_default()
                .insert(r.quantity, r.count);
        }

        let mut elements = Vec::new();
        for (stage_id, item_ids) in scope {
            let Some(&stage_times) = times.get(stage_id) else {
                continue;
            };
            for item_id in item_ids {
                let key = (*stage_id, *item_id);
                elements.push(DropMatrixElement {
                    server: filter.server,
                    stage_id: *stage_id,
                    item_id: *item_id,
                    quantity: quantities.get(&key).copied().unwrap_or(0),
                    times: stage_times,
                    quantity_buckets: buckets.remove(&key).unwrap_or_default(),
                    source_category: filter.source_category,
                    start_time: None,
                    end_time: None,
                });
            }
        }
        Ok(elements)
    }

    fn build_pattern_matrix(
        &self,
        filter: &AggregationFilter,
        scope: &StageItemScope,
    ) -> Result<Vec<PatternMatrixElement>> {
        let stage_ids: Vec<i64> = scope.keys().copied().collect();

        let single_run_times: HashMap<i64, i64> = self
            .engine
            .calc_total_times(filter, &stage_ids, true)?
            .into_iter()
            .map(|r| (r.stage_id, r.total_times))
            .collect();

        Ok(self
            .engine
            .calc_total_quantity_for_pattern_matrix(filter, &stage_ids)?
            .into_iter()
            .map(|r| PatternMatrixElement {
                server: filter.server,
                stage_id: r.stage_id,
                pattern_id: r.pattern_id,
                quantity: r.total_quantity,
                times: single_run_times.get(&r.stage_id).copied().unwrap_or(0),
                source_category: filter.source_category,
                start_time: None,
                end_time: None,
            })
            .collect())
    }

    fn build_trends(
        &self,
        filter: &AggregationFilter,
        scope: &StageItemScope,
        now: DateTime<Utc>,
    ) -> Result<Vec<TrendElement>> {
        let window = self.trend_window(filter.server, now)?;
        let stage_ids: Vec<i64> = scope.keys().copied().collect();

        let quantities: HashMap<(i64, i64, i64), i64> = self
            .engine
            .calc_total_quantity_for_trend(filter, &window, scope)?
            .into_iter()
            .map(|r| ((r.group_id, r.stage_id, r.item_id), r.total_quantity))
            .collect();

        let mut elements = Vec::new();
        for times in self
            .engine
            .calc_total_times_for_trend(filter, &window, &stage_ids)?
        {
            let Some(item_ids) = scope.get(&times.stage_id) else {
                continue;
            };
            for item_id in item_ids {
                elements.push(TrendElement {
                    server: filter.server,
                    stage_id: times.stage_id,
                    item_id: *item_id,
                    group_id: times.group_id,
                    start_time: times.interval_start,
                    end_time: times.interval_end,
                    quantity: quantities
                        .get(&(times.group_id, times.stage_id, *item_id))
                        .copied()
                        .unwrap_or(0),
                    times: times.total_times,
                    source_category: filter.source_category,
                });
            }
        }
        Ok(elements)
    }
}
