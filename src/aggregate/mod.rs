pub mod engine;
pub mod predicate;
pub mod trend;

pub use engine::{
    AggregationEngine, AggregationFilter, QuantityUniqCountResult,
    TotalQuantityResultForDropMatrix, TotalQuantityResultForPatternMatrix,
    TotalItemQuantity, TotalQuantityResultForTrend, TotalStageTimes, TotalTimesResult,
    TotalTimesResultForTrend, UniqueUserCountBySource, RECRUIT_STAGE_ID, SITE_STATS_ITEM_TYPES,
};
pub use predicate::Predicate;
pub use trend::{TrendInterval, TrendWindow, MAX_TREND_INTERVALS, MAX_TREND_INTERVAL_HOURS};
