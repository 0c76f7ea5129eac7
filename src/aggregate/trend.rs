//! Game-day anchored trend intervals
//!
//! A window of N contiguous `[start, end)` intervals of equal length starting
//! at the game day that contains the requested start instant.

use crate::error::{Result, StoreError};
use crate::gameday;
use crate::types::Server;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Most intervals one window may hold; each interval binds three SQL
/// parameters in the trend queries
pub const MAX_TREND_INTERVALS: usize = 1000;

/// Longest single interval, in hours
pub const MAX_TREND_INTERVAL_HOURS: i64 = 24 * 366;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrendInterval {
    pub group_id: i64,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TrendInterval {
    pub fn contains(&self, t: DateTime<Utc>) -> bool {
        self.start <= t && t < self.end
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrendWindow {
    anchor: DateTime<Utc>,
    interval_length: Duration,
    interval_num: usize,
}

impl TrendWindow {
    /// Build a window anchored at the game day containing `start`
    ///
    /// `interval_num == 0` yields an empty window. Lengths above
    /// `MAX_TREND_INTERVAL_HOURS` and counts above `MAX_TREND_INTERVALS`
    /// are rejected.
    pub fn new(
        server: Server,
        start: DateTime<Utc>,
        interval_length: Duration,
        interval_num: usize,
    ) -> Result<Self> {
        if interval_length <= Duration::zero() {
            return Err(StoreError::InvalidArgument(format!(
                "trend interval length must be positive, got {}",
                interval_length
            )));
        }
        if interval_length > Duration::hours(MAX_TREND_INTERVAL_HOURS) {
            return Err(StoreError::InvalidArgument(format!(
                "trend interval length must be at most {}h, got {}",
                MAX_TREND_INTERVAL_HOURS, interval_length
            )));
        }
        if interval_num > MAX_TREND_INTERVALS {
            return Err(StoreError::InvalidArgument(format!(
                "at most {} trend intervals, got {}",
                MAX_TREND_INTERVALS, interval_num
            )));
        }

        Ok(Self {
            anchor: gameday::start_time(server, start),
            interval_length,
            interval_num,
        })
    }

    pub fn anchor(&self) -> DateTime<Utc> {
        self.anchor
    }

    pub fn interval_length(&self) -> Duration {
        self.interval_length
    }

    pub fn interval_num(&self) -> usize {
        self.interval_num
    }

    pub fn is_empty(&self) -> bool {
        self.interval_num == 0
    }

    /// Exclusive end of the last interval
    pub fn end(&self) -> DateTime<Utc> {
        self.anchor + self.span()
    }

    /// Total length covered by all intervals
    pub fn span(&self) -> Duration {
        // Bounded by MAX_TREND_INTERVALS, so the cast is lossless
        self.interval_length * self.interval_num as i32
    }

    pub fn intervals(&self) -> Vec<TrendInterval> {
        (0..self.interval_num)
            .map(|i| {
                let start = self.anchor + self.interval_length * i as i32;
                TrendInterval {
                    group_id: i as i64,
                    start,
                    end: start + self.interval_length,
                }
            })
            .collect()
    }

    /// Group id of the interval containing `t`, if any
    pub fn group_of(&self, t: DateTime<Utc>) -> Option<i64> {
        if t < self.anchor || t >= self.end() {
            return None;
        }
        let offset = (t - self.anchor).num_milliseconds();
        Some(offset.div_euclid(self.interval_length.num_milliseconds()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn cn_window(n: usize) -> TrendWindow {
        // 2024-01-01 20:00 UTC is a CN reset instant
        let start = Utc.with_ymd_and_hms(2024, 1, 2, 3, 0, 0).unwrap();
        TrendWindow::new(Server::CN, start, Duration::hours(24), n).unwrap()
    }

    #[test]
    fn test_anchor_is_game_day_start() {
        let window = cn_window(3);
        assert_eq!(window.anchor(), Utc.with_ymd_and_hms(2024, 1, 1, 20, 0, 0).unwrap());
        assert_eq!(window.end(), window.anchor() + Duration::hours(72));
    }

    #[test]
    fn test_intervals_are_contiguous() {
        let window = cn_window(5);
        let intervals = window.intervals();

        assert_eq!(intervals.len(), 5);
        assert_eq!(intervals[0].start, window.anchor());
        assert_eq!(intervals[4].end, window.end());
        for (i, pair) in intervals.windows(2).enumerate() {
            assert_eq!(pair[0].end, pair[1].start);
            assert_eq!(pair[0].group_id, i as i64);
        }
    }

    #[test]
    fn test_boundary_belongs_to_later_interval() {
        let window = cn_window(3);
        let intervals = window.intervals();
        let seam = intervals[0].end;

        assert!(!intervals[0].contains(seam));
        assert!(intervals[1].contains(seam));
        assert_eq!(window.group_of(seam), Some(1));
        assert_eq!(window.group_of(seam - Duration::milliseconds(1)), Some(0));
    }

    #[test]
    fn test_outside_window_has_no_group() {
        let window = cn_window(3);
        assert_eq!(window.group_of(window.anchor() - Duration::milliseconds(1)), None);
        assert_eq!(window.group_of(window.end()), None);
        assert_eq!(window.group_of(window.anchor()), Some(0));
    }

    #[test]
    fn test_empty_and_invalid_windows() {
        let window = cn_window(0);
        assert!(window.is_empty());
        assert!(window.intervals().is_empty());
        assert_eq!(window.end(), window.anchor());

        let err = TrendWindow::new(Server::CN, Utc::now(), Duration::zero(), 3).unwrap_err();
        assert!(matches!(err, StoreError::InvalidArgument(_)));
    }

    #[test]
    fn test_oversized_windows_rejected() {
        let now = Utc::now();
        let too_many = TrendWindow::new(Server::CN, now, Duration::hours(1), MAX_TREND_INTERVALS + 1);
        assert!(matches!(too_many, Err(StoreError::InvalidArgument(_))));

        let too_long = TrendWindow::new(
            Server::CN,
            now,
            Duration::hours(MAX_TREND_INTERVAL_HOURS + 1),
            1,
        );
        assert!(matches!(too_long, Err(StoreError::InvalidArgument(_))));

        let widest = TrendWindow::new(
            Server::CN,
            now,
            Duration::hours(MAX_TREND_INTERVAL_HOURS),
            MAX_TREND_INTERVALS,
        )
        .unwrap();
        assert_eq!(widest.intervals().len(), MAX_TREND_INTERVALS);
    }
}
