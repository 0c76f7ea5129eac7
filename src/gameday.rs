//! Game-day boundaries per server
//!
//! A game day starts at the daily reset, 04:00 in the server's local time,
//! not at calendar midnight.

use crate::types::Server;
use chrono::{DateTime, Duration, NaiveTime, TimeZone, Utc};

/// Hour of the daily reset, server-local
pub const RESET_HOUR: i64 = 4;

/// Start of the game day containing `t` on `server`
pub fn start_time(server: Server, t: DateTime<Utc>) -> DateTime<Utc> {
    let offset = Duration::seconds(server.utc_offset_secs());
    let reset = Duration::hours(RESET_HOUR);

    let shifted_local = t.naive_utc() + offset - reset;
    let day_start_local = shifted_local.date().and_time(NaiveTime::MIN) + reset;

    Utc.from_utc_datetime(&(day_start_local - offset))
}

/// Start of the game day after the one containing `t`
pub fn next_start_time(server: Server, t: DateTime<Utc>) -> DateTime<Utc> {
    start_time(server, t) + Duration::days(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn utc(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, s).unwrap()
    }

    #[test]
    fn test_cn_reset_boundary() {
        // 04:00 CST == 20:00 UTC the previous day
        let before = utc(2024, 1, 1, 19, 59, 59);
        let at = utc(2024, 1, 1, 20, 0, 0);

        assert_eq!(start_time(Server::CN, before), utc(2023, 12, 31, 20, 0, 0));
        assert_eq!(start_time(Server::CN, at), at);
    }

    #[test]
    fn test_us_reset_boundary() {
        // 04:00 UTC-7 == 11:00 UTC same day
        let t = utc(2024, 3, 10, 10, 0, 0);
        assert_eq!(start_time(Server::US, t), utc(2024, 3, 9, 11, 0, 0));

        let t = utc(2024, 3, 10, 11, 0, 0);
        assert_eq!(start_time(Server::US, t), t);
    }

    #[test]
    fn test_jp_and_kr_share_reset() {
        let t = utc(2024, 6, 1, 12, 0, 0);
        assert_eq!(start_time(Server::JP, t), start_time(Server::KR, t));
        assert_eq!(start_time(Server::JP, t), utc(2024, 5, 31, 19, 0, 0));
    }

    #[test]
    fn test_start_time_is_idempotent() {
        for server in Server::all() {
            let t = utc(2024, 2, 29, 7, 13, 0);
            let start = start_time(server, t);
            assert!(start <= t);
            assert!(t < next_start_time(server, t));
            assert_eq!(start_time(server, start), start);
        }
    }
}
