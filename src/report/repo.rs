//! Write path and lookups for `drop_reports`
//!
//! Reports are append-only; `reliability` is the only column ever updated.

use crate::db::Database;
use crate::error::{Result, StoreError};
use crate::types::{from_millis, to_millis, DropReport, NewDropReport, RELIABILITY_INVALIDATED};
use rusqlite::{params, OptionalExtension, Transaction};

const REPORT_COLUMNS: &str = "report_id, account_id, server, stage_id, pattern_id, times, \
                              source_name, version, reliability, md5, created_at";

pub struct ReportRepo {
    db: Database,
}

impl ReportRepo {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Insert a report inside the caller's transaction, returning its id
    pub fn create(&self, tx: &Transaction<'_>, report: &NewDropReport) -> Result<i64> {
        tx.execute(
            "INSERT INTO drop_reports
             (account_id, server, stage_id, pattern_id, times, source_name, version,
              reliability, md5, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                report.account_id,
                report.server,
                report.stage_id,
                report.pattern_id,
                report.times,
                report.source_name,
                report.version,
                report.reliability,
                report.md5,
                to_millis(report.created_at),
            ],
        )?;
        Ok(tx.last_insert_rowid())
    }

    /// Soft-delete a report
    pub fn invalidate(&self, report_id: i64) -> Result<()> {
        let updated = self.db.lock()?.execute(
            "UPDATE drop_reports SET reliability = ?1 WHERE report_id = ?2",
            params![RELIABILITY_INVALIDATED, report_id],
        )?;
        if updated == 0 {
            return Err(StoreError::not_found(format!("report {}", report_id)));
        }

        log::info!("🗑️  Invalidated report {}", report_id);
        Ok(())
    }

    pub fn revise_reliability(
        &self,
        tx: &Transaction<'_>,
        report_id: i64,
        reliability: i32,
    ) -> Result<()> {
        let updated = tx.execute(
            "UPDATE drop_reports SET reliability = ?1 WHERE report_id = ?2",
            params![reliability, report_id],
        )?;
        if updated == 0 {
            return Err(StoreError::not_found(format!("report {}", report_id)));
        }
        Ok(())
    }

    pub fn get_by_id(&self, report_id: i64) -> Result<DropReport> {
        let conn = self.db.lock()?;
        conn.query_row(
            &format!("SELECT {} FROM drop_reports WHERE report_id = ?1", REPORT_COLUMNS),
            [report_id],
            map_report,
        )
        .optional()?
        .ok_or_else(|| StoreError::not_found(format!("report {}", report_id)))
    }

    /// Whether a non-invalidated report already carries this md5
    pub fn exists_by_md5(&self, md5: &str) -> Result<bool> {
        let conn = self.db.lock()?;
        let found = conn
            .query_row(
                "SELECT 1 FROM drop_reports WHERE md5 = ?1 AND reliability >= 0 LIMIT 1",
                [md5],
                |_| Ok(()),
            )
            .optional()?;
        Ok(found.is_some())
    }
}

fn map_report(row: &rusqlite::Row<'_>) -> rusqlite::Result<DropReport> {
    Ok(DropReport {
        report_id: row.get(0)?,
        account_id: row.get(1)?,
        server: row.get(2)?,
        stage_id: row.get(3)?,
        pattern_id: row.get(4)?,
        times: row.get(5)?,
        source_name: row.get(6)?,
        version: row.get(7)?,
        reliability: row.get(8)?,
        md5: row.get(9)?,
        created_at: from_millis(row.get(10)?)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::pattern::DropPatternRepo;
    use crate::types::{Server, RELIABILITY_TRUSTED};
    use chrono::{TimeZone, Utc};

    fn new_report(pattern_id: i64, md5: Option<&str>) -> NewDropReport {
        NewDropReport {
            account_id: Some(7),
            server: Server::US,
            stage_id: 42,
            pattern_id,
            times: 1,
            source_name: "MeoAssistant".to_string(),
            version: "v4.0.0".to_string(),
            reliability: RELIABILITY_TRUSTED,
            md5: md5.map(str::to_string),
            created_at: Utc.with_ymd_and_hms(2024, 4, 1, 8, 0, 0).unwrap(),
        }
    }

    fn insert(db: &Database, md5: Option<&str>) -> i64 {
        let patterns = DropPatternRepo::new();
        let reports = ReportRepo::new(db.clone());
        db.in_transaction(|tx| {
            let pattern_id = patterns.get_or_create(tx, &[])?;
            reports.create(tx, &new_report(pattern_id, md5))
        })
        .unwrap()
    }

    #[test]
    fn test_create_and_get() {
        let db = Database::open_in_memory().unwrap();
        let report_id = insert(&db, Some("abc"));

        let report = ReportRepo::new(db).get_by_id(report_id).unwrap();
        assert_eq!(report.report_id, report_id);
        assert_eq!(report.server, Server::US);
        assert_eq!(report.version, "v4.0.0");
        assert_eq!(report.md5.as_deref(), Some("abc"));
        assert_eq!(report.created_at, Utc.with_ymd_and_hms(2024, 4, 1, 8, 0, 0).unwrap());
    }

    #[test]
    fn test_invalidate_changes_only_reliability() {
        let db = Database::open_in_memory().unwrap();
        let report_id = insert(&db, Some("abc"));
        let repo = ReportRepo::new(db);

        let before = repo.get_by_id(report_id).unwrap();
        repo.invalidate(report_id).unwrap();
        let after = repo.get_by_id(report_id).unwrap();

        assert_eq!(after.reliability, RELIABILITY_INVALIDATED);
        assert_eq!(DropReport { reliability: before.reliability, ..after }, before);
        assert!(repo.invalidate(report_id + 1).unwrap_err().is_not_found());
    }

    #[test]
    fn test_revise_reliability() {
        let db = Database::open_in_memory().unwrap();
        let report_id = insert(&db, None);
        let repo = ReportRepo::new(db.clone());

        db.in_transaction(|tx| repo.revise_reliability(tx, report_id, 3)).unwrap();
        assert_eq!(repo.get_by_id(report_id).unwrap().reliability, 3);

        let missing = db.in_transaction(|tx| repo.revise_reliability(tx, 999, 3));
        assert!(missing.unwrap_err().is_not_found());
    }

    #[test]
    fn test_exists_by_md5_ignores_invalidated() {
        let db = Database::open_in_memory().unwrap();
        let report_id = insert(&db, Some("deadbeef"));
        let repo = ReportRepo::new(db);

        assert!(repo.exists_by_md5("deadbeef").unwrap());
        assert!(!repo.exists_by_md5("cafebabe").unwrap());

        repo.invalidate(report_id).unwrap();
        assert!(!repo.exists_by_md5("deadbeef").unwrap());
    }
}
