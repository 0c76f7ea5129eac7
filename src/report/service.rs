//! End-to-end report submission
//!
//! Verify every single report of a task, then persist the whole task in one
//! transaction: pattern lookup/insert followed by the report row.

use crate::db::Database;
use crate::error::{Result, StoreError};
use crate::report::{DropPatternRepo, ReportRepo};
use crate::types::{NewDropReport, ReportTask, SingleReport, RELIABILITY_TRUSTED};
use crate::verify::{Rejection, VerifierChain, VIOLATION_RELIABILITY_MD5};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;

/// Outcome of one stored report
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmittedReport {
    pub report_id: i64,
    pub stage_id: i64,
    pub reliability: i32,
    pub rejection: Option<Rejection>,
}

pub struct ReportService {
    db: Database,
    reports: Arc<ReportRepo>,
    patterns: DropPatternRepo,
    chain: VerifierChain,
    now_fn: Box<dyn Fn() -> DateTime<Utc> + Send + Sync>,
}

impl ReportService {
    pub fn new(db: Database, reports: Arc<ReportRepo>, chain: VerifierChain) -> Self {
        Self::new_with_timestamp_fn(db, reports, chain, Box::new(Utc::now))
    }

    /// Same as `new` with an injectable clock for `created_at`
    pub fn new_with_timestamp_fn(
        db: Database,
        reports: Arc<ReportRepo>,
        chain: VerifierChain,
        now_fn: Box<dyn Fn() -> DateTime<Utc> + Send + Sync>,
    ) -> Self {
        Self {
            patterns: DropPatternRepo::new(),
            db,
            reports,
            chain,
            now_fn,
        }
    }

    /// Verify and store every report of `task`
    ///
    /// Rejected reports are stored too, with the rejection's reliability.
    /// Either all reports of the task are stored or none are.
    pub async fn submit(&self, task: &ReportTask) -> Result<Vec<SubmittedReport>> {
        if task.reports.is_empty() {
            return Err(StoreError::InvalidArgument(
                "report task contains no reports".to_string(),
            ));
        }

        // The store only knows md5s of earlier tasks, so repeats inside this
        // task are caught here
        let mut seen_md5 = HashSet::new();
        let mut verdicts = Vec::with_capacity(task.reports.len());
        for report in &task.reports {
            let mut verdict = self.chain.verify(report, task).await;
            if let Some(md5) = report_md5(report) {
                if !seen_md5.insert(md5.to_string()) && verdict.is_none() {
                    verdict = Some(Rejection::new(
                        VIOLATION_RELIABILITY_MD5,
                        format!("duplicate report md5 {} within task", md5),
                    ));
                }
            }
            verdicts.push(verdict);
        }

        let created_at = (self.now_fn)();
        let submitted = self.db.in_transaction(|tx| {
            let mut submitted = Vec::with_capacity(task.reports.len());
            for (report, rejection) in task.reports.iter().zip(verdicts) {
                let reliability = rejection
                    .as_ref()
                    .map_or(RELIABILITY_TRUSTED, |r| r.reliability);
                let pattern_id = self.patterns.get_or_create(tx, &report.drops)?;
                let md5 = report_md5(report).map(str::to_string);

                let report_id = self.reports.create(
                    tx,
                    &NewDropReport {
                        account_id: task.account_id,
                        server: task.server,
                        stage_id: report.stage_id,
                        pattern_id,
                        times: report.times,
                        source_name: task.source_name.clone(),
                        version: task.version.clone(),
                        reliability,
                        md5,
                        created_at,
                    },
                )?;

                submitted.push(SubmittedReport {
                    report_id,
                    stage_id: report.stage_id,
                    reliability,
                    rejection,
                });
            }
            Ok(submitted)
        })?;

        let rejected = submitted.iter().filter(|s| s.rejection.is_some()).count();
        log::info!(
            "📝 Stored {} reports from {} on {} ({} rejected)",
            submitted.len(),
            task.source_name,
            task.server.as_str(),
            rejected
        );
        Ok(submitted)
    }

    /// Withdraw a previously submitted report
    pub fn recall(&self, report_id: i64) -> Result<()> {
        self.reports.invalidate(report_id)
    }
}

fn report_md5(report: &SingleReport) -> Option<&str> {
    report
        .metadata
        .as_ref()?
        .md5
        .as_deref()
        .filter(|m| !m.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::account::AccountRepo;
    use crate::refdata::StaticReferenceData;
    use crate::types::{ItemDrop, ReportMetadata, Server, StageItemScope};
    use crate::verify::{
        DropVerifier, Md5Verifier, UserVerifier, VIOLATION_RELIABILITY_DROP,
        VIOLATION_RELIABILITY_USER,
    };
    use chrono::TimeZone;

    struct Fixture {
        service: ReportService,
        reports: Arc<ReportRepo>,
        account_id: i64,
    }

    fn fixture() -> Fixture {
        let db = Database::open_in_memory().unwrap();
        let accounts = Arc::new(AccountRepo::new(db.clone()));
        let account_id = accounts.allocate().unwrap().account_id;
        let reports = Arc::new(ReportRepo::new(db.clone()));

        let mut scope = StageItemScope::new();
        scope.insert(1, vec![30012, 30013]);
        let refdata = Arc::new(StaticReferenceData::new().with_scope(Server::CN, scope));

        let chain = VerifierChain::new()
            .with(UserVerifier::new(accounts))
            .with(DropVerifier::new(refdata))
            .with(Md5Verifier::new(reports.clone()));
        let fixed = Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap();

        Fixture {
            service: ReportService::new_with_timestamp_fn(
                db,
                reports.clone(),
                chain,
                Box::new(move || fixed),
            ),
            reports,
            account_id,
        }
    }

    fn task(account_id: Option<i64>, reports: Vec<SingleReport>) -> ReportTask {
        ReportTask {
            account_id,
            server: Server::CN,
            source_name: "MeoAssistant".to_string(),
            version: "v4.0.0".to_string(),
            reports,
        }
    }

    fn single(drops: Vec<ItemDrop>, md5: Option<&str>) -> SingleReport {
        SingleReport {
            stage_id: 1,
            drops,
            times: 1,
            metadata: md5.map(|m| ReportMetadata {
                md5: Some(m.to_string()),
            }),
        }
    }

    #[tokio::test]
    async fn test_trusted_report_is_stored() {
        let f = fixture();
        let submitted = f
            .service
            .submit(&task(Some(f.account_id), vec![single(vec![ItemDrop::new(30012, 2)], None)]))
            .await
            .unwrap();

        assert_eq!(submitted.len(), 1);
        assert_eq!(submitted[0].reliability, RELIABILITY_TRUSTED);
        assert!(submitted[0].rejection.is_none());

        let stored = f.reports.get_by_id(submitted[0].report_id).unwrap();
        assert_eq!(stored.account_id, Some(f.account_id));
        assert_eq!(stored.created_at, Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap());
    }

    #[tokio::test]
    async fn test_rejected_reports_are_stored_with_tier() {
        let f = fixture();

        let anonymous = f
            .service
            .submit(&task(None, vec![single(vec![], None)]))
            .await
            .unwrap();
        assert_eq!(anonymous[0].reliability, VIOLATION_RELIABILITY_USER);
        assert_eq!(
            f.reports.get_by_id(anonymous[0].report_id).unwrap().reliability,
            VIOLATION_RELIABILITY_USER
        );

        let foreign = f
            .service
            .submit(&task(Some(f.account_id), vec![single(vec![ItemDrop::new(1, 1)], None)]))
            .await
            .unwrap();
        assert_eq!(foreign[0].reliability, VIOLATION_RELIABILITY_DROP);
    }

    #[tokio::test]
    async fn test_duplicate_md5_within_later_task() {
        let f = fixture();
        let first = task(Some(f.account_id), vec![single(vec![], Some("abc123"))]);

        let a = f.service.submit(&first).await.unwrap();
        let b = f.service.submit(&first).await.unwrap();
        assert_eq!(a[0].reliability, RELIABILITY_TRUSTED);
        assert_eq!(b[0].reliability, VIOLATION_RELIABILITY_MD5);

        // Recalling the original frees the md5 again
        f.service.recall(a[0].report_id).unwrap();
        f.service.recall(b[0].report_id).unwrap();
        let c = f.service.submit(&first).await.unwrap();
        assert_eq!(c[0].reliability, RELIABILITY_TRUSTED);
    }

    #[tokio::test]
    async fn test_duplicate_md5_within_one_task() {
        let f = fixture();
        let batch = task(
            Some(f.account_id),
            vec![
                single(vec![ItemDrop::new(30012, 1)], Some("same")),
                single(vec![ItemDrop::new(30012, 1)], Some("same")),
                single(vec![ItemDrop::new(30013, 1)], Some("other")),
                single(vec![], None),
                single(vec![], None),
            ],
        );

        let submitted = f.service.submit(&batch).await.unwrap();
        let reliabilities: Vec<i32> = submitted.iter().map(|s| s.reliability).collect();
        assert_eq!(
            reliabilities,
            vec![
                RELIABILITY_TRUSTED,
                VIOLATION_RELIABILITY_MD5,
                RELIABILITY_TRUSTED,
                RELIABILITY_TRUSTED,
                RELIABILITY_TRUSTED,
            ]
        );
        assert_eq!(
            f.reports.get_by_id(submitted[1].report_id).unwrap().reliability,
            VIOLATION_RELIABILITY_MD5
        );
    }

    #[tokio::test]
    async fn test_empty_task_and_unknown_recall() {
        let f = fixture();
        let err = f.service.submit(&task(Some(f.account_id), vec![])).await.unwrap_err();
        assert!(matches!(err, StoreError::InvalidArgument(_)));
        assert!(f.service.recall(12345).unwrap_err().is_not_found());
    }
}
