use super::{Rejection, Verifier, VIOLATION_RELIABILITY_DROP};
use crate::refdata::ReferenceData;
use crate::types::{ReportTask, SingleReport};
use async_trait::async_trait;
use std::sync::Arc;

/// Most clears a single multi-run report may cover
pub const MAX_TIMES: i64 = 6;

/// Largest plausible quantity of one item in one report
pub const MAX_DROP_QUANTITY: i64 = 1000;

/// Rejects payloads that could not have come from a real stage clear
///
/// Range checks always apply. When the drop info itself cannot be loaded
/// the stage and item checks are skipped, as `Md5Verifier` does for its
/// lookup.
pub struct DropVerifier {
    refdata: Arc<dyn ReferenceData>,
}

impl DropVerifier {
    pub fn new(refdata: Arc<dyn ReferenceData>) -> Self {
        Self { refdata }
    }

    fn check(&self, report: &SingleReport, task: &ReportTask) -> Result<(), String> {
        if !(1..=MAX_TIMES).contains(&report.times) {
            return Err(format!(
                "times {} out of range 1..={}",
                report.times, MAX_TIMES
            ));
        }

        if let Some(drop) = report
            .drops
            .iter()
            .find(|d| !(1..=MAX_DROP_QUANTITY).contains(&d.quantity))
        {
            return Err(format!(
                "quantity {} of item {} out of range 1..={}",
                drop.quantity, drop.item_id, MAX_DROP_QUANTITY
            ));
        }

        let items = match self.refdata.stage_items(task.server, report.stage_id) {
            Ok(Some(items)) => items,
            Ok(None) => {
                return Err(format!(
                    "stage {} has no drop info on {}",
                    report.stage_id,
                    task.server.as_str()
                ))
            }
            Err(e) => {
                log::warn!(
                    "⚠️  drop info lookup for stage {} failed, accepting report: {}",
                    report.stage_id,
                    e
                );
                return Ok(());
            }
        };

        if let Some(drop) = report.drops.iter().find(|d| !items.contains(&d.item_id)) {
            return Err(format!(
                "item {} cannot drop from stage {}",
                drop.item_id, report.stage_id
            ));
        }

        Ok(())
    }
}

#[async_trait]
impl Verifier for DropVerifier {
    fn name(&self) -> &'static str {
        "drop"
    }

    async fn verify(&self, report: &SingleReport, task: &ReportTask) -> Option<Rejection> {
        self.check(report, task)
            .err()
            .map(|message| Rejection::new(VIOLATION_RELIABILITY_DROP, message))
    }
}
