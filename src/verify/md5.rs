use super::{Rejection, Verifier, VIOLATION_RELIABILITY_MD5};
use crate::report::ReportRepo;
use crate::types::{ReportTask, SingleReport};
use async_trait::async_trait;
use std::sync::Arc;

/// Longest md5 a client may send (hex digest)
pub const MAX_MD5_LEN: usize = 32;

/// Rejects a screenshot recognition that was already reported
///
/// Reports without an md5 pass. A store failure during the lookup also
/// passes; duplicates are a data-quality concern, not a hard fault.
pub struct Md5Verifier {
    reports: Arc<ReportRepo>,
}

impl Md5Verifier {
    pub fn new(reports: Arc<ReportRepo>) -> Self {
        Self { reports }
    }
}

#[async_trait]
impl Verifier for Md5Verifier {
    fn name(&self) -> &'static str {
        "md5"
    }

    async fn verify(&self, report: &SingleReport, _task: &ReportTask) -> Option<Rejection> {
        let md5 = report.metadata.as_ref()?.md5.as_deref()?;
        if md5.is_empty() {
            return None;
        }
        if md5.len() > MAX_MD5_LEN {
            return Some(Rejection::new(
                VIOLATION_RELIABILITY_MD5,
                format!("md5 longer than {} characters", MAX_MD5_LEN),
            ));
        }

        match self.reports.exists_by_md5(md5) {
            Ok(true) => Some(Rejection::new(
                VIOLATION_RELIABILITY_MD5,
                format!("duplicate report md5 {}", md5),
            )),
            Ok(false) => None,
            Err(e) => {
                log::warn!("⚠️  md5 lookup failed, accepting report: {}", e);
                None
            }
        }
    }
}
