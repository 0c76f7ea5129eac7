//! Report verification
//!
//! Verifiers run in a fixed order and the first rejection wins. A rejection
//! does not stop the report from being stored; it only lowers its
//! reliability so aggregations leave it out.

pub mod drop;
pub mod md5;
pub mod user;

use crate::types::{ReportTask, SingleReport};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub use self::drop::DropVerifier;
pub use self::md5::Md5Verifier;
pub use self::user::UserVerifier;

/// Missing or unknown reporting account
pub const VIOLATION_RELIABILITY_USER: i32 = 1;
/// Duplicate screenshot recognition
pub const VIOLATION_RELIABILITY_MD5: i32 = 2;
/// Implausible or out-of-scope drop payload
pub const VIOLATION_RELIABILITY_DROP: i32 = 3;

/// A failed verification, carried as data
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rejection {
    pub reliability: i32,
    pub message: String,
}

impl Rejection {
    pub fn new(reliability: i32, message: impl Into<String>) -> Self {
        Self {
            reliability,
            message: message.into(),
        }
    }
}

#[async_trait]
pub trait Verifier: Send + Sync {
    /// Short name for logging
    fn name(&self) -> &'static str;

    async fn verify(&self, report: &SingleReport, task: &ReportTask) -> Option<Rejection>;
}

/// Ordered list of verifiers, short-circuiting on the first rejection
#[derive(Default)]
pub struct VerifierChain {
    verifiers: Vec<Box<dyn Verifier>>,
}

impl VerifierChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, verifier: impl Verifier + 'static) -> Self {
        self.verifiers.push(Box::new(verifier));
        self
    }

    pub async fn verify(&self, report: &SingleReport, task: &ReportTask) -> Option<Rejection> {
        for verifier in &self.verifiers {
            if let Some(rejection) = verifier.verify(report, task).await {
                log::debug!(
                    "🚫 Report for stage {} rejected by {}: {} (reliability {})",
                    report.stage_id,
                    verifier.name(),
                    rejection.message,
                    rejection.reliability
                );
                return Some(rejection);
            }
        }
        None
    }
}
