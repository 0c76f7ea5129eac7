use super::{Rejection, Verifier, VIOLATION_RELIABILITY_USER};
use crate::account::AccountRepo;
use crate::types::{ReportTask, SingleReport};
use async_trait::async_trait;
use std::sync::Arc;

pub const MSG_ACCOUNT_ID_EMPTY: &str = "account id is empty";
pub const MSG_ACCOUNT_NOT_FOUND: &str = "account not found with given id";

/// Rejects reports whose task has no account, or an account that does not exist
pub struct UserVerifier {
    accounts: Arc<AccountRepo>,
}

impl UserVerifier {
    pub fn new(accounts: Arc<AccountRepo>) -> Self {
        Self { accounts }
    }
}

#[async_trait]
impl Verifier for UserVerifier {
    fn name(&self) -> &'static str {
        "user"
    }

    async fn verify(&self, _report: &SingleReport, task: &ReportTask) -> Option<Rejection> {
        let Some(account_id) = task.account_id else {
            return Some(Rejection::new(VIOLATION_RELIABILITY_USER, MSG_ACCOUNT_ID_EMPTY));
        };
        if !self.accounts.exists(account_id) {
            return Some(Rejection::new(VIOLATION_RELIABILITY_USER, MSG_ACCOUNT_NOT_FOUND));
        }
        None
    }
}
