//! Anonymous account allocation and lookup
//!
//! Penguin IDs created before the 9-digit scheme are 8 digits long; both
//! widths stay valid for lookup, but new allocations are always 9 digits and
//! may start with 0.

use crate::db::Database;
use crate::error::{is_unique_violation, Result, StoreError};
use crate::types::{from_millis, to_millis, Account};
use chrono::Utc;
use rand::Rng;
use rusqlite::{params, OptionalExtension};

/// Upper bound on insert attempts before giving up
pub const ACCOUNT_MAX_RETRIES: u32 = 100;

/// Draw a uniformly random 9-digit penguin id
pub fn generate_random_penguin_id() -> String {
    let n: u32 = rand::thread_rng().gen_range(0..1_000_000_000);
    format!("{:09}", n)
}

/// True for 8 (legacy) or 9 digit ASCII decimal ids
pub fn is_well_formed_penguin_id(s: &str) -> bool {
    (s.len() == 8 || s.len() == 9) && s.bytes().all(|b| b.is_ascii_digit())
}

pub struct AccountRepo {
    db: Database,

    /// Candidate id generator (random in production, scripted in tests)
    id_fn: Box<dyn Fn() -> String + Send + Sync>,
}

impl AccountRepo {
    pub fn new(db: Database) -> Self {
        Self::with_id_fn(db, Box::new(generate_random_penguin_id))
    }

    pub fn with_id_fn(db: Database, id_fn: Box<dyn Fn() -> String + Send + Sync>) -> Self {
        Self { db, id_fn }
    }

    /// Create an account with a fresh random penguin id
    ///
    /// Concurrent allocators race on the UNIQUE constraint; a collision simply
    /// draws a new candidate. The connection is released between attempts.
    pub fn allocate(&self) -> Result<Account> {
        for attempt in 0..ACCOUNT_MAX_RETRIES {
            let penguin_id = (self.id_fn)();
            let created_at = Utc::now();

            let inserted = {
                let conn = self.db.lock()?;
                conn.execute(
                    "INSERT INTO accounts (penguin_id, created_at) VALUES (?1, ?2)",
                    params![penguin_id, to_millis(created_at)],
                )
                .map(|_| conn.last_insert_rowid())
            };

            match inserted {
                Ok(account_id) => {
                    if attempt > 0 {
                        log::info!(
                            "✅ Created account after {} retries (penguin_id={})",
                            attempt,
                            penguin_id
                        );
                    }
                    return Ok(Account {
                        account_id,
                        penguin_id,
                        created_at: from_millis(to_millis(created_at))?,
                    });
                }
                Err(e) if is_unique_violation(&e) => {
                    log::warn!(
                        "⚠️  Penguin id collision on attempt {}, retrying: {}",
                        attempt,
                        e
                    );
                }
                Err(e) => return Err(e.into()),
            }
        }

        log::error!(
            "❌ Failed to create account: {} attempts exhausted",
            ACCOUNT_MAX_RETRIES
        );
        Err(StoreError::AllocationExhausted(ACCOUNT_MAX_RETRIES))
    }

    pub fn get_by_id(&self, account_id: i64) -> Result<Account> {
        let conn = self.db.lock()?;
        conn.query_row(
            "SELECT account_id, penguin_id, created_at FROM accounts WHERE account_id = ?1",
            [account_id],
            map_account,
        )
        .optional()?
        .ok_or_else(|| StoreError::not_found(format!("account {}", account_id)))
    }

    /// Look up an account by its external handle (penguin id)
    pub fn resolve_by_penguin_id(&self, penguin_id: &str) -> Result<Account> {
        let conn = self.db.lock()?;
        conn.query_row(
            "SELECT account_id, penguin_id, created_at FROM accounts WHERE penguin_id = ?1",
            [penguin_id],
            map_account,
        )
        .optional()?
        .ok_or_else(|| StoreError::not_found(format!("account with penguin id {}", penguin_id)))
    }

    /// Whether an account with this id exists
    ///
    /// Any store error is reported as "does not exist". Callers relying on
    /// this for rejection decisions will demote reports during an outage.
    pub fn exists(&self, account_id: i64) -> bool {
        match self.get_by_id(account_id) {
            Ok(account) => account.account_id > 0,
            Err(e) => {
                if !e.is_not_found() {
                    log::debug!("Account existence check failed for {}: {}", account_id, e);
                }
                false
            }
        }
    }
}

fn map_account(row: &rusqlite::Row<'_>) -> rusqlite::Result<Account> {
    Ok(Account {
        account_id: row.get(0)?,
        penguin_id: row.get(1)?,
        created_at: from_millis(row.get(2)?)?,
    })
}
