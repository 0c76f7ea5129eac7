//! Drop-report verification and matrix aggregation
//!
//! Reports are verified by a `verify::VerifierChain`, stored through
//! `report::ReportService`, and periodically compacted into matrix and trend
//! tables by `compaction::MatrixCompactor`.

pub mod account;
pub mod aggregate;
pub mod compaction;
pub mod config;
pub mod db;
pub mod error;
pub mod gameday;
pub mod matrix;
pub mod refdata;
pub mod report;
pub mod sqlite_pragma;
pub mod types;
pub mod verify;

pub use db::Database;
pub use error::{Result, StoreError};
