//! Pre-aggregated matrix and trend tables
//!
//! Rows are fully derived from `drop_reports` and rebuilt per
//! (server, source category) scope. A rebuild deletes the scope and inserts
//! the replacement in one transaction, so a reader on another connection
//! sees either the old set or the new one.

pub mod elements;

use crate::db::Database;
use crate::error::{Result, StoreError};
use crate::types::{Server, SourceCategory};
use rusqlite::types::Value;
use std::marker::PhantomData;

pub use elements::{DropMatrixElement, PatternMatrixElement, TrendElement};

/// A row type stored in one of the matrix tables
pub trait MatrixRow: Sized {
    const TABLE: &'static str;

    /// Insert/select column list, `server` and `source_category` included
    const COLUMNS: &'static [&'static str];

    fn server(&self) -> Server;
    fn source_category(&self) -> SourceCategory;

    /// Values in `COLUMNS` order
    fn to_values(&self) -> Result<Vec<Value>>;

    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self>;
}

pub struct MatrixRepo<T> {
    db: Database,
    _row: PhantomData<fn() -> T>,
}

pub type DropMatrixRepo = MatrixRepo<DropMatrixElement>;
pub type PatternMatrixRepo = MatrixRepo<PatternMatrixElement>;
pub type TrendRepo = MatrixRepo<TrendElement>;

impl<T: MatrixRow> MatrixRepo<T> {
    pub fn new(db: Database) -> Self {
        Self {
            db,
            _row: PhantomData,
        }
    }

    /// Atomically replace every row of the (server, category) scope
    ///
    /// All elements must belong to that scope.
    pub fn replace_for_server(
        &self,
        server: Server,
        source_category: SourceCategory,
        elements: &[T],
    ) -> Result<usize> {
        if let Some(stray) = elements
            .iter()
            .find(|e| e.server() != server || e.source_category() != source_category)
        {
            return Err(StoreError::InvalidArgument(format!(
                "{} element for {}/{} in replace of {}/{}",
                T::TABLE,
                stray.server().as_str(),
                stray.source_category().as_str(),
                server.as_str(),
                source_category.as_str()
            )));
        }

        let rows = elements
            .iter()
            .map(T::to_values)
            .collect::<Result<Vec<_>>>()?;

        let insert_sql = format!(
            "INSERT INTO {} ({}) VALUES ({})",
            T::TABLE,
            T::COLUMNS.join(", "),
            vec!["?"; T::COLUMNS.len()].join(", ")
        );

        let deleted = self.db.in_transaction(|tx| {
            let deleted = tx.execute(
                &format!(
                    "DELETE FROM {} WHERE server = ?1 AND source_category = ?2",
                    T::TABLE
                ),
                rusqlite::params![server, source_category],
            )?;

            let mut stmt = tx.prepare_cached(&insert_sql)?;
            for values in &rows {
                stmt.execute(rusqlite::params_from_iter(values.iter()))?;
            }
            Ok(deleted)
        })?;

        log::info!(
            "💾 Replaced {} for {}/{}: {} rows removed, {} rows written",
            T::TABLE,
            server.as_str(),
            source_category.as_str(),
            deleted,
            rows.len()
        );
        Ok(rows.len())
    }

    /// Rows of one scope in insertion order
    pub fn get_by_server_and_source_category(
        &self,
        server: Server,
        source_category: SourceCategory,
    ) -> Result<Vec<T>> {
        let conn = self.db.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM {} WHERE server = ?1 AND source_category = ?2 ORDER BY element_id",
            T::COLUMNS.join(", "),
            T::TABLE
        ))?;
        let rows = stmt.query_map(rusqlite::params![server, source_category], T::from_row)?;
        Ok(rows.collect::<rusqlite::Result<Vec<T>>>()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn element(server: Server, category: SourceCategory, item_id: i64) -> DropMatrixElement {
        DropMatrixElement {
            server,
            stage_id: 1,
            item_id,
            quantity: 10,
            times: 20,
            quantity_buckets: BTreeMap::from([(1, 6), (2, 2)]),
            source_category: category,
            start_time: None,
            end_time: None,
        }
    }

    #[test]
    fn test_replace_only_touches_its_scope() {
        let db = Database::open_in_memory().unwrap();
        let repo = DropMatrixRepo::new(db);

        repo.replace_for_server(
            Server::CN,
            SourceCategory::All,
            &[element(Server::CN, SourceCategory::All, 1)],
        )
        .unwrap();
        repo.replace_for_server(
            Server::CN,
            SourceCategory::Manual,
            &[element(Server::CN, SourceCategory::Manual, 2)],
        )
        .unwrap();
        repo.replace_for_server(
            Server::CN,
            SourceCategory::All,
            &[
                element(Server::CN, SourceCategory::All, 3),
                element(Server::CN, SourceCategory::All, 4),
            ],
        )
        .unwrap();

        let all = repo
            .get_by_server_and_source_category(Server::CN, SourceCategory::All)
            .unwrap();
        assert_eq!(all.iter().map(|e| e.item_id).collect::<Vec<_>>(), vec![3, 4]);
        assert_eq!(all[0], element(Server::CN, SourceCategory::All, 3));

        let manual = repo
            .get_by_server_and_source_category(Server::CN, SourceCategory::Manual)
            .unwrap();
        assert_eq!(manual.len(), 1);
        assert!(repo
            .get_by_server_and_source_category(Server::US, SourceCategory::All)
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_replace_rejects_foreign_rows() {
        let db = Database::open_in_memory().unwrap();
        let repo = DropMatrixRepo::new(db);
        repo.replace_for_server(
            Server::CN,
            SourceCategory::All,
            &[element(Server::CN, SourceCategory::All, 1)],
        )
        .unwrap();

        let err = repo
            .replace_for_server(
                Server::CN,
                SourceCategory::All,
                &[element(Server::JP, SourceCategory::All, 2)],
            )
            .unwrap_err();
        assert!(matches!(err, StoreError::InvalidArgument(_)));

        // Nothing was deleted
        let rows = repo
            .get_by_server_and_source_category(Server::CN, SourceCategory::All)
            .unwrap();
        assert_eq!(rows.len(), 1);
    }
}
