//! Drop patterns: canonical, shared sets of (item, quantity)
//!
//! Two reports with the same drops, in any order, point at the same pattern.

use crate::error::{is_unique_violation, Result};
use crate::types::ItemDrop;
use rusqlite::{params, Connection, OptionalExtension, Transaction};
use std::collections::BTreeMap;

/// Merge drops by item and sort by item id
///
/// Non-positive quantities carry no drop and are left out.
pub fn canonical_elements(drops: &[ItemDrop]) -> Vec<(i64, i64)> {
    let mut merged: BTreeMap<i64, i64> = BTreeMap::new();
    for drop in drops.iter().filter(|d| d.quantity > 0) {
        *merged.entry(drop.item_id).or_default() += drop.quantity;
    }
    merged.into_iter().collect()
}

/// `item:quantity|item:quantity...`; the empty pattern hashes to `""`
pub fn pattern_hash(elements: &[(i64, i64)]) -> String {
    elements
        .iter()
        .map(|(item_id, quantity)| format!("{}:{}", item_id, quantity))
        .collect::<Vec<_>>()
        .join("|")
}

/// Pattern lookups and inserts, always inside the caller's transaction
#[derive(Debug, Default, Clone, Copy)]
pub struct DropPatternRepo;

impl DropPatternRepo {
    pub fn new() -> Self {
        Self
    }

    /// Id of the pattern matching `drops`, inserting it if new
    pub fn get_or_create(&self, tx: &Transaction<'_>, drops: &[ItemDrop]) -> Result<i64> {
        let elements = canonical_elements(drops);
        let hash = pattern_hash(&elements);

        if let Some(pattern_id) = find_by_hash(tx, &hash)? {
            return Ok(pattern_id);
        }

        match tx.execute("INSERT INTO drop_patterns (hash) VALUES (?1)", [&hash]) {
            Ok(_) => {}
            // Another connection inserted it first
            Err(e) if is_unique_violation(&e) => {
                if let Some(pattern_id) = find_by_hash(tx, &hash)? {
                    return Ok(pattern_id);
                }
                return Err(e.into());
            }
            Err(e) => return Err(e.into()),
        }
        let pattern_id = tx.last_insert_rowid();

        {
            let mut stmt = tx.prepare_cached(
                "INSERT INTO drop_pattern_elements (drop_pattern_id, item_id, quantity)
                 VALUES (?1, ?2, ?3)",
            )?;
            for (item_id, quantity) in &elements {
                stmt.execute(params![pattern_id, item_id, quantity])?;
            }
        }

        log::debug!(
            "🧩 New drop pattern {} with {} elements",
            pattern_id,
            elements.len()
        );
        Ok(pattern_id)
    }
}

fn find_by_hash(conn: &Connection, hash: &str) -> Result<Option<i64>> {
    Ok(conn
        .query_row(
            "SELECT pattern_id FROM drop_patterns WHERE hash = ?1",
            [hash],
            |row| row.get(0),
        )
        .optional()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;

    fn stored_elements(db: &Database, pattern_id: i64) -> Vec<(i64, i64)> {
        let conn = db.lock().unwrap();
        let mut stmt = conn
            .prepare(
                "SELECT item_id, quantity FROM drop_pattern_elements
                 WHERE drop_pattern_id = ?1 ORDER BY item_id",
            )
            .unwrap();
        stmt.query_map([pattern_id], |row| Ok((row.get(0)?, row.get(1)?)))
            .unwrap()
            .collect::<rusqlite::Result<Vec<_>>>()
            .unwrap()
    }

    #[test]
    fn test_canonical_elements_merge_and_sort() {
        let drops = vec![
            ItemDrop::new(30013, 1),
            ItemDrop::new(30012, 2),
            ItemDrop::new(30013, 2),
            ItemDrop::new(30014, 0),
        ];
        assert_eq!(canonical_elements(&drops), vec![(30012, 2), (30013, 3)]);
        assert_eq!(pattern_hash(&canonical_elements(&drops)), "30012:2|30013:3");
        assert_eq!(pattern_hash(&[]), "");
    }

    #[test]
    fn test_get_or_create_reuses_patterns() {
        let db = Database::open_in_memory().unwrap();
        let repo = DropPatternRepo::new();

        let (a, b, empty) = db
            .in_transaction(|tx| {
                let a = repo.get_or_create(tx, &[ItemDrop::new(1, 2), ItemDrop::new(2, 1)])?;
                let b = repo.get_or_create(tx, &[ItemDrop::new(2, 1), ItemDrop::new(1, 2)])?;
                let empty = repo.get_or_create(tx, &[])?;
                Ok((a, b, empty))
            })
            .unwrap();

        assert_eq!(a, b);
        assert_ne!(a, empty);
        assert_eq!(stored_elements(&db, a), vec![(1, 2), (2, 1)]);
        assert!(stored_elements(&db, empty).is_empty());
    }
}
