//! Stage/item reference data
//!
//! Aggregations need to know which items each stage can drop. The lookup is
//! passed in explicitly so tests can use `StaticReferenceData`.

use crate::db::Database;
use crate::error::{Result, StoreError};
use crate::types::{Server, StageItemScope};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

pub trait ReferenceData: Send + Sync {
    /// All stages on a server with the items each may drop
    fn drop_scope(&self, server: Server) -> Result<Arc<StageItemScope>>;

    /// Droppable items of one stage, or `None` if the stage is unknown
    fn stage_items(&self, server: Server, stage_id: i64) -> Result<Option<Vec<i64>>> {
        Ok(self.drop_scope(server)?.get(&stage_id).cloned())
    }
}

/// Read-through cache over the `drop_infos` table
///
/// Populated lazily per server; `invalidate` forces a reload on next access.
pub struct SqliteReferenceData {
    db: Database,
    cache: RwLock<HashMap<Server, Arc<StageItemScope>>>,
}

impl SqliteReferenceData {
    pub fn new(db: Database) -> Self {
        Self {
            db,
            cache: RwLock::new(HashMap::new()),
        }
    }

    pub fn invalidate(&self) -> Result<()> {
        self.cache
            .write()
            .map_err(|_| StoreError::LockPoisoned)?
            .clear();
        Ok(())
    }

    fn load(&self, server: Server) -> Result<StageItemScope> {
        let conn = self.db.lock()?;
        let mut stmt = conn.prepare(
            "SELECT DISTINCT stage_id, item_id FROM drop_infos
             WHERE server = ?1 AND item_id IS NOT NULL
             ORDER BY stage_id, item_id",
        )?;

        let rows = stmt.query_map([server.as_str()], |row| {
            Ok((row.get::<_, i64>(0)?, row.get::<_, i64>(1)?))
        })?;

        let mut scope = StageItemScope::new();
        for row in rows {
            let (stage_id, item_id) = row?;
            scope.entry(stage_id).or_default().push(item_id);
        }

        log::debug!(
            "📥 Loaded drop scope for {}: {} stages",
            server.as_str(),
            scope.len()
        );
        Ok(scope)
    }
}

impl ReferenceData for SqliteReferenceData {
    fn drop_scope(&self, server: Server) -> Result<Arc<StageItemScope>> {
        if let Some(scope) = self
            .cache
            .read()
            .map_err(|_| StoreError::LockPoisoned)?
            .get(&server)
        {
            return Ok(scope.clone());
        }

        let scope = Arc::new(self.load(server)?);
        self.cache
            .write()
            .map_err(|_| StoreError::LockPoisoned)?
            .insert(server, scope.clone());
        Ok(scope)
    }
}

/// Fixed in-memory reference data
#[derive(Debug, Clone, Default)]
pub struct StaticReferenceData {
    scopes: HashMap<Server, Arc<StageItemScope>>,
}

impl StaticReferenceData {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_scope(mut self, server: Server, scope: StageItemScope) -> Self {
        self.scopes.insert(server, Arc::new(scope));
        self
    }
}

impl ReferenceData for StaticReferenceData {
    fn drop_scope(&self, server: Server) -> Result<Arc<StageItemScope>> {
        Ok(self.scopes.get(&server).cloned().unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rusqlite::params;

    fn insert_drop_info(db: &Database, server: &str, stage_id: i64, item_id: Option<i64>) {
        db.lock()
            .unwrap()
            .execute(
                "INSERT INTO drop_infos (server, stage_id, item_id) VALUES (?1, ?2, ?3)",
                params![server, stage_id, item_id],
            )
            .unwrap();
    }

    #[test]
    fn test_loads_scope_per_server() {
        let db = Database::open_in_memory().unwrap();
        insert_drop_info(&db, "CN", 1, Some(30012));
        insert_drop_info(&db, "CN", 1, Some(30011));
        insert_drop_info(&db, "CN", 2, Some(30013));
        insert_drop_info(&db, "CN", 2, None);
        insert_drop_info(&db, "US", 1, Some(30012));

        let refdata = SqliteReferenceData::new(db);
        let cn = refdata.drop_scope(Server::CN).unwrap();

        assert_eq!(cn.len(), 2);
        assert_eq!(cn[&1], vec![30011, 30012]);
        assert_eq!(cn[&2], vec![30013]);
        assert_eq!(refdata.drop_scope(Server::US).unwrap().len(), 1);
        assert!(refdata.drop_scope(Server::JP).unwrap().is_empty());
    }

    #[test]
    fn test_cache_is_read_through() {
        let db = Database::open_in_memory().unwrap();
        insert_drop_info(&db, "CN", 1, Some(30012));

        let refdata = SqliteReferenceData::new(db.clone());
        assert_eq!(refdata.drop_scope(Server::CN).unwrap().len(), 1);

        // Cached: new rows are invisible until invalidated
        insert_drop_info(&db, "CN", 7, Some(30012));
        assert_eq!(refdata.drop_scope(Server::CN).unwrap().len(), 1);

        refdata.invalidate().unwrap();
        assert_eq!(refdata.drop_scope(Server::CN).unwrap().len(), 2);
        assert_eq!(refdata.stage_items(Server::CN, 7).unwrap(), Some(vec![30012]));
        assert_eq!(refdata.stage_items(Server::CN, 8).unwrap(), None);
    }

    #[test]
    fn test_static_reference_data() {
        let mut scope = StageItemScope::new();
        scope.insert(10, vec![1, 2]);
        let refdata = StaticReferenceData::new().with_scope(Server::KR, scope);

        assert_eq!(refdata.stage_items(Server::KR, 10).unwrap(), Some(vec![1, 2]));
        assert!(refdata.drop_scope(Server::CN).unwrap().is_empty());
    }
}
