//! Model set key/identifier resolution with an in-process cache
//!
//! Model sets are never renamed or deleted, so a cached entry never goes stale.

use crate::db::model_sets::{find_model_set_by_id, get_or_create_model_set};
use livedb_common::db::ModelSet;
use livedb_common::Result;
use sqlx::{Pool, Sqlite};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

#[derive(Default)]
struct Cache {
    by_key: HashMap<String, ModelSet>,
    key_by_id: HashMap<i64, String>,
}

impl Cache {
    fn insert(&mut self, model_set: ModelSet) {
        self.key_by_id.insert(model_set.id, model_set.key.clone());
        self.by_key.insert(model_set.key.clone(), model_set);
    }
}

/// Resolves model set keys to identifiers, creating model sets on first use
#[derive(Clone)]
pub struct ModelSetRegistry {
    db: Pool<Sqlite>,
    cache: Arc<RwLock<Cache>>,
}

impl ModelSetRegistry {
    pub fn new(db: Pool<Sqlite>) -> Self {
        Self {
            db,
            cache: Arc::new(RwLock::new(Cache::default())),
        }
    }

    /// Get or create the model set with this key
    pub async fn resolve(&self, key: &str) -> Result<ModelSet> {
        if let Some(model_set) = self.cache.read().await.by_key.get(key) {
            return Ok(model_set.clone());
        }

        let model_set = get_or_create_model_set(&self.db, key).await?;
        self.cache.write().await.insert(model_set.clone());

        Ok(model_set)
    }

    /// Cache a model set resolved by a caller's committed transaction
    pub async fn remember(&self, model_set: ModelSet) {
        self.cache.write().await.insert(model_set);
    }

    /// Key of the model set with this identifier, `None` if it does not exist
    pub async fn key_for_id(&self, id: i64) -> Result<Option<String>> {
        if let Some(key) = self.cache.read().await.key_by_id.get(&id) {
            return Ok(Some(key.clone()));
        }

        match find_model_set_by_id(&self.db, id).await? {
            Some(model_set) => {
                let key = model_set.key.clone();
                self.cache.write().await.insert(model_set);
                Ok(Some(key))
            }
            None => Ok(None),
        }
    }

    /// Number of cached model sets
    pub async fn cached_count(&self) -> usize {
        self.cache.read().await.by_key.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use livedb_common::db::init_memory_database;

    #[tokio::test]
    async fn test_resolve_caches_and_creates_once() {
        let pool = init_memory_database().await.unwrap();
        let registry = ModelSetRegistry::new(pool.clone());

        let first = registry.resolve("siteA").await.unwrap();
        let second = registry.resolve("siteA").await.unwrap();
        assert_eq!(first, second);
        assert_eq!(registry.cached_count().await, 1);

        let rows: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM live_db_model_set")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(rows, 1);
    }

    #[tokio::test]
    async fn test_key_for_id() {
        let pool = init_memory_database().await.unwrap();
        let registry = ModelSetRegistry::new(pool.clone());
        let created = get_or_create_model_set(&pool, "siteB").await.unwrap();

        // Not cached yet; falls through to the database
        assert_eq!(registry.key_for_id(created.id).await.unwrap().as_deref(), Some("siteB"));
        assert_eq!(registry.cached_count().await, 1);
        assert_eq!(registry.key_for_id(9999).await.unwrap(), None);
    }
}
