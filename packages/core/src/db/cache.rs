//! Second-Level Entity Cache
//!
//! Row cache shared by the stores, keyed by entity name (the cache region)
//! and id. Lookups by id read through the cache; updates write through.
//! Rows written behind the store's back stay stale until evicted.
//!
//! # Eviction
//!
//! - [`evict_all`](EntityCache::evict_all) - every region
//! - [`evict_type`](EntityCache::evict_type) - one entity type
//! - [`evict`](EntityCache::evict) - one `(type, id)` entry
//!
//! Each eviction takes the write lock once, so it is atomic with respect to
//! concurrent lookups.

use crate::models::Row;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;

/// Hit/miss counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub entries: usize,
}

/// Per-entity-type row cache
#[derive(Debug, Clone, Default)]
pub struct EntityCache {
    /// Map: entity name → (id → row)
    regions: Arc<RwLock<HashMap<String, HashMap<i64, Row>>>>,
    hits: Arc<AtomicU64>,
    misses: Arc<AtomicU64>,
}

impl EntityCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self, entity: &str, id: i64) -> Option<Row> {
        let regions = self.regions.read().await;
        let row = regions.get(entity).and_then(|region| region.get(&id)).cloned();
        match row {
            Some(_) => self.hits.fetch_add(1, Ordering::Relaxed),
            None => self.misses.fetch_add(1, Ordering::Relaxed),
        };
        row
    }

    pub async fn put(&self, entity: &str, id: i64, row: Row) {
        let mut regions = self.regions.write().await;
        regions.entry(entity.to_string()).or_default().insert(id, row);
    }

    pub async fn contains(&self, entity: &str, id: i64) -> bool {
        let regions = self.regions.read().await;
        regions
            .get(entity)
            .map_or(false, |region| region.contains_key(&id))
    }

    pub async fn evict_all(&self) {
        let mut regions = self.regions.write().await;
        let evicted: usize = regions.values().map(HashMap::len).sum();
        regions.clear();
        tracing::debug!(evicted, "Evicted all cached entities");
    }

    pub async fn evict_type(&self, entity: &str) {
        let mut regions = self.regions.write().await;
        let evicted = regions.remove(entity).map_or(0, |region| region.len());
        tracing::debug!(entity, evicted, "Evicted cached entity type");
    }

    pub async fn evict(&self, entity: &str, id: i64) {
        let mut regions = self.regions.write().await;
        let evicted = regions
            .get_mut(entity)
            .and_then(|region| region.remove(&id))
            .is_some();
        tracing::debug!(entity, id, evicted, "Evicted cached entity");
    }

    pub async fn stats(&self) -> CacheStats {
        let regions = self.regions.read().await;
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            entries: regions.values().map(HashMap::len).sum(),
        }
    }
}
