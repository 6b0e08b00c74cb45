//! Read-through cache of sale definitions.
//!
//! Consulted on every admission call. Entries live for a short TTL, so a
//! changed definition (status, window, limit) is picked up within seconds.
//! Staleness never affects stock correctness, which lives in the ledger.
//!
//! The map lock is held only for a single read or write and never across
//! the repository call. Concurrent misses on the same key may all refetch;
//! the last write wins.

use crate::metrics::SNAPSHOT_CACHE;
use flashsale_core::environment::Clock;
use flashsale_core::error::StoreError;
use flashsale_core::repository::FlashsaleRepository;
use flashsale_core::types::{FlashsaleDefinition, FlashsaleId};
use flashsale_core::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

#[derive(Clone, Debug)]
struct Snapshot {
    definition: FlashsaleDefinition,
    expires_at: DateTime<Utc>,
}

/// Short-TTL snapshot cache in front of [`FlashsaleRepository::get_definition`].
pub struct LocalSnapshotCache {
    repository: Arc<dyn FlashsaleRepository>,
    clock: Arc<dyn Clock>,
    ttl: chrono::Duration,
    entries: RwLock<HashMap<FlashsaleId, Snapshot>>,
}

impl LocalSnapshotCache {
    /// Cache entries for `ttl` after they were fetched.
    #[must_use]
    pub fn new(
        repository: Arc<dyn FlashsaleRepository>,
        clock: Arc<dyn Clock>,
        ttl: Duration,
    ) -> Self {
        Self {
            repository,
            clock,
            ttl: chrono::Duration::from_std(ttl).unwrap_or_else(|_| chrono::Duration::zero()),
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Live definition for `id`, fetching it from the repository on a miss.
    ///
    /// # Errors
    ///
    /// Returns the repository's [`StoreError`] on a miss that cannot be
    /// served; nothing is cached in that case.
    pub async fn get(&self, id: FlashsaleId) -> Result<FlashsaleDefinition, StoreError> {
        if let Some(definition) = self.lookup(id) {
            metrics::counter!(SNAPSHOT_CACHE, "result" => "hit").increment(1);
            return Ok(definition);
        }
        metrics::counter!(SNAPSHOT_CACHE, "result" => "miss").increment(1);

        let definition = self.repository.get_definition(id).await?;
        self.insert(definition.clone());
        Ok(definition)
    }

    /// Store `definition` as freshly fetched.
    pub fn insert(&self, definition: FlashsaleDefinition) {
        let expires_at = self.clock.now() + self.ttl;
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(definition.id, Snapshot { definition, expires_at });
    }

    /// Drop the entry for `id`, forcing the next `get` to refetch.
    pub fn invalidate(&self, id: FlashsaleId) {
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id);
    }

    /// Remove expired entries.
    pub fn purge_expired(&self) {
        let now = self.clock.now();
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|_, snapshot| snapshot.expires_at > now);
    }

    /// Number of entries, live or expired.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// `true` if nothing is cached.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lookup(&self, id: FlashsaleId) -> Option<FlashsaleDefinition> {
        let now = self.clock.now();
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&id)
            .filter(|snapshot| snapshot.expires_at > now)
            .map(|snapshot| snapshot.definition.clone())
    }
}

impl std::fmt::Debug for LocalSnapshotCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalSnapshotCache")
            .field("ttl", &self.ttl)
            .field("entries", &self.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;
    use flashsale_core::types::{FlashsaleStatus, ProductId, SkuId};
    use flashsale_testing::{InMemoryFlashsaleStore, ManualClock, test_clock};

    fn definition(id: u64) -> FlashsaleDefinition {
        let start = test_clock().now();
        FlashsaleDefinition {
            id: FlashsaleId::new(id),
            name: "Lunch deal".into(),
            product_id: ProductId::new(1),
            sku_id: SkuId::new(1),
            original_price: 1_000,
            flash_price: 500,
            total_stock: 5,
            limit_per_user: 1,
            sold_count: 0,
            start_time: start,
            end_time: start + ChronoDuration::hours(1),
            status: FlashsaleStatus::Ongoing,
            created_at: start,
        }
    }

    fn cache(store: &InMemoryFlashsaleStore, clock: &ManualClock) -> LocalSnapshotCache {
        LocalSnapshotCache::new(
            Arc::new(store.clone()),
            Arc::new(clock.clone()),
            Duration::from_secs(3),
        )
    }

    #[tokio::test]
    async fn serves_from_memory_until_expiry() {
        let store = InMemoryFlashsaleStore::new();
        store.put_definition(definition(1));
        let clock = ManualClock::new(test_clock().now());
        let cache = cache(&store, &clock);

        cache.get(FlashsaleId::new(1)).await.unwrap();
        clock.advance(ChronoDuration::milliseconds(2_999));
        cache.get(FlashsaleId::new(1)).await.unwrap();
        assert_eq!(store.definition_reads(), 1);

        clock.advance(ChronoDuration::milliseconds(1));
        cache.get(FlashsaleId::new(1)).await.unwrap();
        assert_eq!(store.definition_reads(), 2);
    }

    #[tokio::test]
    async fn refetch_picks_up_changed_status() {
        let store = InMemoryFlashsaleStore::new();
        store.put_definition(definition(1));
        let clock = ManualClock::new(test_clock().now());
        let cache = cache(&store, &clock);

        cache.get(FlashsaleId::new(1)).await.unwrap();
        store.set_status(FlashsaleId::new(1), FlashsaleStatus::Canceled);
        assert_eq!(
            cache.get(FlashsaleId::new(1)).await.unwrap().status,
            FlashsaleStatus::Ongoing
        );

        cache.invalidate(FlashsaleId::new(1));
        assert_eq!(
            cache.get(FlashsaleId::new(1)).await.unwrap().status,
            FlashsaleStatus::Canceled
        );
    }

    #[tokio::test]
    async fn misses_are_not_cached() {
        let store = InMemoryFlashsaleStore::new();
        let clock = ManualClock::new(test_clock().now());
        let cache = cache(&store, &clock);

        let err = cache.get(FlashsaleId::new(9)).await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
        assert!(cache.is_empty());
    }

    #[test]
    fn purge_drops_only_expired_entries() {
        let store = InMemoryFlashsaleStore::new();
        let clock = ManualClock::new(test_clock().now());
        let cache = cache(&store, &clock);

        cache.insert(definition(1));
        clock.advance(ChronoDuration::seconds(2));
        cache.insert(definition(2));
        clock.advance(ChronoDuration::seconds(2));
        cache.purge_expired();

        assert_eq!(cache.len(), 1);
    }
}
