//! TTL-bounded cache of computed match lists.
//!
//! A pure optimization layer: entries are derived, disposable results that can
//! always be reconstructed by the orchestrator, and a miss always falls
//! through to a fresh computation. Keys are route ids; each entry is
//! independently replaceable without locking the whole cache (dashmap shards).

use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;

use crate::engine::MatchOutcome;

#[derive(Debug, Clone)]
struct CacheEntry {
    outcome: Arc<MatchOutcome>,
    expires_at: Instant,
}

/// Short-TTL cache of ranked match lists per requester route id.
#[derive(Debug)]
pub struct MatchCache {
    entries: DashMap<String, CacheEntry>,
    ttl: Duration,
}

impl MatchCache {
    /// Create a cache with the given entry TTL.
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
        }
    }

    /// Get the cached outcome for a route, if present and unexpired.
    /// Expired entries are dropped on access.
    pub fn get(&self, route_id: &str) -> Option<Arc<MatchOutcome>> {
        let expired = match self.entries.get(route_id) {
            Some(entry) if entry.expires_at > Instant::now() => {
                return Some(Arc::clone(&entry.outcome));
            }
            Some(_) => true,
            None => false,
        };
        if expired {
            self.entries.remove(route_id);
        }
        None
    }

    /// Cache an outcome with the default TTL.
    pub fn put(&self, route_id: &str, outcome: Arc<MatchOutcome>) {
        self.put_with_ttl(route_id, outcome, self.ttl);
    }

    /// Cache an outcome with an explicit TTL.
    pub fn put_with_ttl(&self, route_id: &str, outcome: Arc<MatchOutcome>, ttl: Duration) {
        self.entries.insert(
            route_id.to_string(),
            CacheEntry {
                outcome,
                expires_at: Instant::now() + ttl,
            },
        );
    }

    /// Drop the entry for a route id. No-op if absent.
    pub fn invalidate(&self, route_id: &str) {
        self.entries.remove(route_id);
    }

    /// Drop every cached list that references the given route id as a match.
    /// Called when a route is deactivated or its geometry changes, so stale
    /// references disappear rather than merely age out.
    pub fn invalidate_referencing(&self, route_id: &str) {
        self.entries.retain(|_, entry| {
            !entry
                .outcome
                .candidates
                .iter()
                .any(|c| c.route_id == route_id)
        });
    }

    /// Drop all expired entries.
    pub fn purge_expired(&self) {
        let now = Instant::now();
        self.entries.retain(|_, entry| entry.expires_at > now);
    }

    /// Clear the cache entirely.
    pub fn clear(&self) {
        self.entries.clear();
    }

    /// Number of entries currently held (including not-yet-purged expired ones).
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{GeoPoint, MatchCandidate};
    use chrono::Utc;

    fn outcome_with(ids: &[&str]) -> Arc<MatchOutcome> {
        let candidates = ids
            .iter()
            .map(|id| MatchCandidate {
                route_id: id.to_string(),
                owner_id: format!("owner-of-{}", id),
                overlap_percentage: 95.0,
                shared_distance_meters: 4_000.0,
                time_difference_minutes: 10.0,
                time_compatibility: 0.83,
                start_proximity: 0.9,
                end_proximity: 0.9,
                overall_score: 0.9,
                fuzzy_start: GeoPoint::new(19.08, 72.88),
                fuzzy_end: GeoPoint::new(19.02, 72.86),
            })
            .collect();
        Arc::new(MatchOutcome {
            candidates,
            partial: false,
            skipped_candidates: 0,
            computed_at: Utc::now(),
        })
    }

    #[test]
    fn test_put_get_invalidate() {
        let cache = MatchCache::new(Duration::from_secs(300));
        cache.put("route-1", outcome_with(&["route-2"]));

        assert!(cache.get("route-1").is_some());
        assert!(cache.get("route-2").is_none());

        cache.invalidate("route-1");
        assert!(cache.get("route-1").is_none());
    }

    #[test]
    fn test_ttl_expiry() {
        let cache = MatchCache::new(Duration::from_millis(20));
        cache.put("route-1", outcome_with(&["route-2"]));
        assert!(cache.get("route-1").is_some());

        std::thread::sleep(Duration::from_millis(40));
        assert!(cache.get("route-1").is_none());
        // Expired entry was dropped on access
        assert!(cache.is_empty());
    }

    #[test]
    fn test_invalidate_referencing() {
        let cache = MatchCache::new(Duration::from_secs(300));
        cache.put("route-1", outcome_with(&["route-2", "route-3"]));
        cache.put("route-4", outcome_with(&["route-5"]));

        cache.invalidate_referencing("route-3");

        // route-1's list referenced route-3, so it must be gone entirely
        assert!(cache.get("route-1").is_none());
        assert!(cache.get("route-4").is_some());
    }

    #[test]
    fn test_purge_expired() {
        let cache = MatchCache::new(Duration::from_secs(300));
        cache.put_with_ttl("stale", outcome_with(&["route-2"]), Duration::from_millis(1));
        cache.put("fresh", outcome_with(&["route-3"]));

        std::thread::sleep(Duration::from_millis(10));
        cache.purge_expired();

        assert_eq!(cache.len(), 1);
        assert!(cache.get("fresh").is_some());
    }
}
