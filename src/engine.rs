//! # Match Engine
//!
//! Stateful orchestrator for route compatibility matching.
//!
//! ## Architecture
//!
//! The engine maintains:
//! - The set of active routes and their grid registrations
//! - A TTL cache of computed match lists
//! - A durable store of top-K match records
//! - A single-flight map so concurrent requests for the same route id share
//!   one computation
//!
//! The owning route-management layer keeps the engine consistent through the
//! lifecycle hooks (`on_route_created` / `on_route_updated` /
//! `on_route_deactivated`); `find_matches` is the sole query operation.
//!
//! ## Concurrency
//!
//! Grid reads run concurrently under a read lock; insert/remove take the
//! write lock. Candidate collection runs on a blocking worker racing a
//! timeout, accumulating ids into a shared set so a timeout still yields the
//! partial union. Each computation runs on a spawned task, so one caller
//! cancelling never aborts the result for other single-flight waiters.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use chrono::{DateTime, Utc};
use futures::future::{BoxFuture, FutureExt, Shared};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

#[cfg(feature = "parallel")]
use rayon::prelude::*;

use crate::cache::MatchCache;
use crate::error::{MatchError, OptionExt, Result};
use crate::grid::SpatialGrid;
use crate::scorer::{score_pair, time_difference_minutes};
use crate::store::{InMemoryMatchStore, MatchStore};
use crate::{MatchCandidate, MatchConfig, MatchRecord, Route};

/// Result of one matching run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchOutcome {
    /// Ranked candidates, best first; ties broken by ascending route id
    pub candidates: Vec<MatchCandidate>,
    /// True when candidate collection hit the index query timeout and the
    /// list was computed from whatever was retrieved
    pub partial: bool,
    /// Candidates skipped because their individual scoring failed
    pub skipped_candidates: u32,
    pub computed_at: DateTime<Utc>,
}

/// Shared future type for single-flight de-duplication. Errors are cloned to
/// every waiter, results are shared behind an `Arc`.
type InflightFuture = Shared<BoxFuture<'static, Result<Arc<MatchOutcome>>>>;

/// The match orchestrator.
///
/// All interior state is synchronized, so the engine is shared as
/// `Arc<MatchEngine>` between the route-management layer and request workers.
pub struct MatchEngine {
    config: MatchConfig,
    routes: RwLock<HashMap<String, Route>>,
    grid: RwLock<SpatialGrid>,
    cache: MatchCache,
    store: Arc<dyn MatchStore>,
    inflight: Mutex<HashMap<String, InflightFuture>>,
    /// Distinct index scans performed; under concurrent identical requests
    /// this grows per distinct route id, not per call
    index_queries: AtomicU64,
}

impl MatchEngine {
    /// Create an engine with the in-memory record store.
    pub fn new(config: MatchConfig) -> Self {
        Self::with_store(config, Arc::new(InMemoryMatchStore::new()))
    }

    /// Create an engine backed by a custom record store.
    pub fn with_store(config: MatchConfig, store: Arc<dyn MatchStore>) -> Self {
        let grid = SpatialGrid::new(config.cell_size_degrees);
        let cache = MatchCache::new(config.cache_ttl);
        Self {
            config,
            routes: RwLock::new(HashMap::new()),
            grid: RwLock::new(grid),
            cache,
            store,
            inflight: Mutex::new(HashMap::new()),
            index_queries: AtomicU64::new(0),
        }
    }

    // ========================================================================
    // Lifecycle Hooks
    // ========================================================================

    /// Register a newly created route for matching.
    pub fn on_route_created(&self, route: Route) -> Result<()> {
        crate::geometry::require_route_geometry(&route.id, &route.polyline)?;

        debug!("[MatchEngine] Registering route {}", route.id);
        self.grid.write().expect("grid lock").insert(&route);
        self.routes
            .write()
            .expect("routes lock")
            .insert(route.id.clone(), route);
        Ok(())
    }

    /// Replace a route after its geometry or departure time changed.
    ///
    /// Re-registers the grid entry and drops the route's own cached list plus
    /// every cached list referencing it.
    pub fn on_route_updated(&self, route: Route) -> Result<()> {
        crate::geometry::require_route_geometry(&route.id, &route.polyline)?;

        debug!("[MatchEngine] Updating route {}", route.id);
        self.grid.write().expect("grid lock").insert(&route);
        let id = route.id.clone();
        self.routes
            .write()
            .expect("routes lock")
            .insert(id.clone(), route);
        self.cache.invalidate(&id);
        self.cache.invalidate_referencing(&id);
        Ok(())
    }

    /// Deactivate a route: synchronously removed from the index, its cached
    /// list dropped, and every cached list referencing it invalidated.
    /// The route record itself is kept (deactivated, not deleted).
    pub fn on_route_deactivated(&self, route_id: &str) {
        debug!("[MatchEngine] Deactivating route {}", route_id);
        self.grid.write().expect("grid lock").remove(route_id);
        if let Some(route) = self.routes.write().expect("routes lock").get_mut(route_id) {
            route.active = false;
        }
        self.cache.invalidate(route_id);
        self.cache.invalidate_referencing(route_id);
    }

    /// Look up a route by id.
    pub fn get_route(&self, route_id: &str) -> Option<Route> {
        self.routes
            .read()
            .expect("routes lock")
            .get(route_id)
            .cloned()
    }

    /// Number of routes known to the engine (active and deactivated).
    pub fn route_count(&self) -> usize {
        self.routes.read().expect("routes lock").len()
    }

    // ========================================================================
    // Matching
    // ========================================================================

    /// Find ranked matches for a route within the configured default radius.
    pub async fn find_matches(self: &Arc<Self>, route_id: &str) -> Result<Arc<MatchOutcome>> {
        let max_km = self.config.max_distance_km;
        self.find_matches_within(route_id, max_km).await
    }

    /// Find ranked matches for a route within `max_distance_km`.
    ///
    /// Cached results are returned directly. Otherwise at most one
    /// computation runs per route id: concurrent callers await the same
    /// in-flight result. The first caller's radius wins for the shared run.
    pub async fn find_matches_within(
        self: &Arc<Self>,
        route_id: &str,
        max_distance_km: f64,
    ) -> Result<Arc<MatchOutcome>> {
        if let Some(cached) = self.cache.get(route_id) {
            debug!("[MatchEngine] Cache hit for {}", route_id);
            return Ok(cached);
        }

        let shared = {
            let mut inflight = self.inflight.lock().expect("inflight lock");
            if let Some(existing) = inflight.get(route_id) {
                existing.clone()
            } else {
                let engine = Arc::clone(self);
                let id = route_id.to_string();
                // Spawned so a caller cancelling its await never aborts the
                // computation for the remaining waiters
                let handle =
                    tokio::spawn(async move { engine.compute_matches(&id, max_distance_km).await });
                let fut: InflightFuture = async move {
                    match handle.await {
                        Ok(result) => result,
                        Err(e) => Err(MatchError::Internal {
                            message: format!("match task failed: {}", e),
                        }),
                    }
                }
                .boxed()
                .shared();
                inflight.insert(route_id.to_string(), fut.clone());
                fut
            }
        };

        let result = shared.clone().await;

        // First waiter back cleans up the completed entry; late arrivals that
        // cloned it before removal still resolve instantly
        let mut inflight = self.inflight.lock().expect("inflight lock");
        if inflight
            .get(route_id)
            .map(|f| f.ptr_eq(&shared))
            .unwrap_or(false)
        {
            inflight.remove(route_id);
        }
        drop(inflight);

        result
    }

    /// Ranked matches serialized as JSON, for non-Rust callers.
    pub async fn find_matches_json(self: &Arc<Self>, route_id: &str) -> Result<String> {
        let outcome = self.find_matches(route_id).await?;
        serde_json::to_string(&*outcome).map_err(|e| MatchError::Internal {
            message: format!("serialization failed: {}", e),
        })
    }

    async fn compute_matches(
        self: Arc<Self>,
        route_id: &str,
        max_distance_km: f64,
    ) -> Result<Arc<MatchOutcome>> {
        let requester = {
            let routes = self.routes.read().expect("routes lock");
            routes
                .get(route_id)
                .filter(|r| r.active)
                .cloned()
                .ok_or_route_not_found(route_id)?
        };

        let radius_m = max_distance_km * 1000.0;
        let (candidate_ids, partial) = self.collect_candidates_bounded(&requester, radius_m).await;

        // Snapshot candidate routes; exclude self and same-owner routes
        let candidates: Vec<Route> = {
            let routes = self.routes.read().expect("routes lock");
            candidate_ids
                .iter()
                .filter(|id| id.as_str() != requester.id)
                .filter_map(|id| routes.get(id))
                .filter(|r| r.active && r.owner_id != requester.owner_id)
                .cloned()
                .collect()
        };

        // Cheap reject before geometry scoring
        let in_window: Vec<Route> = candidates
            .into_iter()
            .filter(|c| time_difference_minutes(&requester, c) <= self.config.max_time_diff_minutes)
            .collect();

        debug!(
            "[MatchEngine] {} candidates in time window for {}",
            in_window.len(),
            requester.id
        );

        #[cfg(feature = "parallel")]
        let scored: Vec<Result<MatchCandidate>> = in_window
            .par_iter()
            .map(|c| score_pair(&requester, c, &self.config))
            .collect();
        #[cfg(not(feature = "parallel"))]
        let scored: Vec<Result<MatchCandidate>> = in_window
            .iter()
            .map(|c| score_pair(&requester, c, &self.config))
            .collect();

        // Per-candidate failures are skipped and counted, never propagated
        let mut skipped: u32 = 0;
        let mut ranked: Vec<MatchCandidate> = Vec::with_capacity(scored.len());
        for result in scored {
            match result {
                Ok(c) if c.overall_score >= self.config.min_overall_score => ranked.push(c),
                Ok(_) => {}
                Err(e) => {
                    warn!("[MatchEngine] Skipping candidate for {}: {}", requester.id, e);
                    skipped += 1;
                }
            }
        }

        ranked.sort_by(|a, b| {
            b.overall_score
                .partial_cmp(&a.overall_score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.route_id.cmp(&b.route_id))
        });
        ranked.truncate(self.config.max_scored);

        let computed_at = Utc::now();
        let top: Vec<MatchCandidate> = ranked
            .into_iter()
            .take(self.config.max_returned)
            .collect();

        self.persist_records(&requester.id, &top, computed_at);

        let outcome = Arc::new(MatchOutcome {
            candidates: top,
            partial,
            skipped_candidates: skipped,
            computed_at,
        });

        // Partial outcomes are served once but never cached
        if !partial {
            self.cache.put(&requester.id, Arc::clone(&outcome));
        }

        info!(
            "[MatchEngine] {} matches for {} (partial: {}, skipped: {})",
            outcome.candidates.len(),
            requester.id,
            partial,
            skipped
        );

        Ok(outcome)
    }

    /// Union of index queries around the requester's start, end, and
    /// polyline, bounded by the configured timeout. Runs on a blocking
    /// worker; ids accumulate into a shared set so a timeout yields whatever
    /// was retrieved, flagged partial.
    async fn collect_candidates_bounded(
        self: &Arc<Self>,
        requester: &Route,
        radius_m: f64,
    ) -> (HashSet<String>, bool) {
        self.index_queries.fetch_add(1, Ordering::Relaxed);

        let found: Arc<Mutex<HashSet<String>>> = Arc::new(Mutex::new(HashSet::new()));
        let engine = Arc::clone(self);
        let route = requester.clone();
        let acc = Arc::clone(&found);
        let step = self.config.sample_step_meters;

        let collect = tokio::task::spawn_blocking(move || {
            let grid = engine.grid.read().expect("grid lock");

            let near_start = grid.query_near(&route.start, radius_m);
            acc.lock().expect("candidate set lock").extend(near_start);

            let near_end = grid.query_near(&route.end, radius_m);
            acc.lock().expect("candidate set lock").extend(near_end);

            match grid.query_near_polyline(&route.polyline, radius_m, step) {
                Ok(along) => acc.lock().expect("candidate set lock").extend(along),
                Err(e) => warn!("[MatchEngine] Polyline query failed: {}", e),
            }
        });

        let timeout = self.config.index_query_timeout;
        let partial = tokio::time::timeout(timeout, collect).await.is_err();
        if partial {
            warn!(
                "[MatchEngine] {}",
                MatchError::IndexQueryTimeout {
                    route_id: requester.id.clone(),
                    waited_ms: timeout.as_millis() as u64,
                }
            );
        }

        let ids = found.lock().expect("candidate set lock").clone();
        (ids, partial)
    }

    /// Best-effort persistence: store failure is logged, never propagated.
    fn persist_records(&self, requester_id: &str, top: &[MatchCandidate], computed_at: DateTime<Utc>) {
        for candidate in top {
            let record = MatchRecord::from_candidate(requester_id, candidate, computed_at);
            if let Err(e) = self.store.upsert(record) {
                warn!(
                    "[MatchEngine] Failed to persist record for {}: {}",
                    requester_id, e
                );
                break;
            }
        }
    }

    // ========================================================================
    // Statistics
    // ========================================================================

    /// Engine statistics for monitoring.
    pub fn stats(&self) -> EngineStats {
        let routes = self.routes.read().expect("routes lock");
        let grid = self.grid.read().expect("grid lock");
        EngineStats {
            route_count: routes.len() as u32,
            active_route_count: routes.values().filter(|r| r.active).count() as u32,
            indexed_cell_count: grid.cell_count() as u32,
            cached_result_count: self.cache.len() as u32,
            stored_record_count: self.store.len() as u32,
            index_query_count: self.index_queries.load(Ordering::Relaxed),
        }
    }

    /// Direct access to the record store backing this engine.
    pub fn store(&self) -> &Arc<dyn MatchStore> {
        &self.store
    }

    /// Direct access to the match cache.
    pub fn cache(&self) -> &MatchCache {
        &self.cache
    }

    /// Number of distinct index scans performed so far.
    pub fn index_query_count(&self) -> u64 {
        self.index_queries.load(Ordering::Relaxed)
    }
}

/// Engine statistics for monitoring.
#[derive(Debug, Clone, Serialize)]
pub struct EngineStats {
    pub route_count: u32,
    pub active_route_count: u32,
    pub indexed_cell_count: u32,
    pub cached_result_count: u32,
    pub stored_record_count: u32,
    pub index_query_count: u64,
}

// ============================================================================
// Tests
// ============================================================================
