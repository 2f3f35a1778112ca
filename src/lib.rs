//! # Ride Matcher
//!
//! Route compatibility matching engine for shared commutes. Given active
//! commuter routes (already-resolved polylines plus departure metadata), the
//! engine finds routes that overlap in space and time, scores them, and
//! returns a ranked, cached match list. Only privacy-fuzzed coordinates are
//! ever surfaced outward.
//!
//! This library provides:
//! - Haversine/polyline geometry primitives with a bounded-error buffered
//!   overlap estimate
//! - A uniform-grid spatial index for sub-linear candidate retrieval
//! - Overlap/time/proximity compatibility scoring
//! - A match orchestrator with per-route single-flight de-duplication,
//!   TTL-cached results, and durable top-K match records
//!
//! ## Features
//!
//! - **`parallel`** - Score candidate sets in parallel with rayon
//!
//! ## Quick Start
//!
//! ```rust
//! use chrono::{TimeZone, Utc};
//! use ride_matcher::{GeoPoint, MatchConfig, MatchEngine, Route};
//! use std::sync::Arc;
//!
//! let polyline: Vec<GeoPoint> = (0..10)
//!     .map(|i| GeoPoint::new(19.0760 - i as f64 * 0.005, 72.8777))
//!     .collect();
//!
//! let route_a = Route::new(
//!     "route-a", "user-1",
//!     polyline.clone(),
//!     Utc.with_ymd_and_hms(2026, 3, 2, 8, 30, 0).unwrap(),
//!     &MatchConfig::default(),
//! ).unwrap();
//! let route_b = Route::new(
//!     "route-b", "user-2",
//!     polyline,
//!     Utc.with_ymd_and_hms(2026, 3, 2, 8, 45, 0).unwrap(),
//!     &MatchConfig::default(),
//! ).unwrap();
//!
//! let engine = Arc::new(MatchEngine::new(MatchConfig::default()));
//! engine.on_route_created(route_a).unwrap();
//! engine.on_route_created(route_b).unwrap();
//!
//! let rt = tokio::runtime::Runtime::new().unwrap();
//! let outcome = rt.block_on(engine.find_matches("route-a")).unwrap();
//! assert_eq!(outcome.candidates[0].route_id, "route-b");
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

// Unified error handling
pub mod error;
pub use error::{MatchError, OptionExt, Result};

// Geometry kernel (distance, overlap, sampling)
pub mod geometry;

// Uniform-grid spatial index
pub mod grid;
pub use grid::SpatialGrid;

// Compatibility scoring
pub mod scorer;
pub use scorer::score_pair;

// Match orchestrator
pub mod engine;
pub use engine::{EngineStats, MatchEngine, MatchOutcome};

// TTL cache for computed match lists
pub mod cache;
pub use cache::MatchCache;

// Durable top-K match records
pub mod store;
pub use store::{InMemoryMatchStore, MatchStore};

// Privacy-fuzzed location helper
pub mod privacy;
pub use privacy::fuzz_location;

// ============================================================================
// Core Types
// ============================================================================

/// A geographic coordinate with latitude and longitude.
///
/// # Example
/// ```
/// use ride_matcher::GeoPoint;
/// let point = GeoPoint::new(19.0760, 72.8777); // Mumbai
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub latitude: f64,
    pub longitude: f64,
}

impl GeoPoint {
    /// Create a new geographic point.
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }

    /// Check if the point has valid coordinates.
    pub fn is_valid(&self) -> bool {
        self.latitude.is_finite()
            && self.longitude.is_finite()
            && self.latitude >= -90.0
            && self.latitude <= 90.0
            && self.longitude >= -180.0
            && self.longitude <= 180.0
    }
}

/// Bounding box for a polyline.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bounds {
    pub min_lat: f64,
    pub max_lat: f64,
    pub min_lng: f64,
    pub max_lng: f64,
}

impl Bounds {
    /// Create bounds from points. Returns `None` for an empty slice.
    pub fn from_points(points: &[GeoPoint]) -> Option<Self> {
        if points.is_empty() {
            return None;
        }
        let mut min_lat = f64::MAX;
        let mut max_lat = f64::MIN;
        let mut min_lng = f64::MAX;
        let mut max_lng = f64::MIN;

        for p in points {
            min_lat = min_lat.min(p.latitude);
            max_lat = max_lat.max(p.latitude);
            min_lng = min_lng.min(p.longitude);
            max_lng = max_lng.max(p.longitude);
        }

        Some(Self {
            min_lat,
            max_lat,
            min_lng,
            max_lng,
        })
    }
}

/// A commuter's planned trip.
///
/// The polyline arrives already resolved by an external directions provider;
/// fuzzy endpoints arrive from the privacy fuzzer, computed once at creation
/// and never regenerated. Fuzzy coordinates are never used in scoring; they
/// are the only coordinates surfaced in outward-facing results.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Route {
    pub id: String,
    pub owner_id: String,
    pub start: GeoPoint,
    pub end: GeoPoint,
    pub fuzzy_start: GeoPoint,
    pub fuzzy_end: GeoPoint,
    /// Ordered path, (lat, lng) throughout; ≥2 valid points, non-zero length
    pub polyline: Vec<GeoPoint>,
    pub departure: DateTime<Utc>,
    /// Recurring-day metadata; carried but not used in scoring
    pub days_of_week: Vec<String>,
    /// Provider-reported trip distance in meters
    pub distance_meters: f64,
    /// Provider-reported trip duration in minutes
    pub duration_minutes: f64,
    /// Only active routes participate in matching
    pub active: bool,
}

impl Route {
    /// Create a route from an already-resolved polyline.
    ///
    /// Invalid points are filtered out; fewer than 2 surviving points or a
    /// zero-length path is rejected with `InvalidGeometry`. Long provider
    /// polylines are Douglas-Peucker simplified per the config. Fuzzy
    /// endpoints are generated here, once.
    pub fn new(
        id: &str,
        owner_id: &str,
        polyline: Vec<GeoPoint>,
        departure: DateTime<Utc>,
        config: &MatchConfig,
    ) -> Result<Self> {
        let mut points: Vec<GeoPoint> = polyline.into_iter().filter(|p| p.is_valid()).collect();
        geometry::require_polyline(id, &points)?;

        if points.len() > config.max_polyline_points {
            points = geometry::simplify_polyline(&points, config.simplification_tolerance);
        }

        let length = geometry::require_route_geometry(id, &points)?;

        let start = points[0];
        let end = points[points.len() - 1];

        Ok(Self {
            id: id.to_string(),
            owner_id: owner_id.to_string(),
            start,
            end,
            fuzzy_start: privacy::fuzz_location(&start),
            fuzzy_end: privacy::fuzz_location(&end),
            polyline: points,
            departure,
            days_of_week: Vec::new(),
            distance_meters: length,
            duration_minutes: 0.0,
            active: true,
        })
    }

    /// Recurring days the trip repeats on (pass-through metadata).
    pub fn with_days_of_week(mut self, days: Vec<String>) -> Self {
        self.days_of_week = days;
        self
    }

    /// Provider-reported distance and duration (pass-through metadata).
    pub fn with_trip_stats(mut self, distance_meters: f64, duration_minutes: f64) -> Self {
        self.distance_meters = distance_meters;
        self.duration_minutes = duration_minutes;
        self
    }

    /// Bounding box of the route's polyline.
    pub fn bounds(&self) -> Bounds {
        // Polyline is non-empty by construction
        Bounds::from_points(&self.polyline).unwrap_or(Bounds {
            min_lat: self.start.latitude,
            max_lat: self.start.latitude,
            min_lng: self.start.longitude,
            max_lng: self.start.longitude,
        })
    }
}

/// Scored compatibility between a requester route and one candidate.
///
/// Transient per matching run; only the ranked top-K is persisted as
/// [`MatchRecord`]s. Carries the candidate's fuzzy endpoints (never the
/// exact ones) for outward display.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchCandidate {
    /// Matched route id
    pub route_id: String,
    /// Owner of the matched route
    pub owner_id: String,
    /// Fraction of the two paths within a shared 500m buffer, 0-100
    pub overlap_percentage: f64,
    /// Estimated shared path length in meters
    pub shared_distance_meters: f64,
    /// Absolute departure-time difference in minutes
    pub time_difference_minutes: f64,
    /// Linear time-decay score in [0, 1]
    pub time_compatibility: f64,
    /// Start-point proximity score in [0, 1]
    pub start_proximity: f64,
    /// End-point proximity score in [0, 1]
    pub end_proximity: f64,
    /// Weighted aggregate score in [0, 1]
    pub overall_score: f64,
    /// Privacy-fuzzed endpoints of the matched route
    pub fuzzy_start: GeoPoint,
    pub fuzzy_end: GeoPoint,
}

/// Persisted outcome of a matching run, upserted by
/// (requester_route_id, matched_route_id): superseded on re-computation,
/// never duplicated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchRecord {
    pub requester_route_id: String,
    pub matched_route_id: String,
    pub overlap_percentage: f64,
    pub shared_distance_meters: f64,
    pub time_compatibility_score: f64,
    pub overall_score: f64,
    pub computed_at: DateTime<Utc>,
}

impl MatchRecord {
    /// Build a record for one ranked candidate.
    pub fn from_candidate(
        requester_route_id: &str,
        candidate: &MatchCandidate,
        computed_at: DateTime<Utc>,
    ) -> Self {
        Self {
            requester_route_id: requester_route_id.to_string(),
            matched_route_id: candidate.route_id.clone(),
            overlap_percentage: candidate.overlap_percentage,
            shared_distance_meters: candidate.shared_distance_meters,
            time_compatibility_score: candidate.time_compatibility,
            overall_score: candidate.overall_score,
            computed_at,
        }
    }
}

/// Scoring weights for the aggregate compatibility score.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MatchWeights {
    pub overlap: f64,
    pub time: f64,
    pub start_proximity: f64,
    pub end_proximity: f64,
}

impl Default for MatchWeights {
    fn default() -> Self {
        Self {
            overlap: 0.4,
            time: 0.3,
            start_proximity: 0.15,
            end_proximity: 0.15,
        }
    }
}

/// Configuration for the matching engine.
///
/// Fixed per engine instance, not per call.
#[derive(Debug, Clone)]
pub struct MatchConfig {
    /// Buffer width for polyline overlap estimation.
    /// Default: 500.0 meters
    pub buffer_meters: f64,

    /// Sampling step for overlap estimation and polyline index queries.
    /// Smaller steps reduce estimation error. Default: 25.0 meters
    pub sample_step_meters: f64,

    /// Grid cell size in degrees (~1.1km at the service's operating latitudes).
    /// Default: 0.01
    pub cell_size_degrees: f64,

    /// Candidate search radius for `find_matches`.
    /// Default: 5.0 km
    pub max_distance_km: f64,

    /// Hard pre-filter: candidates departing more than this many minutes
    /// apart are rejected before geometry scoring. Default: 60.0
    pub max_time_diff_minutes: f64,

    /// Distance at which start/end proximity scores decay to zero.
    /// Default: 2000.0 meters
    pub proximity_max_meters: f64,

    /// Aggregate score weights (overlap/time/start/end).
    pub weights: MatchWeights,

    /// Minimum overall score for a candidate to appear in ranked output.
    /// Default: 0.6
    pub min_overall_score: f64,

    /// Ranked list cap before persistence. Default: 50
    pub max_scored: usize,

    /// Candidates persisted as records and returned to the caller.
    /// Default: 20
    pub max_returned: usize,

    /// TTL for cached match lists. Default: 5 minutes
    pub cache_ttl: Duration,

    /// Time bound on spatial index candidate collection; on timeout the
    /// outcome is computed from whatever was retrieved, flagged partial.
    /// Default: 2 seconds
    pub index_query_timeout: Duration,

    /// Tolerance for Douglas-Peucker simplification (in degrees).
    /// Default: 0.0001 (~11 meters)
    pub simplification_tolerance: f64,

    /// Polylines longer than this are simplified at ingestion. Default: 500
    pub max_polyline_points: usize,
}

impl Default for MatchConfig {
    fn default() -> Self {
        Self {
            buffer_meters: 500.0,
            sample_step_meters: 25.0,
            cell_size_degrees: 0.01,
            max_distance_km: 5.0,
            max_time_diff_minutes: 60.0,
            proximity_max_meters: 2000.0,
            weights: MatchWeights::default(),
            min_overall_score: 0.6,
            max_scored: 50,
            max_returned: 20,
            cache_ttl: Duration::from_secs(300),
            index_query_timeout: Duration::from_secs(2),
            simplification_tolerance: 0.0001,
            max_polyline_points: 500,
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
