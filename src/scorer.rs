//! Compatibility scoring between two routes.
//!
//! Pure functions of the two route inputs plus the fixed weight/threshold
//! configuration. The acceptance threshold itself is applied by the
//! orchestrator, not here.

use crate::error::{MatchError, Result};
use crate::geometry::{haversine_distance, overlap_length, polyline_length};
use crate::{MatchCandidate, MatchConfig, Route};

/// Score one candidate against the requester.
///
/// Combines buffered-path overlap, departure-time compatibility (linear decay
/// to zero at the configured departure window), and start/end proximity
/// (linear decay to zero at the configured maximum) into a weighted aggregate
/// in [0, 1]. The decay denominator is the same window the orchestrator
/// pre-filters on, so the two layers cannot drift apart.
pub fn score_pair(requester: &Route, candidate: &Route, config: &MatchConfig) -> Result<MatchCandidate> {
    let len_a = polyline_length(&requester.polyline);
    let len_b = polyline_length(&candidate.polyline);
    let total_len = (len_a + len_b) / 2.0;
    if total_len == 0.0 {
        return Err(MatchError::InvalidGeometry {
            route_id: candidate.id.clone(),
            message: "zero-length route in scoring".to_string(),
        });
    }

    let shared = overlap_length(
        &requester.polyline,
        &candidate.polyline,
        config.buffer_meters,
        config.sample_step_meters,
    )?;
    let overlap_percentage = (100.0 * shared / total_len).min(100.0);

    let time_difference_minutes = time_difference_minutes(requester, candidate);
    let time_compatibility =
        (1.0 - time_difference_minutes / config.max_time_diff_minutes).max(0.0);

    let start_proximity = proximity_score(
        &requester.start,
        &candidate.start,
        config.proximity_max_meters,
    );
    let end_proximity =
        proximity_score(&requester.end, &candidate.end, config.proximity_max_meters);

    let w = &config.weights;
    let overall_score = w.overlap * (overlap_percentage / 100.0)
        + w.time * time_compatibility
        + w.start_proximity * start_proximity
        + w.end_proximity * end_proximity;

    Ok(MatchCandidate {
        route_id: candidate.id.clone(),
        owner_id: candidate.owner_id.clone(),
        overlap_percentage,
        shared_distance_meters: shared,
        time_difference_minutes,
        time_compatibility,
        start_proximity,
        end_proximity,
        overall_score,
        fuzzy_start: candidate.fuzzy_start,
        fuzzy_end: candidate.fuzzy_end,
    })
}

/// Absolute departure-time difference in minutes.
pub fn time_difference_minutes(a: &Route, b: &Route) -> f64 {
    let seconds = (a.departure - b.departure).num_seconds().abs();
    seconds as f64 / 60.0
}

/// Linear proximity decay: 1 at zero distance, 0 at `max_meters` and beyond.
pub fn proximity_score(p1: &crate::GeoPoint, p2: &crate::GeoPoint, max_meters: f64) -> f64 {
    let distance = haversine_distance(p1, p2);
    if distance >= max_meters {
        return 0.0;
    }
    (1.0 - distance / max_meters).max(0.0)
}
