//! Privacy-fuzzed locations.
//!
//! Exact coordinates never leave the matching engine; each route carries
//! fuzzed endpoints computed once at creation, and only those are surfaced in
//! outward-facing results. Scoring always uses the exact points.

use rand::Rng;

use crate::geometry::destination;
use crate::GeoPoint;

/// Minimum fuzzing offset in meters.
pub const MIN_OFFSET_M: f64 = 100.0;
/// Maximum fuzzing offset in meters.
pub const MAX_OFFSET_M: f64 = 300.0;

/// Offset a point 100-300m away at a random bearing.
pub fn fuzz_location(exact: &GeoPoint) -> GeoPoint {
    let mut rng = rand::thread_rng();
    let distance = rng.gen_range(MIN_OFFSET_M..=MAX_OFFSET_M);
    let bearing = rng.gen_range(0.0..360.0);
    destination(exact, distance, bearing)
}
