//! Geometry kernel: pure great-circle and polyline primitives.
//!
//! Everything here is side-effect free. The only failure mode is rejecting
//! polylines with fewer than 2 points, so results stay `Result`-typed where
//! that can happen and plain values elsewhere.
//!
//! The overlap estimate replaces an exact polygon-buffer intersection with
//! fixed-step sampling: deterministic for a fixed step, with error shrinking
//! as the step shrinks.

use geo::{algorithm::simplify::Simplify, Coord, LineString};

use crate::error::{MatchError, Result};
use crate::GeoPoint;

/// Earth radius in meters (haversine).
pub const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// Approximate meters per degree of latitude, used for local tangent-plane
/// projections and degree-span conversions. 1 degree ≈ 111km.
pub const METERS_PER_DEGREE: f64 = 111_000.0;

/// Great-circle distance between two points in meters (haversine formula).
pub fn haversine_distance(p1: &GeoPoint, p2: &GeoPoint) -> f64 {
    let lat1 = p1.latitude.to_radians();
    let lat2 = p2.latitude.to_radians();
    let dlat = (p2.latitude - p1.latitude).to_radians();
    let dlng = (p2.longitude - p1.longitude).to_radians();

    let a = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlng / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());

    EARTH_RADIUS_M * c
}

/// Total length of a polyline in meters.
pub fn polyline_length(points: &[GeoPoint]) -> f64 {
    points
        .windows(2)
        .map(|w| haversine_distance(&w[0], &w[1]))
        .sum()
}

/// Minimum distance from a point to any segment of a polyline, in meters.
///
/// The closest point on each segment is found by projecting onto the local
/// tangent plane (acceptable at metropolitan scale); the final distance to
/// that point is haversine.
pub fn point_to_polyline_distance(point: &GeoPoint, poly: &[GeoPoint]) -> Result<f64> {
    require_polyline("", poly)?;

    let mut min_dist = f64::INFINITY;
    for seg in poly.windows(2) {
        let closest = closest_point_on_segment(point, &seg[0], &seg[1]);
        let dist = haversine_distance(point, &closest);
        if dist < min_dist {
            min_dist = dist;
        }
    }
    Ok(min_dist)
}

/// Closest point to `p` on the segment `a`..`b`, via projection on the
/// tangent plane anchored at `p`.
fn closest_point_on_segment(p: &GeoPoint, a: &GeoPoint, b: &GeoPoint) -> GeoPoint {
    let lng_scale = p.latitude.to_radians().cos().max(0.01);

    // Planar coordinates in meters relative to p
    let ax = (a.longitude - p.longitude) * METERS_PER_DEGREE * lng_scale;
    let ay = (a.latitude - p.latitude) * METERS_PER_DEGREE;
    let bx = (b.longitude - p.longitude) * METERS_PER_DEGREE * lng_scale;
    let by = (b.latitude - p.latitude) * METERS_PER_DEGREE;

    let dx = bx - ax;
    let dy = by - ay;
    let len_sq = dx * dx + dy * dy;

    let t = if len_sq == 0.0 {
        0.0
    } else {
        // Project the origin (= p) onto the segment, clamped to its ends
        (-(ax * dx + ay * dy) / len_sq).clamp(0.0, 1.0)
    };

    GeoPoint::new(
        a.latitude + t * (b.latitude - a.latitude),
        a.longitude + t * (b.longitude - a.longitude),
    )
}

/// Estimated length of `poly_a` that lies within `buffer_m` of `poly_b`.
///
/// `poly_a` is walked in slices of `step_m` of arc length (the final slice
/// takes the remainder); a slice counts as shared when its midpoint is within
/// `buffer_m` of `poly_b`. The slice lengths sum exactly to the length of
/// `poly_a`, so identical polylines report full overlap.
pub fn overlap_length(
    poly_a: &[GeoPoint],
    poly_b: &[GeoPoint],
    buffer_m: f64,
    step_m: f64,
) -> Result<f64> {
    require_polyline("", poly_a)?;
    require_polyline("", poly_b)?;

    let total = polyline_length(poly_a);
    if total == 0.0 {
        return Ok(0.0);
    }

    let cumulative = cumulative_lengths(poly_a);
    let step = step_m.max(1.0);
    let slices = (total / step).ceil() as usize;

    let mut shared = 0.0;
    for i in 0..slices {
        let slice_start = i as f64 * step;
        let slice_end = (slice_start + step).min(total);
        let midpoint = point_at(poly_a, &cumulative, (slice_start + slice_end) / 2.0);

        let dist = point_to_polyline_distance(&midpoint, poly_b)?;
        if dist <= buffer_m {
            shared += slice_end - slice_start;
        }
    }
    Ok(shared)
}

/// Resample a polyline at a fixed arc-length step, keeping both endpoints.
pub fn sample_polyline(poly: &[GeoPoint], step_m: f64) -> Result<Vec<GeoPoint>> {
    require_polyline("", poly)?;

    let total = polyline_length(poly);
    if total == 0.0 {
        return Ok(vec![poly[0]]);
    }

    let cumulative = cumulative_lengths(poly);
    let step = step_m.max(1.0);
    let count = (total / step).floor() as usize;

    let mut samples: Vec<GeoPoint> = (0..=count)
        .map(|i| point_at(poly, &cumulative, i as f64 * step))
        .collect();
    // Keep the exact end point unless a sample already landed on it
    if total - count as f64 * step > 1e-6 {
        samples.push(poly[poly.len() - 1]);
    }
    Ok(samples)
}

/// Destination point reached by travelling `distance_m` from `start` at the
/// given initial bearing (degrees clockwise from north).
pub fn destination(start: &GeoPoint, distance_m: f64, bearing_deg: f64) -> GeoPoint {
    let ang = distance_m / EARTH_RADIUS_M;
    let brg = bearing_deg.to_radians();
    let lat1 = start.latitude.to_radians();
    let lng1 = start.longitude.to_radians();

    let lat2 = (lat1.sin() * ang.cos() + lat1.cos() * ang.sin() * brg.cos()).asin();
    let lng2 = lng1
        + (brg.sin() * ang.sin() * lat1.cos()).atan2(ang.cos() - lat1.sin() * lat2.sin());

    GeoPoint::new(lat2.to_degrees(), lng2.to_degrees())
}

/// Douglas-Peucker simplification (tolerance in degrees).
///
/// Used at route ingestion to keep long directions-provider polylines at a
/// size the overlap sampler handles cheaply.
pub fn simplify_polyline(poly: &[GeoPoint], tolerance_deg: f64) -> Vec<GeoPoint> {
    if poly.len() < 3 {
        return poly.to_vec();
    }

    let coords: Vec<Coord> = poly
        .iter()
        .map(|p| Coord {
            x: p.longitude,
            y: p.latitude,
        })
        .collect();

    let simplified = LineString::new(coords).simplify(&tolerance_deg);
    simplified
        .0
        .iter()
        .map(|c| GeoPoint::new(c.y, c.x))
        .collect()
}

/// Reject polylines with fewer than 2 points.
pub(crate) fn require_polyline(route_id: &str, poly: &[GeoPoint]) -> Result<()> {
    if poly.len() < 2 {
        return Err(MatchError::InvalidGeometry {
            route_id: route_id.to_string(),
            message: format!("polyline has {} points, minimum 2 required", poly.len()),
        });
    }
    Ok(())
}

/// Reject polylines with fewer than 2 points or zero total length, returning
/// the total length otherwise. Applied at route construction and again at the
/// engine's lifecycle hooks, since route fields are public.
pub(crate) fn require_route_geometry(route_id: &str, poly: &[GeoPoint]) -> Result<f64> {
    require_polyline(route_id, poly)?;
    let length = polyline_length(poly);
    if length == 0.0 {
        return Err(MatchError::InvalidGeometry {
            route_id: route_id.to_string(),
            message: "route has zero length".to_string(),
        });
    }
    Ok(length)
}

/// Cumulative arc length at each vertex of the polyline.
fn cumulative_lengths(poly: &[GeoPoint]) -> Vec<f64> {
    let mut cumulative = Vec::with_capacity(poly.len());
    let mut acc = 0.0;
    cumulative.push(0.0);
    for w in poly.windows(2) {
        acc += haversine_distance(&w[0], &w[1]);
        cumulative.push(acc);
    }
    cumulative
}

/// Point at arc-length position `s` along the polyline (clamped to its ends).
fn point_at(poly: &[GeoPoint], cumulative: &[f64], s: f64) -> GeoPoint {
    let total = cumulative[cumulative.len() - 1];
    if s <= 0.0 {
        return poly[0];
    }
    if s >= total {
        return poly[poly.len() - 1];
    }

    let idx = match cumulative.binary_search_by(|c| c.partial_cmp(&s).unwrap()) {
        Ok(i) => return poly[i],
        Err(i) => i, // first vertex past s; segment is (i-1, i)
    };

    let seg_start = cumulative[idx - 1];
    let seg_len = cumulative[idx] - seg_start;
    if seg_len == 0.0 {
        return poly[idx - 1];
    }
    let ratio = (s - seg_start) / seg_len;
    let a = &poly[idx - 1];
    let b = &poly[idx];
    GeoPoint::new(
        a.latitude + ratio * (b.latitude - a.latitude),
        a.longitude + ratio * (b.longitude - a.longitude),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn straight_route() -> Vec<GeoPoint> {
        // Roughly north-south through Mumbai, ~1.1km per point
        (0..6)
            .map(|i| GeoPoint::new(19.0760 - i as f64 * 0.01, 72.8777))
            .collect()
    }

    #[test]
    fn test_haversine_known_distance() {
        // One degree of latitude ≈ 111.19 km
        let a = GeoPoint::new(19.0, 72.8777);
        let b = GeoPoint::new(20.0, 72.8777);
        let d = haversine_distance(&a, &b);
        assert_relative_eq!(d, 111_195.0, max_relative = 0.001);
    }

    #[test]
    fn test_haversine_zero() {
        let p = GeoPoint::new(19.0760, 72.8777);
        assert_eq!(haversine_distance(&p, &p), 0.0);
    }

    #[test]
    fn test_polyline_length() {
        let poly = straight_route();
        let len = polyline_length(&poly);
        // 5 segments of ~1112m each
        assert_relative_eq!(len, 5.0 * 1_112.0, max_relative = 0.01);
    }

    #[test]
    fn test_point_to_polyline_on_line() {
        let poly = straight_route();
        let on_line = GeoPoint::new(19.0710, 72.8777); // Between first two vertices
        let d = point_to_polyline_distance(&on_line, &poly).unwrap();
        assert!(d < 1.0, "expected near-zero, got {}", d);
    }

    #[test]
    fn test_point_to_polyline_offset() {
        let poly = straight_route();
        let offset = destination(&GeoPoint::new(19.0710, 72.8777), 800.0, 90.0);
        let d = point_to_polyline_distance(&offset, &poly).unwrap();
        assert_relative_eq!(d, 800.0, max_relative = 0.01);
    }

    #[test]
    fn test_require_route_geometry_rejects_zero_length() {
        let p = GeoPoint::new(19.0, 72.8);
        assert!(matches!(
            require_route_geometry("route-1", &[p, p]),
            Err(MatchError::InvalidGeometry { .. })
        ));
        assert!(matches!(
            require_route_geometry("route-1", &[p]),
            Err(MatchError::InvalidGeometry { .. })
        ));
        assert!(require_route_geometry("route-1", &straight_route()).is_ok());
    }

    #[test]
    fn test_point_to_polyline_rejects_degenerate() {
        let p = GeoPoint::new(19.0, 72.0);
        let result = point_to_polyline_distance(&p, &[p]);
        assert!(matches!(
            result,
            Err(MatchError::InvalidGeometry { .. })
        ));
    }

    #[test]
    fn test_overlap_identical_is_total() {
        let poly = straight_route();
        let total = polyline_length(&poly);
        let shared = overlap_length(&poly, &poly, 500.0, 25.0).unwrap();
        assert_relative_eq!(shared, total, max_relative = 1e-9);
    }

    #[test]
    fn test_overlap_disjoint_is_zero() {
        let poly_a = straight_route();
        // Same shape shifted ~5.5km east, well past the 500m buffer
        let poly_b: Vec<GeoPoint> = poly_a
            .iter()
            .map(|p| GeoPoint::new(p.latitude, p.longitude + 0.05))
            .collect();
        let shared = overlap_length(&poly_a, &poly_b, 500.0, 25.0).unwrap();
        assert_eq!(shared, 0.0);
    }

    #[test]
    fn test_overlap_partial() {
        let poly_a = straight_route();
        // Only the first half of poly_a, so roughly half the length is shared
        let poly_b: Vec<GeoPoint> = poly_a[..3].to_vec();
        let total = polyline_length(&poly_a);
        let shared = overlap_length(&poly_a, &poly_b, 500.0, 25.0).unwrap();
        assert!(shared > 0.3 * total && shared < 0.7 * total);
    }

    #[test]
    fn test_sample_polyline_spacing() {
        let poly = straight_route();
        let samples = sample_polyline(&poly, 25.0).unwrap();
        assert!(samples.len() > 200);
        let d = haversine_distance(&samples[0], &samples[1]);
        assert_relative_eq!(d, 25.0, max_relative = 0.01);
        // Endpoints preserved
        assert_eq!(samples[0], poly[0]);
        assert_eq!(*samples.last().unwrap(), poly[poly.len() - 1]);
    }

    #[test]
    fn test_destination_round_trip() {
        let start = GeoPoint::new(19.0760, 72.8777);
        for bearing in [0.0, 90.0, 180.0, 270.0, 45.0] {
            let dest = destination(&start, 1_500.0, bearing);
            let d = haversine_distance(&start, &dest);
            assert_relative_eq!(d, 1_500.0, max_relative = 1e-6);
        }
    }

    #[test]
    fn test_simplify_polyline_drops_collinear() {
        // Dense straight line simplifies down to its endpoints
        let dense: Vec<GeoPoint> = (0..100)
            .map(|i| GeoPoint::new(19.0 + i as f64 * 0.0001, 72.8777))
            .collect();
        let simplified = simplify_polyline(&dense, 0.0001);
        assert!(simplified.len() < dense.len());
        assert_eq!(simplified[0], dense[0]);
        assert_eq!(*simplified.last().unwrap(), *dense.last().unwrap());
    }
}
