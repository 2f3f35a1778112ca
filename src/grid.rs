//! Uniform lat/lng grid index over active routes.
//!
//! The grid is a coarse pre-filter: a query returns every route id registered
//! in the cells covering the radius, and callers apply exact distance
//! filtering afterward. Each route is registered under the cells its start
//! point, end point, and polyline bounding box touch.
//!
//! The structure itself is single-threaded; the engine wraps it in a
//! `RwLock` so queries run concurrently and mutations are exclusive.

use std::collections::{HashMap, HashSet};

use crate::error::Result;
use crate::geometry::{self, METERS_PER_DEGREE};
use crate::{GeoPoint, Route};

/// Grid cell key: (lat index, lng index) at the configured cell size.
type Cell = (i64, i64);

/// Spatial index over active routes, keyed by coarse grid cells.
#[derive(Debug)]
pub struct SpatialGrid {
    cell_size_deg: f64,
    cells: HashMap<Cell, HashSet<String>>,
    /// Reverse map for idempotent re-insertion and O(cells) removal
    route_cells: HashMap<String, Vec<Cell>>,
}

impl SpatialGrid {
    /// Create a grid with the given cell size in degrees
    /// (~0.01° ≈ 1.1km at the service's operating latitudes).
    pub fn new(cell_size_deg: f64) -> Self {
        Self {
            cell_size_deg,
            cells: HashMap::new(),
            route_cells: HashMap::new(),
        }
    }

    /// Register a route under every cell touched by its start point, end
    /// point, and polyline bounding box. Idempotent by route id:
    /// re-insertion replaces the prior registration.
    pub fn insert(&mut self, route: &Route) {
        self.remove(&route.id);

        let mut touched: HashSet<Cell> = HashSet::new();
        touched.insert(self.cell_of(&route.start));
        touched.insert(self.cell_of(&route.end));

        let bounds = route.bounds();
        let (min_lat_idx, min_lng_idx) =
            self.cell_of(&GeoPoint::new(bounds.min_lat, bounds.min_lng));
        let (max_lat_idx, max_lng_idx) =
            self.cell_of(&GeoPoint::new(bounds.max_lat, bounds.max_lng));
        for lat_idx in min_lat_idx..=max_lat_idx {
            for lng_idx in min_lng_idx..=max_lng_idx {
                touched.insert((lat_idx, lng_idx));
            }
        }

        for cell in &touched {
            self.cells
                .entry(*cell)
                .or_default()
                .insert(route.id.clone());
        }
        self.route_cells
            .insert(route.id.clone(), touched.into_iter().collect());
    }

    /// Remove all registrations for a route. No-op if absent.
    pub fn remove(&mut self, route_id: &str) {
        let Some(cells) = self.route_cells.remove(route_id) else {
            return;
        };
        for cell in cells {
            if let Some(ids) = self.cells.get_mut(&cell) {
                ids.remove(route_id);
                if ids.is_empty() {
                    self.cells.remove(&cell);
                }
            }
        }
    }

    /// Candidate route ids whose registration touches the cell range covering
    /// `radius_m` around `point`. Coarse pre-filter only, never an
    /// exact-distance-verified set.
    pub fn query_near(&self, point: &GeoPoint, radius_m: f64) -> HashSet<String> {
        let lat_span = radius_m / METERS_PER_DEGREE;
        let lng_scale = point.latitude.to_radians().cos().max(0.05);
        let lng_span = radius_m / (METERS_PER_DEGREE * lng_scale);

        let (min_lat_idx, min_lng_idx) = self.cell_of(&GeoPoint::new(
            point.latitude - lat_span,
            point.longitude - lng_span,
        ));
        let (max_lat_idx, max_lng_idx) = self.cell_of(&GeoPoint::new(
            point.latitude + lat_span,
            point.longitude + lng_span,
        ));

        let mut found = HashSet::new();
        for lat_idx in min_lat_idx..=max_lat_idx {
            for lng_idx in min_lng_idx..=max_lng_idx {
                if let Some(ids) = self.cells.get(&(lat_idx, lng_idx)) {
                    found.extend(ids.iter().cloned());
                }
            }
        }
        found
    }

    /// Union of [`query_near`](Self::query_near) over an arc-length sampling
    /// of the polyline, so routes whose proximity occurs mid-route are not
    /// missed.
    pub fn query_near_polyline(
        &self,
        poly: &[GeoPoint],
        radius_m: f64,
        step_m: f64,
    ) -> Result<HashSet<String>> {
        let samples = geometry::sample_polyline(poly, step_m)?;
        let mut found = HashSet::new();
        for sample in &samples {
            found.extend(self.query_near(sample, radius_m));
        }
        Ok(found)
    }

    /// Number of routes currently registered.
    pub fn route_count(&self) -> usize {
        self.route_cells.len()
    }

    /// Number of occupied grid cells.
    pub fn cell_count(&self) -> usize {
        self.cells.len()
    }

    /// Check if a route is registered.
    pub fn contains(&self, route_id: &str) -> bool {
        self.route_cells.contains_key(route_id)
    }

    fn cell_of(&self, point: &GeoPoint) -> Cell {
        (
            (point.latitude / self.cell_size_deg).floor() as i64,
            (point.longitude / self.cell_size_deg).floor() as i64,
        )
    }
}

impl Default for SpatialGrid {
    fn default() -> Self {
        Self::new(0.01)
    }
}
