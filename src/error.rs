//! Unified error handling for the ride-matcher library.
//!
//! Errors are `Clone` because a single in-flight match computation can be
//! awaited by many callers, each of which receives its own copy of the result.

use std::fmt;

/// Unified error type for matching operations.
#[derive(Debug, Clone, PartialEq)]
pub enum MatchError {
    /// Requested route is missing or inactive (surfaced to the caller, not retried)
    RouteNotFound { route_id: String },
    /// Route has a malformed polyline or zero-length geometry
    InvalidGeometry { route_id: String, message: String },
    /// Spatial index query exceeded its configured time bound (the call still
    /// returns a partial outcome; this variant is logged, not fatal)
    IndexQueryTimeout { route_id: String, waited_ms: u64 },
    /// Match record store failure (persistence is best-effort)
    StoreUnavailable { message: String },
    /// Generic internal error
    Internal { message: String },
}

impl fmt::Display for MatchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MatchError::RouteNotFound { route_id } => {
                write!(f, "Route '{}' not found or inactive", route_id)
            }
            MatchError::InvalidGeometry { route_id, message } => {
                write!(f, "Route '{}' has invalid geometry: {}", route_id, message)
            }
            MatchError::IndexQueryTimeout { route_id, waited_ms } => {
                write!(
                    f,
                    "Spatial index query for route '{}' timed out after {}ms",
                    route_id, waited_ms
                )
            }
            MatchError::StoreUnavailable { message } => {
                write!(f, "Match store unavailable: {}", message)
            }
            MatchError::Internal { message } => {
                write!(f, "Internal error: {}", message)
            }
        }
    }
}

impl std::error::Error for MatchError {}

/// Result type alias for matching operations.
pub type Result<T> = std::result::Result<T, MatchError>;

/// Extension trait for converting Option to MatchError.
pub trait OptionExt<T> {
    /// Convert Option to Result with a route-not-found error.
    fn ok_or_route_not_found(self, route_id: &str) -> Result<T>;

    /// Convert Option to Result with a generic internal error.
    fn ok_or_internal(self, message: &str) -> Result<T>;
}

impl<T> OptionExt<T> for Option<T> {
    fn ok_or_route_not_found(self, route_id: &str) -> Result<T> {
        self.ok_or_else(|| MatchError::RouteNotFound {
            route_id: route_id.to_string(),
        })
    }

    fn ok_or_internal(self, message: &str) -> Result<T> {
        self.ok_or_else(|| MatchError::Internal {
            message: message.to_string(),
        })
    }
}
