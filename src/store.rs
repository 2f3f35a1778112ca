//! Durable top-K match records.
//!
//! The record store is authoritative history, in front of which the TTL cache
//! is only a performance layer. Records are upserted by
//! (requester_route_id, matched_route_id): a re-computation supersedes the
//! previous record, never duplicates it.
//!
//! Any durable key-value backend can implement [`MatchStore`]; the bundled
//! [`InMemoryMatchStore`] is the default and the reference for the contract.

use std::collections::HashMap;
use std::sync::Mutex;

use crate::error::{MatchError, Result};
use crate::MatchRecord;

/// Persistence contract for match records.
///
/// Persistence is best-effort from the orchestrator's point of view: a
/// `StoreUnavailable` error is logged and never fails the caller's request.
pub trait MatchStore: Send + Sync {
    /// Insert or replace the record keyed by
    /// (requester_route_id, matched_route_id).
    fn upsert(&self, record: MatchRecord) -> Result<()>;

    /// All records for a requester route, unordered.
    fn records_for(&self, requester_route_id: &str) -> Result<Vec<MatchRecord>>;

    /// Drop all records where the route appears as the requester.
    fn remove_requester(&self, requester_route_id: &str) -> Result<()>;

    /// Total record count.
    fn len(&self) -> usize;

    /// Check if the store is empty.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// In-memory match record store.
#[derive(Debug, Default)]
pub struct InMemoryMatchStore {
    records: Mutex<HashMap<(String, String), MatchRecord>>,
}

impl InMemoryMatchStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<(String, String), MatchRecord>>> {
        self.records.lock().map_err(|_| MatchError::StoreUnavailable {
            message: "record store lock poisoned".to_string(),
        })
    }
}

impl MatchStore for InMemoryMatchStore {
    fn upsert(&self, record: MatchRecord) -> Result<()> {
        let key = (
            record.requester_route_id.clone(),
            record.matched_route_id.clone(),
        );
        self.lock()?.insert(key, record);
        Ok(())
    }

    fn records_for(&self, requester_route_id: &str) -> Result<Vec<MatchRecord>> {
        Ok(self
            .lock()?
            .values()
            .filter(|r| r.requester_route_id == requester_route_id)
            .cloned()
            .collect())
    }

    fn remove_requester(&self, requester_route_id: &str) -> Result<()> {
        self.lock()?
            .retain(|(requester, _), _| requester != requester_route_id);
        Ok(())
    }

    fn len(&self) -> usize {
        self.records.lock().map(|r| r.len()).unwrap_or(0)
    }
}
