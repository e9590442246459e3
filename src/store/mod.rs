//! The event store (§4.3): exact-match and replaceable/parameterized-replaceable
//! semantics, idempotent insertion, and filtered querying.

pub mod memory;
pub mod sqlite;

use async_trait::async_trait;

use crate::model::{Event, EventId, Filter, PublicKey};

/// Storage failure.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),
    #[error(transparent)]
    Pool(#[from] deadpool_sqlite::PoolError),
    #[error(transparent)]
    Interact(#[from] deadpool_sqlite::InteractError),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error("{0}")]
    Codec(String),
}

/// Whether an id is already known to the store, and in what state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventStatus {
    NotExistent,
    Saved,
    Deleted,
}

/// Outcome of [`EventStore::save`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SaveOutcome {
    pub stored: bool,
    pub reason: Option<String>,
}

impl SaveOutcome {
    pub fn stored() -> Self {
        Self {
            stored: true,
            reason: None,
        }
    }

    pub fn rejected(reason: impl Into<String>) -> Self {
        Self {
            stored: false,
            reason: Some(reason.into()),
        }
    }

    pub fn duplicate() -> Self {
        Self {
            stored: true,
            reason: Some("duplicate: already have this event".to_string()),
        }
    }
}

/// The storage engine contract. Implementations must be able to satisfy, without a full
/// scan, queries selective on id, pubkey prefix, kind set, time range, or tag(name,value)
/// (§4.3 indexing obligations).
#[async_trait]
pub trait EventStore: Send + Sync {
    /// Look up an id's current status (for the duplicate/deleted fast path in §4.2/§4.7).
    async fn status(&self, id: &EventId) -> Result<EventStatus, StoreError>;

    /// Idempotent insert honoring replaceable/addressable uniqueness (§4.3, §9). The caller
    /// is responsible for having already run the event through the validation pipeline;
    /// this method only implements storage semantics, never policy.
    async fn save(&self, event: &Event) -> Result<SaveOutcome, StoreError>;

    /// All events matching any of `filters`, ordered by `created_at` descending (ties by
    /// `id` ascending), truncated per-filter by `limit`.
    async fn query(&self, filters: &[Filter]) -> Result<Vec<Event>, StoreError>;

    /// Cardinality of the union of `filters`.
    async fn count(&self, filters: &[Filter]) -> Result<usize, StoreError>;

    /// NIP-09 deletion: remove events with the given ids, but only those authored by
    /// `author` (§4.7). Idempotent.
    async fn delete_by_ids(&self, author: &PublicKey, ids: &[EventId]) -> Result<(), StoreError>;

    /// NIP-62 vanish: remove all events authored by `author` with `created_at <= upto`,
    /// except `keep` (the vanish event's own id, which the caller has already stored and
    /// which must survive this sweep), and remember the threshold so later-arriving
    /// events in that window are rejected too (§4.7). Idempotent.
    async fn vanish(&self, author: &PublicKey, upto: u64, keep: EventId) -> Result<(), StoreError>;

    /// `(id, created_at)` pairs matching `filter`, for negentropy reconciliation (§4.9).
    async fn negentropy_items(&self, filter: &Filter) -> Result<Vec<(EventId, u64)>, StoreError>;
}

/// Default per-filter backfill cap, applied when a filter requests no `limit` or one
/// larger than this.
pub const MAX_LIMIT: usize = 5_000;

pub(crate) fn effective_limit(requested: Option<usize>) -> usize {
    requested.map(|l| l.min(MAX_LIMIT)).unwrap_or(MAX_LIMIT)
}

/// Order events the way §4.3 requires: `created_at` descending, ties by `id` ascending.
pub(crate) fn sort_events(events: &mut [Event]) {
    events.sort_by(|a, b| {
        b.created_at
            .cmp(&a.created_at)
            .then_with(|| a.id.to_hex().cmp(&b.id.to_hex()))
    });
}

/// `true` if `newer` should replace `older` under the "newer created_at, else smaller id"
/// tie-breaker (§3, §9).
pub(crate) fn replaces(newer: &Event, older: &Event) -> bool {
    replaces_parts(newer.created_at, &newer.id.to_hex(), older.created_at, &older.id.to_hex())
}

/// Same tie-breaker as [`replaces`], for callers that only have the raw `(created_at, id)`
/// parts on hand (e.g. a SQL row) rather than a full [`Event`].
pub(crate) fn replaces_parts(
    newer_created_at: u64,
    newer_id_hex: &str,
    older_created_at: u64,
    older_id_hex: &str,
) -> bool {
    match newer_created_at.cmp(&older_created_at) {
        std::cmp::Ordering::Greater => true,
        std::cmp::Ordering::Less => false,
        std::cmp::Ordering::Equal => newer_id_hex < older_id_hex,
    }
}
