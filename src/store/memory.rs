//! In-memory reference store, the default for [`crate::builder::RelayBuilder`] and the
//! backbone of the crate's own test suite. Grounded on `nostr-database`'s `MemoryDatabase`:
//! a full index rebuild on every mutation is acceptable at test/dev scale, trading index
//! sophistication for a store whose correctness is easy to read off the source.

use std::collections::{HashMap, HashSet};
use std::sync::RwLock;

use async_trait::async_trait;

use crate::model::{Event, EventId, Filter, PublicKey};

use super::{effective_limit, replaces, sort_events, EventStatus, EventStore, SaveOutcome, StoreError};

#[derive(Default)]
struct Inner {
    events: HashMap<EventId, Event>,
    deleted: HashSet<EventId>,
    /// (pubkey, kind) -> stored id, for replaceable kinds.
    replaceable: HashMap<(PublicKey, u16), EventId>,
    /// (pubkey, kind, d-tag) -> stored id, for addressable kinds.
    addressable: HashMap<(PublicKey, u16, String), EventId>,
    /// pubkey -> highest vanish threshold seen.
    vanished: HashMap<PublicKey, u64>,
}

/// An in-memory event store guarded by a single `RwLock`.
pub struct MemoryStore {
    inner: RwLock<Inner>,
    /// Optional cap on the number of regular events retained, oldest evicted first.
    max_events: Option<usize>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Inner::default()),
            max_events: None,
        }
    }

    pub fn with_max_events(max_events: usize) -> Self {
        Self {
            inner: RwLock::new(Inner::default()),
            max_events: Some(max_events),
        }
    }

    fn evict_if_needed(inner: &mut Inner, max_events: Option<usize>) {
        let Some(max) = max_events else { return };
        while inner.events.len() > max {
            let Some(oldest_id) = inner
                .events
                .values()
                .min_by_key(|e| (e.created_at, e.id.to_hex()))
                .map(|e| e.id)
            else {
                break;
            };
            inner.events.remove(&oldest_id);
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EventStore for MemoryStore {
    async fn status(&self, id: &EventId) -> Result<EventStatus, StoreError> {
        let inner = self.inner.read().unwrap();
        if inner.deleted.contains(id) {
            Ok(EventStatus::Deleted)
        } else if inner.events.contains_key(id) {
            Ok(EventStatus::Saved)
        } else {
            Ok(EventStatus::NotExistent)
        }
    }

    async fn save(&self, event: &Event) -> Result<SaveOutcome, StoreError> {
        let mut inner = self.inner.write().unwrap();

        if inner.deleted.contains(&event.id) {
            return Ok(SaveOutcome::rejected("duplicate: this event is deleted"));
        }
        if inner.events.contains_key(&event.id) {
            return Ok(SaveOutcome::duplicate());
        }
        if let Some(&threshold) = inner.vanished.get(&event.pubkey) {
            if event.created_at <= threshold {
                return Ok(SaveOutcome::rejected("blocked: author vanished this range"));
            }
        }

        if event.kind.is_replaceable() {
            let key = (event.pubkey, event.kind.as_u16());
            if let Some(existing_id) = inner.replaceable.get(&key).copied() {
                if let Some(existing) = inner.events.get(&existing_id) {
                    if !replaces(event, existing) {
                        return Ok(SaveOutcome::rejected("duplicate: older than stored event"));
                    }
                }
                inner.events.remove(&existing_id);
            }
            inner.replaceable.insert(key, event.id);
        } else if event.kind.is_addressable() {
            let key = (event.pubkey, event.kind.as_u16(), event.identifier().to_string());
            if let Some(existing_id) = inner.addressable.get(&key).cloned() {
                if let Some(existing) = inner.events.get(&existing_id) {
                    if !replaces(event, existing) {
                        return Ok(SaveOutcome::rejected("duplicate: older than stored event"));
                    }
                }
                inner.events.remove(&existing_id);
            }
            inner.addressable.insert(key, event.id);
        }

        inner.events.insert(event.id, event.clone());
        let max_events = self.max_events;
        Self::evict_if_needed(&mut inner, max_events);
        Ok(SaveOutcome::stored())
    }

    async fn query(&self, filters: &[Filter]) -> Result<Vec<Event>, StoreError> {
        let inner = self.inner.read().unwrap();
        let mut out = Vec::new();
        for filter in filters {
            let mut matched: Vec<Event> = inner
                .events
                .values()
                .filter(|e| filter.matches(e))
                .cloned()
                .collect();
            sort_events(&mut matched);
            matched.truncate(effective_limit(filter.limit));
            out.extend(matched);
        }
        out.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| a.id.to_hex().cmp(&b.id.to_hex()))
        });
        out.dedup_by_key(|e| e.id);
        Ok(out)
    }

    async fn count(&self, filters: &[Filter]) -> Result<usize, StoreError> {
        let inner = self.inner.read().unwrap();
        let ids: HashSet<EventId> = inner
            .events
            .values()
            .filter(|e| filters.iter().any(|f| f.matches(e)))
            .map(|e| e.id)
            .collect();
        Ok(ids.len())
    }

    async fn delete_by_ids(&self, author: &PublicKey, ids: &[EventId]) -> Result<(), StoreError> {
        let mut inner = self.inner.write().unwrap();
        for id in ids {
            if let Some(event) = inner.events.get(id) {
                if event.pubkey != *author {
                    continue;
                }
            }
            inner.events.remove(id);
            inner.deleted.insert(*id);
        }
        Ok(())
    }

    async fn vanish(&self, author: &PublicKey, upto: u64, keep: EventId) -> Result<(), StoreError> {
        let mut inner = self.inner.write().unwrap();
        let to_remove: Vec<EventId> = inner
            .events
            .values()
            .filter(|e| e.pubkey == *author && e.created_at <= upto && e.id != keep)
            .map(|e| e.id)
            .collect();
        for id in to_remove {
            inner.events.remove(&id);
        }
        let entry = inner.vanished.entry(*author).or_insert(0);
        if upto > *entry {
            *entry = upto;
        }
        Ok(())
    }

    async fn negentropy_items(&self, filter: &Filter) -> Result<Vec<(EventId, u64)>, StoreError> {
        let inner = self.inner.read().unwrap();
        Ok(inner
            .events
            .values()
            .filter(|e| filter.matches(e))
            .map(|e| (e.id, e.created_at))
            .collect())
    }
}
