//! Embedded-SQL storage backend, grounded on `nostr-sqlite`'s pool-plus-migration shape:
//! a `deadpool_sqlite` connection pool around `rusqlite`, a `user_version`-gated schema
//! migration run once at open time, and synchronous SQL executed inside `interact`.

use std::path::Path;

use async_trait::async_trait;
use deadpool_sqlite::{Config, Pool, Runtime};
use rusqlite::{params_from_iter, Connection, OptionalExtension, ToSql};

use crate::model::{Event, EventId, Filter, PublicKey};

use super::{effective_limit, replaces_parts, sort_events, EventStatus, EventStore, SaveOutcome, StoreError};

const DB_VERSION: i64 = 1;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS events (
    event_id    TEXT PRIMARY KEY,
    pubkey      TEXT NOT NULL,
    created_at  INTEGER NOT NULL,
    kind        INTEGER NOT NULL,
    content     TEXT NOT NULL,
    raw         TEXT NOT NULL,
    deleted     INTEGER NOT NULL DEFAULT 0
);
CREATE INDEX IF NOT EXISTS idx_events_pubkey_kind ON events(pubkey, kind);
CREATE INDEX IF NOT EXISTS idx_events_created_at ON events(created_at);
CREATE INDEX IF NOT EXISTS idx_events_kind ON events(kind);

CREATE TABLE IF NOT EXISTS tags (
    event_id TEXT NOT NULL,
    name     TEXT NOT NULL,
    value    TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_tags_name_value ON tags(name, value);
CREATE INDEX IF NOT EXISTS idx_tags_event_id ON tags(event_id);

CREATE TABLE IF NOT EXISTS replaceable (
    pubkey TEXT NOT NULL,
    kind   INTEGER NOT NULL,
    event_id TEXT NOT NULL,
    PRIMARY KEY (pubkey, kind)
);

CREATE TABLE IF NOT EXISTS addressable (
    pubkey     TEXT NOT NULL,
    kind       INTEGER NOT NULL,
    identifier TEXT NOT NULL,
    event_id   TEXT NOT NULL,
    PRIMARY KEY (pubkey, kind, identifier)
);

CREATE TABLE IF NOT EXISTS vanished (
    pubkey    TEXT PRIMARY KEY,
    threshold INTEGER NOT NULL
);
"#;

/// SQLite-backed event store.
#[derive(Clone)]
pub struct SqliteStore {
    pool: Pool,
}

impl SqliteStore {
    /// Open (creating if absent) a SQLite database at `path` and run schema migrations.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let cfg = Config::new(path.as_ref());
        let pool = cfg
            .create_pool(Runtime::Tokio1)
            .map_err(|e| StoreError::Codec(e.to_string()))?;
        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    /// Open an in-memory SQLite database, useful for tests that want real SQL semantics
    /// without touching the filesystem.
    pub async fn open_in_memory() -> Result<Self, StoreError> {
        Self::open(":memory:").await
    }

    async fn migrate(&self) -> Result<(), StoreError> {
        let conn = self.pool.get().await?;
        conn.interact(|conn: &mut Connection| -> Result<(), rusqlite::Error> {
            let version: i64 = conn.query_row("PRAGMA user_version;", [], |r| r.get(0))?;
            if version < DB_VERSION {
                conn.execute_batch(SCHEMA)?;
                conn.pragma_update(None, "user_version", DB_VERSION)?;
            }
            conn.execute_batch(
                "PRAGMA foreign_keys = ON; PRAGMA journal_mode = WAL; PRAGMA synchronous = NORMAL;",
            )?;
            Ok(())
        })
        .await??;
        Ok(())
    }
}

fn row_to_event(raw: String) -> Result<Event, StoreError> {
    serde_json::from_str(&raw).map_err(StoreError::Json)
}

fn delete_event_rows(conn: &Connection, id: &EventId) -> Result<(), rusqlite::Error> {
    let hex = id.to_hex();
    conn.execute("DELETE FROM events WHERE event_id = ?1", [&hex])?;
    conn.execute("DELETE FROM tags WHERE event_id = ?1", [&hex])?;
    Ok(())
}

fn insert_event_rows(conn: &Connection, event: &Event) -> Result<(), rusqlite::Error> {
    let raw = serde_json::to_string(event).expect("event always serializes");
    conn.execute(
        "INSERT INTO events (event_id, pubkey, created_at, kind, content, raw, deleted)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, 0)",
        rusqlite::params![
            event.id.to_hex(),
            event.pubkey.to_hex(),
            event.created_at as i64,
            event.kind.as_u16() as i64,
            event.content,
            raw,
        ],
    )?;
    for tag in &event.tags {
        if tag.is_indexable() {
            if let Some(value) = tag.value() {
                conn.execute(
                    "INSERT INTO tags (event_id, name, value) VALUES (?1, ?2, ?3)",
                    rusqlite::params![event.id.to_hex(), tag.name(), value],
                )?;
            }
        }
    }
    Ok(())
}

/// Build the WHERE clause and bound parameters for one filter.
fn build_where(filter: &Filter) -> (String, Vec<Box<dyn ToSql + Send>>) {
    let mut clauses: Vec<String> = vec!["deleted = 0".to_string()];
    let mut params: Vec<Box<dyn ToSql + Send>> = Vec::new();

    if !filter.ids.is_empty() {
        let ors: Vec<String> = filter
            .ids
            .iter()
            .map(|p| {
                params.push(Box::new(format!("{p}%")));
                "event_id LIKE ?".to_string()
            })
            .collect();
        clauses.push(format!("({})", ors.join(" OR ")));
    }
    if !filter.authors.is_empty() {
        let ors: Vec<String> = filter
            .authors
            .iter()
            .map(|p| {
                params.push(Box::new(format!("{p}%")));
                "pubkey LIKE ?".to_string()
            })
            .collect();
        clauses.push(format!("({})", ors.join(" OR ")));
    }
    if !filter.kinds.is_empty() {
        let placeholders = vec!["?"; filter.kinds.len()].join(",");
        for k in &filter.kinds {
            params.push(Box::new(k.as_u16() as i64));
        }
        clauses.push(format!("kind IN ({placeholders})"));
    }
    if let Some(since) = filter.since {
        params.push(Box::new(since as i64));
        clauses.push("created_at >= ?".to_string());
    }
    if let Some(until) = filter.until {
        params.push(Box::new(until as i64));
        clauses.push("created_at <= ?".to_string());
    }
    if let Some(search) = &filter.search {
        params.push(Box::new(format!("%{}%", search.to_lowercase())));
        clauses.push("LOWER(content) LIKE ?".to_string());
    }
    for (name, values) in filter.indexed_tags() {
        let placeholders = vec!["?"; values.len()].join(",");
        params.push(Box::new(name.to_string()));
        for v in values {
            params.push(Box::new(v.clone()));
        }
        clauses.push(format!(
            "event_id IN (SELECT event_id FROM tags WHERE name = ? AND value IN ({placeholders}))"
        ));
    }

    (clauses.join(" AND "), params)
}

fn query_one(conn: &Connection, filter: &Filter) -> Result<Vec<Event>, StoreError> {
    let (where_clause, params) = build_where(filter);
    let sql = format!(
        "SELECT raw FROM events WHERE {where_clause} ORDER BY created_at DESC, event_id ASC LIMIT ?"
    );
    let limit = effective_limit(filter.limit) as i64;
    let mut stmt = conn.prepare(&sql)?;
    let mut bound: Vec<&dyn ToSql> = params.iter().map(|p| p.as_ref() as &dyn ToSql).collect();
    bound.push(&limit);
    let rows = stmt.query_map(params_from_iter(bound), |row| row.get::<_, String>(0))?;
    let mut out = Vec::new();
    for row in rows {
        out.push(row_to_event(row?)?);
    }
    Ok(out)
}

#[async_trait]
impl EventStore for SqliteStore {
    async fn status(&self, id: &EventId) -> Result<EventStatus, StoreError> {
        let conn = self.pool.get().await?;
        let hex = id.to_hex();
        let status = conn
            .interact(move |conn: &mut Connection| -> Result<EventStatus, rusqlite::Error> {
                let deleted: Option<i64> = conn
                    .query_row(
                        "SELECT deleted FROM events WHERE event_id = ?1",
                        [&hex],
                        |r| r.get(0),
                    )
                    .optional()?;
                Ok(match deleted {
                    Some(1) => EventStatus::Deleted,
                    Some(_) => EventStatus::Saved,
                    None => EventStatus::NotExistent,
                })
            })
            .await??;
        Ok(status)
    }

    async fn save(&self, event: &Event) -> Result<SaveOutcome, StoreError> {
        let conn = self.pool.get().await?;
        let event = event.clone();
        let outcome = conn
            .interact(move |conn: &mut Connection| -> Result<SaveOutcome, StoreError> {
                let tx = conn.transaction()?;

                let existing: Option<i64> = tx
                    .query_row(
                        "SELECT deleted FROM events WHERE event_id = ?1",
                        [event.id.to_hex()],
                        |r| r.get(0),
                    )
                    .optional()?;
                match existing {
                    Some(1) => return Ok(SaveOutcome::rejected("duplicate: this event is deleted")),
                    Some(_) => return Ok(SaveOutcome::duplicate()),
                    None => {}
                }

                let threshold: Option<i64> = tx
                    .query_row(
                        "SELECT threshold FROM vanished WHERE pubkey = ?1",
                        [event.pubkey.to_hex()],
                        |r| r.get(0),
                    )
                    .optional()?;
                if let Some(threshold) = threshold {
                    if event.created_at as i64 <= threshold {
                        return Ok(SaveOutcome::rejected("blocked: author vanished this range"));
                    }
                }

                if event.kind.is_replaceable() {
                    let existing_id: Option<String> = tx
                        .query_row(
                            "SELECT event_id FROM replaceable WHERE pubkey = ?1 AND kind = ?2",
                            rusqlite::params![event.pubkey.to_hex(), event.kind.as_u16() as i64],
                            |r| r.get(0),
                        )
                        .optional()?;
                    if let Some(existing_id) = &existing_id {
                        let existing_created_at: i64 = tx.query_row(
                            "SELECT created_at FROM events WHERE event_id = ?1",
                            [existing_id],
                            |r| r.get(0),
                        )?;
                        let is_newer = replaces_parts(
                            event.created_at,
                            &event.id.to_hex(),
                            existing_created_at as u64,
                            existing_id,
                        );
                        if !is_newer {
                            return Ok(SaveOutcome::rejected("duplicate: older than stored event"));
                        }
                        let old_id = EventId::from_hex(existing_id)
                            .map_err(|e| StoreError::Codec(e.to_string()))?;
                        delete_event_rows(&tx, &old_id)?;
                    }
                    tx.execute(
                        "INSERT OR REPLACE INTO replaceable (pubkey, kind, event_id) VALUES (?1, ?2, ?3)",
                        rusqlite::params![
                            event.pubkey.to_hex(),
                            event.kind.as_u16() as i64,
                            event.id.to_hex()
                        ],
                    )?;
                } else if event.kind.is_addressable() {
                    let identifier = event.identifier().to_string();
                    let existing_id: Option<String> = tx
                        .query_row(
                            "SELECT event_id FROM addressable WHERE pubkey = ?1 AND kind = ?2 AND identifier = ?3",
                            rusqlite::params![
                                event.pubkey.to_hex(),
                                event.kind.as_u16() as i64,
                                identifier
                            ],
                            |r| r.get(0),
                        )
                        .optional()?;
                    if let Some(existing_id) = &existing_id {
                        let existing_created_at: i64 = tx.query_row(
                            "SELECT created_at FROM events WHERE event_id = ?1",
                            [existing_id],
                            |r| r.get(0),
                        )?;
                        let is_newer = replaces_parts(
                            event.created_at,
                            &event.id.to_hex(),
                            existing_created_at as u64,
                            existing_id,
                        );
                        if !is_newer {
                            return Ok(SaveOutcome::rejected("duplicate: older than stored event"));
                        }
                        let old_id = EventId::from_hex(existing_id)
                            .map_err(|e| StoreError::Codec(e.to_string()))?;
                        delete_event_rows(&tx, &old_id)?;
                    }
                    tx.execute(
                        "INSERT OR REPLACE INTO addressable (pubkey, kind, identifier, event_id) VALUES (?1, ?2, ?3, ?4)",
                        rusqlite::params![
                            event.pubkey.to_hex(),
                            event.kind.as_u16() as i64,
                            identifier,
                            event.id.to_hex()
                        ],
                    )?;
                }

                insert_event_rows(&tx, &event)?;
                tx.commit()?;
                Ok(SaveOutcome::stored())
            })
            .await??;
        Ok(outcome)
    }

    async fn query(&self, filters: &[Filter]) -> Result<Vec<Event>, StoreError> {
        let conn = self.pool.get().await?;
        let filters = filters.to_vec();
        let events = conn
            .interact(move |conn: &mut Connection| -> Result<Vec<Event>, StoreError> {
                let mut out = Vec::new();
                for filter in &filters {
                    out.extend(query_one(conn, filter)?);
                }
                Ok(out)
            })
            .await??;
        let mut out = events;
        sort_events(&mut out);
        out.dedup_by_key(|e| e.id);
        Ok(out)
    }

    async fn count(&self, filters: &[Filter]) -> Result<usize, StoreError> {
        Ok(self.query(filters).await?.len())
    }

    async fn delete_by_ids(&self, author: &PublicKey, ids: &[EventId]) -> Result<(), StoreError> {
        let conn = self.pool.get().await?;
        let author_hex = author.to_hex();
        let ids: Vec<String> = ids.iter().map(|i| i.to_hex()).collect();
        conn.interact(move |conn: &mut Connection| -> Result<(), rusqlite::Error> {
            let tx = conn.transaction()?;
            for id in ids {
                let owner: Option<String> = tx
                    .query_row("SELECT pubkey FROM events WHERE event_id = ?1", [&id], |r| {
                        r.get(0)
                    })
                    .optional()?;
                match owner {
                    Some(owner) if owner == author_hex => {
                        tx.execute("UPDATE events SET deleted = 1 WHERE event_id = ?1", [&id])?;
                    }
                    Some(_) => continue,
                    None => {
                        // Tombstone an id we haven't seen yet, so a late-arriving copy is
                        // still rejected.
                        tx.execute(
                            "INSERT OR IGNORE INTO events (event_id, pubkey, created_at, kind, content, raw, deleted)
                             VALUES (?1, ?2, 0, 0, '', '', 1)",
                            rusqlite::params![id, author_hex],
                        )?;
                    }
                }
            }
            tx.commit()?;
            Ok(())
        })
        .await??;
        Ok(())
    }

    async fn vanish(&self, author: &PublicKey, upto: u64, keep: EventId) -> Result<(), StoreError> {
        let conn = self.pool.get().await?;
        let author_hex = author.to_hex();
        let keep_hex = keep.to_hex();
        conn.interact(move |conn: &mut Connection| -> Result<(), rusqlite::Error> {
            let tx = conn.transaction()?;
            tx.execute(
                "DELETE FROM tags WHERE event_id IN (
                     SELECT event_id FROM events WHERE pubkey = ?1 AND created_at <= ?2 AND event_id != ?3
                 )",
                rusqlite::params![author_hex, upto as i64, keep_hex],
            )?;
            tx.execute(
                "DELETE FROM events WHERE pubkey = ?1 AND created_at <= ?2 AND event_id != ?3",
                rusqlite::params![author_hex, upto as i64, keep_hex],
            )?;
            tx.execute(
                "INSERT INTO vanished (pubkey, threshold) VALUES (?1, ?2)
                 ON CONFLICT(pubkey) DO UPDATE SET threshold = MAX(threshold, excluded.threshold)",
                rusqlite::params![author_hex, upto as i64],
            )?;
            tx.commit()?;
            Ok(())
        })
        .await??;
        Ok(())
    }

    async fn negentropy_items(&self, filter: &Filter) -> Result<Vec<(EventId, u64)>, StoreError> {
        let events = self.query(std::slice::from_ref(filter)).await?;
        Ok(events.into_iter().map(|e| (e.id, e.created_at)).collect())
    }
}
