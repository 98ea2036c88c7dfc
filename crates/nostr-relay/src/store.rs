use std::cmp::Ordering;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt, TryStreamExt};
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension};
use tracing::{debug, info};

use crate::classify::IdentityKey;
use crate::events::{NostrEvent, NostrTag};
use crate::filter::Filter;
use crate::Error;

pub const DB_FILE_NAME: &str = "events.db";

/// Lazy sequence of stored events. Dropping it early is always safe.
pub type EventStream = BoxStream<'static, Result<NostrEvent, Error>>;

/// Result of a latest-wins write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplaceOutcome {
    /// No event was stored for the identity key yet.
    Inserted,
    /// The event superseded the one with id `previous`.
    Replaced { previous: String },
    /// An equal or newer event is already current; nothing was written.
    Stale,
}

#[async_trait]
pub trait PersistentStore: Send + Sync {
    /// Durable write without replace semantics. Returns `false` if an event
    /// with the same id is already stored.
    async fn save(&self, event: NostrEvent) -> Result<bool, Error>;
    async fn replace(&self, event: NostrEvent) -> Result<ReplaceOutcome, Error>;
    async fn query_stream(&self, filter: &Filter) -> Result<EventStream, Error>;
    /// Idempotent schema and pragma setup.
    async fn init(&self) -> Result<(), Error> {
        Ok(())
    }
    fn close(&self) -> Result<(), Error> {
        Ok(())
    }
}

type SharedConnection = Arc<Mutex<Option<Connection>>>;

#[derive(Clone)]
pub struct SqliteEventStore {
    db: SharedConnection,
    path: Option<PathBuf>,
    batch_size: usize,
}

impl SqliteEventStore {
    /// Opens (creating if needed) `events.db` under `root`.
    pub fn open(root: impl AsRef<Path>, batch_size: usize) -> Result<Self, Error> {
        let root = root.as_ref();
        std::fs::create_dir_all(root)?;
        let path = root.join(DB_FILE_NAME);

        let conn = Connection::open(&path)?;
        init_schema(&conn)?;
        info!(db = %path.display(), "Opened event store");

        Ok(Self {
            db: Arc::new(Mutex::new(Some(conn))),
            path: Some(path),
            batch_size: batch_size.max(1),
        })
    }

    pub fn open_in_memory(batch_size: usize) -> Result<Self, Error> {
        let conn = Connection::open_in_memory()?;
        init_schema(&conn)?;
        Ok(Self {
            db: Arc::new(Mutex::new(Some(conn))),
            path: None,
            batch_size: batch_size.max(1),
        })
    }

    pub fn db_path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Number of stored events.
    pub async fn count(&self) -> Result<u64, Error> {
        self.blocking(|conn| {
            let count: i64 = conn.query_row("SELECT COUNT(*) FROM events", [], |row| row.get(0))?;
            Ok(count as u64)
        })
        .await
    }

    async fn blocking<T, F>(&self, f: F) -> Result<T, Error>
    where
        F: FnOnce(&mut Connection) -> Result<T, Error> + Send + 'static,
        T: Send + 'static,
    {
        let db = Arc::clone(&self.db);
        tokio::task::spawn_blocking(move || with_conn(&db, f)).await?
    }
}

#[async_trait]
impl PersistentStore for SqliteEventStore {
    async fn save(&self, event: NostrEvent) -> Result<bool, Error> {
        self.blocking(move |conn| Ok(insert_event(conn, &event, None)? > 0))
            .await
    }

    async fn replace(&self, event: NostrEvent) -> Result<ReplaceOutcome, Error> {
        let Some(key) = IdentityKey::for_event(&event) else {
            // Kinds without an identity have nothing to supersede.
            let inserted = self.save(event).await?;
            return Ok(if inserted {
                ReplaceOutcome::Inserted
            } else {
                ReplaceOutcome::Stale
            });
        };

        self.blocking(move |conn| replace_event(conn, &event, &key))
            .await
    }

    async fn query_stream(&self, filter: &Filter) -> Result<EventStream, Error> {
        // A closed store surfaces as `NotInitialized` from the first page.
        let since_out_of_range = filter.since.is_some_and(|since| i64::try_from(since).is_err());
        if filter.is_empty_match() || since_out_of_range {
            return Ok(stream::empty().boxed());
        }

        let state = PageState {
            db: Arc::clone(&self.db),
            filter: filter.clone(),
            after: None,
            batch_size: self.batch_size,
            exhausted: false,
        };

        let events = stream::try_unfold(state, next_page)
            .map_ok(|page| stream::iter(page.into_iter().map(Ok::<_, Error>)))
            .try_flatten();

        Ok(match filter.limit {
            Some(limit) => events.take(limit).boxed(),
            None => events.boxed(),
        })
    }

    async fn init(&self) -> Result<(), Error> {
        self.blocking(|conn| init_schema(conn)).await
    }

    fn close(&self) -> Result<(), Error> {
        let mut guard = self.db.lock().map_err(|_| Error::MutexPoisoned)?;
        if let Some(conn) = guard.take() {
            conn.close().map_err(|(_, err)| Error::Sqlite(err))?;
            info!("Closed event store");
        }
        Ok(())
    }
}

fn with_conn<T, F>(db: &Mutex<Option<Connection>>, f: F) -> Result<T, Error>
where
    F: FnOnce(&mut Connection) -> Result<T, Error>,
{
    let mut guard = db.lock().map_err(|_| Error::MutexPoisoned)?;
    let conn = guard.as_mut().ok_or(Error::NotInitialized)?;
    f(conn)
}

/// Whether `candidate` wins over the current event for the same identity.
///
/// Newer `created_at` wins; on a tie the lexically smaller id wins, so
/// re-delivering either event in any order converges on the same row.
pub fn supersedes(candidate: &NostrEvent, current_id: &str, current_created_at: u64) -> bool {
    match candidate.created_at.cmp(&current_created_at) {
        Ordering::Greater => true,
        Ordering::Less => false,
        Ordering::Equal => candidate.id.as_str() < current_id,
    }
}

fn replace_event(
    conn: &mut Connection,
    event: &NostrEvent,
    key: &IdentityKey,
) -> Result<ReplaceOutcome, Error> {
    let tx = conn.transaction()?;

    let current: Option<(String, i64)> = tx
        .query_row(
            "SELECT event_id, created_at FROM events \
             WHERE pubkey = ?1 AND kind = ?2 AND d_tag = ?3",
            params![&key.pubkey, key.kind as i64, &key.d_tag],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()?;

    let outcome = match current {
        None => ReplaceOutcome::Inserted,
        Some((current_id, created_at)) if supersedes(event, &current_id, created_at as u64) => {
            tx.execute("DELETE FROM events WHERE event_id = ?1", params![&current_id])?;
            ReplaceOutcome::Replaced {
                previous: current_id,
            }
        }
        Some((current_id, _)) => {
            debug!(event_id = %event.id, current = %current_id, "Ignoring stale replaceable event");
            return Ok(ReplaceOutcome::Stale);
        }
    };

    if insert_event(&tx, event, Some(&key.d_tag))? == 0 {
        // The id is already stored under another identity; roll back the delete.
        return Ok(ReplaceOutcome::Stale);
    }
    tx.commit()?;

    Ok(outcome)
}

fn insert_event(conn: &Connection, event: &NostrEvent, d_tag: Option<&str>) -> Result<usize, Error> {
    let created_at = i64::try_from(event.created_at)
        .map_err(|_| Error::TimestampOutOfRange(event.created_at))?;
    let tags_json = serde_json::to_string(&event.tag_parts())?;
    let changed = conn.execute(
        "INSERT OR IGNORE INTO events (event_id, pubkey, kind, d_tag, created_at, tags_json, content, sig) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            &event.id,
            &event.pubkey,
            event.kind as i64,
            d_tag,
            created_at,
            tags_json,
            &event.content,
            &event.sig,
        ],
    )?;
    Ok(changed)
}

#[derive(Debug, Clone)]
struct PageCursor {
    created_at: i64,
    event_id: String,
}

struct PageState {
    db: SharedConnection,
    filter: Filter,
    after: Option<PageCursor>,
    batch_size: usize,
    exhausted: bool,
}

async fn next_page(mut state: PageState) -> Result<Option<(Vec<NostrEvent>, PageState)>, Error> {
    if state.exhausted {
        return Ok(None);
    }

    let db = Arc::clone(&state.db);
    let filter = state.filter.clone();
    let after = state.after.clone();
    let batch_size = state.batch_size;
    let rows = tokio::task::spawn_blocking(move || {
        with_conn(&db, |conn| fetch_page(conn, &filter, after.as_ref(), batch_size))
    })
    .await??;

    state.exhausted = rows.len() < state.batch_size;
    // Stored timestamps always fit in i64.
    state.after = rows.last().map(|event| PageCursor {
        created_at: i64::try_from(event.created_at).unwrap_or(i64::MAX),
        event_id: event.id.clone(),
    });

    // Tag constraints are not pushed into SQL; apply the full predicate here.
    let matched: Vec<NostrEvent> = rows
        .into_iter()
        .filter(|event| state.filter.matches(event))
        .collect();
    Ok(Some((matched, state)))
}

struct StoredRow {
    event_id: String,
    pubkey: String,
    kind: i64,
    created_at: i64,
    tags_json: String,
    content: String,
    sig: String,
}

impl StoredRow {
    fn into_event(self) -> Result<NostrEvent, Error> {
        let parts: Vec<Vec<String>> = serde_json::from_str(&self.tags_json)?;
        Ok(NostrEvent {
            id: self.event_id,
            pubkey: self.pubkey,
            kind: self.kind as u16,
            created_at: self.created_at as u64,
            tags: parts.into_iter().map(NostrTag::from_parts).collect(),
            content: self.content,
            sig: self.sig,
        })
    }
}

fn fetch_page(
    conn: &Connection,
    filter: &Filter,
    after: Option<&PageCursor>,
    batch_size: usize,
) -> Result<Vec<NostrEvent>, Error> {
    let mut clauses: Vec<String> = Vec::new();
    let mut values: Vec<Value> = Vec::new();

    if let Some(ids) = &filter.ids {
        push_in(&mut clauses, &mut values, "event_id", ids.iter().cloned().map(Value::Text));
    }
    if let Some(authors) = &filter.authors {
        push_in(&mut clauses, &mut values, "pubkey", authors.iter().cloned().map(Value::Text));
    }
    if let Some(kinds) = &filter.kinds {
        push_in(&mut clauses, &mut values, "kind", kinds.iter().map(|kind| Value::Integer(*kind as i64)));
    }
    // An `until` beyond i64::MAX bounds nothing; `query_stream` never pages
    // with such a `since`.
    if let Some(since) = filter.since.and_then(|since| i64::try_from(since).ok()) {
        clauses.push("created_at >= ?".to_string());
        values.push(Value::Integer(since));
    }
    if let Some(until) = filter.until.and_then(|until| i64::try_from(until).ok()) {
        clauses.push("created_at <= ?".to_string());
        values.push(Value::Integer(until));
    }
    if let Some(cursor) = after {
        clauses.push("(created_at < ? OR (created_at = ? AND event_id > ?))".to_string());
        values.push(Value::Integer(cursor.created_at));
        values.push(Value::Integer(cursor.created_at));
        values.push(Value::Text(cursor.event_id.clone()));
    }

    let where_sql = if clauses.is_empty() {
        String::new()
    } else {
        format!(" WHERE {}", clauses.join(" AND "))
    };
    let sql = format!(
        "SELECT event_id, pubkey, kind, created_at, tags_json, content, sig FROM events{where_sql} \
         ORDER BY created_at DESC, event_id ASC LIMIT ?"
    );
    values.push(Value::Integer(batch_size as i64));

    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params_from_iter(values.iter()), |row| {
        Ok(StoredRow {
            event_id: row.get(0)?,
            pubkey: row.get(1)?,
            kind: row.get(2)?,
            created_at: row.get(3)?,
            tags_json: row.get(4)?,
            content: row.get(5)?,
            sig: row.get(6)?,
        })
    })?;

    let mut events = Vec::new();
    for row in rows {
        events.push(row?.into_event()?);
    }
    Ok(events)
}

fn push_in<I>(clauses: &mut Vec<String>, values: &mut Vec<Value>, column: &str, items: I)
where
    I: Iterator<Item = Value>,
{
    let before = values.len();
    values.extend(items);
    let placeholders = vec!["?"; values.len() - before].join(", ");
    clauses.push(format!("{column} IN ({placeholders})"));
}

fn init_schema(conn: &Connection) -> Result<(), Error> {
    // Writes must hit disk before a replace is acknowledged.
    conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get::<_, String>(0))?;
    conn.pragma_update(None, "synchronous", "FULL")?;

    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS events (\
            event_id TEXT PRIMARY KEY,\
            pubkey TEXT NOT NULL,\
            kind INTEGER NOT NULL,\
            d_tag TEXT,\
            created_at INTEGER NOT NULL,\
            tags_json TEXT NOT NULL,\
            content TEXT NOT NULL,\
            sig TEXT NOT NULL\
        );\
        CREATE UNIQUE INDEX IF NOT EXISTS idx_events_identity \
            ON events(pubkey, kind, d_tag) WHERE d_tag IS NOT NULL;\
        CREATE INDEX IF NOT EXISTS idx_events_created_at ON events(created_at DESC, event_id);\
        CREATE INDEX IF NOT EXISTS idx_events_kind ON events(kind, created_at);\
        CREATE INDEX IF NOT EXISTS idx_events_pubkey ON events(pubkey, created_at);",
    )?;

    Ok(())
}
