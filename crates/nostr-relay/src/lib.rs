//! Ingestion and query core of a Nostr relay.
//!
//! Incoming events are classified by kind and routed to one of two storage
//! tiers. Subscription queries are answered from both tiers and merged.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                          NOSTR-RELAY                             │
//! │                                                                  │
//! │   on_event ──► classify ──┬── Ephemeral ──► RingStore            │
//! │                           ├── Replaceable ─┐                     │
//! │                           ├── Addressable ─┴► SqliteEventStore   │
//! │                           └── Unsupported ──► rejected           │
//! │                                                                  │
//! │   on_query ──► QueryRouter ── per filter ──┬► RingStore (scan)   │
//! │                                            └► SqliteEventStore   │
//! │                                               (paged stream)     │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Event Kinds
//!
//! | Kinds | Category | Storage |
//! |-------|----------|---------|
//! | `0`, `3`, `10000..20000` | Replaceable | SQLite, latest per `(pubkey, kind)` |
//! | `20000..30000` | Ephemeral | in-memory ring, last N events |
//! | `30000..40000` | Addressable | SQLite, latest per `(pubkey, kind, d)` |
//! | other | Unsupported | rejected |
//!
//! # Example
//!
//! ```rust,ignore
//! use nostr_relay::{Filter, Relay, RelayConfig};
//! use tokio_util::sync::CancellationToken;
//!
//! let relay = Relay::open(&RelayConfig::from_env()?).await?;
//! relay.on_event(event).await?;
//!
//! let cancel = CancellationToken::new();
//! let events = relay.on_query(&cancel, &[Filter::new().kinds([0])]).await?;
//! ```
//!
//! # Traits
//!
//! - [`EphemeralStore`] - memory-only store for transient events
//! - [`PersistentStore`] - durable store with latest-wins replace semantics

mod classify;
mod config;
mod error;
mod events;
mod filter;
mod relay;
mod ring;
mod router;
mod store;

pub use classify::{classify, Category, IdentityKey};
pub use config::{
    ConfigError, RelayConfig, DEFAULT_DB_PATH, DEFAULT_QUERY_BATCH_SIZE, DEFAULT_RING_CAPACITY,
};
pub use error::Error;
pub use events::{d_tag, tag_value, NostrEvent, NostrTag, IDENTIFIER_TAG};
pub use filter::Filter;
pub use relay::{Admission, Relay};
pub use ring::{EphemeralStore, RingStore};
pub use router::{Backend, BackendFailure, QueryOutput, QueryRouter};
pub use store::{
    supersedes, EventStream, PersistentStore, ReplaceOutcome, SqliteEventStore, DB_FILE_NAME,
};
