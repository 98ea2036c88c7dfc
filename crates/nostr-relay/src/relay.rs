use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::classify::{classify, Category};
use crate::config::RelayConfig;
use crate::events::NostrEvent;
use crate::filter::Filter;
use crate::ring::{EphemeralStore, RingStore};
use crate::router::{QueryOutput, QueryRouter};
use crate::store::{PersistentStore, ReplaceOutcome, SqliteEventStore};
use crate::Error;

/// Where an accepted event ended up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Admission {
    Ephemeral,
    Persistent(ReplaceOutcome),
}

/// One relay instance: both storage tiers plus the query router.
#[derive(Clone)]
pub struct Relay {
    ephemeral: Arc<dyn EphemeralStore>,
    persistent: Arc<dyn PersistentStore>,
    router: QueryRouter,
}

impl Relay {
    pub fn new(ephemeral: Arc<dyn EphemeralStore>, persistent: Arc<dyn PersistentStore>) -> Self {
        let router = QueryRouter::new(Arc::clone(&ephemeral), Arc::clone(&persistent));
        Self {
            ephemeral,
            persistent,
            router,
        }
    }

    /// Builds the ring and opens the SQLite store described by `config`.
    pub async fn open(config: &RelayConfig) -> Result<Self, Error> {
        let ring = RingStore::new(config.ring_capacity)?;
        let db_path = config.db_path.clone();
        let batch_size = config.query_batch_size;
        let store =
            tokio::task::spawn_blocking(move || SqliteEventStore::open(db_path, batch_size))
                .await??;
        store.init().await?;

        info!(
            ring_capacity = config.ring_capacity,
            db = %config.db_path.display(),
            "Relay core ready"
        );
        Ok(Self::new(Arc::new(ring), Arc::new(store)))
    }

    pub async fn on_event(&self, event: NostrEvent) -> Result<Admission, Error> {
        info!(event_id = %event.id, kind = event.kind, "Received event");

        match classify(event.kind) {
            Category::Ephemeral => {
                let event_id = event.id.clone();
                if let Err(err) = self.ephemeral.insert(event) {
                    error!(event_id = %event_id, error = %err, "Failed to store ephemeral event");
                    return Err(err);
                }
                info!(event_id = %event_id, "Ephemeral event stored");
                Ok(Admission::Ephemeral)
            }
            Category::Replaceable | Category::Addressable => {
                let event_id = event.id.clone();
                match self.persistent.replace(event).await {
                    Ok(outcome) => {
                        info!(event_id = %event_id, outcome = ?outcome, "Replaceable event saved");
                        Ok(Admission::Persistent(outcome))
                    }
                    Err(err) => {
                        error!(event_id = %event_id, error = %err, "Failed to save replaceable event");
                        Err(err)
                    }
                }
            }
            Category::Unsupported => {
                warn!(event_id = %event.id, kind = event.kind, "Rejected unsupported event kind");
                Err(Error::ClassificationRejected(event.kind))
            }
        }
    }

    pub async fn on_query(
        &self,
        cancel: &CancellationToken,
        filters: &[Filter],
    ) -> Result<Vec<NostrEvent>, Error> {
        Ok(self.query(cancel, filters).await.events)
    }

    /// Like [`Relay::on_query`] but also reports cancellation and per-backend
    /// failures.
    pub async fn query(&self, cancel: &CancellationToken, filters: &[Filter]) -> QueryOutput {
        info!(filters = filters.len(), "Received query");
        let output = self.router.query(cancel, filters).await;
        info!(
            events = output.events.len(),
            cancelled = output.cancelled,
            failures = output.failures.len(),
            "Query answered"
        );
        output
    }

    /// Stops accepting writes on both tiers.
    pub fn shutdown(&self) -> Result<(), Error> {
        self.ephemeral.close();
        self.persistent.close()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use futures::stream::{self, StreamExt};

    use super::*;
    use crate::events::{d_tag, sample_event};
    use crate::store::EventStream;

    #[derive(Default)]
    struct CountingRing {
        inserts: AtomicUsize,
    }

    impl EphemeralStore for CountingRing {
        fn insert(&self, _event: NostrEvent) -> Result<(), Error> {
            self.inserts.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn query(&self, _filter: &Filter) -> Result<Vec<NostrEvent>, Error> {
            Ok(Vec::new())
        }
    }

    #[derive(Default)]
    struct CountingStore {
        writes: AtomicUsize,
        fail: bool,
    }

    #[async_trait]
    impl PersistentStore for CountingStore {
        async fn save(&self, _event: NostrEvent) -> Result<bool, Error> {
            self.writes.fetch_add(1, Ordering::SeqCst);
            Ok(true)
        }

        async fn replace(&self, _event: NostrEvent) -> Result<ReplaceOutcome, Error> {
            self.writes.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(Error::Io(std::io::Error::new(
                    std::io::ErrorKind::Other,
                    "disk full",
                )));
            }
            Ok(ReplaceOutcome::Inserted)
        }

        async fn query_stream(&self, _filter: &Filter) -> Result<EventStream, Error> {
            Ok(stream::empty().boxed())
        }
    }

    fn counting_relay(fail: bool) -> (Relay, Arc<CountingRing>, Arc<CountingStore>) {
        let ring = Arc::new(CountingRing::default());
        let store = Arc::new(CountingStore {
            fail,
            ..Default::default()
        });
        let relay = Relay::new(ring.clone(), store.clone());
        (relay, ring, store)
    }

    #[tokio::test]
    async fn test_unsupported_kind_touches_no_store() {
        let (relay, ring, store) = counting_relay(false);

        for kind in [1, 7, 40_000] {
            let err = relay.on_event(sample_event("x", kind, 1)).await.unwrap_err();
            assert!(matches!(err, Error::ClassificationRejected(k) if k == kind));
        }

        assert_eq!(ring.inserts.load(Ordering::SeqCst), 0);
        assert_eq!(store.writes.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_routes_by_category() {
        let (relay, ring, store) = counting_relay(false);

        assert_eq!(
            relay.on_event(sample_event("e", 20_001, 1)).await.unwrap(),
            Admission::Ephemeral
        );
        assert_eq!(
            relay.on_event(sample_event("r", 0, 1)).await.unwrap(),
            Admission::Persistent(ReplaceOutcome::Inserted)
        );
        let mut addressable = sample_event("a", 30_023, 1);
        addressable.tags.push(d_tag("slug"));
        relay.on_event(addressable).await.unwrap();

        assert_eq!(ring.inserts.load(Ordering::SeqCst), 1);
        assert_eq!(store.writes.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_write_failure_is_surfaced() {
        let (relay, _ring, _store) = counting_relay(true);
        let err = relay.on_event(sample_event("r", 0, 1)).await.unwrap_err();
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn test_open_initializes_store() {
        let dir = tempfile::tempdir().unwrap();
        let config = RelayConfig {
            db_path: dir.path().join("db"),
            ..Default::default()
        };

        let relay = Relay::open(&config).await.unwrap();
        relay.on_event(sample_event("r", 0, 1)).await.unwrap();
        relay.shutdown().unwrap();

        let reopened = Relay::open(&config).await.unwrap();
        let events = reopened
            .on_query(&CancellationToken::new(), &[Filter::new().kinds([0])])
            .await
            .unwrap();
        assert_eq!(events.len(), 1);
    }

    #[tokio::test]
    async fn test_shutdown_closes_both_tiers() {
        let ring = Arc::new(RingStore::new(4).unwrap());
        let store = Arc::new(SqliteEventStore::open_in_memory(8).unwrap());
        let relay = Relay::new(ring, store);

        relay.shutdown().unwrap();

        assert!(matches!(
            relay.on_event(sample_event("e", 20_001, 1)).await,
            Err(Error::StoreClosed)
        ));
        assert!(matches!(
            relay.on_event(sample_event("r", 0, 1)).await,
            Err(Error::NotInitialized)
        ));

        let output = relay.query(&CancellationToken::new(), &[Filter::new()]).await;
        assert!(output.events.is_empty());
        assert_eq!(output.failures.len(), 2);
    }
}
