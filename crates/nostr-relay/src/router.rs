//! Fan-out of subscription filters over both storage tiers.
//!
//! Each filter is answered by the ephemeral ring and then by the persistent
//! store. A failing backend only loses its own contribution for that filter.
//! Cancellation is cooperative: it is checked before each filter and between
//! items of the persistent stream, and stops the whole query with whatever
//! was gathered so far.

use std::fmt;
use std::sync::Arc;

use futures::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::events::NostrEvent;
use crate::filter::Filter;
use crate::ring::EphemeralStore;
use crate::store::PersistentStore;
use crate::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    Ephemeral,
    Persistent,
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Backend::Ephemeral => f.write_str("ephemeral"),
            Backend::Persistent => f.write_str("persistent"),
        }
    }
}

/// One backend failing for one filter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendFailure {
    pub filter_index: usize,
    pub backend: Backend,
    pub message: String,
}

#[derive(Debug, Default)]
pub struct QueryOutput {
    pub events: Vec<NostrEvent>,
    /// The caller withdrew interest before every filter was answered.
    pub cancelled: bool,
    pub failures: Vec<BackendFailure>,
}

impl QueryOutput {
    fn record_failure(&mut self, filter_index: usize, backend: Backend, err: &Error) {
        warn!(filter_index, %backend, error = %err, "Query backend failed");
        self.failures.push(BackendFailure {
            filter_index,
            backend,
            message: err.to_string(),
        });
    }
}

enum Drain {
    Finished,
    Cancelled,
}

#[derive(Clone)]
pub struct QueryRouter {
    ephemeral: Arc<dyn EphemeralStore>,
    persistent: Arc<dyn PersistentStore>,
}

impl QueryRouter {
    pub fn new(ephemeral: Arc<dyn EphemeralStore>, persistent: Arc<dyn PersistentStore>) -> Self {
        Self {
            ephemeral,
            persistent,
        }
    }

    pub async fn query(&self, cancel: &CancellationToken, filters: &[Filter]) -> QueryOutput {
        let mut output = QueryOutput::default();

        for (index, filter) in filters.iter().enumerate() {
            if cancel.is_cancelled() {
                output.cancelled = true;
                break;
            }

            match self.ephemeral.query(filter) {
                Ok(events) => output.events.extend(events),
                Err(err) => output.record_failure(index, Backend::Ephemeral, &err),
            }

            if let Drain::Cancelled = self.drain_persistent(index, filter, cancel, &mut output).await {
                debug!(filter_index = index, "Query cancelled while streaming");
                output.cancelled = true;
                break;
            }
        }

        output
    }

    async fn drain_persistent(
        &self,
        index: usize,
        filter: &Filter,
        cancel: &CancellationToken,
        output: &mut QueryOutput,
    ) -> Drain {
        let mut stream = match self.persistent.query_stream(filter).await {
            Ok(stream) => stream,
            Err(err) => {
                output.record_failure(index, Backend::Persistent, &err);
                return Drain::Finished;
            }
        };

        loop {
            tokio::select! {
                biased;

                () = cancel.cancelled() => return Drain::Cancelled,

                item = stream.next() => match item {
                    Some(Ok(event)) => output.events.push(event),
                    Some(Err(err)) => {
                        output.record_failure(index, Backend::Persistent, &err);
                        return Drain::Finished;
                    }
                    None => return Drain::Finished,
                },
            }
        }
    }
}
