//! Fixed-capacity in-memory store for ephemeral events.
//!
//! Slots are guarded individually, so a writer only ever contends with a
//! reader for a single slot. A scan is not a snapshot of the whole buffer: an
//! insert racing with a query may or may not be visible to it.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use tracing::debug;

use crate::events::NostrEvent;
use crate::filter::Filter;
use crate::Error;

pub trait EphemeralStore: Send + Sync {
    fn insert(&self, event: NostrEvent) -> Result<(), Error>;
    fn query(&self, filter: &Filter) -> Result<Vec<NostrEvent>, Error>;
    fn close(&self) {}
}

#[derive(Debug)]
struct Slot {
    seq: u64,
    event: Arc<NostrEvent>,
}

#[derive(Debug)]
pub struct RingStore {
    slots: Box<[Mutex<Option<Slot>>]>,
    cursor: AtomicU64,
    closed: AtomicBool,
}

impl RingStore {
    pub fn new(capacity: usize) -> Result<Self, Error> {
        if capacity == 0 {
            return Err(Error::InvalidCapacity);
        }

        let slots = (0..capacity).map(|_| Mutex::new(None)).collect();
        Ok(Self {
            slots,
            cursor: AtomicU64::new(0),
            closed: AtomicBool::new(false),
        })
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Number of resident events.
    pub fn len(&self) -> usize {
        let admitted = self.cursor.load(Ordering::Acquire);
        usize::try_from(admitted).map_or(self.capacity(), |admitted| admitted.min(self.capacity()))
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn ensure_open(&self) -> Result<(), Error> {
        if self.is_closed() {
            return Err(Error::StoreClosed);
        }
        Ok(())
    }
}

impl EphemeralStore for RingStore {
    fn insert(&self, event: NostrEvent) -> Result<(), Error> {
        self.ensure_open()?;

        let seq = self.cursor.fetch_add(1, Ordering::AcqRel);
        let index = (seq % self.slots.len() as u64) as usize;

        let mut slot = self.slots[index].lock().map_err(|_| Error::MutexPoisoned)?;
        // Two writers a full lap apart can race for the same slot; the later
        // sequence number keeps it.
        if slot.as_ref().is_some_and(|current| current.seq > seq) {
            debug!(seq, index, "Dropping insert overtaken by a newer write");
            return Ok(());
        }
        *slot = Some(Slot {
            seq,
            event: Arc::new(event),
        });
        Ok(())
    }

    /// Matching resident events, newest first, capped by the filter's limit.
    fn query(&self, filter: &Filter) -> Result<Vec<NostrEvent>, Error> {
        self.ensure_open()?;

        if filter.is_empty_match() {
            return Ok(Vec::new());
        }

        let mut matched: Vec<(u64, Arc<NostrEvent>)> = Vec::new();
        for slot in self.slots.iter() {
            let resident = {
                let guard = slot.lock().map_err(|_| Error::MutexPoisoned)?;
                guard
                    .as_ref()
                    .map(|slot| (slot.seq, Arc::clone(&slot.event)))
            };
            if let Some((seq, event)) = resident {
                if filter.matches(&event) {
                    matched.push((seq, event));
                }
            }
        }

        matched.sort_unstable_by(|a, b| b.0.cmp(&a.0));
        if let Some(limit) = filter.limit {
            matched.truncate(limit);
        }

        Ok(matched
            .into_iter()
            .map(|(_, event)| NostrEvent::clone(&event))
            .collect())
    }

    fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;
    use crate::events::sample_event;

    fn ids(events: &[NostrEvent]) -> Vec<String> {
        events.iter().map(|event| event.id.clone()).collect()
    }

    #[test]
    fn test_rejects_zero_capacity() {
        assert!(matches!(RingStore::new(0), Err(Error::InvalidCapacity)));
    }

    #[test]
    fn test_overflow_evicts_oldest() {
        let ring = RingStore::new(3).unwrap();
        for n in 0..4 {
            ring.insert(sample_event(&format!("ev-{n}"), 20_001, n)).unwrap();
        }

        assert_eq!(ring.len(), 3);
        let all = ring.query(&Filter::new()).unwrap();
        assert_eq!(ids(&all), vec!["ev-3", "ev-2", "ev-1"]);

        let oldest = Filter::new().ids(["ev-0"]);
        assert!(ring.query(&oldest).unwrap().is_empty());
    }

    #[test]
    fn test_query_filters_and_limits() {
        let ring = RingStore::new(10).unwrap();
        ring.insert(sample_event("a", 20_001, 1)).unwrap();
        ring.insert(sample_event("b", 20_002, 2)).unwrap();
        ring.insert(sample_event("c", 20_001, 3)).unwrap();

        let by_kind = ring.query(&Filter::new().kinds([20_001])).unwrap();
        assert_eq!(ids(&by_kind), vec!["c", "a"]);

        let limited = ring.query(&Filter::new().limit(2)).unwrap();
        assert_eq!(ids(&limited), vec!["c", "b"]);

        assert!(ring.query(&Filter::new().limit(0)).unwrap().is_empty());
    }

    #[test]
    fn test_query_returns_copies() {
        let ring = RingStore::new(2).unwrap();
        ring.insert(sample_event("a", 20_001, 1)).unwrap();

        let mut first = ring.query(&Filter::new()).unwrap();
        first[0].content = "mutated".to_string();

        let second = ring.query(&Filter::new()).unwrap();
        assert_eq!(second[0].content, "content of a");
    }

    #[test]
    fn test_closed_store_fails_instead_of_returning_empty() {
        let ring = RingStore::new(2).unwrap();
        ring.insert(sample_event("a", 20_001, 1)).unwrap();
        ring.close();

        assert!(matches!(
            ring.insert(sample_event("b", 20_001, 2)),
            Err(Error::StoreClosed)
        ));
        assert!(matches!(ring.query(&Filter::new()), Err(Error::StoreClosed)));
    }

    #[test]
    fn test_concurrent_inserts_respect_capacity() {
        const CAPACITY: usize = 16;
        const WRITERS: usize = 4;
        const PER_WRITER: usize = 25;

        let ring = RingStore::new(CAPACITY).unwrap();
        std::thread::scope(|scope| {
            for writer in 0..WRITERS {
                let ring = &ring;
                scope.spawn(move || {
                    for n in 0..PER_WRITER {
                        let id = format!("w{writer}-{n}");
                        ring.insert(sample_event(&id, 20_001, n as u64)).unwrap();
                    }
                });
            }
            scope.spawn(|| {
                for _ in 0..50 {
                    let seen = ring.query(&Filter::new()).unwrap();
                    assert!(seen.len() <= CAPACITY);
                }
            });
        });

        let resident = ring.query(&Filter::new()).unwrap();
        assert_eq!(resident.len(), CAPACITY.min(WRITERS * PER_WRITER));

        let unique: HashSet<_> = resident.iter().map(|event| event.id.clone()).collect();
        assert_eq!(unique.len(), resident.len());

        // Each writer's survivors are its most recent inserts.
        for writer in 0..WRITERS {
            let mut seqs: Vec<usize> = resident
                .iter()
                .filter_map(|event| event.id.strip_prefix(&format!("w{writer}-")))
                .map(|n| n.parse().unwrap())
                .collect();
            seqs.sort_unstable();
            if let Some(first) = seqs.first() {
                let expected: Vec<usize> = (*first..PER_WRITER).collect();
                assert_eq!(seqs, expected);
            }
        }
    }

    #[test]
    fn test_fewer_inserts_than_capacity() {
        let ring = RingStore::new(8).unwrap();
        assert!(ring.is_empty());
        for n in 0..3 {
            ring.insert(sample_event(&format!("ev-{n}"), 20_001, n)).unwrap();
        }
        assert_eq!(ring.len(), 3);
        assert_eq!(ring.query(&Filter::new()).unwrap().len(), 3);
    }
}
