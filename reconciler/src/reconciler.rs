//! Cache-aside resolution of a single key: serve from the store when
//! possible, otherwise fetch through the gate and write back.

use crate::events::{Event, EventSink};
use crate::gate::ConcurrencyGate;
use crate::metrics_defs::{
    STORE_HIT, STORE_MISS, STORE_READ_FAILURE, STORE_WRITE_FAILURE, UPSTREAM_FAILURE,
    UPSTREAM_FETCH, UPSTREAM_NOT_FOUND,
};
use crate::negative_cache::NegativeCache;
use crate::outcome::{Failure, Outcome};
use crate::store::{RecordStore, StoreError};
use crate::types::Record;
use crate::upstream::{Upstream, UpstreamError};
use shared::counter;
use std::sync::Arc;

/// Everything a fetch task needs. Cloned into each spawned batch task.
pub(crate) struct Fetcher<R: Record> {
    upstream: Arc<dyn Upstream<R>>,
    gate: ConcurrencyGate,
    not_found: Option<Arc<NegativeCache<R::Key>>>,
}

impl<R: Record> Clone for Fetcher<R> {
    fn clone(&self) -> Self {
        Fetcher {
            upstream: self.upstream.clone(),
            gate: self.gate.clone(),
            not_found: self.not_found.clone(),
        }
    }
}

impl<R: Record> Fetcher<R> {
    /// Whether upstream recently answered "not found" for `key`.
    pub(crate) fn known_missing(&self, key: &R::Key) -> bool {
        self.not_found
            .as_ref()
            .is_some_and(|cache| cache.contains(key))
    }

    pub(crate) async fn fetch(&self, key: &R::Key) -> Result<R, Failure> {
        let result = self
            .gate
            .run(self.upstream.fetch(key))
            .await
            .map(|record| record.restrict_to(key));

        match result {
            Ok(record) if !record.is_empty() => {
                counter!(UPSTREAM_FETCH).increment(1);
                tracing::debug!(kind = R::KIND, key = %key, "fetched from upstream");
                Ok(record)
            }
            Ok(_) | Err(UpstreamError::NotFound) => {
                counter!(UPSTREAM_NOT_FOUND).increment(1);
                tracing::debug!(kind = R::KIND, key = %key, "not found upstream");
                if let Some(cache) = &self.not_found {
                    cache.insert(key);
                }
                Err(Failure::NotFound)
            }
            Err(err) => {
                counter!(UPSTREAM_FAILURE).increment(1);
                tracing::warn!(kind = R::KIND, key = %key, error = %err, "upstream fetch failed");
                Err(err.into())
            }
        }
    }
}

pub struct Reconciler<R: Record> {
    pub(crate) store: Arc<dyn RecordStore<R>>,
    pub(crate) fetcher: Fetcher<R>,
    events: Option<EventSink>,
}

impl<R: Record> Reconciler<R> {
    pub fn new(
        store: Arc<dyn RecordStore<R>>,
        upstream: Arc<dyn Upstream<R>>,
        gate: ConcurrencyGate,
    ) -> Self {
        Reconciler {
            store,
            fetcher: Fetcher {
                upstream,
                gate,
                not_found: None,
            },
            events: None,
        }
    }

    pub fn with_negative_cache(mut self, cache: NegativeCache<R::Key>) -> Self {
        self.fetcher.not_found = Some(Arc::new(cache));
        self
    }

    pub fn with_events(mut self, events: EventSink) -> Self {
        self.events = Some(events);
        self
    }

    pub fn gate(&self) -> &ConcurrencyGate {
        &self.fetcher.gate
    }

    /// Resolves one key. A store hit never reaches upstream; a fetched record
    /// is written back at most once. A store read failure is reported as
    /// `Failure::Persistence` without calling upstream.
    pub async fn resolve(&self, key: &R::Key) -> Outcome<R> {
        let mut stored = match self.store.get_many(std::slice::from_ref(key)).await {
            Ok(stored) => stored,
            Err(err) => return Outcome::Failed(self.read_failed(&err)),
        };

        if let Some(record) = stored.remove(key).filter(|record| !record.is_empty()) {
            counter!(STORE_HIT).increment(1);
            tracing::debug!(kind = R::KIND, key = %key, "served from store");
            return Outcome::Hit(record);
        }
        counter!(STORE_MISS).increment(1);

        if self.fetcher.known_missing(key) {
            tracing::debug!(kind = R::KIND, key = %key, "recently not found upstream");
            return Outcome::Failed(Failure::NotFound);
        }

        match self.fetcher.fetch(key).await {
            Ok(record) => {
                self.persist(std::slice::from_ref(key), std::slice::from_ref(&record))
                    .await;
                Outcome::Fetched(record)
            }
            Err(failure) => Outcome::Failed(failure),
        }
    }

    pub(crate) fn read_failed(&self, err: &StoreError) -> Failure {
        counter!(STORE_READ_FAILURE).increment(1);
        tracing::error!(kind = R::KIND, error = %err, "store read failed");
        Failure::Persistence(err.to_string())
    }

    /// Writes fetched records back in one batch. Failures are logged and
    /// reported as events; the records are still returned to the caller.
    pub(crate) async fn persist(&self, keys: &[R::Key], records: &[R]) -> bool {
        let keys: Vec<String> = keys.iter().map(ToString::to_string).collect();

        match self.store.upsert_many(records).await {
            Ok(()) => {
                tracing::info!(kind = R::KIND, count = records.len(), "cached fetched records");
                self.emit(Event::RecordsCached { kind: R::KIND, keys });
                true
            }
            Err(err) => {
                counter!(STORE_WRITE_FAILURE).increment(1);
                tracing::error!(
                    kind = R::KIND,
                    count = records.len(),
                    error = %err,
                    "failed to cache fetched records"
                );
                self.emit(Event::CacheWriteFailed {
                    kind: R::KIND,
                    keys,
                    reason: err.to_string(),
                });
                false
            }
        }
    }

    fn emit(&self, event: Event) {
        if let Some(events) = &self.events {
            events.emit(event);
        }
    }
}
