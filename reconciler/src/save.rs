//! `FlightCache` ties the summary and track reconcilers to the owner link
//! table. Saving a set of flights persists their summaries, warms their
//! tracks and links them to the owner.

use crate::config::NegativeCacheConfig;
use crate::events::{Event, EventSink};
use crate::gate::ConcurrencyGate;
use crate::metrics_defs::STORE_WRITE_FAILURE;
use crate::negative_cache::NegativeCache;
use crate::outcome::Outcome;
use crate::reconciler::Reconciler;
use crate::store::{LinkStore, RecordStore, StoreError};
use crate::types::{FlightId, FlightSummary, FlightTrack, SummaryList, SummaryQuery, UserFlightLink};
use crate::upstream::Upstream;
use indexmap::IndexSet;
use serde::Serialize;
use shared::counter;
use std::sync::Arc;
use std::time::Duration;

#[derive(thiserror::Error, Debug)]
pub enum SaveError {
    #[error("could not persist flight summaries: {0}")]
    Persistence(#[from] StoreError),
}

/// What a successful save persisted and did afterwards.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct Saved {
    /// The summaries as persisted, after normalization.
    pub flights: Vec<FlightSummary>,
    /// Distinct non-empty flight ids among the saved summaries.
    pub flight_ids: Vec<FlightId>,
    pub tracks_cached: usize,
    pub tracks_fetched: usize,
    pub tracks_failed: usize,
    pub linked: usize,
    pub link_error: Option<String>,
}

pub struct FlightCache {
    summaries: Reconciler<SummaryList>,
    tracks: Reconciler<FlightTrack>,
    summary_store: Arc<dyn RecordStore<SummaryList>>,
    links: Arc<dyn LinkStore>,
    events: Option<EventSink>,
}

impl FlightCache {
    /// Both reconcilers share `gate`, so the permit count and request rate
    /// apply to the provider as a whole.
    pub fn new<S, U>(store: Arc<S>, upstream: Arc<U>, gate: ConcurrencyGate) -> Self
    where
        S: RecordStore<SummaryList> + RecordStore<FlightTrack> + LinkStore + 'static,
        U: Upstream<SummaryList> + Upstream<FlightTrack> + 'static,
    {
        let summary_store: Arc<dyn RecordStore<SummaryList>> = store.clone();
        let track_store: Arc<dyn RecordStore<FlightTrack>> = store.clone();
        let summary_upstream: Arc<dyn Upstream<SummaryList>> = upstream.clone();
        let track_upstream: Arc<dyn Upstream<FlightTrack>> = upstream;

        FlightCache {
            summaries: Reconciler::new(summary_store.clone(), summary_upstream, gate.clone()),
            tracks: Reconciler::new(track_store, track_upstream, gate),
            summary_store,
            links: store,
            events: None,
        }
    }

    pub fn with_negative_cache(mut self, config: &NegativeCacheConfig) -> Self {
        let ttl = Duration::from_secs(config.ttl_secs);
        self.summaries = self
            .summaries
            .with_negative_cache(NegativeCache::new(config.capacity, ttl));
        self.tracks = self
            .tracks
            .with_negative_cache(NegativeCache::new(config.capacity, ttl));
        self
    }

    pub fn with_events(mut self, events: EventSink) -> Self {
        self.summaries = self.summaries.with_events(events.clone());
        self.tracks = self.tracks.with_events(events.clone());
        self.events = Some(events);
        self
    }

    pub fn gate(&self) -> &ConcurrencyGate {
        self.tracks.gate()
    }

    pub async fn summary(&self, query: &SummaryQuery) -> Outcome<SummaryList> {
        self.summaries.resolve(query).await
    }

    pub async fn track(&self, id: &FlightId) -> Outcome<FlightTrack> {
        self.tracks.resolve(id).await
    }

    pub async fn tracks(&self, ids: &[FlightId]) -> Vec<Outcome<FlightTrack>> {
        self.tracks.resolve_all(ids).await
    }

    /// Saves `flights` for `owner`.
    ///
    /// The summaries are persisted first, in one write; if that fails nothing
    /// else happens and the save fails. Afterwards the tracks of every flight
    /// with a provider id are resolved (fetching and caching the missing
    /// ones) and the flights are linked to `owner`. Problems in those later
    /// steps are logged and reported in `Saved`.
    pub async fn save(&self, flights: Vec<FlightSummary>, owner: &str) -> Result<Saved, SaveError> {
        let flights: SummaryList = flights.into_iter().map(FlightSummary::normalized).collect();

        if let Err(err) = self.summary_store.upsert_many(&[flights.clone()]).await {
            counter!(STORE_WRITE_FAILURE).increment(1);
            tracing::error!(owner, count = flights.len(), error = %err, "failed to save flights");
            return Err(err.into());
        }
        warn_on_key_collisions(&flights, owner);

        let flight_ids: Vec<FlightId> = flights
            .iter()
            .map(|flight| flight.fr24_id.clone())
            .filter(|id| !id.is_empty())
            .collect::<IndexSet<_>>()
            .into_iter()
            .collect();

        self.emit(Event::FlightsSaved {
            owner: owner.to_string(),
            count: flights.len(),
        });
        let mut saved = Saved {
            flights,
            flight_ids: flight_ids.clone(),
            ..Default::default()
        };

        if flight_ids.is_empty() {
            tracing::info!(
                owner,
                count = saved.flights.len(),
                "saved flights without provider ids"
            );
            return Ok(saved);
        }

        for outcome in self.tracks.resolve_all(&flight_ids).await {
            match outcome {
                Outcome::Hit(_) => saved.tracks_cached += 1,
                Outcome::Fetched(_) => saved.tracks_fetched += 1,
                Outcome::Failed(_) => saved.tracks_failed += 1,
            }
        }
        if saved.tracks_failed > 0 {
            tracing::warn!(owner, failed = saved.tracks_failed, "could not warm all saved tracks");
        }

        let links: Vec<UserFlightLink> = flight_ids
            .iter()
            .map(|id| UserFlightLink::new(owner, id.clone()))
            .collect();
        match self.links.link_many(&links).await {
            Ok(()) => {
                saved.linked = links.len();
                self.emit(Event::FlightsLinked {
                    owner: owner.to_string(),
                    flight_ids,
                });
            }
            Err(err) => {
                counter!(STORE_WRITE_FAILURE).increment(1);
                tracing::warn!(owner, error = %err, "failed to link saved flights");
                saved.link_error = Some(err.to_string());
            }
        }

        tracing::info!(
            owner,
            summaries = saved.flights.len(),
            linked = saved.linked,
            "saved flights"
        );
        Ok(saved)
    }

    /// Every stored summary linked to `owner`.
    pub async fn flights_for(&self, owner: &str) -> Result<Vec<FlightSummary>, StoreError> {
        self.links.get_linked(owner).await
    }

    /// Tracks of every flight linked to `owner`, fetching the ones not cached.
    pub async fn tracks_for(&self, owner: &str) -> Result<Vec<Outcome<FlightTrack>>, StoreError> {
        let ids = self.links.linked_ids(owner).await?;
        Ok(self.tracks.resolve_all(&ids).await)
    }

    fn emit(&self, event: Event) {
        if let Some(events) = &self.events {
            events.emit(event);
        }
    }
}

/// Summaries without a provider id that share a provisional key replace each
/// other in the store; only the last one of such a group is kept.
fn warn_on_key_collisions(flights: &[FlightSummary], owner: &str) {
    let provisional: Vec<String> = flights
        .iter()
        .filter(|flight| flight.fr24_id.is_empty())
        .map(FlightSummary::provisional_key)
        .collect();
    let distinct: IndexSet<&String> = provisional.iter().collect();

    if distinct.len() < provisional.len() {
        tracing::warn!(
            owner,
            collapsed = provisional.len() - distinct.len(),
            "flights without provider ids share a provisional key"
        );
    }
}
