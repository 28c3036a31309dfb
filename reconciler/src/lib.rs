//! Cache-aside access to flight records from a rate limited provider.
//!
//! Lookups are served from the store when possible. Misses are fetched
//! through a `ConcurrencyGate` that bounds simultaneous upstream calls and
//! paces their start rate, and whatever was fetched is written back.

pub mod batch;
pub mod config;
pub mod events;
pub mod gate;
pub mod metrics_defs;
pub mod negative_cache;
pub mod outcome;
pub mod reconciler;
pub mod save;
pub mod store;
pub mod types;
pub mod upstream;

#[cfg(test)]
mod testutils;

pub use events::{Event, EventSink};
pub use gate::{ConcurrencyGate, Pacer};
pub use outcome::{Failure, Outcome};
pub use reconciler::Reconciler;
pub use save::{FlightCache, SaveError, Saved};
pub use store::{LinkStore, LocalStore, RecordStore, StoreError};
pub use types::{FlightId, FlightSummary, FlightTrack, SummaryQuery, TrackPoint, UserFlightLink};
pub use upstream::{Fr24Client, Upstream, UpstreamError};

use crate::config::{Config, StoreType, ValidationError};
use std::sync::Arc;

pub const API_TOKEN_ENV: &str = "FR24_API_KEY";

#[derive(thiserror::Error, Debug)]
pub enum BuildError {
    #[error("invalid configuration: {0}")]
    Invalid(#[from] ValidationError),

    #[error("no provider API token configured and FR24_API_KEY is not set")]
    MissingApiToken,

    #[error("could not build upstream client: {0}")]
    Upstream(#[from] UpstreamError),

    #[error("could not open store: {0}")]
    Store(#[from] StoreError),
}

impl FlightCache {
    /// Builds the provider client, opens the store and wires both into a
    /// cache according to `config`.
    pub async fn from_config(config: &Config) -> Result<Self, BuildError> {
        config.validate()?;

        let api_token = match &config.upstream.api_token {
            Some(token) => token.clone(),
            None => std::env::var(API_TOKEN_ENV).map_err(|_| BuildError::MissingApiToken)?,
        };
        let client = Fr24Client::new(
            config.upstream.url.as_str(),
            &api_token,
            config.upstream.timeout(),
        )?;

        let store = match &config.store {
            StoreType::Filesystem {
                base_dir,
                filename,
                compression,
            } => LocalStore::open(base_dir, filename, *compression).await?,
            StoreType::Memory => LocalStore::in_memory(),
        };

        let gate = ConcurrencyGate::from_config(&config.gate, config.upstream.timeout());
        tracing::info!(
            upstream = %config.upstream.url,
            max_permits = config.gate.max_permits,
            requests_per_minute = config.gate.requests_per_minute,
            "flight cache ready"
        );

        let cache = FlightCache::new(Arc::new(store), Arc::new(client), gate);
        if config.negative_cache.ttl_secs == 0 {
            return Ok(cache);
        }
        Ok(cache.with_negative_cache(&config.negative_cache))
    }
}
