//! Persistent side of the cache. The reconciler only talks to the store
//! through `RecordStore` and `LinkStore`; `LocalStore` is the bundled
//! implementation, holding a snapshot in memory and optionally writing it to
//! disk after every change.

use crate::config::Compression;
use crate::types::{
    FlightId, FlightSummary, FlightTrack, Record, SummaryList, SummaryQuery, UserFlightLink,
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;

#[derive(thiserror::Error, Debug)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("encode error: {0}")]
    Encode(#[from] bincode::error::EncodeError),

    #[error("decode error: {0}")]
    Decode(#[from] bincode::error::DecodeError),

    #[error("store backend error: {0}")]
    Backend(String),
}

/// Keyed access to one kind of record. Missing and empty records are both
/// left out of `get_many` results.
#[async_trait]
pub trait RecordStore<R: Record>: Send + Sync {
    async fn get_many(&self, keys: &[R::Key]) -> Result<HashMap<R::Key, R>, StoreError>;
    async fn upsert_many(&self, records: &[R]) -> Result<(), StoreError>;
}

/// Owner to flight association, used to scope "all flights of a caller".
#[async_trait]
pub trait LinkStore: Send + Sync {
    async fn link_many(&self, links: &[UserFlightLink]) -> Result<(), StoreError>;
    async fn linked_ids(&self, owner: &str) -> Result<Vec<FlightId>, StoreError>;
    /// Summaries of every flight linked to `owner`.
    async fn get_linked(&self, owner: &str) -> Result<Vec<FlightSummary>, StoreError>;
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
struct Snapshot {
    summaries: BTreeMap<String, FlightSummary>,
    tracks: BTreeMap<FlightId, FlightTrack>,
    links: BTreeSet<UserFlightLink>,
}

struct Codec {
    compression: Compression,
    config: bincode::config::Configuration,
}

impl Codec {
    fn new(compression: Compression) -> Self {
        Codec {
            compression,
            // standard defaults to little-endian + varint
            config: bincode::config::standard(),
        }
    }

    fn level(&self) -> Option<i32> {
        match self.compression {
            Compression::None => None,
            Compression::Zstd1 => Some(1),
            Compression::Zstd3 => Some(3),
        }
    }

    fn write<W: Write>(&self, writer: &mut W, data: &Snapshot) -> Result<usize, StoreError> {
        match self.level() {
            None => {
                let size = bincode::serde::encode_into_std_write(data, writer, self.config)?;
                writer.flush()?;
                Ok(size)
            }
            Some(level) => {
                let mut encoder = zstd::stream::write::Encoder::new(writer, level)?;
                let size = bincode::serde::encode_into_std_write(data, &mut encoder, self.config)?;
                encoder.finish()?;
                Ok(size)
            }
        }
    }

    fn read<R: Read>(&self, mut reader: R) -> Result<Snapshot, StoreError> {
        match self.level() {
            None => Ok(bincode::serde::decode_from_std_read(
                &mut reader,
                self.config,
            )?),
            Some(_) => {
                let mut decoder = zstd::stream::read::Decoder::new(reader)?;
                Ok(bincode::serde::decode_from_std_read(
                    &mut decoder,
                    self.config,
                )?)
            }
        }
    }
}

/// Snapshot store. Writes are applied to a copy of the snapshot which only
/// replaces the live one once it has been written to disk, so a failed write
/// leaves the store unchanged.
pub struct LocalStore {
    path: Option<PathBuf>,
    codec: Codec,
    data: Mutex<Snapshot>,
}

impl LocalStore {
    pub fn in_memory() -> Self {
        LocalStore {
            path: None,
            codec: Codec::new(Compression::None),
            data: Mutex::new(Snapshot::default()),
        }
    }

    /// Opens the snapshot at `base_dir/filename`, starting empty if the file
    /// does not exist yet.
    pub async fn open(
        base_dir: &str,
        filename: &str,
        compression: Compression,
    ) -> Result<Self, StoreError> {
        let path = Path::new(base_dir).join(filename);
        let codec = Codec::new(compression);

        let snapshot = match tokio::fs::read(&path).await {
            Ok(bytes) => codec.read(bytes.as_slice())?,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                tracing::info!(path = %path.display(), "no store snapshot yet, starting empty");
                Snapshot::default()
            }
            Err(err) => return Err(err.into()),
        };

        Ok(LocalStore {
            path: Some(path),
            codec,
            data: Mutex::new(snapshot),
        })
    }

    async fn write_snapshot(&self, snapshot: &Snapshot) -> Result<(), StoreError> {
        let Some(path) = &self.path else {
            return Ok(());
        };

        let mut buffer = Vec::new();
        let size = self.codec.write(&mut buffer, snapshot)?;

        let tmp = path.with_extension("tmp");
        tokio::fs::write(&tmp, &buffer).await?;
        tokio::fs::rename(&tmp, path).await?;

        tracing::debug!(path = %path.display(), bytes = size, "store snapshot written");
        Ok(())
    }

    async fn update<F>(&self, apply: F) -> Result<(), StoreError>
    where
        F: FnOnce(&mut Snapshot),
    {
        let mut guard = self.data.lock().await;
        let mut next = guard.clone();
        apply(&mut next);
        self.write_snapshot(&next).await?;
        *guard = next;
        Ok(())
    }
}

#[async_trait]
impl RecordStore<FlightTrack> for LocalStore {
    async fn get_many(
        &self,
        keys: &[FlightId],
    ) -> Result<HashMap<FlightId, FlightTrack>, StoreError> {
        let data = self.data.lock().await;
        Ok(keys
            .iter()
            .filter_map(|key| data.tracks.get(key))
            .filter(|track| !track.is_empty())
            .map(|track| (track.id.clone(), track.clone()))
            .collect())
    }

    async fn upsert_many(&self, records: &[FlightTrack]) -> Result<(), StoreError> {
        self.update(|snapshot| {
            for track in records.iter().filter(|t| !t.id.is_empty()) {
                snapshot.tracks.insert(track.id.clone(), track.clone());
            }
        })
        .await
    }
}

#[async_trait]
impl RecordStore<SummaryList> for LocalStore {
    async fn get_many(
        &self,
        keys: &[SummaryQuery],
    ) -> Result<HashMap<SummaryQuery, SummaryList>, StoreError> {
        let data = self.data.lock().await;
        let mut found = HashMap::new();

        for query in keys {
            let matches: SummaryList = data
                .summaries
                .values()
                .filter(|summary| query.matches(summary))
                .cloned()
                .collect();
            if !matches.is_empty() {
                found.insert(query.clone(), matches);
            }
        }

        Ok(found)
    }

    async fn upsert_many(&self, records: &[SummaryList]) -> Result<(), StoreError> {
        self.update(|snapshot| {
            for summary in records.iter().flatten() {
                if !summary.fr24_id.is_empty() {
                    // The provider has assigned an id, drop the provisional entry.
                    snapshot.summaries.remove(&summary.provisional_key());
                }
                snapshot
                    .summaries
                    .insert(summary.storage_key(), summary.clone());
            }
        })
        .await
    }
}

#[async_trait]
impl LinkStore for LocalStore {
    async fn link_many(&self, links: &[UserFlightLink]) -> Result<(), StoreError> {
        self.update(|snapshot| snapshot.links.extend(links.iter().cloned()))
            .await
    }

    async fn linked_ids(&self, owner: &str) -> Result<Vec<FlightId>, StoreError> {
        let data = self.data.lock().await;
        Ok(data
            .links
            .iter()
            .filter(|link| link.owner == owner)
            .map(|link| link.flight_id.clone())
            .collect())
    }

    async fn get_linked(&self, owner: &str) -> Result<Vec<FlightSummary>, StoreError> {
        let data = self.data.lock().await;
        Ok(data
            .links
            .iter()
            .filter(|link| link.owner == owner)
            .filter_map(|link| data.summaries.get(link.flight_id.as_str()))
            .cloned()
            .collect())
    }
}
