//! Batch resolution. One store read for every distinct key, one fetch task
//! per distinct miss, one store write for everything fetched.

use crate::metrics_defs::{BATCH_FANOUT, BATCH_SIZE, STORE_HIT, STORE_MISS};
use crate::outcome::{Failure, Outcome};
use crate::reconciler::Reconciler;
use crate::types::Record;
use crate::upstream::UpstreamError;
use indexmap::{IndexMap, IndexSet};
use shared::{counter, histogram};
use std::collections::HashMap;
use tokio::task::JoinSet;

/// Fetch tasks in flight, plus which key each task is working on so a
/// panicked task can still be attributed.
struct SpawnedFetches<R: Record> {
    join_set: JoinSet<(R::Key, Result<R, Failure>)>,
    task_keys: HashMap<tokio::task::Id, R::Key>,
}

impl<R: Record> Reconciler<R> {
    /// Resolves every key in `keys`. The output has one outcome per input
    /// position, duplicates included, in input order. Upstream is called at
    /// most once per distinct missing key and never for a store hit. A failed
    /// fetch only affects the positions holding that key.
    ///
    /// If the store cannot be read, every position is `Failure::Persistence`
    /// and nothing is fetched.
    pub async fn resolve_all(&self, keys: &[R::Key]) -> Vec<Outcome<R>> {
        if keys.is_empty() {
            return Vec::new();
        }
        histogram!(BATCH_SIZE).record(keys.len() as f64);

        let distinct: Vec<R::Key> = keys
            .iter()
            .cloned()
            .collect::<IndexSet<_>>()
            .into_iter()
            .collect();

        let mut stored = match self.store.get_many(&distinct).await {
            Ok(stored) => stored,
            Err(err) => {
                let failure = self.read_failed(&err);
                return keys
                    .iter()
                    .map(|_| Outcome::Failed(failure.clone()))
                    .collect();
            }
        };
        stored.retain(|_, record| !record.is_empty());

        let distinct_count = distinct.len();
        let misses: Vec<R::Key> = distinct
            .into_iter()
            .filter(|key| !stored.contains_key(key))
            .collect();
        counter!(STORE_HIT).increment((distinct_count - misses.len()) as u64);
        counter!(STORE_MISS).increment(misses.len() as u64);

        let mut results: IndexMap<R::Key, Result<R, Failure>> = IndexMap::new();
        let mut to_fetch = Vec::new();
        for key in misses {
            if self.fetcher.known_missing(&key) {
                results.insert(key, Err(Failure::NotFound));
            } else {
                to_fetch.push(key);
            }
        }

        if !to_fetch.is_empty() {
            histogram!(BATCH_FANOUT).record(to_fetch.len() as f64);
            tracing::debug!(
                kind = R::KIND,
                batch = keys.len(),
                fetches = to_fetch.len(),
                "fanning out upstream fetches"
            );
            let spawned = self.spawn_fetches(to_fetch);
            collect_fetches(spawned, &mut results).await;
        }

        let (fetched_keys, fetched): (Vec<R::Key>, Vec<R>) = results
            .iter()
            .filter_map(|(key, result)| {
                result
                    .as_ref()
                    .ok()
                    .map(|record| (key.clone(), record.clone()))
            })
            .unzip();
        if !fetched.is_empty() {
            self.persist(&fetched_keys, &fetched).await;
        }

        keys.iter()
            .map(|key| {
                if let Some(record) = stored.get(key) {
                    return Outcome::Hit(record.clone());
                }
                match results.get(key) {
                    Some(Ok(record)) => Outcome::Fetched(record.clone()),
                    Some(Err(failure)) => Outcome::Failed(failure.clone()),
                    None => Outcome::Failed(Failure::Upstream(UpstreamError::Transport(
                        "fetch produced no result".into(),
                    ))),
                }
            })
            .collect()
    }

    fn spawn_fetches(&self, keys: Vec<R::Key>) -> SpawnedFetches<R> {
        let mut join_set = JoinSet::new();
        let mut task_keys = HashMap::new();

        for key in keys {
            let fetcher = self.fetcher.clone();
            let task_key = key.clone();
            let abort_handle = join_set.spawn(async move {
                let result = fetcher.fetch(&task_key).await;
                (task_key, result)
            });
            task_keys.insert(abort_handle.id(), key);
        }

        SpawnedFetches {
            join_set,
            task_keys,
        }
    }
}

/// Waits for every fetch task. A task that panicked is recorded as a failed
/// fetch of its key; the remaining tasks keep running.
async fn collect_fetches<R: Record>(
    spawned: SpawnedFetches<R>,
    results: &mut IndexMap<R::Key, Result<R, Failure>>,
) {
    let SpawnedFetches {
        mut join_set,
        mut task_keys,
    } = spawned;

    while let Some(joined) = join_set.join_next_with_id().await {
        match joined {
            Ok((task_id, (key, result))) => {
                task_keys.remove(&task_id);
                results.insert(key, result);
            }
            Err(err) => {
                let Some(key) = task_keys.remove(&err.id()) else {
                    continue;
                };
                tracing::error!(kind = R::KIND, key = %key, error = %err, "fetch task failed");
                results.insert(
                    key,
                    Err(Failure::Upstream(UpstreamError::Transport(format!(
                        "fetch task failed: {err}"
                    )))),
                );
            }
        }
    }
}
