use crate::store::{LinkStore, LocalStore, RecordStore, StoreError};
use crate::types::{
    FlightId, FlightSummary, FlightTrack, Record, SummaryList, SummaryQuery, TrackPoint,
    UserFlightLink,
};
use crate::upstream::{Upstream, UpstreamError};
use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

pub fn takeoff() -> DateTime<Utc> {
    "2024-05-01T22:00:00Z".parse().unwrap()
}

/// Summary of a flight that took off 2024-05-01 and landed 2024-05-02.
pub fn summary(id: &str, callsign: &str) -> FlightSummary {
    FlightSummary {
        fr24_id: id.into(),
        callsign: Some(callsign.into()),
        orig_icao: Some("KSFO".into()),
        dest_icao: Some("KJFK".into()),
        datetime_takeoff: Some(takeoff()),
        datetime_landed: "2024-05-02T06:00:00Z".parse().ok(),
        ..Default::default()
    }
}

pub fn track(id: &str, points: usize) -> FlightTrack {
    FlightTrack {
        id: id.into(),
        points: (0..points)
            .map(|i| TrackPoint {
                timestamp: takeoff() + ChronoDuration::minutes(i as i64),
                altitude: 1000 * i as i32,
                heading: 90,
                ground_speed: 250,
                vertical_speed: 1500,
                latitude: 37.6,
                longitude: -122.4 + i as f64 * 0.1,
            })
            .collect(),
    }
}

pub fn query(callsign: &str) -> SummaryQuery {
    SummaryQuery::new(
        callsign,
        "2024-05-01".parse().unwrap(),
        "2024-05-02".parse().unwrap(),
    )
}

/// Upstream double with scripted answers that counts calls per key and the
/// highest number of calls it saw running at once. Unscripted keys are
/// `NotFound`.
pub struct FakeUpstream<R: Record> {
    answers: Mutex<HashMap<R::Key, Result<R, UpstreamError>>>,
    panics: Mutex<Vec<R::Key>>,
    calls: Mutex<HashMap<R::Key, usize>>,
    delay: Option<Duration>,
    current: AtomicUsize,
    max_concurrent: AtomicUsize,
}

impl<R: Record> FakeUpstream<R> {
    pub fn new() -> Self {
        FakeUpstream {
            answers: Mutex::new(HashMap::new()),
            panics: Mutex::new(Vec::new()),
            calls: Mutex::new(HashMap::new()),
            delay: None,
            current: AtomicUsize::new(0),
            max_concurrent: AtomicUsize::new(0),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn answer(self, key: R::Key, result: Result<R, UpstreamError>) -> Self {
        self.answers.lock().insert(key, result);
        self
    }

    pub fn panic_on(self, key: R::Key) -> Self {
        self.panics.lock().push(key);
        self
    }

    pub fn calls(&self, key: &R::Key) -> usize {
        self.calls.lock().get(key).copied().unwrap_or(0)
    }

    pub fn total_calls(&self) -> usize {
        self.calls.lock().values().sum()
    }

    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl<R: Record> Upstream<R> for FakeUpstream<R> {
    async fn fetch(&self, key: &R::Key) -> Result<R, UpstreamError> {
        *self.calls.lock().entry(key.clone()).or_default() += 1;

        let running = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_concurrent.fetch_max(running, Ordering::SeqCst);

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.current.fetch_sub(1, Ordering::SeqCst);

        if self.panics.lock().contains(key) {
            panic!("upstream blew up for {key}");
        }

        self.answers
            .lock()
            .get(key)
            .cloned()
            .unwrap_or(Err(UpstreamError::NotFound))
    }
}

/// `LocalStore` wrapper that can be told to fail reads, record writes or
/// link writes, and remembers the keys of every record write batch.
pub struct TestStore {
    inner: LocalStore,
    pub fail_reads: AtomicBool,
    pub fail_writes: AtomicBool,
    pub fail_links: AtomicBool,
    reads: AtomicUsize,
    writes: Mutex<Vec<Vec<String>>>,
}

impl TestStore {
    pub fn new() -> Self {
        TestStore {
            inner: LocalStore::in_memory(),
            fail_reads: AtomicBool::new(false),
            fail_writes: AtomicBool::new(false),
            fail_links: AtomicBool::new(false),
            reads: AtomicUsize::new(0),
            writes: Mutex::new(Vec::new()),
        }
    }

    pub fn failing_reads() -> Self {
        let store = Self::new();
        store.fail_reads.store(true, Ordering::SeqCst);
        store
    }

    pub fn failing_writes() -> Self {
        let store = Self::new();
        store.fail_writes.store(true, Ordering::SeqCst);
        store
    }

    pub fn inner(&self) -> &LocalStore {
        &self.inner
    }

    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    /// Keys of each attempted `upsert_many`, in call order.
    pub fn writes(&self) -> Vec<Vec<String>> {
        self.writes.lock().clone()
    }

    fn check_read(&self) -> Result<(), StoreError> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(StoreError::Backend("read refused".into()));
        }
        Ok(())
    }

    fn check_write(&self, mut keys: Vec<String>) -> Result<(), StoreError> {
        keys.sort();
        self.writes.lock().push(keys);
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Backend("write refused".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl RecordStore<FlightTrack> for TestStore {
    async fn get_many(
        &self,
        keys: &[FlightId],
    ) -> Result<HashMap<FlightId, FlightTrack>, StoreError> {
        self.check_read()?;
        RecordStore::<FlightTrack>::get_many(&self.inner, keys).await
    }

    async fn upsert_many(&self, records: &[FlightTrack]) -> Result<(), StoreError> {
        self.check_write(records.iter().map(|t| t.id.to_string()).collect())?;
        RecordStore::<FlightTrack>::upsert_many(&self.inner, records).await
    }
}

#[async_trait]
impl RecordStore<SummaryList> for TestStore {
    async fn get_many(
        &self,
        keys: &[SummaryQuery],
    ) -> Result<HashMap<SummaryQuery, SummaryList>, StoreError> {
        self.check_read()?;
        RecordStore::<SummaryList>::get_many(&self.inner, keys).await
    }

    async fn upsert_many(&self, records: &[SummaryList]) -> Result<(), StoreError> {
        self.check_write(
            records
                .iter()
                .flatten()
                .map(FlightSummary::storage_key)
                .collect(),
        )?;
        RecordStore::<SummaryList>::upsert_many(&self.inner, records).await
    }
}

#[async_trait]
impl LinkStore for TestStore {
    async fn link_many(&self, links: &[UserFlightLink]) -> Result<(), StoreError> {
        if self.fail_links.load(Ordering::SeqCst) {
            return Err(StoreError::Backend("link write refused".into()));
        }
        self.inner.link_many(links).await
    }

    async fn linked_ids(&self, owner: &str) -> Result<Vec<FlightId>, StoreError> {
        self.check_read()?;
        self.inner.linked_ids(owner).await
    }

    async fn get_linked(&self, owner: &str) -> Result<Vec<FlightSummary>, StoreError> {
        self.check_read()?;
        self.inner.get_linked(owner).await
    }
}
