//! Metrics definitions for the reconciler.

use shared::metrics_defs::{MetricDef, MetricType};

pub const STORE_HIT: MetricDef = MetricDef {
    name: "store.hit",
    metric_type: MetricType::Counter,
    description: "Number of keys served from the store",
};

pub const STORE_MISS: MetricDef = MetricDef {
    name: "store.miss",
    metric_type: MetricType::Counter,
    description: "Number of keys missing or empty in the store",
};

pub const STORE_READ_FAILURE: MetricDef = MetricDef {
    name: "store.read_failure",
    metric_type: MetricType::Counter,
    description: "Number of failed store reads",
};

pub const STORE_WRITE_FAILURE: MetricDef = MetricDef {
    name: "store.write_failure",
    metric_type: MetricType::Counter,
    description: "Number of failed store writes",
};

pub const UPSTREAM_FETCH: MetricDef = MetricDef {
    name: "upstream.fetch",
    metric_type: MetricType::Counter,
    description: "Number of upstream fetches that returned a record",
};

pub const UPSTREAM_NOT_FOUND: MetricDef = MetricDef {
    name: "upstream.not_found",
    metric_type: MetricType::Counter,
    description: "Number of upstream fetches for records the provider does not have",
};

pub const UPSTREAM_FAILURE: MetricDef = MetricDef {
    name: "upstream.failure",
    metric_type: MetricType::Counter,
    description: "Number of upstream fetches that failed (rate limit, timeout, transport, decode)",
};

pub const UPSTREAM_DURATION: MetricDef = MetricDef {
    name: "upstream.duration",
    metric_type: MetricType::Histogram,
    description: "Time spent in the upstream call in seconds, excluding gate wait",
};

pub const GATE_INFLIGHT: MetricDef = MetricDef {
    name: "gate.inflight",
    metric_type: MetricType::Gauge,
    description: "Number of upstream calls currently holding a gate permit",
};

pub const GATE_WAIT_DURATION: MetricDef = MetricDef {
    name: "gate.wait.duration",
    metric_type: MetricType::Histogram,
    description: "Time waiting for a gate permit and pacing slot in seconds",
};

pub const NEGATIVE_CACHE_HIT: MetricDef = MetricDef {
    name: "negative_cache.hit",
    metric_type: MetricType::Counter,
    description: "Number of lookups answered by the negative cache",
};

pub const NEGATIVE_CACHE_MISS: MetricDef = MetricDef {
    name: "negative_cache.miss",
    metric_type: MetricType::Counter,
    description: "Number of lookups that missed the negative cache",
};

pub const BATCH_SIZE: MetricDef = MetricDef {
    name: "batch.size",
    metric_type: MetricType::Histogram,
    description: "Number of keys in a batch lookup",
};

pub const BATCH_FANOUT: MetricDef = MetricDef {
    name: "batch.fanout",
    metric_type: MetricType::Histogram,
    description: "Number of distinct upstream fetches dispatched by a batch lookup",
};

pub const ALL_METRICS: &[MetricDef] = &[
    STORE_HIT,
    STORE_MISS,
    STORE_READ_FAILURE,
    STORE_WRITE_FAILURE,
    UPSTREAM_FETCH,
    UPSTREAM_NOT_FOUND,
    UPSTREAM_FAILURE,
    UPSTREAM_DURATION,
    GATE_INFLIGHT,
    GATE_WAIT_DURATION,
    NEGATIVE_CACHE_HIT,
    NEGATIVE_CACHE_MISS,
    BATCH_SIZE,
    BATCH_FANOUT,
];
