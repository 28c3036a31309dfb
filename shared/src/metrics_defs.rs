//! Common types for metrics definitions.
//!
//! Every crate declares its metrics as `MetricDef` constants in its own
//! `metrics_defs` module and records them through the macros below, so the
//! full list of emitted metrics can be printed without running anything.

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricType {
    Counter,
    Gauge,
    Histogram,
}

impl MetricType {
    pub const fn as_str(&self) -> &'static str {
        match self {
            MetricType::Counter => "Counter",
            MetricType::Gauge => "Gauge",
            MetricType::Histogram => "Histogram",
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct MetricDef {
    pub name: &'static str,
    pub metric_type: MetricType,
    pub description: &'static str,
}

impl fmt::Display for MetricDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:<32} {:<10} {}",
            self.name,
            self.metric_type.as_str(),
            self.description
        )
    }
}

/// Looks up a definition by name in a list of definitions.
pub fn find<'a>(defs: &'a [MetricDef], name: &str) -> Option<&'a MetricDef> {
    defs.iter().find(|def| def.name == name)
}

#[macro_export]
macro_rules! counter {
    ($def:expr) => {
        metrics::counter!($def.name)
    };
}

#[macro_export]
macro_rules! gauge {
    ($def:expr) => {
        metrics::gauge!($def.name)
    };
}

#[macro_export]
macro_rules! histogram {
    ($def:expr) => {
        metrics::histogram!($def.name)
    };
}
