//! Metrics for sync-index.

use iroh_metrics::{
    core::{Counter, Metric},
    struct_iterable::Iterable,
};

/// Counters for index mutations.
#[allow(missing_docs)]
#[derive(Debug, Clone, Iterable)]
pub struct Metrics {
    pub entries_inserted: Counter,
    pub entries_updated: Counter,
    pub entries_deleted: Counter,
    pub entries_tombstoned: Counter,
}

impl Default for Metrics {
    fn default() -> Self {
        Self {
            entries_inserted: Counter::new("Number of file entries inserted"),
            entries_updated: Counter::new("Number of file entries overwritten with new content"),
            entries_deleted: Counter::new("Number of file entries dropped from a peer index"),
            entries_tombstoned: Counter::new("Number of local deletions promoted to tombstones"),
        }
    }
}

impl Metric for Metrics {
    fn name() -> &'static str {
        "sync_index"
    }
}
