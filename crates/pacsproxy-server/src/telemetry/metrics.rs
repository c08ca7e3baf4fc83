// SPDX-License-Identifier: Apache-2.0

use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Default)]
pub struct CacheMetrics {
    pub metadata_hits: AtomicU64,
    pub metadata_misses: AtomicU64,
    pub metadata_evictions: AtomicU64,
    pub metadata_query_failures: AtomicU64,
    pub payload_hits: AtomicU64,
    pub payload_misses: AtomicU64,
    pub payload_not_found: AtomicU64,
    pub retrievals_started: AtomicU64,
    pub retrievals_joined: AtomicU64,
    pub retrievals_failed: AtomicU64,
    pub retrievals_timed_out: AtomicU64,
}

impl CacheMetrics {
    pub(crate) fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    #[must_use]
    pub fn snapshot(&self) -> Vec<(&'static str, u64)> {
        vec![
            ("pacsproxy_metadata_hits_total", load(&self.metadata_hits)),
            ("pacsproxy_metadata_misses_total", load(&self.metadata_misses)),
            (
                "pacsproxy_metadata_evictions_total",
                load(&self.metadata_evictions),
            ),
            (
                "pacsproxy_metadata_query_failures_total",
                load(&self.metadata_query_failures),
            ),
            ("pacsproxy_payload_hits_total", load(&self.payload_hits)),
            ("pacsproxy_payload_misses_total", load(&self.payload_misses)),
            (
                "pacsproxy_payload_not_found_total",
                load(&self.payload_not_found),
            ),
            (
                "pacsproxy_retrievals_started_total",
                load(&self.retrievals_started),
            ),
            (
                "pacsproxy_retrievals_joined_total",
                load(&self.retrievals_joined),
            ),
            (
                "pacsproxy_retrievals_failed_total",
                load(&self.retrievals_failed),
            ),
            (
                "pacsproxy_retrievals_timed_out_total",
                load(&self.retrievals_timed_out),
            ),
        ]
    }
}

fn load(counter: &AtomicU64) -> u64 {
    counter.load(Ordering::Relaxed)
}
