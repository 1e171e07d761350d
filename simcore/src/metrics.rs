// Copyright (c) Simcore Contributors
// SPDX-License-Identifier: Apache-2.0

//! Thin counters in the spirit of `aptos-metrics-core`'s shortcut macros,
//! minus the Prometheus registry (no exporter surface is in scope here).
//! Each counter is a plain `AtomicU64`, cheap enough to bump on every
//! dispatched operation without contention concerns.

use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Default)]
pub struct Metrics {
    pub ops_dispatched: AtomicU64,
    pub ops_rejected: AtomicU64,
    pub cascaded_deletes: AtomicU64,
    pub cron_runs: AtomicU64,
    pub cron_skipped_in_flight: AtomicU64,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_dispatched(&self) {
        self.ops_dispatched.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_rejected(&self) {
        self.ops_rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cascaded_delete(&self) {
        self.cascaded_deletes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cron_run(&self) {
        self.cron_runs.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cron_skip(&self) {
        self.cron_skipped_in_flight.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            ops_dispatched: self.ops_dispatched.load(Ordering::Relaxed),
            ops_rejected: self.ops_rejected.load(Ordering::Relaxed),
            cascaded_deletes: self.cascaded_deletes.load(Ordering::Relaxed),
            cron_runs: self.cron_runs.load(Ordering::Relaxed),
            cron_skipped_in_flight: self.cron_skipped_in_flight.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub ops_dispatched: u64,
    pub ops_rejected: u64,
    pub cascaded_deletes: u64,
    pub cron_runs: u64,
    pub cron_skipped_in_flight: u64,
}
