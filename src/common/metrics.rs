//! Transaction and election counters
//!
//! Rendered in Prometheus text exposition format by the coordinator's
//! `/metrics` endpoint.

use std::fmt::Write;
use std::sync::atomic::{AtomicU64, Ordering};

/// Counter for tracking event counts
#[derive(Debug, Default)]
pub struct Counter {
    value: AtomicU64,
}

impl Counter {
    pub fn new() -> Self {
        Self {
            value: AtomicU64::new(0),
        }
    }

    pub fn inc(&self) {
        self.value.fetch_add(1, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }
}

/// Coordinator metrics
#[derive(Debug, Default)]
pub struct CoordinatorMetrics {
    pub txn_committed: Counter,
    pub txn_committed_partial: Counter,
    pub txn_aborted: Counter,
    pub txn_failed: Counter,
    pub txn_rejected_not_leader: Counter,
    pub elections_started: Counter,
    pub elections_won: Counter,
    pub edge_scan_gaps: Counter,
}

impl CoordinatorMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Export in Prometheus text format
    pub fn to_prometheus(&self) -> String {
        let mut out = String::new();

        let _ = writeln!(
            out,
            "# HELP socialgraph_transactions_total Transactions by final status"
        );
        let _ = writeln!(out, "# TYPE socialgraph_transactions_total counter");
        for (status, counter) in [
            ("committed", &self.txn_committed),
            ("committed-partial", &self.txn_committed_partial),
            ("aborted", &self.txn_aborted),
            ("failed", &self.txn_failed),
            ("not-leader", &self.txn_rejected_not_leader),
        ] {
            let _ = writeln!(
                out,
                "socialgraph_transactions_total{{status=\"{}\"}} {}",
                status,
                counter.get()
            );
        }

        let _ = writeln!(out, "# TYPE socialgraph_elections_started_total counter");
        let _ = writeln!(
            out,
            "socialgraph_elections_started_total {}",
            self.elections_started.get()
        );
        let _ = writeln!(out, "# TYPE socialgraph_elections_won_total counter");
        let _ = writeln!(
            out,
            "socialgraph_elections_won_total {}",
            self.elections_won.get()
        );
        let _ = writeln!(out, "# TYPE socialgraph_edge_scan_gaps_total counter");
        let _ = writeln!(
            out,
            "socialgraph_edge_scan_gaps_total {}",
            self.edge_scan_gaps.get()
        );

        out
    }
}
