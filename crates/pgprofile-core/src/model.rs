//! Data model of the profiling pipeline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Cumulative database counters read at one point in time.
///
/// Two snapshots bound a measurement window; rates come from their difference.
#[derive(Debug, Clone, PartialEq)]
pub struct RawCounterSnapshot {
    pub taken_at: DateTime<Utc>,
    /// `pg_stat_database.xact_commit` for the current database.
    pub xact_commit: i64,
    /// `pg_stat_database.xact_rollback` for the current database.
    pub xact_rollback: i64,
    /// Sum of `pg_stat_statements.calls`.
    pub total_calls: i64,
    /// Sum of `pg_stat_statements.total_exec_time`, milliseconds.
    pub total_exec_time_ms: f64,
}

/// Stored session-state (ASH) samples over a window, split by wait category.
///
/// `cpu`, `io` and `lock` are mutually exclusive. `other` counts samples
/// waiting on anything else (client, timeout, IPC...); it gets no share of
/// its own but still counts toward the total.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionSampleCounts {
    pub cpu: i64,
    pub io: i64,
    pub lock: i64,
    pub other: i64,
}

impl SessionSampleCounts {
    /// Every sample in the window, `other` included.
    pub fn total(&self) -> i64 {
        self.cpu + self.io + self.lock + self.other
    }
}

/// Workload signature for one measurement window.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "api", derive(utoipa::ToSchema))]
pub struct WorkloadMetrics {
    /// Total active (DB) time in the window, seconds.
    pub db_time_total: f64,
    /// Non-waiting portion of DB time, seconds.
    pub db_time_committed: f64,
    pub cpu_time: f64,
    pub io_time: f64,
    pub lock_time: f64,

    pub cpu_percent: f64,
    pub io_percent: f64,
    pub lock_percent: f64,

    /// Committed transactions per second.
    pub tps: f64,
    /// Statement calls per second.
    pub qps: f64,
    /// Mean execution time per call, milliseconds.
    #[serde(rename = "avg_query_latency_ms")]
    pub avg_latency: f64,
    /// Rolled back transactions, percent of all transactions in the window.
    pub rollback_rate: f64,

    // Counters at window end, informational only.
    pub total_commits: i64,
    pub total_rollbacks: i64,
    pub total_calls: i64,
}

impl WorkloadMetrics {
    /// Fills the rate fields from a start/end counter pair.
    ///
    /// Returns false (leaving the rates untouched) when any counter went
    /// backwards between the two reads, which means statistics were reset.
    pub fn record_throughput(
        &mut self,
        start: &RawCounterSnapshot,
        end: &RawCounterSnapshot,
        seconds: f64,
    ) -> bool {
        let (Some(commits), Some(rollbacks), Some(calls), Some(exec_ms)) = (
            di64(end.xact_commit, start.xact_commit),
            di64(end.xact_rollback, start.xact_rollback),
            di64(end.total_calls, start.total_calls),
            df64(end.total_exec_time_ms, start.total_exec_time_ms),
        ) else {
            return false;
        };

        let seconds = seconds.max(1.0);
        let (commits, rollbacks, calls) = (commits as f64, rollbacks as f64, calls as f64);

        self.tps = commits / seconds;
        self.qps = calls / seconds;

        let transactions = commits + rollbacks;
        self.rollback_rate = if transactions > 0.0 {
            rollbacks / transactions * 100.0
        } else {
            0.0
        };
        self.avg_latency = if calls > 0.0 { exec_ms / calls } else { 0.0 };

        self.total_commits = end.xact_commit;
        self.total_rollbacks = end.xact_rollback;
        self.total_calls = end.total_calls;
        true
    }

    /// Splits `db_time_total` into CPU/IO/Lock using session sample ratios.
    ///
    /// Ratios are taken over all samples, so waits outside CPU/IO/Lock
    /// leave the three shares summing below 100. Without any sample all
    /// active time goes to CPU.
    pub fn apportion(&mut self, samples: &SessionSampleCounts) {
        let total = samples.total();
        if total <= 0 {
            self.cpu_time = self.db_time_total;
            self.io_time = 0.0;
            self.lock_time = 0.0;
            self.db_time_committed = self.db_time_total;
            self.cpu_percent = 100.0;
            self.io_percent = 0.0;
            self.lock_percent = 0.0;
            return;
        }

        let total = total as f64;
        let ratio_cpu = samples.cpu as f64 / total;
        let ratio_io = samples.io as f64 / total;
        let ratio_lock = samples.lock as f64 / total;

        self.cpu_time = self.db_time_total * ratio_cpu;
        self.io_time = self.db_time_total * ratio_io;
        self.lock_time = self.db_time_total * ratio_lock;
        // Committed = DB time minus waits, i.e. the on-CPU share.
        self.db_time_committed = self.cpu_time;

        self.cpu_percent = ratio_cpu * 100.0;
        self.io_percent = ratio_io * 100.0;
        self.lock_percent = ratio_lock * 100.0;
    }
}

/// i64 delta, `None` on counter regression (stats reset).
fn di64(curr: i64, prev: i64) -> Option<i64> {
    (curr >= prev).then_some(curr - prev)
}

/// f64 delta, `None` on counter regression (stats reset).
fn df64(curr: f64, prev: f64) -> Option<f64> {
    (curr >= prev).then_some(curr - prev)
}
