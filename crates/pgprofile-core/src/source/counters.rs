//! Counter reads and sampling jobs.

use std::time::Duration;

use chrono::Utc;

use super::queries::{
    ACTIVE_TIME_QUERY, COLLECT_ASH_QUERY, SESSION_SAMPLES_QUERY, TAKE_SNAPSHOT_QUERY,
    build_raw_counters_query,
};
use super::{CounterSource, PgSource, SampleRecorder};
use crate::error::SourceError;
use crate::model::{RawCounterSnapshot, SessionSampleCounts};

impl CounterSource for PgSource {
    fn raw_counters(&self) -> Result<RawCounterSnapshot, SourceError> {
        self.with_client(|client, version| {
            let row = client.query_one(&build_raw_counters_query(version), &[])?;
            Ok(RawCounterSnapshot {
                taken_at: Utc::now(),
                xact_commit: row.get("xact_commit"),
                xact_rollback: row.get("xact_rollback"),
                total_calls: row.get("total_calls"),
                total_exec_time_ms: row.get("total_exec_time"),
            })
        })
    }

    fn active_time_ms(&self, window: Duration) -> Result<Option<f64>, SourceError> {
        let secs = window.as_secs_f64();
        self.with_client(|client, _| {
            let row = client.query_one(ACTIVE_TIME_QUERY, &[&secs])?;
            let samples: i64 = row.get("samples");
            let delta: Option<f64> = row.get("delta_ms");
            Ok(if samples < 2 { None } else { delta })
        })
    }

    fn session_samples(&self, window: Duration) -> Result<SessionSampleCounts, SourceError> {
        let secs = window.as_secs_f64();
        self.with_client(|client, _| {
            let row = client.query_one(SESSION_SAMPLES_QUERY, &[&secs])?;
            Ok(SessionSampleCounts {
                cpu: row.get("cpu_samples"),
                io: row.get("io_samples"),
                lock: row.get("lock_samples"),
                other: row.get("other_samples"),
            })
        })
    }

    fn interrupt(&self) {
        self.cancel_running_query();
    }
}

impl SampleRecorder for PgSource {
    fn collect_session_sample(&self) -> Result<(), SourceError> {
        self.with_client(|client, _| client.batch_execute(COLLECT_ASH_QUERY))
    }

    fn take_counter_snapshot(&self) -> Result<(), SourceError> {
        self.with_client(|client, _| client.batch_execute(TAKE_SNAPSHOT_QUERY))
    }

    fn interrupt(&self) {
        self.cancel_running_query();
    }
}
