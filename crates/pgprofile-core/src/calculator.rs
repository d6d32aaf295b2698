//! Snapshot delta calculator.
//!
//! One call measures one window: read counters, wait, read again, then split
//! the window's active time into CPU/IO/Lock by stored session samples.
//! Every read runs on the blocking pool and races the shutdown signal.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, warn};

use crate::error::{CalcError, SourceError};
use crate::model::WorkloadMetrics;
use crate::source::CounterSource;

pub struct Calculator<S: CounterSource> {
    source: Arc<S>,
}

impl<S: CounterSource> Calculator<S> {
    pub fn new(source: Arc<S>) -> Self {
        Self { source }
    }

    /// Measures the workload over `window`.
    ///
    /// A failed counter read only leaves the rate fields at zero. Missing
    /// snapshot data yields metrics without DB time. Shutdown aborts the wait
    /// or the read in flight and returns [`CalcError::Cancelled`].
    pub async fn calculate_metrics(
        &self,
        window: Duration,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<WorkloadMetrics, CalcError> {
        let mut metrics = WorkloadMetrics::default();

        let start = match self.read(shutdown, |s| s.raw_counters()).await? {
            Ok(snapshot) => Some(snapshot),
            Err(e) => {
                warn!(error = %e, "failed to read start counters");
                None
            }
        };

        tokio::select! {
            _ = tokio::time::sleep(window) => {}
            _ = cancelled(shutdown) => return Err(CalcError::Cancelled),
        }

        let end = match self.read(shutdown, |s| s.raw_counters()).await? {
            Ok(snapshot) => Some(snapshot),
            Err(e) => {
                warn!(error = %e, "failed to read end counters");
                None
            }
        };

        if let (Some(start), Some(end)) = (&start, &end)
            && !metrics.record_throughput(start, end, window.as_secs_f64())
        {
            warn!("counters went backwards during the window, skipping rates");
        }

        let active_ms = self
            .read(shutdown, move |s| s.active_time_ms(window))
            .await?
            .map_err(CalcError::ActiveTime)?;
        let Some(active_ms) = active_ms.filter(|ms| *ms > 0.0) else {
            debug!("no active time recorded in window");
            return Ok(metrics);
        };
        metrics.db_time_total = active_ms / 1000.0;

        let samples = self
            .read(shutdown, move |s| s.session_samples(window))
            .await?
            .map_err(CalcError::SessionSamples)?;
        metrics.apportion(&samples);

        debug!(
            db_time = metrics.db_time_total,
            cpu_samples = samples.cpu,
            io_samples = samples.io,
            lock_samples = samples.lock,
            "window measured"
        );
        Ok(metrics)
    }

    /// Runs one blocking read. The outer error is cancellation or a join
    /// failure; the inner one is the source's own.
    async fn read<T, F>(
        &self,
        shutdown: &mut watch::Receiver<bool>,
        f: F,
    ) -> Result<Result<T, SourceError>, CalcError>
    where
        T: Send + 'static,
        F: FnOnce(&S) -> Result<T, SourceError> + Send + 'static,
    {
        if *shutdown.borrow() {
            return Err(CalcError::Cancelled);
        }

        let source = Arc::clone(&self.source);
        let handle = tokio::task::spawn_blocking(move || f(source.as_ref()));

        tokio::select! {
            res = handle => res.map_err(|e| CalcError::Join(e.to_string())),
            _ = cancelled(shutdown) => {
                self.source.interrupt();
                Err(CalcError::Cancelled)
            }
        }
    }
}

/// Resolves once shutdown is signalled or the sender is gone.
pub async fn cancelled(shutdown: &mut watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|stop| *stop).await;
}
