//! Background processing: sampling jobs and the analysis loop.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use pgprofile_core::calculator::cancelled;
use pgprofile_core::source::{CounterSource, SampleRecorder};
use pgprofile_core::{CalcError, Calculator, Diagnosis, PublishedState, classify_workload};

// ============================================================
// Sampling loop
// ============================================================

/// Fires `collect_ash()` and `take_snapshot()` on their own intervals until
/// shutdown. A failed job is logged and retried on the next tick.
pub(crate) async fn sampling_loop<R: SampleRecorder>(
    recorder: Arc<R>,
    ash_every: Duration,
    snapshot_every: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ash_tick = tokio::time::interval(ash_every);
    ash_tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut snapshot_tick = tokio::time::interval(snapshot_every);
    snapshot_tick.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        let job = tokio::select! {
            _ = ash_tick.tick() => Job::CollectAsh,
            _ = snapshot_tick.tick() => Job::TakeSnapshot,
            _ = cancelled(&mut shutdown) => {
                debug!("sampling loop stopped");
                return;
            }
        };

        let worker = Arc::clone(&recorder);
        let task = tokio::task::spawn_blocking(move || match job {
            Job::CollectAsh => worker.collect_session_sample(),
            Job::TakeSnapshot => worker.take_counter_snapshot(),
        });
        let result = tokio::select! {
            r = task => r,
            _ = cancelled(&mut shutdown) => {
                recorder.interrupt();
                debug!(job = job.name(), "sampling loop stopped, job interrupted");
                return;
            }
        };

        match result {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(job = job.name(), error = %e, "sampling job failed"),
            Err(e) => error!(job = job.name(), error = %e, "sampling job panicked"),
        }
    }
}

#[derive(Clone, Copy)]
enum Job {
    CollectAsh,
    TakeSnapshot,
}

impl Job {
    fn name(self) -> &'static str {
        match self {
            Job::CollectAsh => "collect_ash",
            Job::TakeSnapshot => "take_snapshot",
        }
    }
}

// ============================================================
// Analysis loop
// ============================================================

/// Measures, classifies and publishes once per `every`. A failed tick
/// publishes nothing; the next one starts fresh.
pub(crate) async fn analysis_loop<S: CounterSource>(
    calculator: Calculator<S>,
    published: PublishedState,
    every: Duration,
    window: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut tick = tokio::time::interval(every);
    tick.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = tick.tick() => {}
            _ = cancelled(&mut shutdown) => break,
        }

        let t0 = Instant::now();
        match analyze_once(&calculator, &published, window, &mut shutdown).await {
            Ok(d) => info!(
                archetype = d.kind.code(),
                profile = %d.profile,
                io_percent = format_args!("{:.0}", d.metrics.io_percent),
                cpu_percent = format_args!("{:.0}", d.metrics.cpu_percent),
                lock_percent = format_args!("{:.0}", d.metrics.lock_percent),
                duration_ms = t0.elapsed().as_millis() as u64,
                "diagnosis published"
            ),
            Err(e) if e.is_cancelled() => break,
            Err(e) => error!(error = %e, "calculating metrics failed"),
        }
    }
    debug!("analysis loop stopped");
}

/// One tick: measure the window, classify, publish.
pub(crate) async fn analyze_once<S: CounterSource>(
    calculator: &Calculator<S>,
    published: &PublishedState,
    window: Duration,
    shutdown: &mut watch::Receiver<bool>,
) -> Result<Diagnosis, CalcError> {
    let metrics = calculator.calculate_metrics(window, shutdown).await?;
    let diagnosis = classify_workload(metrics);
    published.publish(diagnosis.clone(), Utc::now());
    Ok(diagnosis)
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    use pgprofile_core::{Profile, RawCounterSnapshot, SessionSampleCounts, SourceError};

    use super::*;

    struct StaticSource {
        active_ms: Result<Option<f64>, SourceError>,
        samples: SessionSampleCounts,
    }

    impl CounterSource for StaticSource {
        fn raw_counters(&self) -> Result<RawCounterSnapshot, SourceError> {
            Err(SourceError::Connection("connection refused".into()))
        }

        fn active_time_ms(&self, _window: Duration) -> Result<Option<f64>, SourceError> {
            self.active_ms.clone()
        }

        fn session_samples(&self, _window: Duration) -> Result<SessionSampleCounts, SourceError> {
            Ok(self.samples)
        }
    }

    #[derive(Default)]
    struct CountingRecorder {
        ash: AtomicUsize,
        snapshots: AtomicUsize,
    }

    /// `collect_ash()` that never returns until interrupted.
    #[derive(Default)]
    struct HangingRecorder {
        interrupted: AtomicBool,
    }

    impl SampleRecorder for HangingRecorder {
        fn collect_session_sample(&self) -> Result<(), SourceError> {
            while !self.interrupted.load(Ordering::SeqCst) {
                std::thread::sleep(Duration::from_millis(5));
            }
            Err(SourceError::Query("ERROR: canceling statement due to user request".into()))
        }

        fn take_counter_snapshot(&self) -> Result<(), SourceError> {
            self.collect_session_sample()
        }

        fn interrupt(&self) {
            self.interrupted.store(true, Ordering::SeqCst);
        }
    }

    impl SampleRecorder for CountingRecorder {
        fn collect_session_sample(&self) -> Result<(), SourceError> {
            self.ash.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn take_counter_snapshot(&self) -> Result<(), SourceError> {
            self.snapshots.fetch_add(1, Ordering::SeqCst);
            Err(SourceError::Query("ERROR: function does not exist".into()))
        }
    }

    fn calculator(active_ms: Result<Option<f64>, SourceError>) -> Calculator<StaticSource> {
        Calculator::new(Arc::new(StaticSource {
            active_ms,
            samples: SessionSampleCounts {
                cpu: 5,
                io: 1,
                lock: 14,
                other: 0,
            },
        }))
    }

    #[tokio::test]
    async fn tick_publishes_diagnosis() {
        let published = PublishedState::new();
        let (_tx, mut rx) = watch::channel(false);
        let calc = calculator(Ok(Some(20_000.0)));

        let d = analyze_once(&calc, &published, Duration::from_millis(10), &mut rx)
            .await
            .unwrap();
        assert_eq!(d.kind, Profile::HighConcurrency);

        let status = published.status();
        assert!(status.timestamp.is_some());
        assert_eq!(status.diagnosis.unwrap().profile, "HIGH CONCURRENCY");
    }

    #[tokio::test]
    async fn failed_tick_publishes_nothing() {
        let published = PublishedState::new();
        let (_tx, mut rx) = watch::channel(false);
        let calc = calculator(Err(SourceError::Query("ERROR: no snapshots table".into())));

        let err = analyze_once(&calc, &published, Duration::from_millis(10), &mut rx)
            .await
            .unwrap_err();
        assert!(matches!(err, CalcError::ActiveTime(_)));
        assert!(published.latest_diagnosis().is_none());
    }

    #[tokio::test]
    async fn analysis_loop_stops_on_shutdown() {
        let published = PublishedState::new();
        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn(analysis_loop(
            calculator(Ok(Some(20_000.0))),
            published.clone(),
            Duration::from_millis(10),
            Duration::from_secs(60),
            rx,
        ));

        tokio::time::sleep(Duration::from_millis(30)).await;
        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .expect("analysis loop did not stop")
            .unwrap();
        // The 60 s window never completed.
        assert!(published.latest_diagnosis().is_none());
    }

    #[tokio::test]
    async fn sampling_loop_runs_both_jobs_until_shutdown() {
        let recorder = Arc::new(CountingRecorder::default());
        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn(sampling_loop(
            Arc::clone(&recorder),
            Duration::from_millis(10),
            Duration::from_millis(20),
            rx,
        ));

        tokio::time::sleep(Duration::from_millis(100)).await;
        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .expect("sampling loop did not stop")
            .unwrap();

        assert!(recorder.ash.load(Ordering::SeqCst) >= 2);
        // Failures do not stop the loop.
        assert!(recorder.snapshots.load(Ordering::SeqCst) >= 2);
    }

    #[tokio::test]
    async fn shutdown_interrupts_hung_sampling_job() {
        let recorder = Arc::new(HangingRecorder::default());
        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn(sampling_loop(
            Arc::clone(&recorder),
            Duration::from_millis(10),
            Duration::from_secs(60),
            rx,
        ));

        tokio::time::sleep(Duration::from_millis(50)).await;
        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .expect("sampling loop waited for the hung job")
            .unwrap();
        assert!(recorder.interrupted.load(Ordering::SeqCst));
    }
}
