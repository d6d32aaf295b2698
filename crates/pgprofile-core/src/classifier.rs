//! Rule-based workload classifier.
//!
//! Every scored profile starts at zero; threshold rules on the IO/CPU/Lock
//! shares of DB time add (or subtract) points. The unique highest score wins.
//! A score below [`MIN_WINNING_SCORE`] or a shared top score means there is no
//! dominant shape and the workload is reported as mixed.

use std::fmt;

use serde::Serialize;

use crate::model::WorkloadMetrics;
use crate::presets::{Preset, TuningConfig};

/// Below this much DB time (seconds) in the window the system counts as idle.
pub const IDLE_DB_TIME_SECS: f64 = 1.0;

/// Minimum score a profile needs to beat the mixed fallback.
pub const MIN_WINNING_SCORE: f64 = 2.0;

/// Workload profile reported by the classifier.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Profile {
    Idle,
    Olap,
    Oltp,
    /// Write-heavy insert stream (IoT, telemetry).
    WriteHeavy,
    /// Lock contention.
    HighConcurrency,
    /// Archive / full-scan.
    Cold,
    /// Read-heavy, served from cache.
    Reporting,
    /// Bulk load.
    Etl,
    Mixed,
}

impl Profile {
    /// Profiles taking part in scoring. The order is also the scoring table order.
    pub const SCORED: [Profile; 7] = [
        Profile::Olap,
        Profile::Oltp,
        Profile::WriteHeavy,
        Profile::HighConcurrency,
        Profile::Cold,
        Profile::Reporting,
        Profile::Etl,
    ];

    /// Short archetype code.
    pub fn code(self) -> &'static str {
        match self {
            Profile::Idle => "IDLE",
            Profile::Olap => "OLAP",
            Profile::Oltp => "OLTP",
            Profile::WriteHeavy => "IOT",
            Profile::HighConcurrency => "LOCKS",
            Profile::Cold => "COLD",
            Profile::Reporting => "REPORTING",
            Profile::Etl => "ETL",
            Profile::Mixed => "MIXED",
        }
    }

    /// Display name published in the diagnosis.
    pub fn label(self) -> &'static str {
        match self {
            Profile::Idle => "IDLE",
            Profile::Olap => "OLAP (ANALYTICAL)",
            Profile::Oltp => "CLASSIC OLTP",
            Profile::WriteHeavy => "WRITE-HEAVY (IoT)",
            Profile::HighConcurrency => "HIGH CONCURRENCY",
            Profile::Cold => "COLD / ARCHIVE-SCAN",
            Profile::Reporting => "READ-HEAVY / REPORTING",
            Profile::Etl => "BULK ETL / BATCH LOAD",
            Profile::Mixed => "MIXED / HTAP",
        }
    }

    pub fn description(self) -> &'static str {
        match self {
            Profile::Idle => "System is idle. No load.",
            Profile::Olap => "Heavy queries, joins, aggregations. Data mining.",
            Profile::Oltp => "Banking, exchange. Short transactions.",
            Profile::WriteHeavy => "Constant insert stream. Telemetry.",
            Profile::HighConcurrency => "Critical contention for resources (row locks, LWLock).",
            Profile::Cold => "Full scan of cold data. Backup or SeqScan.",
            Profile::Reporting => "Aggressive reads from cache (RAM). Hot reports.",
            Profile::Etl => "Bulk data load. High WAL pressure.",
            Profile::Mixed => "Mixed load: transactions + analytics.",
        }
    }

    pub fn confidence(self) -> Confidence {
        match self {
            Profile::Idle | Profile::Oltp | Profile::HighConcurrency | Profile::Cold => {
                Confidence::High
            }
            Profile::Olap | Profile::Etl | Profile::Reporting => Confidence::Medium,
            Profile::WriteHeavy | Profile::Mixed => Confidence::Low,
        }
    }

    /// Preset pushed for this profile. Idle has its own cooldown bundle instead.
    pub fn preset(self) -> Option<Preset> {
        match self {
            Profile::Idle => None,
            Profile::Olap => Some(Preset::Olap),
            Profile::Oltp => Some(Preset::Oltp),
            Profile::WriteHeavy => Some(Preset::WriteHeavy),
            Profile::HighConcurrency => Some(Preset::HighConcurrency),
            Profile::Cold => Some(Preset::Cold),
            Profile::Reporting => Some(Preset::Reporting),
            Profile::Etl => Some(Preset::Etl),
            Profile::Mixed => Some(Preset::Mixed),
        }
    }

    pub fn tuning(self) -> TuningConfig {
        self.preset()
            .map(Preset::tuning)
            .unwrap_or_else(TuningConfig::cooldown)
    }
}

impl fmt::Display for Profile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[cfg_attr(feature = "api", derive(utoipa::ToSchema))]
pub enum Confidence {
    Low,
    Medium,
    High,
}

/// Classifier verdict for one `WorkloadMetrics` value.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[cfg_attr(feature = "api", derive(utoipa::ToSchema))]
pub struct Diagnosis {
    #[serde(skip)]
    pub kind: Profile,
    pub profile: String,
    pub description: String,
    pub confidence: Confidence,
    pub metrics: WorkloadMetrics,
    #[serde(rename = "tuning_recommendations")]
    pub tuning: TuningConfig,
    pub reasoning: String,
}

impl Diagnosis {
    fn new(kind: Profile, metrics: WorkloadMetrics, reasoning: String) -> Self {
        Self {
            kind,
            profile: kind.label().to_string(),
            description: kind.description().to_string(),
            confidence: kind.confidence(),
            metrics,
            tuning: kind.tuning(),
            reasoning,
        }
    }
}

// ============================================================
// Scoring
// ============================================================

/// Score table indexed like [`Profile::SCORED`].
#[derive(Debug, Default, Clone, Copy, PartialEq)]
struct Scores([f64; Profile::SCORED.len()]);

impl Scores {
    fn add(&mut self, profile: Profile, points: f64) {
        if let Some(i) = Profile::SCORED.iter().position(|p| *p == profile) {
            self.0[i] += points;
        }
    }

    #[cfg(test)]
    fn get(&self, profile: Profile) -> f64 {
        Profile::SCORED
            .iter()
            .position(|p| *p == profile)
            .map_or(0.0, |i| self.0[i])
    }

    /// Highest score and the profile holding it, `None` as profile when
    /// nothing scored above zero or the top score is shared.
    fn leader(&self) -> (Option<Profile>, f64) {
        let mut best: Option<Profile> = None;
        let mut max = 0.0_f64;
        let mut shared = false;
        for (profile, &score) in Profile::SCORED.iter().zip(self.0.iter()) {
            if score > max {
                max = score;
                best = Some(*profile);
                shared = false;
            } else if score == max && best.is_some() {
                shared = true;
            }
        }
        if shared { (None, max) } else { (best, max) }
    }
}

fn score(m: &WorkloadMetrics) -> Scores {
    let mut s = Scores::default();
    let (io, cpu, lock) = (m.io_percent, m.cpu_percent, m.lock_percent);

    // Disk bound
    if io > 40.0 {
        s.add(Profile::Cold, 3.0);
        s.add(Profile::Olap, 2.0);
        s.add(Profile::Etl, 1.5);
    } else if io > 20.0 {
        s.add(Profile::Olap, 1.5);
        s.add(Profile::WriteHeavy, 2.0);
        s.add(Profile::Etl, 1.0);
    } else if io < 5.0 {
        s.add(Profile::Oltp, 2.0);
        s.add(Profile::Reporting, 2.0);
    }

    // Compute bound
    if cpu > 80.0 {
        s.add(Profile::Reporting, 3.0);
        s.add(Profile::Oltp, 2.0);
    } else if cpu > 50.0 {
        s.add(Profile::Oltp, 2.0);
        s.add(Profile::Olap, 1.0);
    } else if cpu < 15.0 {
        s.add(Profile::Cold, 2.0);
        s.add(Profile::WriteHeavy, 1.0);
    }

    // Contention
    if lock > 15.0 {
        s.add(Profile::HighConcurrency, 5.0);
    } else if lock > 5.0 {
        s.add(Profile::HighConcurrency, 2.0);
        s.add(Profile::Oltp, -1.0);
    }

    // Ratios
    if cpu > io * 4.0 {
        s.add(Profile::Reporting, 1.0);
    }
    if io > cpu * 2.0 {
        s.add(Profile::Cold, 1.0);
        s.add(Profile::WriteHeavy, 1.0);
    }

    s
}

/// Classifies one window of metrics. Pure and total over non-negative input.
pub fn classify_workload(m: WorkloadMetrics) -> Diagnosis {
    if m.db_time_total < IDLE_DB_TIME_SECS {
        let reasoning = format!("DB time: {:.2}s", m.db_time_total);
        return Diagnosis::new(Profile::Idle, m, reasoning);
    }

    let (leader, max_score) = score(&m).leader();
    let winner = match leader {
        Some(p) if max_score >= MIN_WINNING_SCORE => p,
        _ => Profile::Mixed,
    };

    let reasoning = format!(
        "Score: {:.1} | IO: {:.0}%, CPU: {:.0}%, Lock: {:.0}%",
        max_score, m.io_percent, m.cpu_percent, m.lock_percent
    );
    Diagnosis::new(winner, m, reasoning)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metrics(io: f64, cpu: f64, lock: f64) -> WorkloadMetrics {
        WorkloadMetrics {
            db_time_total: 12.0,
            io_percent: io,
            cpu_percent: cpu,
            lock_percent: lock,
            ..Default::default()
        }
    }

    #[test]
    fn idle_below_one_second_regardless_of_shares() {
        for m in [
            WorkloadMetrics::default(),
            WorkloadMetrics {
                db_time_total: 0.99,
                io_percent: 90.0,
                lock_percent: 10.0,
                tps: 5000.0,
                ..Default::default()
            },
        ] {
            let d = classify_workload(m);
            assert_eq!(d.kind, Profile::Idle);
            assert_eq!(d.profile, "IDLE");
            assert_eq!(d.confidence, Confidence::High);
            assert_eq!(d.tuning, TuningConfig::cooldown());
        }
    }

    #[test]
    fn cpu_bound_with_little_io_is_reporting() {
        let d = classify_workload(metrics(10.0, 85.0, 2.0));
        assert_eq!(d.kind, Profile::Reporting);
        assert_eq!(d.profile, "READ-HEAVY / REPORTING");
        assert_eq!(d.confidence, Confidence::Medium);
        assert_eq!(d.reasoning, "Score: 4.0 | IO: 10%, CPU: 85%, Lock: 2%");
        assert_eq!(d.tuning, Preset::Reporting.tuning());
    }

    #[test]
    fn heavy_locking_is_high_concurrency() {
        let d = classify_workload(metrics(5.0, 10.0, 25.0));
        assert_eq!(d.kind, Profile::HighConcurrency);
        assert_eq!(d.profile, "HIGH CONCURRENCY");
        assert_eq!(d.confidence, Confidence::High);
        assert!(d.reasoning.starts_with("Score: 5.0"));
    }

    #[test]
    fn weak_signal_falls_back_to_mixed() {
        let d = classify_workload(metrics(2.0, 3.0, 1.0));
        assert_eq!(d.kind, Profile::Mixed);
        assert_eq!(d.profile, "MIXED / HTAP");
        assert_eq!(d.confidence, Confidence::Low);
        assert_eq!(d.tuning, Preset::Mixed.tuning());
    }

    #[test]
    fn all_zero_shares_with_db_time_is_mixed() {
        let d = classify_workload(metrics(0.0, 0.0, 0.0));
        // io < 5 and cpu < 15 fire, leaving a three-way tie at 2
        assert_eq!(d.kind, Profile::Mixed);
    }

    #[test]
    fn below_minimum_score_is_mixed() {
        // io 21..40 gives WriteHeavy 2; moderate cpu 40 adds nothing; lock 10
        // gives Locks 2 -> shared top score.
        let d = classify_workload(metrics(30.0, 40.0, 10.0));
        assert_eq!(d.kind, Profile::Mixed);

        let s = score(&metrics(10.0, 30.0, 0.0));
        assert_eq!(s.leader(), (None, 0.0));
    }

    #[test]
    fn io_dominated_is_cold() {
        let d = classify_workload(metrics(70.0, 10.0, 0.0));
        // Cold: 3 (io>40) + 2 (cpu<15) + 1 (io>2cpu)
        assert_eq!(d.kind, Profile::Cold);
        assert!(d.reasoning.starts_with("Score: 6.0"));
    }

    #[test]
    fn moderate_io_with_busy_cpu_is_olap() {
        let d = classify_workload(metrics(30.0, 60.0, 0.0));
        // Olap 1.5 + 1, WriteHeavy 2, Oltp 2
        assert_eq!(d.kind, Profile::Olap);
        assert_eq!(d.confidence, Confidence::Medium);
    }

    #[test]
    fn lock_penalty_applies_to_oltp() {
        let s = score(&metrics(3.0, 60.0, 10.0));
        assert_eq!(s.get(Profile::Oltp), 3.0);
        assert_eq!(s.get(Profile::HighConcurrency), 2.0);
        assert_eq!(s.get(Profile::Reporting), 3.0);
    }

    #[test]
    fn classification_is_deterministic() {
        let m = metrics(22.5, 55.5, 7.5);
        assert_eq!(classify_workload(m.clone()), classify_workload(m));
    }

    #[test]
    fn every_profile_has_details() {
        for p in Profile::SCORED {
            assert!(p.preset().is_some());
            assert!(!p.label().is_empty());
            assert!(!p.description().is_empty());
        }
        assert_eq!(Profile::Idle.preset(), None);
    }

    #[test]
    fn archetype_codes_are_distinct() {
        let mut codes: Vec<_> = Profile::SCORED.iter().map(|p| p.code()).collect();
        codes.extend([Profile::Idle.code(), Profile::Mixed.code()]);
        let before = codes.len();
        codes.sort_unstable();
        codes.dedup();
        assert_eq!(codes.len(), before);
        assert_eq!(Profile::HighConcurrency.code(), "LOCKS");
    }

    #[test]
    fn client_waits_dilute_cpu_share() {
        // Half the active sessions on CPU, the rest mostly idle in transaction.
        let mut m = WorkloadMetrics {
            db_time_total: 12.0,
            ..Default::default()
        };
        m.apportion(&crate::model::SessionSampleCounts {
            cpu: 50,
            io: 10,
            lock: 0,
            other: 40,
        });
        let d = classify_workload(m);
        assert_eq!(d.kind, Profile::Mixed);
        assert_eq!(d.reasoning, "Score: 1.0 | IO: 10%, CPU: 50%, Lock: 0%");
    }

    #[test]
    fn serializes_wire_fields() {
        let json = serde_json::to_value(classify_workload(metrics(10.0, 85.0, 2.0))).unwrap();
        let obj = json.as_object().unwrap();
        let mut keys: Vec<_> = obj.keys().map(String::as_str).collect();
        keys.sort_unstable();
        assert_eq!(
            keys,
            vec![
                "confidence",
                "description",
                "metrics",
                "profile",
                "reasoning",
                "tuning_recommendations"
            ]
        );
        assert_eq!(json["confidence"], "Medium");
    }
}
