//! Tuning presets: immutable `postgresql.conf` bundles, one per workload shape.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Named preset of settings that can be pushed with `ALTER SYSTEM`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[cfg_attr(feature = "api", derive(utoipa::ToSchema))]
pub enum Preset {
    Oltp,
    Olap,
    WriteHeavy,
    HighConcurrency,
    Reporting,
    Mixed,
    Etl,
    Cold,
}

impl Preset {
    pub const ALL: [Preset; 8] = [
        Preset::Oltp,
        Preset::Olap,
        Preset::WriteHeavy,
        Preset::HighConcurrency,
        Preset::Reporting,
        Preset::Mixed,
        Preset::Etl,
        Preset::Cold,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Preset::Oltp => "oltp",
            Preset::Olap => "olap",
            Preset::WriteHeavy => "write_heavy",
            Preset::HighConcurrency => "high_concurrency",
            Preset::Reporting => "reporting",
            Preset::Mixed => "mixed",
            Preset::Etl => "etl",
            Preset::Cold => "cold",
        }
    }

    /// Settings of this preset as `(name, value)` pairs.
    pub fn settings(self) -> &'static [(&'static str, &'static str)] {
        match self {
            // Banking, shop: short transactions.
            Preset::Oltp => &[
                ("shared_buffers", "128MB"),
                ("work_mem", "4MB"),
                ("max_wal_size", "1GB"),
                ("checkpoint_timeout", "15min"),
                ("synchronous_commit", "on"),
                ("max_parallel_workers_per_gather", "0"),
                ("deadlock_timeout", "1s"),
            ],
            // BI, heavy joins and aggregates.
            Preset::Olap => &[
                ("shared_buffers", "256MB"),
                ("work_mem", "32MB"),
                ("max_wal_size", "4GB"),
                ("checkpoint_timeout", "30min"),
                ("max_parallel_workers_per_gather", "2"),
                ("synchronous_commit", "on"),
                ("deadlock_timeout", "1s"),
            ],
            // Telemetry insert stream.
            Preset::WriteHeavy => &[
                ("shared_buffers", "128MB"),
                ("max_wal_size", "8GB"),
                ("checkpoint_timeout", "30min"),
                ("synchronous_commit", "off"),
                ("autovacuum_naptime", "1min"),
                ("deadlock_timeout", "1s"),
            ],
            Preset::HighConcurrency => &[
                ("shared_buffers", "128MB"),
                ("work_mem", "4MB"),
                ("deadlock_timeout", "100ms"),
                ("max_connections", "200"),
            ],
            // Hot catalog reads served from cache.
            Preset::Reporting => &[
                ("shared_buffers", "350MB"),
                ("work_mem", "16MB"),
                ("effective_cache_size", "1GB"),
                ("synchronous_commit", "on"),
                ("deadlock_timeout", "1s"),
            ],
            Preset::Mixed => &[
                ("shared_buffers", "200MB"),
                ("work_mem", "16MB"),
                ("max_parallel_workers_per_gather", "2"),
                ("synchronous_commit", "on"),
                ("deadlock_timeout", "1s"),
            ],
            Preset::Etl => &[
                ("maintenance_work_mem", "256MB"),
                ("max_wal_size", "10GB"),
                ("checkpoint_timeout", "1h"),
                ("wal_compression", "on"),
                ("deadlock_timeout", "1s"),
            ],
            // Archive scans, backups.
            Preset::Cold => &[
                ("work_mem", "64MB"),
                ("max_parallel_workers_per_gather", "4"),
                ("synchronous_commit", "on"),
                ("deadlock_timeout", "1s"),
            ],
        }
    }

    pub fn settings_map(self) -> BTreeMap<String, String> {
        self.settings()
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect()
    }

    /// Recommendation view of the preset (keys outside `TuningConfig` are dropped).
    pub fn tuning(self) -> TuningConfig {
        TuningConfig::from_settings(self.settings())
    }
}

impl fmt::Display for Preset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Preset {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Preset::ALL
            .into_iter()
            .find(|p| p.name() == s)
            .ok_or_else(|| ConfigError::UnknownPreset(s.to_string()))
    }
}

/// Recommended `postgresql.conf` values. Empty fields mean "leave as is".
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "api", derive(utoipa::ToSchema))]
#[serde(default)]
pub struct TuningConfig {
    pub shared_buffers: String,
    pub work_mem: String,
    pub max_wal_size: String,
    pub checkpoint_timeout: String,
    pub synchronous_commit: String,
    #[serde(rename = "max_parallel_workers_per_gather")]
    pub max_parallel_workers: String,
    pub deadlock_timeout: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub autovacuum_naptime: String,
}

impl TuningConfig {
    /// Light settings recommended while the system is idle.
    pub fn cooldown() -> Self {
        Self::from_settings(&[
            ("shared_buffers", "128MB"),
            ("work_mem", "4MB"),
            ("checkpoint_timeout", "30min"),
            ("max_wal_size", "1GB"),
            ("synchronous_commit", "on"),
            ("max_parallel_workers_per_gather", "0"),
            ("deadlock_timeout", "1s"),
        ])
    }

    pub fn from_settings(settings: &[(&str, &str)]) -> Self {
        let mut cfg = TuningConfig::default();
        for &(key, value) in settings {
            if let Some(field) = cfg.field_mut(key) {
                *field = value.to_string();
            }
        }
        cfg
    }

    /// Non-empty fields as a `setting name -> value` map.
    pub fn to_settings(&self) -> BTreeMap<String, String> {
        self.fields()
            .into_iter()
            .filter(|(_, v)| !v.is_empty())
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    fn fields(&self) -> [(&'static str, &String); 8] {
        [
            ("shared_buffers", &self.shared_buffers),
            ("work_mem", &self.work_mem),
            ("max_wal_size", &self.max_wal_size),
            ("checkpoint_timeout", &self.checkpoint_timeout),
            ("synchronous_commit", &self.synchronous_commit),
            ("max_parallel_workers_per_gather", &self.max_parallel_workers),
            ("deadlock_timeout", &self.deadlock_timeout),
            ("autovacuum_naptime", &self.autovacuum_naptime),
        ]
    }

    fn field_mut(&mut self, key: &str) -> Option<&mut String> {
        match key {
            "shared_buffers" => Some(&mut self.shared_buffers),
            "work_mem" => Some(&mut self.work_mem),
            "max_wal_size" => Some(&mut self.max_wal_size),
            "checkpoint_timeout" => Some(&mut self.checkpoint_timeout),
            "synchronous_commit" => Some(&mut self.synchronous_commit),
            "max_parallel_workers_per_gather" => Some(&mut self.max_parallel_workers),
            "deadlock_timeout" => Some(&mut self.deadlock_timeout),
            "autovacuum_naptime" => Some(&mut self.autovacuum_naptime),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::configurator::is_allowed;

    #[test]
    fn preset_names_round_trip() {
        for p in Preset::ALL {
            assert_eq!(p.name().parse::<Preset>().unwrap(), p);
        }
        assert!(matches!(
            "turbo".parse::<Preset>(),
            Err(ConfigError::UnknownPreset(name)) if name == "turbo"
        ));
    }

    #[test]
    fn every_preset_key_is_allow_listed() {
        for p in Preset::ALL {
            for (key, value) in p.settings() {
                assert!(is_allowed(key), "{p}: {key} not allowed");
                assert!(!value.is_empty());
            }
        }
    }

    #[test]
    fn tuning_keeps_only_known_fields() {
        let t = Preset::HighConcurrency.tuning();
        assert_eq!(t.shared_buffers, "128MB");
        assert_eq!(t.deadlock_timeout, "100ms");
        assert!(t.max_wal_size.is_empty());
        // max_connections has no TuningConfig field
        assert!(!t.to_settings().contains_key("max_connections"));
    }

    #[test]
    fn to_settings_skips_empty_fields() {
        let cfg = TuningConfig {
            work_mem: "8MB".into(),
            max_parallel_workers: "2".into(),
            ..Default::default()
        };
        let keys: Vec<_> = cfg.to_settings().into_keys().collect();
        assert_eq!(keys, vec!["max_parallel_workers_per_gather", "work_mem"]);
    }

    #[test]
    fn autovacuum_naptime_omitted_when_empty() {
        let json = serde_json::to_value(TuningConfig::cooldown()).unwrap();
        assert!(json.get("autovacuum_naptime").is_none());
        assert_eq!(json["max_parallel_workers_per_gather"], "0");

        let json = serde_json::to_value(Preset::WriteHeavy.tuning()).unwrap();
        assert_eq!(json["autovacuum_naptime"], "1min");
    }
}
