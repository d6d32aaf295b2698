//! Applies tuning settings to the monitored instance.
//!
//! Every key is checked against [`ALLOWED_SETTINGS`] before anything is sent.
//! Once validation passes, settings are issued one statement at a time and
//! followed by a single reload. A failure midway leaves the earlier settings
//! of the batch applied.

use std::collections::BTreeMap;

use tracing::{info, warn};

use crate::error::ConfigError;
use crate::presets::{Preset, TuningConfig};
use crate::source::SettingsSink;

/// Settings that may be changed through the applier.
pub const ALLOWED_SETTINGS: [&str; 12] = [
    "shared_buffers",
    "work_mem",
    "max_wal_size",
    "checkpoint_timeout",
    "synchronous_commit",
    "max_parallel_workers_per_gather",
    "deadlock_timeout",
    "autovacuum_naptime",
    "effective_cache_size",
    "wal_compression",
    "maintenance_work_mem",
    "max_connections",
];

pub fn is_allowed(key: &str) -> bool {
    ALLOWED_SETTINGS.contains(&key)
}

/// Validates the whole batch, stores each setting, then reloads once.
pub fn apply_custom_config<S: SettingsSink + ?Sized>(
    sink: &S,
    settings: &BTreeMap<String, String>,
) -> Result<(), ConfigError> {
    if let Some(key) = settings.keys().find(|k| !is_allowed(k)) {
        return Err(ConfigError::InvalidKey(key.clone()));
    }

    for (key, value) in settings {
        sink.set_persistent(key, value).map_err(|source| {
            warn!(key = %key, error = %source, "failed to apply setting");
            ConfigError::Apply {
                key: key.clone(),
                source,
            }
        })?;
    }

    sink.reload().map_err(ConfigError::Reload)?;
    info!(count = settings.len(), "settings applied and reloaded");
    Ok(())
}

/// Resolves `name` to a preset and applies its settings.
pub fn apply_preset<S: SettingsSink + ?Sized>(sink: &S, name: &str) -> Result<Preset, ConfigError> {
    let preset: Preset = name.parse()?;
    apply_custom_config(sink, &preset.settings_map())?;
    info!(preset = %preset, "preset applied");
    Ok(preset)
}

/// Applies the non-empty fields of `tuning`. Returns what was applied.
pub fn apply_recommendations<S: SettingsSink + ?Sized>(
    sink: &S,
    tuning: &TuningConfig,
) -> Result<BTreeMap<String, String>, ConfigError> {
    let settings = tuning.to_settings();
    apply_custom_config(sink, &settings)?;
    Ok(settings)
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::error::SourceError;

    #[derive(Default)]
    struct RecordingSink {
        applied: Mutex<Vec<(String, String)>>,
        reloads: Mutex<usize>,
        fail_on: Option<&'static str>,
        fail_reload: bool,
    }

    impl RecordingSink {
        fn applied(&self) -> Vec<(String, String)> {
            self.applied.lock().unwrap().clone()
        }

        fn reloads(&self) -> usize {
            *self.reloads.lock().unwrap()
        }
    }

    impl SettingsSink for RecordingSink {
        fn set_persistent(&self, name: &str, value: &str) -> Result<(), SourceError> {
            if self.fail_on == Some(name) {
                return Err(SourceError::Query(format!("ERROR: bad value for {name}")));
            }
            self.applied
                .lock()
                .unwrap()
                .push((name.to_string(), value.to_string()));
            Ok(())
        }

        fn reload(&self) -> Result<(), SourceError> {
            if self.fail_reload {
                return Err(SourceError::Connection("connection refused".into()));
            }
            *self.reloads.lock().unwrap() += 1;
            Ok(())
        }
    }

    fn map(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn disallowed_key_rejects_whole_batch() {
        let sink = RecordingSink::default();
        let err = apply_custom_config(
            &sink,
            &map(&[("work_mem", "8MB"), ("fsync", "off")]),
        )
        .unwrap_err();

        assert!(matches!(&err, ConfigError::InvalidKey(k) if k == "fsync"));
        assert!(err.is_validation());
        assert!(sink.applied().is_empty());
        assert_eq!(sink.reloads(), 0);
    }

    #[test]
    fn applies_each_setting_then_reloads_once() {
        let sink = RecordingSink::default();
        apply_custom_config(
            &sink,
            &map(&[("work_mem", "8MB"), ("deadlock_timeout", "2s")]),
        )
        .unwrap();

        assert_eq!(sink.applied().len(), 2);
        assert_eq!(sink.reloads(), 1);
    }

    #[test]
    fn empty_batch_only_reloads() {
        let sink = RecordingSink::default();
        apply_custom_config(&sink, &BTreeMap::new()).unwrap();
        assert!(sink.applied().is_empty());
        assert_eq!(sink.reloads(), 1);
    }

    #[test]
    fn failure_midway_keeps_earlier_settings() {
        let sink = RecordingSink {
            fail_on: Some("shared_buffers"),
            ..Default::default()
        };
        // BTreeMap order: max_wal_size, shared_buffers, work_mem
        let err = apply_custom_config(
            &sink,
            &map(&[
                ("work_mem", "8MB"),
                ("shared_buffers", "oops"),
                ("max_wal_size", "2GB"),
            ]),
        )
        .unwrap_err();

        assert!(matches!(&err, ConfigError::Apply { key, .. } if key == "shared_buffers"));
        assert!(!err.is_validation());
        assert_eq!(
            sink.applied(),
            vec![("max_wal_size".to_string(), "2GB".to_string())]
        );
        assert_eq!(sink.reloads(), 0);
    }

    #[test]
    fn reload_failure_is_reported() {
        let sink = RecordingSink {
            fail_reload: true,
            ..Default::default()
        };
        let err = apply_custom_config(&sink, &map(&[("work_mem", "8MB")])).unwrap_err();
        assert!(matches!(err, ConfigError::Reload(_)));
        assert_eq!(sink.applied().len(), 1);
    }

    #[test]
    fn unknown_preset_fails_before_io() {
        let sink = RecordingSink::default();
        let err = apply_preset(&sink, "unknown_name").unwrap_err();
        assert!(matches!(err, ConfigError::UnknownPreset(_)));
        assert!(sink.applied().is_empty());
        assert_eq!(sink.reloads(), 0);
    }

    #[test]
    fn preset_applies_its_bundle() {
        let sink = RecordingSink::default();
        let preset = apply_preset(&sink, "etl").unwrap();
        assert_eq!(preset, Preset::Etl);

        let applied: BTreeMap<_, _> = sink.applied().into_iter().collect();
        assert_eq!(applied, Preset::Etl.settings_map());
        assert_eq!(sink.reloads(), 1);
    }

    #[test]
    fn recommendations_omit_empty_fields() {
        let sink = RecordingSink::default();
        let tuning = TuningConfig {
            shared_buffers: "256MB".into(),
            deadlock_timeout: "1s".into(),
            ..Default::default()
        };
        let applied = apply_recommendations(&sink, &tuning).unwrap();

        let keys: Vec<_> = applied.keys().cloned().collect();
        assert_eq!(keys, vec!["deadlock_timeout", "shared_buffers"]);
        let sent: Vec<_> = sink.applied().into_iter().map(|(k, _)| k).collect();
        assert_eq!(sent, keys);
    }
}
