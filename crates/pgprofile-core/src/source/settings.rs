//! Persistent settings: `ALTER SYSTEM`, reload, and read-back from `pg_settings`.

use serde::Serialize;

use super::queries::{CURRENT_SETTINGS_QUERY, RELOAD_CONF_QUERY, alter_system_statement};
use super::{PgSource, SettingsSink};
use crate::configurator::ALLOWED_SETTINGS;
use crate::error::SourceError;

/// One row of `pg_settings`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[cfg_attr(feature = "api", derive(utoipa::ToSchema))]
pub struct SettingEntry {
    /// Setting name (e.g. "shared_buffers", "work_mem").
    pub name: String,
    /// Value in base units as reported by pg_settings.setting.
    pub setting: String,
    /// Unit reported by pg_settings.unit (e.g. "8kB", "ms", "s", "kB", or empty).
    pub unit: String,
}

impl SettingsSink for PgSource {
    fn set_persistent(&self, name: &str, value: &str) -> Result<(), SourceError> {
        let statement = alter_system_statement(name, value);
        self.with_client(|client, _| client.batch_execute(&statement))
    }

    fn reload(&self) -> Result<(), SourceError> {
        self.with_client(|client, _| client.batch_execute(RELOAD_CONF_QUERY))
    }
}

impl PgSource {
    /// Live values of every allow-listed setting.
    pub fn current_config(&self) -> Result<Vec<SettingEntry>, SourceError> {
        let names: Vec<&str> = ALLOWED_SETTINGS.to_vec();
        self.with_client(|client, _| {
            let rows = client.query(CURRENT_SETTINGS_QUERY, &[&names])?;
            Ok(rows
                .iter()
                .map(|row| SettingEntry {
                    name: row.get(0),
                    setting: row.get(1),
                    unit: row.get(2),
                })
                .collect())
        })
    }
}
