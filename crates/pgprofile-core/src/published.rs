//! Published state: latest diagnosis plus the active scenario.
//!
//! One writer (the analysis loop) replaces the diagnosis each tick; HTTP
//! handlers read concurrently and always get a complete copy.

use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::classifier::Diagnosis;

/// What the operator last started or applied.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[cfg_attr(feature = "api", derive(utoipa::ToSchema))]
pub struct ScenarioInfo {
    pub load_scenario: String,
    pub active_config: String,
    pub start_time: Option<DateTime<Utc>>,
}

/// Read-side view returned by `/status`.
#[derive(Debug, Clone, Serialize)]
#[cfg_attr(feature = "api", derive(utoipa::ToSchema))]
pub struct StatusView {
    pub timestamp: Option<DateTime<Utc>>,
    pub ground_truth: Option<ScenarioInfo>,
    pub diagnosis: Option<Diagnosis>,
}

#[derive(Debug, Default)]
struct Inner {
    diagnosis: Option<Diagnosis>,
    published_at: Option<DateTime<Utc>>,
    scenario: Option<ScenarioInfo>,
}

/// Cheap to clone handle to the shared state.
#[derive(Clone, Default)]
pub struct PublishedState {
    inner: Arc<RwLock<Inner>>,
}

impl PublishedState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the diagnosis and its timestamp in one write.
    pub fn publish(&self, diagnosis: Diagnosis, at: DateTime<Utc>) {
        let mut inner = self.write();
        inner.diagnosis = Some(diagnosis);
        inner.published_at = Some(at);
    }

    pub fn set_active_config(&self, name: &str) {
        let mut inner = self.write();
        inner
            .scenario
            .get_or_insert_with(ScenarioInfo::default)
            .active_config = name.to_string();
    }

    /// Records a started load scenario, keeping the active config name.
    pub fn start_scenario(&self, name: &str, at: DateTime<Utc>) {
        let mut inner = self.write();
        let scenario = inner.scenario.get_or_insert_with(ScenarioInfo::default);
        scenario.load_scenario = name.to_string();
        scenario.start_time = Some(at);
    }

    pub fn status(&self) -> StatusView {
        let inner = self.read();
        StatusView {
            timestamp: inner.published_at,
            ground_truth: inner.scenario.clone(),
            diagnosis: inner.diagnosis.clone(),
        }
    }

    pub fn latest_diagnosis(&self) -> Option<Diagnosis> {
        self.read().diagnosis.clone()
    }

    fn read(&self) -> RwLockReadGuard<'_, Inner> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Inner> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }
}
