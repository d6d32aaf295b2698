//! HTTP request handlers: status, dashboard, configuration and load control.

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};
use utoipa::{IntoParams, ToSchema};

use pgprofile_core::configurator;
use pgprofile_core::source::PgSource;
use pgprofile_core::source::SettingEntry;
use pgprofile_core::source::dashboard::DashboardData;
use pgprofile_core::{ConfigError, Preset, Profile, StatusView};

use crate::generator::{LoadScenario, parse_intensity};
use crate::state::AppState;

// ============================================================
// Responses
// ============================================================

/// Error body: `{"status": "error", "error": "..."}`.
#[derive(Debug, Serialize, ToSchema)]
pub(crate) struct ErrorBody {
    status: &'static str,
    error: String,
}

#[derive(Debug)]
pub(crate) struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }

    fn internal(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: message.into(),
        }
    }

    fn config(context: &str, e: ConfigError) -> Self {
        let message = format!("{context}: {e}");
        if e.is_validation() {
            Self::bad_request(message)
        } else {
            Self::internal(message)
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            error!(status = self.status.as_u16(), error = %self.message, "request failed");
        }
        let body = ErrorBody {
            status: "error",
            error: self.message,
        };
        (self.status, Json(body)).into_response()
    }
}

/// Result of a configuration change.
#[derive(Debug, Serialize, ToSchema)]
pub(crate) struct ApplyResponse {
    /// "success" or "noop".
    status: &'static str,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    preset: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    ml_profile: Option<String>,
    /// Settings sent to the server.
    applied_config: BTreeMap<String, String>,
}

#[derive(Debug, Serialize, ToSchema)]
pub(crate) struct LoadStarted {
    status: &'static str,
    scenario: String,
    intensity: u8,
    clients: u32,
    message: String,
}

/// Runs a blocking database call off the async runtime.
async fn blocking<T, F>(db: &Arc<PgSource>, f: F) -> Result<T, ApiError>
where
    T: Send + 'static,
    F: FnOnce(&PgSource) -> Result<T, ApiError> + Send + 'static,
{
    let db = Arc::clone(db);
    tokio::task::spawn_blocking(move || f(db.as_ref()))
        .await
        .map_err(|e| ApiError::internal(format!("blocking task failed: {e}")))?
}

// ============================================================
// Health
// ============================================================

#[utoipa::path(
    get,
    path = "/api/v1/health",
    responses(
        (status = 200, description = "Service is healthy", body = String)
    )
)]
pub(crate) async fn handle_health() -> &'static str {
    "ok"
}

// ============================================================
// Status & dashboard
// ============================================================

#[utoipa::path(
    get,
    path = "/status",
    responses(
        (status = 200, description = "Latest diagnosis and active scenario", body = StatusView)
    )
)]
pub(crate) async fn handle_status(State(state): AppState) -> Json<StatusView> {
    Json(state.published.status())
}

#[utoipa::path(
    get,
    path = "/dashboard",
    responses(
        (status = 200, description = "Instance overview", body = DashboardData),
        (status = 500, description = "Database unavailable", body = ErrorBody)
    )
)]
pub(crate) async fn handle_dashboard(
    State(state): AppState,
) -> Result<Json<DashboardData>, ApiError> {
    let data = blocking(&state.db, |db| {
        db.system_summary()
            .map_err(|e| ApiError::internal(format!("failed to get dashboard data: {e}")))
    })
    .await?;
    Ok(Json(data))
}

// ============================================================
// Configuration
// ============================================================

#[derive(Debug, Deserialize, IntoParams)]
pub(crate) struct PresetQuery {
    /// Preset name: oltp, olap, write_heavy, high_concurrency, reporting, mixed, etl, cold.
    preset: Option<String>,
}

#[utoipa::path(
    get,
    path = "/config/apply",
    params(PresetQuery),
    responses(
        (status = 200, description = "Preset applied and configuration reloaded", body = ApplyResponse),
        (status = 400, description = "Missing or unknown preset", body = ErrorBody),
        (status = 500, description = "Setting or reload failed", body = ErrorBody)
    )
)]
pub(crate) async fn handle_apply_preset(
    State(state): AppState,
    Query(query): Query<PresetQuery>,
) -> Result<Json<ApplyResponse>, ApiError> {
    let Some(name) = query.preset.filter(|p| !p.is_empty()) else {
        return Err(ApiError::bad_request(
            "usage: /config/apply?preset=[oltp|olap|write_heavy...]",
        ));
    };

    let preset = blocking(&state.db, move |db| {
        configurator::apply_preset(db, &name)
            .map_err(|e| ApiError::config("failed to apply preset", e))
    })
    .await?;

    state.published.set_active_config(preset.name());
    Ok(Json(ApplyResponse {
        status: "success",
        message: format!("applied configuration preset {preset}, configuration reloaded"),
        preset: Some(preset.name().to_string()),
        ml_profile: None,
        applied_config: preset.settings_map(),
    }))
}

#[utoipa::path(
    get,
    path = "/config/current",
    responses(
        (status = 200, description = "Live values of the managed settings", body = Vec<SettingEntry>),
        (status = 500, description = "Database unavailable", body = ErrorBody)
    )
)]
pub(crate) async fn handle_current_config(
    State(state): AppState,
) -> Result<Json<Vec<SettingEntry>>, ApiError> {
    let settings = blocking(&state.db, |db| {
        db.current_config()
            .map_err(|e| ApiError::internal(format!("failed to get current config: {e}")))
    })
    .await?;
    Ok(Json(settings))
}

#[utoipa::path(
    patch,
    path = "/config/custom",
    request_body(content = BTreeMap<String, String>, description = "Setting name to value"),
    responses(
        (status = 200, description = "Settings applied and configuration reloaded", body = ApplyResponse),
        (status = 400, description = "Invalid body or forbidden setting", body = ErrorBody),
        (status = 500, description = "Setting or reload failed", body = ErrorBody)
    )
)]
pub(crate) async fn handle_custom_config(
    State(state): AppState,
    body: Bytes,
) -> Result<Json<ApplyResponse>, ApiError> {
    let settings: BTreeMap<String, String> = serde_json::from_slice(&body)
        .map_err(|e| ApiError::bad_request(format!("invalid JSON body: {e}")))?;

    let applied = settings.clone();
    blocking(&state.db, move |db| {
        configurator::apply_custom_config(db, &settings)
            .map_err(|e| ApiError::config("failed to apply custom config", e))
    })
    .await?;

    state.published.set_active_config("custom");
    Ok(Json(ApplyResponse {
        status: "success",
        message: "custom configuration applied".to_string(),
        preset: None,
        ml_profile: None,
        applied_config: applied,
    }))
}

/// `ml_profile` may be a label or a list of labels (first one wins).
#[derive(Debug, Deserialize, ToSchema)]
#[serde(untagged)]
pub(crate) enum MlProfileField {
    One(String),
    Many(Vec<String>),
}

#[derive(Debug, Default, Deserialize, ToSchema)]
pub(crate) struct RecommendationsRequest {
    #[serde(default)]
    ml_profile: Option<MlProfileField>,
}

impl RecommendationsRequest {
    /// Normalized ML label, if one was given.
    fn label(&self) -> Option<String> {
        let raw = match self.ml_profile.as_ref()? {
            MlProfileField::One(s) => s.as_str(),
            MlProfileField::Many(v) => v.first()?.as_str(),
        };
        let label = raw.trim().to_lowercase();
        (!label.is_empty()).then_some(label)
    }
}

/// Maps an external ML label to a preset. Unknown labels fall back to OLTP.
pub(crate) fn preset_for_ml_profile(label: &str) -> Preset {
    match label {
        "olap" => Preset::Olap,
        "iot" => Preset::WriteHeavy,
        "locks" => Preset::HighConcurrency,
        "reporting" => Preset::Reporting,
        "mixed" => Preset::Mixed,
        "etl" => Preset::Etl,
        "cold" => Preset::Cold,
        "oltp" | "init" => Preset::Oltp,
        _ => {
            warn!(ml_profile = label, "unknown ML profile, using oltp");
            Preset::Oltp
        }
    }
}

#[utoipa::path(
    post,
    path = "/config/apply-recommendations",
    request_body(content = RecommendationsRequest, description = "Optional ML profile label"),
    responses(
        (status = 200, description = "Recommendations applied, or noop when idle", body = ApplyResponse),
        (status = 500, description = "Setting or reload failed", body = ErrorBody)
    )
)]
pub(crate) async fn handle_apply_recommendations(
    State(state): AppState,
    body: Bytes,
) -> Result<Json<ApplyResponse>, ApiError> {
    // A missing or malformed body means "use the local diagnosis".
    let request: RecommendationsRequest = serde_json::from_slice(&body).unwrap_or_default();

    if let Some(label) = request.label() {
        let preset = preset_for_ml_profile(&label);
        info!(ml_profile = %label, preset = %preset, "applying preset for ML profile");

        blocking(&state.db, move |db| {
            configurator::apply_preset(db, preset.name())
                .map_err(|e| ApiError::config("failed to apply preset for ML profile", e))
        })
        .await?;

        state.published.set_active_config(preset.name());
        return Ok(Json(ApplyResponse {
            status: "success",
            message: format!("ML recommendations applied: profile {label}, preset {preset}"),
            preset: Some(preset.name().to_string()),
            ml_profile: Some(label),
            applied_config: preset.settings_map(),
        }));
    }

    let diagnosis = match state.published.latest_diagnosis() {
        Some(d) if d.kind != Profile::Idle => d,
        _ => {
            return Ok(Json(ApplyResponse {
                status: "noop",
                message: "no active recommendations to apply (system is idle)".to_string(),
                preset: None,
                ml_profile: None,
                applied_config: BTreeMap::new(),
            }));
        }
    };

    let tuning = diagnosis.tuning.clone();
    let applied = blocking(&state.db, move |db| {
        configurator::apply_recommendations(db, &tuning)
            .map_err(|e| ApiError::config("failed to apply recommendations", e))
    })
    .await?;

    state
        .published
        .set_active_config(&format!("AI_RECOMMENDED ({})", diagnosis.profile));
    Ok(Json(ApplyResponse {
        status: "success",
        message: "recommendations applied".to_string(),
        preset: diagnosis.kind.preset().map(|p| p.name().to_string()),
        ml_profile: None,
        applied_config: applied,
    }))
}

// ============================================================
// Load generator
// ============================================================

#[derive(Debug, Deserialize, IntoParams)]
pub(crate) struct LoadQuery {
    /// Scenario: init, oltp, olap, iot, locks, reporting, mixed, etl, cold.
    scenario: Option<String>,
    /// Intensity level 1..8; out of range values are clamped.
    intensity: Option<String>,
}

#[utoipa::path(
    get,
    path = "/load/start",
    params(LoadQuery),
    responses(
        (status = 200, description = "Load scenario started", body = LoadStarted),
        (status = 400, description = "Missing or unknown scenario", body = ErrorBody)
    )
)]
pub(crate) async fn handle_load_start(
    State(state): AppState,
    Query(query): Query<LoadQuery>,
) -> Result<Json<LoadStarted>, ApiError> {
    let Some(name) = query.scenario.filter(|s| !s.is_empty()) else {
        return Err(ApiError::bad_request(
            "usage: /load/start?scenario=[oltp|olap|iot...]&intensity=[1..8]",
        ));
    };
    let scenario: LoadScenario = name.parse().map_err(ApiError::bad_request)?;
    let intensity = parse_intensity(query.intensity.as_deref());

    state.published.start_scenario(scenario.name(), Utc::now());
    let launched = state.generator.start(scenario, intensity);

    Ok(Json(LoadStarted {
        status: "started",
        scenario: launched.scenario,
        intensity: launched.intensity,
        clients: launched.clients,
        message: "load started".to_string(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(json: &str) -> RecommendationsRequest {
        serde_json::from_str(json).unwrap_or_default()
    }

    #[test]
    fn ml_labels_map_to_presets() {
        assert_eq!(preset_for_ml_profile("oltp"), Preset::Oltp);
        assert_eq!(preset_for_ml_profile("iot"), Preset::WriteHeavy);
        assert_eq!(preset_for_ml_profile("locks"), Preset::HighConcurrency);
        assert_eq!(preset_for_ml_profile("init"), Preset::Oltp);
        assert_eq!(preset_for_ml_profile("cold"), Preset::Cold);
        assert_eq!(preset_for_ml_profile("quantum"), Preset::Oltp);
    }

    #[test]
    fn ml_profile_accepts_string_or_list() {
        assert_eq!(request(r#"{"ml_profile": " OLAP "}"#).label().as_deref(), Some("olap"));
        assert_eq!(
            request(r#"{"ml_profile": ["etl", "cold"]}"#).label().as_deref(),
            Some("etl")
        );
        assert_eq!(request(r#"{"ml_profile": []}"#).label(), None);
        assert_eq!(request(r#"{"ml_profile": "  "}"#).label(), None);
        assert_eq!(request(r#"{}"#).label(), None);
        assert_eq!(request("not json").label(), None);
    }

    #[test]
    fn validation_errors_are_bad_requests() {
        let e = ApiError::config("x", ConfigError::InvalidKey("fsync".into()));
        assert_eq!(e.status, StatusCode::BAD_REQUEST);

        let e = ApiError::config(
            "x",
            ConfigError::Reload(pgprofile_core::SourceError::Query("boom".into())),
        );
        assert_eq!(e.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(e.message.contains("failed to reload conf"));
    }

    #[test]
    fn error_body_shape() {
        let body = ErrorBody {
            status: "error",
            error: "failed to apply preset: unknown preset: turbo".into(),
        };
        let json = serde_json::to_value(body).unwrap();
        assert_eq!(json["status"], "error");
        assert_eq!(json["error"], "failed to apply preset: unknown preset: turbo");
    }

    #[test]
    fn apply_response_omits_absent_fields() {
        let resp = ApplyResponse {
            status: "noop",
            message: "idle".into(),
            preset: None,
            ml_profile: None,
            applied_config: BTreeMap::new(),
        };
        let json = serde_json::to_value(resp).unwrap();
        assert!(json.get("preset").is_none());
        assert!(json.get("ml_profile").is_none());
        assert!(json["applied_config"].as_object().unwrap().is_empty());
    }
}
