//! OpenAPI documentation definition.

use pgprofile_core::source::SettingEntry;
use pgprofile_core::source::dashboard::{DashboardData, TableStats, WaitEventSummary};
use pgprofile_core::{
    Confidence, Diagnosis, Preset, ScenarioInfo, StatusView, TuningConfig, WorkloadMetrics,
};
use utoipa::OpenApi;

use crate::handlers::{ApplyResponse, ErrorBody, LoadStarted, MlProfileField, RecommendationsRequest};

#[derive(OpenApi)]
#[openapi(
    paths(
        crate::handlers::handle_health,
        crate::handlers::handle_status,
        crate::handlers::handle_dashboard,
        crate::handlers::handle_apply_preset,
        crate::handlers::handle_current_config,
        crate::handlers::handle_custom_config,
        crate::handlers::handle_apply_recommendations,
        crate::handlers::handle_load_start,
    ),
    components(schemas(
        StatusView,
        ScenarioInfo,
        Diagnosis,
        Confidence,
        WorkloadMetrics,
        TuningConfig,
        Preset,
        DashboardData,
        WaitEventSummary,
        TableStats,
        SettingEntry,
        ApplyResponse,
        RecommendationsRequest,
        MlProfileField,
        LoadStarted,
        ErrorBody,
    )),
    info(
        title = "pgprofile API",
        version = "1.0",
        description = "PostgreSQL workload profiling: live diagnosis, tuning presets and synthetic load"
    )
)]
pub(crate) struct ApiDoc;
