use std::collections::BTreeMap;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde::{Deserialize, Serialize};

use super::AppState;
use crate::error::Error;
use crate::models::*;

// ============================================================
// Error Handling
// ============================================================

/// Map a knowledge-base error to a response.
///
/// Input problems are returned as-is so the front-end can show them.
/// Anything else is logged and reported as a generic server error.
fn error_response(e: Error) -> (StatusCode, String) {
    let status = match &e {
        Error::UnknownFeature(_) | Error::UnknownSpecies(_) => StatusCode::NOT_FOUND,
        Error::MissingValues { .. } | Error::OutOfDomain { .. } | Error::EmptyEnumValues { .. } => {
            StatusCode::UNPROCESSABLE_ENTITY
        }
        Error::ModelUnavailable => StatusCode::SERVICE_UNAVAILABLE,
        // The registry changed since the model was exported.
        Error::FeatureCountMismatch { .. } => StatusCode::CONFLICT,
        e if e.is_validation() => StatusCode::BAD_REQUEST,
        _ => {
            tracing::error!("Internal error: {}", e);
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Internal server error".to_string(),
            );
        }
    };
    tracing::warn!("Request rejected: {}", e);
    (status, e.to_string())
}

fn lock_pages(state: &AppState) -> std::sync::MutexGuard<'_, crate::page::PageController> {
    state.pages.lock().expect("page controller lock poisoned")
}

// ============================================================
// Health
// ============================================================

pub async fn health() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok" }))
}

// ============================================================
// Pages
// ============================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageResponse {
    pub page: Page,
}

pub async fn get_page(State(state): State<AppState>) -> Json<PageResponse> {
    Json(PageResponse {
        page: lock_pages(&state).current(),
    })
}

pub async fn open_editor(
    State(state): State<AppState>,
) -> Result<Json<PageResponse>, (StatusCode, String)> {
    let page = lock_pages(&state).open_editor().map_err(error_response)?;
    Ok(Json(PageResponse { page }))
}

pub async fn open_classifier(
    State(state): State<AppState>,
) -> Result<Json<PageResponse>, (StatusCode, String)> {
    let page = lock_pages(&state)
        .open_classifier()
        .map_err(error_response)?;
    Ok(Json(PageResponse { page }))
}

pub async fn go_back(
    State(state): State<AppState>,
) -> Result<Json<PageResponse>, (StatusCode, String)> {
    let page = lock_pages(&state).back().map_err(error_response)?;
    Ok(Json(PageResponse { page }))
}

// ============================================================
// Feature registry
// ============================================================

pub async fn list_features(State(state): State<AppState>) -> Json<Vec<FeatureDomain>> {
    Json(
        state
            .kb
            .feature_domains()
            .into_iter()
            .map(|(feature, setting)| FeatureDomain { feature, setting })
            .collect(),
    )
}

/// Duplicate labels are ignored and answered with `200` and `null`.
pub async fn add_feature(
    State(state): State<AppState>,
    Json(input): Json<CreateFeatureInput>,
) -> Result<(StatusCode, Json<Option<Feature>>), (StatusCode, String)> {
    match state.kb.add_feature(&input.label).map_err(error_response)? {
        Some(feature) => Ok((StatusCode::CREATED, Json(Some(feature)))),
        None => Ok((StatusCode::OK, Json(None))),
    }
}

pub async fn remove_feature(
    State(state): State<AppState>,
    Path(label): Path<String>,
) -> Result<StatusCode, (StatusCode, String)> {
    match state.kb.remove_feature(&label).map_err(error_response)? {
        Some(_) => Ok(StatusCode::NO_CONTENT),
        None => Err((StatusCode::NOT_FOUND, "Feature not found".to_string())),
    }
}

// ============================================================
// Value settings
// ============================================================

pub async fn get_setting(
    State(state): State<AppState>,
    Path(code): Path<String>,
) -> Result<Json<ValueSetting>, (StatusCode, String)> {
    state.kb.get_setting(&code).map(Json).map_err(error_response)
}

pub async fn set_kind(
    State(state): State<AppState>,
    Path(code): Path<String>,
    Json(input): Json<SetKindInput>,
) -> Result<Json<ValueSetting>, (StatusCode, String)> {
    state
        .kb
        .set_kind(&code, input.kind)
        .map(Json)
        .map_err(error_response)
}

pub async fn set_range(
    State(state): State<AppState>,
    Path(code): Path<String>,
    Json(input): Json<SetRangeInput>,
) -> Result<Json<ValueSetting>, (StatusCode, String)> {
    state
        .kb
        .set_range(&code, input.min, input.max)
        .map_err(error_response)?;
    state.kb.get_setting(&code).map(Json).map_err(error_response)
}

pub async fn add_enum_value(
    State(state): State<AppState>,
    Path(code): Path<String>,
    Json(input): Json<AddEnumValueInput>,
) -> Result<(StatusCode, Json<ValueSetting>), (StatusCode, String)> {
    let added = state
        .kb
        .add_enum_value(&code, &input.value)
        .map_err(error_response)?;
    let setting = state.kb.get_setting(&code).map_err(error_response)?;
    let status = if added { StatusCode::CREATED } else { StatusCode::OK };
    Ok((status, Json(setting)))
}

pub async fn remove_enum_value(
    State(state): State<AppState>,
    Path((code, index)): Path<(String, usize)>,
) -> Result<Json<ValueSetting>, (StatusCode, String)> {
    state
        .kb
        .remove_enum_value(&code, index)
        .map_err(error_response)?
        .ok_or((StatusCode::NOT_FOUND, "Value not found".to_string()))?;
    state.kb.get_setting(&code).map(Json).map_err(error_response)
}

// ============================================================
// Taxonomy
// ============================================================

pub async fn list_species(State(state): State<AppState>) -> Json<Vec<String>> {
    Json(state.kb.list_species())
}

pub async fn add_species(
    State(state): State<AppState>,
    Json(input): Json<CreateSpeciesInput>,
) -> Result<(StatusCode, Json<Vec<String>>), (StatusCode, String)> {
    let added = state.kb.add_species(&input.name).map_err(error_response)?;
    let status = if added { StatusCode::CREATED } else { StatusCode::OK };
    Ok((status, Json(state.kb.list_species())))
}

pub async fn remove_species(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<StatusCode, (StatusCode, String)> {
    if state.kb.remove_species(&name).map_err(error_response)? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err((StatusCode::NOT_FOUND, "Species not found".to_string()))
    }
}

// ============================================================
// Applicability and values
// ============================================================

pub async fn get_applicability(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Json<BTreeMap<String, bool>> {
    Json(state.kb.get_applicability(&name))
}

pub async fn set_applicability(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(input): Json<BTreeMap<String, bool>>,
) -> Result<Json<BTreeMap<String, bool>>, (StatusCode, String)> {
    state
        .kb
        .set_applicability(&name, input)
        .map_err(error_response)?;
    Ok(Json(state.kb.get_applicability(&name)))
}

pub async fn get_values(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Json<BTreeMap<String, Option<FeatureValue>>> {
    Json(state.kb.get_values(&name))
}

pub async fn set_values(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(input): Json<BTreeMap<String, Option<FeatureValue>>>,
) -> Result<Json<BTreeMap<String, Option<FeatureValue>>>, (StatusCode, String)> {
    state.kb.set_values(&name, input).map_err(error_response)?;
    Ok(Json(state.kb.get_values(&name)))
}

pub async fn get_profile(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<SpeciesProfile>, (StatusCode, String)> {
    state
        .kb
        .species_profile(&name)
        .map(Json)
        .map_err(error_response)
}

// ============================================================
// Classification
// ============================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClassifyInput {
    /// Selected value per feature code. Omitted features use defaults.
    #[serde(default)]
    pub inputs: BTreeMap<String, FeatureValue>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassifyResponse {
    pub species: String,
}

pub async fn classify(
    State(state): State<AppState>,
    Json(input): Json<ClassifyInput>,
) -> Result<Json<ClassifyResponse>, (StatusCode, String)> {
    let domains = state.kb.feature_domains();
    // An empty value list blocks classification even without a model.
    crate::inference::build_vector(&domains, &input.inputs).map_err(error_response)?;

    let adapter = state
        .inference
        .as_ref()
        .ok_or_else(|| error_response(Error::ModelUnavailable))?;
    let species = adapter
        .classify(&domains, &input.inputs)
        .map_err(error_response)?;
    Ok(Json(ClassifyResponse { species }))
}

// ============================================================
// Maintenance
// ============================================================

pub async fn prune(
    State(state): State<AppState>,
) -> Result<Json<PruneReport>, (StatusCode, String)> {
    state.kb.prune().map(Json).map_err(error_response)
}

pub async fn list_violations(State(state): State<AppState>) -> Json<Vec<DomainViolation>> {
    Json(state.kb.domain_violations())
}
