mod handlers;

use std::sync::{Arc, Mutex};

use axum::{
    routing::{delete, get, post, put},
    Router,
};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::inference::InferenceAdapter;
use crate::page::PageController;
use crate::store::KnowledgeBase;

pub use handlers::{ClassifyInput, ClassifyResponse, PageResponse};

/// Session state shared by every handler.
#[derive(Clone)]
pub struct AppState {
    pub kb: KnowledgeBase,
    pub pages: Arc<Mutex<PageController>>,
    /// `None` when no trained model was found; classification then fails.
    pub inference: Option<Arc<InferenceAdapter>>,
}

impl AppState {
    pub fn new(kb: KnowledgeBase) -> Self {
        Self {
            kb,
            pages: Arc::new(Mutex::new(PageController::new())),
            inference: None,
        }
    }

    pub fn with_inference(mut self, adapter: InferenceAdapter) -> Self {
        self.inference = Some(Arc::new(adapter));
        self
    }
}

pub fn create_router(state: AppState) -> Router {
    let api = Router::new()
        // Pages
        .route("/page", get(handlers::get_page))
        .route("/page/edit", post(handlers::open_editor))
        .route("/page/classify", post(handlers::open_classifier))
        .route("/page/back", post(handlers::go_back))
        // Feature registry
        .route("/features", get(handlers::list_features))
        .route("/features", post(handlers::add_feature))
        .route("/features/{label}", delete(handlers::remove_feature))
        // Value settings (by feature code)
        .route("/settings/{code}", get(handlers::get_setting))
        .route("/settings/{code}/kind", put(handlers::set_kind))
        .route("/settings/{code}/range", put(handlers::set_range))
        .route("/settings/{code}/values", post(handlers::add_enum_value))
        .route("/settings/{code}/values/{index}", delete(handlers::remove_enum_value))
        // Taxonomy and per-species tables
        .route("/species", get(handlers::list_species))
        .route("/species", post(handlers::add_species))
        .route("/species/{name}", delete(handlers::remove_species))
        .route("/species/{name}/applicability", get(handlers::get_applicability))
        .route("/species/{name}/applicability", put(handlers::set_applicability))
        .route("/species/{name}/values", get(handlers::get_values))
        .route("/species/{name}/values", put(handlers::set_values))
        .route("/species/{name}/profile", get(handlers::get_profile))
        // Classification
        .route("/classify", post(handlers::classify))
        // Maintenance
        .route("/prune", post(handlers::prune))
        .route("/violations", get(handlers::list_violations))
        // Health
        .route("/health", get(handlers::health));

    Router::new()
        .nest("/api/v1", api)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
