use crate::{
    disease::{catalog, DiseaseProfile},
    server::SharedState,
};
use axum::{extract::State, response::Json};

/// Lists every label the classifier can return with its field ratings.
pub async fn list_diseases(State(state): State<SharedState>) -> Json<Vec<DiseaseProfile>> {
    state.metrics.record_request("/diseases");
    Json(catalog())
}
