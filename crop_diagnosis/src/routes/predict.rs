use crate::{
    disease::DiseaseLabel,
    image_utils::{decode_image, ImageInputError},
    model_service::ClassifierError,
    recommendation::RecommendationSource,
    server::SharedState,
};
use axum::{
    extract::{
        multipart::{MultipartError, MultipartRejection},
        Multipart, State,
    },
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde::{Deserialize, Serialize};
use std::time::Instant;
use thiserror::Error;
use tracing::instrument;

const IMAGE_FIELD: &str = "image";

#[derive(Error, Debug)]
pub enum PredictError {
    #[error("No image uploaded")]
    NoImage,
    #[error("Invalid upload: {reason}")]
    Multipart { status: StatusCode, reason: String },
    #[error("Invalid image file: {0}")]
    InvalidImage(#[from] ImageInputError),
    #[error("Classification failed: {0}")]
    Classification(#[from] ClassifierError),
    #[error("Internal error: {0}")]
    Internal(String),
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

impl IntoResponse for PredictError {
    fn into_response(self) -> Response {
        let status = match self {
            PredictError::Multipart { status, .. } => status,
            PredictError::NoImage | PredictError::InvalidImage(_) => StatusCode::BAD_REQUEST,
            PredictError::Classification(_) | PredictError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        (
            status,
            Json(ErrorBody {
                error: self.to_string(),
            }),
        )
            .into_response()
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PredictionResponse {
    pub disease: DiseaseLabel,
    pub confidence: f32,
    pub recommendation: String,
    /// Base64 PDF report, `null` when rendering failed.
    pub pdf: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pdf_error: Option<String>,
}

// Keeps the parser's status, so an oversized upload stays a 413.
impl From<MultipartError> for PredictError {
    fn from(err: MultipartError) -> Self {
        PredictError::Multipart {
            status: err.status(),
            reason: err.body_text(),
        }
    }
}

async fn read_image_field(multipart: &mut Multipart) -> Result<Vec<u8>, PredictError> {
    while let Some(field) = multipart.next_field().await? {
        if field.name() == Some(IMAGE_FIELD) {
            let data = field.bytes().await?;
            return Ok(data.to_vec());
        }
    }
    Err(PredictError::NoImage)
}

#[instrument(skip_all)]
pub async fn predict(
    State(state): State<SharedState>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<PredictionResponse>, PredictError> {
    state.metrics.record_request("/predict");

    let mut multipart = multipart.map_err(|e| {
        tracing::warn!("Rejected upload: {}", e);
        PredictError::NoImage
    })?;
    let image_data = read_image_field(&mut multipart).await.map_err(|e| {
        tracing::warn!("{}", e);
        e
    })?;
    tracing::info!("Received image ({} bytes)", image_data.len());

    let started = Instant::now();
    let model_service = state.model_service.clone();
    let (image, classification) = tokio::task::spawn_blocking(move || {
        let image = decode_image(&image_data)?;
        let classification = model_service.predict(&image)?;
        Ok::<_, PredictError>((image, classification))
    })
    .await
    .map_err(|e| PredictError::Internal(e.to_string()))?
    .map_err(|e| {
        match &e {
            PredictError::InvalidImage(_) => tracing::warn!("{}", e),
            _ => tracing::error!("{}", e),
        }
        e
    })?;
    state
        .metrics
        .record_stage_duration("classify", started.elapsed().as_millis() as u64);
    tracing::info!(
        disease = %classification.label,
        confidence = classification.confidence,
        "Prediction complete"
    );

    let started = Instant::now();
    let recommendation = state
        .recommendation_service
        .recommend(classification.label)
        .await;
    if recommendation.source == RecommendationSource::Fallback {
        state.metrics.record_recommendation_fallback();
    }
    state
        .metrics
        .record_stage_duration("recommend", started.elapsed().as_millis() as u64);

    let started = Instant::now();
    let renderer = state.report_renderer.clone();
    let disease = classification.label.as_str();
    let confidence = f64::from(classification.confidence);
    let text = recommendation.text.clone();
    let report =
        tokio::task::spawn_blocking(move || renderer.render(&image, disease, confidence, &text))
            .await
            .map_err(|e| e.to_string())
            .and_then(|rendered| rendered.map_err(|e| e.to_string()));
    state
        .metrics
        .record_stage_duration("report", started.elapsed().as_millis() as u64);

    let (pdf, pdf_error) = match report {
        Ok(pdf) => (Some(pdf), None),
        Err(e) => {
            tracing::error!("PDF generation failed: {}", e);
            state.metrics.record_report_failure();
            (None, Some(format!("Could not generate PDF: {}", e)))
        }
    };

    Ok(Json(PredictionResponse {
        disease: classification.label,
        confidence: classification.confidence,
        recommendation: recommendation.text,
        pdf,
        pdf_error,
    }))
}
