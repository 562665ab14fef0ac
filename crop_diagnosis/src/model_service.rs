use crate::disease::DiseaseLabel;
use image::DynamicImage;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ClassifierError {
    #[error("model file not found, searched: {searched:?}")]
    ModelFileNotFound { searched: Vec<PathBuf> },
    #[error("failed to load model: {0}")]
    Load(String),
    #[error("prediction failed: {0}")]
    Prediction(String),
}

impl From<ort::Error> for ClassifierError {
    fn from(err: ort::Error) -> Self {
        ClassifierError::Load(err.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Classification {
    pub label: DiseaseLabel,
    /// Softmax probability of `label`, in percent.
    pub confidence: f32,
}

/// Leaf classifier. Implementations are loaded once and shared read-only
/// between requests.
pub trait ModelService: Send + Sync + 'static {
    fn predict(&self, image: &DynamicImage) -> Result<Classification, ClassifierError>;

    /// Whether the classifier can still serve predictions.
    fn is_loaded(&self) -> bool;
}
