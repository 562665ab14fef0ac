use crate::{config::RecommendationConfig, disease::DiseaseLabel, gemini::GeminiClient};
use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;

pub const HEALTHY_TEMPLATE: &str = "\
- Maintain proper watering schedule (not too wet or dry)
- Apply balanced NPK fertilizer as recommended for cassava
- Keep the area around plants free of weeds
- Inspect plants weekly for early signs of pests or disease
- Ensure proper spacing between plants for good air circulation

Monitor for:
- Yellow discoloration of leaves
- Unusual spots or lesions
- Presence of insects or mites";

const TREATMENT_STEPS: &str = "\
- Immediately remove and destroy severely affected plants
- Apply copper-based fungicide (2g/liter) for bacterial diseases or appropriate fungicide for fungal diseases
- Ensure proper field drainage
- Use clean, disease-free planting material for new plantings
- Maintain proper spacing between plants for good air circulation
- Consider crop rotation if disease is persistent";

const HEALTHY_PROMPT: &str = "\
As a cassava agricultural expert, list:
- 5 essential maintenance practices for healthy cassava
- 3 early signs of disease to monitor
- Ideal soil/weather conditions
Format as bullet points without markdown.";

const LIVENESS_PROMPT: &str = "Hello";

#[derive(Error, Debug)]
pub enum RecommendationError {
    #[error("Gemini error: {0}")]
    Gemini(#[from] crate::gemini::GeminiError),
    #[error("completion service unavailable: {0}")]
    Unavailable(String),
}

#[async_trait]
pub trait CompletionClient: Send + Sync {
    async fn generate(&self, prompt: &str, temperature: f32)
        -> Result<String, RecommendationError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecommendationSource {
    Generated,
    Fallback,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Recommendation {
    pub text: String,
    pub source: RecommendationSource,
}

/// Static advice used whenever the text-generation API is not available.
pub fn offline_recommendation(disease: &str) -> String {
    if disease == DiseaseLabel::Healthy.as_str() {
        HEALTHY_TEMPLATE.to_string()
    } else {
        format!("For {}:\n{}", disease, TREATMENT_STEPS)
    }
}

pub fn build_prompt(label: DiseaseLabel) -> String {
    if label.is_healthy() {
        HEALTHY_PROMPT.to_string()
    } else {
        format!(
            "As a cassava disease specialist, create a treatment plan for {}:\n\
             - First emergency steps\n\
             - Approved chemical treatments (specify dosage)\n\
             - Organic alternatives\n\
             - Cultural control methods\n\
             Use bullet points, avoid technical jargon.",
            label
        )
    }
}

fn normalize_bullets(text: &str) -> String {
    text.replace('\u{2022}', "-")
}

pub struct RecommendationService {
    client: Option<Arc<dyn CompletionClient>>,
    temperature: f32,
}

impl RecommendationService {
    pub fn new(client: Option<Arc<dyn CompletionClient>>, temperature: f32) -> Self {
        Self {
            client,
            temperature,
        }
    }

    pub fn offline() -> Self {
        Self::new(None, RecommendationConfig::default().temperature)
    }

    /// Builds the service, probing the API once. Any failure here leaves the
    /// service offline for the lifetime of the process.
    pub async fn connect(config: &RecommendationConfig) -> Self {
        let Some(api_key) = config.api_key() else {
            tracing::warn!("No Gemini API key configured, recommendations will use fallback text");
            return Self::new(None, config.temperature);
        };

        let client: Arc<dyn CompletionClient> = Arc::new(GeminiClient::new(config, api_key));
        Self::probe(client, config.temperature).await
    }

    pub async fn probe(client: Arc<dyn CompletionClient>, temperature: f32) -> Self {
        match client.generate(LIVENESS_PROMPT, temperature).await {
            Ok(_) => {
                tracing::info!("Recommendation API initialized");
                Self::new(Some(client), temperature)
            }
            Err(e) => {
                tracing::warn!(
                    "Failed to initialize recommendation API, using fallback text: {}",
                    e
                );
                Self::new(None, temperature)
            }
        }
    }

    pub fn is_online(&self) -> bool {
        self.client.is_some()
    }

    pub async fn recommend(&self, label: DiseaseLabel) -> Recommendation {
        if let Some(client) = &self.client {
            match client.generate(&build_prompt(label), self.temperature).await {
                Ok(text) => {
                    return Recommendation {
                        text: normalize_bullets(&text),
                        source: RecommendationSource::Generated,
                    }
                }
                Err(e) => {
                    tracing::warn!(disease = %label, "Error generating advice: {}", e);
                }
            }
        }

        Recommendation {
            text: offline_recommendation(label.as_str()),
            source: RecommendationSource::Fallback,
        }
    }

    pub async fn get_recommendation(&self, label: DiseaseLabel) -> String {
        self.recommend(label).await.text
    }
}
