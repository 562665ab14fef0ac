use crate::{
    config::ModelConfig,
    disease::DiseaseLabel,
    image_utils::to_rgb,
    model_service::{Classification, ClassifierError, ModelService},
};
use image::{imageops::FilterType, DynamicImage};
use ndarray::Array4;
use ort::{
    session::{builder::GraphOptimizationLevel, Session},
    value::TensorRef,
};
use std::{
    path::{Path, PathBuf},
    sync::Mutex,
};

const INPUT_SIZE: u32 = 224;
const MEAN: [f32; 3] = [0.485, 0.456, 0.406];
const STD: [f32; 3] = [0.229, 0.224, 0.225];
const MODEL_FILE_NAME: &str = "crop_best_model.onnx";
const PARALLEL_PREFIX: &str = "module.";

/// Returns the first existing weights file among the configured path and
/// the fixed fallbacks under `base_dir`.
pub fn find_model_file(configured: &Path, base_dir: &Path) -> Result<PathBuf, ClassifierError> {
    let candidates = vec![
        configured.to_path_buf(),
        base_dir.join(configured),
        base_dir.join("models").join(MODEL_FILE_NAME),
        base_dir.join("..").join("models").join(MODEL_FILE_NAME),
        base_dir.join(MODEL_FILE_NAME),
    ];

    match candidates.iter().find(|path| path.is_file()) {
        Some(path) => Ok(path.clone()),
        None => {
            for path in &candidates {
                tracing::error!("Model file not found at {}", path.display());
            }
            Err(ClassifierError::ModelFileNotFound {
                searched: candidates,
            })
        }
    }
}

/// Tensor names exported from a data-parallel wrapper carry a `module.`
/// prefix; compare names without it.
fn canonical_name(name: &str) -> &str {
    let mut name = name;
    while let Some(stripped) = name.strip_prefix(PARALLEL_PREFIX) {
        name = stripped;
    }
    name
}

fn resolve_name(
    available: &[String],
    wanted: Option<&str>,
    kind: &str,
) -> Result<String, ClassifierError> {
    let found = match wanted {
        Some(wanted) => available
            .iter()
            .find(|name| canonical_name(name) == canonical_name(wanted)),
        None => available.first(),
    };

    found.cloned().ok_or_else(|| {
        ClassifierError::Load(format!(
            "no {} named {:?} in graph (available: {:?})",
            kind,
            wanted.unwrap_or("<first>"),
            available
        ))
    })
}

fn image_to_tensor(image: &DynamicImage) -> Array4<f32> {
    let rgb = to_rgb(image);
    let resized = image::imageops::resize(&rgb, INPUT_SIZE, INPUT_SIZE, FilterType::Triangle);

    let mut input = Array4::zeros((1, 3, INPUT_SIZE as usize, INPUT_SIZE as usize));
    for (x, y, pixel) in resized.enumerate_pixels() {
        for channel in 0..3 {
            let value = pixel.0[channel] as f32 / 255.;
            input[[0, channel, y as usize, x as usize]] = (value - MEAN[channel]) / STD[channel];
        }
    }
    input
}

fn softmax(logits: &[f32]) -> Vec<f32> {
    let max_logit = logits.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let exp_values: Vec<f32> = logits.iter().map(|&x| (x - max_logit).exp()).collect();
    let sum: f32 = exp_values.iter().sum();
    exp_values.iter().map(|&x| x / sum).collect()
}

fn classify_logits(logits: &[f32]) -> Result<Classification, ClassifierError> {
    if logits.len() != DiseaseLabel::ALL.len() {
        return Err(ClassifierError::Prediction(format!(
            "expected {} class logits, got {}",
            DiseaseLabel::ALL.len(),
            logits.len()
        )));
    }

    let probabilities = softmax(logits);
    let (index, probability) = probabilities
        .iter()
        .copied()
        .enumerate()
        .reduce(|best, item| if item.1 > best.1 { item } else { best })
        .ok_or_else(|| ClassifierError::Prediction("empty output".to_string()))?;

    if !probability.is_finite() {
        return Err(ClassifierError::Prediction(
            "model produced non-finite scores".to_string(),
        ));
    }

    let label = DiseaseLabel::from_index(index).ok_or_else(|| {
        ClassifierError::Prediction(format!("class index {} out of range", index))
    })?;

    Ok(Classification {
        label,
        confidence: (probability * 100.).clamp(0., 100.),
    })
}

pub struct OrtModelService {
    session: Mutex<Session>,
    input_name: String,
    output_name: String,
}

impl OrtModelService {
    pub fn new(model_config: &ModelConfig) -> Result<Self, ClassifierError> {
        let base_dir = std::env::current_dir()
            .map_err(|e| ClassifierError::Load(format!("cannot read current dir: {}", e)))?;
        let model_path = find_model_file(&model_config.path, &base_dir)?;

        let session = Session::builder()?
            .with_optimization_level(GraphOptimizationLevel::Level3)?
            .commit_from_file(&model_path)?;

        let inputs: Vec<String> = session.inputs.iter().map(|i| i.name.clone()).collect();
        let outputs: Vec<String> = session.outputs.iter().map(|o| o.name.clone()).collect();
        let input_name = resolve_name(&inputs, model_config.input_name.as_deref(), "input")?;
        let output_name = resolve_name(&outputs, model_config.output_name.as_deref(), "output")?;

        let service = Self {
            session: Mutex::new(session),
            input_name,
            output_name,
        };

        // A blank forward pass checks the head is sized for our five labels.
        let probe = Array4::zeros((1, 3, INPUT_SIZE as usize, INPUT_SIZE as usize));
        let logits = service
            .run_inference(&probe)
            .map_err(|e| ClassifierError::Load(e.to_string()))?;
        classify_logits(&logits).map_err(|e| ClassifierError::Load(e.to_string()))?;

        tracing::info!(
            path = %model_path.display(),
            input = %service.input_name,
            output = %service.output_name,
            "Model loaded"
        );

        Ok(service)
    }

    fn run_inference(&self, input: &Array4<f32>) -> Result<Vec<f32>, ClassifierError> {
        let mut session = self
            .session
            .lock()
            .map_err(|e| ClassifierError::Prediction(format!("session mutex poisoned: {}", e)))?;

        let tensor_ref = TensorRef::from_array_view(input.view())
            .map_err(|e| ClassifierError::Prediction(format!("failed to build tensor: {}", e)))?;

        let outputs = session
            .run(ort::inputs![self.input_name.as_str() => tensor_ref])
            .map_err(|e| ClassifierError::Prediction(format!("inference failed: {}", e)))?;

        let (_, logits) = outputs[self.output_name.as_str()]
            .try_extract_tensor::<f32>()
            .map_err(|e| ClassifierError::Prediction(format!("failed to extract tensor: {}", e)))?;

        Ok(logits.to_vec())
    }
}

impl ModelService for OrtModelService {
    fn predict(&self, image: &DynamicImage) -> Result<Classification, ClassifierError> {
        let input = image_to_tensor(image);
        let logits = self.run_inference(&input)?;
        let classification = classify_logits(&logits)?;

        tracing::debug!(
            label = %classification.label,
            confidence = classification.confidence,
            "Classified leaf image"
        );

        Ok(classification)
    }

    // A panic mid-inference poisons the session lock and every later
    // prediction fails.
    fn is_loaded(&self) -> bool {
        !self.session.is_poisoned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageBuffer, Rgb, Rgba};

    #[test]
    fn test_image_to_tensor_shape_and_normalization() {
        let img = ImageBuffer::<Rgb<u8>, Vec<u8>>::from_pixel(100, 60, Rgb([255, 0, 128]));
        let input = image_to_tensor(&DynamicImage::ImageRgb8(img));

        assert_eq!(input.shape(), &[1, 3, 224, 224]);
        let red = (1.0 - MEAN[0]) / STD[0];
        let green = (0.0 - MEAN[1]) / STD[1];
        let blue = (128.0 / 255.0 - MEAN[2]) / STD[2];
        assert!((input[[0, 0, 10, 10]] - red).abs() < 1e-5);
        assert!((input[[0, 1, 200, 3]] - green).abs() < 1e-5);
        assert!((input[[0, 2, 223, 223]] - blue).abs() < 1e-5);
    }

    #[test]
    fn test_image_to_tensor_ignores_alpha() {
        let opaque = ImageBuffer::<Rgba<u8>, Vec<u8>>::from_pixel(8, 8, Rgba([40, 80, 120, 255]));
        let clear = ImageBuffer::<Rgba<u8>, Vec<u8>>::from_pixel(8, 8, Rgba([40, 80, 120, 0]));

        assert_eq!(
            image_to_tensor(&DynamicImage::ImageRgba8(opaque)),
            image_to_tensor(&DynamicImage::ImageRgba8(clear))
        );
    }

    #[test]
    fn test_softmax_sums_to_one() {
        let probabilities = softmax(&[1.0, 2.0, 3.0, 4.0, 5.0]);
        let total: f32 = probabilities.iter().sum();
        assert!((total - 1.0).abs() < 1e-6);
        assert!(probabilities.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_softmax_handles_large_logits() {
        let probabilities = softmax(&[1000.0, 0.0, 0.0, 0.0, 0.0]);
        assert!((probabilities[0] - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_classify_logits_picks_argmax() {
        let classification = classify_logits(&[0.1, 0.2, 4.0, 0.3, 0.0]).unwrap();
        assert_eq!(classification.label, DiseaseLabel::GreenMottle);
        assert!(classification.confidence > 90.0 && classification.confidence <= 100.0);
    }

    #[test]
    fn test_classify_logits_uniform_scores() {
        let classification = classify_logits(&[0.0; 5]).unwrap();
        assert_eq!(classification.label, DiseaseLabel::BacterialBlight);
        assert!((classification.confidence - 20.0).abs() < 1e-4);
    }

    #[test]
    fn test_classify_logits_is_deterministic() {
        let logits = [0.3, -1.2, 0.8, 2.5, 2.4];
        assert_eq!(
            classify_logits(&logits).unwrap(),
            classify_logits(&logits).unwrap()
        );
    }

    #[test]
    fn test_classify_logits_rejects_wrong_width() {
        assert!(matches!(
            classify_logits(&[0.0; 1000]),
            Err(ClassifierError::Prediction(_))
        ));
        assert!(classify_logits(&[]).is_err());
    }

    #[test]
    fn test_classify_logits_rejects_nan() {
        assert!(classify_logits(&[f32::NAN; 5]).is_err());
    }

    #[test]
    fn test_find_model_file_prefers_configured_path() {
        let dir = tempfile::tempdir().unwrap();
        let configured = dir.path().join("custom.onnx");
        std::fs::write(&configured, b"weights").unwrap();
        std::fs::create_dir_all(dir.path().join("models")).unwrap();
        std::fs::write(dir.path().join("models").join(MODEL_FILE_NAME), b"weights").unwrap();

        let found = find_model_file(&configured, dir.path()).unwrap();
        assert_eq!(found, configured);
    }

    #[test]
    fn test_find_model_file_falls_back_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().join("backend");
        std::fs::create_dir_all(&base).unwrap();
        std::fs::create_dir_all(dir.path().join("models")).unwrap();
        std::fs::write(dir.path().join("models").join(MODEL_FILE_NAME), b"parent").unwrap();
        std::fs::write(base.join(MODEL_FILE_NAME), b"base").unwrap();

        let found = find_model_file(Path::new("missing/model.onnx"), &base).unwrap();
        assert_eq!(found, base.join("..").join("models").join(MODEL_FILE_NAME));
    }

    #[test]
    fn test_find_model_file_resolves_relative_to_base() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("weights")).unwrap();
        std::fs::write(dir.path().join("weights/leaf.onnx"), b"weights").unwrap();

        let found = find_model_file(Path::new("weights/leaf.onnx"), dir.path()).unwrap();
        assert_eq!(found, dir.path().join("weights/leaf.onnx"));
    }

    #[test]
    fn test_find_model_file_reports_every_candidate() {
        let dir = tempfile::tempdir().unwrap();
        match find_model_file(Path::new("nope.onnx"), dir.path()) {
            Err(ClassifierError::ModelFileNotFound { searched }) => assert_eq!(searched.len(), 5),
            other => panic!("expected ModelFileNotFound, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_resolve_name_strips_parallel_prefix() {
        let available = vec!["module.input".to_string(), "module.logits".to_string()];
        assert_eq!(
            resolve_name(&available, Some("logits"), "output").unwrap(),
            "module.logits"
        );
        assert_eq!(
            resolve_name(&available, Some("module.module.input"), "input").unwrap(),
            "module.input"
        );
        assert_eq!(resolve_name(&available, None, "input").unwrap(), "module.input");
        assert!(resolve_name(&available, Some("probs"), "output").is_err());
        assert!(resolve_name(&[], None, "input").is_err());
    }
}
