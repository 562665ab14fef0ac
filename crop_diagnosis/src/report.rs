use crate::{config::ReportConfig, image_utils::to_rgb};
use base64::Engine;
use image::{codecs::jpeg::JpegEncoder, imageops::FilterType, DynamicImage, RgbImage};
use printpdf::{
    image_crate::codecs::jpeg::JpegDecoder, BuiltinFont, Image, ImageTransform, IndirectFontRef,
    Mm, PdfDocument, PdfDocumentReference, PdfLayerReference,
};
use std::{
    fs::File,
    io::{BufReader, BufWriter, Write},
    path::{Path, PathBuf},
};
use thiserror::Error;

const REPORT_TITLE: &str = "Crop Disease Diagnosis Report";
const PAGE_WIDTH: f32 = 210.0;
const PAGE_HEIGHT: f32 = 297.0;
const MARGIN: f32 = 20.0;
const TOP: f32 = 280.0;
const IMAGE_DISPLAY_WIDTH: f32 = 150.0;
const MAX_IMAGE_DISPLAY_HEIGHT: f32 = 120.0;
const WRAP_CHARS: usize = 85;
const JPEG_QUALITY: u8 = 95;
const PT_TO_MM: f32 = 0.3528;

#[derive(Error, Debug)]
pub enum ReportError {
    #[error("invalid report input: {0}")]
    InvalidInput(String),
    #[error("{0}")]
    Generation(String),
    #[error("temporary file error: {0}")]
    Io(#[from] std::io::Error),
}

/// Base64 transport encoding of a rendered PDF.
pub fn encode_pdf(pdf: &[u8]) -> String {
    base64::engine::general_purpose::STANDARD.encode(pdf)
}

fn validate_inputs(disease: &str, confidence: f64) -> Result<(), ReportError> {
    if disease.trim().is_empty() {
        return Err(ReportError::InvalidInput("disease name is empty".to_string()));
    }
    if !confidence.is_finite() || !(0.0..=100.0).contains(&confidence) {
        return Err(ReportError::InvalidInput(format!(
            "confidence must be a number between 0 and 100, got {}",
            confidence
        )));
    }
    Ok(())
}

/// One paragraph per non-blank line; carriage returns end lines, tabs
/// become four spaces.
fn paragraphs(recommendation: &str) -> Vec<String> {
    let cleaned = recommendation.replace('\r', "\n").replace('\t', "    ");
    let paragraphs: Vec<String> = cleaned
        .split('\n')
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(String::from)
        .collect();

    if paragraphs.is_empty() {
        vec!["No specific recommendations available.".to_string()]
    } else {
        paragraphs
    }
}

fn wrap_text(text: &str, max_chars: usize) -> Vec<String> {
    let mut lines = Vec::new();
    let mut current = String::new();

    let max_chars = max_chars.max(1);

    // Words wider than a line (URLs, mostly) are hard-broken.
    let pieces = text.split_whitespace().flat_map(|word| {
        let word: Vec<char> = word.chars().collect();
        word.chunks(max_chars)
            .map(|chunk| chunk.iter().collect::<String>())
            .collect::<Vec<_>>()
    });

    for piece in pieces {
        if !current.is_empty() && current.chars().count() + piece.chars().count() + 1 > max_chars {
            lines.push(std::mem::take(&mut current));
        }
        if !current.is_empty() {
            current.push(' ');
        }
        current.push_str(&piece);
    }
    if !current.is_empty() {
        lines.push(current);
    }
    lines
}

fn write_jpeg(image: &RgbImage, file: &File) -> Result<(), ReportError> {
    let mut writer = BufWriter::new(file);
    JpegEncoder::new_with_quality(&mut writer, JPEG_QUALITY)
        .encode_image(image)
        .map_err(|e| ReportError::Generation(format!("failed to stage image: {}", e)))?;
    writer.flush()?;
    Ok(())
}

fn pdf_error(e: impl std::fmt::Display) -> ReportError {
    ReportError::Generation(format!("PDF error: {}", e))
}

/// Cursor over the pages of a report being drawn top to bottom.
struct PageWriter {
    doc: PdfDocumentReference,
    layer: PdfLayerReference,
    regular: IndirectFontRef,
    bold: IndirectFontRef,
    y: f32,
}

impl PageWriter {
    fn new(title: &str) -> Result<Self, ReportError> {
        let (doc, page, layer) =
            PdfDocument::new(title, Mm(PAGE_WIDTH), Mm(PAGE_HEIGHT), "Layer 1");
        let layer = doc.get_page(page).get_layer(layer);
        let regular = doc
            .add_builtin_font(BuiltinFont::Helvetica)
            .map_err(pdf_error)?;
        let bold = doc
            .add_builtin_font(BuiltinFont::HelveticaBold)
            .map_err(pdf_error)?;

        Ok(Self {
            doc,
            layer,
            regular,
            bold,
            y: TOP,
        })
    }

    fn ensure_space(&mut self, height: f32) {
        if self.y - height < MARGIN {
            let (page, layer) = self
                .doc
                .add_page(Mm(PAGE_WIDTH), Mm(PAGE_HEIGHT), "Layer 1");
            self.layer = self.doc.get_page(page).get_layer(layer);
            self.y = TOP;
        }
    }

    fn text(&mut self, text: &str, size: f32, bold: bool, centered: bool) {
        let line_height = size * PT_TO_MM * 1.6;
        self.ensure_space(line_height);

        let x = if centered {
            // Helvetica averages roughly half an em per glyph.
            let width = text.chars().count() as f32 * size * 0.5 * PT_TO_MM;
            ((PAGE_WIDTH - width) / 2.0).max(MARGIN)
        } else {
            MARGIN
        };
        let font = if bold { &self.bold } else { &self.regular };
        self.layer.use_text(text, size, Mm(x), Mm(self.y), font);
        self.y -= line_height;
    }

    fn gap(&mut self, height: f32) {
        self.y -= height;
    }

    fn image(&mut self, staged: &Path, width_px: u32, height_px: u32) -> Result<(), ReportError> {
        let file = File::open(staged)?;
        let decoder = JpegDecoder::new(BufReader::new(file)).map_err(pdf_error)?;
        let image = Image::try_from(decoder).map_err(pdf_error)?;

        let aspect = width_px as f32 / height_px.max(1) as f32;
        let mut width = IMAGE_DISPLAY_WIDTH;
        let mut height = width / aspect;
        if height > MAX_IMAGE_DISPLAY_HEIGHT {
            height = MAX_IMAGE_DISPLAY_HEIGHT;
            width = height * aspect;
        }

        self.ensure_space(height);
        let bottom = self.y - height;
        image.add_to_layer(
            self.layer.clone(),
            ImageTransform {
                translate_x: Some(Mm((PAGE_WIDTH - width) / 2.0)),
                translate_y: Some(Mm(bottom)),
                dpi: Some(width_px as f32 * 25.4 / width),
                ..Default::default()
            },
        );
        self.y = bottom - 10.0;
        Ok(())
    }

    fn finish(self) -> Result<Vec<u8>, ReportError> {
        let mut buf = BufWriter::new(Vec::new());
        self.doc.save(&mut buf).map_err(pdf_error)?;
        buf.into_inner().map_err(pdf_error)
    }
}

pub struct ReportRenderer {
    temp_dir: PathBuf,
    max_image_size: u32,
}

impl ReportRenderer {
    pub fn new(config: &ReportConfig) -> Self {
        Self {
            temp_dir: config.temp_dir.clone(),
            max_image_size: config.max_image_size.max(1),
        }
    }

    /// Renders the report and returns it base64-encoded.
    pub fn render(
        &self,
        image: &DynamicImage,
        disease: &str,
        confidence: f64,
        recommendation: &str,
    ) -> Result<String, ReportError> {
        let pdf = self.render_pdf(image, disease, confidence, recommendation)?;
        let encoded = encode_pdf(&pdf);

        if encoded.len() < 100 {
            tracing::warn!("Generated PDF is suspiciously small ({} bytes)", encoded.len());
        } else {
            tracing::info!("PDF generated successfully ({} bytes)", encoded.len());
        }
        Ok(encoded)
    }

    pub fn render_pdf(
        &self,
        image: &DynamicImage,
        disease: &str,
        confidence: f64,
        recommendation: &str,
    ) -> Result<Vec<u8>, ReportError> {
        validate_inputs(disease, confidence)?;
        let normalized = self.normalize_image(image);

        self.with_staged_image(&normalized, |staged| {
            let mut writer = PageWriter::new(REPORT_TITLE)?;

            writer.text(REPORT_TITLE, 16.0, true, true);
            let generated = chrono::Local::now().format("%Y-%m-%d %H:%M");
            writer.text(&format!("Generated: {}", generated), 12.0, false, true);
            writer.gap(10.0);

            if let Err(e) = writer.image(staged, normalized.width(), normalized.height()) {
                tracing::error!("Error adding image to report: {}", e);
                writer.text("Image not available", 12.0, false, false);
            }

            writer.text("Diagnosis:", 14.0, true, false);
            writer.text(&format!("Disease: {}", disease), 12.0, false, false);
            writer.text(&format!("Confidence: {:.1}%", confidence), 12.0, false, false);
            writer.gap(10.0);

            writer.text("Recommendations:", 14.0, true, false);
            for paragraph in paragraphs(recommendation) {
                for line in wrap_text(&paragraph, WRAP_CHARS) {
                    writer.text(&line, 11.0, false, false);
                }
                writer.gap(2.0);
            }

            writer.finish()
        })
    }

    fn normalize_image(&self, image: &DynamicImage) -> RgbImage {
        let rgb = to_rgb(image);
        let (width, height) = rgb.dimensions();
        let max = self.max_image_size;
        if width <= max && height <= max {
            return rgb;
        }

        let ratio = (max as f32 / width as f32).min(max as f32 / height as f32);
        let new_width = ((width as f32 * ratio) as u32).clamp(1, max);
        let new_height = ((height as f32 * ratio) as u32).clamp(1, max);
        image::imageops::resize(&rgb, new_width, new_height, FilterType::Lanczos3)
    }

    /// Writes `image` to a JPEG in the temp root and hands its path to
    /// `render`. The file is removed on every path out of this function.
    fn with_staged_image<T>(
        &self,
        image: &RgbImage,
        render: impl FnOnce(&Path) -> Result<T, ReportError>,
    ) -> Result<T, ReportError> {
        std::fs::create_dir_all(&self.temp_dir)?;
        let staged = tempfile::Builder::new()
            .prefix("leaf_")
            .suffix(".jpg")
            .tempfile_in(&self.temp_dir)?;
        let path = staged.path().to_path_buf();
        tracing::debug!(path = %path.display(), "Staged report image");

        let result = write_jpeg(image, staged.as_file()).and_then(|()| render(&path));

        match staged.close() {
            Ok(()) => tracing::debug!(path = %path.display(), "Cleaned up temporary file"),
            Err(e) => tracing::warn!(
                path = %path.display(),
                "Could not clean up temporary file: {}",
                e
            ),
        }

        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recommendation::HEALTHY_TEMPLATE;
    use image::{ImageBuffer, Rgb, Rgba};

    fn renderer(dir: &Path) -> ReportRenderer {
        ReportRenderer::new(&ReportConfig {
            temp_dir: dir.to_path_buf(),
            max_image_size: 1000,
        })
    }

    fn leaf(width: u32, height: u32) -> DynamicImage {
        DynamicImage::ImageRgb8(ImageBuffer::from_pixel(width, height, Rgb([30, 160, 40])))
    }

    fn dir_is_empty(dir: &Path) -> bool {
        std::fs::read_dir(dir).unwrap().next().is_none()
    }

    #[test]
    fn renders_pdf_and_cleans_up() {
        let dir = tempfile::tempdir().unwrap();
        let pdf = renderer(dir.path())
            .render_pdf(&leaf(64, 48), "Healthy", 97.25, HEALTHY_TEMPLATE)
            .unwrap();

        assert!(pdf.starts_with(b"%PDF"));
        assert!(dir_is_empty(dir.path()));
    }

    #[test]
    fn base64_round_trip_is_byte_identical() {
        let dir = tempfile::tempdir().unwrap();
        let pdf = renderer(dir.path())
            .render_pdf(&leaf(32, 32), "Cassava Mosaic Disease (CMD)", 55.0, "- rogue plants")
            .unwrap();

        let decoded = base64::engine::general_purpose::STANDARD
            .decode(encode_pdf(&pdf))
            .unwrap();
        assert_eq!(decoded, pdf);
    }

    #[test]
    fn render_returns_base64_of_a_pdf() {
        let dir = tempfile::tempdir().unwrap();
        let rgba = DynamicImage::ImageRgba8(ImageBuffer::from_pixel(20, 40, Rgba([1, 2, 3, 4])));
        let encoded = renderer(dir.path())
            .render(&rgba, "Healthy", 100.0, "")
            .unwrap();

        let decoded = base64::engine::general_purpose::STANDARD
            .decode(encoded)
            .unwrap();
        assert!(decoded.starts_with(b"%PDF"));
        assert!(dir_is_empty(dir.path()));
    }

    #[test]
    fn long_recommendations_continue_on_new_pages() {
        let dir = tempfile::tempdir().unwrap();
        let recommendation = (0..120)
            .map(|i| format!("- step {} keeps the field clean and the plants well spaced", i))
            .collect::<Vec<_>>()
            .join("\n");
        let pdf = renderer(dir.path())
            .render_pdf(&leaf(400, 800), "Healthy", 88.0, &recommendation)
            .unwrap();

        assert!(pdf.starts_with(b"%PDF"));
        assert!(dir_is_empty(dir.path()));
    }

    #[test]
    fn rejects_out_of_range_confidence() {
        let dir = tempfile::tempdir().unwrap();
        let renderer = renderer(dir.path());
        for confidence in [-0.1, 100.5, f64::NAN, f64::INFINITY] {
            assert!(matches!(
                renderer.render_pdf(&leaf(8, 8), "Healthy", confidence, "x"),
                Err(ReportError::InvalidInput(_))
            ));
        }
        assert!(dir_is_empty(dir.path()));
    }

    #[test]
    fn rejects_blank_disease() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            renderer(dir.path()).render_pdf(&leaf(8, 8), "  ", 50.0, "x"),
            Err(ReportError::InvalidInput(_))
        ));
    }

    #[test]
    fn staged_file_is_removed_when_rendering_fails() {
        let dir = tempfile::tempdir().unwrap();
        let renderer = renderer(dir.path());
        let mut seen = None;

        let result: Result<(), ReportError> =
            renderer.with_staged_image(&RgbImage::new(4, 4), |staged| {
                assert!(staged.exists());
                seen = Some(staged.to_path_buf());
                Err(ReportError::Generation("simulated failure".to_string()))
            });

        assert!(result.is_err());
        assert!(!seen.unwrap().exists());
        assert!(dir_is_empty(dir.path()));
    }

    #[test]
    fn unusable_temp_root_is_an_error() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let renderer = renderer(file.path());

        assert!(matches!(
            renderer.render_pdf(&leaf(8, 8), "Healthy", 50.0, "x"),
            Err(ReportError::Io(_))
        ));
    }

    #[test]
    fn creates_missing_temp_root() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("scratch").join("reports");
        renderer(&nested)
            .render_pdf(&leaf(8, 8), "Healthy", 50.0, "x")
            .unwrap();
        assert!(dir_is_empty(&nested));
    }

    #[test]
    fn downsizes_large_images_preserving_aspect() {
        let dir = tempfile::tempdir().unwrap();
        let renderer = renderer(dir.path());

        assert_eq!(renderer.normalize_image(&leaf(2000, 500)).dimensions(), (1000, 250));
        assert_eq!(renderer.normalize_image(&leaf(300, 1500)).dimensions(), (200, 1000));
        assert_eq!(renderer.normalize_image(&leaf(640, 480)).dimensions(), (640, 480));
    }

    #[test]
    fn splits_recommendation_into_paragraphs() {
        assert_eq!(
            paragraphs("- water\r\n\n  - weed \t\n\t- scout"),
            vec!["- water", "- weed", "- scout"]
        );
        assert_eq!(
            paragraphs(" \n "),
            vec!["No specific recommendations available."]
        );
    }

    #[test]
    fn wraps_long_lines_on_word_boundaries() {
        let lines = wrap_text("aaa bbb ccc ddd", 7);
        assert_eq!(lines, vec!["aaa bbb", "ccc ddd"]);
        assert!(wrap_text("", 10).is_empty());
    }

    #[test]
    fn hard_breaks_words_wider_than_a_line() {
        let url = format!("https://example.org/{}", "x".repeat(200));
        let lines = wrap_text(&format!("see {} now", url), WRAP_CHARS);

        assert!(lines.iter().all(|line| line.chars().count() <= WRAP_CHARS));
        assert_eq!(lines[0], "see");
        assert!(lines.last().unwrap().ends_with(" now"));
        let rejoined: String = lines.concat().replace(' ', "");
        assert_eq!(rejoined, format!("see{}now", url));
    }
}
