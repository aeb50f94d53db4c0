// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Neural OCR backend built on `ocrs`, with models executed via `rten`.
//
// # Model Setup
//
// The engine needs two model files in one directory:
//
// - `text-detection.rten`: locates words in the image.
// - `text-recognition.rten`: decodes characters from detected lines.
//
// Running `ocrs-cli` once downloads both into `$XDG_CACHE_HOME/ocrs`
// (typically `~/.cache/ocrs`), which is where the factory looks by default.
//
// `ocrs` reports no per-character confidence, so confidence is estimated from
// how plausible the recognized characters are for label text, and every
// result carries the `confidence_estimated` warning.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use image::DynamicImage;
use labelscan_core::error::{Result, ScanError};
use labelscan_core::types::{BoundingBox, OcrWord, RecognitionMode};
use ocrs::{ImageSource, OcrEngine, OcrEngineParams};
use rten::Model;
use tracing::{debug, info, instrument, warn};

use super::backend::{RawRecognition, RecognizerFactory, TextRecognizer};

const DETECTION_MODEL_FILENAME: &str = "text-detection.rten";
const RECOGNITION_MODEL_FILENAME: &str = "text-recognition.rten";

/// Warning attached to every result from this backend.
pub const WARNING_CONFIDENCE_ESTIMATED: &str = "confidence_estimated";

/// `$XDG_CACHE_HOME/ocrs`, falling back to `~/.cache/ocrs`.
pub fn default_model_dir() -> PathBuf {
    if let Ok(xdg) = std::env::var("XDG_CACHE_HOME") {
        PathBuf::from(xdg).join("ocrs")
    } else if let Ok(home) = std::env::var("HOME") {
        PathBuf::from(home).join(".cache").join("ocrs")
    } else {
        PathBuf::from("ocrs-models")
    }
}

/// Locations of the two model files.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelPaths {
    pub detection: PathBuf,
    pub recognition: PathBuf,
}

impl ModelPaths {
    pub fn from_dir(dir: impl AsRef<Path>) -> Self {
        let dir = dir.as_ref();
        Self {
            detection: dir.join(DETECTION_MODEL_FILENAME),
            recognition: dir.join(RECOGNITION_MODEL_FILENAME),
        }
    }

    pub fn validate(&self) -> Result<()> {
        for path in [&self.detection, &self.recognition] {
            if !path.exists() {
                return Err(ScanError::Recognition(format!(
                    "OCR model not found at {}; run `ocrs-cli` once to download models",
                    path.display()
                )));
            }
        }
        Ok(())
    }
}

impl Default for ModelPaths {
    fn default() -> Self {
        Self::from_dir(default_model_dir())
    }
}

/// Builds one `ocrs` engine per pooled worker.
#[derive(Debug, Clone, Default)]
pub struct OcrsFactory {
    paths: ModelPaths,
}

impl OcrsFactory {
    pub fn new(paths: ModelPaths) -> Self {
        Self { paths }
    }
}

#[async_trait]
impl RecognizerFactory for OcrsFactory {
    #[instrument(skip(self))]
    async fn create(&self, language: &str) -> Result<Arc<dyn TextRecognizer>> {
        if language != "eng" {
            warn!(language, "ocrs models are Latin-script only; using them anyway");
        }
        let paths = self.paths.clone();
        let engine = tokio::task::spawn_blocking(move || load_engine(&paths))
            .await
            .map_err(|err| ScanError::Recognition(format!("model loading task failed: {err}")))??;
        Ok(Arc::new(OcrsRecognizer {
            engine: Arc::new(engine),
        }))
    }
}

fn load_engine(paths: &ModelPaths) -> Result<OcrEngine> {
    paths.validate()?;

    info!(path = %paths.detection.display(), "Loading OCR detection model");
    let detection_model = Model::load_file(&paths.detection).map_err(|err| {
        ScanError::Recognition(format!(
            "failed to load detection model from {}: {err}",
            paths.detection.display()
        ))
    })?;

    info!(path = %paths.recognition.display(), "Loading OCR recognition model");
    let recognition_model = Model::load_file(&paths.recognition).map_err(|err| {
        ScanError::Recognition(format!(
            "failed to load recognition model from {}: {err}",
            paths.recognition.display()
        ))
    })?;

    OcrEngine::new(OcrEngineParams {
        detection_model: Some(detection_model),
        recognition_model: Some(recognition_model),
        ..Default::default()
    })
    .map_err(|err| ScanError::Recognition(format!("failed to initialise OCR engine: {err}")))
}

/// One loaded `ocrs` engine.
pub struct OcrsRecognizer {
    engine: Arc<OcrEngine>,
}

#[async_trait]
impl TextRecognizer for OcrsRecognizer {
    async fn recognize(
        &self,
        image: Arc<DynamicImage>,
        mode: RecognitionMode,
    ) -> Result<RawRecognition> {
        let engine = Arc::clone(&self.engine);
        tokio::task::spawn_blocking(move || run_layout(&engine, &image, mode))
            .await
            .map_err(|err| ScanError::Recognition(format!("recognition task failed: {err}")))?
    }
}

fn run_layout(engine: &OcrEngine, image: &DynamicImage, mode: RecognitionMode) -> Result<RawRecognition> {
    let rgb = image.to_rgb8();
    let (width, height) = rgb.dimensions();
    let source = ImageSource::from_bytes(rgb.as_raw(), (width, height)).map_err(|err| {
        ScanError::Recognition(format!("failed to create image source ({width}x{height}): {err}"))
    })?;
    let input = engine
        .prepare_input(source)
        .map_err(|err| ScanError::Recognition(format!("OCR preprocessing failed: {err}")))?;

    let word_rects = engine
        .detect_words(&input)
        .map_err(|err| ScanError::Recognition(format!("word detection failed: {err}")))?;
    let mut line_rects = engine.find_text_lines(&input, &word_rects);
    if mode == RecognitionMode::SingleLine && line_rects.len() > 1 {
        // Keep the line with the most words.
        line_rects.sort_by_key(|l| std::cmp::Reverse(l.len()));
        line_rects.truncate(1);
    }
    let lines = engine
        .recognize_text(&input, &line_rects)
        .map_err(|err| ScanError::Recognition(format!("line recognition failed: {err}")))?;

    let mut text_lines = Vec::new();
    let mut words = Vec::new();
    for (line, rects) in lines.iter().zip(&line_rects) {
        let Some(line) = line else { continue };
        let text = line.to_string();
        if text.trim().is_empty() {
            continue;
        }
        let boxes: Vec<BoundingBox> = rects
            .iter()
            .map(|r| {
                let b = r.bounding_rect();
                BoundingBox {
                    x: b.left().max(0.0) as u32,
                    y: b.top().max(0.0) as u32,
                    width: b.width().max(0.0) as u32,
                    height: b.height().max(0.0) as u32,
                }
            })
            .collect();
        let tokens: Vec<&str> = text.split_whitespace().collect();
        if tokens.len() == boxes.len() {
            for (token, bbox) in tokens.iter().zip(boxes) {
                words.push(OcrWord {
                    text: token.to_string(),
                    confidence: estimate_confidence(token),
                    bbox,
                });
            }
        } else {
            words.push(OcrWord {
                text: text.clone(),
                confidence: estimate_confidence(&text),
                bbox: union(&boxes),
            });
        }
        text_lines.push(text);
    }

    let separator = if mode == RecognitionMode::SparseText { " " } else { "\n" };
    let text = text_lines.join(separator);
    let confidence = estimate_confidence(&text);
    debug!(lines = text_lines.len(), words = words.len(), confidence, "ocrs layout recognized");

    Ok(RawRecognition {
        text,
        confidence,
        words,
        warnings: vec![WARNING_CONFIDENCE_ESTIMATED.to_string()],
    })
}

fn union(boxes: &[BoundingBox]) -> BoundingBox {
    let Some(first) = boxes.first() else {
        return BoundingBox::default();
    };
    let (mut x0, mut y0) = (first.x, first.y);
    let (mut x1, mut y1) = (first.x + first.width, first.y + first.height);
    for b in &boxes[1..] {
        x0 = x0.min(b.x);
        y0 = y0.min(b.y);
        x1 = x1.max(b.x + b.width);
        y1 = y1.max(b.y + b.height);
    }
    BoundingBox {
        x: x0,
        y: y0,
        width: x1 - x0,
        height: y1 - y0,
    }
}

/// Share of characters that are plausible on a supplement label, scaled so
/// that clean text lands just above the default acceptance threshold.
/// Very short reads are penalised.
pub fn estimate_confidence(text: &str) -> f32 {
    let chars: Vec<char> = text.chars().filter(|c| !c.is_whitespace()).collect();
    if chars.is_empty() {
        return 0.0;
    }
    let plausible = chars
        .iter()
        .filter(|c| c.is_alphanumeric() || "%.,:;-+/()&'μµ".contains(**c))
        .count();
    let share = plausible as f32 / chars.len() as f32;
    let length_factor = if chars.len() < 3 { 0.5 } else { 1.0 };
    (share * 0.9 * length_factor).clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn model_paths_from_dir() {
        let paths = ModelPaths::from_dir("/tmp/my-models");
        assert_eq!(paths.detection, PathBuf::from("/tmp/my-models/text-detection.rten"));
        assert_eq!(paths.recognition, PathBuf::from("/tmp/my-models/text-recognition.rten"));
    }

    #[test]
    fn missing_models_fail_validation() {
        assert!(ModelPaths::from_dir("/nonexistent/ocr-models").validate().is_err());
    }

    #[test]
    fn clean_label_text_clears_threshold() {
        assert!(estimate_confidence("Magnesium Citrate 200 mg") > 0.8);
        assert!(estimate_confidence("#~{}|^") < 0.2);
        assert!(estimate_confidence("Zn") < 0.5);
        assert_eq!(estimate_confidence("   "), 0.0);
    }
}
