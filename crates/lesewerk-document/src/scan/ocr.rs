// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Local word recognizer built on the `ocrs` crate, a pure-Rust OCR engine
// backed by neural network models executed via `rten`.
//
// # Feature Gate
//
// This module is only available when the `ocr` feature is enabled:
//
// ```toml
// lesewerk-document = { path = "crates/lesewerk-document", features = ["ocr"] }
// ```
//
// # Model Setup
//
// The engine requires two model files, `text-detection.rten` and
// `text-recognition.rten`. Running `ocrs-cli` once downloads them to
// `$XDG_CACHE_HOME/ocrs` (typically `~/.cache/ocrs`), which is where
// `OcrConfig::default()` looks.

use std::path::{Path, PathBuf};

use lesewerk_core::error::{LesewerkError, Result};
use lesewerk_core::{BoundingBox, WordHit};
use ocrs::{ImageSource, OcrEngine as OcrsEngine, OcrEngineParams, TextItem};
use rten::Model;
use rten_imageproc::Rect;
use tracing::{debug, info, instrument};

use crate::raster::PageRaster;

/// Well-known filenames for the detection and recognition models.
const DETECTION_MODEL_FILENAME: &str = "text-detection.rten";
const RECOGNITION_MODEL_FILENAME: &str = "text-recognition.rten";

/// `ocrs` reports no per-word score; every hit carries this confidence.
const DEFAULT_CONFIDENCE: f32 = 1.0;

/// Default directory for cached OCR model files.
///
/// `$XDG_CACHE_HOME/ocrs`, falling back to `~/.cache/ocrs`.
fn default_model_dir() -> PathBuf {
    if let Ok(xdg) = std::env::var("XDG_CACHE_HOME") {
        PathBuf::from(xdg).join("ocrs")
    } else if let Ok(home) = std::env::var("HOME") {
        PathBuf::from(home).join(".cache").join("ocrs")
    } else {
        PathBuf::from("ocrs-models")
    }
}

/// Model locations for an [`OcrEngine`].
#[derive(Debug, Clone)]
pub struct OcrConfig {
    pub detection_model_path: PathBuf,
    pub recognition_model_path: PathBuf,
}

impl Default for OcrConfig {
    fn default() -> Self {
        Self::from_dir(default_model_dir())
    }
}

impl OcrConfig {
    /// Expect both model files inside `dir`.
    pub fn from_dir(dir: impl AsRef<Path>) -> Self {
        let dir = dir.as_ref();
        Self {
            detection_model_path: dir.join(DETECTION_MODEL_FILENAME),
            recognition_model_path: dir.join(RECOGNITION_MODEL_FILENAME),
        }
    }

    /// Verify that both model files exist.
    pub fn validate(&self) -> Result<()> {
        for path in [&self.detection_model_path, &self.recognition_model_path] {
            if !path.exists() {
                return Err(LesewerkError::Config(format!(
                    "OCR model not found at {}; run `ocrs-cli` once to download models",
                    path.display()
                )));
            }
        }
        Ok(())
    }
}

/// Word-level recognizer over prepared page rasters.
///
/// Model loading is the expensive step; construct once and reuse for every
/// page.
pub struct OcrEngine {
    engine: OcrsEngine,
}

impl OcrEngine {
    #[instrument(skip_all, fields(
        detection = %config.detection_model_path.display(),
        recognition = %config.recognition_model_path.display(),
    ))]
    pub fn new(config: OcrConfig) -> Result<Self> {
        config.validate()?;

        info!("Loading OCR models");
        let detection_model = load_model(&config.detection_model_path)?;
        let recognition_model = load_model(&config.recognition_model_path)?;

        let engine = OcrsEngine::new(OcrEngineParams {
            detection_model: Some(detection_model),
            recognition_model: Some(recognition_model),
            ..Default::default()
        })
        .map_err(|err| LesewerkError::Config(format!("failed to initialise OCR engine: {err}")))?;

        info!("OCR engine initialised");
        Ok(Self { engine })
    }

    pub fn with_defaults() -> Result<Self> {
        Self::new(OcrConfig::default())
    }

    /// Detect, group, and read every word on the page.
    ///
    /// Bounding boxes are reported in the raster's own pixel space; callers
    /// divide by the render scale afterwards.
    #[instrument(skip_all, fields(width = raster.width(), height = raster.height()))]
    pub fn recognize_words(&self, raster: &PageRaster) -> Result<Vec<WordHit>> {
        let source = ImageSource::from_bytes(raster.pixels(), (raster.width(), raster.height()))
            .map_err(|err| LesewerkError::Recognition(format!("bad image source: {err}")))?;

        let input = self
            .engine
            .prepare_input(source)
            .map_err(|err| LesewerkError::Recognition(format!("input preparation failed: {err}")))?;

        let word_rects = self
            .engine
            .detect_words(&input)
            .map_err(|err| LesewerkError::Recognition(format!("word detection failed: {err}")))?;
        let line_rects = self.engine.find_text_lines(&input, &word_rects);
        debug!(
            words = word_rects.len(),
            lines = line_rects.len(),
            "Text regions detected"
        );

        let lines = self
            .engine
            .recognize_text(&input, &line_rects)
            .map_err(|err| LesewerkError::Recognition(format!("line recognition failed: {err}")))?;

        let hits: Vec<WordHit> = lines
            .iter()
            .flatten()
            .flat_map(|line| line.words())
            .filter_map(|word| {
                let text = word.to_string();
                if text.trim().is_empty() {
                    return None;
                }
                Some(WordHit {
                    text,
                    confidence: DEFAULT_CONFIDENCE,
                    bbox: to_bbox(word.bounding_rect()),
                })
            })
            .collect();

        info!(words = hits.len(), "Recognition complete");
        Ok(hits)
    }
}

fn load_model(path: &Path) -> Result<Model> {
    Model::load_file(path).map_err(|err| {
        LesewerkError::Config(format!("failed to load model {}: {err}", path.display()))
    })
}

fn to_bbox(rect: Rect) -> BoundingBox {
    BoundingBox::new(
        rect.left() as f32,
        rect.top() as f32,
        rect.right() as f32,
        rect.bottom() as f32,
    )
}

/// Whether both models are present in the default cache location.
pub fn models_available() -> bool {
    OcrConfig::default().validate().is_ok()
}
