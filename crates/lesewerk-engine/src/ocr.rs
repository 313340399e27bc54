// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// `TextRecognizer` backed by the on-device ocrs engine.

use std::sync::Arc;

use async_trait::async_trait;
use lesewerk_core::WordHit;
use lesewerk_core::error::{LesewerkError, Result};
use lesewerk_document::{OcrEngine, PageRaster};
use tracing::instrument;

use crate::traits::TextRecognizer;

/// Runs ocrs inference on Tokio's blocking pool.
#[derive(Clone)]
pub struct OcrsRecognizer {
    engine: Arc<OcrEngine>,
}

impl OcrsRecognizer {
    pub fn new(engine: OcrEngine) -> Self {
        Self {
            engine: Arc::new(engine),
        }
    }

    /// Load the models from the default model directory.
    pub fn with_defaults() -> Result<Self> {
        Ok(Self::new(OcrEngine::with_defaults()?))
    }
}

#[async_trait]
impl TextRecognizer for OcrsRecognizer {
    #[instrument(skip_all, fields(width = raster.width(), height = raster.height()))]
    async fn recognize(&self, raster: PageRaster) -> Result<Vec<WordHit>> {
        let engine = Arc::clone(&self.engine);
        tokio::task::spawn_blocking(move || engine.recognize_words(&raster))
            .await
            .map_err(|e| LesewerkError::Recognition(format!("recognition task: {e}")))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lesewerk_document::scan::ocr::models_available;

    #[tokio::test]
    async fn blank_page_has_no_words() {
        if !models_available() {
            return;
        }
        let recognizer = OcrsRecognizer::with_defaults().expect("models");
        let gray = image::GrayImage::from_pixel(200, 100, image::Luma([255u8]));
        let words = recognizer
            .recognize(PageRaster::from_luma(&gray, 1.0))
            .await
            .expect("recognize");
        assert!(words.is_empty());
    }
}
