// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Subcommand implementations. Each returns a JSON report for `main` to print.

use std::path::Path;

use lesewerk_core::error::{LesewerkError, Result};
use lesewerk_core::{EngineConfig, RecognizedWord};
use lesewerk_document::layout::TextBands;
use lesewerk_document::{AlignmentEngine, ImagePreprocessor, PageRaster, PreprocessOptions};
use serde_json::{Value, json};
use tracing::{info, instrument};

/// Decode an image file as a raster at scale 1.0.
fn open_raster(path: &Path) -> Result<PageRaster> {
    let image = image::open(path)
        .map_err(|e| LesewerkError::Image(format!("{}: {e}", path.display())))?;
    Ok(PageRaster::from_dynamic(image, 1.0))
}

/// Run the full preprocessing pipeline, optionally writing the cleaned page.
#[instrument(skip_all, fields(input = %input.display()))]
pub fn preprocess(input: &Path, out: Option<&Path>, config: &EngineConfig) -> Result<Value> {
    let raster = open_raster(input)?;
    let prepared = ImagePreprocessor::run(raster, &PreprocessOptions::from(config))?;

    let report = json!({
        "width": prepared.raster.width(),
        "height": prepared.raster.height(),
        "skew_degrees": prepared.skew.angle_degrees,
        "columns": prepared.columns.as_slice(),
        "inverted_tiles": prepared.inverted_tiles,
    });
    info!(
        angle = prepared.skew.angle_degrees,
        splits = ?prepared.columns.as_slice(),
        "page preprocessed"
    );

    if let Some(out) = out {
        prepared
            .raster
            .into_rgba()?
            .save(out)
            .map_err(|e| LesewerkError::Image(format!("{}: {e}", out.display())))?;
        info!(path = %out.display(), "prepared page written");
    }
    Ok(report)
}

/// Detect skew, column gutters, and text bands without binarizing.
#[instrument(skip_all, fields(input = %input.display()))]
pub fn layout(input: &Path, config: &EngineConfig) -> Result<Value> {
    let raster = open_raster(input)?;
    let staged = ImagePreprocessor::from_raster(raster)
        .stretch_contrast()
        .sharpen()
        .deskew(config.skew_max_degrees, config.skew_step_degrees)
        .detect_columns();
    let bands = TextBands::detect(staged.as_luma());

    Ok(json!({
        "skew_degrees": staged.skew().angle_degrees,
        "columns": staged.columns().as_slice(),
        "column_count": staged.columns().column_count(),
        "text_bands": bands.count(),
    }))
}

/// Align a recognised word list (JSON) against a corrected transcription.
/// The output keeps the order of the input list.
#[instrument(skip_all, fields(words = %words_path.display(), text = %text_path.display()))]
pub fn align(words_path: &Path, text_path: &Path, config: &EngineConfig) -> Result<Value> {
    let words: Vec<RecognizedWord> =
        serde_json::from_str(&std::fs::read_to_string(words_path)?)?;
    let corrected = std::fs::read_to_string(text_path)?;

    let aligned = AlignmentEngine::from(config).align(&words, &corrected);
    let refined = aligned.iter().filter(|w| w.is_refined()).count();
    info!(words = aligned.len(), refined, "alignment complete");

    Ok(serde_json::to_value(aligned)?)
}

/// The effective configuration, optionally written to `save_to`.
pub fn config(config: &EngineConfig, save_to: Option<&Path>) -> Result<Value> {
    if let Some(path) = save_to {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        config.save(path)?;
        info!(path = %path.display(), "config saved");
    }
    Ok(serde_json::to_value(config)?)
}

/// Recognise image files as the pages of one document.
#[cfg(feature = "ocr")]
pub async fn ocr(
    images: Vec<std::path::PathBuf>,
    db: &Path,
    config: EngineConfig,
) -> Result<Value> {
    use std::sync::{Arc, Mutex};

    use lesewerk_core::{DocumentId, PageStatus, Priority};
    use lesewerk_engine::{OcrsRecognizer, SqliteWordStore, TaskScheduler};

    use crate::services::image_pages::{CollectedPages, ImagePages};

    let pages = Arc::new(ImagePages::new(images));
    let page_count = pages.page_count();
    let collected = Arc::new(CollectedPages::default());

    let document = DocumentId::new();
    let store = SqliteWordStore::open(db)?;
    let scheduler = TaskScheduler::builder(
        page_count,
        Arc::clone(&pages) as Arc<dyn lesewerk_engine::PageRenderer>,
        Arc::new(OcrsRecognizer::with_defaults()?),
    )
    .config(config)
    .observer(Arc::clone(&collected) as Arc<dyn lesewerk_engine::SchedulerObserver>)
    .store(document, Arc::new(Mutex::new(store)))
    .build()?;
    for page in 1..=page_count {
        scheduler.schedule(page, Priority::Low);
    }
    scheduler.wait_idle().await;
    let statuses = scheduler.statuses();
    scheduler.shutdown().await;

    let failed: Vec<_> = statuses
        .iter()
        .filter(|(_, status)| **status == PageStatus::Error)
        .map(|(page, _)| *page)
        .collect();
    let pages: serde_json::Map<String, Value> = collected
        .take()
        .into_iter()
        .map(|(page, words)| -> Result<(String, Value)> {
            Ok((page.to_string(), serde_json::to_value(words)?))
        })
        .collect::<Result<_>>()?;

    Ok(json!({
        "document": document.to_string(),
        "pages": pages,
        "failed": failed,
    }))
}
