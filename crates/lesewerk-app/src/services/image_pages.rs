// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Image files as document pages, and an observer that collects results for
// the `ocr` command.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Mutex;

use async_trait::async_trait;
use image::imageops::FilterType;
use lesewerk_core::error::{LesewerkError, Result};
use lesewerk_core::{AlignedWord, PageNumber, PageStatus};
use lesewerk_document::PageRaster;
use lesewerk_engine::{PageRenderer, SchedulerObserver};
use tracing::{debug, info, instrument, warn};

/// Renders page N by decoding the Nth image file.
pub struct ImagePages {
    paths: Vec<PathBuf>,
}

impl ImagePages {
    pub fn new(paths: Vec<PathBuf>) -> Self {
        Self { paths }
    }

    pub fn page_count(&self) -> PageNumber {
        self.paths.len() as PageNumber
    }
}

#[async_trait]
impl PageRenderer for ImagePages {
    #[instrument(skip(self))]
    async fn render(&self, page: PageNumber, scale: f32) -> Result<PageRaster> {
        let path = page
            .checked_sub(1)
            .and_then(|index| self.paths.get(index as usize))
            .cloned()
            .ok_or_else(|| LesewerkError::InvalidRaster(format!("no image for page {page}")))?;

        tokio::task::spawn_blocking(move || {
            let image = image::open(&path)
                .map_err(|e| LesewerkError::Render(format!("{}: {e}", path.display())))?;
            let image = if (scale - 1.0).abs() > f32::EPSILON {
                let width = ((image.width() as f32 * scale).round() as u32).max(1);
                let height = ((image.height() as f32 * scale).round() as u32).max(1);
                image.resize_exact(width, height, FilterType::Triangle)
            } else {
                image
            };
            debug!(width = image.width(), height = image.height(), "image decoded");
            Ok(PageRaster::from_dynamic(image, scale))
        })
        .await
        .map_err(|e| LesewerkError::Render(format!("decode task: {e}")))?
    }
}

/// Keeps the aligned words of every completed page.
#[derive(Default)]
pub struct CollectedPages {
    pages: Mutex<BTreeMap<PageNumber, Vec<AlignedWord>>>,
}

impl CollectedPages {
    pub fn take(&self) -> BTreeMap<PageNumber, Vec<AlignedWord>> {
        std::mem::take(&mut *self.pages.lock().expect("collected pages lock poisoned"))
    }
}

impl SchedulerObserver for CollectedPages {
    fn on_status_change(&self, statuses: &BTreeMap<PageNumber, PageStatus>) {
        let done = statuses.values().filter(|s| **s == PageStatus::Done).count();
        debug!(done, total = statuses.len(), "progress");
    }

    fn on_page_complete(&self, page: PageNumber, words: &[AlignedWord]) {
        info!(page, words = words.len(), "page recognised");
        self.pages
            .lock()
            .expect("collected pages lock poisoned")
            .insert(page, words.to_vec());
    }

    fn on_quota_exceeded(&self, last_good_page: Option<PageNumber>) {
        warn!(?last_good_page, "correction quota exceeded");
    }
}
