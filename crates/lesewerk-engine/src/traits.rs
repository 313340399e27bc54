// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Seams to the external collaborators of the engine: page rendering, text
// recognition, transcription correction, persistence, and status reporting.

use std::collections::BTreeMap;

use async_trait::async_trait;
use lesewerk_core::error::Result;
use lesewerk_core::{AlignedWord, DocumentId, PageNumber, PageStatus, RecognizedWord, WordHit};
use lesewerk_document::PageRaster;

/// Produces a raster of one page at the requested scale.
#[async_trait]
pub trait PageRenderer: Send + Sync {
    async fn render(&self, page: PageNumber, scale: f32) -> Result<PageRaster>;
}

/// Reads words off a prepared raster.
///
/// The raster is handed over by value; bounding boxes are reported in its
/// pixel space.
#[async_trait]
pub trait TextRecognizer: Send + Sync {
    async fn recognize(&self, raster: PageRaster) -> Result<Vec<WordHit>>;
}

/// External service producing a cleaner transcription of a page.
///
/// Implementations return `LesewerkError::QuotaExceeded` when rate-limited;
/// every other error is treated as a one-off miss.
#[async_trait]
pub trait CorrectionOracle: Send + Sync {
    async fn correct(&self, page: PageNumber, words: &[RecognizedWord]) -> Result<String>;
}

/// Recognised words keyed by document and page.
///
/// Implementations are synchronous; the scheduler calls them from a
/// blocking task.
pub trait WordStore: Send {
    fn load(&self, document: DocumentId, page: PageNumber) -> Result<Option<Vec<RecognizedWord>>>;

    fn save(&self, document: DocumentId, page: PageNumber, words: &[RecognizedWord]) -> Result<()>;

    /// Pages with stored words, ascending.
    fn pages(&self, document: DocumentId) -> Result<Vec<PageNumber>>;
}

/// Callbacks fired by the scheduler. Every method defaults to a no-op.
///
/// Callbacks run on the scheduler's task and must not block.
pub trait SchedulerObserver: Send + Sync {
    /// Full page→status map, recomputed after every transition.
    fn on_status_change(&self, _statuses: &BTreeMap<PageNumber, PageStatus>) {}

    /// Fired once per successfully completed page.
    fn on_page_complete(&self, _page: PageNumber, _words: &[AlignedWord]) {}

    /// Fired after each successful page, once its words are persisted.
    fn on_checkpoint(&self, _page: PageNumber) {}

    /// The correction oracle is rate-limited; refinement stops until resumed.
    fn on_quota_exceeded(&self, _last_good_page: Option<PageNumber>) {}
}

/// Observer that ignores every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl SchedulerObserver for NoopObserver {}
