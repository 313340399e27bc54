// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Core domain types for the Lesewerk OCR engine.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One-based page number within a document.
pub type PageNumber = u32;

/// Unique identifier for a document whose pages are being recognised.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DocumentId(pub Uuid);

impl DocumentId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for DocumentId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for DocumentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Scheduling priority of a page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    /// Jumps ahead of every queued page (e.g. the page currently on screen).
    High,
    /// Appended behind everything already queued.
    Low,
}

/// Lifecycle states of a page inside the scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PageStatus {
    /// Never scheduled, or dropped from the queue before it started.
    Idle,
    /// Waiting in the queue.
    Queued,
    /// Currently running through the pipeline.
    Processing,
    /// Recognised successfully.
    Done,
    /// Failed. Either waiting for its single retry or terminal.
    Error,
}

/// A unit of work for the scheduler.
///
/// Two tasks are equal when they target the same page, regardless of
/// priority or retry count. The queue never holds two equal tasks.
#[derive(Debug, Clone, Copy, Eq, Serialize, Deserialize)]
pub struct OcrTask {
    pub page: PageNumber,
    pub priority: Priority,
    /// Number of failed attempts so far.
    pub retry_count: u32,
}

impl OcrTask {
    pub fn new(page: PageNumber, priority: Priority) -> Self {
        Self {
            page,
            priority,
            retry_count: 0,
        }
    }
}

impl PartialEq for OcrTask {
    fn eq(&self, other: &Self) -> bool {
        self.page == other.page
    }
}

/// Axis-aligned bounding box `(x0, y0)`–`(x1, y1)`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x0: f32,
    pub y0: f32,
    pub x1: f32,
    pub y1: f32,
}

impl BoundingBox {
    pub fn new(x0: f32, y0: f32, x1: f32, y1: f32) -> Self {
        Self { x0, y0, x1, y1 }
    }

    pub fn width(&self) -> f32 {
        (self.x1 - self.x0).max(0.0)
    }

    pub fn height(&self) -> f32 {
        (self.y1 - self.y0).max(0.0)
    }

    pub fn center_x(&self) -> f32 {
        (self.x0 + self.x1) / 2.0
    }

    /// Divide every coordinate by `scale`, mapping render-space pixels back to
    /// page-local units.
    pub fn unscaled(&self, scale: f32) -> Self {
        Self {
            x0: self.x0 / scale,
            y0: self.y0 / scale,
            x1: self.x1 / scale,
            y1: self.y1 / scale,
        }
    }
}

/// Ordered x-coordinates partitioning a page into reading columns.
///
/// Coordinates are in the pixel space of the prepared (deskewed) raster.
/// An empty split list means a single-column page.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ColumnSplit {
    splits: Vec<f32>,
}

impl ColumnSplit {
    /// Build a split list, sorting the coordinates ascending.
    pub fn new(mut splits: Vec<f32>) -> Self {
        splits.sort_by(|a, b| a.total_cmp(b));
        splits.dedup();
        Self { splits }
    }

    pub fn single_column() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.splits.is_empty()
    }

    pub fn len(&self) -> usize {
        self.splits.len()
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.splits
    }

    /// Number of reading columns these splits produce.
    pub fn column_count(&self) -> usize {
        self.splits.len() + 1
    }

    /// Column index for a horizontal position: the number of splits at or
    /// left of `x`.
    pub fn column_of(&self, x: f32) -> usize {
        self.splits.partition_point(|&split| split <= x)
    }
}

/// A raw word hit as reported by the external recogniser, in
/// working-resolution pixel space.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WordHit {
    pub text: String,
    pub confidence: f32,
    pub bbox: BoundingBox,
}

/// A recognised word in page-local (scale-normalised) coordinates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecognizedWord {
    pub text: String,
    pub confidence: f32,
    /// Bounding box divided by the recognition render scale.
    pub bbox: BoundingBox,
    /// Reading column this word belongs to.
    pub column: usize,
}

/// A recognised word whose text may have been upgraded by the correction
/// oracle.
///
/// Only the text is ever replaced. Geometry is fixed at construction, so
/// overlays that index words positionally stay valid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlignedWord {
    text: String,
    confidence: f32,
    bbox: BoundingBox,
    column: usize,
    is_refined: bool,
}

impl AlignedWord {
    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn confidence(&self) -> f32 {
        self.confidence
    }

    pub fn bbox(&self) -> BoundingBox {
        self.bbox
    }

    pub fn column(&self) -> usize {
        self.column
    }

    pub fn is_refined(&self) -> bool {
        self.is_refined
    }

    /// Replace the text with a corrected token and mark the word refined.
    pub fn refine(&mut self, text: impl Into<String>) {
        self.text = text.into();
        self.is_refined = true;
    }
}

impl From<RecognizedWord> for AlignedWord {
    fn from(word: RecognizedWord) -> Self {
        Self {
            text: word.text,
            confidence: word.confidence,
            bbox: word.bbox,
            column: word.column,
            is_refined: false,
        }
    }
}

impl From<&RecognizedWord> for AlignedWord {
    fn from(word: &RecognizedWord) -> Self {
        Self::from(word.clone())
    }
}

/// Classification of errors for retry logic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorClass {
    /// Render/preprocess/recognise hiccup — safe to retry once.
    Transient,
    /// The correction oracle is rate-limited — halt the batch, resume later.
    QuotaExhausted,
    /// Retrying cannot help (bad raster geometry, bad configuration).
    Permanent,
}
