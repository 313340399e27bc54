// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// lesewerk-document — Page-level image and text processing for Lesewerk.
//
// Provides the owned page raster, the preprocessing pipeline (contrast,
// sharpening, deskew, tiled binarization, morphology), layout analysis
// (skew, column gutters, text bands), word geometry mapping, and alignment
// of corrected transcriptions onto recognised words.

pub mod layout;
pub mod raster;
pub mod scan;
pub mod text;

// Re-export the primary structs so callers can use `lesewerk_document::PageRaster` etc.
pub use raster::PageRaster;
pub use scan::preprocess::{ImagePreprocessor, PreparedPage, PreprocessOptions};
pub use text::align::AlignmentEngine;
pub use text::words::WordGeometryMapper;

#[cfg(feature = "ocr")]
pub use scan::ocr::OcrEngine;
