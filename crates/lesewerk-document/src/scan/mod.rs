// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Scanning pipeline — page preprocessing and, behind the `ocr` feature,
// local optical character recognition.

pub mod preprocess;

#[cfg(feature = "ocr")]
pub mod ocr;

pub use preprocess::{ImagePreprocessor, PreparedPage, PreprocessOptions};

#[cfg(feature = "ocr")]
pub use ocr::OcrEngine;
