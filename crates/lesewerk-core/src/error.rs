// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Unified error types for Lesewerk.

use thiserror::Error;

use crate::types::PageNumber;

/// Top-level error type for all Lesewerk operations.
#[derive(Debug, Error)]
pub enum LesewerkError {
    // -- Pipeline stages --
    #[error("page rendering failed: {0}")]
    Render(String),

    #[error("preprocessing failed: {0}")]
    Preprocess(String),

    #[error("text recognition failed: {0}")]
    Recognition(String),

    #[error("invalid raster: {0}")]
    InvalidRaster(String),

    #[error("image processing failed: {0}")]
    Image(String),

    // -- Correction oracle --
    #[error("correction oracle failed: {0}")]
    Oracle(String),

    #[error("correction quota exceeded (last good page: {last_good_page:?})")]
    QuotaExceeded { last_good_page: Option<PageNumber> },

    // -- Execution channel --
    #[error("execution channel crashed: {0}")]
    ChannelCrashed(String),

    #[error("execution channel closed")]
    ChannelClosed,

    // -- Configuration --
    #[error("invalid configuration: {0}")]
    Config(String),

    // -- Storage / persistence --
    #[error("database error: {0}")]
    Database(String),

    #[error("file I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, LesewerkError>;
