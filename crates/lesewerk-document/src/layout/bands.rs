// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Horizontal text band detection from the row projection profile.

use image::GrayImage;

const INK_THRESHOLD: u8 = 128;

/// A row holds text when more than this fraction of its pixels is ink.
const ROW_DENSITY: f64 = 0.01;

/// Rows added above and below every text row.
const BAND_PADDING: usize = 2;

/// Per-row flags marking which rows lie inside a horizontal text band.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextBands {
    rows: Vec<bool>,
}

impl TextBands {
    /// Locate text bands using a fixed ink threshold.
    pub fn detect(gray: &GrayImage) -> Self {
        let (w, h) = gray.dimensions();
        let min_ink = (w as f64 * ROW_DENSITY) as u32;

        let text_rows: Vec<bool> = gray
            .rows()
            .map(|row| row.filter(|px| px.0[0] < INK_THRESHOLD).count() as u32 > min_ink)
            .collect();

        let mut rows = vec![false; h as usize];
        for (y, _) in text_rows.iter().enumerate().filter(|(_, t)| **t) {
            let lo = y.saturating_sub(BAND_PADDING);
            let hi = (y + BAND_PADDING + 1).min(rows.len());
            rows[lo..hi].iter_mut().for_each(|r| *r = true);
        }
        Self { rows }
    }

    pub fn contains(&self, y: u32) -> bool {
        self.rows.get(y as usize).copied().unwrap_or(false)
    }

    /// Number of distinct bands.
    pub fn count(&self) -> usize {
        self.rows
            .iter()
            .zip(std::iter::once(&false).chain(self.rows.iter()))
            .filter(|(cur, prev)| **cur && !**prev)
            .count()
    }
}
