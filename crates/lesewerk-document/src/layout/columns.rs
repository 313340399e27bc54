// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Column gutter detection — vertical projection profile plus explicit
// detection of printed column rules.

use image::{GrayImage, Luma};
use lesewerk_core::ColumnSplit;
use tracing::{debug, instrument};

/// Pixels darker than this count as ink.
const INK_THRESHOLD: u8 = 128;

/// Fraction of the page height trimmed from top and bottom before sampling.
const BAND_TRIM: f64 = 0.125;

/// A vertical ink run longer than this fraction of the band is a rule line.
const RULE_FRACTION: f64 = 0.25;

/// Row stride when scanning for rule runs.
const RULE_SAMPLE_STEP: u32 = 2;

/// Half-width of the moving average applied to the profile.
const SMOOTHING_RADIUS: usize = 20;

/// Smoothed density below this fraction of the band height is "empty".
const EMPTY_DENSITY: f64 = 0.005;

/// Narrowest gutter accepted, in pixels.
const MIN_GUTTER_WIDTH: usize = 20;

/// Widest gutter accepted, as a fraction of the page width.
const MAX_GUTTER_FRACTION: f64 = 0.20;

/// Fraction of the page width ignored at each edge.
const EDGE_MARGIN: f64 = 0.05;

/// Find column gutters on a deskewed page and return their midpoints.
///
/// Works inside the middle band of the page (75% of its height). Columns of
/// pixels holding a long unbroken ink run are treated as printed rules:
/// their density is forced to zero and each rule becomes a split of its own.
/// The remaining profile is smoothed, and every low-density run of
/// plausible gutter width that stays clear of the page margins contributes
/// its midpoint.
#[instrument(skip(gray), fields(width = gray.width(), height = gray.height()))]
pub fn detect_columns(gray: &GrayImage) -> ColumnSplit {
    let (w, h) = gray.dimensions();
    if w == 0 || h == 0 {
        return ColumnSplit::single_column();
    }

    let band_top = (h as f64 * BAND_TRIM).floor() as u32;
    let band_bottom = (h as f64 * (1.0 - BAND_TRIM)).ceil().min(h as f64) as u32;
    let band_height = band_bottom.saturating_sub(band_top).max(1);

    let mut profile = Vec::with_capacity(w as usize);
    let mut rules = Vec::new();
    for x in 0..w {
        let (ink, longest_run) = scan_column(gray, x, band_top, band_bottom);
        if longest_run as f64 > band_height as f64 * RULE_FRACTION {
            rules.push(x as usize);
            profile.push(0.0);
        } else {
            profile.push(ink as f64);
        }
    }

    let mut smoothed = moving_average(&profile, SMOOTHING_RADIUS);
    for &x in &rules {
        smoothed[x] = 0.0;
    }

    let threshold = band_height as f64 * EMPTY_DENSITY;
    let margin = (w as f64 * EDGE_MARGIN).ceil() as usize;
    let max_width = (w as f64 * MAX_GUTTER_FRACTION) as usize;
    let inside_margins = |start: usize, end: usize| start > margin && end < w as usize - margin;

    // Rules are hard dividers regardless of how dense the text around them is.
    let rule_splits: Vec<f32> = clusters(&rules)
        .into_iter()
        .filter(|&(start, end)| inside_margins(start, end))
        .map(|(start, end)| (start + end) as f32 / 2.0)
        .collect();

    let mut splits = rule_splits.clone();
    for (start, end) in low_runs(&smoothed, threshold) {
        let width = end - start;
        if !inside_margins(start, end) || !(MIN_GUTTER_WIDTH..=max_width).contains(&width) {
            continue;
        }
        let holds_rule = rule_splits
            .iter()
            .any(|&r| r >= start as f32 && r <= end as f32);
        if !holds_rule {
            splits.push((start + end) as f32 / 2.0);
        }
    }

    debug!(rules = rules.len(), splits = ?splits, "Column detection complete");
    ColumnSplit::new(splits)
}

/// Count ink in one pixel column of the band, and measure its longest
/// sampled vertical ink run.
fn scan_column(gray: &GrayImage, x: u32, top: u32, bottom: u32) -> (u32, u32) {
    let mut ink = 0;
    for y in top..bottom {
        if gray.get_pixel(x, y).0[0] < INK_THRESHOLD {
            ink += 1;
        }
    }

    let mut longest = 0;
    let mut current = 0;
    let mut y = top;
    while y < bottom {
        let Luma([v]) = *gray.get_pixel(x, y);
        if v < INK_THRESHOLD {
            current += RULE_SAMPLE_STEP;
            longest = longest.max(current);
        } else {
            current = 0;
        }
        y += RULE_SAMPLE_STEP;
    }

    (ink, longest)
}

/// Centred moving average with a window of `2 * radius + 1`, shrinking at
/// the edges.
fn moving_average(values: &[f64], radius: usize) -> Vec<f64> {
    let mut prefix = Vec::with_capacity(values.len() + 1);
    prefix.push(0.0);
    for v in values {
        let last = prefix[prefix.len() - 1];
        prefix.push(last + v);
    }

    (0..values.len())
        .map(|i| {
            let lo = i.saturating_sub(radius);
            let hi = (i + radius + 1).min(values.len());
            (prefix[hi] - prefix[lo]) / (hi - lo) as f64
        })
        .collect()
}

/// Group sorted indices into half-open runs of consecutive values.
fn clusters(indices: &[usize]) -> Vec<(usize, usize)> {
    let mut runs: Vec<(usize, usize)> = Vec::new();
    for &i in indices {
        match runs.last_mut() {
            Some((_, end)) if *end == i => *end = i + 1,
            _ => runs.push((i, i + 1)),
        }
    }
    runs
}

/// Half-open `[start, end)` runs where `values` stays below `threshold`.
fn low_runs(values: &[f64], threshold: f64) -> Vec<(usize, usize)> {
    let mut runs = Vec::new();
    let mut start = None;
    for (i, &v) in values.iter().enumerate() {
        match (v < threshold, start) {
            (true, None) => start = Some(i),
            (false, Some(s)) => {
                runs.push((s, i));
                start = None;
            }
            _ => {}
        }
    }
    if let Some(s) = start {
        runs.push((s, values.len()));
    }
    runs
}
