// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Skew estimation by projection-profile variance, and deskew rotation.

use image::imageops::{self, FilterType};
use image::{GrayImage, Luma};
use imageproc::geometric_transformations::{Interpolation, rotate_about_center};
use lesewerk_core::config::MAX_SKEW_STEPS;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

/// Widest image the angle search works on; larger pages are downsampled.
const WORKING_WIDTH: u32 = 600;

/// Fixed threshold separating ink from paper during the search.
const INK_THRESHOLD: u8 = 128;

/// Below this profile variance no angle is trusted and 0° is reported.
const NOISE_FLOOR: f64 = 2.0;

/// Minimum number of ink pixels needed before any angle is scored.
const MIN_INK_PIXELS: usize = 32;

/// Outcome of a skew search.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SkewEstimate {
    /// Detected text-line angle in degrees. Positive means lines descend
    /// to the right.
    pub angle_degrees: f32,
    /// Profile variance at the chosen angle.
    pub score: f64,
}

impl SkewEstimate {
    pub fn none() -> Self {
        Self {
            angle_degrees: 0.0,
            score: 0.0,
        }
    }

    pub fn is_level(&self) -> bool {
        self.angle_degrees == 0.0
    }
}

/// Estimate page skew by searching `-max_degrees..=max_degrees` in
/// `step_degrees` increments.
///
/// Ink pixel coordinates are projected onto an axis rotated by each
/// candidate angle; the angle whose 1-D histogram has the highest variance
/// lines the text rows up best. Candidates are visited nearest-to-zero
/// first so ties resolve toward no correction.
#[instrument(skip(gray), fields(width = gray.width(), height = gray.height()))]
pub fn estimate_skew(gray: &GrayImage, max_degrees: f32, step_degrees: f32) -> SkewEstimate {
    let working = downsample(gray);
    let ink: Vec<(f64, f64)> = working
        .enumerate_pixels()
        .filter(|(_, _, Luma([v]))| *v < INK_THRESHOLD)
        .map(|(x, y, _)| (x as f64, y as f64))
        .collect();

    if ink.len() < MIN_INK_PIXELS {
        debug!(ink = ink.len(), "Too little ink for skew search");
        return SkewEstimate::none();
    }

    let (w, h) = (working.width() as f64, working.height() as f64);
    let mut best = SkewEstimate::none();
    let mut best_variance = f64::NEG_INFINITY;

    for angle in candidate_angles(max_degrees, step_degrees) {
        let variance = projection_variance(&ink, w, h, angle);
        if variance > best_variance {
            best_variance = variance;
            best = SkewEstimate {
                angle_degrees: angle,
                score: variance,
            };
        }
    }

    if best.score < NOISE_FLOOR {
        debug!(score = best.score, "Skew score below noise floor");
        return SkewEstimate {
            angle_degrees: 0.0,
            score: best.score,
        };
    }

    debug!(angle = best.angle_degrees, score = best.score, "Skew estimated");
    best
}

/// Rotate the page about its centre to undo `angle_degrees` of skew.
///
/// Exposed corners are filled with white. A level page is returned as-is.
pub fn deskew(gray: GrayImage, angle_degrees: f32) -> GrayImage {
    if angle_degrees == 0.0 {
        return gray;
    }
    // imageproc rotates clockwise for positive theta; undo the skew by
    // rotating the other way.
    rotate_about_center(
        &gray,
        -angle_degrees.to_radians(),
        Interpolation::Bilinear,
        Luma([255u8]),
    )
}

/// Candidate angles ordered 0, -s, +s, -2s, +2s, ... with at most
/// `MAX_SKEW_STEPS` on each side.
fn candidate_angles(max_degrees: f32, step_degrees: f32) -> Vec<f32> {
    if !(step_degrees.is_finite() && step_degrees > 0.0) {
        return vec![0.0];
    }
    let steps = (max_degrees / step_degrees)
        .round()
        .clamp(0.0, MAX_SKEW_STEPS as f32) as u32;
    let mut angles = Vec::with_capacity(steps as usize * 2 + 1);
    angles.push(0.0);
    for i in 1..=steps {
        let a = i as f32 * step_degrees;
        angles.push(-a);
        angles.push(a);
    }
    angles
}

fn downsample(gray: &GrayImage) -> GrayImage {
    let (w, h) = gray.dimensions();
    if w <= WORKING_WIDTH {
        return gray.clone();
    }
    let ratio = WORKING_WIDTH as f64 / w as f64;
    let nh = ((h as f64 * ratio).round() as u32).max(1);
    imageops::resize(gray, WORKING_WIDTH, nh, FilterType::Triangle)
}

/// Variance of bin counts after projecting ink onto the axis perpendicular
/// to lines at `angle_degrees`.
fn projection_variance(ink: &[(f64, f64)], w: f64, h: f64, angle_degrees: f32) -> f64 {
    let theta = (angle_degrees as f64).to_radians();
    let (sin, cos) = theta.sin_cos();

    // Projected coordinate y' = y·cos − x·sin spans at most [-w·|sin|, h + w·|sin|].
    let offset = w * sin.abs();
    let bins = (h + 2.0 * offset).ceil() as usize + 1;
    let mut histogram = vec![0u32; bins];

    for &(x, y) in ink {
        let projected = y * cos - x * sin + offset;
        let bin = (projected.round().max(0.0) as usize).min(bins - 1);
        histogram[bin] += 1;
    }

    let n = histogram.len() as f64;
    let mean = ink.len() as f64 / n;
    histogram
        .iter()
        .map(|&count| {
            let d = count as f64 - mean;
            d * d
        })
        .sum::<f64>()
        / n
}
