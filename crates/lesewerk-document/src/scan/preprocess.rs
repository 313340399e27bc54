// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Page preprocessing pipeline — adaptive contrast, sharpening, deskew,
// column detection, tiled binarization, and morphological cleanup.

use image::{GrayImage, Luma};
use lesewerk_core::error::{LesewerkError, Result};
use lesewerk_core::{ColumnSplit, EngineConfig};
use tracing::{debug, info, instrument};

use crate::layout::{SkewEstimate, TextBands, deskew, detect_columns, estimate_skew};
use crate::raster::PageRaster;

/// Pixels darker than the local mean by more than this are ink.
const INK_MARGIN: f64 = 15.0;

/// Tiles with more than this share of pixels below their own threshold
/// are treated as light-on-dark.
const INVERSION_RATIO: f64 = 0.55;

/// Threshold multiplier applied outside horizontal text bands.
const OFF_BAND_FACTOR: f64 = 0.8;

/// Knobs carried across the execution channel with every raster.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PreprocessOptions {
    /// Binarization grid size (N x N tiles).
    pub tile_grid: u32,
    pub skew_max_degrees: f32,
    pub skew_step_degrees: f32,
}

impl Default for PreprocessOptions {
    fn default() -> Self {
        Self::from(&EngineConfig::default())
    }
}

impl From<&EngineConfig> for PreprocessOptions {
    fn from(config: &EngineConfig) -> Self {
        Self {
            tile_grid: config.tile_grid,
            skew_max_degrees: config.skew_max_degrees,
            skew_step_degrees: config.skew_step_degrees,
        }
    }
}

/// Output of the full pipeline for one page.
#[derive(Debug)]
pub struct PreparedPage {
    /// Binarized, deskewed raster at the original render scale.
    pub raster: PageRaster,
    /// Column gutters found on the deskewed page.
    pub columns: ColumnSplit,
    /// Skew that was detected and removed.
    pub skew: SkewEstimate,
    /// Binarization tiles that were polarity-inverted.
    pub inverted_tiles: usize,
}

/// Prepares a rendered page for the recogniser.
///
/// Each stage consumes `self` and returns the transformed preprocessor, so
/// stages can be chained or run individually:
///
/// ```ignore
/// let page = ImagePreprocessor::from_raster(raster)
///     .stretch_contrast()
///     .sharpen()
///     .deskew(2.0, 0.2)
///     .detect_columns()
///     .binarize(8)
///     .clean_up()
///     .finish();
/// ```
pub struct ImagePreprocessor {
    /// The working image, reduced to luminance.
    image: GrayImage,
    /// Render scale of the source raster.
    scale: f32,
    skew: SkewEstimate,
    columns: ColumnSplit,
    inverted_tiles: usize,
}

impl ImagePreprocessor {
    // -- Construction ---------------------------------------------------------

    /// Take ownership of a raster. Its buffer is released once the
    /// luminance copy has been made.
    pub fn from_raster(mut raster: PageRaster) -> Self {
        let image = raster.to_luma();
        let scale = raster.scale();
        raster.release();
        Self::from_luma(image, scale)
    }

    /// Wrap an existing grayscale image.
    pub fn from_luma(image: GrayImage, scale: f32) -> Self {
        Self {
            image,
            scale,
            skew: SkewEstimate::none(),
            columns: ColumnSplit::single_column(),
            inverted_tiles: 0,
        }
    }

    /// Run every stage in order.
    ///
    /// A released or zero-sized raster is rejected before any work is done.
    #[instrument(skip_all, fields(width = raster.width(), height = raster.height()))]
    pub fn run(raster: PageRaster, options: &PreprocessOptions) -> Result<PreparedPage> {
        if raster.width() == 0 || raster.height() == 0 {
            return Err(LesewerkError::Preprocess(
                "raster is empty or was already released".into(),
            ));
        }
        info!("Running page preprocessing pipeline");
        let page = Self::from_raster(raster)
            .stretch_contrast()
            .sharpen()
            .deskew(options.skew_max_degrees, options.skew_step_degrees)
            .detect_columns()
            .binarize(options.tile_grid)
            .clean_up()
            .finish();
        Ok(page)
    }

    // -- Accessors ------------------------------------------------------------

    /// Borrow the current working image.
    pub fn as_luma(&self) -> &GrayImage {
        &self.image
    }

    pub fn skew(&self) -> SkewEstimate {
        self.skew
    }

    pub fn columns(&self) -> &ColumnSplit {
        &self.columns
    }

    /// Consume the preprocessor and package the result.
    pub fn finish(self) -> PreparedPage {
        PreparedPage {
            raster: PageRaster::from_luma(&self.image, self.scale),
            columns: self.columns,
            skew: self.skew,
            inverted_tiles: self.inverted_tiles,
        }
    }

    // -- Contrast -------------------------------------------------------------

    /// Flatten uneven illumination against the local mean.
    ///
    /// The neighbourhood radius is `max(20, width / 50)`. A pixel more than
    /// 15 levels darker than its neighbourhood is ink and is darkened to
    /// `v·(v/mean) − 40`; anything else is background and is lifted by
    /// `(255 − mean) + 30`.
    #[instrument(skip(self))]
    pub fn stretch_contrast(self) -> Self {
        let (width, height) = self.image.dimensions();
        let radius = (width / 50).max(20);
        debug!(radius, "Stretching local contrast");

        let integral = compute_integral_image(&self.image);
        let mut output = GrayImage::new(width, height);

        for (x, y, Luma([v])) in self.image.enumerate_pixels() {
            let mean = region_mean(&integral, width, height, x, y, radius).max(1.0);
            let v = *v as f64;
            let stretched = if v < mean - INK_MARGIN {
                (v * (v / mean) - 40.0).max(0.0)
            } else {
                (v + (255.0 - mean) + 30.0).min(255.0)
            };
            output.put_pixel(x, y, Luma([stretched as u8]));
        }

        Self {
            image: output,
            ..self
        }
    }

    // -- Sharpening -----------------------------------------------------------

    /// 3x3 sharpening: centre weight 9, all eight neighbours −1, clamped.
    #[instrument(skip(self))]
    pub fn sharpen(self) -> Self {
        let (width, height) = self.image.dimensions();
        if width == 0 || height == 0 {
            return self;
        }
        let mut output = GrayImage::new(width, height);

        for y in 0..height {
            for x in 0..width {
                let mut acc = 0i32;
                for dy in -1i32..=1 {
                    for dx in -1i32..=1 {
                        let sx = (x as i32 + dx).clamp(0, width as i32 - 1) as u32;
                        let sy = (y as i32 + dy).clamp(0, height as i32 - 1) as u32;
                        let weight = if dx == 0 && dy == 0 { 9 } else { -1 };
                        acc += weight * self.image.get_pixel(sx, sy).0[0] as i32;
                    }
                }
                output.put_pixel(x, y, Luma([acc.clamp(0, 255) as u8]));
            }
        }

        Self {
            image: output,
            ..self
        }
    }

    // -- Skew -----------------------------------------------------------------

    /// Detect skew and rotate the page level.
    #[instrument(skip(self))]
    pub fn deskew(self, max_degrees: f32, step_degrees: f32) -> Self {
        let skew = estimate_skew(&self.image, max_degrees, step_degrees);
        if skew.is_level() {
            debug!("Page is level; skipping rotation");
            return Self { skew, ..self };
        }
        info!(angle = skew.angle_degrees, "Deskewing page");
        Self {
            image: deskew(self.image, skew.angle_degrees),
            skew,
            ..self
        }
    }

    // -- Layout ---------------------------------------------------------------

    /// Record column gutters of the (deskewed) working image.
    pub fn detect_columns(self) -> Self {
        let columns = detect_columns(&self.image);
        Self { columns, ..self }
    }

    // -- Binarization ---------------------------------------------------------

    /// Tiled Otsu binarization.
    ///
    /// The page is cut into a `grid x grid` set of tiles, each thresholded by
    /// its own histogram. Tiles where more than 55% of pixels fall below the
    /// threshold are light-on-dark and have their output inverted. Outside
    /// horizontal text bands the threshold is lowered to 80% to drop
    /// background speckle.
    #[instrument(skip(self))]
    pub fn binarize(self, grid: u32) -> Self {
        let (width, height) = self.image.dimensions();
        let grid = grid.max(1);
        let bands = TextBands::detect(&self.image);
        let mut output = GrayImage::from_pixel(width, height, Luma([255u8]));
        let mut inverted_tiles = 0;

        for ty in 0..grid {
            let (y0, y1) = tile_span(height, grid, ty);
            for tx in 0..grid {
                let (x0, x1) = tile_span(width, grid, tx);
                if x0 == x1 || y0 == y1 {
                    continue;
                }

                let mut histogram = [0u64; 256];
                for y in y0..y1 {
                    for x in x0..x1 {
                        histogram[self.image.get_pixel(x, y).0[0] as usize] += 1;
                    }
                }
                let total = ((x1 - x0) * (y1 - y0)) as u64;
                let threshold = otsu_threshold(&histogram, total);
                let below: u64 = histogram[..threshold as usize].iter().sum();
                let inverted = below as f64 > total as f64 * INVERSION_RATIO;
                if inverted {
                    inverted_tiles += 1;
                }

                for y in y0..y1 {
                    let effective = if bands.contains(y) {
                        threshold as f64
                    } else {
                        threshold as f64 * OFF_BAND_FACTOR
                    };
                    for x in x0..x1 {
                        let ink = (self.image.get_pixel(x, y).0[0] as f64) < effective;
                        if ink != inverted {
                            output.put_pixel(x, y, Luma([0u8]));
                        }
                    }
                }
            }
        }

        debug!(inverted_tiles, bands = bands.count(), "Binarization complete");
        Self {
            image: output,
            inverted_tiles,
            ..self
        }
    }

    // -- Morphology -----------------------------------------------------------

    /// Erode isolated ink, then dilate broken strokes.
    ///
    /// Erosion whitens an ink pixel with more than 6 of its 8 neighbours
    /// white. Dilation blackens a white pixel with more than 3 of its 8
    /// neighbours ink. Pixels beyond the border count as white.
    #[instrument(skip(self))]
    pub fn clean_up(self) -> Self {
        let eroded = map_neighbourhood(&self.image, |ink, ink_neighbours| {
            ink && 8 - ink_neighbours > 6
        });
        let dilated = map_neighbourhood(&eroded, |ink, ink_neighbours| {
            !ink && ink_neighbours > 3
        });
        Self {
            image: dilated,
            ..self
        }
    }
}

/// Flip every pixel for which `flip(is_ink, ink_neighbour_count)` holds.
fn map_neighbourhood(binary: &GrayImage, flip: impl Fn(bool, u32) -> bool) -> GrayImage {
    let (width, height) = binary.dimensions();
    let is_ink = |x: i64, y: i64| {
        x >= 0
            && y >= 0
            && x < width as i64
            && y < height as i64
            && binary.get_pixel(x as u32, y as u32).0[0] < 128
    };

    let mut output = binary.clone();
    for y in 0..height as i64 {
        for x in 0..width as i64 {
            let mut neighbours = 0;
            for (dx, dy) in NEIGHBOURS {
                if is_ink(x + dx, y + dy) {
                    neighbours += 1;
                }
            }
            let ink = is_ink(x, y);
            if flip(ink, neighbours) {
                let value = if ink { 255u8 } else { 0u8 };
                output.put_pixel(x as u32, y as u32, Luma([value]));
            }
        }
    }
    output
}

const NEIGHBOURS: [(i64, i64); 8] = [
    (-1, -1),
    (0, -1),
    (1, -1),
    (-1, 0),
    (1, 0),
    (-1, 1),
    (0, 1),
    (1, 1),
];

/// Half-open pixel span of tile `index` when `length` is cut into `grid`
/// near-equal parts.
fn tile_span(length: u32, grid: u32, index: u32) -> (u32, u32) {
    let start = (length as u64 * index as u64 / grid as u64) as u32;
    let end = (length as u64 * (index as u64 + 1) / grid as u64) as u32;
    (start, end)
}

// -- Integral image helpers ---------------------------------------------------

/// Compute the integral (summed-area table) of a grayscale image.
///
/// `integral[y * (width+1) + x]` contains the sum of all pixel values in the
/// rectangle [0, 0) to (x, y) (exclusive on both axes). The table has
/// dimensions `(width+1) x (height+1)` with a zero-padded border.
fn compute_integral_image(gray: &GrayImage) -> Vec<u64> {
    let (w, h) = gray.dimensions();
    let stride = (w + 1) as usize;
    let mut table = vec![0u64; stride * (h + 1) as usize];

    for y in 0..h {
        let mut row_sum: u64 = 0;
        for x in 0..w {
            row_sum += gray.get_pixel(x, y).0[0] as u64;
            let idx = (y + 1) as usize * stride + (x + 1) as usize;
            let above = y as usize * stride + (x + 1) as usize;
            table[idx] = row_sum + table[above];
        }
    }

    table
}

/// Mean pixel value within a square region centred on (cx, cy) with the
/// given radius, using the precomputed integral image.
fn region_mean(
    integral: &[u64],
    img_width: u32,
    img_height: u32,
    cx: u32,
    cy: u32,
    radius: u32,
) -> f64 {
    let stride = (img_width + 1) as usize;

    let x1 = cx.saturating_sub(radius) as usize;
    let y1 = cy.saturating_sub(radius) as usize;
    let x2 = ((cx + radius + 1) as usize).min(img_width as usize);
    let y2 = ((cy + radius + 1) as usize).min(img_height as usize);

    let area = ((x2 - x1) * (y2 - y1)) as f64;
    if area == 0.0 {
        return 128.0;
    }

    // S = I[y2][x2] - I[y1][x2] - I[y2][x1] + I[y1][x1]
    let sum = integral[y2 * stride + x2] as f64
        - integral[y1 * stride + x2] as f64
        - integral[y2 * stride + x1] as f64
        + integral[y1 * stride + x1] as f64;

    sum / area
}

/// Otsu threshold of a 256-bin histogram holding `total` samples.
///
/// Picks the level that maximises the between-class variance. A histogram
/// with a single populated level yields 0.
fn otsu_threshold(histogram: &[u64; 256], total: u64) -> u8 {
    if total == 0 {
        return 128;
    }

    let sum_total: f64 = histogram
        .iter()
        .enumerate()
        .map(|(i, &count)| i as f64 * count as f64)
        .sum();

    let mut sum_background: f64 = 0.0;
    let mut weight_background: u64 = 0;
    let mut max_variance: f64 = 0.0;
    let mut best_threshold: u8 = 0;

    for (t, &count) in histogram.iter().enumerate() {
        weight_background += count;
        if weight_background == 0 {
            continue;
        }
        let weight_foreground = total - weight_background;
        if weight_foreground == 0 {
            break;
        }

        sum_background += t as f64 * count as f64;
        let mean_background = sum_background / weight_background as f64;
        let mean_foreground = (sum_total - sum_background) / weight_foreground as f64;

        let between_variance = weight_background as f64
            * weight_foreground as f64
            * (mean_background - mean_foreground).powi(2);

        if between_variance > max_variance {
            max_variance = between_variance;
            best_threshold = t as u8;
        }
    }

    // Pixels strictly below the threshold are ink; the background class
    // above includes level `t` itself.
    best_threshold.saturating_add(1)
}

// -- Tests --------------------------------------------------------------------
