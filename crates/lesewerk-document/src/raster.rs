// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Owned page raster — the unit of work handed between pipeline stages.
//
// A `PageRaster` is moved, never cloned, across the scheduler/worker
// boundary. Conversions to and from `image` buffers reuse the backing
// allocation.

use image::{DynamicImage, GrayImage, Luma, RgbaImage};
use lesewerk_core::error::{LesewerkError, Result};

/// Bytes per pixel in the backing buffer (RGBA).
pub const CHANNELS: usize = 4;

/// A rendered page: RGBA pixels plus the scale it was rendered at.
#[derive(Debug)]
pub struct PageRaster {
    width: u32,
    height: u32,
    pixels: Vec<u8>,
    scale: f32,
}

impl PageRaster {
    /// Wrap a raw RGBA buffer. The buffer length must be `width * height * 4`.
    pub fn new(width: u32, height: u32, pixels: Vec<u8>, scale: f32) -> Result<Self> {
        let expected = width as usize * height as usize * CHANNELS;
        if pixels.len() != expected {
            return Err(LesewerkError::InvalidRaster(format!(
                "{width}x{height} raster needs {expected} bytes, got {}",
                pixels.len()
            )));
        }
        if !(scale.is_finite() && scale > 0.0) {
            return Err(LesewerkError::InvalidRaster(format!(
                "render scale must be positive, got {scale}"
            )));
        }
        Ok(Self {
            width,
            height,
            pixels,
            scale,
        })
    }

    /// Take ownership of an RGBA image buffer without copying.
    pub fn from_rgba(image: RgbaImage, scale: f32) -> Self {
        let (width, height) = image.dimensions();
        Self {
            width,
            height,
            pixels: image.into_raw(),
            scale,
        }
    }

    /// Convert any decoded image into a raster.
    pub fn from_dynamic(image: DynamicImage, scale: f32) -> Self {
        Self::from_rgba(image.into_rgba8(), scale)
    }

    /// Expand a single-channel image to opaque RGBA.
    pub fn from_luma(gray: &GrayImage, scale: f32) -> Self {
        let (width, height) = gray.dimensions();
        let mut pixels = Vec::with_capacity(width as usize * height as usize * CHANNELS);
        for Luma([v]) in gray.pixels() {
            pixels.extend_from_slice(&[*v, *v, *v, 255]);
        }
        Self {
            width,
            height,
            pixels,
            scale,
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// Scale factor the page was rendered at.
    pub fn scale(&self) -> f32 {
        self.scale
    }

    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    /// Whether the backing buffer has been released.
    pub fn is_released(&self) -> bool {
        self.pixels.is_empty() && self.width == 0 && self.height == 0
    }

    /// Drop the backing buffer, leaving a zero-sized raster behind.
    pub fn release(&mut self) {
        self.pixels = Vec::new();
        self.width = 0;
        self.height = 0;
    }

    /// Reinterpret the buffer as an `RgbaImage` without copying.
    pub fn into_rgba(self) -> Result<RgbaImage> {
        let (width, height) = (self.width, self.height);
        RgbaImage::from_raw(width, height, self.pixels).ok_or_else(|| {
            LesewerkError::InvalidRaster(format!("buffer does not match {width}x{height}"))
        })
    }

    /// Rec. 601 luminance of every pixel.
    pub fn to_luma(&self) -> GrayImage {
        let mut gray = GrayImage::new(self.width, self.height);
        for (dst, px) in gray.pixels_mut().zip(self.pixels.chunks_exact(CHANNELS)) {
            *dst = Luma([luminance(px[0], px[1], px[2])]);
        }
        gray
    }
}

/// Integer Rec. 601 luma.
pub fn luminance(r: u8, g: u8, b: u8) -> u8 {
    ((299 * r as u32 + 587 * g as u32 + 114 * b as u32 + 500) / 1000) as u8
}
