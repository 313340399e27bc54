// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Engine configuration.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{LesewerkError, Result};

/// Most skew candidates tried on each side of zero.
pub const MAX_SKEW_STEPS: u32 = 10_000;

/// Tunable engine settings.
///
/// The retry, alignment, and skew constants are empirical and should be
/// validated against real documents before being relied upon.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Scale at which pages are rendered for recognition.
    pub render_scale: f32,
    /// Binarization grid size (N x N tiles).
    pub tile_grid: u32,
    /// Automatic retries after a transient page failure.
    pub max_retries: u32,
    /// Fixed delay before a failed page is requeued, in milliseconds.
    pub retry_delay_ms: u64,
    /// Minimum similarity for a corrected token to replace a recognised word.
    pub alignment_threshold: f64,
    /// Number of corrected tokens searched ahead of the cursor.
    pub alignment_window: usize,
    /// Score penalty when token and word lengths differ by more than 2.
    pub length_penalty: f64,
    /// Largest skew angle searched, in degrees (both directions).
    pub skew_max_degrees: f32,
    /// Step between candidate skew angles, in degrees.
    pub skew_step_degrees: f32,
    /// Whether recognised pages are sent to the correction oracle.
    pub refine_with_oracle: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            render_scale: 2.0,
            tile_grid: 8,
            max_retries: 1,
            retry_delay_ms: 1000,
            alignment_threshold: 0.4,
            alignment_window: 5,
            length_penalty: 0.2,
            skew_max_degrees: 2.0,
            skew_step_degrees: 0.2,
            refine_with_oracle: true,
        }
    }
}

impl EngineConfig {
    /// Delay before a failed page is requeued.
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    /// Reject values the pipeline cannot work with.
    pub fn validate(&self) -> Result<()> {
        if !(self.render_scale.is_finite() && self.render_scale > 0.0) {
            return Err(LesewerkError::Config(format!(
                "render_scale must be positive, got {}",
                self.render_scale
            )));
        }
        if self.tile_grid == 0 {
            return Err(LesewerkError::Config("tile_grid must be at least 1".into()));
        }
        if self.alignment_window == 0 {
            return Err(LesewerkError::Config(
                "alignment_window must be at least 1".into(),
            ));
        }
        if !(0.0..=1.0).contains(&self.alignment_threshold) {
            return Err(LesewerkError::Config(format!(
                "alignment_threshold must be within 0..=1, got {}",
                self.alignment_threshold
            )));
        }
        if !(self.length_penalty.is_finite() && self.length_penalty >= 0.0) {
            return Err(LesewerkError::Config(format!(
                "length_penalty must be finite and non-negative, got {}",
                self.length_penalty
            )));
        }
        let (max, step) = (self.skew_max_degrees, self.skew_step_degrees);
        if !(max.is_finite() && step.is_finite()) || step <= 0.0 || max < 0.0 {
            return Err(LesewerkError::Config(format!(
                "skew search range invalid: max {max} step {step}"
            )));
        }
        if (max / step).round() > MAX_SKEW_STEPS as f32 {
            return Err(LesewerkError::Config(format!(
                "skew search of {max} in steps of {step} exceeds {MAX_SKEW_STEPS} steps per side"
            )));
        }
        Ok(())
    }

    /// Read a JSON config file. Missing fields take their defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let data = std::fs::read_to_string(path.as_ref())?;
        let config: Self = serde_json::from_str(&data)?;
        config.validate()?;
        Ok(config)
    }

    /// Write the config as pretty-printed JSON.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path.as_ref(), json)?;
        Ok(())
    }
}
