// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Layout analysis — skew estimation, column gutters, and text bands.

pub mod bands;
pub mod columns;
pub mod skew;

pub use bands::TextBands;
pub use columns::detect_columns;
pub use skew::{SkewEstimate, deskew, estimate_skew};
