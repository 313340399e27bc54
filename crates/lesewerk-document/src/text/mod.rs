// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Recognised text — word geometry mapping and transcription alignment.

pub mod align;
pub mod words;

pub use align::{AlignmentEngine, tokenize};
pub use words::{WordGeometryMapper, sort_reading_order};
