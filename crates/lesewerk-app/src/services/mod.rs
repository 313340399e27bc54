// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Service layer — bridges the command line to the lesewerk library crates.

pub mod data_dir;
#[cfg(feature = "ocr")]
pub mod image_pages;
