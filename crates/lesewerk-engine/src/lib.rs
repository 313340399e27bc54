// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// lesewerk-engine — Page scheduling and orchestration for Lesewerk.
//
// Owns the priority task scheduler, the background execution channel that
// runs CPU-bound preprocessing off the async runtime, retry classification,
// the SQLite word store, and batch refinement against a correction oracle.
// Rendering, recognition, and correction are reached through the traits in
// `traits`.

pub mod channel;
pub mod refine;
pub mod retry;
pub mod scheduler;
pub mod store;
pub mod traits;

#[cfg(feature = "ocr")]
pub mod ocr;

pub use channel::ExecutionChannel;
pub use refine::{BatchOutcome, BatchRefiner};
pub use scheduler::{SharedWordStore, TaskScheduler, TaskSchedulerBuilder};
pub use store::SqliteWordStore;
pub use traits::{
    CorrectionOracle, NoopObserver, PageRenderer, SchedulerObserver, TextRecognizer, WordStore,
};

#[cfg(feature = "ocr")]
pub use ocr::OcrsRecognizer;
