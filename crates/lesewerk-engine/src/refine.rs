// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Batch refinement of already recognised pages.
//
// Walks stored pages in order, asks the correction oracle for each, and
// re-aligns the stored words against the answer. Stops at the first quota
// error and reports the last page that was refined, so a later run can
// resume after it.

use std::sync::Arc;

use lesewerk_core::error::{LesewerkError, Result};
use lesewerk_core::{AlignedWord, DocumentId, EngineConfig, PageNumber, RecognizedWord};
use lesewerk_document::AlignmentEngine;
use tracing::{debug, info, instrument, warn};

use crate::scheduler::SharedWordStore;
use crate::traits::CorrectionOracle;

/// How a batch run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchOutcome {
    /// Every requested page was visited.
    Completed { refined: usize },
    /// The oracle ran out of quota. `last_good_page` is the last page
    /// refined in this run, if any.
    Halted { last_good_page: Option<PageNumber> },
}

/// Re-runs oracle correction over stored pages.
pub struct BatchRefiner {
    store: SharedWordStore,
    oracle: Arc<dyn CorrectionOracle>,
    engine: AlignmentEngine,
}

impl BatchRefiner {
    pub fn new(store: SharedWordStore, oracle: Arc<dyn CorrectionOracle>) -> Self {
        Self {
            store,
            oracle,
            engine: AlignmentEngine::default(),
        }
    }

    /// Use the alignment settings from `config`.
    pub fn with_config(mut self, config: &EngineConfig) -> Self {
        self.engine = AlignmentEngine::from(config);
        self
    }

    /// Refine `pages` of `document`, or every stored page when `pages` is
    /// `None`. Pages without stored words are skipped.
    ///
    /// `on_page` receives each refined page's aligned words. Oracle errors
    /// other than quota exhaustion skip the page; store errors abort the run.
    #[instrument(skip(self, pages, on_page), fields(document = %document))]
    pub async fn run<F>(
        &self,
        document: DocumentId,
        pages: Option<Vec<PageNumber>>,
        mut on_page: F,
    ) -> Result<BatchOutcome>
    where
        F: FnMut(PageNumber, Vec<AlignedWord>),
    {
        let pages = match pages {
            Some(pages) => pages,
            None => self.stored_pages(document).await?,
        };
        info!(pages = pages.len(), "batch refinement started");

        let mut refined = 0;
        let mut last_good_page = None;

        for page in pages {
            let Some(words) = self.load(document, page).await? else {
                debug!(page, "no stored words; skipping");
                continue;
            };

            match self.oracle.correct(page, &words).await {
                Ok(corrected) => {
                    let aligned = self.engine.align(&words, &corrected);
                    refined += 1;
                    last_good_page = Some(page);
                    on_page(page, aligned);
                }
                Err(LesewerkError::QuotaExceeded { .. }) => {
                    warn!(page, ?last_good_page, "correction quota exceeded; batch halted");
                    return Ok(BatchOutcome::Halted { last_good_page });
                }
                Err(e) => {
                    warn!(page, error = %e, "correction failed; page skipped");
                }
            }
        }

        info!(refined, "batch refinement complete");
        Ok(BatchOutcome::Completed { refined })
    }

    async fn stored_pages(&self, document: DocumentId) -> Result<Vec<PageNumber>> {
        let store = Arc::clone(&self.store);
        tokio::task::spawn_blocking(move || {
            store.lock().expect("word store lock poisoned").pages(document)
        })
        .await
        .map_err(|e| LesewerkError::Database(format!("store task: {e}")))?
    }

    async fn load(
        &self,
        document: DocumentId,
        page: PageNumber,
    ) -> Result<Option<Vec<RecognizedWord>>> {
        let store = Arc::clone(&self.store);
        tokio::task::spawn_blocking(move || {
            store.lock().expect("word store lock poisoned").load(document, page)
        })
        .await
        .map_err(|e| LesewerkError::Database(format!("store task: {e}")))?
    }
}
