// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Priority page scheduler.
//
// Pages move idle → queued → processing → done | error. One loop task runs
// one page at a time: render, preprocess on the execution channel,
// recognise, map geometry, refine against the correction oracle, persist.
// A transiently failed page is requeued once after a fixed delay.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::{Arc, Mutex};

use lesewerk_core::error::{LesewerkError, Result};
use lesewerk_core::{
    AlignedWord, DocumentId, EngineConfig, OcrTask, PageNumber, PageStatus, Priority,
    RecognizedWord,
};
use lesewerk_document::{AlignmentEngine, PreparedPage, PreprocessOptions, WordGeometryMapper};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};

use crate::channel::{ExecutionChannel, PreprocessFn, default_preprocessor};
use crate::retry::{RetryDecision, RetryPolicy, should_retry};
use crate::traits::{
    CorrectionOracle, NoopObserver, PageRenderer, SchedulerObserver, TextRecognizer, WordStore,
};

/// Shared handle to a word store.
pub type SharedWordStore = Arc<Mutex<dyn WordStore>>;

/// Queue, completion sets, and the active-page pointer. Page statuses are
/// always derived from these, never stored.
#[derive(Debug, Default)]
struct SchedulerState {
    queue: VecDeque<OcrTask>,
    done: BTreeSet<PageNumber>,
    failed: BTreeSet<PageNumber>,
    active: Option<PageNumber>,
    last_good_page: Option<PageNumber>,
    /// Failed pages waiting out the retry delay.
    pending_retries: usize,
    /// Set once the oracle reports an exhausted quota.
    refinement_halted: bool,
    stopped: bool,
}

impl SchedulerState {
    fn status_of(&self, page: PageNumber) -> PageStatus {
        if self.active == Some(page) {
            PageStatus::Processing
        } else if self.done.contains(&page) {
            PageStatus::Done
        } else if self.queue.iter().any(|task| task.page == page) {
            PageStatus::Queued
        } else if self.failed.contains(&page) {
            PageStatus::Error
        } else {
            PageStatus::Idle
        }
    }

    fn is_idle(&self) -> bool {
        self.queue.is_empty() && self.active.is_none() && self.pending_retries == 0
    }

    fn enqueue(&mut self, task: OcrTask) {
        self.queue.retain(|queued| queued.page != task.page);
        match task.priority {
            Priority::High => self.queue.push_front(task),
            Priority::Low => self.queue.push_back(task),
        }
    }
}

struct Inner {
    page_count: PageNumber,
    config: EngineConfig,
    state: Mutex<SchedulerState>,
    /// Woken when work is queued.
    wake: Notify,
    shutdown: Notify,
    /// Signalled whenever the state settles into idle, or the loop stops.
    idle: Notify,
    renderer: Arc<dyn PageRenderer>,
    recognizer: Arc<dyn TextRecognizer>,
    oracle: Option<Arc<dyn CorrectionOracle>>,
    store: Option<(DocumentId, SharedWordStore)>,
    observer: Arc<dyn SchedulerObserver>,
    preprocessor: PreprocessFn,
}

/// Builder for [`TaskScheduler`].
pub struct TaskSchedulerBuilder {
    page_count: PageNumber,
    renderer: Arc<dyn PageRenderer>,
    recognizer: Arc<dyn TextRecognizer>,
    config: EngineConfig,
    oracle: Option<Arc<dyn CorrectionOracle>>,
    store: Option<(DocumentId, SharedWordStore)>,
    observer: Arc<dyn SchedulerObserver>,
    preprocessor: PreprocessFn,
}

impl TaskSchedulerBuilder {
    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn oracle(mut self, oracle: Arc<dyn CorrectionOracle>) -> Self {
        self.oracle = Some(oracle);
        self
    }

    /// Persist each completed page's words under `document`.
    pub fn store(mut self, document: DocumentId, store: SharedWordStore) -> Self {
        self.store = Some((document, store));
        self
    }

    pub fn observer(mut self, observer: Arc<dyn SchedulerObserver>) -> Self {
        self.observer = observer;
        self
    }

    /// Replace the work run on the execution channel.
    pub fn preprocessor(mut self, preprocessor: PreprocessFn) -> Self {
        self.preprocessor = preprocessor;
        self
    }

    /// Validate the configuration and start the scheduler loop.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn build(self) -> Result<TaskScheduler> {
        self.config.validate()?;

        let inner = Arc::new(Inner {
            page_count: self.page_count,
            config: self.config,
            state: Mutex::new(SchedulerState::default()),
            wake: Notify::new(),
            shutdown: Notify::new(),
            idle: Notify::new(),
            renderer: self.renderer,
            recognizer: self.recognizer,
            oracle: self.oracle,
            store: self.store,
            observer: self.observer,
            preprocessor: self.preprocessor,
        });

        let handle = tokio::spawn(run_loop(Arc::clone(&inner)));
        info!(pages = inner.page_count, "task scheduler started");

        Ok(TaskScheduler {
            inner,
            handle: Mutex::new(Some(handle)),
        })
    }
}

/// Schedules pages of one document through the recognition pipeline.
///
/// Dropping the scheduler stops the loop after any in-flight page.
pub struct TaskScheduler {
    inner: Arc<Inner>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl TaskScheduler {
    /// Start configuring a scheduler for a document with `page_count` pages
    /// (numbered from 1).
    pub fn builder(
        page_count: PageNumber,
        renderer: Arc<dyn PageRenderer>,
        recognizer: Arc<dyn TextRecognizer>,
    ) -> TaskSchedulerBuilder {
        TaskSchedulerBuilder {
            page_count,
            renderer,
            recognizer,
            config: EngineConfig::default(),
            oracle: None,
            store: None,
            observer: Arc::new(NoopObserver),
            preprocessor: default_preprocessor(),
        }
    }

    /// Queue `page`, or move it if already queued.
    ///
    /// No-op for pages that are done or currently processing. High priority
    /// jumps to the front of the queue; low priority goes to the back.
    #[instrument(skip(self))]
    pub fn schedule(&self, page: PageNumber, priority: Priority) {
        if page == 0 || page > self.inner.page_count {
            warn!(page, pages = self.inner.page_count, "page out of range");
            return;
        }

        {
            let mut state = self.inner.state.lock().expect("scheduler state lock poisoned");
            if state.done.contains(&page) || state.active == Some(page) {
                debug!(page, "page already done or processing");
                return;
            }
            state.enqueue(OcrTask::new(page, priority));
        }

        self.inner.publish_status();
        self.inner.wake.notify_one();
    }

    /// Drop a queued page that has not started. Returns whether it was
    /// queued.
    #[instrument(skip(self))]
    pub fn remove(&self, page: PageNumber) -> bool {
        let removed = {
            let mut state = self.inner.state.lock().expect("scheduler state lock poisoned");
            let before = state.queue.len();
            state.queue.retain(|task| task.page != page);
            state.queue.len() != before
        };
        if removed {
            debug!(page, "page removed from queue");
            self.inner.publish_status();
            self.inner.signal_if_idle();
        }
        removed
    }

    /// Snapshot of every page's status.
    pub fn statuses(&self) -> BTreeMap<PageNumber, PageStatus> {
        self.inner.snapshot()
    }

    pub fn status(&self, page: PageNumber) -> PageStatus {
        self.inner
            .state
            .lock()
            .expect("scheduler state lock poisoned")
            .status_of(page)
    }

    /// Pages waiting in the queue, front first.
    pub fn queued_pages(&self) -> Vec<PageNumber> {
        self.inner
            .state
            .lock()
            .expect("scheduler state lock poisoned")
            .queue
            .iter()
            .map(|task| task.page)
            .collect()
    }

    /// True when nothing is queued, running, or waiting to be retried.
    pub fn is_idle(&self) -> bool {
        self.inner
            .state
            .lock()
            .expect("scheduler state lock poisoned")
            .is_idle()
    }

    /// Wait until the scheduler is idle, or until it has been stopped.
    pub async fn wait_idle(&self) {
        loop {
            // Register before checking so a signal between the two is kept.
            let mut notified = std::pin::pin!(self.inner.idle.notified());
            notified.as_mut().enable();
            {
                let state = self.inner.state.lock().expect("scheduler state lock poisoned");
                if state.is_idle() || state.stopped {
                    return;
                }
            }
            notified.await;
        }
    }

    /// Re-enable oracle refinement after a quota halt.
    pub fn resume_refinement(&self) {
        let mut state = self.inner.state.lock().expect("scheduler state lock poisoned");
        if state.refinement_halted {
            info!("oracle refinement resumed");
            state.refinement_halted = false;
        }
    }

    /// Stop the loop once any in-flight page finishes, and wait for it.
    pub async fn shutdown(&self) {
        self.inner.stop();
        let handle = self.handle.lock().expect("scheduler handle lock poisoned").take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                error!(error = %e, "scheduler loop ended abnormally");
            }
        }
    }
}

impl Drop for TaskScheduler {
    fn drop(&mut self) {
        self.inner.stop();
    }
}

// ---------------------------------------------------------------------------
// Loop
// ---------------------------------------------------------------------------

async fn run_loop(inner: Arc<Inner>) {
    let mut channel: Option<ExecutionChannel> = None;

    loop {
        let task = {
            let mut state = inner.state.lock().expect("scheduler state lock poisoned");
            if state.stopped {
                break;
            }
            let task = state.queue.pop_front();
            if let Some(task) = &task {
                state.active = Some(task.page);
            }
            task
        };

        let Some(task) = task else {
            tokio::select! {
                _ = inner.wake.notified() => continue,
                _ = inner.shutdown.notified() => break,
            }
        };

        inner.publish_status();
        inner.process(task, &mut channel).await;
    }

    info!("task scheduler stopped");
}

/// Take the execution channel, spawning a fresh one if there is none or
/// its thread has exited.
fn checkout(
    channel: &mut Option<ExecutionChannel>,
    preprocessor: &PreprocessFn,
) -> Result<ExecutionChannel> {
    match channel.take() {
        Some(worker) if worker.is_alive() => Ok(worker),
        Some(_) => {
            warn!("execution channel thread exited; recreating");
            ExecutionChannel::spawn(Arc::clone(preprocessor))
        }
        None => ExecutionChannel::spawn(Arc::clone(preprocessor)),
    }
}

impl Inner {
    fn stop(&self) {
        self.state.lock().expect("scheduler state lock poisoned").stopped = true;
        self.shutdown.notify_one();
        self.idle.notify_waiters();
    }

    /// Wake every `wait_idle` caller if nothing is left to do.
    fn signal_if_idle(&self) {
        let idle = self.state.lock().expect("scheduler state lock poisoned").is_idle();
        if idle {
            self.idle.notify_waiters();
        }
    }

    fn snapshot(&self) -> BTreeMap<PageNumber, PageStatus> {
        let state = self.state.lock().expect("scheduler state lock poisoned");
        (1..=self.page_count)
            .map(|page| (page, state.status_of(page)))
            .collect()
    }

    fn publish_status(&self) {
        let statuses = self.snapshot();
        self.observer.on_status_change(&statuses);
    }

    /// Put a failed page back in the queue unless something else already
    /// claimed it.
    fn requeue(&self, task: OcrTask) {
        {
            let mut state = self.state.lock().expect("scheduler state lock poisoned");
            state.pending_retries = state.pending_retries.saturating_sub(1);
            let claimed = state.active == Some(task.page)
                || state.done.contains(&task.page)
                || state.queue.iter().any(|queued| queued.page == task.page);
            if claimed || state.stopped {
                debug!(page = task.page, "retry superseded");
                drop(state);
                self.signal_if_idle();
                return;
            }
            state.enqueue(task);
        }
        self.publish_status();
        self.wake.notify_one();
    }

    #[instrument(skip(self, task, channel), fields(page = task.page, attempt = task.retry_count))]
    async fn process(self: &Arc<Self>, task: OcrTask, channel: &mut Option<ExecutionChannel>) {
        let page = task.page;
        match self.recognize_page(page, channel).await {
            Ok(words) => {
                let aligned = self.refine(page, &words).await;
                self.persist(page, &words).await;
                {
                    let mut state = self.state.lock().expect("scheduler state lock poisoned");
                    state.active = None;
                    state.done.insert(page);
                    state.failed.remove(&page);
                    state.last_good_page = Some(page);
                }
                info!(page, words = aligned.len(), "page complete");
                self.publish_status();
                self.observer.on_page_complete(page, &aligned);
                self.observer.on_checkpoint(page);
            }
            Err(err) => {
                let policy = RetryPolicy::from(&self.config);
                let decision = should_retry(&err, task.retry_count, &policy);
                {
                    let mut state = self.state.lock().expect("scheduler state lock poisoned");
                    state.active = None;
                    state.failed.insert(page);
                    if matches!(decision, RetryDecision::RetryAfter(_)) {
                        state.pending_retries += 1;
                    }
                }
                warn!(page, error = %err, "page failed");
                self.publish_status();

                match decision {
                    RetryDecision::RetryAfter(delay) => {
                        let inner = Arc::clone(self);
                        let retry = OcrTask {
                            retry_count: task.retry_count + 1,
                            ..task
                        };
                        tokio::spawn(async move {
                            tokio::time::sleep(delay).await;
                            inner.requeue(retry);
                        });
                    }
                    RetryDecision::GiveUp(class) => {
                        error!(page, ?class, "page failed permanently");
                    }
                    RetryDecision::Exhausted => {
                        error!(page, "page failed after retry");
                    }
                }
            }
        }
        self.signal_if_idle();
    }

    /// Render → preprocess → recognise → map geometry.
    async fn recognize_page(
        &self,
        page: PageNumber,
        channel: &mut Option<ExecutionChannel>,
    ) -> Result<Vec<RecognizedWord>> {
        let raster = self.renderer.render(page, self.config.render_scale).await?;
        debug!(page, width = raster.width(), height = raster.height(), "page rendered");

        let worker = checkout(channel, &self.preprocessor)?;
        let options = PreprocessOptions::from(&self.config);
        let prepared = match worker.preprocess(raster, options).await {
            Ok(prepared) => prepared,
            Err(err @ (LesewerkError::ChannelCrashed(_) | LesewerkError::ChannelClosed)) => {
                warn!(page, error = %err, "execution channel lost; recreating before next page");
                return Err(err);
            }
            Err(err) => {
                *channel = Some(worker);
                return Err(err);
            }
        };
        *channel = Some(worker);

        let PreparedPage {
            raster,
            columns,
            skew,
            inverted_tiles,
        } = prepared;
        debug!(
            page,
            angle = skew.angle_degrees,
            splits = ?columns.as_slice(),
            inverted_tiles,
            "page prepared"
        );

        let mapper = WordGeometryMapper::new(columns, raster.width(), raster.height(), raster.scale());
        let hits = self.recognizer.recognize(raster).await?;
        Ok(mapper.map(hits))
    }

    /// Upgrade word text with the oracle's transcription. Never fails: any
    /// oracle problem leaves the recognised text in place.
    async fn refine(&self, page: PageNumber, words: &[RecognizedWord]) -> Vec<AlignedWord> {
        let unrefined = || words.iter().map(AlignedWord::from).collect::<Vec<_>>();

        let Some(oracle) = self.oracle.as_ref().filter(|_| self.config.refine_with_oracle) else {
            return unrefined();
        };
        let halted = self
            .state
            .lock()
            .expect("scheduler state lock poisoned")
            .refinement_halted;
        if halted {
            return unrefined();
        }

        match oracle.correct(page, words).await {
            Ok(corrected) => AlignmentEngine::from(&self.config).align(words, &corrected),
            Err(LesewerkError::QuotaExceeded { .. }) => {
                let last_good_page = {
                    let mut state = self.state.lock().expect("scheduler state lock poisoned");
                    state.refinement_halted = true;
                    state.last_good_page
                };
                warn!(page, ?last_good_page, "correction quota exceeded; refinement halted");
                self.observer.on_quota_exceeded(last_good_page);
                unrefined()
            }
            Err(err) => {
                warn!(page, error = %err, "correction failed; keeping recognised text");
                unrefined()
            }
        }
    }

    async fn persist(&self, page: PageNumber, words: &[RecognizedWord]) {
        let Some((document, store)) = &self.store else {
            return;
        };
        let (document, store, words) = (*document, Arc::clone(store), words.to_vec());

        let result = tokio::task::spawn_blocking(move || {
            store
                .lock()
                .expect("word store lock poisoned")
                .save(document, page, &words)
        })
        .await;

        match result {
            Ok(Ok(())) => debug!(page, "page words persisted"),
            Ok(Err(e)) => warn!(page, error = %e, "failed to persist page words"),
            Err(e) => warn!(page, error = %e, "persist task failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use image::{GrayImage, Luma};
    use lesewerk_core::{BoundingBox, ColumnSplit, WordHit};
    use lesewerk_document::PageRaster;
    use lesewerk_document::layout::SkewEstimate;
    use std::time::Duration;

    use tokio::sync::Semaphore;

    use crate::channel::preprocessor_fn;
    use crate::store::SqliteWordStore;

    // -- Fakes ----------------------------------------------------------------

    #[derive(Default)]
    struct FakeRenderer {
        /// Remaining failures per page.
        failures: Mutex<HashMap<PageNumber, u32>>,
        permanent: BTreeSet<PageNumber>,
        /// When set, each render waits for a permit.
        gate: Option<Arc<Semaphore>>,
        rendered: Mutex<Vec<PageNumber>>,
    }

    impl FakeRenderer {
        fn failing(page: PageNumber, times: u32) -> Self {
            Self {
                failures: Mutex::new(HashMap::from([(page, times)])),
                ..Default::default()
            }
        }

        fn gated(gate: Arc<Semaphore>) -> Self {
            Self {
                gate: Some(gate),
                ..Default::default()
            }
        }

        fn renders(&self) -> Vec<PageNumber> {
            self.rendered.lock().expect("lock").clone()
        }
    }

    #[async_trait]
    impl PageRenderer for FakeRenderer {
        async fn render(&self, page: PageNumber, scale: f32) -> Result<PageRaster> {
            if let Some(gate) = &self.gate {
                gate.acquire().await.expect("gate open").forget();
            }
            self.rendered.lock().expect("lock").push(page);

            if self.permanent.contains(&page) {
                return Err(LesewerkError::InvalidRaster("corrupt page".into()));
            }
            let fail = {
                let mut failures = self.failures.lock().expect("lock");
                match failures.get_mut(&page) {
                    Some(left) if *left > 0 => {
                        *left -= 1;
                        true
                    }
                    _ => false,
                }
            };
            if fail {
                return Err(LesewerkError::Render(format!("page {page} unavailable")));
            }
            let gray = GrayImage::from_pixel(64, 64, Luma([255u8]));
            Ok(PageRaster::from_luma(&gray, scale))
        }
    }

    /// Reports one misspelt word per page, at a fixed working-space box.
    struct FakeRecognizer;

    #[async_trait]
    impl TextRecognizer for FakeRecognizer {
        async fn recognize(&self, raster: PageRaster) -> Result<Vec<WordHit>> {
            assert!(!raster.is_released());
            Ok(vec![WordHit {
                text: "tbe".into(),
                confidence: 0.6,
                bbox: BoundingBox::new(10.0, 10.0, 30.0, 20.0),
            }])
        }
    }

    /// Corrects every page until `quota` calls have been made.
    struct FakeOracle {
        quota: usize,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl CorrectionOracle for FakeOracle {
        async fn correct(&self, _page: PageNumber, _words: &[RecognizedWord]) -> Result<String> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call >= self.quota {
                return Err(LesewerkError::QuotaExceeded {
                    last_good_page: None,
                });
            }
            Ok("the".into())
        }
    }

    #[derive(Default)]
    struct Recorder {
        statuses: Mutex<Vec<BTreeMap<PageNumber, PageStatus>>>,
        completed: Mutex<Vec<(PageNumber, Vec<AlignedWord>)>>,
        checkpoints: Mutex<Vec<PageNumber>>,
        quota: Mutex<Vec<Option<PageNumber>>>,
    }

    impl Recorder {
        /// Status history of one page with consecutive repeats collapsed.
        fn history(&self, page: PageNumber) -> Vec<PageStatus> {
            let mut history: Vec<PageStatus> = self
                .statuses
                .lock()
                .expect("lock")
                .iter()
                .map(|map| map[&page])
                .collect();
            history.dedup();
            history
        }

        fn completed_pages(&self) -> Vec<PageNumber> {
            self.completed.lock().expect("lock").iter().map(|(p, _)| *p).collect()
        }
    }

    impl SchedulerObserver for Recorder {
        fn on_status_change(&self, statuses: &BTreeMap<PageNumber, PageStatus>) {
            self.statuses.lock().expect("lock").push(statuses.clone());
        }

        fn on_page_complete(&self, page: PageNumber, words: &[AlignedWord]) {
            self.completed.lock().expect("lock").push((page, words.to_vec()));
        }

        fn on_checkpoint(&self, page: PageNumber) {
            self.checkpoints.lock().expect("lock").push(page);
        }

        fn on_quota_exceeded(&self, last_good_page: Option<PageNumber>) {
            self.quota.lock().expect("lock").push(last_good_page);
        }
    }

    fn fast_config() -> EngineConfig {
        EngineConfig {
            retry_delay_ms: 10,
            ..Default::default()
        }
    }

    fn passthrough() -> PreprocessFn {
        preprocessor_fn(|raster, _options| {
            Ok(PreparedPage {
                raster,
                columns: ColumnSplit::single_column(),
                skew: SkewEstimate::none(),
                inverted_tiles: 0,
            })
        })
    }

    fn scheduler(
        pages: PageNumber,
        renderer: Arc<FakeRenderer>,
        recorder: Arc<Recorder>,
    ) -> TaskSchedulerBuilder {
        TaskScheduler::builder(pages, renderer, Arc::new(FakeRecognizer))
            .config(fast_config())
            .observer(recorder)
            .preprocessor(passthrough())
    }

    async fn wait_until(what: &str, condition: impl Fn() -> bool) {
        for _ in 0..500 {
            if condition() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("timed out waiting for {what}");
    }

    // -- Tests ----------------------------------------------------------------

    #[tokio::test]
    async fn completes_a_page_with_unscaled_words() {
        let renderer = Arc::new(FakeRenderer::default());
        let recorder = Arc::new(Recorder::default());
        let scheduler = scheduler(3, renderer, Arc::clone(&recorder))
            .build()
            .expect("build");

        scheduler.schedule(2, Priority::Low);
        wait_until("page 2 done", || scheduler.status(2) == PageStatus::Done).await;

        let completed = recorder.completed.lock().expect("lock").clone();
        assert_eq!(completed.len(), 1);
        let (page, words) = &completed[0];
        assert_eq!(*page, 2);
        assert_eq!(words.len(), 1);
        // Default render scale is 2.0.
        assert_eq!(words[0].bbox(), BoundingBox::new(5.0, 5.0, 15.0, 10.0));
        assert!(!words[0].is_refined());
        assert_eq!(*recorder.checkpoints.lock().expect("lock"), vec![2]);
        assert_eq!(recorder.history(2), [PageStatus::Queued, PageStatus::Processing, PageStatus::Done]);
        assert_eq!(scheduler.status(1), PageStatus::Idle);
    }

    #[tokio::test]
    async fn runs_the_real_preprocessing_pipeline() {
        let renderer = Arc::new(FakeRenderer::default());
        let recorder = Arc::new(Recorder::default());
        let scheduler = TaskScheduler::builder(1, renderer, Arc::new(FakeRecognizer))
            .config(fast_config())
            .observer(Arc::clone(&recorder) as Arc<dyn SchedulerObserver>)
            .build()
            .expect("build");

        scheduler.schedule(1, Priority::High);
        wait_until("page 1 done", || scheduler.status(1) == PageStatus::Done).await;
        assert_eq!(recorder.completed_pages(), vec![1]);
    }

    #[tokio::test]
    async fn queue_order_follows_priority_and_is_idempotent() {
        let gate = Arc::new(Semaphore::new(0));
        let renderer = Arc::new(FakeRenderer::gated(Arc::clone(&gate)));
        let recorder = Arc::new(Recorder::default());
        let scheduler = scheduler(10, Arc::clone(&renderer), Arc::clone(&recorder))
            .build()
            .expect("build");

        // Page 1 starts and blocks inside the renderer.
        scheduler.schedule(1, Priority::Low);
        wait_until("page 1 processing", || {
            scheduler.status(1) == PageStatus::Processing
        })
        .await;

        scheduler.schedule(2, Priority::Low);
        scheduler.schedule(3, Priority::Low);
        scheduler.schedule(5, Priority::Low);
        scheduler.schedule(5, Priority::Low);
        scheduler.schedule(4, Priority::High);
        // Processing pages are left alone.
        scheduler.schedule(1, Priority::High);
        assert_eq!(scheduler.queued_pages(), vec![4, 2, 3, 5]);

        gate.add_permits(10);
        wait_until("all pages done", || recorder.completed_pages().len() == 5).await;
        assert_eq!(renderer.renders(), vec![1, 4, 2, 3, 5]);

        // Done pages are never requeued.
        scheduler.schedule(4, Priority::High);
        assert!(scheduler.queued_pages().is_empty());
    }

    #[tokio::test]
    async fn high_priority_reschedule_moves_a_queued_page() {
        let gate = Arc::new(Semaphore::new(0));
        let renderer = Arc::new(FakeRenderer::gated(Arc::clone(&gate)));
        let recorder = Arc::new(Recorder::default());
        let scheduler = scheduler(10, renderer, recorder).build().expect("build");

        scheduler.schedule(1, Priority::Low);
        wait_until("page 1 processing", || {
            scheduler.status(1) == PageStatus::Processing
        })
        .await;
        scheduler.schedule(2, Priority::Low);
        scheduler.schedule(3, Priority::Low);
        scheduler.schedule(3, Priority::High);
        assert_eq!(scheduler.queued_pages(), vec![3, 2]);
        gate.add_permits(10);
    }

    #[tokio::test]
    async fn one_failure_then_success_retries_once() {
        let renderer = Arc::new(FakeRenderer::failing(7, 1));
        let recorder = Arc::new(Recorder::default());
        let scheduler = scheduler(8, Arc::clone(&renderer), Arc::clone(&recorder))
            .build()
            .expect("build");

        scheduler.schedule(7, Priority::Low);
        wait_until("page 7 done", || scheduler.status(7) == PageStatus::Done).await;

        assert_eq!(
            recorder.history(7),
            [
                PageStatus::Queued,
                PageStatus::Processing,
                PageStatus::Error,
                PageStatus::Queued,
                PageStatus::Processing,
                PageStatus::Done,
            ]
        );
        assert_eq!(renderer.renders(), vec![7, 7]);
    }

    #[tokio::test]
    async fn two_failures_leave_a_terminal_error() {
        let renderer = Arc::new(FakeRenderer::failing(7, 2));
        let recorder = Arc::new(Recorder::default());
        let scheduler = scheduler(8, Arc::clone(&renderer), Arc::clone(&recorder))
            .build()
            .expect("build");

        scheduler.schedule(7, Priority::Low);
        wait_until("second attempt", || renderer.renders().len() == 2).await;
        wait_until("page 7 error", || scheduler.status(7) == PageStatus::Error).await;

        // Well past the retry delay: no third attempt.
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(renderer.renders(), vec![7, 7]);
        assert_eq!(scheduler.status(7), PageStatus::Error);
        assert_eq!(recorder.history(7).last(), Some(&PageStatus::Error));
        assert!(recorder.completed_pages().is_empty());
    }

    #[tokio::test]
    async fn idle_only_after_the_retry_settles() {
        let renderer = Arc::new(FakeRenderer::failing(1, 1));
        let recorder = Arc::new(Recorder::default());
        let scheduler = scheduler(2, renderer, recorder).build().expect("build");
        assert!(scheduler.is_idle());

        scheduler.schedule(1, Priority::Low);
        scheduler.schedule(2, Priority::Low);
        assert!(!scheduler.is_idle());

        scheduler.wait_idle().await;
        assert_eq!(scheduler.status(1), PageStatus::Done);
        assert_eq!(scheduler.status(2), PageStatus::Done);
    }

    #[tokio::test]
    async fn wait_idle_wakes_when_the_last_page_finishes() {
        let gate = Arc::new(Semaphore::new(0));
        let renderer = Arc::new(FakeRenderer::gated(Arc::clone(&gate)));
        let recorder = Arc::new(Recorder::default());
        let scheduler = scheduler(1, renderer, recorder).build().expect("build");

        scheduler.schedule(1, Priority::Low);
        let idle = scheduler.wait_idle();
        gate.add_permits(1);
        tokio::time::timeout(Duration::from_secs(5), idle)
            .await
            .expect("idle signalled");
        assert_eq!(scheduler.status(1), PageStatus::Done);
    }

    #[tokio::test]
    async fn wait_idle_returns_once_stopped() {
        let renderer = Arc::new(FakeRenderer::default());
        let recorder = Arc::new(Recorder::default());
        let scheduler = scheduler(2, renderer, recorder).build().expect("build");

        scheduler.shutdown().await;
        scheduler.schedule(1, Priority::Low);
        assert!(!scheduler.is_idle());
        tokio::time::timeout(Duration::from_secs(5), scheduler.wait_idle())
            .await
            .expect("stopped scheduler does not block");
    }

    #[tokio::test]
    async fn dead_channel_is_replaced_on_checkout() {
        let crashing = preprocessor_fn(|_raster, _options| panic!("simulated crash"));
        let dead = ExecutionChannel::spawn(crashing).expect("spawn");
        let blank = || PageRaster::from_luma(&GrayImage::new(4, 4), 1.0);
        let crashed = dead.preprocess(blank(), PreprocessOptions::default()).await;
        assert!(matches!(crashed, Err(LesewerkError::ChannelCrashed(_))));
        wait_until("channel thread exit", || !dead.is_alive()).await;

        let mut slot = Some(dead);
        let fresh = checkout(&mut slot, &passthrough()).expect("checkout");
        assert!(slot.is_none());
        assert!(fresh.is_alive());
        fresh
            .preprocess(blank(), PreprocessOptions::default())
            .await
            .expect("fresh channel works");
    }

    #[tokio::test]
    async fn permanent_errors_are_not_retried() {
        let renderer = Arc::new(FakeRenderer {
            permanent: BTreeSet::from([3]),
            ..Default::default()
        });
        let recorder = Arc::new(Recorder::default());
        let scheduler = scheduler(3, Arc::clone(&renderer), recorder)
            .build()
            .expect("build");

        scheduler.schedule(3, Priority::Low);
        wait_until("page 3 error", || scheduler.status(3) == PageStatus::Error).await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(renderer.renders(), vec![3]);
    }

    #[tokio::test]
    async fn removed_pages_never_run() {
        let gate = Arc::new(Semaphore::new(0));
        let renderer = Arc::new(FakeRenderer::gated(Arc::clone(&gate)));
        let recorder = Arc::new(Recorder::default());
        let scheduler = scheduler(5, Arc::clone(&renderer), Arc::clone(&recorder))
            .build()
            .expect("build");

        scheduler.schedule(1, Priority::Low);
        wait_until("page 1 processing", || {
            scheduler.status(1) == PageStatus::Processing
        })
        .await;
        scheduler.schedule(2, Priority::Low);
        scheduler.schedule(3, Priority::Low);
        assert!(scheduler.remove(2));
        assert!(!scheduler.remove(2));
        assert_eq!(scheduler.status(2), PageStatus::Idle);

        gate.add_permits(10);
        wait_until("pages done", || recorder.completed_pages().len() == 2).await;
        assert_eq!(renderer.renders(), vec![1, 3]);
    }

    #[tokio::test]
    async fn out_of_range_pages_are_ignored() {
        let renderer = Arc::new(FakeRenderer::default());
        let recorder = Arc::new(Recorder::default());
        let scheduler = scheduler(2, renderer, Arc::clone(&recorder))
            .build()
            .expect("build");

        scheduler.schedule(0, Priority::Low);
        scheduler.schedule(3, Priority::Low);
        assert!(scheduler.queued_pages().is_empty());
        assert!(recorder.statuses.lock().expect("lock").is_empty());
        assert_eq!(scheduler.statuses().len(), 2);
    }

    #[tokio::test]
    async fn oracle_refines_until_quota_is_exhausted() {
        let renderer = Arc::new(FakeRenderer::default());
        let recorder = Arc::new(Recorder::default());
        let oracle = Arc::new(FakeOracle {
            quota: 1,
            calls: AtomicUsize::new(0),
        });
        let scheduler = scheduler(3, renderer, Arc::clone(&recorder))
            .oracle(Arc::clone(&oracle) as Arc<dyn CorrectionOracle>)
            .build()
            .expect("build");

        for page in 1..=3 {
            scheduler.schedule(page, Priority::Low);
        }
        wait_until("all pages done", || recorder.completed_pages().len() == 3).await;

        let completed = recorder.completed.lock().expect("lock").clone();
        assert_eq!(completed[0].0, 1);
        assert_eq!(completed[0].1[0].text(), "the");
        assert!(completed[0].1[0].is_refined());
        for (_, words) in &completed[1..] {
            assert_eq!(words[0].text(), "tbe");
            assert!(!words[0].is_refined());
        }
        assert_eq!(*recorder.quota.lock().expect("lock"), vec![Some(1)]);
        // Refinement stays halted: page 3 never reached the oracle.
        assert_eq!(oracle.calls.load(Ordering::SeqCst), 2);
        assert_eq!(*recorder.checkpoints.lock().expect("lock"), vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn refinement_can_be_disabled() {
        let renderer = Arc::new(FakeRenderer::default());
        let recorder = Arc::new(Recorder::default());
        let oracle = Arc::new(FakeOracle {
            quota: 10,
            calls: AtomicUsize::new(0),
        });
        let scheduler = scheduler(1, renderer, Arc::clone(&recorder))
            .config(EngineConfig {
                refine_with_oracle: false,
                ..fast_config()
            })
            .oracle(Arc::clone(&oracle) as Arc<dyn CorrectionOracle>)
            .build()
            .expect("build");

        scheduler.schedule(1, Priority::Low);
        wait_until("page 1 done", || scheduler.status(1) == PageStatus::Done).await;
        assert_eq!(oracle.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn crashed_channel_is_recreated_and_queue_survives() {
        let crashes = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&crashes);
        let worker = preprocessor_fn(move |raster, _options| {
            if seen.fetch_add(1, Ordering::SeqCst) == 0 {
                panic!("simulated preprocessing crash");
            }
            Ok(PreparedPage {
                raster,
                columns: ColumnSplit::single_column(),
                skew: SkewEstimate::none(),
                inverted_tiles: 0,
            })
        });

        let renderer = Arc::new(FakeRenderer::default());
        let recorder = Arc::new(Recorder::default());
        let scheduler = scheduler(2, renderer, Arc::clone(&recorder))
            .preprocessor(worker)
            .build()
            .expect("build");

        scheduler.schedule(1, Priority::Low);
        scheduler.schedule(2, Priority::Low);
        wait_until("both pages done", || {
            scheduler.status(1) == PageStatus::Done && scheduler.status(2) == PageStatus::Done
        })
        .await;
        assert_eq!(recorder.history(1)[2], PageStatus::Error);
    }

    #[tokio::test]
    async fn completed_pages_are_persisted() {
        let store = Arc::new(Mutex::new(SqliteWordStore::open_in_memory().expect("open")));
        let document = DocumentId::new();
        let renderer = Arc::new(FakeRenderer::default());
        let recorder = Arc::new(Recorder::default());
        let scheduler = scheduler(2, renderer, Arc::clone(&recorder))
            .store(document, Arc::clone(&store) as SharedWordStore)
            .build()
            .expect("build");

        scheduler.schedule(2, Priority::Low);
        wait_until("checkpoint", || !recorder.checkpoints.lock().expect("lock").is_empty()).await;

        let saved = store
            .lock()
            .expect("lock")
            .load(document, 2)
            .expect("load")
            .expect("page 2 stored");
        assert_eq!(saved[0].text, "tbe");
    }

    #[tokio::test]
    async fn shutdown_stops_the_loop() {
        let renderer = Arc::new(FakeRenderer::default());
        let recorder = Arc::new(Recorder::default());
        let scheduler = scheduler(2, Arc::clone(&renderer), recorder)
            .build()
            .expect("build");

        scheduler.shutdown().await;
        scheduler.schedule(1, Priority::Low);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(renderer.renders().is_empty());
        assert_eq!(scheduler.status(1), PageStatus::Queued);
    }

    #[tokio::test]
    async fn invalid_config_is_rejected() {
        let renderer = Arc::new(FakeRenderer::default());
        let result = TaskScheduler::builder(1, renderer, Arc::new(FakeRecognizer))
            .config(EngineConfig {
                tile_grid: 0,
                ..Default::default()
            })
            .build();
        assert!(matches!(result, Err(LesewerkError::Config(_))));
    }
}
