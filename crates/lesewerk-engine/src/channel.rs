// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Single background execution channel for CPU-bound page preprocessing.
//
// One long-lived OS thread drains an inbound job queue, so at most one
// full-resolution raster is being worked on at a time. Rasters are moved
// into the job; the caller keeps no handle to the pixels.

use std::sync::Arc;
use std::sync::mpsc;
use std::thread::JoinHandle;

use lesewerk_core::error::{LesewerkError, Result};
use lesewerk_document::{ImagePreprocessor, PageRaster, PreparedPage, PreprocessOptions};
use tokio::sync::oneshot;
use tracing::{debug, info, instrument};

/// The work run for each job on the channel thread.
pub type PreprocessFn =
    Arc<dyn Fn(PageRaster, &PreprocessOptions) -> Result<PreparedPage> + Send + Sync>;

/// The standard pipeline: [`ImagePreprocessor::run`].
pub fn default_preprocessor() -> PreprocessFn {
    Arc::new(ImagePreprocessor::run)
}

/// Wrap a closure as a [`PreprocessFn`].
pub fn preprocessor_fn<F>(f: F) -> PreprocessFn
where
    F: Fn(PageRaster, &PreprocessOptions) -> Result<PreparedPage> + Send + Sync + 'static,
{
    Arc::new(f)
}

struct Job {
    raster: PageRaster,
    options: PreprocessOptions,
    reply: oneshot::Sender<Result<PreparedPage>>,
}

/// Handle to the background preprocessing thread.
///
/// Dropping the handle closes the inbound queue; the thread exits once the
/// job it is running (if any) finishes.
pub struct ExecutionChannel {
    sender: mpsc::Sender<Job>,
    handle: JoinHandle<()>,
}

impl ExecutionChannel {
    /// Start the channel thread.
    pub fn spawn(worker: PreprocessFn) -> Result<Self> {
        let (sender, receiver) = mpsc::channel::<Job>();

        let handle = std::thread::Builder::new()
            .name("lesewerk-preprocess".into())
            .spawn(move || {
                // Block until the sender side is dropped. A panic inside the
                // worker unwinds out of this loop and drops the pending reply.
                while let Ok(job) = receiver.recv() {
                    let Job {
                        raster,
                        options,
                        reply,
                    } = job;
                    let result = worker(raster, &options);
                    if reply.send(result).is_err() {
                        debug!("preprocess caller went away before the reply");
                    }
                }
                debug!("execution channel closed");
            })
            .map_err(|e| LesewerkError::ChannelCrashed(format!("spawn thread: {e}")))?;

        info!("execution channel started");
        Ok(Self { sender, handle })
    }

    /// Whether the thread is still running.
    pub fn is_alive(&self) -> bool {
        !self.handle.is_finished()
    }

    /// Move `raster` onto the channel thread and await the prepared page.
    ///
    /// Returns `ChannelClosed` if the thread is already gone, and
    /// `ChannelCrashed` if it died while holding this job.
    #[instrument(skip_all, fields(width = raster.width(), height = raster.height()))]
    pub async fn preprocess(
        &self,
        raster: PageRaster,
        options: PreprocessOptions,
    ) -> Result<PreparedPage> {
        let (reply, response) = oneshot::channel();
        self.sender
            .send(Job {
                raster,
                options,
                reply,
            })
            .map_err(|_| LesewerkError::ChannelClosed)?;

        response.await.map_err(|_| {
            LesewerkError::ChannelCrashed("worker exited before replying".into())
        })?
    }
}
