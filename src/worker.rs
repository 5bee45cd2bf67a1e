// src/worker.rs

//! Background precomputation for stages.
//!
//! A [`BackgroundJob`] runs on its own thread. When the work finishes it
//! marks itself finished and asks the evaluator to invalidate the owning
//! stage, so the next tick picks the result up. Cancellation is
//! cooperative: the work polls its [`InterruptToken`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

use thiserror::Error;
use tracing::{debug, warn};

use crate::engine::InvalidationSender;
use crate::graph::StageId;

/// Returned from an interruption point once the job has been interrupted.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("background job interrupted")]
pub struct Interrupted;

/// Shared cancellation flag.
#[derive(Debug, Clone, Default)]
pub struct InterruptToken(Arc<AtomicBool>);

impl InterruptToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn interrupt(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_interrupted(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Interruption point: `Err(Interrupted)` once interrupted.
    pub fn checkpoint(&self) -> Result<(), Interrupted> {
        if self.is_interrupted() {
            Err(Interrupted)
        } else {
            Ok(())
        }
    }
}

/// A detached computation owned by a stage.
///
/// Dropping the job interrupts it and waits for the thread.
pub struct BackgroundJob<T: Send + 'static> {
    stage: StageId,
    label: String,
    token: InterruptToken,
    finished: Arc<Mutex<bool>>,
    handle: Option<JoinHandle<Option<T>>>,
}

impl<T: Send + 'static> BackgroundJob<T> {
    /// Start `work` on a new thread.
    ///
    /// On success the job is marked finished and an invalidation for
    /// `stage` is sent through `invalidations`.
    pub fn spawn<F>(
        stage: StageId,
        label: &str,
        invalidations: InvalidationSender,
        work: F,
    ) -> std::io::Result<Self>
    where
        F: FnOnce(&InterruptToken) -> Result<T, Interrupted> + Send + 'static,
    {
        let token = InterruptToken::new();
        let finished = Arc::new(Mutex::new(false));

        let thread_token = token.clone();
        let thread_finished = Arc::clone(&finished);
        let thread_label = label.to_string();

        let handle = thread::Builder::new()
            .name(format!("framedag-{label}"))
            .spawn(move || match work(&thread_token) {
                Ok(value) => {
                    *thread_finished.lock().unwrap_or_else(|e| e.into_inner()) = true;
                    if !invalidations.send(stage) {
                        warn!(job = %thread_label, "evaluator gone; completion not delivered");
                    }
                    debug!(job = %thread_label, "background job finished");
                    Some(value)
                }
                Err(Interrupted) => {
                    debug!(job = %thread_label, "background job interrupted");
                    None
                }
            })?;

        Ok(Self {
            stage,
            label: label.to_string(),
            token,
            finished,
            handle: Some(handle),
        })
    }

    pub fn stage(&self) -> StageId {
        self.stage
    }

    pub fn is_finished(&self) -> bool {
        *self.finished.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Request cooperative cancellation without waiting.
    pub fn interrupt(&self) {
        self.token.interrupt();
    }

    /// Wait for the thread. `None` if it was interrupted or panicked.
    pub fn join(mut self) -> Option<T> {
        self.wait()
    }

    pub fn interrupt_and_join(mut self) -> Option<T> {
        self.token.interrupt();
        self.wait()
    }

    fn wait(&mut self) -> Option<T> {
        let handle = self.handle.take()?;
        match handle.join() {
            Ok(value) => value,
            Err(_) => {
                warn!(job = %self.label, "background job panicked");
                None
            }
        }
    }
}

impl<T: Send + 'static> Drop for BackgroundJob<T> {
    fn drop(&mut self) {
        if self.handle.is_some() {
            self.token.interrupt();
            let _ = self.wait();
        }
    }
}
