//! At-most-one-in-flight execution with shared results.
//!
//! The running job is held in a slot as a [`Shared`] future; callers arriving
//! while it runs get a clone of the same future and observe the same result.
//! The job runs on its own tokio task, so it completes (and frees the slot)
//! even when every caller stops awaiting it.

use futures::future::{BoxFuture, FutureExt, Shared};
use std::future::Future;
use std::sync::{Arc, Mutex};

pub type InFlight<T> = Shared<BoxFuture<'static, T>>;

type Slot<T> = Arc<Mutex<Option<InFlight<T>>>>;

pub struct SingleFlight<T: Clone> {
    slot: Slot<T>,
}

impl<T: Clone> Clone for SingleFlight<T> {
    fn clone(&self) -> Self {
        Self {
            slot: Arc::clone(&self.slot),
        }
    }
}

impl<T: Clone + Send + Sync + 'static> Default for SingleFlight<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Clears the slot when the job's task ends, including by panic.
struct ClearOnExit<T: Clone>(Slot<T>);

impl<T: Clone> Drop for ClearOnExit<T> {
    fn drop(&mut self) {
        if let Ok(mut slot) = self.0.lock() {
            slot.take();
        }
    }
}

impl<T: Clone + Send + Sync + 'static> SingleFlight<T> {
    pub fn new() -> Self {
        Self {
            slot: Arc::new(Mutex::new(None)),
        }
    }

    /// Join the in-flight job, or start `make()` if none is running.
    pub fn run<F, Fut>(&self, make: F) -> InFlight<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T> + Send + 'static,
    {
        let mut slot = self.slot.lock().unwrap();
        if let Some(running) = slot.as_ref() {
            return running.clone();
        }
        let job = self.launch(make());
        *slot = Some(job.clone());
        job
    }

    /// Start `make()` only if nothing is running; `None` means busy.
    pub fn try_run<F, Fut>(&self, make: F) -> Option<InFlight<T>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T> + Send + 'static,
    {
        let mut slot = self.slot.lock().unwrap();
        if slot.is_some() {
            return None;
        }
        let job = self.launch(make());
        *slot = Some(job.clone());
        Some(job)
    }

    /// The in-flight job, if any.
    pub fn current(&self) -> Option<InFlight<T>> {
        self.slot.lock().unwrap().clone()
    }

    pub fn is_running(&self) -> bool {
        self.slot.lock().unwrap().is_some()
    }

    // Called with the slot lock held; the spawned task only touches the slot
    // from its exit guard, after the caller has stored the job.
    fn launch<Fut>(&self, fut: Fut) -> InFlight<T>
    where
        Fut: Future<Output = T> + Send + 'static,
    {
        let guard = ClearOnExit(Arc::clone(&self.slot));
        let handle = tokio::spawn(async move {
            let _guard = guard;
            fut.await
        });
        async move {
            match handle.await {
                Ok(value) => value,
                Err(e) => std::panic::resume_unwind(e.into_panic()),
            }
        }
        .boxed()
        .shared()
    }
}
