//! Bounded worker scheduler with back-pressure and a join barrier.
//!
//! At most `capacity` jobs run at once; [`WorkerScheduler::submit`] waits for
//! a free slot instead of spawning unbounded work. Jobs run in no particular
//! order and share nothing through the scheduler.
//!
//! Failure policy: the first job error is kept and trips the scheduler's
//! cancellation token. From then on `submit` refuses new work, jobs already
//! running finish, and [`WorkerScheduler::wait_until_finish`] returns the
//! first error once they have drained.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::CollectorError;

pub struct WorkerScheduler {
    capacity: usize,
    permits: Arc<Semaphore>,
    tasks: Mutex<JoinSet<()>>,
    failure: Arc<Mutex<Option<CollectorError>>>,
    cancel: CancellationToken,
    submitted: AtomicU64,
    completed: Arc<AtomicU64>,
}

impl WorkerScheduler {
    /// Create a scheduler running at most `capacity` jobs concurrently.
    pub fn new(capacity: usize) -> Self {
        Self::build(capacity, CancellationToken::new())
    }

    /// Create a scheduler that stops dispatching when `parent` is cancelled.
    pub fn with_cancellation(capacity: usize, parent: &CancellationToken) -> Self {
        Self::build(capacity, parent.child_token())
    }

    fn build(capacity: usize, cancel: CancellationToken) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            permits: Arc::new(Semaphore::new(capacity)),
            tasks: Mutex::new(JoinSet::new()),
            failure: Arc::new(Mutex::new(None)),
            cancel,
            submitted: AtomicU64::new(0),
            completed: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of jobs accepted so far.
    pub fn submitted(&self) -> u64 {
        self.submitted.load(Ordering::Relaxed)
    }

    /// Number of accepted jobs that have finished (success or failure).
    pub fn completed(&self) -> u64 {
        self.completed.load(Ordering::Relaxed)
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Stop dispatching new jobs. Running jobs are left to finish.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Enqueue a job, waiting for a free slot when the pool is saturated.
    ///
    /// Returns an error without running `job` if the scheduler was cancelled
    /// or an earlier job failed.
    pub async fn submit<F, Fut>(&self, job: F) -> Result<(), CollectorError>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), CollectorError>> + Send + 'static,
    {
        self.ensure_open()?;

        let permit = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return Err(self.closed_error()),
            permit = Arc::clone(&self.permits).acquire_owned() => {
                permit.map_err(|_| CollectorError::Cancelled)?
            }
        };

        // A job may have failed while we were waiting for the slot.
        self.ensure_open()?;

        let failure = Arc::clone(&self.failure);
        let cancel = self.cancel.clone();
        let completed = Arc::clone(&self.completed);
        let seq = self.submitted.fetch_add(1, Ordering::Relaxed) + 1;

        let mut tasks = self.tasks.lock().unwrap_or_else(|e| e.into_inner());
        tasks.spawn(async move {
            let _permit = permit;
            let result = job().await;
            completed.fetch_add(1, Ordering::Relaxed);
            if let Err(e) = result {
                debug!(job = seq, error = %e, "scheduled job failed");
                record_failure(&failure, &cancel, e);
            }
        });
        Ok(())
    }

    /// Block until every submitted job has completed.
    ///
    /// Returns the first job error, or `Cancelled` if the scheduler was
    /// cancelled from outside. Returns immediately when nothing was submitted.
    pub async fn wait_until_finish(&self) -> Result<(), CollectorError> {
        loop {
            let mut batch = {
                let mut tasks = self.tasks.lock().unwrap_or_else(|e| e.into_inner());
                std::mem::take(&mut *tasks)
            };
            if batch.is_empty() {
                break;
            }
            while let Some(joined) = batch.join_next().await {
                if let Err(e) = joined {
                    warn!(error = %e, "scheduled job panicked or was aborted");
                    record_failure(&self.failure, &self.cancel, CollectorError::Job(e.to_string()));
                }
            }
        }

        let failure = self.failure.lock().unwrap_or_else(|e| e.into_inner()).take();
        match failure {
            Some(e) => Err(e),
            None if self.cancel.is_cancelled() => Err(CollectorError::Cancelled),
            None => Ok(()),
        }
    }

    fn ensure_open(&self) -> Result<(), CollectorError> {
        if self.cancel.is_cancelled() {
            Err(self.closed_error())
        } else {
            Ok(())
        }
    }

    fn closed_error(&self) -> CollectorError {
        match self.failure.lock().unwrap_or_else(|e| e.into_inner()).as_ref() {
            Some(first) => CollectorError::Aborted(first.to_string()),
            None => CollectorError::Cancelled,
        }
    }
}

fn record_failure(
    slot: &Mutex<Option<CollectorError>>,
    cancel: &CancellationToken,
    err: CollectorError,
) {
    let mut slot = slot.lock().unwrap_or_else(|e| e.into_inner());
    if slot.is_none() {
        *slot = Some(err);
    }
    cancel.cancel();
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    #[tokio::test]
    async fn wait_with_no_jobs_returns_immediately() {
        let scheduler = WorkerScheduler::new(4);
        scheduler.wait_until_finish().await.unwrap();
        assert_eq!(scheduler.submitted(), 0);
    }

    #[tokio::test]
    async fn all_jobs_complete_before_wait_returns() {
        let scheduler = WorkerScheduler::new(3);
        let done = Arc::new(AtomicUsize::new(0));
        for _ in 0..20 {
            let done = Arc::clone(&done);
            scheduler
                .submit(move || async move {
                    tokio::time::sleep(Duration::from_millis(5)).await;
                    done.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                })
                .await
                .unwrap();
        }
        scheduler.wait_until_finish().await.unwrap();
        assert_eq!(done.load(Ordering::SeqCst), 20);
        assert_eq!(scheduler.completed(), 20);
    }

    #[tokio::test]
    async fn concurrency_never_exceeds_capacity() {
        let scheduler = WorkerScheduler::new(2);
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        for _ in 0..10 {
            let running = Arc::clone(&running);
            let peak = Arc::clone(&peak);
            scheduler
                .submit(move || async move {
                    let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(10)).await;
                    running.fetch_sub(1, Ordering::SeqCst);
                    Ok(())
                })
                .await
                .unwrap();
        }
        scheduler.wait_until_finish().await.unwrap();
        assert!(peak.load(Ordering::SeqCst) <= 2);
        assert_eq!(peak.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn first_error_is_reported_and_new_work_refused() {
        let scheduler = WorkerScheduler::new(1);
        scheduler
            .submit(|| async { Err(CollectorError::Job("boom".into())) })
            .await
            .unwrap();

        // The single slot frees once the failing job is done; the next submit
        // then sees the recorded failure.
        let ran = Arc::new(AtomicUsize::new(0));
        let ran2 = Arc::clone(&ran);
        let second = scheduler
            .submit(move || async move {
                ran2.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .await;
        assert!(matches!(second, Err(CollectorError::Aborted(msg)) if msg.contains("boom")));
        assert_eq!(ran.load(Ordering::SeqCst), 0);

        let err = scheduler.wait_until_finish().await.unwrap_err();
        assert!(matches!(err, CollectorError::Job(msg) if msg == "boom"));
    }

    #[tokio::test]
    async fn in_flight_jobs_finish_after_failure() {
        let scheduler = WorkerScheduler::new(2);
        let finished = Arc::new(AtomicUsize::new(0));
        let f = Arc::clone(&finished);
        scheduler
            .submit(move || async move {
                tokio::time::sleep(Duration::from_millis(30)).await;
                f.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .await
            .unwrap();
        scheduler
            .submit(|| async { Err(CollectorError::Job("early".into())) })
            .await
            .unwrap();

        assert!(scheduler.wait_until_finish().await.is_err());
        assert_eq!(finished.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn external_cancellation_stops_dispatch() {
        let parent = CancellationToken::new();
        let scheduler = WorkerScheduler::with_cancellation(2, &parent);
        scheduler.submit(|| async { Ok(()) }).await.unwrap();
        parent.cancel();

        let refused = scheduler.submit(|| async { Ok(()) }).await;
        assert!(matches!(refused, Err(CollectorError::Cancelled)));
        assert!(matches!(
            scheduler.wait_until_finish().await,
            Err(CollectorError::Cancelled)
        ));
        assert_eq!(scheduler.submitted(), 1);
    }

    #[tokio::test]
    async fn zero_capacity_is_clamped_to_one() {
        let scheduler = WorkerScheduler::new(0);
        assert_eq!(scheduler.capacity(), 1);
        scheduler.submit(|| async { Ok(()) }).await.unwrap();
        scheduler.wait_until_finish().await.unwrap();
    }
}
