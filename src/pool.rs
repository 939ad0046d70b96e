use super::{
    errors::PoolError,
    job::{Job, Outcome},
    model::PoolMetrics,
    session::CallSession,
};
use std::{
    future::Future,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
};
use crossbeam::deque::{Injector, Steal};
use parking_lot::RwLock;
use tokio::{
    sync::Notify,
    time::Duration,
};
use tokio_util::{
    sync::CancellationToken,
    task::TaskTracker,
};


/// Pool configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Config {
    /// Upper bound on job functions running at the same time, pool-wide.
    pub max_workers: usize,
    /// Upper bound on admitted jobs still waiting for a worker, shared by all
    /// callers. Zero refuses every non-empty batch.
    pub queue_depth: usize,
}

impl Default for Config {
    fn default() -> Self {
        let num_cpus = num_cpus::get();
        Self {
            max_workers: num_cpus * 2, // work is usually I/O-bound
            queue_depth: num_cpus * 20,
        }
    }
}

impl Config {
    pub fn cpu_bound() -> Self {
        let num_cpus = num_cpus::get();
        Self {
            max_workers: num_cpus,
            queue_depth: num_cpus * 10,
        }
    }

    pub fn io_bound() -> Self {
        let num_cpus = num_cpus::get();
        Self {
            max_workers: num_cpus * 2,
            queue_depth: num_cpus * 50,
        }
    }

    pub fn validate(&self) -> Result<(), PoolError> {
        if self.max_workers == 0 {
            return Err(PoolError::InvalidConfig {
                reason: "max_workers must be greater than zero".into(),
            });
        }
        Ok(())
    }
}


pub type SharedPool = Arc<Pool>;

/// A fixed set of workers draining a bounded job queue.
///
/// Each [`run_jobs`](Pool::run_jobs) call fans its payloads out into the
/// queue and returns on the first hit or error. Admission never waits: a
/// batch that does not fit is refused with [`PoolError::QueueFull`].
///
/// Workers are tokio tasks, so the pool must be built inside a runtime.
/// Dropping the pool shuts it down.
pub struct Pool {
    shared: Arc<Shared>,
    workers: TaskTracker,
    config: Config,
}

impl Pool {
    pub fn new(max_workers: usize, queue_depth: usize) -> Result<Self, PoolError> {
        Self::with_config(Config {
            max_workers,
            queue_depth,
        })
    }

    pub fn with_config(config: Config) -> Result<Self, PoolError> {
        config.validate()?;
        let runtime = tokio::runtime::Handle::try_current().map_err(|_| PoolError::NoRuntime)?;

        let shared = Arc::new(Shared::new(&config));
        let workers = TaskTracker::new();

        for worker_id in 0..config.max_workers {
            let shared = Arc::clone(&shared);
            workers.spawn_on(shared.worker_loop(worker_id), &runtime);
        }
        // The worker set is fixed from here; `join` resolves once they all exit.
        workers.close();

        tracing::debug!(
            max_workers = config.max_workers,
            queue_depth = config.queue_depth,
            "pool started"
        );

        Ok(Self {
            shared,
            workers,
            config,
        })
    }

    /// Runs `work` over every payload and returns the first hit or error.
    ///
    /// Returns `Ok(None)` when every job missed, including for an empty batch.
    /// Work errors come back verbatim; admission failures arrive as
    /// [`PoolError::QueueFull`] or [`PoolError::Closed`] through `E::from`.
    /// Jobs still running when this returns are left to finish unobserved.
    pub async fn run_jobs<P, T, E, F, Fut>(&self, payloads: Vec<P>, work: F) -> Outcome<T, E>
    where
        P: Send + 'static,
        T: Send + 'static,
        E: From<PoolError> + Send + 'static,
        F: Fn(P) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Outcome<T, E>> + Send + 'static,
    {
        let never = CancellationToken::new();
        self.run_jobs_until(payloads, work, &never).await
    }

    /// Same as [`run_jobs`](Pool::run_jobs), but stops listening with
    /// [`PoolError::Cancelled`] once `cancel` fires. Submitted jobs still run.
    pub async fn run_jobs_until<P, T, E, F, Fut>(
        &self,
        payloads: Vec<P>,
        work: F,
        cancel: &CancellationToken,
    ) -> Outcome<T, E>
    where
        P: Send + 'static,
        T: Send + 'static,
        E: From<PoolError> + Send + 'static,
        F: Fn(P) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Outcome<T, E>> + Send + 'static,
    {
        let work = Arc::new(work);
        CallSession::run(
            self,
            payloads,
            |payload, sink| Job::new(payload, Arc::clone(&work), sink),
            cancel,
        )
        .await
    }

    /// [`run_jobs`](Pool::run_jobs) for synchronous work.
    pub async fn run_blocking_jobs<P, T, E, F>(&self, payloads: Vec<P>, work: F) -> Outcome<T, E>
    where
        P: Send + 'static,
        T: Send + 'static,
        E: From<PoolError> + Send + 'static,
        F: Fn(P) -> Outcome<T, E> + Send + Sync + 'static,
    {
        let work = Arc::new(work);
        let never = CancellationToken::new();
        CallSession::run(
            self,
            payloads,
            |payload, sink| Job::blocking(payload, Arc::clone(&work), sink),
            &never,
        )
        .await
    }

    /// Checks that `requested` more jobs would currently fit in the queue.
    pub(crate) fn ensure_room(&self, requested: usize) -> Result<(), PoolError> {
        let queued = self.shared.queued.load(Ordering::Acquire);
        if queued.saturating_add(requested) > self.shared.queue_depth {
            return Err(self.shared.reject(requested));
        }
        Ok(())
    }

    #[inline]
    pub(crate) fn submit(&self, job: Job) -> Result<(), PoolError> {
        self.shared.submit(job)
    }

    /// Stops admission. Queued and running jobs still complete, then the
    /// workers exit. Calling it again does nothing.
    pub fn shutdown(&self) {
        let _gate = self.shared.admission.write();
        if self.shared.shutdown.is_cancelled() {
            return;
        }
        self.shared.shutdown.cancel();

        tracing::debug!(
            queued = self.shared.queued.load(Ordering::Relaxed),
            active = self.shared.active_jobs.load(Ordering::Relaxed),
            "pool shutting down"
        );
    }

    /// Waits for every worker to exit. Only resolves after [`shutdown`](Pool::shutdown).
    pub async fn join(&self) {
        self.workers.wait().await;
    }

    pub async fn join_timeout(&self, timeout: Duration) -> bool {
        tokio::time::timeout(timeout, self.join()).await.is_ok()
    }

    pub async fn shutdown_and_join(&self) {
        self.shutdown();
        self.join().await;
    }

    #[inline]
    pub fn is_closed(&self) -> bool {
        self.shared.shutdown.is_cancelled()
    }

    #[inline]
    pub fn config(&self) -> &Config {
        &self.config
    }

    #[inline]
    pub fn metrics(&self) -> PoolMetrics {
        let shared = &self.shared;
        PoolMetrics {
            max_workers: shared.max_workers,
            queue_depth: shared.queue_depth,
            idle_workers: shared.idle_workers.load(Ordering::Relaxed),
            active_jobs: shared.active_jobs.load(Ordering::Relaxed),
            queued_jobs: shared.queued.load(Ordering::Relaxed),
            submitted: shared.submitted.load(Ordering::Relaxed),
            rejected: shared.rejected.load(Ordering::Relaxed),
            completed: shared.completed.load(Ordering::Relaxed),
        }
    }
}

impl Drop for Pool {
    fn drop(&mut self) {
        self.shutdown();
    }
}


/// State shared between the pool handle and its workers.
struct Shared {
    queue: Injector<Job>,
    queue_depth: usize,
    max_workers: usize,
    wakeup: Notify,
    shutdown: CancellationToken,
    // Submitters hold it shared while checking the flag and pushing; shutdown
    // takes it exclusively, so no push can land after workers saw closed+empty.
    admission: RwLock<()>,
    // Admitted jobs not yet picked up by a worker.
    queued: AtomicUsize,
    idle_workers: AtomicUsize,
    active_jobs: AtomicUsize,
    submitted: AtomicUsize,
    rejected: AtomicUsize,
    completed: AtomicUsize,
}

impl Shared {
    fn new(config: &Config) -> Self {
        Self {
            queue: Injector::new(),
            queue_depth: config.queue_depth,
            max_workers: config.max_workers,
            wakeup: Notify::new(),
            shutdown: CancellationToken::new(),
            admission: RwLock::new(()),
            queued: AtomicUsize::new(0),
            idle_workers: AtomicUsize::new(0),
            active_jobs: AtomicUsize::new(0),
            submitted: AtomicUsize::new(0),
            rejected: AtomicUsize::new(0),
            completed: AtomicUsize::new(0),
        }
    }

    fn submit(&self, job: Job) -> Result<(), PoolError> {
        let _gate = self.admission.read();
        if self.shutdown.is_cancelled() {
            self.rejected.fetch_add(1, Ordering::Relaxed);
            return Err(PoolError::Closed);
        }

        let reserved = self
            .queued
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |queued| {
                (queued < self.queue_depth).then_some(queued + 1)
            });
        if reserved.is_err() {
            return Err(self.reject(1));
        }

        self.queue.push(job);
        self.submitted.fetch_add(1, Ordering::Relaxed);
        self.wakeup.notify_one();
        Ok(())
    }

    #[cold]
    fn reject(&self, requested: usize) -> PoolError {
        self.rejected.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(depth = self.queue_depth, requested, "job admission rejected");
        PoolError::QueueFull {
            depth: self.queue_depth,
            requested,
        }
    }

    #[inline]
    fn pop(&self) -> Option<Job> {
        let job = std::iter::repeat_with(|| self.queue.steal())
            .find(|steal| !steal.is_retry())
            .and_then(Steal::success)?;
        self.queued.fetch_sub(1, Ordering::AcqRel);
        Some(job)
    }

    async fn worker_loop(self: Arc<Self>, worker_id: usize) {
        tracing::trace!(worker_id, "worker started");

        loop {
            if let Some(job) = self.pop() {
                self.active_jobs.fetch_add(1, Ordering::Relaxed);
                job.run().await;
                self.active_jobs.fetch_sub(1, Ordering::Relaxed);
                self.completed.fetch_add(1, Ordering::Relaxed);
                continue;
            }

            if self.shutdown.is_cancelled() {
                // Nothing new can be admitted; leave once the backlog is gone.
                if self.queue.is_empty() {
                    break;
                }
                continue;
            }

            // Register for a wakeup before the last look at the queue, so a
            // push landing in between is not missed.
            let wakeup = self.wakeup.notified();
            tokio::pin!(wakeup);
            wakeup.as_mut().enable();
            if !self.queue.is_empty() {
                continue;
            }

            self.idle_workers.fetch_add(1, Ordering::Relaxed);
            tokio::select! {
                _ = wakeup => {}
                _ = self.shutdown.cancelled() => {}
            }
            self.idle_workers.fetch_sub(1, Ordering::Relaxed);
        }

        tracing::trace!(worker_id, "worker stopped");
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    fn gated_job(
        release: &CancellationToken,
        sink: &mpsc::Sender<Outcome<(), PoolError>>,
    ) -> Job {
        let release = release.clone();
        let work = move |_: u32| {
            let release = release.clone();
            async move {
                release.cancelled().await;
                Ok(None)
            }
        };
        Job::new(0, Arc::new(work), sink.clone())
    }

    #[tokio::test]
    async fn submit_refuses_without_waiting() {
        let pool = Pool::new(1, 2).unwrap();
        let release = CancellationToken::new();
        let (sink, mut results) = mpsc::channel(8);

        pool.submit(gated_job(&release, &sink)).unwrap();
        while pool.metrics().active_jobs == 0 {
            tokio::task::yield_now().await;
        }

        // The single worker is busy: two jobs may wait, the third may not.
        pool.submit(gated_job(&release, &sink)).unwrap();
        pool.submit(gated_job(&release, &sink)).unwrap();
        assert_eq!(
            pool.submit(gated_job(&release, &sink)).unwrap_err(),
            PoolError::QueueFull { depth: 2, requested: 1 }
        );
        assert_eq!(pool.metrics().queued_jobs, 2);

        pool.shutdown();
        assert_eq!(pool.submit(gated_job(&release, &sink)).unwrap_err(), PoolError::Closed);

        release.cancel();
        pool.join().await;

        for _ in 0..3 {
            assert_eq!(results.recv().await, Some(Ok(None)));
        }
        let metrics = pool.metrics();
        assert_eq!(metrics.submitted, 3);
        assert_eq!(metrics.completed, 3);
        assert_eq!(metrics.rejected, 2);
        assert_eq!(metrics.queued_jobs, 0);
    }

    #[tokio::test]
    async fn failed_submit_mid_batch_leaves_earlier_jobs_running() {
        let pool = Pool::new(1, 3).unwrap();
        let release = CancellationToken::new();
        let (other_sink, _other_results) = mpsc::channel(4);
        let ran = Arc::new(AtomicUsize::new(0));

        let counter = ran.clone();
        let work = Arc::new(move |_: u32| {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(None)
            }
        });

        let never = CancellationToken::new();
        let result: Outcome<(), PoolError> = CallSession::run(
            &pool,
            vec![0u32, 1],
            |payload, sink| {
                if payload == 1 {
                    // Another caller grabs the last two slots before this submit.
                    pool.submit(gated_job(&release, &other_sink)).unwrap();
                    pool.submit(gated_job(&release, &other_sink)).unwrap();
                }
                Job::new(payload, Arc::clone(&work), sink)
            },
            &never,
        )
        .await;

        assert_eq!(result, Err(PoolError::QueueFull { depth: 3, requested: 1 }));

        // The first job outlives its call and deposits into a dropped channel.
        release.cancel();
        pool.shutdown();
        assert!(pool.join_timeout(Duration::from_secs(5)).await, "workers did not drain");
        assert_eq!(ran.load(Ordering::SeqCst), 1);

        let metrics = pool.metrics();
        assert_eq!(metrics.submitted, 3);
        assert_eq!(metrics.completed, 3);
        assert_eq!(metrics.rejected, 1);
    }

    #[tokio::test]
    async fn ensure_room_counts_waiting_jobs() {
        let pool = Pool::new(1, 3).unwrap();
        assert!(pool.ensure_room(3).is_ok());
        assert_eq!(
            pool.ensure_room(4).unwrap_err(),
            PoolError::QueueFull { depth: 3, requested: 4 }
        );
    }

    #[test]
    fn zero_workers_is_rejected() {
        let err = Config { max_workers: 0, queue_depth: 10 }.validate().unwrap_err();
        assert!(matches!(err, PoolError::InvalidConfig { .. }));
    }

    #[test]
    fn building_outside_a_runtime_fails() {
        assert_eq!(Pool::new(1, 1).err(), Some(PoolError::NoRuntime));
    }
}
