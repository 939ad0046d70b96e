/// Point-in-time view of a pool's counters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolMetrics {
    pub max_workers: usize,
    pub queue_depth: usize,
    pub idle_workers: usize,
    pub active_jobs: usize,
    pub queued_jobs: usize,
    pub submitted: usize,
    pub rejected: usize,
    pub completed: usize,
}

impl PoolMetrics {
    /// Share of workers currently executing a job.
    pub fn utilization(&self) -> f64 {
        if self.max_workers == 0 {
            return 0.0;
        }
        self.active_jobs as f64 / self.max_workers as f64
    }

    /// Share of queue capacity in use. A zero-depth queue is always full.
    pub fn queue_pressure(&self) -> f64 {
        if self.queue_depth == 0 {
            return 1.0;
        }
        self.queued_jobs as f64 / self.queue_depth as f64
    }

    pub fn rejection_rate(&self) -> f64 {
        let attempts = self.submitted + self.rejected;
        if attempts == 0 {
            return 0.0;
        }
        self.rejected as f64 / attempts as f64
    }
}
