//! FIFO job queue shared by the worker pool.

use std::collections::VecDeque;

use tokio::sync::{Mutex, Notify};

use crate::domain::ScrapeJob;

/// Unbounded FIFO with a soft depth limit that only applies to droppable jobs.
pub(crate) struct JobQueue {
    jobs: Mutex<VecDeque<ScrapeJob>>,
    available: Notify,
    max_depth: usize,
}

impl JobQueue {
    pub(crate) fn new(max_depth: usize) -> Self {
        Self {
            jobs: Mutex::new(VecDeque::new()),
            available: Notify::new(),
            max_depth,
        }
    }

    /// Appends a job unless it is droppable and the queue is at its depth limit.
    pub(crate) async fn try_push(&self, job: ScrapeJob) -> Result<(), ScrapeJob> {
        let mut jobs = self.jobs.lock().await;
        if job.source.is_droppable() && jobs.len() >= self.max_depth {
            return Err(job);
        }
        jobs.push_back(job);
        drop(jobs);
        self.available.notify_one();
        Ok(())
    }

    /// Appends a job regardless of depth.
    pub(crate) async fn push(&self, job: ScrapeJob) {
        self.jobs.lock().await.push_back(job);
        self.available.notify_one();
    }

    /// Waits for the next job. Cancel safe: a dropped call never loses a job.
    pub(crate) async fn pop(&self) -> ScrapeJob {
        loop {
            let notified = self.available.notified();
            if let Some(job) = self.jobs.lock().await.pop_front() {
                return job;
            }
            notified.await;
        }
    }

    /// Removes and returns every queued job.
    pub(crate) async fn drain(&self) -> Vec<ScrapeJob> {
        self.jobs.lock().await.drain(..).collect()
    }

    pub(crate) async fn len(&self) -> usize {
        self.jobs.lock().await.len()
    }
}
