//! Queue worker: claims jobs, runs them under retry, records the outcome.
//!
//! ```text
//! claim_next ─► RetryableJob::run(Composer) ─┬─► complete        (Succeeded)
//!                                            └─► fail + error!   (FailedTerminal)
//! ```
//!
//! Jobs are processed one after another; the parallelism lives inside a
//! job (per-layer transforms on the rayon pool).

use crate::pipeline::{ComposeError, Composer, Delivery};
use crate::queue::{Job, QueueError, QueuedJob, SpoolQueue};
use crate::task::{RetryExhausted, RetryPolicy, RetryableJob, Sleeper};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use uuid::Uuid;

/// Longest single sleep while watching; the stop flag is checked between slices.
const STOP_CHECK: Duration = Duration::from_secs(1);

/// Result of one drained job.
#[derive(Debug)]
pub enum JobOutcome {
    Delivered { id: Uuid, delivery: Delivery, attempts: u32 },
    Failed { id: Uuid, error: String, attempts: u32 },
}

impl JobOutcome {
    pub fn id(&self) -> Uuid {
        match self {
            JobOutcome::Delivered { id, .. } | JobOutcome::Failed { id, .. } => *id,
        }
    }
}

/// Everything one drain pass did, in processing order.
#[derive(Debug, Default)]
pub struct DrainReport {
    pub outcomes: Vec<JobOutcome>,
}

impl DrainReport {
    pub fn delivered(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| matches!(o, JobOutcome::Delivered { .. }))
            .count()
    }

    pub fn failed(&self) -> usize {
        self.outcomes.len() - self.delivered()
    }
}

pub struct Worker<'a> {
    pub composer: Composer<'a>,
    pub policy: RetryPolicy,
    pub sleeper: &'a dyn Sleeper,
}

impl Worker<'_> {
    /// Run one job with retries; nothing is written to the spool.
    pub fn run_job(&self, job: &Job) -> Result<(Delivery, u32), RetryExhausted<ComposeError>> {
        let mut task = RetryableJob::new(self.policy);
        let mut attempts = 0;
        let delivery = task.run(self.sleeper, |attempt| {
            attempts = attempt;
            match job {
                Job::Compose(request) => self.composer.run(request),
                Job::ComposeSeparator(request) => self.composer.run_separator(request),
            }
        })?;
        Ok((delivery, attempts))
    }

    /// Run a claimed job and move it to its final spool state.
    #[tracing::instrument(skip_all, fields(id = %queued.id, kind = queued.job.kind()))]
    pub fn process(&self, queue: &SpoolQueue, queued: QueuedJob) -> Result<JobOutcome, QueueError> {
        match self.run_job(&queued.job) {
            Ok((delivery, attempts)) => {
                queue.complete(&queued)?;
                tracing::info!(attempts, destination = %delivery.destination, "job done");
                Ok(JobOutcome::Delivered {
                    id: queued.id,
                    delivery,
                    attempts,
                })
            }
            Err(exhausted) => {
                let error = exhausted.last_error.to_string();
                tracing::error!(
                    attempts = exhausted.attempts,
                    destination = %queued.job.destination(),
                    error = %error,
                    "job failed permanently"
                );
                queue.fail(&queued, &error)?;
                Ok(JobOutcome::Failed {
                    id: queued.id,
                    error,
                    attempts: exhausted.attempts,
                })
            }
        }
    }

    /// Process pending jobs until the spool is empty.
    #[tracing::instrument(skip_all, fields(spool = %queue.root().display()))]
    pub fn drain(&self, queue: &SpoolQueue) -> Result<DrainReport, QueueError> {
        let mut report = DrainReport::default();
        while let Some(queued) = queue.claim_next()? {
            report.outcomes.push(self.process(queue, queued)?);
        }
        tracing::info!(
            delivered = report.delivered(),
            failed = report.failed(),
            "spool drained"
        );
        Ok(report)
    }

    /// Drain, then poll every `interval` until `stop` is set.
    pub fn watch(
        &self,
        queue: &SpoolQueue,
        interval: Duration,
        stop: &AtomicBool,
    ) -> Result<DrainReport, QueueError> {
        let mut total = DrainReport::default();
        tracing::info!(interval_secs = interval.as_secs_f64(), "watching spool");
        while !stop.load(Ordering::Relaxed) {
            let report = self.drain(queue)?;
            total.outcomes.extend(report.outcomes);
            self.pause(interval, stop);
        }
        tracing::info!("watch stopped");
        Ok(total)
    }

    fn pause(&self, interval: Duration, stop: &AtomicBool) {
        let mut left = interval;
        while !left.is_zero() && !stop.load(Ordering::Relaxed) {
            let step = left.min(STOP_CHECK);
            self.sleeper.sleep(step);
            left -= step;
        }
    }
}
