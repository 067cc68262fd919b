//! Retryable unit of work.
//!
//! A job runs as an explicit state machine:
//!
//! ```text
//! Pending ─► Running{1} ─┬─► Succeeded
//!                        ├─► FailedRetrying{1, 1s} ─► Running{2} ─┬─► ...
//!                        └─► FailedTerminal (after max_retries)   │
//! ```
//!
//! `max_retries` counts runs after the first: with the default of 3 the
//! work runs at most four times, sleeping 1s, 2s and then 4s between runs
//! (`base * 2^(failed - 1)`). Every error is retried; the last one is
//! returned inside [`RetryExhausted`].
//!
//! Sleeping goes through the [`Sleeper`] trait so tests can record delays
//! instead of waiting for them.

use crate::config::RetryConfig;
use std::time::Duration;
use thiserror::Error;

/// Lifecycle of one retryable job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Pending,
    Running { attempt: u32 },
    FailedRetrying { attempt: u32, delay: Duration },
    Succeeded { attempts: u32 },
    FailedTerminal { attempts: u32 },
}

/// Bounded exponential backoff.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(1),
        }
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            base_delay: Duration::from_secs(config.base_delay_secs),
        }
    }
}

impl RetryPolicy {
    /// Most runs a job gets, the first included.
    pub fn max_runs(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// Delay before the next run, after `failed` runs have failed.
    ///
    /// # Examples
    /// ```
    /// # use photo_compose::task::RetryPolicy;
    /// # use std::time::Duration;
    /// let p = RetryPolicy::default();
    /// assert_eq!(p.delay_after(1), Duration::from_secs(1));
    /// assert_eq!(p.delay_after(2), Duration::from_secs(2));
    /// assert_eq!(p.delay_after(3), Duration::from_secs(4));
    /// ```
    pub fn delay_after(&self, failed: u32) -> Duration {
        let exponent = failed.saturating_sub(1).min(31);
        self.base_delay.saturating_mul(1u32 << exponent)
    }
}

/// Blocks the current thread between attempts.
pub trait Sleeper: Send + Sync {
    fn sleep(&self, delay: Duration);
}

/// Real sleeping via `std::thread::sleep`.
#[derive(Debug, Default, Clone, Copy)]
pub struct ThreadSleeper;

impl Sleeper for ThreadSleeper {
    fn sleep(&self, delay: Duration) {
        std::thread::sleep(delay);
    }
}

/// All attempts failed.
#[derive(Error, Debug)]
#[error("gave up after {attempts} attempt(s): {last_error}")]
pub struct RetryExhausted<E: std::error::Error + 'static> {
    pub attempts: u32,
    #[source]
    pub last_error: E,
}

/// A unit of work wrapped in the retry state machine.
#[derive(Debug)]
pub struct RetryableJob {
    policy: RetryPolicy,
    state: JobState,
    history: Vec<JobState>,
}

impl RetryableJob {
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            state: JobState::Pending,
            history: vec![JobState::Pending],
        }
    }

    pub fn state(&self) -> JobState {
        self.state
    }

    /// Every state visited, in order.
    pub fn history(&self) -> &[JobState] {
        &self.history
    }

    fn transition(&mut self, next: JobState) {
        tracing::debug!(from = ?self.state, to = ?next, "job state");
        self.state = next;
        self.history.push(next);
    }

    /// Run `work` until it succeeds or the attempts are used up.
    ///
    /// `work` receives the 1-based attempt number.
    pub fn run<T, E>(
        &mut self,
        sleeper: &dyn Sleeper,
        mut work: impl FnMut(u32) -> Result<T, E>,
    ) -> Result<T, RetryExhausted<E>>
    where
        E: std::error::Error + 'static,
    {
        let mut attempt = 0;
        loop {
            attempt += 1;
            self.transition(JobState::Running { attempt });
            match work(attempt) {
                Ok(value) => {
                    self.transition(JobState::Succeeded { attempts: attempt });
                    return Ok(value);
                }
                Err(e) if attempt > self.policy.max_retries => {
                    tracing::error!(attempt, error = %e, "job failed, no attempts left");
                    self.transition(JobState::FailedTerminal { attempts: attempt });
                    return Err(RetryExhausted {
                        attempts: attempt,
                        last_error: e,
                    });
                }
                Err(e) => {
                    let delay = self.policy.delay_after(attempt);
                    tracing::warn!(
                        attempt,
                        max_runs = self.policy.max_runs(),
                        delay_secs = delay.as_secs_f64(),
                        error = %e,
                        "job attempt failed, retrying"
                    );
                    self.transition(JobState::FailedRetrying { attempt, delay });
                    sleeper.sleep(delay);
                }
            }
        }
    }
}

#[cfg(test)]
pub mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Records requested delays without sleeping.
    #[derive(Default)]
    pub struct RecordingSleeper {
        pub delays: Mutex<Vec<Duration>>,
    }

    impl RecordingSleeper {
        pub fn recorded(&self) -> Vec<Duration> {
            self.delays.lock().unwrap().clone()
        }
    }

    impl Sleeper for RecordingSleeper {
        fn sleep(&self, delay: Duration) {
            self.delays.lock().unwrap().push(delay);
        }
    }

    #[derive(Debug, Error)]
    #[error("transient failure {0}")]
    struct Transient(u32);

    #[test]
    fn always_failing_runs_every_retry() {
        let sleeper = RecordingSleeper::default();
        let mut job = RetryableJob::new(RetryPolicy::default());
        let mut calls = 0;
        let err = job
            .run(&sleeper, |attempt| -> Result<(), Transient> {
                calls += 1;
                Err(Transient(attempt))
            })
            .unwrap_err();

        assert_eq!(calls, 4);
        assert_eq!(err.attempts, 4);
        assert_eq!(err.last_error.0, 4);
        assert_eq!(
            sleeper.recorded(),
            vec![
                Duration::from_secs(1),
                Duration::from_secs(2),
                Duration::from_secs(4)
            ]
        );
        assert_eq!(job.state(), JobState::FailedTerminal { attempts: 4 });
    }

    #[test]
    fn success_after_retry() {
        let sleeper = RecordingSleeper::default();
        let mut job = RetryableJob::new(RetryPolicy::default());
        let value = job
            .run(&sleeper, |attempt| {
                if attempt < 2 {
                    Err(Transient(attempt))
                } else {
                    Ok("done")
                }
            })
            .unwrap();

        assert_eq!(value, "done");
        assert_eq!(sleeper.recorded(), vec![Duration::from_secs(1)]);
        assert_eq!(
            job.history(),
            &[
                JobState::Pending,
                JobState::Running { attempt: 1 },
                JobState::FailedRetrying {
                    attempt: 1,
                    delay: Duration::from_secs(1)
                },
                JobState::Running { attempt: 2 },
                JobState::Succeeded { attempts: 2 },
            ]
        );
    }

    #[test]
    fn first_try_success_never_sleeps() {
        let sleeper = RecordingSleeper::default();
        let mut job = RetryableJob::new(RetryPolicy::default());
        job.run(&sleeper, |_| Ok::<_, Transient>(())).unwrap();
        assert!(sleeper.recorded().is_empty());
    }

    #[test]
    fn zero_retry_policy_runs_once() {
        let sleeper = RecordingSleeper::default();
        let policy = RetryPolicy {
            max_retries: 0,
            ..RetryPolicy::default()
        };
        let mut job = RetryableJob::new(policy);
        assert!(job.run(&sleeper, |a| Err::<(), _>(Transient(a))).is_err());
        assert!(sleeper.recorded().is_empty());
    }

    #[test]
    fn policy_from_config() {
        let config = RetryConfig {
            max_retries: 5,
            base_delay_secs: 3,
        };
        let policy = RetryPolicy::from(&config);
        assert_eq!(policy.max_runs(), 6);
        assert_eq!(policy.delay_after(3), Duration::from_secs(12));
    }
}
