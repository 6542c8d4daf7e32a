//! Bounded polling of generation jobs.
//!
//! Each job is driven through an explicit state machine:
//!
//! ```text
//! Submitted -> Polling(n) -> Ready | Failed | TimedOut | Cancelled
//! ```
//!
//! The delay between polls starts at `interval` and doubles up to
//! `max_interval`; the whole wait is bounded by `max_wait`. Transient
//! transport errors on a single poll are retried with their own backoff.

use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, info, warn};

use mvgen_common::{with_retry, CancelToken, GenerationConfig, RetryPolicy};

use crate::backend::{GeneratedAsset, GenerationBackend, JobHandle, JobStatus};

/// Where a polled job currently is.
#[derive(Debug, Clone, PartialEq)]
pub enum JobState {
    Submitted,
    Polling { attempt: u32 },
    Ready(GeneratedAsset),
    Failed(String),
    TimedOut { waited: Duration },
    Cancelled,
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Submitted | Self::Polling { .. })
    }
}

/// Drives a job to a terminal [`JobState`].
#[derive(Debug, Clone)]
pub struct JobPoller {
    pub interval: Duration,
    pub max_interval: Duration,
    pub max_wait: Duration,
    pub retry: RetryPolicy,
}

impl Default for JobPoller {
    fn default() -> Self {
        Self::from_config(&GenerationConfig::default())
    }
}

impl JobPoller {
    pub fn from_config(config: &GenerationConfig) -> Self {
        Self {
            interval: config.poll_interval(),
            max_interval: config.max_poll_interval(),
            max_wait: config.max_wait(),
            retry: RetryPolicy::new(
                config.max_retries,
                Duration::from_secs_f64(config.retry_base_delay_secs.max(0.0)),
                config.max_poll_interval(),
            ),
        }
    }

    /// Delay before poll number `attempt` (1-based).
    pub fn delay_for_poll(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1).min(31));
        self.interval
            .checked_mul(factor)
            .unwrap_or(self.max_interval)
            .min(self.max_interval)
    }

    /// Poll `job` until it reaches a terminal state.
    pub async fn wait(
        &self,
        backend: &dyn GenerationBackend,
        job: &JobHandle,
        cancel: &CancelToken,
    ) -> JobState {
        let started = Instant::now();
        let mut state = JobState::Submitted;

        loop {
            let attempt = match state {
                JobState::Submitted => 1,
                JobState::Polling { attempt } => attempt + 1,
                terminal => return terminal,
            };

            if cancel.is_cancelled() {
                info!(scene = %job.scene_id, job_id = %job.job_id, "Abandoning job after cancellation");
                return JobState::Cancelled;
            }

            let polled = tokio::select! {
                _ = cancel.cancelled() => return JobState::Cancelled,
                r = with_retry(&self.retry, "poll", |e: &crate::backend::BackendError| e.is_transient(), || backend.poll(job)) => r,
            };

            state = match polled {
                Ok(JobStatus::Ready(asset)) => {
                    info!(
                        scene = %job.scene_id,
                        job_id = %job.job_id,
                        polls = attempt,
                        waited_secs = started.elapsed().as_secs_f64(),
                        "Generation job ready"
                    );
                    JobState::Ready(asset)
                }
                Ok(JobStatus::Failed { reason }) => {
                    warn!(scene = %job.scene_id, job_id = %job.job_id, %reason, "Generation job failed");
                    JobState::Failed(reason)
                }
                Err(e) => JobState::Failed(e.to_string()),
                Ok(JobStatus::Pending { progress }) => {
                    let waited = started.elapsed();
                    if waited >= self.max_wait {
                        warn!(
                            scene = %job.scene_id,
                            job_id = %job.job_id,
                            waited_secs = waited.as_secs_f64(),
                            "Generation job timed out"
                        );
                        return JobState::TimedOut { waited };
                    }
                    let delay = self.delay_for_poll(attempt).min(self.max_wait - waited);
                    debug!(
                        scene = %job.scene_id,
                        attempt,
                        ?progress,
                        delay_ms = delay.as_millis() as u64,
                        "Job pending"
                    );
                    tokio::select! {
                        _ = cancel.cancelled() => return JobState::Cancelled,
                        _ = tokio::time::sleep(delay) => {}
                    }
                    JobState::Polling { attempt }
                }
            };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{BackendError, GenerationRequest};
    use mvgen_common::CancelHandle;
    use std::collections::VecDeque;
    use std::path::Path;
    use std::sync::Mutex;

    struct Scripted {
        replies: Mutex<VecDeque<Result<JobStatus, BackendError>>>,
        polls: Mutex<u32>,
    }

    impl Scripted {
        fn new(replies: Vec<Result<JobStatus, BackendError>>) -> Self {
            Self {
                replies: Mutex::new(replies.into()),
                polls: Mutex::new(0),
            }
        }

        fn polls(&self) -> u32 {
            *self.polls.lock().unwrap()
        }
    }

    #[async_trait::async_trait]
    impl GenerationBackend for Scripted {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn submit(&self, request: &GenerationRequest) -> Result<JobHandle, BackendError> {
            Ok(JobHandle {
                job_id: "job".to_string(),
                scene_id: request.scene_id.clone(),
            })
        }

        async fn poll(&self, _job: &JobHandle) -> Result<JobStatus, BackendError> {
            *self.polls.lock().unwrap() += 1;
            self.replies
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(Ok(JobStatus::Pending { progress: None }))
        }

        async fn fetch(&self, _asset: &GeneratedAsset, _dest: &Path) -> Result<(), BackendError> {
            Ok(())
        }
    }

    fn fast_poller(max_wait_ms: u64) -> JobPoller {
        JobPoller {
            interval: Duration::from_millis(1),
            max_interval: Duration::from_millis(4),
            max_wait: Duration::from_millis(max_wait_ms),
            retry: RetryPolicy::new(2, Duration::from_millis(1), Duration::from_millis(2)),
        }
    }

    fn job() -> JobHandle {
        JobHandle {
            job_id: "job".to_string(),
            scene_id: "intro".to_string(),
        }
    }

    #[test]
    fn test_poll_delay_backs_off_and_caps() {
        let poller = JobPoller {
            interval: Duration::from_secs(10),
            max_interval: Duration::from_secs(60),
            ..JobPoller::default()
        };
        assert_eq!(poller.delay_for_poll(1), Duration::from_secs(10));
        assert_eq!(poller.delay_for_poll(2), Duration::from_secs(20));
        assert_eq!(poller.delay_for_poll(3), Duration::from_secs(40));
        assert_eq!(poller.delay_for_poll(4), Duration::from_secs(60));
    }

    #[tokio::test]
    async fn test_ready_after_pending() {
        let backend = Scripted::new(vec![
            Ok(JobStatus::Pending { progress: Some(0.5) }),
            Ok(JobStatus::Ready(GeneratedAsset {
                location: "files/intro.mp4".to_string(),
            })),
        ]);
        let state = fast_poller(1_000)
            .wait(&backend, &job(), &CancelToken::never())
            .await;
        assert!(matches!(state, JobState::Ready(_)));
        assert_eq!(backend.polls(), 2);
    }

    #[tokio::test]
    async fn test_backend_failure_is_terminal() {
        let backend = Scripted::new(vec![Ok(JobStatus::Failed {
            reason: "nsfw".to_string(),
        })]);
        let state = fast_poller(1_000)
            .wait(&backend, &job(), &CancelToken::never())
            .await;
        assert_eq!(state, JobState::Failed("nsfw".to_string()));
    }

    #[tokio::test]
    async fn test_transient_errors_are_retried() {
        let backend = Scripted::new(vec![
            Err(BackendError::Transient("502".to_string())),
            Ok(JobStatus::Ready(GeneratedAsset {
                location: "x".to_string(),
            })),
        ]);
        let state = fast_poller(1_000)
            .wait(&backend, &job(), &CancelToken::never())
            .await;
        assert!(matches!(state, JobState::Ready(_)));
    }

    #[tokio::test]
    async fn test_permanent_error_fails_job() {
        let backend = Scripted::new(vec![Err(BackendError::Permanent("404".to_string()))]);
        let state = fast_poller(1_000)
            .wait(&backend, &job(), &CancelToken::never())
            .await;
        assert!(matches!(state, JobState::Failed(_)));
        assert_eq!(backend.polls(), 1);
    }

    #[tokio::test]
    async fn test_never_ready_times_out() {
        let backend = Scripted::new(vec![]);
        let state = fast_poller(20)
            .wait(&backend, &job(), &CancelToken::never())
            .await;
        assert!(matches!(state, JobState::TimedOut { .. }));
        assert!(state.is_terminal());
    }

    #[tokio::test]
    async fn test_cancelled_before_first_poll() {
        let backend = Scripted::new(vec![]);
        let (handle, token) = CancelHandle::new();
        handle.cancel();
        let state = fast_poller(1_000).wait(&backend, &job(), &token).await;
        assert_eq!(state, JobState::Cancelled);
        assert_eq!(backend.polls(), 0);
    }
}
