//! Reliable HTTP notification dispatch (C7) — a bounded queue with
//! drop-oldest overflow, drained by a worker that retries failed deliveries
//! with exponential backoff.
//!
//! A job that fails delivery is stamped with `not_before` and re-queued
//! immediately rather than handed to a separate timer task — it keeps
//! occupying a queue slot while it waits out its backoff, so a sustained
//! outage fills the queue with retrying jobs and trips the same
//! drop-oldest path as a burst of fresh ones, instead of growing without
//! bound off to the side.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{broadcast, Mutex, Notify};

use crate::notify::{Auth, NotificationJob};

/// Shared handle to the dispatch queue. Cheap to clone — wraps an `Arc`.
#[derive(Clone)]
pub struct DispatchQueue {
    inner: Arc<Inner>,
}

struct Inner {
    jobs: Mutex<VecDeque<NotificationJob>>,
    notify: Notify,
    max_size: usize,
}

impl DispatchQueue {
    pub fn new(max_size: usize) -> Self {
        Self {
            inner: Arc::new(Inner {
                jobs: Mutex::new(VecDeque::with_capacity(max_size.min(1024))),
                notify: Notify::new(),
                max_size,
            }),
        }
    }

    /// Enqueue a job. If the queue is already at `max_size`, the oldest
    /// queued job is dropped (and logged) to make room — the newest event
    /// always wins over history.
    pub async fn enqueue(&self, job: NotificationJob) {
        let mut jobs = self.inner.jobs.lock().await;
        if jobs.len() >= self.inner.max_size {
            if let Some(dropped) = jobs.pop_front() {
                tracing::warn!(
                    account = %dropped.account,
                    title = %dropped.title,
                    "dispatch queue full, dropping oldest queued notification"
                );
            }
        }
        jobs.push_back(job);
        drop(jobs);
        self.inner.notify.notify_one();
    }

    async fn pop(&self) -> Option<NotificationJob> {
        self.inner.jobs.lock().await.pop_front()
    }

    /// Pop the first job whose `not_before` has elapsed (or has none),
    /// preserving the relative order of the jobs left behind. Jobs still
    /// waiting out a retry backoff are skipped in place, not removed.
    async fn pop_ready(&self) -> Option<NotificationJob> {
        let mut jobs = self.inner.jobs.lock().await;
        let now = Instant::now();
        let pos = jobs
            .iter()
            .position(|job| job.not_before.map_or(true, |t| t <= now))?;
        jobs.remove(pos)
    }

    /// Earliest time any queued job becomes eligible to send, or `None` if
    /// the queue is empty. A job with no `not_before` is already eligible,
    /// so its contribution is "now".
    async fn earliest_wakeup(&self) -> Option<Instant> {
        let jobs = self.inner.jobs.lock().await;
        jobs.iter()
            .map(|job| job.not_before.unwrap_or_else(Instant::now))
            .min()
    }

    /// Current queue depth.
    pub async fn len(&self) -> usize {
        self.inner.jobs.lock().await.len()
    }
}

/// Exponential backoff for a failed delivery, capped at `max_retry_time`.
/// `attempt` is the number of failed attempts so far (1 after the first
/// failure): `min(60 * 2^(attempt-1), max_retry_time)`.
pub fn retry_delay(attempt: u32, max_retry_time: Duration) -> Duration {
    let exponent = attempt.saturating_sub(1).min(20);
    let seconds = 60u64.saturating_mul(1u64 << exponent);
    Duration::from_secs(seconds).min(max_retry_time)
}

/// `max_retries == 0` means retry forever.
fn retries_exhausted(attempt: u32, max_retries: u32) -> bool {
    max_retries > 0 && attempt > max_retries
}

pub struct DispatchWorker {
    queue: DispatchQueue,
    client: reqwest::Client,
    max_retries: u32,
    max_retry_time: Duration,
    shutdown: broadcast::Receiver<()>,
}

impl DispatchWorker {
    pub fn new(
        queue: DispatchQueue,
        client: reqwest::Client,
        max_retries: u32,
        max_retry_time: Duration,
        shutdown: broadcast::Receiver<()>,
    ) -> Self {
        Self {
            queue,
            client,
            max_retries,
            max_retry_time,
            shutdown,
        }
    }

    pub async fn run(mut self) {
        loop {
            tokio::select! {
                _ = self.shutdown.recv() => {
                    tracing::info!("dispatch worker shutting down");
                    return;
                }
                _ = self.wait_for_ready_job() => {
                    self.drain().await;
                }
            }
        }
    }

    /// Resolve once there is at least one job worth waking `drain` for:
    /// either a fresh `notify_one` or the earliest queued job's backoff
    /// elapsing. Returns immediately if the queue is already non-empty.
    async fn wait_for_ready_job(&self) {
        loop {
            match self.queue.earliest_wakeup().await {
                None => {
                    self.queue.inner.notify.notified().await;
                    return;
                }
                Some(deadline) if deadline <= Instant::now() => return,
                Some(deadline) => {
                    tokio::select! {
                        _ = tokio::time::sleep_until(deadline.into()) => return,
                        _ = self.queue.inner.notify.notified() => return,
                    }
                }
            }
        }
    }

    async fn drain(&mut self) {
        while let Some(job) = self.queue.pop_ready().await {
            if job.topic_url.is_empty() {
                tracing::debug!(account = %job.account, "no topic configured, dropping notification");
                continue;
            }
            match self.send(&job).await {
                Ok(()) => {
                    tracing::info!(account = %job.account, title = %job.title, "notification delivered");
                }
                Err(e) => self.handle_failure(job, e).await,
            }
        }
    }

    async fn send(&self, job: &NotificationJob) -> Result<(), reqwest::Error> {
        let mut request = self
            .client
            .post(&job.topic_url)
            .header("Title", job.title.clone())
            .header("Priority", job.priority.to_string())
            .body(job.body.clone());
        request = match &job.auth {
            Auth::None => request,
            Auth::Bearer(token) => request.bearer_auth(token),
            Auth::Basic { user, pass } => request.basic_auth(user, Some(pass)),
        };
        request.send().await?.error_for_status()?;
        Ok(())
    }

    async fn handle_failure(&self, mut job: NotificationJob, error: reqwest::Error) {
        job.attempt += 1;
        if retries_exhausted(job.attempt, self.max_retries) {
            tracing::error!(
                account = %job.account,
                title = %job.title,
                attempts = job.attempt,
                error = %error,
                "giving up on notification after exhausting retries"
            );
            return;
        }

        let delay = retry_delay(job.attempt, self.max_retry_time);
        tracing::warn!(
            account = %job.account,
            attempt = job.attempt,
            delay_secs = delay.as_secs(),
            error = %error,
            "notification delivery failed, will retry"
        );

        job.not_before = Some(Instant::now() + delay);
        self.queue.enqueue(job).await;
    }
}
