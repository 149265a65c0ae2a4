// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Submit-then-poll job driver
//!
//! [`PollState::observe`] is the pure transition function; [`AsyncJobPoller`]
//! drives it with timer suspensions and exponential backoff. Dropping the
//! `poll` future cancels the loop at its next suspension point.

use async_trait::async_trait;
use rand::Rng;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

use super::BackendError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollStatus {
    Submitted,
    Running,
    Succeeded,
    Failed,
    TimedOut,
}

impl PollStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            PollStatus::Succeeded | PollStatus::Failed | PollStatus::TimedOut
        )
    }
}

/// What one status check found
#[derive(Debug, Clone, PartialEq)]
pub enum JobObservation<T> {
    /// No result yet and no failure reported
    Pending,
    Completed(T),
    Failed(String),
}

/// Poll ceiling and backoff shape
#[derive(Debug, Clone)]
pub struct PollConfig {
    pub initial_interval: Duration,
    pub max_interval: Duration,
    pub multiplier: f64,
    /// Proportional jitter, 0.2 = +/-20%
    pub jitter: f64,
    pub max_elapsed: Duration,
    pub max_attempts: u32,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            initial_interval: Duration::from_secs(1),
            max_interval: Duration::from_secs(8),
            multiplier: 2.0,
            jitter: 0.2,
            max_elapsed: Duration::from_secs(60),
            max_attempts: 120,
        }
    }
}

impl PollConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.max_elapsed.is_zero() {
            return Err("Poll max_elapsed must be greater than zero".to_string());
        }
        if self.max_attempts == 0 {
            return Err("Poll max_attempts must be greater than zero".to_string());
        }
        if self.initial_interval.is_zero() {
            return Err("Poll initial_interval must be greater than zero".to_string());
        }
        if self.multiplier < 1.0 {
            return Err(format!(
                "Poll multiplier must be at least 1.0, got {}",
                self.multiplier
            ));
        }
        if !(0.0..1.0).contains(&self.jitter) {
            return Err(format!("Poll jitter must be in [0, 1), got {}", self.jitter));
        }
        Ok(())
    }

    /// Delay after the given un-jittered interval, kept inside `remaining`
    fn jittered(&self, base: Duration, remaining: Duration) -> Duration {
        let factor = if self.jitter > 0.0 {
            1.0 + rand::thread_rng().gen_range(-self.jitter..=self.jitter)
        } else {
            1.0
        };
        base.mul_f64(factor).min(remaining)
    }

    fn next_interval(&self, current: Duration) -> Duration {
        current.mul_f64(self.multiplier).min(self.max_interval)
    }
}

/// Progress of one asynchronous job
#[derive(Debug, Clone)]
pub struct PollState {
    pub job_handle: String,
    pub status: PollStatus,
    pub attempts: u32,
    pub elapsed: Duration,
}

impl PollState {
    pub fn new(job_handle: impl Into<String>) -> Self {
        Self {
            job_handle: job_handle.into(),
            status: PollStatus::Submitted,
            attempts: 0,
            elapsed: Duration::ZERO,
        }
    }

    /// Record one poll and move to the next status
    ///
    /// A result or failure always wins over the ceiling; a still-pending job
    /// times out once `elapsed` reaches `max_elapsed` or the attempt count
    /// reaches `max_attempts`.
    pub fn observe<T>(
        &mut self,
        observation: &JobObservation<T>,
        elapsed: Duration,
        config: &PollConfig,
    ) -> PollStatus {
        if self.status.is_terminal() {
            return self.status;
        }

        self.attempts += 1;
        self.elapsed = elapsed;

        self.status = match observation {
            JobObservation::Completed(_) => PollStatus::Succeeded,
            JobObservation::Failed(_) => PollStatus::Failed,
            JobObservation::Pending
                if elapsed >= config.max_elapsed || self.attempts >= config.max_attempts =>
            {
                PollStatus::TimedOut
            }
            JobObservation::Pending => PollStatus::Running,
        };
        self.status
    }
}

/// Something that can report on a submitted job
#[async_trait]
pub trait JobStatusSource: Send + Sync {
    type Output: Send;

    async fn check(&self, job_handle: &str) -> Result<JobObservation<Self::Output>, BackendError>;
}

pub struct AsyncJobPoller {
    config: PollConfig,
}

impl AsyncJobPoller {
    pub fn new(config: PollConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &PollConfig {
        &self.config
    }

    /// Poll `job_handle` until it succeeds, fails or hits the ceiling
    ///
    /// A transport error while checking ends the loop with that error.
    pub async fn poll<S>(&self, source: &S, job_handle: &str) -> Result<S::Output, BackendError>
    where
        S: JobStatusSource + ?Sized,
    {
        let start = Instant::now();
        let mut state = PollState::new(job_handle);
        let mut interval = self.config.initial_interval;

        loop {
            let observation = source.check(job_handle).await?;
            let status = state.observe(&observation, start.elapsed(), &self.config);

            debug!(
                job = %job_handle,
                attempts = state.attempts,
                elapsed_ms = state.elapsed.as_millis() as u64,
                ?status,
                "Polled job"
            );

            match observation {
                JobObservation::Completed(output) => return Ok(output),
                JobObservation::Failed(message) => return Err(BackendError::JobFailed(message)),
                JobObservation::Pending if status == PollStatus::TimedOut => {
                    warn!(
                        job = %job_handle,
                        attempts = state.attempts,
                        elapsed_ms = state.elapsed.as_millis() as u64,
                        "Job hit poll ceiling"
                    );
                    return Err(BackendError::PollTimeout {
                        attempts: state.attempts,
                        elapsed_ms: state.elapsed.as_millis() as u64,
                    });
                }
                JobObservation::Pending => {}
            }

            let remaining = self.config.max_elapsed.saturating_sub(start.elapsed());
            tokio::time::sleep(self.config.jittered(interval, remaining)).await;
            interval = self.config.next_interval(interval);
        }
    }
}
