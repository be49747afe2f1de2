//! Explicit retry policy for transport calls.
//!
//! Nothing in the HITL core retries on its own. Callers that want retries wrap
//! their transport in `RetryingTransport` (or call `RetryPolicy::run` directly).

use crate::transport::{MailTransport, TransportError};
use backoff::backoff::Backoff;
use backoff::ExponentialBackoff;
use std::fmt::Display;
use std::time::Duration;
use tracing::warn;

/// Bounded attempts with an exponential pause schedule (no jitter).
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    max_attempts: u32,
    initial_interval: Duration,
    max_interval: Duration,
    multiplier: f64,
}

impl RetryPolicy {
    /// base, 2*base, 4*base, ... capped at `cap`.
    pub fn exponential(max_attempts: u32, base: Duration, cap: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            initial_interval: base,
            max_interval: cap.max(base),
            multiplier: 2.0,
        }
    }

    /// Retries without pausing.
    pub fn immediate(max_attempts: u32) -> Self {
        Self::exponential(max_attempts, Duration::ZERO, Duration::ZERO)
    }

    /// Single attempt.
    pub fn none() -> Self {
        Self::immediate(1)
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Fresh pause schedule for one `run`.
    fn schedule(&self) -> ExponentialBackoff {
        let mut b = ExponentialBackoff {
            initial_interval: self.initial_interval,
            max_interval: self.max_interval,
            multiplier: self.multiplier,
            randomization_factor: 0.0,
            max_elapsed_time: None,
            ..ExponentialBackoff::default()
        };
        b.reset();
        b
    }

    /// Run `op` until it succeeds, fails with a non-retryable error, or attempts run out.
    /// The last error is returned as-is.
    pub fn run<T, E, F, P>(&self, mut op: F, retryable: P) -> Result<T, E>
    where
        F: FnMut(u32) -> Result<T, E>,
        P: Fn(&E) -> bool,
        E: Display,
    {
        let mut schedule = self.schedule();
        let mut attempt = 1;
        loop {
            match op(attempt) {
                Ok(v) => return Ok(v),
                Err(e) if attempt < self.max_attempts && retryable(&e) => {
                    let pause = schedule.next_backoff().unwrap_or(self.max_interval);
                    warn!(
                        attempt,
                        max_attempts = self.max_attempts,
                        error = %e,
                        pause_ms = pause.as_millis() as u64,
                        "retrying"
                    );
                    if !pause.is_zero() {
                        std::thread::sleep(pause);
                    }
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

/// A transport that retries transient failures of `inner` under `policy`.
pub struct RetryingTransport<T> {
    inner: T,
    policy: RetryPolicy,
}

impl<T: MailTransport> RetryingTransport<T> {
    pub fn new(inner: T, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }

    pub fn into_inner(self) -> T {
        self.inner
    }
}

impl<T: MailTransport> MailTransport for RetryingTransport<T> {
    fn send(
        &self,
        to: &str,
        subject: &str,
        body: &str,
        in_reply_to: Option<&str>,
    ) -> Result<String, TransportError> {
        self.policy.run(
            |_| self.inner.send(to, subject, body, in_reply_to),
            TransportError::is_transient,
        )
    }
}
