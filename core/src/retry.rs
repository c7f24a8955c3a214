/*
 * retry.rs
 * Copyright (C) 2026 Chris Burdess
 *
 * This file is part of Switchyard, a uniform client for heterogeneous HTTP APIs.
 *
 * Switchyard is free software: you can redistribute it and/or modify
 * it under the terms of the GNU General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * Switchyard is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 * GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License
 * along with Switchyard.  If not, see <http://www.gnu.org/licenses/>.
 */

//! Bounded retry with exponential backoff and rate-limit-aware waits.
//!
//! `Retry::call` invokes the wrapped closure until it succeeds, fails with something not
//! retryable, or the deadline (`now + timeout`) passes; in the last case the most recent real
//! error is returned. Rate-limit errors sleep the server-declared wait and reset the backoff.
//! The closure builds a fresh future per attempt from its own captures, so arguments are never
//! modified between attempts.

use std::collections::HashSet;
use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::{Error, ErrorKind, Result};

pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(1);
pub const DEFAULT_RETRY_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_BACKOFF: f64 = 1.0;

/// Transport kinds retried by default.
pub const DEFAULT_RETRYABLE: &[ErrorKind] = &[
    ErrorKind::Connect,
    ErrorKind::Timeout,
    ErrorKind::ConnectionReset,
    ErrorKind::TlsHandshakeReset,
    ErrorKind::Io,
];

#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub retry_delay: Duration,
    pub timeout: Duration,
    /// Multiplier applied to the delay after each backed-off retry.
    pub backoff: f64,
    pub retryable: HashSet<ErrorKind>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            retry_delay: DEFAULT_RETRY_DELAY,
            timeout: DEFAULT_RETRY_TIMEOUT,
            backoff: DEFAULT_BACKOFF,
            retryable: DEFAULT_RETRYABLE.iter().copied().collect(),
        }
    }
}

impl RetryPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Negative or non-finite multipliers are replaced by `DEFAULT_BACKOFF`.
    pub fn backoff(mut self, backoff: f64) -> Self {
        self.backoff = if backoff.is_finite() && backoff >= 0.0 {
            backoff
        } else {
            DEFAULT_BACKOFF
        };
        self
    }

    pub fn retry_on(mut self, kind: ErrorKind) -> Self {
        self.retryable.insert(kind);
        self
    }

    pub fn no_retry_on(mut self, kind: ErrorKind) -> Self {
        self.retryable.remove(&kind);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum RetryDecision {
    /// Server asked us to wait this long.
    RateLimited(Duration),
    Backoff,
    GiveUp,
}

fn decide(policy: &RetryPolicy, err: &Error) -> RetryDecision {
    if let Some(wait) = err.retry_after() {
        return RetryDecision::RateLimited(wait);
    }
    if policy.retryable.contains(&err.kind()) || err.is_transient_application() {
        return RetryDecision::Backoff;
    }
    RetryDecision::GiveUp
}

/// Retry decorator. Build with `new` for the bounded policy or `forever_on_rate_limit` for
/// the unbounded variant.
#[derive(Debug, Clone)]
pub struct Retry {
    policy: RetryPolicy,
    forever_on_rate_limit: bool,
    cancel: CancellationToken,
}

impl Retry {
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            forever_on_rate_limit: false,
            cancel: CancellationToken::new(),
        }
    }

    /// Like `new`, except rate-limit errors are retried without regard to the timeout.
    ///
    /// A provider that answers every call with a rate-limit response keeps this retrying
    /// indefinitely; there is no upper bound. Use only where an external cancellation
    /// token or supervisor can stop the caller.
    pub fn forever_on_rate_limit(policy: RetryPolicy) -> Self {
        Self {
            forever_on_rate_limit: true,
            ..Self::new(policy)
        }
    }

    /// Abort waits between attempts when `cancel` fires.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Run `f` under the policy. `f` is always called at least once.
    pub async fn call<T, F, Fut>(&self, mut f: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        // A timeout too large to represent never expires.
        let deadline = Instant::now().checked_add(self.policy.timeout);
        let mut delay = self.policy.retry_delay;
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            let err = match f().await {
                Ok(value) => return Ok(value),
                Err(e) => e,
            };
            let (wait, unbounded) = match decide(&self.policy, &err) {
                RetryDecision::GiveUp => return Err(err),
                RetryDecision::RateLimited(wait) => {
                    delay = self.policy.retry_delay;
                    (wait, self.forever_on_rate_limit)
                }
                RetryDecision::Backoff => {
                    let wait = delay;
                    delay = next_delay(delay, self.policy.backoff);
                    (wait, false)
                }
            };
            tracing::warn!(
                attempt,
                kind = ?err.kind(),
                wait_ms = wait.as_millis() as u64,
                error = %err,
                "request failed, retrying"
            );
            tokio::select! {
                _ = self.cancel.cancelled() => return Err(Error::Cancelled),
                _ = tokio::time::sleep(wait) => {}
            }
            let expired = deadline.is_some_and(|d| Instant::now() >= d);
            if !unbounded && expired {
                return Err(err);
            }
        }
    }
}

/// `delay * backoff`, saturating; a multiplier set directly on the field to something
/// unusable leaves the delay unchanged.
fn next_delay(delay: Duration, backoff: f64) -> Duration {
    if !backoff.is_finite() || backoff < 0.0 {
        return delay;
    }
    Duration::try_from_secs_f64(delay.as_secs_f64() * backoff).unwrap_or(Duration::MAX)
}
