/*
 * polling.rs
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

//! Submit-then-poll workflows for providers that run long jobs server side.

use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::connection::{RequestContext, Requester};
use crate::error::{Error, Result};
use crate::protocol::http::Request;
use crate::response::Response;

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(500);
pub const DEFAULT_POLL_TIMEOUT: Duration = Duration::from_secs(200);

/// Driver hooks deriving the poll request and deciding completion.
pub trait PollingHooks: Send + Sync {
    /// Poll request for the job started by `initial` (e.g. `GET /operations/{id}`).
    fn get_poll_request(
        &self,
        initial: &Response,
        request: &Request,
        context: &RequestContext,
    ) -> Result<Request>;

    /// True once the job reached a terminal state.
    fn has_completed(&self, response: &Response) -> Result<bool>;
}

/// Issues an initial request, then polls at a fixed interval until the job completes or
/// the deadline passes. Poll failures propagate immediately; wrap in `Retry` to retry them.
pub struct PollingConnection<R, P> {
    requester: R,
    hooks: P,
    poll_interval: Duration,
    timeout: Duration,
    cancel: CancellationToken,
}

impl<R: Requester, P: PollingHooks> PollingConnection<R, P> {
    pub fn new(requester: R, hooks: P) -> Self {
        Self {
            requester,
            hooks,
            poll_interval: DEFAULT_POLL_INTERVAL,
            timeout: DEFAULT_POLL_TIMEOUT,
            cancel: CancellationToken::new(),
        }
    }

    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Abort the inter-poll sleep when `cancel` fires.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn requester(&self) -> &R {
        &self.requester
    }

    /// One-off request through the underlying requester.
    pub async fn request(&self, req: Request, context: RequestContext) -> Result<Response> {
        self.requester.execute(req, context).await
    }

    /// Run the job and return the first response `has_completed` accepts.
    pub async fn async_request(&self, req: Request, context: RequestContext) -> Result<Response> {
        let initial = self.requester.execute(req.clone(), context.clone()).await?;
        let poll = self.hooks.get_poll_request(&initial, &req, &context)?;
        let deadline = Instant::now() + self.timeout;
        let mut attempt = 0u32;
        while Instant::now() < deadline {
            attempt += 1;
            let response = self.requester.execute(poll.clone(), context.clone()).await?;
            if self.hooks.has_completed(&response)? {
                tracing::debug!(attempt, action = %poll.action, "job completed");
                return Ok(response);
            }
            tracing::debug!(attempt, action = %poll.action, "job still running");
            tokio::select! {
                _ = self.cancel.cancelled() => return Err(Error::Cancelled),
                _ = tokio::time::sleep(self.poll_interval) => {}
            }
        }
        Err(Error::Deadline {
            timeout: self.timeout,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::protocol::http::Headers;
    use crate::response::JsonFormat;
    use async_trait::async_trait;
    use serde_json::{json, Value};
    use std::sync::{Arc, Mutex};

    /// Answers the submit with a job id, then reports "running" until `done_after` polls.
    struct Jobs {
        done_after: Option<usize>,
        actions: Mutex<Vec<String>>,
        fail_poll: bool,
    }

    impl Jobs {
        fn new(done_after: Option<usize>) -> Self {
            Self {
                done_after,
                actions: Mutex::new(Vec::new()),
                fail_poll: false,
            }
        }

        fn calls(&self) -> usize {
            self.actions.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl Requester for Jobs {
        async fn execute(&self, req: Request, _context: RequestContext) -> Result<Response> {
            let n = {
                let mut actions = self.actions.lock().unwrap();
                actions.push(req.action.clone());
                actions.len()
            };
            let body = if n == 1 {
                json!({"job": "j-7"})
            } else {
                if self.fail_poll {
                    return Err(Error::transport(
                        "h",
                        std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset"),
                    ));
                }
                let done = self.done_after.is_some_and(|k| n - 1 >= k);
                json!({"state": if done { "done" } else { "running" }})
            };
            Ok(Response::from_parts(
                200,
                Headers::new(),
                body.to_string(),
                Arc::new(JsonFormat::new()),
            ))
        }
    }

    struct JobHooks;

    impl PollingHooks for JobHooks {
        fn get_poll_request(
            &self,
            initial: &Response,
            _request: &Request,
            _context: &RequestContext,
        ) -> Result<Request> {
            let id = initial
                .json()?
                .and_then(|v| v.get("job"))
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            Ok(Request::get(format!("/operations/{}", id)))
        }

        fn has_completed(&self, response: &Response) -> Result<bool> {
            Ok(response.json()?.and_then(|v| v.get("state")) == Some(&json!("done")))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn completes_on_kth_poll() {
        let conn = PollingConnection::new(Jobs::new(Some(3)), JobHooks)
            .poll_interval(Duration::from_secs(1));
        let start = Instant::now();
        let response = conn
            .async_request(Request::post("/jobs"), RequestContext::new())
            .await
            .unwrap();
        assert_eq!(response.json().unwrap(), Some(&json!({"state": "done"})));
        assert_eq!(conn.requester().calls(), 4);
        assert_eq!(start.elapsed(), Duration::from_secs(2));
        let actions = conn.requester().actions.lock().unwrap().clone();
        assert_eq!(actions[0], "/jobs");
        assert!(actions[1..].iter().all(|a| a == "/operations/j-7"));
    }

    #[tokio::test(start_paused = true)]
    async fn first_poll_done_does_not_sleep() {
        let conn = PollingConnection::new(Jobs::new(Some(1)), JobHooks);
        let start = Instant::now();
        conn.async_request(Request::post("/jobs"), RequestContext::new())
            .await
            .unwrap();
        assert_eq!(conn.requester().calls(), 2);
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_error_after_timeout() {
        let conn = PollingConnection::new(Jobs::new(None), JobHooks)
            .poll_interval(Duration::from_secs(1))
            .timeout(Duration::from_secs(5));
        let start = Instant::now();
        let err = conn
            .async_request(Request::post("/jobs"), RequestContext::new())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Deadline);
        assert_eq!(err.to_string(), "job did not complete in 5 seconds");
        assert!(start.elapsed() >= Duration::from_secs(5));
        // polls at t = 0, 1, 2, 3, 4 and none at or after the deadline
        assert_eq!(conn.requester().calls(), 1 + 5);
    }

    #[tokio::test(start_paused = true)]
    async fn poll_failure_propagates() {
        let mut jobs = Jobs::new(None);
        jobs.fail_poll = true;
        let conn = PollingConnection::new(jobs, JobHooks);
        let err = conn
            .async_request(Request::post("/jobs"), RequestContext::new())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ConnectionReset);
        assert_eq!(conn.requester().calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_stops_polling() {
        let cancel = CancellationToken::new();
        let conn = PollingConnection::new(Jobs::new(None), JobHooks).with_cancellation(cancel.clone());
        let canceller = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(1200)).await;
            cancel.cancel();
        });
        let err = conn
            .async_request(Request::post("/jobs"), RequestContext::new())
            .await
            .unwrap_err();
        canceller.await.unwrap();
        assert_eq!(err.kind(), ErrorKind::Cancelled);
        assert_eq!(conn.requester().calls(), 1 + 2);
    }
}
