/*
 * auth.rs
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

//! Token authentication as an explicit two-state object.
//!
//! Before each call the wrapper checks its state with a plain conditional: unauthenticated,
//! or a token expiring within `REFRESH_THRESHOLD`, means authenticate first. The token is then
//! handed to the hooks through the request context under `AUTH_TOKEN_KEY`.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::connection::{RequestContext, Requester};
use crate::error::{ErrorKind, Result};
use crate::protocol::http::Request;
use crate::response::Response;

/// Refresh the token if it expires within this window.
pub const REFRESH_THRESHOLD: Duration = Duration::from_secs(300);

/// Context key carrying the current token.
pub const AUTH_TOKEN_KEY: &str = "auth_token";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthToken {
    pub token: String,
    /// None for tokens that do not expire.
    pub expires_at: Option<DateTime<Utc>>,
}

impl AuthToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            expires_at: None,
        }
    }

    pub fn expiring_at(mut self, at: DateTime<Utc>) -> Self {
        self.expires_at = Some(at);
        self
    }

    /// True when the token is expired or will be within `REFRESH_THRESHOLD` of `now`.
    pub fn needs_refresh_at(&self, now: DateTime<Utc>) -> bool {
        match self.expires_at {
            Some(at) => match (at - now).to_std() {
                Ok(left) => left <= REFRESH_THRESHOLD,
                Err(_) => true,
            },
            None => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthState {
    Unauthenticated,
    Authenticated(AuthToken),
}

/// Obtains a token, typically by calling a login endpoint through `requester`.
#[async_trait]
pub trait Authenticator: Send + Sync {
    async fn authenticate(&self, requester: &dyn Requester) -> Result<AuthToken>;
}

/// Wraps a requester so every call carries a valid token.
pub struct AuthenticatedConnection<R, A> {
    inner: R,
    authenticator: A,
    state: tokio::sync::Mutex<AuthState>,
}

impl<R: Requester, A: Authenticator> AuthenticatedConnection<R, A> {
    pub fn new(inner: R, authenticator: A) -> Self {
        Self {
            inner,
            authenticator,
            state: tokio::sync::Mutex::new(AuthState::Unauthenticated),
        }
    }

    pub fn inner(&self) -> &R {
        &self.inner
    }

    pub async fn state(&self) -> AuthState {
        self.state.lock().await.clone()
    }

    /// Forget the token; the next call authenticates again.
    pub async fn invalidate(&self) {
        *self.state.lock().await = AuthState::Unauthenticated;
    }

    async fn token(&self) -> Result<String> {
        let mut state = self.state.lock().await;
        if let AuthState::Authenticated(token) = &*state {
            if !token.needs_refresh_at(Utc::now()) {
                return Ok(token.token.clone());
            }
            tracing::debug!("token expires soon, refreshing");
        }
        let token = self.authenticator.authenticate(&self.inner).await?;
        let value = token.token.clone();
        *state = AuthState::Authenticated(token);
        Ok(value)
    }

    pub async fn request(&self, req: Request) -> Result<Response> {
        self.execute(req, RequestContext::new()).await
    }
}

#[async_trait]
impl<R: Requester, A: Authenticator> Requester for AuthenticatedConnection<R, A> {
    async fn execute(&self, req: Request, mut context: RequestContext) -> Result<Response> {
        let token = self.token().await?;
        context.insert(AUTH_TOKEN_KEY, token);
        let result = self.inner.execute(req, context).await;
        if let Err(e) = &result {
            if e.kind() == ErrorKind::Authentication {
                tracing::debug!("server rejected the token");
                self.invalidate().await;
            }
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::protocol::http::Headers;
    use crate::response::JsonFormat;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    #[derive(Default)]
    struct Recorder {
        seen: Mutex<Vec<Option<String>>>,
        reject_next: Mutex<bool>,
    }

    #[async_trait]
    impl Requester for Recorder {
        async fn execute(&self, _req: Request, context: RequestContext) -> Result<Response> {
            self.seen
                .lock()
                .unwrap()
                .push(context.get(AUTH_TOKEN_KEY).map(str::to_string));
            if std::mem::take(&mut *self.reject_next.lock().unwrap()) {
                return Err(Error::Authentication {
                    host: "h".into(),
                    message: "expired".into(),
                });
            }
            Ok(Response::from_parts(200, Headers::new(), "{}", Arc::new(JsonFormat::new())))
        }
    }

    struct Counter {
        calls: AtomicUsize,
        lifetime: chrono::Duration,
    }

    #[async_trait]
    impl Authenticator for Counter {
        async fn authenticate(&self, _requester: &dyn Requester) -> Result<AuthToken> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(AuthToken::new(format!("t{}", n)).expiring_at(Utc::now() + self.lifetime))
        }
    }

    fn counter(lifetime: chrono::Duration) -> Counter {
        Counter {
            calls: AtomicUsize::new(0),
            lifetime,
        }
    }

    #[test]
    fn refresh_window() {
        let now = Utc::now();
        let t = AuthToken::new("x").expiring_at(now + chrono::Duration::seconds(299));
        assert!(t.needs_refresh_at(now));
        let t = AuthToken::new("x").expiring_at(now + chrono::Duration::seconds(3600));
        assert!(!t.needs_refresh_at(now));
        let t = AuthToken::new("x").expiring_at(now - chrono::Duration::seconds(1));
        assert!(t.needs_refresh_at(now));
        assert!(!AuthToken::new("forever").needs_refresh_at(now));
    }

    #[tokio::test]
    async fn authenticates_once_and_reuses_token() {
        let conn = AuthenticatedConnection::new(Recorder::default(), counter(chrono::Duration::hours(1)));
        assert_eq!(conn.state().await, AuthState::Unauthenticated);
        conn.request(Request::get("/a")).await.unwrap();
        conn.request(Request::get("/b")).await.unwrap();
        assert_eq!(conn.authenticator.calls.load(Ordering::SeqCst), 1);
        let seen = conn.inner().seen.lock().unwrap().clone();
        assert_eq!(seen, vec![Some("t1".to_string()), Some("t1".to_string())]);
    }

    #[tokio::test]
    async fn near_expiry_token_is_refreshed() {
        let conn = AuthenticatedConnection::new(Recorder::default(), counter(chrono::Duration::seconds(60)));
        conn.request(Request::get("/a")).await.unwrap();
        conn.request(Request::get("/b")).await.unwrap();
        assert_eq!(conn.authenticator.calls.load(Ordering::SeqCst), 2);
        let seen = conn.inner().seen.lock().unwrap().clone();
        assert_eq!(seen[1].as_deref(), Some("t2"));
    }

    #[tokio::test]
    async fn rejection_resets_state() {
        let conn = AuthenticatedConnection::new(Recorder::default(), counter(chrono::Duration::hours(1)));
        conn.request(Request::get("/a")).await.unwrap();
        *conn.inner().reject_next.lock().unwrap() = true;
        let err = conn.request(Request::get("/b")).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Authentication);
        assert_eq!(conn.state().await, AuthState::Unauthenticated);
        conn.request(Request::get("/c")).await.unwrap();
        assert_eq!(conn.authenticator.calls.load(Ordering::SeqCst), 2);
    }
}
