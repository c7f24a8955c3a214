/*
 * mod.rs
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

//! Connection: runs one logical call through the hook chain and the transport.
//!
//! Lifecycle of `request`: morph the action, merge default params, merge default headers,
//! encode the body, set Content-Length/User-Agent/Accept-Encoding, run the combined pre-send
//! rewrite, then connect a fresh transport, send, and wrap the reply. A non-success reply is
//! turned into an error via the response format's `parse_error`. The connection never retries;
//! compose with `Retry` for that.
//!
//! The request context is handed to a call by the caller, read by hooks during it, and
//! cleared when the call ends however it ends. It is installed and cleared only while the
//! call holds the connection's turn, so queued calls never see or wipe each other's context.

pub mod auth;
pub mod polling;
pub mod signer;

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, OnceLock};

use async_trait::async_trait;
use tokio_rustls::TlsConnector;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::config::{ConnectionConfig, ProxyConfig};
use crate::error::{Error, Result};
use crate::net;
use crate::protocol::http::decode::ACCEPT_ENCODING;
use crate::protocol::http::{Endpoint, Headers, Method, Params, Request, RequestBody, Transport};
use crate::response::{JsonFormat, Response, ResponseFormat, StreamingResponse};
use crate::uri::join_path;

pub use auth::{AuthState, AuthToken, AuthenticatedConnection, Authenticator, AUTH_TOKEN_KEY};
pub use polling::{PollingConnection, PollingHooks};
pub use signer::HmacQuerySigner;

/// Product token at the start of every User-Agent.
pub const USER_AGENT: &str = concat!("switchyard/", env!("CARGO_PKG_VERSION"));

// ── RequestContext ────────────────────────────────────────────────────

/// Per-call values for hooks (tokens, job ids). Lives for exactly one request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestContext {
    values: BTreeMap<String, String>,
}

impl RequestContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) -> Option<String> {
        self.values.insert(key.into(), value.into())
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn remove(&mut self, key: &str) -> Option<String> {
        self.values.remove(key)
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn clear(&mut self) {
        self.values.clear();
    }

    /// Copy `other` over this context.
    pub fn extend(&mut self, other: RequestContext) {
        self.values.extend(other.values);
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

// ── Hooks ─────────────────────────────────────────────────────────────

/// What the pre-send hook is signing or rewriting for.
#[derive(Debug, Clone, Copy)]
pub struct SendTarget<'a> {
    pub method: Method,
    pub host: &'a str,
    /// Final path (base path joined with the morphed action), without query.
    pub path: &'a str,
}

/// The four provider extension points, in the order they run.
pub trait RequestHooks: Send + Sync {
    /// Rewrite the action path (e.g. add an API version prefix).
    fn morph_action(&self, action: &str, _context: &RequestContext) -> String {
        action.to_string()
    }

    /// Merge provider default params under the caller's.
    fn add_default_params(&self, params: Params, _context: &RequestContext) -> Result<Params> {
        Ok(params)
    }

    /// Merge provider default headers under the caller's.
    fn add_default_headers(&self, headers: Headers, _context: &RequestContext) -> Result<Headers> {
        Ok(headers)
    }

    /// Final rewrite that sees params and headers together (signatures).
    fn pre_send(
        &self,
        _target: &SendTarget<'_>,
        params: Params,
        headers: Headers,
        _context: &RequestContext,
    ) -> Result<(Params, Headers)> {
        Ok((params, headers))
    }
}

/// No-op hooks.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultHooks;

impl RequestHooks for DefaultHooks {}

/// Encode step applied to request bodies.
pub type BodyEncoder = Arc<dyn Fn(&RequestBody) -> Result<Vec<u8>> + Send + Sync>;

/// Default encoding: bytes and text as-is, JSON via serde_json, forms as a query string.
pub fn encode_body(body: &RequestBody) -> Result<Vec<u8>> {
    match body {
        RequestBody::Bytes(b) => Ok(b.clone()),
        RequestBody::Text(s) => Ok(s.as_bytes().to_vec()),
        RequestBody::Json(v) => serde_json::to_vec(v)
            .map_err(|e| Error::configuration(format!("cannot encode JSON body: {}", e))),
        RequestBody::Form(p) => Ok(p.to_query().into_bytes()),
    }
}

// ── ConnectionState ───────────────────────────────────────────────────

/// Where requests go: the endpoint and the proxy resolved for it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    pub endpoint: Endpoint,
    pub proxy: Option<ProxyConfig>,
}

impl Route {
    /// Resolve the proxy for `endpoint` now. The environment is not consulted again.
    fn resolve(config: &ConnectionConfig, endpoint: Endpoint) -> Result<Self> {
        let proxy = config.effective_proxy(&endpoint.host, endpoint.secure)?;
        if let Some(p) = &proxy {
            tracing::debug!(host = %endpoint.host, proxy = %p.host, port = p.port, "using proxy");
        }
        Ok(Self { endpoint, proxy })
    }
}

/// The part of a connection responses point back to: configuration, route, context.
#[derive(Debug)]
pub struct ConnectionState {
    config: ConnectionConfig,
    route: Route,
    adjusted: OnceLock<Route>,
    context: Mutex<RequestContext>,
}

impl ConnectionState {
    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    /// Current route: the adjusted one if set, else the configured one.
    pub fn route(&self) -> &Route {
        self.adjusted.get().unwrap_or(&self.route)
    }

    pub fn endpoint(&self) -> Endpoint {
        self.route().endpoint.clone()
    }

    fn context(&self) -> MutexGuard<'_, RequestContext> {
        self.context.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Snapshot of the context of the call in flight.
    pub fn context_snapshot(&self) -> RequestContext {
        self.context().clone()
    }

    /// Install `context` for the call holding the turn.
    fn begin_call(&self, context: RequestContext) -> ContextReset<'_> {
        *self.context() = context;
        ContextReset(self)
    }
}

/// Clears the context when the request ends, including on error or cancellation.
/// Must be dropped before the turn is released.
struct ContextReset<'a>(&'a ConnectionState);

impl Drop for ContextReset<'_> {
    fn drop(&mut self) {
        self.0.context().clear();
    }
}

/// What the wire exchange produced before the body is read.
struct Exchange {
    transport: Transport,
    status: u16,
    reason: Option<String>,
    headers: Headers,
    host: String,
    path: String,
}

// ── Connection ────────────────────────────────────────────────────────

/// One provider endpoint. Hooks `H` customize requests, format `F` interprets replies.
/// Calls on one connection run strictly one after another.
pub struct Connection<H = DefaultHooks, F = JsonFormat> {
    state: Arc<ConnectionState>,
    hooks: H,
    format: Arc<F>,
    tls: TlsConnector,
    encoder: BodyEncoder,
    cancel: CancellationToken,
    turn: tokio::sync::Mutex<()>,
}

impl<H, F> Connection<H, F>
where
    H: RequestHooks + 'static,
    F: ResponseFormat + 'static,
{
    /// Build a connection. TLS settings are turned into a connector and the proxy is resolved
    /// here, so missing trust anchors, an unreadable client certificate or a bad proxy URL in
    /// the environment fail now rather than on first use.
    pub fn new(config: ConnectionConfig, hooks: H, format: F) -> Result<Self> {
        let tls = net::connector(&config.tls)?;
        let endpoint = Endpoint::new(&config.host, config.port, config.secure);
        let route = Route::resolve(&config, endpoint)?;
        Ok(Self {
            state: Arc::new(ConnectionState {
                config,
                route,
                adjusted: OnceLock::new(),
                context: Mutex::new(RequestContext::new()),
            }),
            hooks,
            format: Arc::new(format),
            tls,
            encoder: Arc::new(encode_body),
            cancel: CancellationToken::new(),
            turn: tokio::sync::Mutex::new(()),
        })
    }

    /// Abort in-flight I/O when `cancel` fires.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Replace the body encoder.
    pub fn with_encoder(
        mut self,
        encoder: impl Fn(&RequestBody) -> Result<Vec<u8>> + Send + Sync + 'static,
    ) -> Self {
        self.encoder = Arc::new(encoder);
        self
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.state.config
    }

    pub fn state(&self) -> &Arc<ConnectionState> {
        &self.state
    }

    pub fn hooks(&self) -> &H {
        &self.hooks
    }

    pub fn format(&self) -> &F {
        &self.format
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn endpoint(&self) -> Endpoint {
        self.state.endpoint()
    }

    /// Proxy requests are sent through, fixed when the connection was built or adjusted.
    pub fn proxy(&self) -> Option<&ProxyConfig> {
        self.state.route().proxy.as_ref()
    }

    /// Point the connection elsewhere (protocol auto-detection). Allowed once. The proxy is
    /// resolved again for the new host and scheme.
    pub fn adjust_endpoint(&self, host: impl Into<String>, port: u16, secure: bool) -> Result<()> {
        let already = || {
            Error::configuration(format!(
                "endpoint of {} was already adjusted",
                self.state.config.host
            ))
        };
        if self.state.adjusted.get().is_some() {
            return Err(already());
        }
        let host = host.into();
        let route = Route::resolve(&self.state.config, Endpoint::new(host.clone(), port, secure))?;
        self.state.adjusted.set(route).map_err(|_| already())?;
        tracing::debug!(host = %host, port, secure, "endpoint adjusted");
        Ok(())
    }

    /// Context of the call in flight; empty between calls.
    pub fn context(&self) -> RequestContext {
        self.state.context_snapshot()
    }

    /// Perform the call and buffer the body.
    pub async fn request(&self, req: Request) -> Result<Response> {
        self.request_with_context(req, RequestContext::new()).await
    }

    /// Perform the call with `context` visible to the hooks for this call only.
    pub async fn request_with_context(&self, req: Request, context: RequestContext) -> Result<Response> {
        let _turn = self.turn.lock().await;
        let _reset = self.state.begin_call(context);
        let method = req.method;
        let ex = self.exchange(&req).await?;
        let Exchange {
            mut transport,
            status,
            reason,
            headers,
            host,
            path,
        } = ex;
        let body = transport.read_body().await;
        transport.close().await;
        let response = Response::from_wire(
            status,
            reason,
            headers,
            body?,
            self.format.clone(),
            host,
            Arc::downgrade(&self.state),
        )?;
        if !response.success() {
            return Err(response.into_error(method, &path));
        }
        response.object()?;
        Ok(response)
    }

    /// Perform the call but leave the body on the wire. A non-success reply is still buffered
    /// and raised as an error.
    pub async fn request_raw(&self, req: Request) -> Result<StreamingResponse> {
        self.request_raw_with_context(req, RequestContext::new()).await
    }

    pub async fn request_raw_with_context(
        &self,
        req: Request,
        context: RequestContext,
    ) -> Result<StreamingResponse> {
        let _turn = self.turn.lock().await;
        let _reset = self.state.begin_call(context);
        let method = req.method;
        let Exchange {
            transport,
            status,
            reason,
            headers,
            host,
            path,
        } = self.exchange(&req).await?;
        let streaming = StreamingResponse::new(
            status,
            reason,
            headers,
            transport,
            self.format.clone(),
            host,
            Arc::downgrade(&self.state),
        );
        if !streaming.success() {
            let response = streaming.into_response().await?;
            return Err(response.into_error(method, &path));
        }
        Ok(streaming)
    }

    fn user_agent(&self) -> String {
        match &self.state.config.user_agent_suffix {
            Some(suffix) => format!("{} {}", USER_AGENT, suffix),
            None => USER_AGENT.to_string(),
        }
    }

    /// Hook chain, connect, send, read the response head.
    async fn exchange(&self, req: &Request) -> Result<Exchange> {
        let route = self.state.route();
        let endpoint = &route.endpoint;
        let context = self.state.context_snapshot();
        let config = &self.state.config;
        let path = join_path(&config.base_path, &self.hooks.morph_action(&req.action, &context));
        let span = tracing::debug_span!(
            "request",
            method = req.method.as_str(),
            host = %endpoint.host,
            path = %path,
        );
        async {
            let params = self.hooks.add_default_params(req.params.clone(), &context)?;
            let mut headers = self.hooks.add_default_headers(req.headers.clone(), &context)?;

            let body = match &req.data {
                Some(data) => (self.encoder)(data)?,
                None => Vec::new(),
            };
            if let Some(content_type) = req.data.as_ref().and_then(RequestBody::content_type) {
                headers.set_default("Content-Type", content_type);
            }
            if !body.is_empty() || req.method.expects_body() {
                headers.set("Content-Length", body.len().to_string());
            }
            headers.set("User-Agent", self.user_agent());
            headers.set("Accept-Encoding", ACCEPT_ENCODING);

            let target = SendTarget {
                method: req.method,
                host: &endpoint.host,
                path: &path,
            };
            let (params, headers) = self.hooks.pre_send(&target, params, headers, &context)?;

            let mut path_and_query = path.clone();
            if !params.is_empty() {
                path_and_query.push(if path.contains('?') { '&' } else { '?' });
                path_and_query.push_str(&params.to_query());
            }
            tracing::trace!(headers = ?headers.redacted(), "sending");

            let mut transport = Transport::connect(
                endpoint,
                route.proxy.as_ref(),
                &self.tls,
                config.timeout,
                self.cancel.clone(),
            )
            .await?;
            transport
                .send_request(req.method, &path_and_query, &headers, &body)
                .await?;
            let head = transport.get_response(req.method).await?;
            tracing::debug!(status = head.status, "response");
            Ok::<_, Error>(Exchange {
                transport,
                status: head.status,
                reason: head.reason,
                headers: head.headers,
                host: endpoint.host.clone(),
                path: path.clone(),
            })
        }
        .instrument(span)
        .await
    }
}

// ── Requester ─────────────────────────────────────────────────────────

/// Anything that can perform a request with a context: a plain or authenticated connection.
#[async_trait]
pub trait Requester: Send + Sync {
    async fn execute(&self, req: Request, context: RequestContext) -> Result<Response>;
}

#[async_trait]
impl<H, F> Requester for Connection<H, F>
where
    H: RequestHooks + 'static,
    F: ResponseFormat + 'static,
{
    async fn execute(&self, req: Request, context: RequestContext) -> Result<Response> {
        self.request_with_context(req, context).await
    }
}
