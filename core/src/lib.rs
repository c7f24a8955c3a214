/*
 * lib.rs
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

//! Switchyard core: one uniform way to call many different HTTP APIs.
//!
//! A provider driver supplies `RequestHooks` (action rewrite, default params, default headers,
//! pre-send rewrite) and a `ResponseFormat` (success set, body parsing, error extraction).
//! `Connection` runs each call through those hooks over a fresh HTTP/1.1 transport,
//! `Retry` wraps calls with bounded backoff, and `PollingConnection` drives submit-then-poll
//! jobs.

pub mod config;
pub mod connection;
pub mod error;
pub mod net;
pub mod protocol;
pub mod response;
pub mod retry;
pub mod uri;

pub use config::{ConnectionConfig, ProxyConfig, TlsSettings};
pub use connection::{
    AuthState, AuthToken, AuthenticatedConnection, Authenticator, Connection, DefaultHooks,
    HmacQuerySigner, PollingConnection, PollingHooks, RequestContext, RequestHooks, Requester,
    Route, SendTarget,
};
pub use error::{Error, ErrorDetail, ErrorKind, Result};
pub use protocol::http::{Headers, Method, Params, Request, RequestBody};
pub use response::{
    ErrorFields, JsonFormat, ParsedBody, RawFormat, Response, ResponseFormat, StatusPolicy,
    StreamingResponse, XmlElement, XmlFormat,
};
pub use retry::{Retry, RetryPolicy};
