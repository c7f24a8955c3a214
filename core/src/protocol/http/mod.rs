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

//! HTTP/1.1 client plumbing: request model, header map, push-parsed responses, body decoding
//! and the transport that carries one exchange.
//!
//! - Buffers: `bytes` crate (BytesMut for the parse buffer, Bytes for body chunks).
//! - HTTP/1.1 only: state-machine response parser, one request per transport.
//! - TLS via tokio-rustls, ALPN `http/1.1`; proxies via absolute-form or CONNECT.

mod headers;
mod request;

pub mod decode;
pub mod h1;
pub mod transport;

pub use headers::Headers;
pub use request::{Method, Params, Request, RequestBody};
pub use transport::{Endpoint, ResponseHead, Transport};
