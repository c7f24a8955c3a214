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

//! Responses: a buffered `Response` and a `StreamingResponse` that defers the body.
//!
//! Status, headers and the decompressed body are populated before any parsing. The parsed
//! object is computed once on first access and cached; a streaming body is consumed by value
//! and so cannot be parsed twice.

pub mod format;
pub mod xml;

use std::sync::{Arc, OnceLock, Weak};
use std::time::Duration;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::connection::ConnectionState;
use crate::error::{Error, ErrorDetail, Result};
use crate::protocol::http::decode::decode_body;
use crate::protocol::http::{Headers, Method, Transport};

pub use format::{
    ErrorFields, JsonFormat, ParsedBody, RawFormat, ResponseFormat, StatusPolicy, XmlFormat,
};
pub use xml::XmlElement;

/// Wait applied to a rate-limited response that carries no usable `Retry-After`.
pub const DEFAULT_RATE_LIMIT_WAIT: Duration = Duration::from_secs(2);

/// `Retry-After` as delta-seconds or an HTTP-date; falls back to `DEFAULT_RATE_LIMIT_WAIT`.
pub fn parse_retry_after(headers: &Headers) -> Duration {
    parse_retry_after_at(headers, Utc::now())
}

fn parse_retry_after_at(headers: &Headers, now: DateTime<Utc>) -> Duration {
    let Some(value) = headers.get("retry-after").map(str::trim) else {
        return DEFAULT_RATE_LIMIT_WAIT;
    };
    if let Ok(secs) = value.parse::<u64>() {
        return Duration::from_secs(secs);
    }
    if let Ok(secs) = value.parse::<f64>() {
        return Duration::try_from_secs_f64(secs).unwrap_or(DEFAULT_RATE_LIMIT_WAIT);
    }
    match DateTime::parse_from_rfc2822(value) {
        Ok(at) => (at.with_timezone(&Utc) - now)
            .to_std()
            .unwrap_or(Duration::ZERO),
        Err(_) => DEFAULT_RATE_LIMIT_WAIT,
    }
}

/// A completed reply with its body in memory.
pub struct Response {
    status: u16,
    reason: Option<String>,
    headers: Headers,
    body: Bytes,
    parsed: OnceLock<ParsedBody>,
    success: bool,
    format: Arc<dyn ResponseFormat>,
    host: String,
    connection: Weak<ConnectionState>,
}

impl std::fmt::Debug for Response {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Response")
            .field("host", &self.host)
            .field("status", &self.status)
            .field("success", &self.success)
            .field("body_len", &self.body.len())
            .finish()
    }
}

impl Response {
    /// Build from what came off the wire: the body is decompressed per Content-Encoding first.
    pub fn from_wire(
        status: u16,
        reason: Option<String>,
        headers: Headers,
        body: Vec<u8>,
        format: Arc<dyn ResponseFormat>,
        host: impl Into<String>,
        connection: Weak<ConnectionState>,
    ) -> Result<Self> {
        let host = host.into();
        // Undecoded copy for the error; only needed when there is something to decode.
        let raw = headers
            .contains("content-encoding")
            .then(|| String::from_utf8_lossy(&body).into_owned());
        let body = match decode_body(&headers, body) {
            Ok(decoded) => decoded,
            Err(e) => {
                return Err(Error::MalformedResponse {
                    host,
                    reason: format!("cannot decode body: {}", e),
                    body: raw.unwrap_or_default(),
                })
            }
        };
        let success = format.success(status, &headers);
        Ok(Self {
            status,
            reason,
            headers,
            body: Bytes::from(body),
            parsed: OnceLock::new(),
            success,
            format,
            host,
            connection,
        })
    }

    /// A detached response (no connection), body already decoded.
    pub fn from_parts(
        status: u16,
        headers: Headers,
        body: impl Into<Bytes>,
        format: Arc<dyn ResponseFormat>,
    ) -> Self {
        let success = format.success(status, &headers);
        Self {
            status,
            reason: None,
            headers,
            body: body.into(),
            parsed: OnceLock::new(),
            success,
            format,
            host: String::new(),
            connection: Weak::new(),
        }
    }

    pub fn status(&self) -> u16 {
        self.status
    }

    pub fn reason(&self) -> Option<&str> {
        self.reason.as_deref()
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn success(&self) -> bool {
        self.success
    }

    /// The connection that produced this response, if it is still alive.
    pub fn connection(&self) -> Option<Arc<ConnectionState>> {
        self.connection.upgrade()
    }

    /// Parsed body. Parsed at most once; later calls return the cached value.
    pub fn object(&self) -> Result<&ParsedBody> {
        if let Some(parsed) = self.parsed.get() {
            return Ok(parsed);
        }
        let parsed = self
            .format
            .parse_body(&self.body, &self.headers)
            .map_err(|reason| Error::MalformedResponse {
                host: self.host.clone(),
                reason,
                body: String::from_utf8_lossy(&self.body).into_owned(),
            })?;
        Ok(self.parsed.get_or_init(|| parsed))
    }

    /// Parsed JSON value; `None` when the body parsed to something else (e.g. empty text).
    pub fn json(&self) -> Result<Option<&Value>> {
        Ok(self.object()?.as_json())
    }

    /// Deserialize the JSON body into `T`.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T> {
        let malformed = |reason: String| Error::MalformedResponse {
            host: self.host.clone(),
            reason,
            body: String::from_utf8_lossy(&self.body).into_owned(),
        };
        match self.object()? {
            ParsedBody::Json(value) => {
                serde_json::from_value(value.clone()).map_err(|e| malformed(e.to_string()))
            }
            _ => Err(malformed("body is not JSON".to_string())),
        }
    }

    pub fn xml(&self) -> Result<Option<&XmlElement>> {
        Ok(self.object()?.as_xml())
    }

    /// Body as (lossy) UTF-8.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    pub fn parse_error(&self) -> ErrorDetail {
        self.format.parse_error(self.status, &self.headers, &self.body)
    }

    /// Error describing this (unsuccessful) response.
    pub fn into_error(self, method: Method, action: &str) -> Error {
        let detail = self.parse_error();
        if self.format.is_rate_limited(self.status, &self.headers) {
            return Error::RateLimit {
                host: self.host,
                retry_after: parse_retry_after(&self.headers),
                detail,
            };
        }
        if self.status == 401 {
            return Error::Authentication {
                host: self.host,
                message: detail.to_string(),
            };
        }
        let transient = self.format.is_transient(self.status, &detail);
        Error::Application {
            host: self.host,
            method: method.as_str(),
            action: action.to_string(),
            status: self.status,
            detail,
            transient,
        }
    }
}

/// A reply whose body is still on the wire. Status and headers are available immediately.
/// The body is delivered as-is (no decompression) unless collected with `into_response`.
pub struct StreamingResponse {
    status: u16,
    reason: Option<String>,
    headers: Headers,
    transport: Transport,
    format: Arc<dyn ResponseFormat>,
    host: String,
    connection: Weak<ConnectionState>,
}

impl StreamingResponse {
    pub(crate) fn new(
        status: u16,
        reason: Option<String>,
        headers: Headers,
        transport: Transport,
        format: Arc<dyn ResponseFormat>,
        host: String,
        connection: Weak<ConnectionState>,
    ) -> Self {
        Self {
            status,
            reason,
            headers,
            transport,
            format,
            host,
            connection,
        }
    }

    pub fn status(&self) -> u16 {
        self.status
    }

    pub fn reason(&self) -> Option<&str> {
        self.reason.as_deref()
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    pub fn success(&self) -> bool {
        self.format.success(self.status, &self.headers)
    }

    pub fn connection(&self) -> Option<Arc<ConnectionState>> {
        self.connection.upgrade()
    }

    /// Trailer fields sent after a chunked body; populated once `chunk` has returned `None`.
    pub fn trailers(&self) -> &Headers {
        self.transport.trailers()
    }

    /// Next body chunk, or `None` once the body is exhausted.
    pub async fn chunk(&mut self) -> Result<Option<Bytes>> {
        self.transport.next_chunk().await
    }

    /// Remaining body bytes, undecoded. Consumes the stream.
    pub async fn bytes(mut self) -> Result<Bytes> {
        let body = self.transport.read_body().await?;
        self.transport.close().await;
        Ok(Bytes::from(body))
    }

    /// Buffer the remaining body and turn this into a regular `Response`.
    pub async fn into_response(mut self) -> Result<Response> {
        let body = self.transport.read_body().await?;
        self.transport.close().await;
        Response::from_wire(
            self.status,
            self.reason,
            self.headers,
            body,
            self.format,
            self.host,
            self.connection,
        )
    }
}

impl std::fmt::Debug for StreamingResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamingResponse")
            .field("host", &self.host)
            .field("status", &self.status)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use chrono::TimeZone;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use serde_json::json;
    use std::io::Write;

    fn json_format() -> Arc<dyn ResponseFormat> {
        Arc::new(JsonFormat::new())
    }

    #[test]
    fn gzip_body_is_decoded_before_parsing() {
        let mut enc = GzEncoder::new(Vec::new(), Compression::default());
        enc.write_all(br#"{"id":"n-1"}"#).unwrap();
        let gz = enc.finish().unwrap();
        let headers: Headers = [("Content-Encoding", "gzip")].into_iter().collect();
        let r = Response::from_wire(200, None, headers, gz, json_format(), "h", Weak::new())
            .unwrap();
        assert_eq!(r.json().unwrap(), Some(&json!({"id": "n-1"})));
    }

    #[test]
    fn corrupt_gzip_is_malformed() {
        let headers: Headers = [("Content-Encoding", "gzip")].into_iter().collect();
        let err = Response::from_wire(200, None, headers, b"nope".to_vec(), json_format(), "h", Weak::new())
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MalformedResponse);
        match err {
            Error::MalformedResponse { body, .. } => assert_eq!(body, "nope"),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn empty_object_and_empty_body() {
        let r = Response::from_parts(200, Headers::new(), "{}", json_format());
        assert!(r.success());
        assert_eq!(r.json().unwrap(), Some(&json!({})));

        let r = Response::from_parts(200, Headers::new(), "", json_format());
        assert_eq!(r.object().unwrap(), &ParsedBody::Text(String::new()));
    }

    #[test]
    fn object_is_parsed_once() {
        let r = Response::from_parts(200, Headers::new(), "[1,2]", json_format());
        let first = r.object().unwrap() as *const ParsedBody;
        let second = r.object().unwrap() as *const ParsedBody;
        assert_eq!(first, second);
    }

    #[test]
    fn decode_into_typed_value() {
        let r = Response::from_parts(200, Headers::new(), r#"[{"id":1},{"id":2}]"#, json_format());
        let items: Vec<std::collections::HashMap<String, u32>> = r.decode().unwrap();
        assert_eq!(items[1]["id"], 2);
        let wrong: Result<Vec<String>> = r.decode();
        assert_eq!(wrong.unwrap_err().kind(), ErrorKind::MalformedResponse);
    }

    #[test]
    fn malformed_body_carries_original_text() {
        let r = Response::from_parts(200, Headers::new(), "<html>busy</html>", json_format());
        match r.object().unwrap_err() {
            Error::MalformedResponse { body, .. } => assert_eq!(body, "<html>busy</html>"),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn rate_limited_response_becomes_rate_limit_error() {
        let headers: Headers = [("Retry-After", "7")].into_iter().collect();
        let r = Response::from_parts(429, headers, "slow down", json_format());
        assert!(!r.success());
        let err = r.into_error(Method::Get, "/nodes");
        assert_eq!(err.kind(), ErrorKind::RateLimit);
        assert_eq!(err.retry_after(), Some(Duration::from_secs(7)));
    }

    #[test]
    fn unauthorized_and_application_errors() {
        let r = Response::from_parts(401, Headers::new(), "bad token", json_format());
        assert_eq!(r.into_error(Method::Get, "/x").kind(), ErrorKind::Authentication);

        let r = Response::from_parts(404, Headers::new(), "missing", json_format());
        let err = r.into_error(Method::Delete, "/nodes/1");
        assert_eq!(err.status(), Some(404));
        assert!(err.to_string().contains("DELETE"));
        assert!(err.to_string().contains("/nodes/1"));
        assert!(err.to_string().contains("missing"));
    }

    #[test]
    fn retry_after_forms() {
        let now = Utc.with_ymd_and_hms(2015, 10, 21, 7, 28, 0).unwrap();
        assert_eq!(parse_retry_after_at(&Headers::new(), now), DEFAULT_RATE_LIMIT_WAIT);
        let h: Headers = [("Retry-After", "1.5")].into_iter().collect();
        assert_eq!(parse_retry_after_at(&h, now), Duration::from_millis(1500));
        let h: Headers = [("Retry-After", "Wed, 21 Oct 2015 07:28:30 GMT")].into_iter().collect();
        assert_eq!(parse_retry_after_at(&h, now), Duration::from_secs(30));
        let h: Headers = [("Retry-After", "Wed, 21 Oct 2015 07:27:00 GMT")].into_iter().collect();
        assert_eq!(parse_retry_after_at(&h, now), Duration::ZERO);
        let h: Headers = [("Retry-After", "soon")].into_iter().collect();
        assert_eq!(parse_retry_after_at(&h, now), DEFAULT_RATE_LIMIT_WAIT);
        for huge in ["1e30", "-1.5", "NaN", "inf"] {
            let h: Headers = [("Retry-After", huge)].into_iter().collect();
            assert_eq!(parse_retry_after_at(&h, now), DEFAULT_RATE_LIMIT_WAIT, "{}", huge);
        }
    }

    #[test]
    fn oversized_retry_after_does_not_panic() {
        let headers: Headers = [("Retry-After", "1e30")].into_iter().collect();
        let r = Response::from_parts(429, headers, "", json_format());
        let err = r.into_error(Method::Get, "/x");
        assert_eq!(err.retry_after(), Some(DEFAULT_RATE_LIMIT_WAIT));
    }
}
