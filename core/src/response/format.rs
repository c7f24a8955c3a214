/*
 * format.rs
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

//! Response formats: what counts as success, how a body is parsed, how an error is described.
//!
//! A driver picks one of `RawFormat`, `JsonFormat`, `XmlFormat` (or implements
//! `ResponseFormat` itself) and hands it to its connection.

use bytes::Bytes;
use serde_json::Value;

use crate::error::ErrorDetail;
use crate::protocol::http::Headers;
use crate::response::xml::XmlElement;

/// Statuses treated as success unless a format overrides `success`.
pub const DEFAULT_SUCCESS_STATUSES: &[u16] = &[200, 201, 202];

/// Parsed representation of a response body.
#[derive(Debug, Clone, PartialEq)]
pub enum ParsedBody {
    /// Opaque bytes (raw format).
    Bytes(Bytes),
    /// Body returned unparsed as text (e.g. an empty structured body).
    Text(String),
    Json(Value),
    Xml(XmlElement),
}

impl ParsedBody {
    pub fn as_json(&self) -> Option<&Value> {
        match self {
            ParsedBody::Json(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_xml(&self) -> Option<&XmlElement> {
        match self {
            ParsedBody::Xml(e) => Some(e),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            ParsedBody::Text(s) => Some(s),
            _ => None,
        }
    }
}

/// Allow-list of success statuses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusPolicy {
    allowed: Vec<u16>,
}

impl StatusPolicy {
    pub fn new(allowed: impl IntoIterator<Item = u16>) -> Self {
        Self {
            allowed: allowed.into_iter().collect(),
        }
    }

    /// Add a status (e.g. 204 for deletes, 404 for idempotent deletes).
    pub fn allow(mut self, status: u16) -> Self {
        if !self.allowed.contains(&status) {
            self.allowed.push(status);
        }
        self
    }

    pub fn contains(&self, status: u16) -> bool {
        self.allowed.contains(&status)
    }
}

impl Default for StatusPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_SUCCESS_STATUSES.iter().copied())
    }
}

/// Where to find code, message and request id in a structured error payload.
/// JSON formats use dotted paths (`error.code`, `errors.0.message`); XML formats use element
/// local names (`Code`). The first candidate that resolves wins.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ErrorFields {
    pub code: Vec<String>,
    pub message: Vec<String>,
    pub request_id: Vec<String>,
}

impl ErrorFields {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn code(mut self, path: impl Into<String>) -> Self {
        self.code.push(path.into());
        self
    }

    pub fn message(mut self, path: impl Into<String>) -> Self {
        self.message.push(path.into());
        self
    }

    pub fn request_id(mut self, path: impl Into<String>) -> Self {
        self.request_id.push(path.into());
        self
    }

    /// `<Error><Code/><Message/></Error><RequestId/>` as used by many XML APIs.
    pub fn xml_code_message() -> Self {
        Self::new()
            .code("Code")
            .message("Message")
            .request_id("RequestId")
            .request_id("RequestID")
    }
}

/// Driver-supplied response specialization.
pub trait ResponseFormat: Send + Sync {
    /// Success verdict. Independent of body content.
    fn success(&self, status: u16, _headers: &Headers) -> bool {
        DEFAULT_SUCCESS_STATUSES.contains(&status)
    }

    /// Parse a (decompressed) body. `Err` carries the reason; the caller attaches the body.
    fn parse_body(&self, body: &Bytes, headers: &Headers) -> Result<ParsedBody, String>;

    /// Describe a failed response. Defaults to the raw body.
    fn parse_error(&self, _status: u16, _headers: &Headers, body: &Bytes) -> ErrorDetail {
        ErrorDetail::message(String::from_utf8_lossy(body).into_owned())
    }

    /// Status (and headers) that signal throttling.
    fn is_rate_limited(&self, status: u16, _headers: &Headers) -> bool {
        status == 429
    }

    /// Application failures the driver knows to be transient (retryable).
    fn is_transient(&self, _status: u16, _detail: &ErrorDetail) -> bool {
        false
    }
}

/// Opaque passthrough.
#[derive(Debug, Clone, Default)]
pub struct RawFormat {
    pub statuses: StatusPolicy,
}

impl ResponseFormat for RawFormat {
    fn success(&self, status: u16, _headers: &Headers) -> bool {
        self.statuses.contains(status)
    }

    fn parse_body(&self, body: &Bytes, _headers: &Headers) -> Result<ParsedBody, String> {
        Ok(ParsedBody::Bytes(body.clone()))
    }
}

/// JSON bodies via serde_json.
#[derive(Debug, Clone, Default)]
pub struct JsonFormat {
    pub statuses: StatusPolicy,
    /// Parse empty bodies (and fail, since "" is not JSON) instead of returning "" as text.
    pub parse_zero_length_body: bool,
    /// When set, `parse_error` extracts typed fields; otherwise the raw body is the message.
    pub error_fields: Option<ErrorFields>,
}

impl JsonFormat {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn statuses(mut self, statuses: StatusPolicy) -> Self {
        self.statuses = statuses;
        self
    }

    pub fn parse_zero_length_body(mut self, parse: bool) -> Self {
        self.parse_zero_length_body = parse;
        self
    }

    pub fn error_fields(mut self, fields: ErrorFields) -> Self {
        self.error_fields = Some(fields);
        self
    }
}

/// Resolve a dotted path; numeric segments index arrays.
pub fn json_path<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    let mut cur = value;
    for seg in path.split('.') {
        cur = match cur {
            Value::Object(map) => map.get(seg)?,
            Value::Array(items) => items.get(seg.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(cur)
}

fn json_scalar(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

fn first_json(value: &Value, paths: &[String]) -> Option<String> {
    paths.iter().find_map(|p| json_path(value, p).and_then(json_scalar))
}

impl ResponseFormat for JsonFormat {
    fn success(&self, status: u16, _headers: &Headers) -> bool {
        self.statuses.contains(status)
    }

    fn parse_body(&self, body: &Bytes, _headers: &Headers) -> Result<ParsedBody, String> {
        if body.is_empty() && !self.parse_zero_length_body {
            return Ok(ParsedBody::Text(String::new()));
        }
        serde_json::from_slice(body)
            .map(ParsedBody::Json)
            .map_err(|e| format!("failed to parse JSON: {}", e))
    }

    fn parse_error(&self, _status: u16, _headers: &Headers, body: &Bytes) -> ErrorDetail {
        let raw = String::from_utf8_lossy(body).into_owned();
        let Some(fields) = &self.error_fields else {
            return ErrorDetail::message(raw);
        };
        let Ok(value) = serde_json::from_slice::<Value>(body) else {
            return ErrorDetail::message(raw);
        };
        ErrorDetail {
            code: first_json(&value, &fields.code),
            message: first_json(&value, &fields.message).unwrap_or(raw),
            request_id: first_json(&value, &fields.request_id),
        }
    }
}

/// XML bodies via quick_xml.
#[derive(Debug, Clone, Default)]
pub struct XmlFormat {
    pub statuses: StatusPolicy,
    pub parse_zero_length_body: bool,
    pub error_fields: Option<ErrorFields>,
}

impl XmlFormat {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn statuses(mut self, statuses: StatusPolicy) -> Self {
        self.statuses = statuses;
        self
    }

    pub fn parse_zero_length_body(mut self, parse: bool) -> Self {
        self.parse_zero_length_body = parse;
        self
    }

    pub fn error_fields(mut self, fields: ErrorFields) -> Self {
        self.error_fields = Some(fields);
        self
    }
}

fn first_xml(root: &XmlElement, names: &[String]) -> Option<String> {
    names.iter().find_map(|n| root.find_text(n).map(str::to_string))
}

impl ResponseFormat for XmlFormat {
    fn success(&self, status: u16, _headers: &Headers) -> bool {
        self.statuses.contains(status)
    }

    fn parse_body(&self, body: &Bytes, _headers: &Headers) -> Result<ParsedBody, String> {
        if body.is_empty() && !self.parse_zero_length_body {
            return Ok(ParsedBody::Text(String::new()));
        }
        XmlElement::parse(body)
            .map(ParsedBody::Xml)
            .map_err(|e| format!("failed to parse XML: {}", e))
    }

    fn parse_error(&self, _status: u16, _headers: &Headers, body: &Bytes) -> ErrorDetail {
        let raw = String::from_utf8_lossy(body).into_owned();
        let Some(fields) = &self.error_fields else {
            return ErrorDetail::message(raw);
        };
        let Ok(root) = XmlElement::parse(body) else {
            return ErrorDetail::message(raw);
        };
        ErrorDetail {
            code: first_xml(&root, &fields.code),
            message: first_xml(&root, &fields.message).unwrap_or(raw),
            request_id: first_xml(&root, &fields.request_id),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn bytes(s: &str) -> Bytes {
        Bytes::copy_from_slice(s.as_bytes())
    }

    #[test]
    fn success_depends_only_on_status() {
        let f = JsonFormat::new();
        let h = Headers::new();
        for status in [200, 201, 202] {
            assert!(f.success(status, &h));
        }
        for status in [204, 301, 404, 500] {
            assert!(!f.success(status, &h));
        }
        let f = JsonFormat::new().statuses(StatusPolicy::default().allow(204).allow(404));
        assert!(f.success(204, &h));
        assert!(f.success(404, &h));
    }

    #[test]
    fn json_roundtrip() {
        let f = JsonFormat::new();
        let value = json!({"nodes": [{"id": 1, "name": "a"}], "next": null, "ok": true});
        let body = Bytes::from(serde_json::to_vec(&value).unwrap());
        assert_eq!(f.parse_body(&body, &Headers::new()).unwrap(), ParsedBody::Json(value));
    }

    #[test]
    fn empty_json_object() {
        let parsed = JsonFormat::new().parse_body(&bytes("{}"), &Headers::new()).unwrap();
        assert_eq!(parsed, ParsedBody::Json(json!({})));
    }

    #[test]
    fn zero_length_body_returned_unparsed() {
        let parsed = JsonFormat::new().parse_body(&Bytes::new(), &Headers::new()).unwrap();
        assert_eq!(parsed, ParsedBody::Text(String::new()));
        let strict = JsonFormat::new().parse_zero_length_body(true);
        assert!(strict.parse_body(&Bytes::new(), &Headers::new()).is_err());
        let parsed = XmlFormat::new().parse_body(&Bytes::new(), &Headers::new()).unwrap();
        assert_eq!(parsed, ParsedBody::Text(String::new()));
    }

    #[test]
    fn malformed_json_and_xml_fail() {
        assert!(JsonFormat::new().parse_body(&bytes("{\"a\":"), &Headers::new()).is_err());
        assert!(JsonFormat::new().parse_body(&bytes("<html>"), &Headers::new()).is_err());
        assert!(XmlFormat::new().parse_body(&bytes("<a><b></a>"), &Headers::new()).is_err());
        assert!(XmlFormat::new().parse_body(&bytes("{}"), &Headers::new()).is_err());
    }

    #[test]
    fn json_error_defaults_to_raw_body() {
        let body = bytes(r#"{"error":{"code":"E1","message":"nope"}}"#);
        let d = JsonFormat::new().parse_error(400, &Headers::new(), &body);
        assert_eq!(d, ErrorDetail::message(r#"{"error":{"code":"E1","message":"nope"}}"#));
    }

    #[test]
    fn json_error_fields_extract_typed_detail() {
        let f = JsonFormat::new().error_fields(
            ErrorFields::new()
                .code("error.code")
                .code("errors.0.code")
                .message("error.message")
                .message("errors.0.detail")
                .request_id("request_id"),
        );
        let d = f.parse_error(
            422,
            &Headers::new(),
            &bytes(r#"{"errors":[{"code":17,"detail":"name taken"}],"request_id":"rq-9"}"#),
        );
        assert_eq!(d.code.as_deref(), Some("17"));
        assert_eq!(d.message, "name taken");
        assert_eq!(d.request_id.as_deref(), Some("rq-9"));

        let d = f.parse_error(502, &Headers::new(), &bytes("Bad Gateway"));
        assert_eq!(d, ErrorDetail::message("Bad Gateway"));
    }

    #[test]
    fn xml_error_fields_extract_typed_detail() {
        let f = XmlFormat::new().error_fields(ErrorFields::xml_code_message());
        let body = bytes(
            "<Response><Errors><Error><Code>AuthFailure</Code><Message>bad key</Message></Error></Errors><RequestID>r-1</RequestID></Response>",
        );
        let d = f.parse_error(401, &Headers::new(), &body);
        assert_eq!(d.code.as_deref(), Some("AuthFailure"));
        assert_eq!(d.message, "bad key");
        assert_eq!(d.request_id.as_deref(), Some("r-1"));
    }

    #[test]
    fn raw_format_passes_bytes_through() {
        let body = Bytes::from_static(b"\x00\x01binary");
        let parsed = RawFormat::default().parse_body(&body, &Headers::new()).unwrap();
        assert_eq!(parsed, ParsedBody::Bytes(body));
    }

    #[test]
    fn json_path_indexes_arrays() {
        let v = json!({"a": [{"b": "x"}]});
        assert_eq!(json_path(&v, "a.0.b"), Some(&json!("x")));
        assert_eq!(json_path(&v, "a.1.b"), None);
        assert_eq!(json_path(&v, "a.b"), None);
    }
}
