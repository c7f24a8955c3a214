/*
 * request.rs
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

//! Logical request: action path, query params, body, headers, method.
//!
//! A `Request` is a plain value. Connections never mutate the caller's copy, so the same
//! request can be re-issued by `Retry` or reused as a poll request.

use crate::protocol::http::Headers;
use crate::uri::encode_query;

/// HTTP request method.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
    Put,
    Delete,
    Head,
    Options,
    Patch,
    Other(&'static str),
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Delete => "DELETE",
            Method::Head => "HEAD",
            Method::Options => "OPTIONS",
            Method::Patch => "PATCH",
            Method::Other(s) => s,
        }
    }

    /// Methods that carry a body and therefore always send Content-Length.
    pub fn expects_body(&self) -> bool {
        matches!(self, Method::Post | Method::Put | Method::Patch)
    }
}

/// Ordered query parameters. Order is the caller's unless a hook sorts them.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Params {
    pairs: Vec<(String, String)>,
}

impl Params {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.pairs.iter().find(|(k, _)| k == key).map(|(_, v)| v.as_str())
    }

    pub fn contains(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    /// Append a pair; repeated keys are allowed.
    pub fn push(&mut self, key: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.pairs.push((key.into(), value.into()));
        self
    }

    /// Replace all values of `key` with one, or append.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) -> &mut Self {
        let key = key.into();
        let value = value.into();
        match self.pairs.iter().position(|(k, _)| *k == key) {
            Some(i) => {
                self.pairs[i].1 = value;
                let mut seen = false;
                self.pairs.retain(|(k, _)| {
                    if *k != key {
                        return true;
                    }
                    let keep = !seen;
                    seen = true;
                    keep
                });
            }
            None => self.pairs.push((key, value)),
        }
        self
    }

    /// Add only if the caller did not supply the key.
    pub fn set_default(&mut self, key: impl Into<String>, value: impl Into<String>) -> &mut Self {
        let key = key.into();
        if !self.contains(&key) {
            self.pairs.push((key, value.into()));
        }
        self
    }

    pub fn remove(&mut self, key: &str) {
        self.pairs.retain(|(k, _)| k != key);
    }

    /// Copy sorted by key then value (stable canonical order for signers).
    pub fn sorted(&self) -> Params {
        let mut pairs = self.pairs.clone();
        pairs.sort();
        Params { pairs }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.pairs.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    /// Percent-encoded `k=v&...` in current order.
    pub fn to_query(&self) -> String {
        encode_query(self.iter())
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Params {
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        let mut p = Params::new();
        for (k, v) in iter {
            p.push(k, v);
        }
        p
    }
}

/// Request payload before `encode_data`.
#[derive(Debug, Clone, PartialEq)]
pub enum RequestBody {
    Bytes(Vec<u8>),
    Text(String),
    Json(serde_json::Value),
    /// `application/x-www-form-urlencoded` pairs.
    Form(Params),
}

impl RequestBody {
    /// Content-Type implied by the variant, if any.
    pub fn content_type(&self) -> Option<&'static str> {
        match self {
            RequestBody::Json(_) => Some("application/json"),
            RequestBody::Form(_) => Some("application/x-www-form-urlencoded"),
            RequestBody::Bytes(_) | RequestBody::Text(_) => None,
        }
    }
}

/// One logical call: `request(action, params, data, headers, method)`.
#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    pub action: String,
    pub method: Method,
    pub params: Params,
    pub headers: Headers,
    pub data: Option<RequestBody>,
}

impl Request {
    pub fn new(method: Method, action: impl Into<String>) -> Self {
        Self {
            action: action.into(),
            method,
            params: Params::new(),
            headers: Headers::new(),
            data: None,
        }
    }

    pub fn get(action: impl Into<String>) -> Self {
        Self::new(Method::Get, action)
    }

    pub fn post(action: impl Into<String>) -> Self {
        Self::new(Method::Post, action)
    }

    pub fn put(action: impl Into<String>) -> Self {
        Self::new(Method::Put, action)
    }

    pub fn delete(action: impl Into<String>) -> Self {
        Self::new(Method::Delete, action)
    }

    pub fn param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.push(key, value);
        self
    }

    pub fn params(mut self, params: Params) -> Self {
        self.params = params;
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.set(name, value);
        self
    }

    pub fn headers(mut self, headers: Headers) -> Self {
        self.headers = headers;
        self
    }

    pub fn body(mut self, data: RequestBody) -> Self {
        self.data = Some(data);
        self
    }

    pub fn json(self, value: serde_json::Value) -> Self {
        self.body(RequestBody::Json(value))
    }
}
