/*
 * error.rs
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

//! Errors raised by connections, response formats, retry and polling.
//!
//! Retry classifies failures by `ErrorKind`, never by matching on message text.

use std::fmt;
use std::io;
use std::time::Duration;

pub type Result<T> = std::result::Result<T, Error>;

/// Flat classification of an `Error`, used by `RetryPolicy` to decide what is transient.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Configuration,
    MalformedResponse,
    /// TCP connect refused or unreachable, or name resolution failed.
    Connect,
    Timeout,
    ConnectionReset,
    /// TLS failure other than a reset during the handshake (e.g. bad certificate).
    Tls,
    TlsHandshakeReset,
    /// Any other I/O failure (unexpected EOF, broken pipe, protocol garbage).
    Io,
    RateLimit,
    Application,
    Authentication,
    Deadline,
    Cancelled,
}

/// Typed error payload extracted by `ResponseFormat::parse_error`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ErrorDetail {
    pub code: Option<String>,
    pub message: String,
    pub request_id: Option<String>,
}

impl ErrorDetail {
    pub fn message(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            ..Default::default()
        }
    }
}

impl fmt::Display for ErrorDetail {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(code) = &self.code {
            write!(f, "{}: ", code)?;
        }
        f.write_str(&self.message)?;
        if let Some(id) = &self.request_id {
            write!(f, " (request id {})", id)?;
        }
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Bad proxy URL, missing trust anchors, unusable client certificate, endpoint adjusted twice.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Body did not match the declared format. Carries the offending body.
    #[error("malformed response from {host} ({reason}): {body}")]
    MalformedResponse {
        host: String,
        reason: String,
        body: String,
    },

    #[error("transport error talking to {host}: {source}")]
    Transport {
        kind: ErrorKind,
        host: String,
        #[source]
        source: io::Error,
    },

    #[error(
        "connection to {host} was reset during the TLS handshake; \
         the server may not accept this TLS version or requires a different SNI name"
    )]
    TlsHandshakeReset { host: String },

    #[error("rate limit reached on {host}, retry after {}s", retry_after.as_secs_f64())]
    RateLimit {
        host: String,
        retry_after: Duration,
        detail: ErrorDetail,
    },

    /// Provider-specific failure surfaced through `parse_error`.
    #[error("{method} {host}{action} failed with HTTP {status}: {detail}")]
    Application {
        host: String,
        method: &'static str,
        action: String,
        status: u16,
        detail: ErrorDetail,
        /// Set when the response format classified this failure as transient.
        transient: bool,
    },

    #[error("authentication with {host} failed: {message}")]
    Authentication { host: String, message: String },

    #[error("job did not complete in {} seconds", timeout.as_secs_f64())]
    Deadline { timeout: Duration },

    #[error("operation cancelled")]
    Cancelled,
}

impl Error {
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    /// Wrap an I/O failure, classifying it by `io::ErrorKind`.
    pub fn transport(host: impl Into<String>, source: io::Error) -> Self {
        let kind = match source.kind() {
            io::ErrorKind::TimedOut => ErrorKind::Timeout,
            io::ErrorKind::ConnectionReset | io::ErrorKind::ConnectionAborted => {
                ErrorKind::ConnectionReset
            }
            io::ErrorKind::ConnectionRefused
            | io::ErrorKind::NotConnected
            | io::ErrorKind::AddrNotAvailable => ErrorKind::Connect,
            _ => ErrorKind::Io,
        };
        Self::Transport {
            kind,
            host: host.into(),
            source,
        }
    }

    /// Wrap an I/O failure with an explicit kind (e.g. `Tls` for certificate errors).
    pub fn transport_kind(kind: ErrorKind, host: impl Into<String>, source: io::Error) -> Self {
        Self::Transport {
            kind,
            host: host.into(),
            source,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Configuration(_) => ErrorKind::Configuration,
            Error::MalformedResponse { .. } => ErrorKind::MalformedResponse,
            Error::Transport { kind, .. } => *kind,
            Error::TlsHandshakeReset { .. } => ErrorKind::TlsHandshakeReset,
            Error::RateLimit { .. } => ErrorKind::RateLimit,
            Error::Application { .. } => ErrorKind::Application,
            Error::Authentication { .. } => ErrorKind::Authentication,
            Error::Deadline { .. } => ErrorKind::Deadline,
            Error::Cancelled => ErrorKind::Cancelled,
        }
    }

    /// Server-declared wait for rate-limit errors.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Error::RateLimit { retry_after, .. } => Some(*retry_after),
            _ => None,
        }
    }

    /// True for application errors the driver's response format marked transient.
    pub fn is_transient_application(&self) -> bool {
        matches!(self, Error::Application { transient: true, .. })
    }

    /// HTTP status for application and authentication failures.
    pub fn status(&self) -> Option<u16> {
        match self {
            Error::Application { status, .. } => Some(*status),
            Error::Authentication { .. } => Some(401),
            _ => None,
        }
    }
}
