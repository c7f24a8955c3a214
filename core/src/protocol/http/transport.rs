/*
 * transport.rs
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

//! Transport: one TCP or TLS stream (optionally through an HTTP proxy) carrying one HTTP/1.1
//! exchange. connect → send_request → get_response → read body → close.
//!
//! Every I/O step is bounded by the configured timeout and aborted by the cancellation token.

use std::collections::VecDeque;
use std::future::Future;
use std::io;
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;
use tokio_util::sync::CancellationToken;

use crate::config::ProxyConfig;
use crate::error::{Error, ErrorKind, Result};
use crate::net::server_name;
use crate::protocol::http::h1::{H1ResponseHandler, ParseState, ResponseParser};
use crate::protocol::http::{Headers, Method};
use crate::uri::host_header;

const READ_CHUNK: usize = 8192;

/// Where a request goes. `secure` selects TLS.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
    pub secure: bool,
}

impl Endpoint {
    pub fn new(host: impl Into<String>, port: u16, secure: bool) -> Self {
        Self {
            host: host.into(),
            port,
            secure,
        }
    }

    /// Value of the Host header (port omitted when it is the scheme default).
    pub fn host_header(&self) -> String {
        host_header(&self.host, self.port, self.secure)
    }

    fn scheme(&self) -> &'static str {
        if self.secure {
            "https"
        } else {
            "http"
        }
    }
}

/// Byte stream the transport runs over: plain TCP, TLS, or TLS inside a proxy tunnel.
pub trait AsyncStream: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> AsyncStream for T {}

type BoxedStream = Box<dyn AsyncStream>;

/// Status line and headers of a response; the body is read separately.
#[derive(Debug, Clone)]
pub struct ResponseHead {
    pub status: u16,
    pub reason: Option<String>,
    pub headers: Headers,
}

/// Collects parser events for the transport.
#[derive(Default)]
struct Collector {
    status: Option<(u16, Option<String>)>,
    headers: Headers,
    trailers: Headers,
    chunks: VecDeque<Bytes>,
    complete: bool,
}

impl H1ResponseHandler for Collector {
    fn status(&mut self, code: u16, reason: Option<&str>) {
        self.status = Some((code, reason.map(str::to_string)));
    }

    fn header(&mut self, name: &str, value: &str) {
        self.headers.append(name, value);
    }

    fn body_chunk(&mut self, data: &[u8]) {
        if !data.is_empty() {
            self.chunks.push_back(Bytes::copy_from_slice(data));
        }
    }

    fn trailer(&mut self, name: &str, value: &str) {
        self.trailers.append(name, value);
    }

    fn complete(&mut self) {
        self.complete = true;
    }
}

/// Run one I/O step under the timeout and the cancellation token.
async fn guarded<T, F>(
    fut: F,
    timeout: Duration,
    cancel: &CancellationToken,
    host: &str,
    what: &str,
) -> Result<T>
where
    F: Future<Output = io::Result<T>>,
{
    tokio::select! {
        _ = cancel.cancelled() => Err(Error::Cancelled),
        r = tokio::time::timeout(timeout, fut) => match r {
            Ok(Ok(v)) => Ok(v),
            Ok(Err(e)) => Err(Error::transport(host, e)),
            Err(_) => Err(Error::transport(
                host,
                io::Error::new(io::ErrorKind::TimedOut, format!("{} timed out", what)),
            )),
        },
    }
}

/// One connection to one endpoint. Exclusively owned; not shared between tasks.
pub struct Transport {
    stream: Option<BoxedStream>,
    endpoint: Endpoint,
    /// Plain HTTP through a proxy: request targets are absolute URLs.
    absolute_form: bool,
    proxy_authorization: Option<String>,
    timeout: Duration,
    cancel: CancellationToken,
    read_buf: BytesMut,
    parser: ResponseParser,
    events: Collector,
}

impl Transport {
    /// Open TCP (to the proxy or the endpoint), tunnel through the proxy for TLS targets,
    /// and perform the TLS handshake when the endpoint is secure.
    pub async fn connect(
        endpoint: &Endpoint,
        proxy: Option<&ProxyConfig>,
        tls: &TlsConnector,
        timeout: Duration,
        cancel: CancellationToken,
    ) -> Result<Self> {
        let (tcp_host, tcp_port) = match proxy {
            Some(p) => (p.host.as_str(), p.port),
            None => (endpoint.host.as_str(), endpoint.port),
        };
        let tcp = tokio::select! {
            _ = cancel.cancelled() => return Err(Error::Cancelled),
            r = tokio::time::timeout(timeout, TcpStream::connect((tcp_host, tcp_port))) => match r {
                Ok(Ok(s)) => s,
                Ok(Err(e)) => return Err(Error::transport_kind(ErrorKind::Connect, tcp_host, e)),
                Err(_) => {
                    return Err(Error::transport(
                        tcp_host,
                        io::Error::new(io::ErrorKind::TimedOut, "TCP connect timed out"),
                    ))
                }
            },
        };
        let _ = tcp.set_nodelay(true);
        tracing::debug!(host = tcp_host, port = tcp_port, via_proxy = proxy.is_some(), "connected");

        let mut stream: BoxedStream = Box::new(tcp);
        if let Some(p) = proxy.filter(|p| p.secure) {
            stream = tls_handshake(tls, &p.host, stream, timeout, &cancel).await?;
        }
        let mut transport = Self {
            stream: Some(stream),
            endpoint: endpoint.clone(),
            absolute_form: proxy.is_some() && !endpoint.secure,
            proxy_authorization: proxy.and_then(ProxyConfig::authorization),
            timeout,
            cancel,
            read_buf: BytesMut::with_capacity(READ_CHUNK),
            parser: ResponseParser::new(),
            events: Collector::default(),
        };
        if endpoint.secure {
            if proxy.is_some() {
                transport.establish_tunnel().await?;
            }
            let plain = transport.take_stream()?;
            let secured = tls_handshake(
                tls,
                &endpoint.host,
                plain,
                transport.timeout,
                &transport.cancel,
            )
            .await?;
            transport.stream = Some(secured);
        }
        Ok(transport)
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    fn take_stream(&mut self) -> Result<BoxedStream> {
        self.stream.take().ok_or_else(|| self.closed_error())
    }

    fn closed_error(&self) -> Error {
        Error::transport(
            &self.endpoint.host,
            io::Error::new(io::ErrorKind::NotConnected, "transport is closed"),
        )
    }

    /// `CONNECT host:port` through the proxy; any non-2xx answer fails the connect.
    async fn establish_tunnel(&mut self) -> Result<()> {
        let authority = format!("{}:{}", self.endpoint.host, self.endpoint.port);
        let mut req = format!("CONNECT {} HTTP/1.1\r\nHost: {}\r\n", authority, authority);
        if let Some(auth) = &self.proxy_authorization {
            req.push_str("Proxy-Authorization: ");
            req.push_str(auth);
            req.push_str("\r\n");
        }
        req.push_str("\r\n");
        self.write_all(req.as_bytes()).await?;
        let head = self.read_head(true).await?;
        if !(200..300).contains(&head.status) {
            return Err(Error::transport_kind(
                ErrorKind::Connect,
                &self.endpoint.host,
                io::Error::new(
                    io::ErrorKind::ConnectionRefused,
                    format!("proxy refused CONNECT {}: HTTP {}", authority, head.status),
                ),
            ));
        }
        self.reset_exchange();
        Ok(())
    }

    fn reset_exchange(&mut self) {
        self.parser.reset();
        self.events = Collector::default();
    }

    async fn write_all(&mut self, data: &[u8]) -> Result<()> {
        let stream = self.stream.as_mut().ok_or_else(|| {
            Error::transport(
                &self.endpoint.host,
                io::Error::new(io::ErrorKind::NotConnected, "transport is closed"),
            )
        })?;
        guarded(stream.write_all(data), self.timeout, &self.cancel, &self.endpoint.host, "write").await
    }

    /// Write the request line, headers and body. A Host header is added when absent.
    pub async fn send_request(
        &mut self,
        method: Method,
        path_and_query: &str,
        headers: &Headers,
        body: &[u8],
    ) -> Result<()> {
        self.reset_exchange();
        let target = if self.absolute_form {
            format!(
                "{}://{}{}",
                self.endpoint.scheme(),
                self.endpoint.host_header(),
                path_and_query
            )
        } else {
            path_and_query.to_string()
        };
        let mut req = format!("{} {} HTTP/1.1\r\n", method.as_str(), target);
        if !headers.contains("Host") {
            req.push_str("Host: ");
            req.push_str(&self.endpoint.host_header());
            req.push_str("\r\n");
        }
        for (k, v) in headers.iter() {
            req.push_str(k);
            req.push_str(": ");
            req.push_str(v);
            req.push_str("\r\n");
        }
        if self.absolute_form {
            if let Some(auth) = &self.proxy_authorization {
                req.push_str("Proxy-Authorization: ");
                req.push_str(auth);
                req.push_str("\r\n");
            }
        }
        req.push_str("\r\n");
        self.write_all(req.as_bytes()).await?;
        if !body.is_empty() {
            self.write_all(body).await?;
        }
        let stream = self.stream.as_mut().ok_or_else(|| {
            Error::transport(
                &self.endpoint.host,
                io::Error::new(io::ErrorKind::NotConnected, "transport is closed"),
            )
        })?;
        guarded(stream.flush(), self.timeout, &self.cancel, &self.endpoint.host, "flush").await
    }

    /// Read more bytes into the buffer. Returns false at EOF.
    async fn fill(&mut self) -> Result<bool> {
        let stream = self.stream.as_mut().ok_or_else(|| {
            Error::transport(
                &self.endpoint.host,
                io::Error::new(io::ErrorKind::NotConnected, "transport is closed"),
            )
        })?;
        let mut tmp = [0u8; READ_CHUNK];
        let n = guarded(stream.read(&mut tmp), self.timeout, &self.cancel, &self.endpoint.host, "read").await?;
        self.read_buf.extend_from_slice(&tmp[..n]);
        Ok(n > 0)
    }

    fn parse_buffered(&mut self) -> Result<()> {
        self.parser
            .receive(&mut self.read_buf, &mut self.events)
            .map_err(|e| Error::transport(&self.endpoint.host, e))
    }

    /// Read the status line and headers. Interim 1xx responses are skipped.
    async fn read_head(&mut self, head_request: bool) -> Result<ResponseHead> {
        loop {
            self.parse_buffered()?;
            if self.parser.state() == ParseState::HeadersComplete {
                let (status, reason) = self.events.status.take().unwrap_or((0, None));
                if (100..200).contains(&status) && status != 101 {
                    self.reset_exchange();
                    continue;
                }
                let headers = std::mem::take(&mut self.events.headers);
                let content_length = headers
                    .get("content-length")
                    .and_then(|v| v.trim().parse::<u64>().ok());
                let chunked = headers
                    .get_all("transfer-encoding")
                    .any(|v| v.to_ascii_lowercase().contains("chunked"));
                let no_body = head_request || status == 204 || status == 304 || status < 200;
                self.parser
                    .set_body_mode(content_length, chunked, no_body, &mut self.events);
                return Ok(ResponseHead {
                    status,
                    reason,
                    headers,
                });
            }
            if !self.fill().await? {
                return Err(Error::transport(
                    &self.endpoint.host,
                    io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        "connection closed before response headers",
                    ),
                ));
            }
        }
    }

    /// Wait for the response to `send_request` and return its head.
    pub async fn get_response(&mut self, method: Method) -> Result<ResponseHead> {
        self.read_head(method == Method::Head).await
    }

    /// Next piece of the body, or None when the body is complete.
    pub async fn next_chunk(&mut self) -> Result<Option<Bytes>> {
        loop {
            if let Some(chunk) = self.events.chunks.pop_front() {
                return Ok(Some(chunk));
            }
            if self.events.complete {
                return Ok(None);
            }
            self.parse_buffered()?;
            if !self.events.chunks.is_empty() || self.events.complete {
                continue;
            }
            if !self.fill().await? {
                self.parser
                    .finish(&mut self.events)
                    .map_err(|e| Error::transport(&self.endpoint.host, e))?;
            }
        }
    }

    /// Trailer fields of a chunked body. Empty until the body has been read to the end.
    pub fn trailers(&self) -> &Headers {
        &self.events.trailers
    }

    /// Read the rest of the body into memory.
    pub async fn read_body(&mut self) -> Result<Vec<u8>> {
        let mut body = Vec::new();
        while let Some(chunk) = self.next_chunk().await? {
            body.extend_from_slice(&chunk);
        }
        Ok(body)
    }

    /// Shut the stream down. Errors on shutdown are ignored; the exchange is over.
    pub async fn close(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            let _ = tokio::time::timeout(self.timeout, stream.shutdown()).await;
        }
    }
}

/// TLS handshake over `stream`. A reset during the handshake gets its own error variant.
async fn tls_handshake(
    tls: &TlsConnector,
    host: &str,
    stream: BoxedStream,
    timeout: Duration,
    cancel: &CancellationToken,
) -> Result<BoxedStream> {
    let name = server_name(host)?;
    let handshake = tls.connect(name, stream);
    let result = tokio::select! {
        _ = cancel.cancelled() => return Err(Error::Cancelled),
        r = tokio::time::timeout(timeout, handshake) => r,
    };
    match result {
        Ok(Ok(s)) => Ok(Box::new(s)),
        Ok(Err(e)) => Err(classify_tls_error(host, e)),
        Err(_) => Err(Error::transport(
            host,
            io::Error::new(io::ErrorKind::TimedOut, "TLS handshake timed out"),
        )),
    }
}

fn classify_tls_error(host: &str, e: io::Error) -> Error {
    match e.kind() {
        io::ErrorKind::ConnectionReset | io::ErrorKind::ConnectionAborted => {
            Error::TlsHandshakeReset {
                host: host.to_string(),
            }
        }
        io::ErrorKind::InvalidData => Error::transport_kind(ErrorKind::Tls, host, e),
        _ => Error::transport(host, e),
    }
}
