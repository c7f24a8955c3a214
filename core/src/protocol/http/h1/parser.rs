/*
 * parser.rs
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

//! HTTP/1.1 response push parser: status line, headers, body (Content-Length, chunked or
//! read-until-close).

use bytes::Buf;
use bytes::BytesMut;
use std::io;

/// Longest status/header/chunk-size line accepted before the response is rejected.
const MAX_LINE: usize = 64 * 1024;

/// Callback for HTTP/1.1 response events. The transport implements this to collect the head
/// and the body.
pub trait H1ResponseHandler {
    fn status(&mut self, code: u16, reason: Option<&str>);
    fn header(&mut self, name: &str, value: &str);
    fn body_chunk(&mut self, data: &[u8]);
    fn trailer(&mut self, name: &str, value: &str);
    fn complete(&mut self);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseState {
    Idle,
    StatusLine,
    Headers,
    /// Headers done; the transport must call `set_body_mode()`.
    HeadersComplete,
    Body,
    /// Body delimited by connection close.
    BodyUntilClose,
    ChunkSize,
    ChunkData,
    ChunkDataEnd,
    ChunkTrailer,
}

/// Push parser for one HTTP/1.1 response. Feed bytes via `receive`; handler is invoked as
/// complete tokens are parsed.
pub struct ResponseParser {
    state: ParseState,
    /// Remaining body bytes (Content-Length mode) or remaining chunk bytes (chunked mode).
    remaining: u64,
}

impl ResponseParser {
    pub fn new() -> Self {
        Self {
            state: ParseState::StatusLine,
            remaining: 0,
        }
    }

    pub fn state(&self) -> ParseState {
        self.state
    }

    pub fn is_complete(&self) -> bool {
        self.state == ParseState::Idle
    }

    pub fn reset(&mut self) {
        self.state = ParseState::StatusLine;
        self.remaining = 0;
    }

    /// Offset of the first CRLF in `buf`.
    fn find_crlf(buf: &[u8]) -> Option<usize> {
        buf.windows(2).position(|w| w == b"\r\n")
    }

    /// Split one CRLF-terminated line off `buf`, or None if incomplete.
    fn take_line(buf: &mut BytesMut) -> io::Result<Option<String>> {
        match Self::find_crlf(buf) {
            Some(n) => {
                let line = buf.split_to(n + 2);
                let s = std::str::from_utf8(&line[..n]).map_err(|_| {
                    io::Error::new(io::ErrorKind::InvalidData, "response line is not UTF-8")
                })?;
                Ok(Some(s.to_string()))
            }
            None if buf.len() > MAX_LINE => Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "response line too long",
            )),
            None => Ok(None),
        }
    }

    fn split_header(line: &str) -> Option<(&str, &str)> {
        let colon = line.find(':')?;
        Some((line[..colon].trim(), line[colon + 1..].trim()))
    }

    /// Consume and parse as much as possible from buf. Partial data remains in buf.
    pub fn receive<H: H1ResponseHandler>(
        &mut self,
        buf: &mut BytesMut,
        handler: &mut H,
    ) -> io::Result<()> {
        loop {
            match self.state {
                ParseState::StatusLine => {
                    let Some(line) = Self::take_line(buf)? else {
                        return Ok(());
                    };
                    // HTTP/1.1 200 OK or HTTP/1.1 200
                    let mut parts = line.splitn(3, ' ');
                    let version = parts.next().unwrap_or("");
                    if !version.starts_with("HTTP/") {
                        return Err(io::Error::new(
                            io::ErrorKind::InvalidData,
                            format!("invalid status line {:?}", line),
                        ));
                    }
                    let code = parts
                        .next()
                        .and_then(|s| s.parse::<u16>().ok())
                        .ok_or_else(|| {
                            io::Error::new(
                                io::ErrorKind::InvalidData,
                                format!("invalid status code in {:?}", line),
                            )
                        })?;
                    handler.status(code, parts.next());
                    self.state = ParseState::Headers;
                }
                ParseState::Headers => {
                    let Some(line) = Self::take_line(buf)? else {
                        return Ok(());
                    };
                    if line.is_empty() {
                        self.state = ParseState::HeadersComplete;
                        return Ok(());
                    }
                    if let Some((name, value)) = Self::split_header(&line) {
                        handler.header(name, value);
                    }
                }
                ParseState::HeadersComplete | ParseState::Idle => return Ok(()),
                ParseState::Body => {
                    if buf.is_empty() {
                        return Ok(());
                    }
                    let to_read = (self.remaining.min(buf.len() as u64)) as usize;
                    let chunk = buf.split_to(to_read);
                    handler.body_chunk(&chunk);
                    self.remaining -= to_read as u64;
                    if self.remaining == 0 {
                        handler.complete();
                        self.state = ParseState::Idle;
                    }
                }
                ParseState::BodyUntilClose => {
                    if !buf.is_empty() {
                        let chunk = buf.split_to(buf.len());
                        handler.body_chunk(&chunk);
                    }
                    return Ok(());
                }
                ParseState::ChunkSize => {
                    let Some(line) = Self::take_line(buf)? else {
                        return Ok(());
                    };
                    let hex_part = line.split(';').next().unwrap_or("").trim();
                    self.remaining = u64::from_str_radix(hex_part, 16).map_err(|_| {
                        io::Error::new(
                            io::ErrorKind::InvalidData,
                            format!("invalid chunk size {:?}", hex_part),
                        )
                    })?;
                    self.state = if self.remaining == 0 {
                        ParseState::ChunkTrailer
                    } else {
                        ParseState::ChunkData
                    };
                }
                ParseState::ChunkData => {
                    if buf.is_empty() {
                        return Ok(());
                    }
                    let to_read = (self.remaining.min(buf.len() as u64)) as usize;
                    let chunk = buf.split_to(to_read);
                    handler.body_chunk(&chunk);
                    self.remaining -= to_read as u64;
                    if self.remaining == 0 {
                        self.state = ParseState::ChunkDataEnd;
                    }
                }
                ParseState::ChunkDataEnd => {
                    if buf.len() < 2 {
                        return Ok(());
                    }
                    if &buf[..2] != b"\r\n" {
                        return Err(io::Error::new(
                            io::ErrorKind::InvalidData,
                            "missing CRLF after chunk data",
                        ));
                    }
                    buf.advance(2);
                    self.state = ParseState::ChunkSize;
                }
                ParseState::ChunkTrailer => {
                    let Some(line) = Self::take_line(buf)? else {
                        return Ok(());
                    };
                    if line.is_empty() {
                        handler.complete();
                        self.state = ParseState::Idle;
                    } else if let Some((name, value)) = Self::split_header(&line) {
                        handler.trailer(name, value);
                    }
                }
            }
        }
    }

    /// Called by the transport once headers are received (state `HeadersComplete`).
    /// `no_body` is set for HEAD requests and 1xx/204/304 statuses.
    pub fn set_body_mode<H: H1ResponseHandler>(
        &mut self,
        content_length: Option<u64>,
        chunked: bool,
        no_body: bool,
        handler: &mut H,
    ) {
        if self.state != ParseState::HeadersComplete {
            return;
        }
        if no_body || (!chunked && content_length == Some(0)) {
            handler.complete();
            self.state = ParseState::Idle;
        } else if chunked {
            self.state = ParseState::ChunkSize;
        } else if let Some(cl) = content_length {
            self.remaining = cl;
            self.state = ParseState::Body;
        } else {
            self.state = ParseState::BodyUntilClose;
        }
    }

    /// Connection reached EOF. Completes a read-until-close body, otherwise reports truncation.
    pub fn finish<H: H1ResponseHandler>(&mut self, handler: &mut H) -> io::Result<()> {
        match self.state {
            ParseState::BodyUntilClose => {
                handler.complete();
                self.state = ParseState::Idle;
                Ok(())
            }
            ParseState::Idle => Ok(()),
            _ => Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "connection closed before the response was complete",
            )),
        }
    }
}

impl Default for ResponseParser {
    fn default() -> Self {
        Self::new()
    }
}
