/*
 * decode.rs
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

//! Content-Encoding decoding (gzip, deflate) applied to buffered bodies before parsing.

use std::io::{self, Read};

use flate2::read::{DeflateDecoder, GzDecoder, ZlibDecoder};

use crate::protocol::http::Headers;

/// Value sent in Accept-Encoding.
pub const ACCEPT_ENCODING: &str = "gzip,deflate";

/// Decode `body` according to the response's Content-Encoding. Unknown or identity encodings
/// pass through unchanged. Stacked encodings are undone last-applied first.
pub fn decode_body(headers: &Headers, body: Vec<u8>) -> io::Result<Vec<u8>> {
    let Some(encoding) = headers.get("content-encoding") else {
        return Ok(body);
    };
    let mut out = body;
    for coding in encoding.rsplit(',').map(|c| c.trim().to_ascii_lowercase()) {
        out = match coding.as_str() {
            "gzip" | "x-gzip" => gunzip(&out)?,
            "deflate" => inflate(&out)?,
            _ => out,
        };
    }
    Ok(out)
}

fn gunzip(data: &[u8]) -> io::Result<Vec<u8>> {
    if data.is_empty() {
        return Ok(Vec::new());
    }
    let mut out = Vec::with_capacity(data.len() * 2);
    GzDecoder::new(data).read_to_end(&mut out)?;
    Ok(out)
}

/// "deflate" is zlib-wrapped per RFC 9110, but some servers send raw deflate.
fn inflate(data: &[u8]) -> io::Result<Vec<u8>> {
    if data.is_empty() {
        return Ok(Vec::new());
    }
    let mut out = Vec::with_capacity(data.len() * 2);
    match ZlibDecoder::new(data).read_to_end(&mut out) {
        Ok(_) => Ok(out),
        Err(_) => {
            out.clear();
            DeflateDecoder::new(data).read_to_end(&mut out)?;
            Ok(out)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::{DeflateEncoder, GzEncoder, ZlibEncoder};
    use flate2::Compression;
    use std::io::Write;

    fn headers(encoding: &str) -> Headers {
        [("Content-Encoding", encoding)].into_iter().collect()
    }

    #[test]
    fn gzip_body() {
        let mut enc = GzEncoder::new(Vec::new(), Compression::default());
        enc.write_all(b"{\"ok\":true}").unwrap();
        let body = enc.finish().unwrap();
        assert_eq!(decode_body(&headers("gzip"), body).unwrap(), b"{\"ok\":true}");
    }

    #[test]
    fn zlib_and_raw_deflate() {
        let mut z = ZlibEncoder::new(Vec::new(), Compression::default());
        z.write_all(b"zlib wrapped").unwrap();
        assert_eq!(decode_body(&headers("deflate"), z.finish().unwrap()).unwrap(), b"zlib wrapped");

        let mut d = DeflateEncoder::new(Vec::new(), Compression::default());
        d.write_all(b"raw deflate").unwrap();
        assert_eq!(decode_body(&headers("Deflate"), d.finish().unwrap()).unwrap(), b"raw deflate");
    }

    #[test]
    fn identity_and_missing_pass_through() {
        assert_eq!(decode_body(&Headers::new(), b"plain".to_vec()).unwrap(), b"plain");
        assert_eq!(decode_body(&headers("identity"), b"plain".to_vec()).unwrap(), b"plain");
    }

    #[test]
    fn corrupt_gzip_is_an_error() {
        assert!(decode_body(&headers("gzip"), b"not gzip at all".to_vec()).is_err());
    }
}
