/*
 * uri.rs
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

//! URL helpers: split base URLs into (secure, host, port, path), percent-encode query strings
//! and join request paths.

use percent_encoding::{percent_decode_str, utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};

/// Query component: everything except RFC 3986 unreserved characters is encoded.
/// Space becomes %20 (not '+') so signers get one canonical form.
pub const QUERY_COMPONENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

/// Pieces of an absolute http(s) URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UrlParts {
    pub secure: bool,
    pub host: String,
    pub port: u16,
    /// Path without trailing slash; empty when the URL has no path.
    pub path: String,
    pub userinfo: Option<String>,
}

/// Default port for the scheme.
pub fn default_port(secure: bool) -> u16 {
    if secure {
        443
    } else {
        80
    }
}

/// Parse `http[s]://[user:pass@]host[:port][/path]`. Returns an error message on failure.
pub fn parse_http_url(url: &str) -> Result<UrlParts, String> {
    let (secure, rest) = if let Some(r) = url.strip_prefix("https://") {
        (true, r)
    } else if let Some(r) = url.strip_prefix("http://") {
        (false, r)
    } else {
        return Err(format!("unsupported URL scheme in {:?} (expected http or https)", url));
    };
    let (authority, path) = match rest.find('/') {
        Some(i) => (&rest[..i], &rest[i..]),
        None => (rest, ""),
    };
    let (userinfo, hostport) = match authority.rfind('@') {
        Some(i) => (Some(authority[..i].to_string()), &authority[i + 1..]),
        None => (None, authority),
    };
    let (host, port) = split_host_port(hostport)?;
    if host.is_empty() {
        return Err(format!("missing host in {:?}", url));
    }
    Ok(UrlParts {
        secure,
        host,
        port: port.unwrap_or_else(|| default_port(secure)),
        path: path.trim_end_matches('/').to_string(),
        userinfo,
    })
}

/// Split `host[:port]`, handling bracketed IPv6 literals.
fn split_host_port(hostport: &str) -> Result<(String, Option<u16>), String> {
    if let Some(rest) = hostport.strip_prefix('[') {
        let end = rest
            .find(']')
            .ok_or_else(|| format!("unterminated IPv6 literal in {:?}", hostport))?;
        let host = rest[..end].to_string();
        let after = &rest[end + 1..];
        return match after.strip_prefix(':') {
            Some(p) => Ok((host, Some(parse_port(p)?))),
            None if after.is_empty() => Ok((host, None)),
            None => Err(format!("invalid authority {:?}", hostport)),
        };
    }
    match hostport.rfind(':') {
        Some(i) => Ok((hostport[..i].to_string(), Some(parse_port(&hostport[i + 1..])?))),
        None => Ok((hostport.to_string(), None)),
    }
}

fn parse_port(s: &str) -> Result<u16, String> {
    match s.parse::<u16>() {
        Ok(p) if p != 0 => Ok(p),
        _ => Err(format!("invalid port {:?}", s)),
    }
}

/// Percent-encode one query key or value.
pub fn encode_component(s: &str) -> String {
    utf8_percent_encode(s, QUERY_COMPONENT).to_string()
}

/// Decode a percent-encoded component (lossy on invalid UTF-8).
pub fn decode_component(s: &str) -> String {
    percent_decode_str(s).decode_utf8_lossy().into_owned()
}

/// Encode pairs as `k=v&k=v` in the given order. Repeated keys are kept.
pub fn encode_query<'a, I>(pairs: I) -> String
where
    I: IntoIterator<Item = (&'a str, &'a str)>,
{
    let mut out = String::new();
    for (k, v) in pairs {
        if !out.is_empty() {
            out.push('&');
        }
        out.push_str(&encode_component(k));
        out.push('=');
        out.push_str(&encode_component(v));
    }
    out
}

/// Join a base path and an action: `("/v2", "servers")` => `/v2/servers`.
/// An action that is already absolute under the base is left unchanged.
pub fn join_path(base: &str, action: &str) -> String {
    let base = base.trim_end_matches('/');
    if base.is_empty() {
        return if action.starts_with('/') {
            action.to_string()
        } else {
            format!("/{}", action)
        };
    }
    if action.starts_with(base) && action[base.len()..].starts_with('/') {
        return action.to_string();
    }
    format!("{}/{}", base, action.trim_start_matches('/'))
}

/// `host` or `host:port` when the port is not the scheme default. IPv6 literals are bracketed.
pub fn host_header(host: &str, port: u16, secure: bool) -> String {
    let host = if host.contains(':') {
        format!("[{}]", host)
    } else {
        host.to_string()
    };
    if port == default_port(secure) {
        host
    } else {
        format!("{}:{}", host, port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_https_base_url_with_path() {
        let u = parse_http_url("https://api.example.com:8443/v2/").unwrap();
        assert!(u.secure);
        assert_eq!(u.host, "api.example.com");
        assert_eq!(u.port, 8443);
        assert_eq!(u.path, "/v2");
        assert_eq!(u.userinfo, None);
    }

    #[test]
    fn parse_defaults_port_by_scheme() {
        assert_eq!(parse_http_url("https://h").unwrap().port, 443);
        assert_eq!(parse_http_url("http://h").unwrap().port, 80);
    }

    #[test]
    fn parse_userinfo_and_ipv6() {
        let u = parse_http_url("http://user:p%40ss@[::1]:3128").unwrap();
        assert_eq!(u.userinfo.as_deref(), Some("user:p%40ss"));
        assert_eq!(u.host, "::1");
        assert_eq!(u.port, 3128);
    }

    #[test]
    fn parse_rejects_bad_scheme_and_port() {
        assert!(parse_http_url("socks5://h:1080").is_err());
        assert!(parse_http_url("http://h:notaport").is_err());
        assert!(parse_http_url("http://:8080").is_err());
    }

    #[test]
    fn query_keeps_order_and_repeats() {
        let q = encode_query([("b", "2"), ("a", "x y"), ("b", "3/4")]);
        assert_eq!(q, "b=2&a=x%20y&b=3%2F4");
    }

    #[test]
    fn join_path_variants() {
        assert_eq!(join_path("", "servers"), "/servers");
        assert_eq!(join_path("/v2", "/servers"), "/v2/servers");
        assert_eq!(join_path("/v2/", "servers"), "/v2/servers");
        assert_eq!(join_path("/v2", "/v2/servers"), "/v2/servers");
        assert_eq!(join_path("/v2", "/v20/servers"), "/v2/v20/servers");
    }

    #[test]
    fn host_header_omits_default_port() {
        assert_eq!(host_header("api.example.com", 443, true), "api.example.com");
        assert_eq!(host_header("api.example.com", 8080, false), "api.example.com:8080");
        assert_eq!(host_header("::1", 80, false), "[::1]");
    }

    #[test]
    fn decode_component_roundtrip() {
        assert_eq!(decode_component(&encode_component("a b/ü")), "a b/ü");
    }
}
