/*
 * signer.rs
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

//! HMAC-SHA256 query signing, usable directly as a connection's hooks.
//!
//! String to sign: `METHOD\nhost\npath\ncanonical-query`, where the canonical query is the
//! final params sorted by key then value and percent-encoded. The base64 signature is
//! appended last, so it covers every other param.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::connection::{RequestContext, RequestHooks, SendTarget};
use crate::error::{Error, Result};
use crate::protocol::http::{Headers, Params};

type HmacSha256 = Hmac<Sha256>;

#[derive(Clone)]
pub struct HmacQuerySigner {
    key_id: String,
    secret: Vec<u8>,
    key_param: String,
    signature_param: String,
    timestamp_param: Option<String>,
}

impl std::fmt::Debug for HmacQuerySigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HmacQuerySigner")
            .field("key_id", &self.key_id)
            .field("key_param", &self.key_param)
            .field("signature_param", &self.signature_param)
            .finish()
    }
}

impl HmacQuerySigner {
    pub fn new(key_id: impl Into<String>, secret: impl AsRef<[u8]>) -> Self {
        Self {
            key_id: key_id.into(),
            secret: secret.as_ref().to_vec(),
            key_param: "AccessKeyId".to_string(),
            signature_param: "Signature".to_string(),
            timestamp_param: None,
        }
    }

    pub fn key_param(mut self, name: impl Into<String>) -> Self {
        self.key_param = name.into();
        self
    }

    pub fn signature_param(mut self, name: impl Into<String>) -> Self {
        self.signature_param = name.into();
        self
    }

    /// Add a UTC `YYYY-MM-DDTHH:MM:SSZ` timestamp under `name` unless the caller set one.
    pub fn timestamp_param(mut self, name: impl Into<String>) -> Self {
        self.timestamp_param = Some(name.into());
        self
    }

    pub fn string_to_sign(target: &SendTarget<'_>, canonical: &Params) -> String {
        format!(
            "{}\n{}\n{}\n{}",
            target.method.as_str(),
            target.host.to_ascii_lowercase(),
            if target.path.is_empty() { "/" } else { target.path },
            canonical.to_query()
        )
    }

    /// Return `params` in canonical order with key id, timestamp and signature added.
    pub fn sign(&self, target: &SendTarget<'_>, mut params: Params) -> Result<Params> {
        params.remove(&self.signature_param);
        params.set(self.key_param.clone(), self.key_id.clone());
        if let Some(name) = &self.timestamp_param {
            params.set_default(
                name.clone(),
                chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string(),
            );
        }
        let mut canonical = params.sorted();
        let mut mac = HmacSha256::new_from_slice(&self.secret)
            .map_err(|e| Error::configuration(format!("unusable signing key: {}", e)))?;
        mac.update(Self::string_to_sign(target, &canonical).as_bytes());
        let signature = STANDARD.encode(mac.finalize().into_bytes());
        canonical.push(self.signature_param.clone(), signature);
        Ok(canonical)
    }
}

impl RequestHooks for HmacQuerySigner {
    fn pre_send(
        &self,
        target: &SendTarget<'_>,
        params: Params,
        headers: Headers,
        _context: &RequestContext,
    ) -> Result<(Params, Headers)> {
        Ok((self.sign(target, params)?, headers))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::http::Method;

    fn target() -> SendTarget<'static> {
        SendTarget {
            method: Method::Get,
            host: "Compute.Example.com",
            path: "/v1/",
        }
    }

    #[test]
    fn signature_covers_sorted_params() {
        let signer = HmacQuerySigner::new("AKID", "secret").timestamp_param("Timestamp");
        let params: Params = [("Zone", "b"), ("Action", "List"), ("Timestamp", "2026-01-01T00:00:00Z")]
            .into_iter()
            .collect();
        let signed = signer.sign(&target(), params).unwrap();
        let keys: Vec<_> = signed.iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec!["AccessKeyId", "Action", "Timestamp", "Zone", "Signature"]);

        let mut unsigned = signed.clone();
        unsigned.remove("Signature");
        let expected_input = "GET\ncompute.example.com\n/v1/\nAccessKeyId=AKID&Action=List&Timestamp=2026-01-01T00%3A00%3A00Z&Zone=b";
        assert_eq!(HmacQuerySigner::string_to_sign(&target(), &unsigned), expected_input);

        let mut mac = HmacSha256::new_from_slice(b"secret").unwrap();
        mac.update(expected_input.as_bytes());
        let expected = STANDARD.encode(mac.finalize().into_bytes());
        assert_eq!(signed.get("Signature"), Some(expected.as_str()));
    }

    #[test]
    fn resigning_replaces_old_signature() {
        let signer = HmacQuerySigner::new("k", "s");
        let once = signer.sign(&target(), Params::new()).unwrap();
        let twice = signer.sign(&target(), once.clone()).unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn adds_timestamp_when_missing() {
        let signer = HmacQuerySigner::new("k", "s").timestamp_param("Timestamp");
        let signed = signer.sign(&target(), Params::new()).unwrap();
        let ts = signed.get("Timestamp").unwrap();
        assert_eq!(ts.len(), 20);
        assert!(ts.ends_with('Z'));
    }
}
