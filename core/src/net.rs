/*
 * net.rs
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

//! TLS client setup: turn `TlsSettings` into a rustls connector.
//!
//! Trust anchors come from the configured PEM bundles, else the platform store, else
//! webpki-roots. Requiring verification with no anchors at all is a configuration error,
//! raised when the connector is built rather than on first handshake.

use std::path::Path;
use std::sync::Arc;

use tokio_rustls::rustls::client::danger::{
    HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier,
};
use tokio_rustls::rustls::client::ClientConfig;
use tokio_rustls::rustls::pki_types::pem::PemObject;
use tokio_rustls::rustls::pki_types::{CertificateDer, PrivateKeyDer, ServerName, UnixTime};
use tokio_rustls::rustls::{DigitallySignedStruct, RootCertStore, SignatureScheme};
use tokio_rustls::TlsConnector;

use crate::config::{ClientCertificate, TlsSettings};
use crate::error::{Error, Result};

/// Load every certificate from a PEM bundle.
fn load_pem_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>> {
    let iter = CertificateDer::pem_file_iter(path).map_err(|e| {
        Error::configuration(format!("cannot read CA bundle {}: {}", path.display(), e))
    })?;
    let mut certs = Vec::new();
    for cert in iter {
        certs.push(cert.map_err(|e| {
            Error::configuration(format!("invalid certificate in {}: {}", path.display(), e))
        })?);
    }
    Ok(certs)
}

/// Build the root store: explicit bundles if any, else platform native certs, else Mozilla roots.
fn build_root_store(settings: &TlsSettings) -> Result<RootCertStore> {
    let mut root_store = RootCertStore::empty();
    if !settings.ca_files.is_empty() {
        for path in &settings.ca_files {
            let (_added, ignored) = root_store.add_parsable_certificates(load_pem_certs(path)?);
            if ignored > 0 {
                tracing::warn!(path = %path.display(), ignored, "skipped unparsable CA certificates");
            }
        }
        return Ok(root_store);
    }
    if let Ok(certs) = rustls_native_certs::load_native_certs() {
        root_store.add_parsable_certificates(certs);
    }
    if root_store.is_empty() {
        root_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    }
    Ok(root_store)
}

fn load_client_cert(
    cert: &ClientCertificate,
) -> Result<(Vec<CertificateDer<'static>>, PrivateKeyDer<'static>)> {
    let chain = load_pem_certs(&cert.cert_file)?;
    if chain.is_empty() {
        return Err(Error::configuration(format!(
            "no certificate found in {}",
            cert.cert_file.display()
        )));
    }
    let key = PrivateKeyDer::from_pem_file(&cert.key_file).map_err(|e| {
        Error::configuration(format!(
            "cannot read private key {}: {}",
            cert.key_file.display(),
            e
        ))
    })?;
    Ok((chain, key))
}

/// Build a rustls client config for HTTP/1.1 (ALPN `http/1.1`).
pub fn client_config(settings: &TlsSettings) -> Result<Arc<ClientConfig>> {
    let builder = if settings.verify {
        let roots = build_root_store(settings)?;
        if roots.is_empty() {
            return Err(Error::configuration(
                "certificate verification is enabled but no trust anchors are available",
            ));
        }
        ClientConfig::builder().with_root_certificates(roots)
    } else {
        tracing::warn!("TLS certificate verification is disabled");
        ClientConfig::builder()
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(AcceptAnyCertificate))
    };
    let mut config = match &settings.client_cert {
        Some(cert) => {
            let (chain, key) = load_client_cert(cert)?;
            builder
                .with_client_auth_cert(chain, key)
                .map_err(|e| Error::configuration(format!("unusable client certificate: {}", e)))?
        }
        None => builder.with_no_client_auth(),
    };
    config.alpn_protocols = vec![b"http/1.1".to_vec()];
    Ok(Arc::new(config))
}

/// Connector for the given settings. Fails eagerly on configuration problems.
pub fn connector(settings: &TlsSettings) -> Result<TlsConnector> {
    Ok(TlsConnector::from(client_config(settings)?))
}

/// SNI/verification name for a host (DNS name or IP literal).
pub fn server_name(host: &str) -> Result<ServerName<'static>> {
    ServerName::try_from(host.to_string())
        .map_err(|_| Error::configuration(format!("invalid TLS server name {:?}", host)))
}

/// Verifier used when `TlsSettings::verify` is false.
#[derive(Debug)]
struct AcceptAnyCertificate;

impl ServerCertVerifier for AcceptAnyCertificate {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> std::result::Result<ServerCertVerified, tokio_rustls::rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, tokio_rustls::rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, tokio_rustls::rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        vec![
            SignatureScheme::RSA_PKCS1_SHA256,
            SignatureScheme::RSA_PKCS1_SHA384,
            SignatureScheme::RSA_PKCS1_SHA512,
            SignatureScheme::ECDSA_NISTP256_SHA256,
            SignatureScheme::ECDSA_NISTP384_SHA384,
            SignatureScheme::ECDSA_NISTP521_SHA512,
            SignatureScheme::RSA_PSS_SHA256,
            SignatureScheme::RSA_PSS_SHA384,
            SignatureScheme::RSA_PSS_SHA512,
            SignatureScheme::ED25519,
        ]
    }
}
