// ABOUTME: TLS server configuration built from PEM certificate material for the TLS-bearing variants
// ABOUTME: Loads chains and keys with rustls-pki-types and pins ALPN per protocol variant
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2026 dravr.ai

use std::sync::Arc;

use rustls_pki_types::pem::PemObject;
use rustls_pki_types::{CertificateDer, PrivateKeyDer};

use crate::config::{CertificateMaterial, ProtocolVariant};
use crate::types::BridgeError;

/// ALPN identifier for HTTP/2
pub const ALPN_H2: &[u8] = b"h2";

/// ALPN identifier for HTTP/1.1
pub const ALPN_HTTP11: &[u8] = b"http/1.1";

/// Build the rustls server configuration for a TLS-bearing variant
///
/// `https` advertises only `http/1.1`, `http2` advertises only `h2`.
pub fn server_config(
    variant: ProtocolVariant,
    material: &CertificateMaterial,
) -> Result<Arc<rustls::ServerConfig>, BridgeError> {
    let (certs, key) = load_material(material)?;

    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let mut config = rustls::ServerConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()
        .map_err(|e| BridgeError::server_start_failure("Unsupported TLS protocol versions", e))?
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .map_err(|e| BridgeError::server_start_failure("Invalid certificate or private key", e))?;

    config.alpn_protocols = if variant.is_multiplexed() {
        vec![ALPN_H2.to_vec()]
    } else {
        vec![ALPN_HTTP11.to_vec()]
    };

    Ok(Arc::new(config))
}

/// Decode the certificate chain and private key
fn load_material(
    material: &CertificateMaterial,
) -> Result<(Vec<CertificateDer<'static>>, PrivateKeyDer<'static>), BridgeError> {
    let (certs, key) = match material {
        CertificateMaterial::Pem {
            cert_chain,
            private_key,
        } => {
            let certs = CertificateDer::pem_slice_iter(cert_chain)
                .collect::<Result<Vec<_>, _>>()
                .map_err(|e| BridgeError::server_start_failure("Failed to parse certificate chain", e))?;
            let key = PrivateKeyDer::from_pem_slice(private_key)
                .map_err(|e| BridgeError::server_start_failure("Failed to parse private key", e))?;
            (certs, key)
        }
        CertificateMaterial::Files {
            cert_path,
            key_path,
        } => {
            let certs = CertificateDer::pem_file_iter(cert_path)
                .and_then(|certs| certs.collect::<Result<Vec<_>, _>>())
                .map_err(|e| {
                    BridgeError::server_start_failure(
                        format!("Failed to read certificate chain {}", cert_path.display()),
                        e,
                    )
                })?;
            let key = PrivateKeyDer::from_pem_file(key_path).map_err(|e| {
                BridgeError::server_start_failure(
                    format!("Failed to read private key {}", key_path.display()),
                    e,
                )
            })?;
            (certs, key)
        }
    };

    if certs.is_empty() {
        return Err(BridgeError::server_start_message(
            "Certificate chain contains no certificates",
        ));
    }

    Ok((certs, key))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ErrorKind;

    fn self_signed() -> CertificateMaterial {
        let rcgen::CertifiedKey { cert, key_pair } =
            rcgen::generate_simple_self_signed(vec!["localhost".to_owned()]).expect("rcgen");
        CertificateMaterial::from_pem(cert.pem(), key_pair.serialize_pem())
    }

    #[test]
    fn tls_variant_advertises_http11() {
        let config = server_config(ProtocolVariant::Tls, &self_signed()).expect("config");
        assert_eq!(config.alpn_protocols, vec![ALPN_HTTP11.to_vec()]);
    }

    #[test]
    fn secure_multiplexed_advertises_h2() {
        let config =
            server_config(ProtocolVariant::SecureMultiplexed, &self_signed()).expect("config");
        assert_eq!(config.alpn_protocols, vec![ALPN_H2.to_vec()]);
    }

    #[test]
    fn files_are_read_at_build_time() {
        let CertificateMaterial::Pem {
            cert_chain,
            private_key,
        } = self_signed()
        else {
            panic!("expected in-memory material");
        };
        let dir = tempfile::tempdir().expect("tempdir");
        let cert_path = dir.path().join("cert.pem");
        let key_path = dir.path().join("key.pem");
        std::fs::write(&cert_path, cert_chain).expect("write cert");
        std::fs::write(&key_path, private_key).expect("write key");

        let material = CertificateMaterial::from_files(cert_path, key_path);
        assert!(server_config(ProtocolVariant::Tls, &material).is_ok());
    }

    #[test]
    fn missing_files_fail_to_start() {
        let material = CertificateMaterial::from_files("/nonexistent/cert.pem", "/nonexistent/key.pem");
        let err = server_config(ProtocolVariant::Tls, &material).expect_err("missing");
        assert_eq!(err.kind, ErrorKind::ServerStartFailure);
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn empty_chain_fails_to_start() {
        let CertificateMaterial::Pem { private_key, .. } = self_signed() else {
            panic!("expected in-memory material");
        };
        let material = CertificateMaterial::from_pem(Vec::new(), private_key);
        let err = server_config(ProtocolVariant::Tls, &material).expect_err("empty");
        assert_eq!(err.kind, ErrorKind::ServerStartFailure);
    }

    #[test]
    fn garbage_key_fails_to_start() {
        let CertificateMaterial::Pem { cert_chain, .. } = self_signed() else {
            panic!("expected in-memory material");
        };
        let material = CertificateMaterial::from_pem(cert_chain, "not a key");
        let err = server_config(ProtocolVariant::Tls, &material).expect_err("garbage");
        assert_eq!(err.kind, ErrorKind::ServerStartFailure);
    }
}
