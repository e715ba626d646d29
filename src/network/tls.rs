//! TLS material and client-certificate handling.
//!
//! Client certificates are requested but never validated against a CA:
//! their only use is the SHA-256 fingerprint feeding SASL EXTERNAL, which
//! is how ircds traditionally treat certfp.

use crate::config::TlsConfig;
use sha2::{Digest, Sha256};
use std::io::BufReader;
use std::sync::Arc;
use tokio_rustls::rustls::client::danger::HandshakeSignatureValid;
use tokio_rustls::rustls::pki_types::{CertificateDer, UnixTime};
use tokio_rustls::rustls::server::danger::{ClientCertVerified, ClientCertVerifier};
use tokio_rustls::rustls::{self, DigitallySignedStruct, DistinguishedName, SignatureScheme};
use tokio_rustls::TlsAcceptor;

/// Build the TLS acceptor shared by all TLS listeners.
pub fn build_acceptor(config: &TlsConfig) -> anyhow::Result<TlsAcceptor> {
    let certs = {
        let mut reader = BufReader::new(std::fs::File::open(&config.cert_path)?);
        rustls_pemfile::certs(&mut reader).collect::<Result<Vec<_>, _>>()?
    };
    let key = {
        let mut reader = BufReader::new(std::fs::File::open(&config.key_path)?);
        rustls_pemfile::private_key(&mut reader)?
            .ok_or_else(|| anyhow::anyhow!("no private key in {}", config.key_path))?
    };

    let server_config = rustls::ServerConfig::builder()
        .with_client_cert_verifier(Arc::new(FingerprintOnlyVerifier::new()))
        .with_single_cert(certs, key)?;
    Ok(TlsAcceptor::from(Arc::new(server_config)))
}

/// SHA-256 fingerprint of a peer certificate, lowercase hex.
pub fn fingerprint(cert: &CertificateDer<'_>) -> String {
    let digest = Sha256::digest(cert.as_ref());
    let mut hex = String::with_capacity(64);
    for byte in digest {
        hex.push_str(&format!("{byte:02x}"));
    }
    hex
}

/// Fingerprint of the peer on an accepted server-side TLS stream.
pub fn peer_fingerprint<S>(stream: &tokio_rustls::server::TlsStream<S>) -> Option<String> {
    let (_, connection) = stream.get_ref();
    connection
        .peer_certificates()
        .and_then(|certs| certs.first())
        .map(fingerprint)
}

/// Outbound S2S connector. Peer identity is established by the link
/// password, not the certificate chain, so server certs are accepted
/// unverified - the historical ircd linking model.
pub fn build_link_connector() -> tokio_rustls::TlsConnector {
    let config = rustls::ClientConfig::builder()
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(PasswordAuthedLinkVerifier::new()))
        .with_no_client_auth();
    tokio_rustls::TlsConnector::from(Arc::new(config))
}

#[derive(Debug)]
struct PasswordAuthedLinkVerifier {
    schemes: Vec<SignatureScheme>,
}

impl PasswordAuthedLinkVerifier {
    fn new() -> Self {
        let provider = rustls::crypto::ring::default_provider();
        PasswordAuthedLinkVerifier {
            schemes: provider.signature_verification_algorithms.supported_schemes(),
        }
    }
}

impl rustls::client::danger::ServerCertVerifier for PasswordAuthedLinkVerifier {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &rustls::pki_types::ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<rustls::client::danger::ServerCertVerified, rustls::Error> {
        Ok(rustls::client::danger::ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls12_signature(
            message,
            cert,
            dss,
            &rustls::crypto::ring::default_provider().signature_verification_algorithms,
        )
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls13_signature(
            message,
            cert,
            dss,
            &rustls::crypto::ring::default_provider().signature_verification_algorithms,
        )
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.schemes.clone()
    }
}

/// Requests a client certificate, accepts any, validates nothing but the
/// handshake signature. Identity comes from the fingerprint alone.
#[derive(Debug)]
struct FingerprintOnlyVerifier {
    schemes: Vec<SignatureScheme>,
}

impl FingerprintOnlyVerifier {
    fn new() -> Self {
        let provider = rustls::crypto::ring::default_provider();
        FingerprintOnlyVerifier {
            schemes: provider.signature_verification_algorithms.supported_schemes(),
        }
    }
}

impl ClientCertVerifier for FingerprintOnlyVerifier {
    fn offer_client_auth(&self) -> bool {
        true
    }

    fn client_auth_mandatory(&self) -> bool {
        false
    }

    fn root_hint_subjects(&self) -> &[DistinguishedName] {
        &[]
    }

    fn verify_client_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _now: UnixTime,
    ) -> Result<ClientCertVerified, rustls::Error> {
        Ok(ClientCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls12_signature(
            message,
            cert,
            dss,
            &rustls::crypto::ring::default_provider().signature_verification_algorithms,
        )
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls13_signature(
            message,
            cert,
            dss,
            &rustls::crypto::ring::default_provider().signature_verification_algorithms,
        )
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.schemes.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fingerprint_is_hex_sha256() {
        let cert = CertificateDer::from(vec![1u8, 2, 3]);
        let fp = fingerprint(&cert);
        assert_eq!(fp.len(), 64);
        assert!(fp.chars().all(|c| c.is_ascii_hexdigit()));
        // Same bytes, same fingerprint.
        assert_eq!(fp, fingerprint(&CertificateDer::from(vec![1u8, 2, 3])));
    }
}
