//! TLS configuration for the PostgreSQL source connection.

use std::sync::Arc;

use rustls::ClientConfig;
use tokio_postgres_rustls::MakeRustlsConnect;
use tracing::{info, warn};

use crate::error::{MigrateError, Result};

/// SSL verification modes, matching PostgreSQL's `sslmode` parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SslMode {
    /// No SSL/TLS (plain TCP connection).
    #[default]
    Disable,
    /// Use SSL but don't verify the server certificate.
    Require,
    /// Verify the server certificate against the CA roots.
    VerifyCa,
    /// Full certificate and hostname verification.
    VerifyFull,
}

impl SslMode {
    /// Parse an SSL mode from a string.
    pub fn parse(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "disable" | "" => Ok(SslMode::Disable),
            "require" => Ok(SslMode::Require),
            "verify-ca" => Ok(SslMode::VerifyCa),
            "verify-full" => Ok(SslMode::VerifyFull),
            other => Err(MigrateError::Config(format!(
                "Invalid source.ssl_mode '{}'. Valid values: disable, require, verify-ca, verify-full",
                other
            ))),
        }
    }

    /// Check if this mode requires TLS.
    pub fn requires_tls(&self) -> bool {
        !matches!(self, SslMode::Disable)
    }
}

/// Build the rustls connector for `mode`, or `None` when TLS is disabled.
pub fn make_tls_connector(mode: SslMode) -> Result<Option<MakeRustlsConnect>> {
    if !mode.requires_tls() {
        return Ok(None);
    }
    Ok(Some(MakeRustlsConnect::new(client_config(mode)?)))
}

/// Build the rustls `ClientConfig` for a TLS-enabled mode.
///
/// The ring provider is selected explicitly so the config does not depend on
/// which crypto provider other crates in the graph enable.
pub fn client_config(mode: SslMode) -> Result<ClientConfig> {
    let builder = ClientConfig::builder_with_provider(Arc::new(
        rustls::crypto::ring::default_provider(),
    ))
    .with_safe_default_protocol_versions()
    .map_err(|e| MigrateError::Config(format!("TLS setup failed: {}", e)))?;

    let config = match mode {
        SslMode::Disable => {
            return Err(MigrateError::Config(
                "Cannot build TLS config for ssl_mode=disable".into(),
            ));
        }
        SslMode::Require => {
            warn!(
                "ssl_mode=require enables TLS but does NOT verify the source server \
                 certificate. Use verify-full outside trusted networks."
            );
            builder
                .dangerous()
                .with_custom_certificate_verifier(Arc::new(AcceptAnyCertificate))
                .with_no_client_auth()
        }
        SslMode::VerifyCa | SslMode::VerifyFull => {
            info!("ssl_mode={:?}: certificate and hostname verification enabled", mode);
            let mut roots = rustls::RootCertStore::empty();
            roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
            builder.with_root_certificates(roots).with_no_client_auth()
        }
    };

    Ok(config)
}

/// Certificate verifier for `ssl_mode=require`: encrypts, but trusts any server.
#[derive(Debug)]
struct AcceptAnyCertificate;

impl rustls::client::danger::ServerCertVerifier for AcceptAnyCertificate {
    fn verify_server_cert(
        &self,
        _end_entity: &rustls::pki_types::CertificateDer<'_>,
        _intermediates: &[rustls::pki_types::CertificateDer<'_>],
        _server_name: &rustls::pki_types::ServerName<'_>,
        _ocsp_response: &[u8],
        _now: rustls::pki_types::UnixTime,
    ) -> std::result::Result<rustls::client::danger::ServerCertVerified, rustls::Error> {
        Ok(rustls::client::danger::ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &rustls::pki_types::CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> std::result::Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &rustls::pki_types::CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> std::result::Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
        rustls::crypto::ring::default_provider()
            .signature_verification_algorithms
            .supported_schemes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ssl_mode_parsing() {
        assert_eq!(SslMode::parse("disable").unwrap(), SslMode::Disable);
        assert_eq!(SslMode::parse("REQUIRE").unwrap(), SslMode::Require);
        assert_eq!(SslMode::parse("verify-ca").unwrap(), SslMode::VerifyCa);
        assert_eq!(SslMode::parse("verify-full").unwrap(), SslMode::VerifyFull);
        assert_eq!(SslMode::parse("").unwrap(), SslMode::Disable);
        assert!(SslMode::parse("prefer").is_err());
    }

    #[test]
    fn test_disable_builds_no_connector() {
        assert!(make_tls_connector(SslMode::Disable).unwrap().is_none());
        assert!(client_config(SslMode::Disable).is_err());
    }

    #[test]
    fn test_tls_modes_build_connector() {
        assert!(make_tls_connector(SslMode::Require).unwrap().is_some());
        assert!(make_tls_connector(SslMode::VerifyFull).unwrap().is_some());
    }
}
