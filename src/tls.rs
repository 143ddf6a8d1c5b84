//! Outbound transport/TLS (ambient): builds the single `reqwest::Client`
//! shared by every `evaluator::Transport` call this run makes. Grounded
//! on the teacher's `commands/webhook.rs` TLS-file validation
//! (`validate_tls_files`) — there it loads cert+key for the *inbound*
//! HTTPS server; here the same CA/cert/key material configures the
//! *outbound* client per `spec.md` §4.3.

use std::fs;
use std::path::Path;
use std::time::Duration;

use reqwest::{Certificate, Identity};

use crate::config::TlsConfig;
use crate::error::{Result, ScanError};

/// Builds the shared HTTP client used for every policy evaluation this
/// run makes. One client instance is reused across the whole scan so its
/// connection pool amortizes across every (resource, policy) POST.
pub fn build_client(tls: &TlsConfig, timeout: Duration) -> Result<reqwest::Client> {
    let mut builder = reqwest::Client::builder().timeout(timeout).pool_idle_timeout(timeout);

    if tls.insecure {
        builder = builder.danger_accept_invalid_certs(true);
    }

    if let Some(ca_file) = &tls.ca_file {
        let ca_cert = load_certificate(ca_file)?;
        builder = builder.add_root_certificate(ca_cert);
    }

    if tls.wants_mtls() {
        let identity = load_identity(
            tls.client_cert.as_deref().expect("checked by wants_mtls"),
            tls.client_key.as_deref().expect("checked by wants_mtls"),
        )?;
        builder = builder.identity(identity);
    }

    builder.build().map_err(|e| ScanError::Config(format!("building HTTP client: {e}")))
}

fn load_certificate(path: &Path) -> Result<Certificate> {
    let pem = fs::read(path)
        .map_err(|e| ScanError::Config(format!("reading CA file {}: {e}", path.display())))?;
    Certificate::from_pem(&pem)
        .map_err(|e| ScanError::Config(format!("parsing CA file {}: {e}", path.display())))
}

fn load_identity(cert_path: &Path, key_path: &Path) -> Result<Identity> {
    let mut combined = fs::read(cert_path)
        .map_err(|e| ScanError::Config(format!("reading client cert {}: {e}", cert_path.display())))?;
    let key = fs::read(key_path)
        .map_err(|e| ScanError::Config(format!("reading client key {}: {e}", key_path.display())))?;
    combined.extend_from_slice(b"\n");
    combined.extend_from_slice(&key);

    Identity::from_pem(&combined)
        .map_err(|e| ScanError::Config(format!("building client identity: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_ca_file_is_a_config_error() {
        let tls = TlsConfig {
            insecure: false,
            ca_file: Some("/nonexistent/ca.pem".into()),
            client_cert: None,
            client_key: None,
        };
        let err = load_certificate(tls.ca_file.as_deref().unwrap()).unwrap_err();
        assert!(matches!(err, ScanError::Config(_)));
    }

    #[test]
    fn build_client_without_tls_material_succeeds() {
        let tls = TlsConfig {
            insecure: false,
            ca_file: None,
            client_cert: None,
            client_key: None,
        };
        assert!(build_client(&tls, Duration::from_secs(5)).is_ok());
    }

    #[test]
    fn build_client_with_insecure_flag_succeeds() {
        let tls = TlsConfig {
            insecure: true,
            ca_file: None,
            client_cert: None,
            client_key: None,
        };
        assert!(build_client(&tls, Duration::from_secs(5)).is_ok());
    }
}
