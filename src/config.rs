//! Configuration (ambient): resolves CLI flags into a single `ScanConfig`
//! the rest of the crate consumes, matching `spec.md` §6's "CLI surface"
//! table. Kept separate from `cli.rs` so `engine`/`tls`/`logging` never
//! depend on `clap` types directly — grounded on the teacher's own split
//! between `cli.rs` (parsing) and `commands::*::run` (argument threading
//! into plain function calls).

use std::path::PathBuf;

use url::Url;

use crate::error::{Result, ScanError};
use crate::logging::LogLevel;

/// Default page size for paged `list()` calls when `--page-size` is not
/// given (`spec.md` §6 "CLI surface").
pub const DEFAULT_PAGE_SIZE: u32 = 100;

/// Default pool widths (`spec.md` §5 "P_ns"/"P_res"/"P_pol").
pub const DEFAULT_PARALLEL_NAMESPACES: usize = 4;
pub const DEFAULT_PARALLEL_RESOURCES: usize = 8;
pub const DEFAULT_PARALLEL_POLICIES: usize = 8;

/// Upper bound on a single policy evaluation HTTP call (`spec.md` §5
/// "Cancellation and timeouts"). Not exposed as a flag in `spec.md` §6;
/// fixed here as a sane default for a one-shot audit run.
pub const DEFAULT_EVALUATION_TIMEOUT_SECS: u64 = 10;

#[derive(Debug, Clone)]
pub struct TlsConfig {
    pub insecure: bool,
    pub ca_file: Option<PathBuf>,
    pub client_cert: Option<PathBuf>,
    pub client_key: Option<PathBuf>,
}

impl TlsConfig {
    /// mTLS is only attempted once all three of CA/cert/key are present;
    /// `spec.md` §4.3 treats a partial set as a configuration mistake.
    pub fn wants_mtls(&self) -> bool {
        self.ca_file.is_some() && self.client_cert.is_some() && self.client_key.is_some()
    }

    fn validate(&self) -> Result<()> {
        let present = [
            self.ca_file.is_some(),
            self.client_cert.is_some(),
            self.client_key.is_some(),
        ];
        let count = present.iter().filter(|p| **p).count();
        if count != 0 && count != 3 {
            return Err(ScanError::Config(
                "mTLS requires --ca-file, --client-cert, and --client-key together".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct ScanConfig {
    /// Scan only this namespace; `None` scans every audited namespace.
    pub namespace: Option<String>,
    /// Additionally scan cluster-scoped resources.
    pub cluster: bool,
    /// Namespace where PolicyServers live; always excluded from audit.
    pub kubewarden_namespace: String,
    /// Additional namespaces to exclude (`--skip-namespace`, repeatable).
    pub skip_namespaces: Vec<String>,
    /// Override base URL used for every policy endpoint.
    pub policy_server_url: Option<Url>,
    pub tls: TlsConfig,
    pub parallel_namespaces: usize,
    pub parallel_resources: usize,
    pub parallel_policies: usize,
    pub page_size: u32,
    pub loglevel: LogLevel,
    pub output_scan: bool,
    pub disable_store: bool,
}

impl ScanConfig {
    pub fn validate(&self) -> Result<()> {
        self.tls.validate()?;
        if let Some(url) = &self.policy_server_url {
            if url.cannot_be_a_base() {
                return Err(ScanError::Config(format!(
                    "--policy-server-url '{url}' is not a valid base URL"
                )));
            }
        }
        for (name, value) in [
            ("--parallel-namespaces", self.parallel_namespaces),
            ("--parallel-resources", self.parallel_resources),
            ("--parallel-policies", self.parallel_policies),
        ] {
            if value == 0 {
                return Err(ScanError::Config(format!("{name} must be at least 1")));
            }
        }
        if self.page_size == 0 {
            return Err(ScanError::Config("--page-size must be at least 1".to_string()));
        }
        Ok(())
    }

    /// Every namespace excluded from audit: the kubewarden namespace plus
    /// any `--skip-namespace` entries (`spec.md` §4.1).
    pub fn excluded_namespaces(&self) -> Vec<String> {
        crate::catalog::excluded_namespaces(&self.kubewarden_namespace, &self.skip_namespaces)
            .into_iter()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_config() -> ScanConfig {
        ScanConfig {
            namespace: None,
            cluster: false,
            kubewarden_namespace: "kubewarden".to_string(),
            skip_namespaces: vec![],
            policy_server_url: None,
            tls: TlsConfig {
                insecure: false,
                ca_file: None,
                client_cert: None,
                client_key: None,
            },
            parallel_namespaces: DEFAULT_PARALLEL_NAMESPACES,
            parallel_resources: DEFAULT_PARALLEL_RESOURCES,
            parallel_policies: DEFAULT_PARALLEL_POLICIES,
            page_size: DEFAULT_PAGE_SIZE,
            loglevel: LogLevel::Info,
            output_scan: false,
            disable_store: false,
        }
    }

    #[test]
    fn valid_config_passes() {
        assert!(base_config().validate().is_ok());
    }

    #[test]
    fn zero_parallelism_is_rejected() {
        let mut config = base_config();
        config.parallel_resources = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn partial_mtls_config_is_rejected() {
        let mut config = base_config();
        config.tls.ca_file = Some("/ca.pem".into());
        assert!(config.validate().is_err());
    }

    #[test]
    fn full_mtls_config_is_accepted() {
        let mut config = base_config();
        config.tls.ca_file = Some("/ca.pem".into());
        config.tls.client_cert = Some("/cert.pem".into());
        config.tls.client_key = Some("/key.pem".into());
        assert!(config.validate().is_ok());
        assert!(config.tls.wants_mtls());
    }

    #[test]
    fn excluded_namespaces_includes_kubewarden_and_skips() {
        let mut config = base_config();
        config.skip_namespaces = vec!["kube-system".to_string()];
        let excluded = config.excluded_namespaces();
        assert!(excluded.contains(&"kubewarden".to_string()));
        assert!(excluded.contains(&"kube-system".to_string()));
    }
}
