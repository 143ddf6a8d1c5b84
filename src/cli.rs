use std::path::PathBuf;

use clap::{Parser, Subcommand};

use audit_scanner::logging::LogLevel;

#[derive(Parser)]
#[command(name = "warden-audit")]
#[command(about = "Scans a cluster's workloads against Kubewarden admission policies and writes PolicyReports")]
#[command(version = env!("CARGO_PKG_VERSION"))]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run a scan: evaluate every auditable resource against its applicable policies
    Scan(ScanArgs),

    /// Display application version
    Version,

    /// Check cluster connectivity and the permissions this scanner needs
    Check,
}

#[derive(Parser)]
pub struct ScanArgs {
    /// Scan only this namespace instead of every audited namespace
    #[arg(long)]
    pub namespace: Option<String>,

    /// Also scan cluster-scoped resources against cluster-wide policies
    #[arg(long)]
    pub cluster: bool,

    /// Namespace kubewarden itself is installed in; always excluded from audit
    #[arg(long, env = "KUBEWARDEN_NAMESPACE", default_value = "kubewarden")]
    pub kubewarden_namespace: String,

    /// Additional namespace to exclude from audit (repeatable)
    #[arg(long = "skip-namespace")]
    pub skip_namespace: Vec<String>,

    /// Override base URL for every policy-server endpoint, bypassing Service lookup
    #[arg(long)]
    pub policy_server_url: Option<url::Url>,

    /// CA certificate used to verify policy-server TLS
    #[arg(long)]
    pub ca_file: Option<PathBuf>,

    /// Client certificate for mTLS to the policy server
    #[arg(long)]
    pub client_cert: Option<PathBuf>,

    /// Client private key for mTLS to the policy server
    #[arg(long)]
    pub client_key: Option<PathBuf>,

    /// Skip TLS certificate verification when contacting policy servers
    #[arg(long)]
    pub insecure: bool,

    /// Maximum namespaces scanned concurrently
    #[arg(long, default_value_t = audit_scanner::config::DEFAULT_PARALLEL_NAMESPACES)]
    pub parallel_namespaces: usize,

    /// Maximum resources evaluated concurrently within one namespace/GVR
    #[arg(long, default_value_t = audit_scanner::config::DEFAULT_PARALLEL_RESOURCES)]
    pub parallel_resources: usize,

    /// Maximum policies evaluated concurrently against one resource
    #[arg(long, default_value_t = audit_scanner::config::DEFAULT_PARALLEL_POLICIES)]
    pub parallel_policies: usize,

    /// Page size for every paginated list call against the API server
    #[arg(long, default_value_t = audit_scanner::config::DEFAULT_PAGE_SIZE)]
    pub page_size: u32,

    /// Minimum log level emitted
    #[arg(long, value_enum, default_value = "info")]
    pub loglevel: LogLevel,

    /// Dump the whole-run scan result as JSON to stdout
    #[arg(long)]
    pub output_scan: bool,

    /// Build reports in memory without writing or garbage-collecting them in the cluster
    #[arg(long)]
    pub disable_store: bool,
}
