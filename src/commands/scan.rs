//! `warden-audit scan` (ambient): threads parsed CLI flags into a
//! `ScanConfig`, assembles a `ScanEngine` from the real `kube`/`reqwest`
//! backed collaborators, runs it, and prints a short summary — mirroring
//! the teacher's `commands/reconcile.rs` style of building its
//! controller's dependencies by hand in `run()` rather than behind a
//! builder type.

use std::sync::Arc;
use std::time::Duration;

use audit_scanner::catalog::{EndpointResolver, KubePolicyCatalog};
use audit_scanner::cluster::{ClusterAccess, KubeClusterAccess};
use audit_scanner::config::{ScanConfig, TlsConfig, DEFAULT_EVALUATION_TIMEOUT_SECS};
use audit_scanner::engine::{EngineConfig, ScanEngine};
use audit_scanner::evaluator::{Evaluate, Transport};
use audit_scanner::report::store::{KubeReportStore, ReportStore};
use audit_scanner::runid::RunId;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::cli::ScanArgs;

pub async fn run(args: ScanArgs) -> anyhow::Result<()> {
    let config = to_scan_config(args);
    config.validate()?;

    audit_scanner::logging::init(config.loglevel, false);

    let client = kube::Client::try_default().await?;
    let http_client = audit_scanner::tls::build_client(
        &config.tls,
        Duration::from_secs(DEFAULT_EVALUATION_TIMEOUT_SECS),
    )?;

    let cluster = Arc::new(KubeClusterAccess::new(client.clone(), config.page_size).await?);
    let resolver = Arc::new(EndpointResolver::new(
        client.clone(),
        config.kubewarden_namespace.clone(),
        config.policy_server_url.clone(),
    ));
    let catalog = Arc::new(KubePolicyCatalog {
        client: client.clone(),
        cluster: cluster.clone() as Arc<dyn ClusterAccess>,
        resolver: resolver.clone(),
    });
    let transport = Arc::new(Transport::new(
        http_client,
        Duration::from_secs(DEFAULT_EVALUATION_TIMEOUT_SECS),
    ));
    let store = Arc::new(KubeReportStore::new(client));

    let engine = ScanEngine {
        cluster: cluster as Arc<dyn ClusterAccess>,
        catalog,
        resolver,
        transport: transport as Arc<dyn Evaluate>,
        store: store as Arc<dyn ReportStore>,
        config: EngineConfig {
            parallel_namespaces: config.parallel_namespaces,
            parallel_resources: config.parallel_resources,
            parallel_policies: config.parallel_policies,
            disable_store: config.disable_store,
        },
    };

    let cancel = CancellationToken::new();
    let run_id = RunId::new();
    info!(run_id = %run_id, "scan_starting");

    let outcome = if let Some(ns) = &config.namespace {
        let reports = engine.scan_namespace(run_id, ns, &cancel).await?;
        let cluster_reports = if config.cluster {
            engine.scan_cluster_wide_resources(run_id, &cancel).await?
        } else {
            Vec::new()
        };
        audit_scanner::engine::ScanOutcome {
            run_id,
            namespaced_reports: reports,
            cluster_reports,
            namespaces_scanned: 1,
            ..Default::default()
        }
    } else {
        let excluded = config.excluded_namespaces();
        let mut outcome = engine.scan_all_namespaces(run_id, &excluded, &cancel).await?;
        if config.cluster {
            let cluster_reports = engine.scan_cluster_wide_resources(run_id, &cancel).await?;
            outcome.cluster_reports = cluster_reports;
        }
        outcome
    };

    info!(
        run_id = %run_id,
        namespaces_scanned = outcome.namespaces_scanned,
        namespaces_failed = outcome.namespaces_failed,
        namespaced_reports = outcome.namespaced_reports.len(),
        cluster_reports = outcome.cluster_reports.len(),
        "scan_complete"
    );

    if outcome.namespaces_failed > 0 {
        error!(namespaces_failed = outcome.namespaces_failed, "some_namespaces_failed");
    }

    if config.output_scan {
        audit_scanner::output::dump_scan(&outcome)?;
    }

    Ok(())
}

fn to_scan_config(args: ScanArgs) -> ScanConfig {
    ScanConfig {
        namespace: args.namespace,
        cluster: args.cluster,
        kubewarden_namespace: args.kubewarden_namespace,
        skip_namespaces: args.skip_namespace,
        policy_server_url: args.policy_server_url,
        tls: TlsConfig {
            insecure: args.insecure,
            ca_file: args.ca_file,
            client_cert: args.client_cert,
            client_key: args.client_key,
        },
        parallel_namespaces: args.parallel_namespaces,
        parallel_resources: args.parallel_resources,
        parallel_policies: args.parallel_policies,
        page_size: args.page_size,
        loglevel: args.loglevel,
        output_scan: args.output_scan,
        disable_store: args.disable_store,
    }
}
