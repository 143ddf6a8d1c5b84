//! Scan engine (C5): orchestrates the per-namespace and cluster-wide
//! scans with bounded parallelism at three nested levels (namespaces,
//! resources, policies).
//!
//! The teacher has no equivalent of this fan-out — its `reconcile.rs`
//! drives a single `kube::runtime::Controller` watch loop, one object at
//! a time. Bounded nested concurrency here is grounded in the pack's
//! `other_examples/855f0601_abiolaogu-couchestor-ce/.../storage_.rs`
//! (`tokio::sync::Semaphore` sized by a `max_concurrent_*` constructor
//! argument) and its `CancellationToken`-based cooperative shutdown
//! pattern (`other_examples/e3ca65e9_eosin-platform-eosin__storage-operator
//! -src-clusters-reconcile.rs.rs`), generalized from one cancellation
//! point to three nested pools.

use std::sync::Arc;

use futures::stream::{FuturesUnordered, StreamExt};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::catalog::{Gvr, PolicyCatalog, PolicyGrouping, PolicyHandle, ResolveEndpoint, label_selector_matches};
use crate::cluster::ClusterAccess;
use crate::error::{Result, ScanError};
use crate::evaluator::Evaluate;
use crate::report::model::{AddResult, ClusterReport, NamespacedReport, new_cluster_report, new_report};
use crate::report::store::ReportStore;
use crate::runid::RunId;

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub parallel_namespaces: usize,
    pub parallel_resources: usize,
    pub parallel_policies: usize,
    pub disable_store: bool,
}

/// Everything one scan run needs, bundled so `commands::scan::run` only
/// has to build this once. Every collaborator is a trait object so the
/// whole engine can be driven against fakes in tests without a live
/// cluster or policy server.
pub struct ScanEngine {
    pub cluster: Arc<dyn ClusterAccess>,
    pub catalog: Arc<dyn PolicyCatalog>,
    pub resolver: Arc<dyn ResolveEndpoint>,
    pub transport: Arc<dyn Evaluate>,
    pub store: Arc<dyn ReportStore>,
    pub config: EngineConfig,
}

/// Whole-run result, built up across every namespace/cluster-wide scan.
/// Consumed by `output::dump_scan` for `--output-scan`.
#[derive(Default)]
pub struct ScanOutcome {
    pub run_id: RunId,
    pub namespaced_reports: Vec<NamespacedReport>,
    pub cluster_reports: Vec<ClusterReport>,
    pub namespaces_scanned: usize,
    pub namespaces_failed: usize,
}

impl ScanEngine {
    /// `scanAllNamespaces(ctx, runID)` (`spec.md` §4.5): enumerates
    /// audited namespaces, scans each with parallelism `P_ns`, and only
    /// runs stale-report GC for namespaces whose scan actually completed
    /// (a failed namespace's prior reports are left alone rather than
    /// risk deleting still-valid results).
    pub async fn scan_all_namespaces(
        &self,
        run_id: RunId,
        excluded: &[String],
        cancel: &CancellationToken,
    ) -> Result<ScanOutcome> {
        let namespaces = self.cluster.list_audited_namespaces(excluded).await?;
        let mut outcome = ScanOutcome {
            run_id,
            ..Default::default()
        };

        let ns_semaphore = Arc::new(Semaphore::new(self.config.parallel_namespaces.max(1)));
        let mut tasks = FuturesUnordered::new();

        for ns in namespaces {
            let semaphore = ns_semaphore.clone();
            let cancel = cancel.clone();
            tasks.push(async move {
                if cancel.is_cancelled() {
                    return (ns, Err(ScanError::Canceled));
                }
                let _permit = semaphore.acquire_owned().await.expect("semaphore not closed");
                let result = self.scan_namespace_reports_only(run_id, &ns, &cancel).await;
                (ns, result)
            });
        }

        while let Some((ns, result)) = tasks.next().await {
            match result {
                Ok(reports) => {
                    outcome.namespaced_reports.extend(reports);
                    if !cancel.is_cancelled() {
                        if self.config.disable_store {
                            outcome.namespaces_scanned += 1;
                            continue;
                        }
                        match self.store.delete_old_reports(&ns, run_id).await {
                            Ok(_) => outcome.namespaces_scanned += 1,
                            Err(e) => {
                                warn!(namespace = %ns, error = %e, "stale_report_gc_failed");
                                outcome.namespaces_failed += 1;
                            }
                        }
                    }
                }
                Err(ScanError::Canceled) => {
                    outcome.namespaces_failed += 1;
                }
                Err(e) => {
                    warn!(namespace = %ns, error = %e, "namespace_scan_failed");
                    outcome.namespaces_failed += 1;
                }
            }
        }

        Ok(outcome)
    }

    /// `scanNamespace(ctx, runID, ns)` for the top-level entry point:
    /// scans `ns` and performs its stale-report GC immediately after.
    pub async fn scan_namespace(&self, run_id: RunId, ns: &str, cancel: &CancellationToken) -> Result<Vec<NamespacedReport>> {
        let reports = self.scan_namespace_reports_only(run_id, ns, cancel).await?;
        if !self.config.disable_store && !cancel.is_cancelled() {
            self.store.delete_old_reports(ns, run_id).await?;
        }
        Ok(reports)
    }

    /// The namespace scan minus its trailing stale-report GC, factored
    /// out so `scan_all_namespaces` can defer GC until every namespace's
    /// `createOrPatch`s have completed (`spec.md` §5 "happens-after
    /// barrier").
    async fn scan_namespace_reports_only(
        &self,
        run_id: RunId,
        ns: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<NamespacedReport>> {
        let grouping = self.catalog.get_policies_for_namespace(ns).await?;
        info!(
            namespace = ns,
            auditable = grouping.auditable,
            skipped = grouping.skipped,
            errored = grouping.errored,
            "policy_grouping_built"
        );

        if grouping.is_empty() {
            return Ok(Vec::new());
        }

        let mut reports = Vec::new();
        for gvr in grouping.by_gvr.keys().cloned().collect::<Vec<_>>() {
            if cancel.is_cancelled() {
                return Err(ScanError::Canceled);
            }
            let policies = grouping.policies_for(&gvr).to_vec();
            let gvr_reports = self
                .scan_gvr_namespaced(run_id, ns, &gvr, &policies, &grouping, cancel)
                .await?;
            reports.extend(gvr_reports);
        }

        Ok(reports)
    }

    async fn scan_gvr_namespaced(
        &self,
        run_id: RunId,
        ns: &str,
        gvr: &Gvr,
        policies: &[PolicyHandle],
        grouping: &PolicyGrouping,
        cancel: &CancellationToken,
    ) -> Result<Vec<NamespacedReport>> {
        use futures::TryStreamExt;

        let stream = self.cluster.list_resources(gvr, Some(ns));
        let resources: Vec<_> = match stream.try_collect().await {
            Ok(items) => items,
            Err(e) if e_is_localized(&e) => {
                warn!(%gvr, namespace = ns, error = %e, "gvr_list_skipped");
                return Ok(Vec::new());
            }
            Err(e) => return Err(e),
        };

        let resource_semaphore = Arc::new(Semaphore::new(self.config.parallel_resources.max(1)));
        let mut tasks = FuturesUnordered::new();

        for object in resources {
            // MATCHED: narrow this resource's applicable policies by
            // object-selector (`spec.md` §4.5 step 2).
            let labels = object.metadata.labels.clone().unwrap_or_default();
            let matched: Vec<PolicyHandle> = policies
                .iter()
                .filter(|p| label_selector_matches(p.object_selector(), &labels))
                .cloned()
                .collect();
            if matched.is_empty() {
                continue;
            }

            let semaphore = resource_semaphore.clone();
            let gvr = gvr.clone();
            let cancel = cancel.clone();
            tasks.push(async move {
                if cancel.is_cancelled() {
                    return None;
                }
                let _permit = semaphore.acquire_owned().await.expect("semaphore not closed");
                let uid = object.metadata.uid.clone().unwrap_or_default();
                let mut report = new_report(run_id, &object);
                self.evaluate_resource(&mut report, &gvr, &object, &matched, grouping, &cancel)
                    .await;
                let _ = uid;
                Some(report)
            });
        }

        let mut reports = Vec::new();
        while let Some(result) = tasks.next().await {
            let Some(report) = result else { continue };
            if !self.config.disable_store {
                if let Err(e) = self.store.create_or_patch_namespaced(&report).await {
                    warn!(error = %e, "report_persist_failed");
                    continue;
                }
            }
            reports.push(report);
        }

        Ok(reports)
    }

    /// `scanClusterWideResources(ctx, runID)` (`spec.md` §4.5).
    pub async fn scan_cluster_wide_resources(&self, run_id: RunId, cancel: &CancellationToken) -> Result<Vec<ClusterReport>> {
        let grouping = self.catalog.get_cluster_wide_policies().await?;
        info!(
            auditable = grouping.auditable,
            skipped = grouping.skipped,
            errored = grouping.errored,
            "cluster_policy_grouping_built"
        );

        let mut reports = Vec::new();
        if !grouping.is_empty() {
            for gvr in grouping.by_gvr.keys().cloned().collect::<Vec<_>>() {
                if cancel.is_cancelled() {
                    return Err(ScanError::Canceled);
                }
                let policies = grouping.policies_for(&gvr).to_vec();
                let gvr_reports = self.scan_gvr_cluster(run_id, &gvr, &policies, &grouping, cancel).await?;
                reports.extend(gvr_reports);
            }
        }

        if !self.config.disable_store && !cancel.is_cancelled() {
            self.store.delete_old_cluster_reports(run_id).await?;
        }

        Ok(reports)
    }

    async fn scan_gvr_cluster(
        &self,
        run_id: RunId,
        gvr: &Gvr,
        policies: &[PolicyHandle],
        grouping: &PolicyGrouping,
        cancel: &CancellationToken,
    ) -> Result<Vec<ClusterReport>> {
        use futures::TryStreamExt;

        let stream = self.cluster.list_resources(gvr, None);
        let resources: Vec<_> = match stream.try_collect().await {
            Ok(items) => items,
            Err(e) if e_is_localized(&e) => {
                warn!(%gvr, error = %e, "gvr_list_skipped");
                return Ok(Vec::new());
            }
            Err(e) => return Err(e),
        };

        let resource_semaphore = Arc::new(Semaphore::new(self.config.parallel_resources.max(1)));
        let mut tasks = FuturesUnordered::new();

        for object in resources {
            let labels = object.metadata.labels.clone().unwrap_or_default();
            let matched: Vec<PolicyHandle> = policies
                .iter()
                .filter(|p| label_selector_matches(p.object_selector(), &labels))
                .cloned()
                .collect();
            if matched.is_empty() {
                continue;
            }

            let semaphore = resource_semaphore.clone();
            let gvr = gvr.clone();
            let cancel = cancel.clone();
            tasks.push(async move {
                if cancel.is_cancelled() {
                    return None;
                }
                let _permit = semaphore.acquire_owned().await.expect("semaphore not closed");
                let mut report = new_cluster_report(run_id, &object);
                self.evaluate_resource(&mut report, &gvr, &object, &matched, grouping, &cancel)
                    .await;
                Some(report)
            });
        }

        let mut reports = Vec::new();
        while let Some(result) = tasks.next().await {
            let Some(report) = result else { continue };
            if !self.config.disable_store {
                if let Err(e) = self.store.create_or_patch_cluster(&report).await {
                    warn!(error = %e, "report_persist_failed");
                    continue;
                }
            }
            reports.push(report);
        }

        Ok(reports)
    }

    /// EVALUATING → ASSEMBLED: fans out one resource's applicable
    /// policies with the `P_pol` pool, appends each result to the
    /// resource's report (owned exclusively by this call, never shared
    /// across workers per `spec.md` §5), then stamps the engine-provided
    /// skip/error pre-counters (`spec.md` §4.5 step 4).
    async fn evaluate_resource<R: AddResult>(
        &self,
        report: &mut R,
        gvr: &Gvr,
        object: &kube::core::DynamicObject,
        matched_policies: &[PolicyHandle],
        grouping: &PolicyGrouping,
        cancel: &CancellationToken,
    ) {
        let uid = object.metadata.uid.clone().unwrap_or_default();
        let policy_semaphore = Arc::new(Semaphore::new(self.config.parallel_policies.max(1)));
        let mut tasks = FuturesUnordered::new();

        for policy in matched_policies {
            let semaphore = policy_semaphore.clone();
            let policy = policy.clone();
            let cancel = cancel.clone();
            let resolver = self.resolver.clone();
            tasks.push(async move {
                if cancel.is_cancelled() {
                    return None;
                }
                let _permit = semaphore.acquire_owned().await.expect("semaphore not closed");
                let endpoint = match resolver.resolve(policy.as_ref()).await {
                    Ok(endpoint) => endpoint,
                    Err(e) => {
                        warn!(policy = %policy.unique_name(), error = %e, "endpoint_resolution_failed_during_evaluation");
                        return None;
                    }
                };
                Some((policy, endpoint))
            });
        }

        let mut resolved = Vec::new();
        while let Some(item) = tasks.next().await {
            if let Some(pair) = item {
                resolved.push(pair);
            }
        }

        let mut eval_tasks = FuturesUnordered::new();
        for (policy, endpoint) in resolved {
            let uid = uid.clone();
            let gvr = gvr.clone();
            let object = object.clone();
            let transport = self.transport.clone();
            eval_tasks.push(async move {
                let result = transport
                    .evaluate(&policy.unique_name(), &endpoint, &uid, &gvr, &object)
                    .await;
                (policy, result)
            });
        }

        while let Some((policy, result)) = eval_tasks.next().await {
            report.add_result(policy.as_ref(), result.outcome, result.message);
        }

        // Engine-provided pre-evaluation skip counter: the grouping's
        // cluster-wide skip tally applies to every resource evaluated
        // under this GVR (`spec.md` §3 invariant 3). The grouping's
        // `errored` tally is logged at the run level only — see
        // `AddResult`'s doc comment for why it never lands in `summary`.
        report.set_skip(grouping.skipped);
    }
}

fn e_is_localized(err: &ScanError) -> bool {
    matches!(err, ScanError::Discovery { .. } | ScanError::Auth { .. } | ScanError::UnknownGvr { .. })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{FakePolicyCatalog, FakeResolveEndpoint, Gvr, PolicyHandle};
    use crate::cluster::tests::FakeClusterAccess;
    use crate::crd::{ClusterAdmissionPolicy, ClusterAdmissionPolicySpec, PolicyCommonSpec, PolicyStatus, PolicyStatusPhase};
    use crate::evaluator::{FakeTransport, Outcome};
    use crate::report::store::FakeReportStore;
    use std::collections::{BTreeMap, VecDeque};
    use std::sync::Mutex;

    fn dynamic_object(uid: &str, ns: Option<&str>, labels: BTreeMap<String, String>) -> kube::core::DynamicObject {
        kube::core::DynamicObject {
            types: Some(kube::core::TypeMeta {
                api_version: "v1".to_string(),
                kind: "Pod".to_string(),
            }),
            metadata: kube::core::ObjectMeta {
                name: Some("obj".to_string()),
                namespace: ns.map(str::to_string),
                uid: Some(uid.to_string()),
                labels: (!labels.is_empty()).then_some(labels),
                ..Default::default()
            },
            data: serde_json::json!({}),
        }
    }

    fn cluster_wide_policy(name: &str) -> PolicyHandle {
        Arc::new(ClusterAdmissionPolicy {
            metadata: kube::core::ObjectMeta {
                name: Some(name.to_string()),
                ..Default::default()
            },
            spec: ClusterAdmissionPolicySpec {
                common: PolicyCommonSpec {
                    policy_server: "default".to_string(),
                    background_audit: true,
                    ..Default::default()
                },
                namespace_selector: None,
            },
            status: Some(PolicyStatus {
                policy_status: PolicyStatusPhase::Active,
            }),
        }) as PolicyHandle
    }

    struct Fakes {
        engine: ScanEngine,
        store: Arc<FakeReportStore>,
    }

    fn fake_engine(
        namespaces: Vec<String>,
        scopes: BTreeMap<Gvr, bool>,
        resources: BTreeMap<(Gvr, Option<String>), VecDeque<kube::core::DynamicObject>>,
        grouping: PolicyGrouping,
        transport: FakeTransport,
    ) -> Fakes {
        let cluster = Arc::new(FakeClusterAccess {
            namespaces,
            namespace_labels: BTreeMap::new(),
            scopes,
            resources: Mutex::new(resources),
        });
        let store = Arc::new(FakeReportStore::new());
        let catalog = FakePolicyCatalog::new();
        *catalog.cluster_wide.lock().unwrap() = Some(grouping);
        let engine = ScanEngine {
            cluster: cluster as Arc<dyn ClusterAccess>,
            catalog: Arc::new(catalog),
            resolver: Arc::new(FakeResolveEndpoint {
                base: "http://policy-server.test".parse().unwrap(),
                kubewarden_namespace: "kubewarden".to_string(),
            }),
            transport: Arc::new(transport),
            store: store.clone(),
            config: EngineConfig {
                parallel_namespaces: 2,
                parallel_resources: 2,
                parallel_policies: 2,
                disable_store: false,
            },
        };
        Fakes { engine, store }
    }

    #[test]
    fn object_selector_narrows_matched_resources() {
        let selector = k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector {
            match_labels: Some({
                let mut m = BTreeMap::new();
                m.insert("env".to_string(), "test".to_string());
                m
            }),
            match_expressions: None,
        };

        assert!(!crate::catalog::label_selector_matches(Some(&selector), &BTreeMap::new()));

        let mut labels = BTreeMap::new();
        labels.insert("env".to_string(), "test".to_string());
        assert!(crate::catalog::label_selector_matches(Some(&selector), &labels));
    }

    #[tokio::test]
    async fn cluster_wide_scan_persists_one_report_per_resource() {
        let gvr = Gvr::new("", "v1", "namespaces");
        let policy = cluster_wide_policy("no-latest");

        let mut grouping = PolicyGrouping::default();
        grouping.auditable = 1;
        grouping.by_gvr.insert(gvr.clone(), vec![policy.clone()]);

        let mut resources = BTreeMap::new();
        resources.insert(
            (gvr.clone(), None),
            VecDeque::from(vec![
                dynamic_object("uid-a", None, BTreeMap::new()),
                dynamic_object("uid-b", None, BTreeMap::new()),
            ]),
        );

        let transport = FakeTransport::new().with_outcome(&policy.unique_name(), Outcome::Pass, None);
        let fakes = fake_engine(vec![], BTreeMap::from([(gvr.clone(), false)]), resources, grouping, transport);

        let cancel = CancellationToken::new();
        let run_id = RunId::new();
        let reports = fakes.engine.scan_cluster_wide_resources(run_id, &cancel).await.unwrap();

        assert_eq!(reports.len(), 2);
        for report in &reports {
            assert_eq!(report.spec.summary.pass, 1);
            assert_eq!(report.spec.summary.fail, 0);
        }
        assert_eq!(fakes.store.cluster.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn transport_error_is_recorded_without_aborting_scan() {
        let gvr = Gvr::new("", "v1", "namespaces");
        // Policy name is never scripted in the fake transport, so every
        // evaluation comes back `Outcome::Error` rather than panicking.
        let policy = cluster_wide_policy("unreachable-policy");

        let mut grouping = PolicyGrouping::default();
        grouping.auditable = 1;
        grouping.by_gvr.insert(gvr.clone(), vec![policy.clone()]);

        let mut resources = BTreeMap::new();
        resources.insert(
            (gvr.clone(), None),
            VecDeque::from(vec![dynamic_object("uid-a", None, BTreeMap::new())]),
        );

        let fakes = fake_engine(
            vec![],
            BTreeMap::from([(gvr.clone(), false)]),
            resources,
            grouping,
            FakeTransport::new(),
        );

        let cancel = CancellationToken::new();
        let reports = fakes
            .engine
            .scan_cluster_wide_resources(RunId::new(), &cancel)
            .await
            .unwrap();

        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].spec.summary.error, 1);
        assert_eq!(reports[0].spec.summary.pass, 0);
    }

    #[tokio::test]
    async fn skip_counter_propagates_to_every_report_without_inflating_error() {
        let gvr = Gvr::new("", "v1", "namespaces");
        let policy = cluster_wide_policy("active-policy");

        let mut grouping = PolicyGrouping::default();
        grouping.auditable = 1;
        grouping.skipped = 3;
        grouping.errored = 2;
        grouping.by_gvr.insert(gvr.clone(), vec![policy.clone()]);

        let mut resources = BTreeMap::new();
        resources.insert(
            (gvr.clone(), None),
            VecDeque::from(vec![dynamic_object("uid-a", None, BTreeMap::new())]),
        );

        let transport = FakeTransport::new().with_outcome(&policy.unique_name(), Outcome::Pass, None);
        let fakes = fake_engine(vec![], BTreeMap::from([(gvr.clone(), false)]), resources, grouping, transport);

        let reports = fakes
            .engine
            .scan_cluster_wide_resources(RunId::new(), &CancellationToken::new())
            .await
            .unwrap();

        // grouping.errored (pre-evaluation, never sent to a policy server)
        // must not inflate summary.error — only the one Pass result did,
        // so pass + fail + error == len(results) still holds (`spec.md` §8).
        assert_eq!(reports[0].spec.summary.skip, 3);
        assert_eq!(reports[0].spec.summary.error, 0);
        assert_eq!(reports[0].spec.summary.pass, 1);
        assert_eq!(reports[0].spec.summary.total_results(), reports[0].spec.results.len() as u32);
    }

    fn fake_engine_namespaced(
        scopes: BTreeMap<Gvr, bool>,
        resources: BTreeMap<(Gvr, Option<String>), VecDeque<kube::core::DynamicObject>>,
        namespace: &str,
        grouping: PolicyGrouping,
        transport: FakeTransport,
    ) -> Fakes {
        let cluster = Arc::new(FakeClusterAccess {
            namespaces: vec![namespace.to_string()],
            namespace_labels: BTreeMap::new(),
            scopes,
            resources: Mutex::new(resources),
        });
        let store = Arc::new(FakeReportStore::new());
        let catalog = FakePolicyCatalog::new();
        catalog.by_namespace.lock().unwrap().insert(namespace.to_string(), grouping);
        let engine = ScanEngine {
            cluster: cluster as Arc<dyn ClusterAccess>,
            catalog: Arc::new(catalog),
            resolver: Arc::new(FakeResolveEndpoint {
                base: "http://policy-server.test".parse().unwrap(),
                kubewarden_namespace: "kubewarden".to_string(),
            }),
            transport: Arc::new(transport),
            store: store.clone(),
            config: EngineConfig {
                parallel_namespaces: 2,
                parallel_resources: 2,
                parallel_policies: 2,
                disable_store: false,
            },
        };
        Fakes { engine, store }
    }

    fn namespaced_policy(name: &str, namespace: &str) -> PolicyHandle {
        Arc::new(crate::crd::AdmissionPolicy {
            metadata: kube::core::ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some(namespace.to_string()),
                ..Default::default()
            },
            spec: crate::crd::AdmissionPolicySpec {
                common: PolicyCommonSpec {
                    policy_server: "default".to_string(),
                    background_audit: true,
                    ..Default::default()
                },
            },
            status: Some(PolicyStatus {
                policy_status: PolicyStatusPhase::Active,
            }),
        }) as PolicyHandle
    }

    // Scenario 1 (`spec.md` §8): happy-path namespaced scan, one pod, one
    // policy that allows it — a single PolicyReport with one pass result.
    #[tokio::test]
    async fn namespaced_scan_happy_path_produces_one_pass_report() {
        let gvr = Gvr::new("", "v1", "pods");
        let policy = namespaced_policy("no-latest", "ns1");

        let mut grouping = PolicyGrouping::default();
        grouping.auditable = 1;
        grouping.by_gvr.insert(gvr.clone(), vec![policy.clone()]);

        let mut resources = BTreeMap::new();
        resources.insert(
            (gvr.clone(), Some("ns1".to_string())),
            VecDeque::from(vec![dynamic_object("pod-uid", Some("ns1"), BTreeMap::new())]),
        );

        let transport = FakeTransport::new().with_outcome(&policy.unique_name(), Outcome::Pass, None);
        let fakes = fake_engine_namespaced(BTreeMap::from([(gvr, true)]), resources, "ns1", grouping, transport);

        let reports = fakes
            .engine
            .scan_namespace(RunId::new(), "ns1", &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].spec.summary.pass, 1);
        assert_eq!(reports[0].spec.summary.fail, 0);
        assert_eq!(reports[0].spec.results.len(), 1);
    }

    // Scenario 2 (`spec.md` §8): the policy endpoint denies the resource.
    #[tokio::test]
    async fn namespaced_scan_denial_produces_one_fail_report() {
        let gvr = Gvr::new("", "v1", "pods");
        let policy = namespaced_policy("no-latest", "ns1");

        let mut grouping = PolicyGrouping::default();
        grouping.auditable = 1;
        grouping.by_gvr.insert(gvr.clone(), vec![policy.clone()]);

        let mut resources = BTreeMap::new();
        resources.insert(
            (gvr.clone(), Some("ns1".to_string())),
            VecDeque::from(vec![dynamic_object("pod-uid", Some("ns1"), BTreeMap::new())]),
        );

        let transport =
            FakeTransport::new().with_outcome(&policy.unique_name(), Outcome::Fail, Some("rejected"));
        let fakes = fake_engine_namespaced(BTreeMap::from([(gvr, true)]), resources, "ns1", grouping, transport);

        let reports = fakes
            .engine
            .scan_namespace(RunId::new(), "ns1", &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(reports[0].spec.summary.fail, 1);
        assert_eq!(reports[0].spec.summary.pass, 0);
        assert_eq!(reports[0].spec.results[0].message.as_deref(), Some("rejected"));
    }

    // Scenario 4 (`spec.md` §8): cluster-wide policy with an object
    // selector targeting `namespaces`; only the matching namespace gets a
    // report.
    #[tokio::test]
    async fn cluster_wide_object_selector_excludes_non_matching_resource() {
        let gvr = Gvr::new("", "v1", "namespaces");
        let selector = k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector {
            match_labels: Some(BTreeMap::from([("env".to_string(), "test".to_string())])),
            match_expressions: None,
        };
        let policy = Arc::new(ClusterAdmissionPolicy {
            metadata: kube::core::ObjectMeta {
                name: Some("env-test-only".to_string()),
                ..Default::default()
            },
            spec: ClusterAdmissionPolicySpec {
                common: PolicyCommonSpec {
                    policy_server: "default".to_string(),
                    background_audit: true,
                    object_selector: Some(selector),
                    ..Default::default()
                },
                namespace_selector: None,
            },
            status: Some(PolicyStatus {
                policy_status: PolicyStatusPhase::Active,
            }),
        }) as PolicyHandle;

        let mut grouping = PolicyGrouping::default();
        grouping.auditable = 1;
        grouping.by_gvr.insert(gvr.clone(), vec![policy.clone()]);

        let mut labels_b = BTreeMap::new();
        labels_b.insert("env".to_string(), "test".to_string());

        let mut resources = BTreeMap::new();
        resources.insert(
            (gvr.clone(), None),
            VecDeque::from(vec![
                dynamic_object("uid-a", None, BTreeMap::new()),
                dynamic_object("uid-b", None, labels_b),
            ]),
        );

        let transport = FakeTransport::new().with_outcome(&policy.unique_name(), Outcome::Pass, None);
        let fakes = fake_engine(vec![], BTreeMap::from([(gvr, false)]), resources, grouping, transport);

        let reports = fakes
            .engine
            .scan_cluster_wide_resources(RunId::new(), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].spec.scope.uid, "uid-b");
    }
}
