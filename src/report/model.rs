//! Report CRD types (C4 data model): `PolicyReport` (namespaced) and
//! `ClusterPolicyReport` (cluster-scoped), grounded on the same
//! `#[derive(CustomResource)]` + `camelCase` shape as `crd.rs`'s policy
//! kinds, reusing `Severity` in the spirit of the teacher's `crd.rs`
//! `Severity` enum (`Critical`/`High`/`Medium`/`Low`), extended with
//! `Info` for monitor-mode failures.

use chrono::{DateTime, Utc};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::CustomResource;
use kube::core::DynamicObject;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::catalog::PolicyLike;
use crate::evaluator::Outcome;
use crate::runid::RunId;

pub const REPORT_GROUP: &str = "policy-reporting.kubewarden.io";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub enum Severity {
    Critical,
    High,
    #[default]
    Medium,
    Low,
    /// Assigned instead of the policy's own severity when its mode is
    /// `monitor` — a monitor-mode failure is advisory, never a block.
    Info,
}

/// Identifies the resource a report was generated for; also mirrored
/// into `metadata.ownerReferences` for Kubernetes-native GC.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "camelCase")]
pub struct ReportScope {
    pub api_version: String,
    pub kind: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    pub uid: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "camelCase")]
pub struct ResultEntryProperties {
    pub policy_uid: String,
    pub policy_resource_version: String,
    pub policy_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub policy_namespace: Option<String>,
    pub mutating: bool,
    pub validating: bool,
    pub context_aware: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ResultEntry {
    pub policy_unique_name: String,
    pub result: Outcome,
    pub severity: Severity,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default = "scored_default")]
    pub scored: bool,
    pub properties: ResultEntryProperties,
}

fn scored_default() -> bool {
    true
}

/// Tally by outcome. `warn` is carried for report-schema compatibility
/// with the wider PolicyReport/OpenReport family mentioned in
/// `spec.md` §9 but is never incremented by this scanner: every
/// evaluated outcome is `pass`, `fail`, or `error` (invariant 3), with
/// monitor-mode failures distinguished by `Severity::Info` on the
/// result entry rather than by a separate summary bucket.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Summary {
    pub pass: u32,
    pub fail: u32,
    pub warn: u32,
    pub error: u32,
    pub skip: u32,
}

impl Summary {
    pub fn total_results(&self) -> u32 {
        self.pass + self.fail + self.error
    }
}

#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema, Default)]
#[kube(
    group = "policy-reporting.kubewarden.io",
    version = "v1",
    kind = "PolicyReport",
    plural = "policyreports",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct NamespacedReportSpec {
    pub scope: ReportScope,
    #[serde(default)]
    pub summary: Summary,
    #[serde(default)]
    pub results: Vec<ResultEntry>,
}

pub type NamespacedReport = PolicyReport;

#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema, Default)]
#[kube(
    group = "policy-reporting.kubewarden.io",
    version = "v1",
    kind = "ClusterPolicyReport",
    plural = "clusterpolicyreports"
)]
#[serde(rename_all = "camelCase")]
pub struct ClusterReportSpec {
    pub scope: ReportScope,
    #[serde(default)]
    pub summary: Summary,
    #[serde(default)]
    pub results: Vec<ResultEntry>,
}

pub type ClusterReport = ClusterPolicyReport;

fn owner_reference(resource: &DynamicObject) -> OwnerReference {
    let types = resource.types.clone().unwrap_or_default();
    OwnerReference {
        api_version: types.api_version,
        kind: types.kind,
        name: resource.metadata.name.clone().unwrap_or_default(),
        uid: resource.metadata.uid.clone().unwrap_or_default(),
        controller: Some(false),
        block_owner_deletion: Some(false),
    }
}

fn report_scope(resource: &DynamicObject) -> ReportScope {
    let types = resource.types.clone().unwrap_or_default();
    ReportScope {
        api_version: types.api_version,
        kind: types.kind,
        name: resource.metadata.name.clone().unwrap_or_default(),
        namespace: resource.metadata.namespace.clone(),
        uid: resource.metadata.uid.clone().unwrap_or_default(),
    }
}

fn report_labels(run_id: RunId) -> std::collections::BTreeMap<String, String> {
    use crate::runid::{APP_NAME, MANAGED_BY_LABEL, REPORT_VERSION, REPORT_VERSION_LABEL, RUN_UID_LABEL};
    let mut labels = std::collections::BTreeMap::new();
    labels.insert(MANAGED_BY_LABEL.to_string(), APP_NAME.to_string());
    labels.insert(REPORT_VERSION_LABEL.to_string(), REPORT_VERSION.to_string());
    labels.insert(RUN_UID_LABEL.to_string(), run_id.to_string());
    labels
}

/// `newReport(runID, resource) → Report` (`spec.md` §4.4), keyed by the
/// resource's UID so repeated evaluations converge on one object.
pub fn new_report(run_id: RunId, resource: &DynamicObject) -> NamespacedReport {
    let uid = resource.metadata.uid.clone().unwrap_or_default();
    let mut report = NamespacedReport::new(
        &uid,
        NamespacedReportSpec {
            scope: report_scope(resource),
            summary: Summary::default(),
            results: Vec::new(),
        },
    );
    report.metadata.namespace = resource.metadata.namespace.clone();
    report.metadata.labels = Some(report_labels(run_id));
    report.metadata.owner_references = Some(vec![owner_reference(resource)]);
    report
}

/// `newClusterReport(runID, resource) → ClusterReport`.
pub fn new_cluster_report(run_id: RunId, resource: &DynamicObject) -> ClusterReport {
    let uid = resource.metadata.uid.clone().unwrap_or_default();
    let mut report = ClusterReport::new(
        &uid,
        ClusterReportSpec {
            scope: report_scope(resource),
            summary: Summary::default(),
            results: Vec::new(),
        },
    );
    report.metadata.labels = Some(report_labels(run_id));
    report.metadata.owner_references = Some(vec![owner_reference(resource)]);
    report
}

fn result_entry(policy: &dyn PolicyLike, outcome: Outcome, message: Option<String>) -> ResultEntry {
    let severity = if policy.mode() == crate::crd::PolicyMode::Monitor {
        Severity::Info
    } else {
        policy
            .severity()
            .and_then(|s| match s.to_lowercase().as_str() {
                "critical" => Some(Severity::Critical),
                "high" => Some(Severity::High),
                "medium" => Some(Severity::Medium),
                "low" => Some(Severity::Low),
                _ => None,
            })
            .unwrap_or_default()
    };

    ResultEntry {
        policy_unique_name: policy.unique_name(),
        result: outcome,
        severity,
        category: policy.category().map(str::to_string),
        timestamp: Utc::now(),
        message,
        scored: true,
        properties: ResultEntryProperties {
            policy_uid: policy.uid(),
            policy_resource_version: policy.resource_version(),
            policy_name: policy.unique_name(),
            policy_namespace: policy.namespace(),
            mutating: policy.is_mutating(),
            validating: !policy.is_mutating(),
            context_aware: policy.is_context_aware(),
        },
    }
}

/// `addResult(report, policy, outcome, message)` — appends a
/// `ResultEntry` and bumps `summary.{pass,fail,error}` (`spec.md` §4.4).
/// `warn` is intentionally never incremented here; see `Summary`'s doc
/// comment. `summary.error` only ever reflects per-result `Outcome::Error`
/// entries added through `add_result` — the grouping's pre-evaluation
/// `errored` tally (policies dropped before any request was sent, e.g. for
/// an unknown GVR) is surfaced only in run-level logs, never folded into a
/// report's `summary`, so `summary.pass + summary.fail + summary.error`
/// always equals `len(results)` (`spec.md` §8 "Quantified invariants"; see
/// `SPEC_FULL.md` §0 for why this takes precedence over the narrower
/// reading of invariant 3).
pub trait AddResult {
    fn add_result(&mut self, policy: &dyn PolicyLike, outcome: Outcome, message: Option<String>);
    fn set_skip(&mut self, n: u32);
}

macro_rules! impl_add_result {
    ($ty:ty) => {
        impl AddResult for $ty {
            fn add_result(&mut self, policy: &dyn PolicyLike, outcome: Outcome, message: Option<String>) {
                match outcome {
                    Outcome::Pass => self.spec.summary.pass += 1,
                    Outcome::Fail => self.spec.summary.fail += 1,
                    Outcome::Error => self.spec.summary.error += 1,
                }
                self.spec.results.push(result_entry(policy, outcome, message));
            }

            fn set_skip(&mut self, n: u32) {
                self.spec.summary.skip = n;
            }
        }
    };
}

impl_add_result!(NamespacedReport);
impl_add_result!(ClusterReport);

#[cfg(test)]
mod tests {
    use super::*;
    use kube::core::{ObjectMeta, TypeMeta};

    fn pod() -> DynamicObject {
        DynamicObject {
            types: Some(TypeMeta {
                api_version: "v1".to_string(),
                kind: "Pod".to_string(),
            }),
            metadata: ObjectMeta {
                name: Some("nginx".into()),
                namespace: Some("ns1".into()),
                uid: Some("pod-uid-1".into()),
                ..Default::default()
            },
            data: serde_json::json!({}),
        }
    }

    #[test]
    fn new_report_is_keyed_by_resource_uid() {
        let run_id = RunId::new();
        let report = new_report(run_id, &pod());
        assert_eq!(report.name_any_for_test(), "pod-uid-1");
    }

    #[test]
    fn new_report_carries_run_uid_label() {
        let run_id = RunId::new();
        let report = new_report(run_id, &pod());
        let labels = report.metadata.labels.unwrap();
        assert_eq!(
            labels.get(crate::runid::RUN_UID_LABEL),
            Some(&run_id.to_string())
        );
    }

    #[test]
    fn new_report_sets_owner_reference() {
        let run_id = RunId::new();
        let report = new_report(run_id, &pod());
        let owners = report.metadata.owner_references.unwrap();
        assert_eq!(owners.len(), 1);
        assert_eq!(owners[0].kind, "Pod");
        assert_eq!(owners[0].uid, "pod-uid-1");
    }

    #[test]
    fn summary_total_results_excludes_skip() {
        let summary = Summary {
            pass: 2,
            fail: 1,
            warn: 0,
            error: 1,
            skip: 5,
        };
        assert_eq!(summary.total_results(), 4);
    }

    trait TestNameExt {
        fn name_any_for_test(&self) -> String;
    }

    impl TestNameExt for NamespacedReport {
        fn name_any_for_test(&self) -> String {
            use kube::ResourceExt;
            self.name_any()
        }
    }
}
