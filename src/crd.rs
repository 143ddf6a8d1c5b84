//! Policy CRD types and the shared type scheme (C6).
//!
//! Four policy kinds share the capability set described in `spec.md` §9:
//! cluster-wide and namespaced admission policies, and their "group"
//! variants. They are modeled as four distinct `CustomResource` types with
//! a common, flattened spec (`PolicyCommonSpec`) — mirroring the teacher's
//! `DevOpsPolicy`/`PolicyAuditResult` CRD shape in `crd.rs` (derive list,
//! `#[serde(rename_all = "camelCase")]`, `Option<T>` + `skip_serializing_if`
//! for every field a cluster admin may omit).

use std::collections::BTreeMap;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

pub const POLICY_GROUP: &str = "policies.kubewarden.io";
pub const POLICY_VERSION: &str = "v1";

/* ============================= SHARED ENUMS ============================= */

/// Whether a policy denies (`protect`) or only records (`monitor`) a
/// failing evaluation. `monitor`-mode failures are surfaced as `info`
/// severity per `spec.md` §3 ("EvaluationOutcome").
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub enum PolicyMode {
    #[default]
    Protect,
    Monitor,
}

/// Observed lifecycle phase of a policy, as written by the policy
/// lifecycle controller (external to this scanner; read-only here).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "PascalCase")]
pub enum PolicyStatusPhase {
    #[default]
    Pending,
    Scheduled,
    Active,
    Unscheduled,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "camelCase")]
pub struct PolicyStatus {
    #[serde(default)]
    pub policy_status: PolicyStatusPhase,
}

/// One `rules[]` entry (admissionregistration-style). A component is
/// `"*"` when it matches every value; see `catalog::MatchRule` for the
/// wildcard-dropping and GVR cross-product logic that consumes this.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct PolicyRule {
    #[serde(default)]
    pub api_groups: Vec<String>,
    #[serde(default)]
    pub api_versions: Vec<String>,
    #[serde(default)]
    pub resources: Vec<String>,
    #[serde(default)]
    pub operations: Vec<String>,
}

fn default_background_audit() -> bool {
    true
}

/// Fields shared by all four policy kinds, flattened into each kind's
/// spec so every kind still exposes the capability set in `spec.md` §9
/// without a trait-object CRD (kube's `CustomResource` derive needs a
/// concrete spec type per kind).
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PolicyCommonSpec {
    /// Name of the `PolicyServer` that serves this policy.
    pub policy_server: String,

    #[serde(default)]
    pub rules: Vec<PolicyRule>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub object_selector: Option<LabelSelector>,

    #[serde(default)]
    pub mode: PolicyMode,

    #[serde(default)]
    pub mutating: bool,

    /// Whether this policy participates in background (offline) audit
    /// scans at all. Defaults to `true`, matching upstream kubewarden
    /// policy defaults.
    #[serde(default = "default_background_audit")]
    pub background_audit: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context_aware_resources: Option<Vec<String>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub severity: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
}

impl PolicyCommonSpec {
    pub fn is_context_aware(&self) -> bool {
        self.context_aware_resources
            .as_ref()
            .is_some_and(|r| !r.is_empty())
    }
}

impl Default for PolicyCommonSpec {
    fn default() -> Self {
        Self {
            policy_server: String::new(),
            rules: Vec::new(),
            object_selector: None,
            mode: PolicyMode::default(),
            mutating: false,
            background_audit: default_background_audit(),
            context_aware_resources: None,
            severity: None,
            category: None,
        }
    }
}

/// A single member of a policy group, referencing one of the group's
/// constituent policy modules. The scanner records group membership for
/// completeness but does not evaluate the group's boolean `expression`
/// itself — that happens inside the policy-server, which is a black box
/// to this scanner (see `spec.md` §1 "Out of scope").
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "camelCase")]
pub struct PolicyGroupMember {
    pub module: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expression: Option<String>,
}

/* ============================= CLUSTER-WIDE POLICY ============================= */

#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema, Default)]
#[kube(
    group = "policies.kubewarden.io",
    version = "v1",
    kind = "ClusterAdmissionPolicy",
    plural = "clusteradmissionpolicies",
    status = "PolicyStatus"
)]
#[serde(rename_all = "camelCase")]
pub struct ClusterAdmissionPolicySpec {
    #[serde(flatten)]
    pub common: PolicyCommonSpec,

    /// Selects which namespaces this cluster-wide policy applies to when
    /// scanning namespaced resources. `None` means "all namespaces"
    /// (subject to the implicit kubewarden-namespace exclusion, see
    /// `catalog::effective_namespace_selector`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace_selector: Option<LabelSelector>,
}

/* ============================= NAMESPACED POLICY ============================= */

#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema, Default)]
#[kube(
    group = "policies.kubewarden.io",
    version = "v1",
    kind = "AdmissionPolicy",
    plural = "admissionpolicies",
    namespaced,
    status = "PolicyStatus"
)]
#[serde(rename_all = "camelCase")]
pub struct AdmissionPolicySpec {
    #[serde(flatten)]
    pub common: PolicyCommonSpec,
}

/* ============================= CLUSTER-WIDE POLICY GROUP ============================= */

#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema, Default)]
#[kube(
    group = "policies.kubewarden.io",
    version = "v1",
    kind = "ClusterAdmissionPolicyGroup",
    plural = "clusteradmissionpolicygroups",
    status = "PolicyStatus"
)]
#[serde(rename_all = "camelCase")]
pub struct ClusterAdmissionPolicyGroupSpec {
    #[serde(flatten)]
    pub common: PolicyCommonSpec,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace_selector: Option<LabelSelector>,

    pub expression: String,

    #[serde(default)]
    pub policies: BTreeMap<String, PolicyGroupMember>,
}

/* ============================= NAMESPACED POLICY GROUP ============================= */

#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema, Default)]
#[kube(
    group = "policies.kubewarden.io",
    version = "v1",
    kind = "AdmissionPolicyGroup",
    plural = "admissionpolicygroups",
    namespaced,
    status = "PolicyStatus"
)]
#[serde(rename_all = "camelCase")]
pub struct AdmissionPolicyGroupSpec {
    #[serde(flatten)]
    pub common: PolicyCommonSpec,

    pub expression: String,

    #[serde(default)]
    pub policies: BTreeMap<String, PolicyGroupMember>,
}

/* ============================= POLICY SERVER ============================= */

/// Minimal representation of the `PolicyServer` CR: the scanner only needs
/// to confirm one exists by name before resolving its serving `Service`
/// (`catalog::resolve_endpoint`); it never reads the policy-server's own
/// runtime configuration.
#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema, Default)]
#[kube(
    group = "policies.kubewarden.io",
    version = "v1",
    kind = "PolicyServer",
    plural = "policyservers"
)]
#[serde(rename_all = "camelCase")]
pub struct PolicyServerSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_account_name: Option<String>,
}

/* ============================= SCHEME REGISTRATION ============================= */

/// Registers every CRD kind C1/C2/C4 depend on with a shared `kube`
/// client, matching `spec.md` §4.6 ("All clients in C1/C2/C4 MUST share
/// this scheme"). `kube`'s dynamic client discovers kinds lazily via the
/// discovery API rather than a compile-time scheme registry, so in this
/// implementation "the scheme" is this list of `ApiResource` descriptors
/// plus the `Client` all components share — not a distinct runtime value.
pub fn policy_kinds() -> Vec<kube::core::GroupVersionKind> {
    use kube::core::GroupVersionKind as Gvk;
    vec![
        Gvk::gvk(POLICY_GROUP, POLICY_VERSION, "ClusterAdmissionPolicy"),
        Gvk::gvk(POLICY_GROUP, POLICY_VERSION, "AdmissionPolicy"),
        Gvk::gvk(POLICY_GROUP, POLICY_VERSION, "ClusterAdmissionPolicyGroup"),
        Gvk::gvk(POLICY_GROUP, POLICY_VERSION, "AdmissionPolicyGroup"),
        Gvk::gvk(POLICY_GROUP, POLICY_VERSION, "PolicyServer"),
    ]
}
