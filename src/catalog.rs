//! Policy catalog (C2): fetches cluster-wide and namespaced policies,
//! resolves each policy's serving endpoint, and classifies each policy as
//! auditable / skipped / errored for a given scan scope.
//!
//! The matching algorithm itself (`group_policies`) is pure and
//! unit-testable without a cluster, in the style of the teacher's
//! `governance.rs` (`evaluate_pod`, `detect_violations`): all cluster I/O
//! is pushed behind the `ClusterAccess` trait from `cluster.rs` and
//! injected as an argument.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Namespace;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use kube::api::ListParams;
use kube::{Api, Client, Resource, ResourceExt};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use url::Url;

use crate::cluster::ClusterAccess;
use crate::crd::{
    AdmissionPolicy, AdmissionPolicyGroup, ClusterAdmissionPolicy, ClusterAdmissionPolicyGroup,
    PolicyCommonSpec, PolicyMode, PolicyRule, PolicyServer, PolicyStatusPhase,
};
use crate::error::{Result, ScanError};

/* ============================= GVR ============================= */

/// Group/Version/Resource — the plural, dynamic-client-shaped identifier
/// used throughout C1/C2/C5 (as opposed to GVK, used for typed objects).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Gvr {
    pub group: String,
    pub version: String,
    pub resource: String,
}

impl Gvr {
    pub fn new(group: impl Into<String>, version: impl Into<String>, resource: impl Into<String>) -> Self {
        Self {
            group: group.into(),
            version: version.into(),
            resource: resource.into(),
        }
    }
}

impl fmt::Display for Gvr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.group.is_empty() {
            write!(f, "{}/{}", self.version, self.resource)
        } else {
            write!(f, "{}/{}/{}", self.group, self.version, self.resource)
        }
    }
}

/* ============================= MATCH RULE ============================= */

/// A `spec.md` §3 "Match rule", wrapping the raw CRD `PolicyRule`.
pub struct MatchRule<'a>(pub &'a PolicyRule);

impl<'a> MatchRule<'a> {
    /// A rule is wildcard if any of apiGroups/apiVersions/resources
    /// contains `"*"`.
    pub fn is_wildcard(&self) -> bool {
        self.0.api_groups.iter().any(|g| g == "*")
            || self.0.api_versions.iter().any(|v| v == "*")
            || self.0.resources.iter().any(|r| r == "*")
    }

    /// Only rules whose operations include `CREATE` are audit-relevant.
    pub fn includes_create(&self) -> bool {
        self.0.operations.iter().any(|op| op == "CREATE" || op == "*")
    }

    /// Cross-product of (apiGroups × apiVersions × resources) into GVRs.
    /// Only meaningful for non-wildcard rules — callers drop wildcard
    /// rules before calling this (§4.2 step 1).
    pub fn gvrs(&self) -> Vec<Gvr> {
        let mut out = Vec::new();
        for group in &self.0.api_groups {
            for version in &self.0.api_versions {
                for resource in &self.0.resources {
                    out.push(Gvr::new(group.clone(), version.clone(), resource.clone()));
                }
            }
        }
        out
    }
}

/* ============================= POLICY-LIKE CAPABILITY SET ============================= */

/// The capability set shared by all four policy kinds (`spec.md` §9).
pub trait PolicyLike: fmt::Debug + Send + Sync {
    fn unique_name(&self) -> String;
    fn rules(&self) -> &[PolicyRule];
    fn object_selector(&self) -> Option<&LabelSelector>;
    /// `None` for namespaced-kind policies — they are implicitly scoped
    /// to their own namespace rather than selecting namespaces.
    fn namespace_selector(&self) -> Option<&LabelSelector>;
    fn policy_server(&self) -> &str;
    fn mode(&self) -> PolicyMode;
    fn is_mutating(&self) -> bool;
    fn is_context_aware(&self) -> bool;
    fn background_audit(&self) -> bool;
    fn status(&self) -> PolicyStatusPhase;
    fn resource_version(&self) -> String;
    fn uid(&self) -> String;
    fn severity(&self) -> Option<&str>;
    fn category(&self) -> Option<&str>;
    /// Whether this policy is confined to a single namespace (its own),
    /// as opposed to cluster-wide.
    fn is_namespace_scoped(&self) -> bool;
    /// The policy's own namespace, for namespace-scoped kinds.
    fn namespace(&self) -> Option<String>;
}

macro_rules! impl_policy_like {
    ($ty:ty, namespace_scoped = $ns_scoped:expr, namespace_selector = $get_ns_selector:expr) => {
        impl PolicyLike for $ty {
            fn unique_name(&self) -> String {
                if $ns_scoped {
                    format!(
                        "namespace-{}-{}",
                        self.namespace().unwrap_or_default(),
                        self.name_any()
                    )
                } else {
                    format!("clusterwide-{}", self.name_any())
                }
            }
            fn rules(&self) -> &[PolicyRule] {
                &self.spec.common.rules
            }
            fn object_selector(&self) -> Option<&LabelSelector> {
                self.spec.common.object_selector.as_ref()
            }
            fn namespace_selector(&self) -> Option<&LabelSelector> {
                $get_ns_selector(self)
            }
            fn policy_server(&self) -> &str {
                &self.spec.common.policy_server
            }
            fn mode(&self) -> PolicyMode {
                self.spec.common.mode
            }
            fn is_mutating(&self) -> bool {
                self.spec.common.mutating
            }
            fn is_context_aware(&self) -> bool {
                self.spec.common.is_context_aware()
            }
            fn background_audit(&self) -> bool {
                self.spec.common.background_audit
            }
            fn status(&self) -> PolicyStatusPhase {
                self.status
                    .as_ref()
                    .map(|s| s.policy_status)
                    .unwrap_or_default()
            }
            fn resource_version(&self) -> String {
                self.resource_version().unwrap_or_default()
            }
            fn uid(&self) -> String {
                self.uid().unwrap_or_default()
            }
            fn severity(&self) -> Option<&str> {
                self.spec.common.severity.as_deref()
            }
            fn category(&self) -> Option<&str> {
                self.spec.common.category.as_deref()
            }
            fn is_namespace_scoped(&self) -> bool {
                $ns_scoped
            }
            fn namespace(&self) -> Option<String> {
                ResourceExt::namespace(self)
            }
        }
    };
}

impl_policy_like!(
    ClusterAdmissionPolicy,
    namespace_scoped = false,
    namespace_selector = |p: &ClusterAdmissionPolicy| p.spec.namespace_selector.as_ref()
);
impl_policy_like!(
    ClusterAdmissionPolicyGroup,
    namespace_scoped = false,
    namespace_selector = |p: &ClusterAdmissionPolicyGroup| p.spec.namespace_selector.as_ref()
);
impl_policy_like!(
    AdmissionPolicy,
    namespace_scoped = true,
    namespace_selector = |_: &AdmissionPolicy| None
);
impl_policy_like!(
    AdmissionPolicyGroup,
    namespace_scoped = true,
    namespace_selector = |_: &AdmissionPolicyGroup| None
);

/// A dynamically-dispatched handle to one of the four policy kinds,
/// shared (read-only) across the policy grouping.
pub type PolicyHandle = Arc<dyn PolicyLike>;

/* ============================= POLICY GROUPING ============================= */

/// `spec.md` §3 "PolicyGrouping": for a given scope, a mapping
/// `GVR → ordered list of Policy`, plus three disjoint counters.
#[derive(Default)]
pub struct PolicyGrouping {
    pub by_gvr: BTreeMap<Gvr, Vec<PolicyHandle>>,
    pub auditable: u32,
    pub skipped: u32,
    pub errored: u32,
}

impl PolicyGrouping {
    pub fn policies_for(&self, gvr: &Gvr) -> &[PolicyHandle] {
        self.by_gvr.get(gvr).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn is_empty(&self) -> bool {
        self.by_gvr.is_empty()
    }
}

/// Scope a policy grouping is built for — determines which half of each
/// policy's cross-producted GVRs are kept (§4.2 step 4).
#[derive(Debug, Clone)]
pub enum ScanScope {
    Namespace(String),
    ClusterWide,
}

/* ============================= MATCHING ALGORITHM (§4.2) ============================= */

/// Runs the seven-step matching algorithm in `spec.md` §4.2 over a batch
/// of candidate policies for one scope, producing a `PolicyGrouping`.
pub async fn group_policies(
    cluster: &dyn ClusterAccess,
    resolver: &dyn ResolveEndpoint,
    candidates: Vec<PolicyHandle>,
    scope: &ScanScope,
) -> PolicyGrouping {
    let mut grouping = PolicyGrouping::default();

    for policy in candidates {
        match classify_one(cluster, resolver, policy.as_ref(), scope).await {
            Disposition::Auditable(gvrs) => {
                grouping.auditable += 1;
                for gvr in gvrs {
                    grouping.by_gvr.entry(gvr).or_default().push(policy.clone());
                }
            }
            Disposition::Skipped(reason) => {
                debug!(policy = %policy.unique_name(), reason, "policy_skipped");
                grouping.skipped += 1;
            }
            Disposition::Errored(reason) => {
                warn!(policy = %policy.unique_name(), reason, "policy_errored");
                grouping.errored += 1;
            }
            Disposition::NotApplicable => {}
        }
    }

    grouping
}

/// Lists every instance of one policy kind, paging through continuation
/// tokens — the same pattern `cluster.rs` uses for arbitrary discovered
/// resources, applied here to the four typed policy kinds.
async fn list_all<K>(api: &Api<K>) -> Result<Vec<K>>
where
    K: Resource + Clone + std::fmt::Debug + DeserializeOwned,
{
    let mut items = Vec::new();
    let mut continuation = None;
    loop {
        let mut params = ListParams::default().limit(100);
        if let Some(token) = continuation.take() {
            params = params.continue_token(&token);
        }
        let page = api.list(&params).await.map_err(ScanError::Kube)?;
        let next = page.metadata.continue_.clone();
        items.extend(page.items);
        match next {
            Some(token) if !token.is_empty() => continuation = Some(token),
            _ => break,
        }
    }
    Ok(items)
}

/// Fetches every `AdmissionPolicy`/`AdmissionPolicyGroup` in `ns` — the
/// namespace-scoped policy kinds (`spec.md` §4.2 "getPoliciesForNamespace").
pub async fn fetch_namespaced_candidates(client: &Client, ns: &str) -> Result<Vec<PolicyHandle>> {
    let mut out: Vec<PolicyHandle> = Vec::new();
    let policies: Api<AdmissionPolicy> = Api::namespaced(client.clone(), ns);
    out.extend(list_all(&policies).await?.into_iter().map(|p| Arc::new(p) as PolicyHandle));
    let groups: Api<AdmissionPolicyGroup> = Api::namespaced(client.clone(), ns);
    out.extend(list_all(&groups).await?.into_iter().map(|p| Arc::new(p) as PolicyHandle));
    Ok(out)
}

/// Fetches every `ClusterAdmissionPolicy`/`ClusterAdmissionPolicyGroup`
/// cluster-wide (`spec.md` §4.2 "getClusterWidePolicies").
pub async fn fetch_cluster_wide_candidates(client: &Client) -> Result<Vec<PolicyHandle>> {
    let mut out: Vec<PolicyHandle> = Vec::new();
    let policies: Api<ClusterAdmissionPolicy> = Api::all(client.clone());
    out.extend(list_all(&policies).await?.into_iter().map(|p| Arc::new(p) as PolicyHandle));
    let groups: Api<ClusterAdmissionPolicyGroup> = Api::all(client.clone());
    out.extend(list_all(&groups).await?.into_iter().map(|p| Arc::new(p) as PolicyHandle));
    Ok(out)
}

/// `getPoliciesForNamespace(ns) → PolicyGrouping` (`spec.md` §4.2):
/// candidates are every namespace-scoped policy living in `ns`, plus
/// every cluster-wide policy (whose namespace selector is evaluated
/// against `ns` inside `classify_one`).
pub async fn get_policies_for_namespace(
    client: &Client,
    cluster: &dyn ClusterAccess,
    resolver: &dyn ResolveEndpoint,
    ns: &str,
) -> Result<PolicyGrouping> {
    let mut candidates = fetch_namespaced_candidates(client, ns).await?;
    candidates.extend(fetch_cluster_wide_candidates(client).await?);
    Ok(group_policies(cluster, resolver, candidates, &ScanScope::Namespace(ns.to_string())).await)
}

/// `getClusterWidePolicies() → PolicyGrouping` (`spec.md` §4.2): only
/// cluster-wide policies, grouped by cluster-scoped GVR.
pub async fn get_cluster_wide_policies(
    client: &Client,
    cluster: &dyn ClusterAccess,
    resolver: &dyn ResolveEndpoint,
) -> Result<PolicyGrouping> {
    let candidates = fetch_cluster_wide_candidates(client).await?;
    Ok(group_policies(cluster, resolver, candidates, &ScanScope::ClusterWide).await)
}

enum Disposition {
    Auditable(Vec<Gvr>),
    Skipped(&'static str),
    Errored(String),
    NotApplicable,
}

async fn classify_one(
    cluster: &dyn ClusterAccess,
    resolver: &dyn ResolveEndpoint,
    policy: &dyn PolicyLike,
    scope: &ScanScope,
) -> Disposition {
    // Step 1: drop wildcard-only rules.
    let non_wildcard: Vec<&PolicyRule> = policy
        .rules()
        .iter()
        .filter(|r| !MatchRule(r).is_wildcard())
        .collect();
    if non_wildcard.is_empty() {
        return Disposition::Skipped("wildcard-only");
    }

    // Step 2: drop rules without CREATE.
    let create_rules: Vec<&PolicyRule> = non_wildcard
        .into_iter()
        .filter(|r| MatchRule(r).includes_create())
        .collect();
    if create_rules.is_empty() {
        return Disposition::Skipped("no-create");
    }

    // Step 3: cross-product into GVRs, consulting discovery for scope.
    let mut candidate_gvrs = Vec::new();
    for rule in &create_rules {
        candidate_gvrs.extend(MatchRule(rule).gvrs());
    }
    candidate_gvrs.sort();
    candidate_gvrs.dedup();

    let mut scoped_gvrs = Vec::new();
    for gvr in candidate_gvrs {
        match cluster.is_namespaced_resource(&gvr).await {
            Ok(Some(is_namespaced)) => {
                let wanted_namespaced = matches!(scope, ScanScope::Namespace(_));
                if is_namespaced == wanted_namespaced {
                    scoped_gvrs.push(gvr);
                }
            }
            Ok(None) => {
                return Disposition::Errored(format!("unknown GVR {gvr}"));
            }
            Err(e) => {
                return Disposition::Errored(format!("discovery failed for {gvr}: {e}"));
            }
        }
    }

    // Step 4: intersect with the requested scope.
    if scoped_gvrs.is_empty() {
        return Disposition::NotApplicable;
    }

    // For namespace scans, a cluster-wide policy only applies if its
    // effective namespace selector matches this namespace.
    if let ScanScope::Namespace(ns) = scope {
        if !policy.is_namespace_scoped() {
            let selector = effective_namespace_selector(policy.namespace_selector(), resolver.kubewarden_namespace());
            let ns_labels = match cluster.get_namespace(ns).await {
                Ok(Some(namespace)) => namespace.metadata.labels.clone().unwrap_or_default(),
                _ => BTreeMap::new(),
            };
            if !label_selector_matches(Some(&selector), &ns_labels) {
                return Disposition::NotApplicable;
            }
        } else if policy.namespace().as_deref() != Some(ns.as_str()) {
            return Disposition::NotApplicable;
        }
    }

    // Step 5: active + background-audit gate.
    if policy.status() != PolicyStatusPhase::Active || !policy.background_audit() {
        return Disposition::Skipped("inactive-or-audit-disabled");
    }

    // Step 6: resolve the serving endpoint.
    match resolver.resolve(policy).await {
        Ok(_endpoint) => Disposition::Auditable(scoped_gvrs),
        Err(e) => Disposition::Errored(format!("endpoint resolution: {e}")),
    }
}

/* ============================= NAMESPACE SELECTOR ============================= */

/// Merges a cluster-wide policy's user-supplied namespace selector with
/// an implicit `metadata.name != <kubewarden-namespace>` exclusion
/// (`spec.md` §4.2 "Namespace-selector resolution").
pub fn effective_namespace_selector(
    user_selector: Option<&LabelSelector>,
    kubewarden_namespace: &str,
) -> LabelSelector {
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelectorRequirement;

    let mut selector = user_selector.cloned().unwrap_or_default();
    let exclusion = LabelSelectorRequirement {
        key: "kubernetes.io/metadata.name".to_string(),
        operator: "NotIn".to_string(),
        values: Some(vec![kubewarden_namespace.to_string()]),
    };
    selector
        .match_expressions
        .get_or_insert_with(Vec::new)
        .push(exclusion);
    selector
}

/// Evaluates a `LabelSelector` against a set of labels. `None` selector
/// matches everything (no constraints); an empty (but present) selector
/// also matches everything — per `spec.md` §4.5 "a resource without
/// labels is matched by selectors only if all selectors are empty".
pub fn label_selector_matches(selector: Option<&LabelSelector>, labels: &BTreeMap<String, String>) -> bool {
    let Some(selector) = selector else {
        return true;
    };

    if let Some(match_labels) = &selector.match_labels {
        for (k, v) in match_labels {
            if labels.get(k) != Some(v) {
                return false;
            }
        }
    }

    if let Some(expressions) = &selector.match_expressions {
        for expr in expressions {
            let matches = match expr.operator.as_str() {
                "In" => expr
                    .values
                    .as_ref()
                    .is_some_and(|vs| labels.get(&expr.key).is_some_and(|v| vs.contains(v))),
                "NotIn" => expr
                    .values
                    .as_ref()
                    .is_none_or(|vs| !labels.get(&expr.key).is_some_and(|v| vs.contains(v))),
                "Exists" => labels.contains_key(&expr.key),
                "DoesNotExist" => !labels.contains_key(&expr.key),
                _ => false,
            };
            if !matches {
                return false;
            }
        }
    }

    true
}

/* ============================= ENDPOINT RESOLUTION (§4.2) ============================= */

/// `spec.md` §3 "PolicyEndpoint": the resolved URL of a policy's serving
/// endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolicyEndpoint(pub Url);

/// Resolves policy-server names to serving endpoints, either via an
/// override base URL or by looking up the `PolicyServer`'s backing
/// `Service` in the configured kubewarden namespace.
pub struct EndpointResolver {
    pub client: Client,
    pub kubewarden_namespace: String,
    pub override_base_url: Option<Url>,
}

impl EndpointResolver {
    pub fn new(client: Client, kubewarden_namespace: String, override_base_url: Option<Url>) -> Self {
        Self {
            client,
            kubewarden_namespace,
            override_base_url,
        }
    }

    /// `resolveEndpoint(policy) → URL` (§4.2).
    pub async fn resolve(&self, policy: &dyn PolicyLike) -> Result<PolicyEndpoint> {
        if let Some(base) = &self.override_base_url {
            let url = base
                .join(&format!("audit/{}", policy.unique_name()))
                .map_err(|e| ScanError::PolicyConfig {
                    policy: policy.unique_name(),
                    reason: format!("invalid override URL: {e}"),
                })?;
            return Ok(PolicyEndpoint(url));
        }

        let policy_servers: Api<PolicyServer> = Api::all(self.client.clone());
        policy_servers
            .get(policy.policy_server())
            .await
            .map_err(|e| ScanError::PolicyConfig {
                policy: policy.unique_name(),
                reason: format!("policy server '{}' not found: {e}", policy.policy_server()),
            })?;

        let services: Api<k8s_openapi::api::core::v1::Service> =
            Api::namespaced(self.client.clone(), &self.kubewarden_namespace);
        let label_selector = format!(
            "app.kubernetes.io/instance=policy-server-{}",
            policy.policy_server()
        );
        let list_params = kube::api::ListParams::default().labels(&label_selector);
        let list = services.list(&list_params).await.map_err(|e| ScanError::PolicyConfig {
            policy: policy.unique_name(),
            reason: format!("listing policy-server service: {e}"),
        })?;

        let service = list.items.into_iter().next().ok_or_else(|| ScanError::PolicyConfig {
            policy: policy.unique_name(),
            reason: format!("no service found for policy server '{}'", policy.policy_server()),
        })?;

        let service_name = service.name_any();
        let port = service
            .spec
            .as_ref()
            .and_then(|s| s.ports.as_ref())
            .and_then(|ports| ports.first())
            .map(|p| p.port)
            .ok_or_else(|| ScanError::PolicyConfig {
                policy: policy.unique_name(),
                reason: format!("service '{service_name}' has no ports"),
            })?;

        let url = Url::parse(&format!(
            "https://{service_name}.{}.svc:{port}/audit/{}",
            self.kubewarden_namespace,
            policy.unique_name()
        ))
        .map_err(|e| ScanError::PolicyConfig {
            policy: policy.unique_name(),
            reason: format!("building endpoint URL: {e}"),
        })?;

        Ok(PolicyEndpoint(url))
    }
}

/// Endpoint resolution behind a trait, so `engine.rs` can drive its
/// per-resource evaluation fan-out against a fake in tests without a live
/// cluster.
#[async_trait]
pub trait ResolveEndpoint: Send + Sync {
    async fn resolve(&self, policy: &dyn PolicyLike) -> Result<PolicyEndpoint>;
    /// The kubewarden namespace this resolver was configured with, needed
    /// by `classify_one` to exclude it from a cluster-wide policy's
    /// effective namespace selector.
    fn kubewarden_namespace(&self) -> &str;
}

#[async_trait]
impl ResolveEndpoint for EndpointResolver {
    async fn resolve(&self, policy: &dyn PolicyLike) -> Result<PolicyEndpoint> {
        EndpointResolver::resolve(self, policy).await
    }

    fn kubewarden_namespace(&self) -> &str {
        &self.kubewarden_namespace
    }
}

/// Fetch-and-classify behind a trait, so `engine.rs` doesn't need a live
/// `kube::Client` to be unit-tested — only `KubePolicyCatalog` talks to the
/// API server; a fake substitutes canned `PolicyGrouping`s in tests.
#[async_trait]
pub trait PolicyCatalog: Send + Sync {
    async fn get_policies_for_namespace(&self, ns: &str) -> Result<PolicyGrouping>;
    async fn get_cluster_wide_policies(&self) -> Result<PolicyGrouping>;
}

/// Real `PolicyCatalog`, backed by a `kube::Client` for candidate listing
/// and a `ClusterAccess`/`EndpointResolver` pair for classification.
pub struct KubePolicyCatalog {
    pub client: Client,
    pub cluster: Arc<dyn ClusterAccess>,
    pub resolver: Arc<dyn ResolveEndpoint>,
}

#[async_trait]
impl PolicyCatalog for KubePolicyCatalog {
    async fn get_policies_for_namespace(&self, ns: &str) -> Result<PolicyGrouping> {
        get_policies_for_namespace(&self.client, self.cluster.as_ref(), self.resolver.as_ref(), ns).await
    }

    async fn get_cluster_wide_policies(&self) -> Result<PolicyGrouping> {
        get_cluster_wide_policies(&self.client, self.cluster.as_ref(), self.resolver.as_ref()).await
    }
}

/// In-memory `PolicyCatalog` fake, grounded on the teacher's own
/// test-double style (`tests/common/mod.rs`). Tests stock it with a
/// pre-built `PolicyGrouping` per namespace (or cluster-wide).
#[cfg(test)]
pub struct FakePolicyCatalog {
    pub by_namespace: std::sync::Mutex<BTreeMap<String, PolicyGrouping>>,
    pub cluster_wide: std::sync::Mutex<Option<PolicyGrouping>>,
}

#[cfg(test)]
impl FakePolicyCatalog {
    pub fn new() -> Self {
        Self {
            by_namespace: std::sync::Mutex::new(BTreeMap::new()),
            cluster_wide: std::sync::Mutex::new(None),
        }
    }
}

#[cfg(test)]
#[async_trait]
impl PolicyCatalog for FakePolicyCatalog {
    async fn get_policies_for_namespace(&self, ns: &str) -> Result<PolicyGrouping> {
        Ok(self.by_namespace.lock().unwrap().remove(ns).unwrap_or_default())
    }

    async fn get_cluster_wide_policies(&self) -> Result<PolicyGrouping> {
        Ok(self.cluster_wide.lock().unwrap().take().unwrap_or_default())
    }
}

/// In-memory `ResolveEndpoint` fake: every policy resolves to the same
/// fixed base URL with its unique name appended, unless pre-seeded with a
/// failure.
#[cfg(test)]
pub struct FakeResolveEndpoint {
    pub base: Url,
    pub kubewarden_namespace: String,
}

#[cfg(test)]
#[async_trait]
impl ResolveEndpoint for FakeResolveEndpoint {
    async fn resolve(&self, policy: &dyn PolicyLike) -> Result<PolicyEndpoint> {
        self.base
            .join(&format!("audit/{}", policy.unique_name()))
            .map(PolicyEndpoint)
            .map_err(|e| ScanError::PolicyConfig {
                policy: policy.unique_name(),
                reason: format!("invalid fake endpoint: {e}"),
            })
    }

    fn kubewarden_namespace(&self) -> &str {
        &self.kubewarden_namespace
    }
}

/// Additional namespaces excluded from audit on top of the kubewarden
/// namespace itself (`--skip-namespace`, repeatable).
pub fn excluded_namespaces(kubewarden_namespace: &str, extra: &[String]) -> BTreeSet<String> {
    let mut set: BTreeSet<String> = extra.iter().cloned().collect();
    set.insert(kubewarden_namespace.to_string());
    set
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::PolicyCommonSpec;

    fn rule(groups: &[&str], versions: &[&str], resources: &[&str], ops: &[&str]) -> PolicyRule {
        PolicyRule {
            api_groups: groups.iter().map(|s| s.to_string()).collect(),
            api_versions: versions.iter().map(|s| s.to_string()).collect(),
            resources: resources.iter().map(|s| s.to_string()).collect(),
            operations: ops.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[test]
    fn wildcard_rule_is_detected() {
        let r = rule(&["*"], &["v1"], &["pods"], &["CREATE"]);
        assert!(MatchRule(&r).is_wildcard());
    }

    #[test]
    fn non_wildcard_rule_is_not_wildcard() {
        let r = rule(&["apps"], &["v1"], &["deployments"], &["CREATE"]);
        assert!(!MatchRule(&r).is_wildcard());
    }

    #[test]
    fn rule_without_create_is_excluded() {
        let r = rule(&["apps"], &["v1"], &["deployments"], &["UPDATE", "DELETE"]);
        assert!(!MatchRule(&r).includes_create());
    }

    #[test]
    fn rule_with_create_is_included() {
        let r = rule(&["apps"], &["v1"], &["deployments"], &["CREATE"]);
        assert!(MatchRule(&r).includes_create());
    }

    #[test]
    fn cross_product_produces_all_gvrs() {
        let r = rule(&["", "apps"], &["v1"], &["pods", "deployments"], &["CREATE"]);
        let gvrs = MatchRule(&r).gvrs();
        assert_eq!(gvrs.len(), 4);
        assert!(gvrs.contains(&Gvr::new("", "v1", "pods")));
        assert!(gvrs.contains(&Gvr::new("apps", "v1", "deployments")));
    }

    #[test]
    fn label_selector_none_matches_everything() {
        let labels = BTreeMap::new();
        assert!(label_selector_matches(None, &labels));
    }

    #[test]
    fn label_selector_empty_matches_unlabeled_resource() {
        let selector = LabelSelector::default();
        let labels = BTreeMap::new();
        assert!(label_selector_matches(Some(&selector), &labels));
    }

    #[test]
    fn label_selector_match_labels_requires_exact_value() {
        let mut match_labels = BTreeMap::new();
        match_labels.insert("env".to_string(), "test".to_string());
        let selector = LabelSelector {
            match_labels: Some(match_labels),
            match_expressions: None,
        };

        let mut labels = BTreeMap::new();
        labels.insert("env".to_string(), "test".to_string());
        assert!(label_selector_matches(Some(&selector), &labels));

        labels.insert("env".to_string(), "prod".to_string());
        assert!(!label_selector_matches(Some(&selector), &labels));
    }

    #[test]
    fn label_selector_exists_operator() {
        use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelectorRequirement;
        let selector = LabelSelector {
            match_labels: None,
            match_expressions: Some(vec![LabelSelectorRequirement {
                key: "tier".to_string(),
                operator: "Exists".to_string(),
                values: None,
            }]),
        };
        let mut labels = BTreeMap::new();
        assert!(!label_selector_matches(Some(&selector), &labels));
        labels.insert("tier".to_string(), "anything".to_string());
        assert!(label_selector_matches(Some(&selector), &labels));
    }

    #[test]
    fn effective_namespace_selector_excludes_kubewarden_namespace() {
        let selector = effective_namespace_selector(None, "kubewarden");
        let mut labels = BTreeMap::new();
        labels.insert("kubernetes.io/metadata.name".to_string(), "kubewarden".to_string());
        assert!(!label_selector_matches(Some(&selector), &labels));

        labels.insert("kubernetes.io/metadata.name".to_string(), "default".to_string());
        assert!(label_selector_matches(Some(&selector), &labels));
    }

    #[test]
    fn unique_name_cluster_wide_policy() {
        let policy = ClusterAdmissionPolicy {
            metadata: kube::core::ObjectMeta {
                name: Some("no-latest".to_string()),
                ..Default::default()
            },
            spec: crate::crd::ClusterAdmissionPolicySpec {
                common: PolicyCommonSpec {
                    policy_server: "default".to_string(),
                    ..Default::default()
                },
                namespace_selector: None,
            },
            status: None,
        };
        assert_eq!(policy.unique_name(), "clusterwide-no-latest");
    }

    #[test]
    fn unique_name_namespaced_policy() {
        let policy = AdmissionPolicy {
            metadata: kube::core::ObjectMeta {
                name: Some("no-latest".to_string()),
                namespace: Some("team-a".to_string()),
                ..Default::default()
            },
            spec: crate::crd::AdmissionPolicySpec {
                common: PolicyCommonSpec {
                    policy_server: "default".to_string(),
                    ..Default::default()
                },
            },
            status: None,
        };
        assert_eq!(policy.unique_name(), "namespace-team-a-no-latest");
    }

    #[test]
    fn excluded_namespaces_always_includes_kubewarden_namespace() {
        let excluded = excluded_namespaces("kubewarden", &["kube-system".to_string()]);
        assert!(excluded.contains("kubewarden"));
        assert!(excluded.contains("kube-system"));
        assert_eq!(excluded.len(), 2);
    }

    fn active_cluster_policy(name: &str, rules: Vec<PolicyRule>, background_audit: bool) -> PolicyHandle {
        Arc::new(ClusterAdmissionPolicy {
            metadata: kube::core::ObjectMeta {
                name: Some(name.to_string()),
                ..Default::default()
            },
            spec: crate::crd::ClusterAdmissionPolicySpec {
                common: PolicyCommonSpec {
                    policy_server: "default".to_string(),
                    rules,
                    background_audit,
                    ..Default::default()
                },
                namespace_selector: None,
            },
            status: Some(crate::crd::PolicyStatus {
                policy_status: PolicyStatusPhase::Active,
            }),
        }) as PolicyHandle
    }

    fn fake_cluster(scopes: BTreeMap<Gvr, bool>) -> crate::cluster::tests::FakeClusterAccess {
        crate::cluster::tests::FakeClusterAccess {
            namespaces: vec![],
            namespace_labels: BTreeMap::new(),
            scopes,
            resources: std::sync::Mutex::new(BTreeMap::new()),
        }
    }

    fn fake_resolver() -> FakeResolveEndpoint {
        FakeResolveEndpoint {
            base: "http://policy-server.test".parse().unwrap(),
            kubewarden_namespace: "kubewarden".to_string(),
        }
    }

    #[tokio::test]
    async fn wildcard_only_policy_is_skipped() {
        let policy = active_cluster_policy("wild", vec![rule(&["*"], &["v1"], &["pods"], &["CREATE"])], true);
        let cluster = fake_cluster(BTreeMap::new());
        let resolver = fake_resolver();
        let grouping = group_policies(&cluster, &resolver, vec![policy], &ScanScope::ClusterWide).await;
        assert_eq!(grouping.skipped, 1);
        assert_eq!(grouping.auditable, 0);
        assert_eq!(grouping.errored, 0);
    }

    #[tokio::test]
    async fn non_create_only_policy_is_skipped() {
        let policy = active_cluster_policy(
            "non-create",
            vec![rule(&["apps"], &["v1"], &["deployments"], &["UPDATE"])],
            true,
        );
        let cluster = fake_cluster(BTreeMap::new());
        let resolver = fake_resolver();
        let grouping = group_policies(&cluster, &resolver, vec![policy], &ScanScope::ClusterWide).await;
        assert_eq!(grouping.skipped, 1);
    }

    #[tokio::test]
    async fn unknown_gvr_policy_is_errored_and_does_not_abort() {
        let policy = active_cluster_policy("unknown", vec![rule(&["foo"], &["v1"], &["foos"], &["CREATE"])], true);
        // No scope entry for foo/v1/foos, so `is_namespaced_resource` returns `Ok(None)`.
        let cluster = fake_cluster(BTreeMap::new());
        let resolver = fake_resolver();
        let grouping = group_policies(&cluster, &resolver, vec![policy], &ScanScope::ClusterWide).await;
        assert_eq!(grouping.errored, 1);
        assert_eq!(grouping.auditable, 0);
        assert_eq!(grouping.skipped, 0);
    }

    #[tokio::test]
    async fn inactive_policy_is_skipped_even_with_matching_rule() {
        let gvr = Gvr::new("", "v1", "pods");
        let policy = Arc::new(ClusterAdmissionPolicy {
            metadata: kube::core::ObjectMeta {
                name: Some("inactive".to_string()),
                ..Default::default()
            },
            spec: crate::crd::ClusterAdmissionPolicySpec {
                common: PolicyCommonSpec {
                    policy_server: "default".to_string(),
                    rules: vec![rule(&[""], &["v1"], &["pods"], &["CREATE"])],
                    background_audit: true,
                    ..Default::default()
                },
                namespace_selector: None,
            },
            status: Some(crate::crd::PolicyStatus {
                policy_status: PolicyStatusPhase::Pending,
            }),
        }) as PolicyHandle;

        let cluster = fake_cluster(BTreeMap::from([(gvr, false)]));
        let resolver = fake_resolver();
        let grouping = group_policies(&cluster, &resolver, vec![policy], &ScanScope::ClusterWide).await;
        assert_eq!(grouping.skipped, 1);
    }

    #[tokio::test]
    async fn matching_active_policy_is_auditable_and_grouped_by_gvr() {
        let gvr = Gvr::new("", "v1", "pods");
        let policy = active_cluster_policy("no-latest", vec![rule(&[""], &["v1"], &["pods"], &["CREATE"])], true);
        let cluster = fake_cluster(BTreeMap::from([(gvr.clone(), false)]));
        let resolver = fake_resolver();
        let grouping = group_policies(&cluster, &resolver, vec![policy], &ScanScope::ClusterWide).await;
        assert_eq!(grouping.auditable, 1);
        assert_eq!(grouping.policies_for(&gvr).len(), 1);
    }

    #[tokio::test]
    async fn namespace_scope_excludes_cluster_scoped_gvr() {
        let gvr = Gvr::new("", "v1", "pods");
        let policy = active_cluster_policy("no-latest", vec![rule(&[""], &["v1"], &["pods"], &["CREATE"])], true);
        // Discovery reports this GVR as cluster-scoped, but we are grouping
        // for a namespace scan — step 4's intersection should drop it.
        let cluster = fake_cluster(BTreeMap::from([(gvr, false)]));
        let resolver = fake_resolver();
        let grouping = group_policies(
            &cluster,
            &resolver,
            vec![policy],
            &ScanScope::Namespace("team-a".to_string()),
        )
        .await;
        assert_eq!(grouping.auditable, 0);
        assert_eq!(grouping.skipped, 0);
        assert_eq!(grouping.errored, 0);
    }
}
