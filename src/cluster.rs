//! Cluster access (C1): namespace enumeration, GVR scope discovery, and
//! paged resource listing, all behind a trait so `engine.rs` and
//! `catalog.rs` can be driven against a fake in tests without a live
//! cluster — grounded on the teacher's preference for injectable
//! collaborators (see `governance.rs`'s `PolicyEvaluator` trait) and on
//! `sherpack-kube/src/resources.rs`'s `Discovery`/`resolve_gvk` usage.

use std::pin::Pin;

use async_stream::try_stream;
use async_trait::async_trait;
use futures::Stream;
use k8s_openapi::api::core::v1::Namespace;
use kube::{
    Client, ResourceExt,
    api::{Api, DynamicObject, ListParams, ObjectList},
    core::GroupVersionKind,
    discovery::{Discovery, Scope},
};
use tracing::debug;

use crate::catalog::Gvr;
use crate::error::{Result, ScanError};

/// Page size used for every `list()` call this module issues (`spec.md`
/// §4.1 "MUST NOT load an entire resource collection into memory").
pub const DEFAULT_PAGE_SIZE: u32 = 100;

pub type ResourceStream<'a> = Pin<Box<dyn Stream<Item = Result<DynamicObject>> + Send + 'a>>;

/// Everything the scan engine needs from the live cluster, abstracted so
/// tests can supply a fake.
#[async_trait]
pub trait ClusterAccess: Send + Sync {
    /// Lists namespace names eligible for audit: everything except the
    /// kubewarden namespace itself and any `--skip-namespace` entries,
    /// enforced server-side via a field selector (`spec.md` §4.1,
    /// §0 rationale (b)).
    async fn list_audited_namespaces(&self, excluded: &[String]) -> Result<Vec<String>>;

    /// Fetches one namespace's labels, for namespace-selector matching.
    async fn get_namespace(&self, name: &str) -> Result<Option<Namespace>>;

    /// Resolves whether a GVR is namespaced (`Some(true)`), cluster-scoped
    /// (`Some(false)`), or unknown to the API server (`None`).
    async fn is_namespaced_resource(&self, gvr: &Gvr) -> Result<Option<bool>>;

    /// Streams every live instance of `gvr` in `namespace` (`None` for
    /// cluster-scoped resources), paging through continuation tokens
    /// rather than materializing the whole collection.
    fn list_resources<'a>(&'a self, gvr: &'a Gvr, namespace: Option<&'a str>) -> ResourceStream<'a>;
}

/// Real `ClusterAccess` backed by a `kube::Client` and a `Discovery` cache.
pub struct KubeClusterAccess {
    client: Client,
    discovery: Discovery,
    page_size: u32,
}

impl KubeClusterAccess {
    pub async fn new(client: Client, page_size: u32) -> Result<Self> {
        let discovery = Discovery::new(client.clone())
            .run()
            .await
            .map_err(ScanError::Kube)?;
        Ok(Self {
            client,
            discovery,
            page_size,
        })
    }

    fn gvr_to_gvk(gvr: &Gvr) -> GroupVersionKind {
        // Discovery resolves by GVK; this scanner's catalog works in GVR
        // terms (matching `PolicyRule`'s apiGroups/apiVersions/resources
        // shape), so kind is recovered via `resolve_gvk`'s group+version
        // scan rather than stored redundantly on `Gvr`.
        GroupVersionKind {
            group: gvr.group.clone(),
            version: gvr.version.clone(),
            kind: String::new(),
        }
    }

    fn resolve(&self, gvr: &Gvr) -> Option<(kube::discovery::ApiResource, Scope)> {
        for group in self.discovery.groups() {
            for (api_resource, capabilities) in group.recommended_resources() {
                if api_resource.group == gvr.group
                    && api_resource.version == gvr.version
                    && api_resource.plural == gvr.resource
                {
                    return Some((api_resource, capabilities.scope.clone()));
                }
            }
        }
        None
    }
}

#[async_trait]
impl ClusterAccess for KubeClusterAccess {
    async fn list_audited_namespaces(&self, excluded: &[String]) -> Result<Vec<String>> {
        let namespaces: Api<Namespace> = Api::all(self.client.clone());
        let field_selector = excluded
            .iter()
            .map(|name| format!("metadata.name!={name}"))
            .collect::<Vec<_>>()
            .join(",");

        let mut names = Vec::new();
        let mut continuation = None;

        loop {
            let mut params = ListParams::default().limit(self.page_size);
            if !field_selector.is_empty() {
                params = params.fields(&field_selector);
            }
            if let Some(token) = continuation.take() {
                params = params.continue_token(&token);
            }
            let page: ObjectList<Namespace> = namespaces.list(&params).await.map_err(ScanError::Kube)?;
            for ns in &page.items {
                names.push(ns.name_any());
            }
            match page.metadata.continue_.clone() {
                Some(token) if !token.is_empty() => continuation = Some(token),
                _ => break,
            }
        }

        Ok(names)
    }

    async fn get_namespace(&self, name: &str) -> Result<Option<Namespace>> {
        let namespaces: Api<Namespace> = Api::all(self.client.clone());
        match namespaces.get_opt(name).await {
            Ok(ns) => Ok(ns),
            Err(e) => Err(ScanError::Kube(e)),
        }
    }

    async fn is_namespaced_resource(&self, gvr: &Gvr) -> Result<Option<bool>> {
        let _ = Self::gvr_to_gvk(gvr);
        match self.resolve(gvr) {
            Some((_, scope)) => Ok(Some(scope == Scope::Namespaced)),
            None => {
                debug!(%gvr, "gvr_unknown_to_discovery");
                Ok(None)
            }
        }
    }

    fn list_resources<'a>(&'a self, gvr: &'a Gvr, namespace: Option<&'a str>) -> ResourceStream<'a> {
        let page_size = self.page_size;
        let client = self.client.clone();
        let resolved = self.resolve(gvr);

        Box::pin(try_stream! {
            let Some((api_resource, scope)) = resolved else {
                Err(ScanError::UnknownGvr { gvr: gvr.clone() })?;
                return;
            };

            let api: Api<DynamicObject> = match (scope, namespace) {
                (Scope::Namespaced, Some(ns)) => Api::namespaced_with(client.clone(), ns, &api_resource),
                (Scope::Namespaced, None) => Api::all_with(client.clone(), &api_resource),
                (Scope::Cluster, _) => Api::all_with(client.clone(), &api_resource),
            };

            let mut continuation: Option<String> = None;
            loop {
                let mut params = ListParams::default().limit(page_size);
                if let Some(token) = continuation.take() {
                    params = params.continue_token(&token);
                }

                let page = api.list(&params).await.map_err(|source| {
                    if ScanError::is_not_found_or_forbidden(&source) {
                        ScanError::Auth {
                            gvr: gvr.clone(),
                            namespace: namespace.map(|n| format!(" in {n}")).unwrap_or_default(),
                            source,
                        }
                    } else {
                        ScanError::Discovery { gvr: gvr.clone(), source }
                    }
                })?;

                for item in page.items {
                    yield item;
                }

                match page.metadata.continue_.clone() {
                    Some(token) if !token.is_empty() => continuation = Some(token),
                    _ => break,
                }
            }
        })
    }
}
