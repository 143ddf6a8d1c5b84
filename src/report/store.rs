//! Report store (C4): idempotent create-or-patch by resource UID and
//! stale-report garbage collection, keyed by run UID label. Grounded on
//! the teacher's `reconcile.rs` `PatchParams::apply` + `Patch::Merge`
//! idiom and its `audit_api.list(...).filter(...).delete(...)`
//! retention-sweep pattern (`create_audit_result`'s trailing retention
//! loop).

use async_trait::async_trait;
use kube::api::{Api, Patch, PatchParams};
use tracing::{info, warn};

use crate::error::{Result, ScanError};
use crate::report::model::{ClusterReport, NamespacedReport};
use crate::runid::{APP_NAME, MANAGED_BY_LABEL, RUN_UID_LABEL, RunId};

pub const FIELD_MANAGER: &str = "audit-scanner";

/// Bounded retry count for `createOrPatch` conflicts (`spec.md` §4.4).
const MAX_CONFLICT_RETRIES: u32 = 3;

#[async_trait]
pub trait ReportStore: Send + Sync {
    async fn create_or_patch_namespaced(&self, report: &NamespacedReport) -> Result<()>;
    async fn create_or_patch_cluster(&self, report: &ClusterReport) -> Result<()>;
    /// Deletes every managed namespaced report in `namespace` whose
    /// run-uid label differs from `run_id`. Returns the count deleted.
    async fn delete_old_reports(&self, namespace: &str, run_id: RunId) -> Result<u32>;
    async fn delete_old_cluster_reports(&self, run_id: RunId) -> Result<u32>;
}

pub struct KubeReportStore {
    client: kube::Client,
}

impl KubeReportStore {
    pub fn new(client: kube::Client) -> Self {
        Self { client }
    }

    fn stale_label_selector(run_id: RunId) -> String {
        format!(
            "{MANAGED_BY_LABEL}={APP_NAME},{RUN_UID_LABEL}!={}",
            run_id
        )
    }
}

/// `createOrPatch(report)` for any kind implementing `kube::Resource` +
/// `AddResult`'s backing spec shape: re-reads and retries on 409
/// Conflict up to `MAX_CONFLICT_RETRIES` times.
async fn create_or_patch<K>(api: &Api<K>, report: &K) -> Result<()>
where
    K: kube::Resource<DynamicType = ()>
        + Clone
        + std::fmt::Debug
        + serde::Serialize
        + serde::de::DeserializeOwned
        + Send
        + Sync,
{
    let name = report.meta().name.clone().unwrap_or_default();
    let mut params = PatchParams::apply(FIELD_MANAGER);
    params.force = true;

    for attempt in 0..=MAX_CONFLICT_RETRIES {
        match api.patch(&name, &params, &Patch::Apply(report)).await {
            Ok(_) => return Ok(()),
            Err(kube::Error::Api(resp)) if resp.code == 409 && attempt < MAX_CONFLICT_RETRIES => {
                warn!(report = %name, attempt, "report_patch_conflict_retrying");
                continue;
            }
            Err(source) => {
                return Err(ScanError::Persist {
                    resource_uid: name,
                    source,
                });
            }
        }
    }

    unreachable!("loop always returns on its last iteration")
}

#[async_trait]
impl ReportStore for KubeReportStore {
    async fn create_or_patch_namespaced(&self, report: &NamespacedReport) -> Result<()> {
        let namespace = report.metadata.namespace.clone().unwrap_or_default();
        let api: Api<NamespacedReport> = Api::namespaced(self.client.clone(), &namespace);
        create_or_patch(&api, report).await
    }

    async fn create_or_patch_cluster(&self, report: &ClusterReport) -> Result<()> {
        let api: Api<ClusterReport> = Api::all(self.client.clone());
        create_or_patch(&api, report).await
    }

    async fn delete_old_reports(&self, namespace: &str, run_id: RunId) -> Result<u32> {
        let api: Api<NamespacedReport> = Api::namespaced(self.client.clone(), namespace);
        let selector = Self::stale_label_selector(run_id);
        let stale = api
            .list(&kube::api::ListParams::default().labels(&selector))
            .await
            .map_err(ScanError::Kube)?;

        let mut deleted = 0;
        for report in &stale.items {
            let name = report.metadata.name.clone().unwrap_or_default();
            match api.delete(&name, &Default::default()).await {
                Ok(_) => deleted += 1,
                Err(e) if ScanError::is_not_found_or_forbidden(&e) => {}
                Err(e) => return Err(ScanError::Kube(e)),
            }
        }
        info!(namespace, deleted, "stale_reports_deleted");
        Ok(deleted)
    }

    async fn delete_old_cluster_reports(&self, run_id: RunId) -> Result<u32> {
        let api: Api<ClusterReport> = Api::all(self.client.clone());
        let selector = Self::stale_label_selector(run_id);
        let stale = api
            .list(&kube::api::ListParams::default().labels(&selector))
            .await
            .map_err(ScanError::Kube)?;

        let mut deleted = 0;
        for report in &stale.items {
            let name = report.metadata.name.clone().unwrap_or_default();
            match api.delete(&name, &Default::default()).await {
                Ok(_) => deleted += 1,
                Err(e) if ScanError::is_not_found_or_forbidden(&e) => {}
                Err(e) => return Err(ScanError::Kube(e)),
            }
        }
        info!(deleted, "stale_cluster_reports_deleted");
        Ok(deleted)
    }
}

/// In-memory fake for engine/report tests, grounded on the teacher's
/// dedicated test-double style in `tests/common/mod.rs`.
#[cfg(test)]
pub struct FakeReportStore {
    pub namespaced: std::sync::Mutex<std::collections::BTreeMap<(String, String), NamespacedReport>>,
    pub cluster: std::sync::Mutex<std::collections::BTreeMap<String, ClusterReport>>,
}

#[cfg(test)]
impl FakeReportStore {
    pub fn new() -> Self {
        Self {
            namespaced: std::sync::Mutex::new(std::collections::BTreeMap::new()),
            cluster: std::sync::Mutex::new(std::collections::BTreeMap::new()),
        }
    }
}

#[cfg(test)]
#[async_trait]
impl ReportStore for FakeReportStore {
    async fn create_or_patch_namespaced(&self, report: &NamespacedReport) -> Result<()> {
        let namespace = report.metadata.namespace.clone().unwrap_or_default();
        let name = report.metadata.name.clone().unwrap_or_default();
        self.namespaced
            .lock()
            .unwrap()
            .insert((namespace, name), report.clone());
        Ok(())
    }

    async fn create_or_patch_cluster(&self, report: &ClusterReport) -> Result<()> {
        let name = report.metadata.name.clone().unwrap_or_default();
        self.cluster.lock().unwrap().insert(name, report.clone());
        Ok(())
    }

    async fn delete_old_reports(&self, namespace: &str, run_id: RunId) -> Result<u32> {
        let mut guard = self.namespaced.lock().unwrap();
        let before = guard.len();
        guard.retain(|(ns, _), report| {
            ns != namespace
                || report
                    .metadata
                    .labels
                    .as_ref()
                    .and_then(|l| l.get(RUN_UID_LABEL))
                    .is_some_and(|v| v == &run_id.to_string())
        });
        Ok((before - guard.len()) as u32)
    }

    async fn delete_old_cluster_reports(&self, run_id: RunId) -> Result<u32> {
        let mut guard = self.cluster.lock().unwrap();
        let before = guard.len();
        guard.retain(|_, report| {
            report
                .metadata
                .labels
                .as_ref()
                .and_then(|l| l.get(RUN_UID_LABEL))
                .is_some_and(|v| v == &run_id.to_string())
        });
        Ok((before - guard.len()) as u32)
    }
}
