//! `--output-scan` JSON dump (ambient). Mirrors the teacher's
//! `policy.rs::export` dump-to-stdout idiom, swapped from `serde_yaml`
//! to `serde_json` per `spec.md` §6 ("Optional single-shot stdout dump of
//! the scan results as JSON").

use serde::Serialize;

use crate::engine::ScanOutcome;
use crate::error::{Result, ScanError};

/// Serializes the whole-run scan outcome to stdout as JSON. Includes
/// every report built this run, whether or not `createOrPatch` was
/// attempted (`--disable-store` skips persistence but not this dump).
pub fn dump_scan(outcome: &ScanOutcome) -> Result<()> {
    let json = serde_json::to_string_pretty(&ScanOutcomeView::from(outcome))
        .map_err(|e| ScanError::Config(format!("serializing scan output: {e}")))?;
    println!("{json}");
    Ok(())
}

#[derive(Serialize)]
struct ScanOutcomeView<'a> {
    run_id: String,
    namespaced_reports: &'a [crate::report::model::NamespacedReport],
    cluster_reports: &'a [crate::report::model::ClusterReport],
    namespaces_scanned: usize,
    namespaces_failed: usize,
}

impl<'a> From<&'a ScanOutcome> for ScanOutcomeView<'a> {
    fn from(outcome: &'a ScanOutcome) -> Self {
        Self {
            run_id: outcome.run_id.to_string(),
            namespaced_reports: &outcome.namespaced_reports,
            cluster_reports: &outcome.cluster_reports,
            namespaces_scanned: outcome.namespaces_scanned,
            namespaces_failed: outcome.namespaces_failed,
        }
    }
}
