//! Run identity: a fresh UUID generated once per scanner invocation and
//! stamped on every report the run writes.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Label key used to mark which run produced a given report.
pub const RUN_UID_LABEL: &str = "audit-scanner.kubewarden.io/run-uid";

/// Label key used to mark reports as managed by this app.
pub const MANAGED_BY_LABEL: &str = "app.kubernetes.io/managed-by";

/// Value of `MANAGED_BY_LABEL` written onto every report this app owns.
pub const APP_NAME: &str = "audit-scanner";

/// Label key carrying the report-schema version.
pub const REPORT_VERSION_LABEL: &str = "audit-scanner.kubewarden.io/report-version";

/// Current report-schema version (see `SPEC_FULL.md` §0).
pub const REPORT_VERSION: &str = "v2";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RunId(Uuid);

impl RunId {
    /// Generate a fresh run identifier. Called exactly once per process.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for RunId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}
