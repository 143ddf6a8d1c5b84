//! Report model & store (C4). Split into `model` (types, `newReport`,
//! `addResult`) and `store` (`createOrPatch`, stale-report GC), mirroring
//! the teacher's own split between CRD type definitions (`crd.rs`) and
//! the reconcile loop that writes them (`commands/reconcile.rs`).

pub mod model;
pub mod store;
