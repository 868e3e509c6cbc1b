//! Per-kind resource syncers. Each module implements [`crate::framework::KindSyncer`]
//! for one Kubernetes kind; the generic framework does the rest (queueing,
//! dispatch, requeue policy).

pub mod configmaps;
pub mod endpoints;
pub mod ingresses;
pub mod networkpolicies;
pub mod nodes;
pub mod persistentvolumeclaims;
pub mod persistentvolumes;
pub mod poddisruptionbudgets;
pub mod pods;
pub mod priorityclasses;
pub mod secrets;
pub mod serviceaccounts;
pub mod services;
pub mod storageclasses;
