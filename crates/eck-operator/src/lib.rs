//! Reconciliation core of the Elasticsearch operator: license verification
//! and selection, the generic resource reconciler, the association
//! controller and the admission rules.

pub mod association;
pub mod cli;
pub mod client;
pub mod controller;
pub mod crd;
pub mod finalizer;
pub mod init;
pub mod kvp;
pub mod license;
pub mod logging;
pub mod namespace;
pub mod reconciler;
pub mod utils;
pub mod validation;
pub mod watches;

// External re-exports
pub use eck_shared as shared;
pub use eck_shared::{crd::CustomResourceExt, yaml::YamlSchema};
pub use k8s_openapi;
pub use kube;
