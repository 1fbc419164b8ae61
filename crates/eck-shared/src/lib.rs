//! Helpers shared by the operator crates of this workspace, mostly around
//! rendering custom resource definitions as YAML.

pub mod crd;
pub mod yaml;
