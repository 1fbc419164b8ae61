//! Process-wide settings, captured once at startup and handed to every
//! controller.
use uuid::Uuid;

use crate::{cli::RunArguments, namespace::WatchNamespace};

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Init {
    pub operator_namespace: String,
    pub operator_uuid: String,
    pub watch_namespace: WatchNamespace,
    pub max_concurrent_reconciles: u16,
    pub max_name_length: usize,
}

impl Init {
    pub fn from_run_arguments(args: &RunArguments) -> Self {
        Self {
            operator_namespace: args.operator_namespace.clone(),
            operator_uuid: args
                .operator_uuid
                .clone()
                .filter(|uuid| !uuid.is_empty())
                .unwrap_or_else(random_uuid),
            watch_namespace: args.watch_namespace.clone(),
            max_concurrent_reconciles: args.max_concurrent_reconciles.max(1),
            max_name_length: args.max_name_length,
        }
    }
}

/// A random version 4 UUID.
pub(crate) fn random_uuid() -> String {
    Uuid::new_v4().to_string()
}
