//! Settings the operator manages itself and users must not override.
use std::collections::BTreeMap;

use serde_json::Value;

/// Reserved setting keys. An entry also reserves every key nested under it.
pub const SETTINGS_BLACKLIST: &[&str] = &[
    "cluster.initial_master_nodes",
    "discovery.seed_hosts",
    "discovery.seed_providers",
    "discovery.zen.minimum_master_nodes",
    "discovery.zen.ping.unicast.hosts",
    "network.host",
    "network.publish_host",
    "node.name",
    "path.data",
    "path.logs",
    "xpack.security.authc.reserved_realm.enabled",
    "xpack.security.http.ssl",
    "xpack.security.transport.ssl",
];

pub fn is_blacklisted(key: &str) -> bool {
    SETTINGS_BLACKLIST.iter().any(|reserved| {
        key.strip_prefix(reserved)
            .is_some_and(|rest| rest.is_empty() || rest.starts_with('.'))
    })
}

/// Reserved keys set in the flattened `config`, sorted and deduplicated.
pub fn forbidden_settings(config: &BTreeMap<String, Value>) -> Vec<&str> {
    config
        .keys()
        .map(String::as_str)
        .filter(|key| is_blacklisted(key))
        .collect()
}
