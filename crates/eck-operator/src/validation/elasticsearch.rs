//! Rules an Elasticsearch resource has to satisfy on creation and update.
use std::{collections::BTreeSet, net::IpAddr};

use kube::ResourceExt;
use semver::Version;

use super::{Violation, settings::forbidden_settings, version};
use crate::crd::elasticsearch::Elasticsearch;

pub const MASTER_REQUIRED: &str = "Elasticsearch needs at least one master node";
pub const PARSE_VERSION: &str = "Cannot parse Elasticsearch version";
pub const PARSE_STORED_VERSION: &str = "Cannot parse current Elasticsearch version";
pub const UNSUPPORTED_VERSION: &str = "Unsupported version";
pub const DOWNGRADE: &str = "Downgrades are not supported";
pub const UNSUPPORTED_UPGRADE_PATH: &str = "Unsupported version upgrade path";
pub const BLACKLISTED_SETTING: &str = "Configuration setting is not user-configurable";
pub const INVALID_SAN_IP: &str = "invalid SAN IP address";
pub const INVALID_NAMES: &str =
    "Elasticsearch configuration would generate resources with invalid names";
pub const DUPLICATE_NODE_SETS: &str = "NodeSet names must be unique";
pub const CLAIM_TEMPLATES_IMMUTABLE: &str = "Volume claim templates cannot be modified";

const MAX_LABEL_LENGTH: usize = 63;

/// Validates `proposed`; `stored` is the current object on updates.
pub fn validate(
    proposed: &Elasticsearch,
    stored: Option<&Elasticsearch>,
    max_name_length: usize,
) -> Vec<Violation> {
    let mut violations = Vec::new();
    violations.extend(valid_names(proposed, max_name_length));
    violations.extend(has_master(proposed));
    violations.extend(supported_version(proposed));
    violations.extend(no_blacklisted_settings(proposed));
    violations.extend(valid_san_ips(proposed));
    violations.extend(unique_node_set_names(proposed));

    if let Some(stored) = stored {
        violations.extend(valid_version_change(stored, proposed));
        violations.extend(unchanged_claim_templates(stored, proposed));
    }
    violations
}

fn is_dns_label(name: &str) -> bool {
    let bytes = name.as_bytes();
    !bytes.is_empty()
        && name.len() <= MAX_LABEL_LENGTH
        && bytes
            .iter()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || *b == b'-')
        && bytes.first().is_some_and(u8::is_ascii_alphanumeric)
        && bytes.last().is_some_and(u8::is_ascii_alphanumeric)
}

fn valid_names(es: &Elasticsearch, max_name_length: usize) -> Vec<Violation> {
    let name = es.name_any();
    if name.len() > max_name_length {
        return vec![Violation::new("metadata.name", name, INVALID_NAMES)];
    }

    es.spec
        .node_sets
        .iter()
        .enumerate()
        .filter(|(_, node_set)| !is_dns_label(&format!("{name}-es-{}", node_set.name)))
        .map(|(i, node_set)| {
            Violation::new(
                format!("spec.nodeSets[{i}].name"),
                &node_set.name,
                INVALID_NAMES,
            )
        })
        .collect()
}

fn has_master(es: &Elasticsearch) -> Option<Violation> {
    let has_master = es
        .spec
        .node_sets
        .iter()
        .any(|node_set| node_set.count > 0 && node_set.roles().master);
    (!has_master).then(|| Violation::new("spec.nodeSets", es.name_any(), MASTER_REQUIRED))
}

fn supported_version(es: &Elasticsearch) -> Option<Violation> {
    let raw = &es.spec.version;
    match Version::parse(raw) {
        Err(_) => Some(Violation::new("spec.version", raw, PARSE_VERSION)),
        Ok(parsed) if !version::is_supported(&parsed) => {
            Some(Violation::new("spec.version", raw, UNSUPPORTED_VERSION))
        }
        Ok(_) => None,
    }
}

fn no_blacklisted_settings(es: &Elasticsearch) -> Vec<Violation> {
    es.spec
        .node_sets
        .iter()
        .enumerate()
        .flat_map(|(i, node_set)| {
            forbidden_settings(&node_set.flattened_config())
                .into_iter()
                .map(|key| {
                    Violation::new(format!("spec.nodeSets[{i}].config"), key, BLACKLISTED_SETTING)
                })
                .collect::<Vec<_>>()
        })
        .collect()
}

fn valid_san_ips(es: &Elasticsearch) -> Vec<Violation> {
    es.spec
        .http
        .tls
        .self_signed_certificate
        .iter()
        .flat_map(|certificate| &certificate.subject_alt_names)
        .filter_map(|san| san.ip.as_deref())
        .filter(|ip| !ip.is_empty() && ip.parse::<IpAddr>().is_err())
        .map(|ip| {
            Violation::new(
                "spec.http.tls.selfSignedCertificate.subjectAltNames",
                ip,
                INVALID_SAN_IP,
            )
        })
        .collect()
}

fn unique_node_set_names(es: &Elasticsearch) -> Vec<Violation> {
    let mut seen = BTreeSet::new();
    let duplicates = es
        .spec
        .node_sets
        .iter()
        .filter(|node_set| !seen.insert(node_set.name.as_str()))
        .map(|node_set| node_set.name.as_str())
        .collect::<BTreeSet<_>>();

    duplicates
        .into_iter()
        .map(|name| Violation::new("spec.nodeSets", name, DUPLICATE_NODE_SETS))
        .collect()
}

/// Downgrades and jumps across unsupported upgrade paths. An unparsable
/// proposed version is already reported by [`supported_version`].
fn valid_version_change(stored: &Elasticsearch, proposed: &Elasticsearch) -> Option<Violation> {
    let current = match Version::parse(&stored.spec.version) {
        Ok(current) => current,
        Err(_) => {
            return Some(Violation::new(
                "spec.version",
                &stored.spec.version,
                PARSE_STORED_VERSION,
            ));
        }
    };
    let next = Version::parse(&proposed.spec.version).ok()?;

    if next < current {
        Some(Violation::new("spec.version", &proposed.spec.version, DOWNGRADE))
    } else if !version::can_upgrade(&current, &next) {
        Some(Violation::new(
            "spec.version",
            &proposed.spec.version,
            UNSUPPORTED_UPGRADE_PATH,
        ))
    } else {
        None
    }
}

/// Node sets are backed by stateful sets, whose claim templates are fixed.
fn unchanged_claim_templates(stored: &Elasticsearch, proposed: &Elasticsearch) -> Vec<Violation> {
    proposed
        .spec
        .node_sets
        .iter()
        .enumerate()
        .filter(|(_, node_set)| {
            stored
                .spec
                .node_sets
                .iter()
                .find(|old| old.name == node_set.name)
                .is_some_and(|old| old.volume_claim_templates != node_set.volume_claim_templates)
        })
        .map(|(i, node_set)| {
            Violation::new(
                format!("spec.nodeSets[{i}].volumeClaimTemplates"),
                &node_set.name,
                CLAIM_TEMPLATES_IMMUTABLE,
            )
        })
        .collect()
}
