use jiff::Timestamp;

use super::model::{ClusterLicense, EnterpriseLicense, LicenseSpec, LicenseType};

/// A cluster license picked for a cluster, together with the UID of the
/// enterprise license it was taken from.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Match {
    pub license: ClusterLicense,
    pub parent_uid: String,
}

/// Picks the cluster license a cluster should run with.
///
/// Only enterprise licenses accepted by `is_valid` are considered, and only
/// their cluster licenses valid at `now` and of the `desired` tier, if any.
/// The highest tier wins, ties go to the license expiring last.
pub fn best_match(
    now: Timestamp,
    licenses: &[EnterpriseLicense],
    desired: Option<LicenseType>,
    is_valid: impl Fn(&EnterpriseLicense) -> bool,
) -> Option<Match> {
    let mut candidates = licenses
        .iter()
        .filter(|parent| is_valid(parent))
        .flat_map(|parent| {
            redeemable(parent)
                .into_iter()
                .map(move |cluster| (parent, cluster))
        })
        .filter(|(_, cluster)| cluster.license.is_valid_at(now))
        .filter(|(_, cluster)| desired.is_none_or(|tier| cluster.license.license_type == tier))
        .filter_map(|(parent, cluster)| {
            let Some(rank) = cluster.license.license_type.tier_rank() else {
                tracing::debug!(
                    license.uid = %cluster.license.uid,
                    license.tier = %cluster.license.license_type,
                    "skipping cluster license of unranked type"
                );
                return None;
            };
            Some((rank, cluster.license.remaining_at(now), parent, cluster))
        })
        .collect::<Vec<_>>();

    candidates.sort_by_key(|(rank, remaining, _, _)| (*rank, *remaining));
    candidates.pop().map(|(_, _, parent, cluster)| Match {
        license: cluster,
        parent_uid: parent.spec().uid.clone(),
    })
}

/// The cluster licenses `parent` can be redeemed for. A trial started by the
/// operator carries none and stands for an Elasticsearch trial license over
/// its own validity window.
fn redeemable(parent: &EnterpriseLicense) -> Vec<ClusterLicense> {
    if !parent.is_trial() || !parent.license.cluster_licenses.is_empty() {
        return parent.license.cluster_licenses.clone();
    }

    let spec = parent.spec();
    vec![ClusterLicense {
        license: LicenseSpec {
            uid: spec.uid.clone(),
            license_type: LicenseType::Trial,
            start_date_in_millis: spec.start_date_in_millis,
            expiry_date_in_millis: spec.expiry_date_in_millis,
            ..LicenseSpec::default()
        },
    }]
}
