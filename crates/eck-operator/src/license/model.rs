//! JSON models of licenses as they are stored in license Secrets.
use jiff::{SignedDuration, Timestamp};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

#[derive(
    Clone, Copy, Debug, Default, Deserialize, Display, EnumString, Eq, Hash, PartialEq, Serialize,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum LicenseType {
    #[default]
    Basic,
    Trial,
    Gold,
    Platinum,
    Enterprise,
    EnterpriseTrial,
}

impl LicenseType {
    /// Rank of the tiers a cluster can run with, higher is better. Enterprise
    /// licenses only wrap cluster licenses and are not ranked.
    pub fn tier_rank(self) -> Option<u8> {
        match self {
            Self::Basic => Some(0),
            Self::Trial => Some(1),
            Self::Gold => Some(2),
            Self::Platinum => Some(3),
            Self::Enterprise | Self::EnterpriseTrial => None,
        }
    }
}

/// Fields shared by every kind of license.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct LicenseSpec {
    #[serde(default)]
    pub uid: String,

    #[serde(rename = "type")]
    pub license_type: LicenseType,

    #[serde(default)]
    pub issue_date_in_millis: i64,

    #[serde(default)]
    pub start_date_in_millis: i64,

    #[serde(default)]
    pub expiry_date_in_millis: i64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_instances: Option<u32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_nodes: Option<u32>,

    #[serde(default)]
    pub issued_to: String,

    #[serde(default)]
    pub issuer: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub signature: String,

    /// Version of the signature format.
    #[serde(default, skip_serializing_if = "is_zero")]
    pub version: u32,
}

fn is_zero(value: &u32) -> bool {
    *value == 0
}

fn from_millis(millis: i64) -> Timestamp {
    Timestamp::from_millisecond(millis).unwrap_or(if millis < 0 {
        Timestamp::MIN
    } else {
        Timestamp::MAX
    })
}

impl LicenseSpec {
    pub fn start_time(&self) -> Timestamp {
        from_millis(self.start_date_in_millis)
    }

    pub fn expiry_time(&self) -> Timestamp {
        from_millis(self.expiry_date_in_millis)
    }

    /// Whether `now` lies within `[start, expiry)`.
    pub fn is_valid_at(&self, now: Timestamp) -> bool {
        self.start_time() <= now && now < self.expiry_time()
    }

    /// Time left until expiry, negative once expired.
    pub fn remaining_at(&self, now: Timestamp) -> SignedDuration {
        self.expiry_time().duration_since(now)
    }

    /// Names of the fields that have to be set before a license can be signed
    /// or admitted.
    pub fn missing_fields(&self) -> Vec<&'static str> {
        [
            ("uid", self.uid.is_empty()),
            ("issuer", self.issuer.is_empty()),
            ("issued_to", self.issued_to.is_empty()),
            ("issue_date_in_millis", self.issue_date_in_millis == 0),
            ("start_date_in_millis", self.start_date_in_millis == 0),
            ("expiry_date_in_millis", self.expiry_date_in_millis == 0),
        ]
        .into_iter()
        .filter_map(|(field, missing)| missing.then_some(field))
        .collect()
    }
}

/// A license applicable to a single cluster.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct ClusterLicense {
    pub license: LicenseSpec,
}

/// The body of an [`EnterpriseLicense`].
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct EnterpriseLicenseSpec {
    #[serde(flatten)]
    pub spec: LicenseSpec,

    /// Cluster licenses redeemable under this license.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub cluster_licenses: Vec<ClusterLicense>,
}

/// A license bundle purchased for the whole installation.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct EnterpriseLicense {
    pub license: EnterpriseLicenseSpec,
}

impl EnterpriseLicense {
    pub fn spec(&self) -> &LicenseSpec {
        &self.license.spec
    }

    pub fn is_trial(&self) -> bool {
        self.spec().license_type == LicenseType::EnterpriseTrial
    }
}

/// An enterprise license self-signed by the operator when a trial starts.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
#[serde(transparent)]
pub struct TrialLicense(pub EnterpriseLicense);

/// Trials run for this long from activation.
pub const TRIAL_DURATION: SignedDuration = SignedDuration::from_hours(30 * 24);

pub const TRIAL_ISSUER: &str = "Elastic k8s operator";
pub const TRIAL_ISSUED_TO: &str = "Unknown";

impl TrialLicense {
    /// Starts the trial at `now`, filling in whatever the request left empty.
    pub fn start(mut license: EnterpriseLicense, now: Timestamp, uid: String) -> Self {
        let spec = &mut license.license.spec;
        let start = now.as_millisecond();
        let expiry = now.checked_add(TRIAL_DURATION).unwrap_or(Timestamp::MAX);

        spec.license_type = LicenseType::EnterpriseTrial;
        spec.issue_date_in_millis = start;
        spec.start_date_in_millis = start;
        spec.expiry_date_in_millis = expiry.as_millisecond();
        if spec.uid.is_empty() {
            spec.uid = uid;
        }
        if spec.issuer.is_empty() {
            TRIAL_ISSUER.clone_into(&mut spec.issuer);
        }
        if spec.issued_to.is_empty() {
            TRIAL_ISSUED_TO.clone_into(&mut spec.issued_to);
        }
        spec.signature.clear();
        Self(license)
    }
}

/// Any license the operator deals with.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum License {
    Cluster(ClusterLicense),
    Enterprise(EnterpriseLicense),
    Trial(TrialLicense),
}

impl License {
    pub fn spec(&self) -> &LicenseSpec {
        match self {
            Self::Cluster(cluster) => &cluster.license,
            Self::Enterprise(enterprise) | Self::Trial(TrialLicense(enterprise)) => {
                enterprise.spec()
            }
        }
    }

    pub fn start_time(&self) -> Timestamp {
        self.spec().start_time()
    }

    pub fn expiry_time(&self) -> Timestamp {
        self.spec().expiry_time()
    }
}

impl From<EnterpriseLicense> for License {
    fn from(license: EnterpriseLicense) -> Self {
        if license.is_trial() {
            Self::Trial(TrialLicense(license))
        } else {
            Self::Enterprise(license)
        }
    }
}

#[cfg(test)]
mod tests {
    use indoc::indoc;
    use rstest::rstest;

    use super::*;

    const ENTERPRISE: &str = indoc! {r#"
        {
          "license": {
            "uid": "876a7a2d-2fd8-4b2e-9d7b-3b3e6c4c2a1e",
            "type": "enterprise",
            "issue_date_in_millis": 1548115200000,
            "start_date_in_millis": 1548115200000,
            "expiry_date_in_millis": 1561247999999,
            "max_instances": 40,
            "issued_to": "test org",
            "issuer": "test issuer",
            "signature": "xx",
            "cluster_licenses": [
              {
                "license": {
                  "uid": "73117b2a-8f5c-4b8a-9f6a-6c8e5c3f2a1b",
                  "type": "platinum",
                  "issue_date_in_millis": 1548115200000,
                  "start_date_in_millis": 1548115200000,
                  "expiry_date_in_millis": 1561247999999,
                  "max_nodes": 100,
                  "issued_to": "test org",
                  "issuer": "test issuer",
                  "signature": "yy"
                }
              }
            ]
          }
        }
    "#};

    #[test]
    fn parses_enterprise_license_with_cluster_licenses() {
        let license: EnterpriseLicense = serde_json::from_str(ENTERPRISE).unwrap();
        assert_eq!(license.spec().license_type, LicenseType::Enterprise);
        assert_eq!(license.spec().max_instances, Some(40));

        let cluster = &license.license.cluster_licenses[0].license;
        assert_eq!(cluster.license_type, LicenseType::Platinum);
        assert_eq!(cluster.max_nodes, Some(100));
        assert_eq!(cluster.signature, "yy");
    }

    #[rstest]
    #[case(LicenseType::Basic, Some(0))]
    #[case(LicenseType::Platinum, Some(3))]
    #[case(LicenseType::EnterpriseTrial, None)]
    fn tiers_are_ranked(#[case] license_type: LicenseType, #[case] rank: Option<u8>) {
        assert_eq!(license_type.tier_rank(), rank);
    }

    #[test]
    fn type_names_are_snake_case() {
        assert_eq!(LicenseType::EnterpriseTrial.to_string(), "enterprise_trial");
        assert_eq!(
            "enterprise_trial".parse::<LicenseType>().unwrap(),
            LicenseType::EnterpriseTrial
        );
    }

    #[rstest]
    #[case::before_start(999, false)]
    #[case::at_start(1_000, true)]
    #[case::within(1_500, true)]
    #[case::at_expiry(2_000, false)]
    fn validity_window(#[case] now: i64, #[case] valid: bool) {
        let spec = LicenseSpec {
            start_date_in_millis: 1_000,
            expiry_date_in_millis: 2_000,
            ..LicenseSpec::default()
        };
        let now = Timestamp::from_millisecond(now).unwrap();
        assert_eq!(spec.is_valid_at(now), valid);
    }

    #[test]
    fn trial_start_populates_missing_fields() {
        let now = Timestamp::from_millisecond(1_548_979_200_000).unwrap();
        let TrialLicense(trial) = TrialLicense::start(EnterpriseLicense::default(), now, "uid".to_owned());

        let spec = trial.spec();
        assert!(spec.missing_fields().is_empty());
        assert_eq!(spec.issuer, TRIAL_ISSUER);
        assert_eq!(spec.license_type, LicenseType::EnterpriseTrial);
        assert_eq!(
            spec.expiry_date_in_millis - spec.start_date_in_millis,
            30 * 24 * 3600 * 1000
        );
        assert!(matches!(License::from(trial), License::Trial(_)));
    }

    #[test]
    fn missing_fields_are_named() {
        let spec = LicenseSpec {
            uid: "a".to_owned(),
            issuer: "b".to_owned(),
            start_date_in_millis: 1,
            expiry_date_in_millis: 2,
            issue_date_in_millis: 1,
            ..LicenseSpec::default()
        };
        assert_eq!(spec.missing_fields(), ["issued_to"]);
    }
}
