//! Admission of license Secrets: complete and authentically signed.
use k8s_openapi::api::core::v1::Secret;
use kube::ResourceExt;

use super::Violation;
use crate::{
    kvp::LICENSE_TYPE_LABEL,
    license::{
        LicenseChecker,
        store::{self, ENTERPRISE_LICENSE_TYPE, ENTERPRISE_TRIAL_LICENSE_TYPE, parse_license_secret},
    },
};

pub const UNPARSABLE_LICENSE: &str = "Cannot parse license";
pub const MISSING_LICENSE: &str = "License secret holds no license";
pub const MISSING_FIELD: &str = "License field is required";
pub const NO_PUBLIC_KEY: &str = "No public key to check the license signature against";
pub const INVALID_SIGNATURE: &str = "License signature is invalid";

pub fn validate(secret: &Secret, checker: &LicenseChecker) -> Vec<Violation> {
    let license_type = secret.labels().get(LICENSE_TYPE_LABEL).map(String::as_str);
    let is_trial_request = license_type == Some(ENTERPRISE_TRIAL_LICENSE_TYPE);
    if !is_trial_request && license_type != Some(ENTERPRISE_LICENSE_TYPE) {
        return Vec::new();
    }

    let license = match parse_license_secret(secret) {
        Ok(license) => license,
        // The operator fills in trial requests once it starts the trial.
        Err(store::Error::NotFound { .. }) if is_trial_request => return Vec::new(),
        Err(store::Error::NotFound { .. }) => {
            return vec![Violation::new("data", secret.name_any(), MISSING_LICENSE)];
        }
        Err(error) => {
            return vec![Violation::new(
                "data.license",
                error.to_string(),
                UNPARSABLE_LICENSE,
            )];
        }
    };

    let spec = license.spec();
    if is_trial_request && spec.signature.is_empty() {
        return Vec::new();
    }
    let missing = spec.missing_fields();
    if !missing.is_empty() {
        return missing
            .into_iter()
            .map(|field| Violation::new(format!("license.{field}"), &spec.uid, MISSING_FIELD))
            .collect();
    }

    let verifier = if license.is_trial() {
        checker.trial.as_ref()
    } else {
        checker.enterprise.as_ref()
    };
    match verifier.map(|verifier| verifier.verify(spec)) {
        None => vec![Violation::new("license.signature", &spec.uid, NO_PUBLIC_KEY)],
        Some(Err(error)) => vec![Violation::new(
            "license.signature",
            format!("{}: {error}", spec.uid),
            INVALID_SIGNATURE,
        )],
        Some(Ok(())) => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use k8s_openapi::ByteString;

    use super::*;
    use crate::{
        license::{
            model::{EnterpriseLicense, EnterpriseLicenseSpec, LicenseSpec, LicenseType},
            store::{LICENSE_DATA_KEY, testing::license_secret},
            verifier::testing::SIGNER,
        },
        validation::Verdict,
    };

    fn checker() -> LicenseChecker {
        LicenseChecker {
            enterprise: Some(SIGNER.verifier().clone()),
            trial: None,
        }
    }

    fn signed_license() -> EnterpriseLicense {
        let mut spec = LicenseSpec {
            uid: "8b5e4a7c".to_owned(),
            license_type: LicenseType::Enterprise,
            issue_date_in_millis: 1_548_979_200_000,
            start_date_in_millis: 1_548_979_200_000,
            expiry_date_in_millis: 1_580_515_200_000,
            max_instances: Some(10),
            issued_to: "Acme".to_owned(),
            issuer: "API".to_owned(),
            ..LicenseSpec::default()
        };
        spec.signature = SIGNER.sign(&spec).unwrap();
        EnterpriseLicense {
            license: EnterpriseLicenseSpec {
                spec,
                ..EnterpriseLicenseSpec::default()
            },
        }
    }

    fn enterprise_secret(license: &EnterpriseLicense) -> Secret {
        license_secret("elastic-system", "license", ENTERPRISE_LICENSE_TYPE, Some(license))
    }

    #[test]
    fn signed_license_is_admitted() {
        let secret = enterprise_secret(&signed_license());
        assert!(validate(&secret, &checker()).is_empty());
    }

    #[test]
    fn tampered_license_is_rejected() {
        let mut license = signed_license();
        let issued_to = &mut license.license.spec.issued_to;
        // Flip a single bit of the first character.
        *issued_to = format!("{}{}", (issued_to.as_bytes()[0] ^ 0x01) as char, &issued_to[1..]);

        let verdict = Verdict::from(validate(&enterprise_secret(&license), &checker()));
        assert!(!verdict.allowed);
        assert!(verdict.reason.contains("signature"), "{}", verdict.reason);
    }

    #[test]
    fn missing_fields_are_named() {
        let mut license = signed_license();
        license.license.spec.issuer = String::new();
        license.license.spec.uid = String::new();

        let violations = validate(&enterprise_secret(&license), &checker());
        let fields = violations
            .iter()
            .map(|violation| violation.field.as_str())
            .collect::<Vec<_>>();
        assert_eq!(fields, ["license.uid", "license.issuer"]);
    }

    #[test]
    fn unusable_secrets_are_rejected() {
        let empty = license_secret("elastic-system", "license", ENTERPRISE_LICENSE_TYPE, None);
        assert_eq!(validate(&empty, &checker())[0].reason, MISSING_LICENSE);

        let mut garbage = empty;
        garbage.data = Some(
            [(LICENSE_DATA_KEY.to_owned(), ByteString(b"{".to_vec()))]
                .into_iter()
                .collect(),
        );
        assert_eq!(validate(&garbage, &checker())[0].reason, UNPARSABLE_LICENSE);
    }

    #[test]
    fn trial_requests_and_other_secrets_pass() {
        let request = license_secret(
            "elastic-system",
            "trial",
            ENTERPRISE_TRIAL_LICENSE_TYPE,
            None,
        );
        assert!(validate(&request, &checker()).is_empty());

        let mut unlabeled = enterprise_secret(&signed_license());
        unlabeled.metadata.labels = None;
        unlabeled.data = None;
        assert!(validate(&unlabeled, &checker()).is_empty());
    }

    #[test]
    fn unsigned_trial_requests_pass() {
        let request = EnterpriseLicense {
            license: EnterpriseLicenseSpec {
                spec: LicenseSpec {
                    license_type: LicenseType::EnterpriseTrial,
                    ..LicenseSpec::default()
                },
                ..EnterpriseLicenseSpec::default()
            },
        };
        let secret = license_secret(
            "elastic-system",
            "trial",
            ENTERPRISE_TRIAL_LICENSE_TYPE,
            Some(&request),
        );
        assert!(validate(&secret, &checker()).is_empty());
    }

    #[test]
    fn signed_trials_are_checked() {
        let mut trial = signed_license();
        trial.license.spec.license_type = LicenseType::EnterpriseTrial;
        trial.license.spec.signature = SIGNER.sign(trial.spec()).unwrap();
        let secret = license_secret(
            "elastic-system",
            "trial",
            ENTERPRISE_TRIAL_LICENSE_TYPE,
            Some(&trial),
        );
        assert_eq!(validate(&secret, &checker())[0].reason, NO_PUBLIC_KEY);
    }

    #[test]
    fn licenses_need_a_key() {
        let secret = enterprise_secret(&signed_license());
        let violations = validate(&secret, &LicenseChecker::default());
        assert_eq!(violations[0].reason, NO_PUBLIC_KEY);
    }
}
