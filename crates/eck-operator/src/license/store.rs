//! Licenses persisted as Secrets in the operator namespace.
use std::collections::BTreeMap;

use jiff::Timestamp;
use k8s_openapi::{ByteString, api::core::v1::Secret};
use kube::{ResourceExt, core::ObjectMeta};
use serde_json::json;
use snafu::{OptionExt, ResultExt, Snafu};
use strum::{EnumDiscriminants, IntoStaticStr};

use super::{
    model::{EnterpriseLicense, TrialLicense},
    verifier::{self, Signer, Verifier},
};
use crate::{
    client::{self, ObjectStore, ResourceId},
    init::random_uuid,
    kvp::{LICENSE_INVALID_ANNOTATION, LICENSE_NAME_LABEL, LICENSE_TYPE_LABEL},
};

/// Sentinel Secret proving that the one trial of this installation started.
pub const TRIAL_STATUS_SECRET: &str = "eck-trial-status";

/// Secret data key holding a license JSON document.
pub const LICENSE_DATA_KEY: &str = "license";

/// Sentinel data key holding the trial public key.
pub const PUBKEY_DATA_KEY: &str = "pubkey";

/// Values of [`LICENSE_TYPE_LABEL`].
pub const ENTERPRISE_LICENSE_TYPE: &str = "enterprise";
pub const ENTERPRISE_TRIAL_LICENSE_TYPE: &str = "enterprise-trial";
pub const CLUSTER_LICENSE_TYPE: &str = "cluster";

#[derive(Debug, Snafu, EnumDiscriminants)]
#[strum_discriminants(derive(IntoStaticStr))]
pub enum Error {
    #[snafu(display("{secret} holds no license"))]
    NotFound { secret: ResourceId },

    #[snafu(display("failed to parse the license in {secret}"))]
    Parse {
        source: serde_json::Error,
        secret: ResourceId,
    },

    #[snafu(display("license {uid} has an invalid signature"))]
    SignatureInvalid {
        source: verifier::Error,
        uid: String,
    },

    #[snafu(display("trial already started"))]
    TrialAlreadyStarted,

    #[snafu(display("failed to access licenses in the store"))]
    Store { source: client::Error },

    #[snafu(display("failed to sign trial license"))]
    SignTrial { source: verifier::Error },

    #[snafu(display("failed to render trial license {uid}"))]
    RenderLicense {
        source: serde_json::Error,
        uid: String,
    },
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// The enterprise license stored in `secret`.
pub fn parse_license_secret(secret: &Secret) -> Result<EnterpriseLicense> {
    let id = ResourceId::of(secret);
    let data = secret
        .data
        .as_ref()
        .and_then(|data| data.get(LICENSE_DATA_KEY))
        .context(NotFoundSnafu { secret: id.clone() })?;
    serde_json::from_slice(&data.0).context(ParseSnafu { secret: id })
}

/// All enterprise and enterprise trial licenses in `namespace`. Secrets that
/// do not parse are logged and skipped.
pub async fn list_enterprise_licenses<S: ObjectStore>(
    store: &S,
    namespace: &str,
) -> Result<Vec<EnterpriseLicense>> {
    let mut licenses = Vec::new();
    for license_type in [ENTERPRISE_LICENSE_TYPE, ENTERPRISE_TRIAL_LICENSE_TYPE] {
        let labels = BTreeMap::from([(LICENSE_TYPE_LABEL.to_owned(), license_type.to_owned())]);
        let secrets = store
            .list::<Secret>(Some(namespace), &labels)
            .await
            .context(StoreSnafu)?;

        for secret in &secrets {
            match parse_license_secret(secret) {
                Ok(license) => licenses.push(license),
                Err(error) => tracing::warn!(
                    secret = %ResourceId::of(secret),
                    error = &error as &dyn std::error::Error,
                    "skipping unusable license secret"
                ),
            }
        }
    }
    Ok(licenses)
}

/// The verifier for trial licenses of this installation, [`None`] before the
/// trial started.
pub async fn trial_verifier<S: ObjectStore>(
    store: &S,
    namespace: &str,
) -> Result<Option<Verifier>> {
    let Some(sentinel) = store
        .get_opt::<Secret>(namespace, TRIAL_STATUS_SECRET)
        .await
        .context(StoreSnafu)?
    else {
        return Ok(None);
    };

    let Some(pubkey) = sentinel
        .data
        .as_ref()
        .and_then(|data| data.get(PUBKEY_DATA_KEY))
    else {
        tracing::warn!(secret = %ResourceId::of(&sentinel), "trial status holds no public key");
        return Ok(None);
    };

    match Verifier::from_public_key_der(&pubkey.0) {
        Ok(verifier) => Ok(Some(verifier)),
        Err(error) => {
            tracing::warn!(
                error = &error as &dyn std::error::Error,
                "trial status holds an unusable public key"
            );
            Ok(None)
        }
    }
}

/// Starts the one trial of this installation for the trial request `request`.
///
/// Generates a key pair of `key_bits` bits, self-signs a trial license with
/// it, records the public key in the trial status sentinel and writes the
/// license into `request`. Fails with [`Error::TrialAlreadyStarted`] if the
/// sentinel exists already.
pub async fn init_trial<S: ObjectStore>(
    store: &S,
    operator_namespace: &str,
    request: &Secret,
    now: Timestamp,
    key_bits: usize,
) -> Result<TrialLicense> {
    if store
        .get_opt::<Secret>(operator_namespace, TRIAL_STATUS_SECRET)
        .await
        .context(StoreSnafu)?
        .is_some()
    {
        return TrialAlreadyStartedSnafu.fail();
    }

    let requested = match parse_license_secret(request) {
        Ok(license) => license,
        Err(Error::NotFound { .. }) => EnterpriseLicense::default(),
        Err(error) => return Err(error),
    };
    let TrialLicense(mut license) = TrialLicense::start(requested, now, random_uuid());

    let signer = Signer::generate(key_bits).context(SignTrialSnafu)?;
    license.license.spec.signature = signer.sign(license.spec()).context(SignTrialSnafu)?;
    let pubkey = signer.verifier().public_key_der().context(SignTrialSnafu)?;

    let sentinel = Secret {
        metadata: ObjectMeta {
            name: Some(TRIAL_STATUS_SECRET.to_owned()),
            namespace: Some(operator_namespace.to_owned()),
            labels: Some(BTreeMap::from([(
                LICENSE_NAME_LABEL.to_owned(),
                request.name_any(),
            )])),
            ..ObjectMeta::default()
        },
        data: Some(BTreeMap::from([(
            PUBKEY_DATA_KEY.to_owned(),
            ByteString(pubkey),
        )])),
        ..Secret::default()
    };
    match store.create(&sentinel).await {
        Ok(_) => {}
        Err(error) if error.is_conflict() => return TrialAlreadyStartedSnafu.fail(),
        Err(error) => return Err(error).context(StoreSnafu),
    }

    let rendered = serde_json::to_vec(&license).context(RenderLicenseSnafu {
        uid: license.spec().uid.clone(),
    })?;
    store
        .merge_patch::<Secret>(
            &request.namespace().unwrap_or_default(),
            &request.name_any(),
            json!({
                "metadata": { "annotations": { LICENSE_INVALID_ANNOTATION: null } },
                "data": { LICENSE_DATA_KEY: ByteString(rendered) },
            }),
        )
        .await
        .context(StoreSnafu)?;

    tracing::info!(license.uid = %license.spec().uid, "started trial");
    Ok(TrialLicense(license))
}
