//! Applies the best available cluster license to each Elasticsearch cluster.
use std::{collections::BTreeMap, sync::Arc, time::Duration};

use jiff::{SignedDuration, Timestamp};
use k8s_openapi::{ByteString, api::core::v1::Secret};
use kube::{
    ResourceExt,
    core::{DynamicObject, ObjectMeta},
    runtime::{controller::Action, reflector::ObjectRef},
};
use snafu::{ResultExt, Snafu};
use strum::{EnumDiscriminants, IntoStaticStr};

use super::{
    LicenseChecker,
    matching::{Match, best_match},
    model::LicenseSpec,
    store::{self, CLUSTER_LICENSE_TYPE, LICENSE_DATA_KEY},
    verifier::Verifier,
};
use crate::{
    client::{ErrorKind, ObjectStore},
    crd::elasticsearch::{Elasticsearch, license_secret_name},
    finalizer::has_deletion_stamp,
    init::Init,
    kvp::{LICENSE_NAME_LABEL, LICENSE_TYPE_LABEL},
    logging::controller::ReconcilerError,
    reconciler::{self, Policy, reconcile_resource},
};

pub const CONTROLLER_NAME: &str = "license-controller";

/// Clusters without a license are checked again after this long.
pub const DEFAULT_REQUEUE: Duration = Duration::from_secs(60 * 60);

/// Licenses are replaced half this long before they expire.
pub const SAFETY_MARGIN: SignedDuration = SignedDuration::from_hours(30 * 24);

pub const MIN_REQUEUE: Duration = Duration::from_secs(60);

pub struct Ctx<S> {
    pub store: S,
    pub init: Init,

    /// Key of the licenses issued by Elastic, if configured.
    pub enterprise_key: Option<Verifier>,
}

#[derive(Debug, Snafu, EnumDiscriminants)]
#[strum_discriminants(derive(IntoStaticStr))]
pub enum Error {
    #[snafu(display("failed to load the trial key"))]
    LoadChecker { source: store::Error },

    #[snafu(display("failed to list enterprise licenses"))]
    ListLicenses { source: store::Error },

    #[snafu(display("failed to render cluster license {uid}"))]
    RenderLicense {
        source: serde_json::Error,
        uid: String,
    },

    #[snafu(display("failed to apply the cluster license"))]
    ApplyLicense { source: reconciler::Error },
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::LoadChecker { source } | Self::ListLicenses { source } => match source {
                store::Error::Store { source } => source.kind(),
                _ => ErrorKind::Other,
            },
            Self::RenderLicense { .. } => ErrorKind::Other,
            Self::ApplyLicense { source } => source.kind(),
        }
    }
}

impl ReconcilerError for Error {
    fn category(&self) -> &'static str {
        ErrorDiscriminants::from(self).into()
    }

    fn secondary_object(&self) -> Option<ObjectRef<DynamicObject>> {
        match self {
            Self::ApplyLicense { source } => {
                let secret = source.object();
                Some(
                    ObjectRef::<Secret>::new(&secret.name)
                        .within(&secret.namespace)
                        .erase(),
                )
            }
            _ => None,
        }
    }
}

pub async fn reconcile<S: ObjectStore>(
    es: Arc<Elasticsearch>,
    ctx: Arc<Ctx<S>>,
) -> Result<Action, Error> {
    reconcile_at(&es, &ctx, Timestamp::now()).await
}

#[tracing::instrument(skip_all, fields(elasticsearch = %es.name_any()))]
async fn reconcile_at<S: ObjectStore>(
    es: &Elasticsearch,
    ctx: &Ctx<S>,
    now: Timestamp,
) -> Result<Action, Error> {
    if has_deletion_stamp(es) {
        return Ok(Action::await_change());
    }

    let namespace = &ctx.init.operator_namespace;
    let checker = LicenseChecker::load(&ctx.store, namespace, ctx.enterprise_key.clone())
        .await
        .context(LoadCheckerSnafu)?;
    let licenses = store::list_enterprise_licenses(&ctx.store, namespace)
        .await
        .context(ListLicensesSnafu)?;

    let Some(found) = best_match(now, &licenses, None, |license| {
        checker.is_valid(license, now)
    }) else {
        tracing::info!("no matching license found");
        return Ok(Action::requeue(DEFAULT_REQUEUE));
    };

    let expected = expected_license_secret(es, &found)?;
    reconcile_resource(
        &ctx.store,
        es,
        &expected,
        &Policy {
            needs_update: |expected: &Secret, reconciled: &Secret| {
                expected.data != reconciled.data || expected.labels() != reconciled.labels()
            },
            update_reconciled: |expected: &Secret, reconciled: &mut Secret| {
                reconciled.data.clone_from(&expected.data);
                reconciled.metadata.labels.clone_from(&expected.metadata.labels);
            },
        },
    )
    .await
    .context(ApplyLicenseSnafu)?;

    tracing::info!(
        license.uid = %found.license.license.uid,
        license.parent = %found.parent_uid,
        "applied cluster license"
    );
    Ok(Action::requeue(next_reconcile(now, &found.license.license)))
}

fn expected_license_secret(es: &Elasticsearch, found: &Match) -> Result<Secret, Error> {
    let rendered = serde_json::to_vec(&found.license).context(RenderLicenseSnafu {
        uid: found.license.license.uid.clone(),
    })?;

    Ok(Secret {
        metadata: ObjectMeta {
            name: Some(license_secret_name(&es.name_any())),
            namespace: es.namespace(),
            labels: Some(BTreeMap::from([
                (LICENSE_TYPE_LABEL.to_owned(), CLUSTER_LICENSE_TYPE.to_owned()),
                (LICENSE_NAME_LABEL.to_owned(), found.parent_uid.clone()),
            ])),
            ..ObjectMeta::default()
        },
        data: Some(BTreeMap::from([(
            LICENSE_DATA_KEY.to_owned(),
            ByteString(rendered),
        )])),
        ..Secret::default()
    })
}

/// When to look for a replacement of `license`, applied at `now`.
pub fn next_reconcile(now: Timestamp, license: &LicenseSpec) -> Duration {
    let replace_at = license
        .expiry_time()
        .checked_sub(SAFETY_MARGIN / 2)
        .unwrap_or(Timestamp::MIN);
    Duration::try_from(replace_at.duration_since(now))
        .unwrap_or(MIN_REQUEUE)
        .max(MIN_REQUEUE)
}
