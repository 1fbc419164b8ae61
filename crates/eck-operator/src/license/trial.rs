//! Honors trial requests: Secrets labeled as enterprise trial in the operator
//! namespace.
use std::sync::Arc;

use jiff::Timestamp;
use k8s_openapi::api::core::v1::Secret;
use kube::{ResourceExt, runtime::controller::Action};
use serde_json::json;
use snafu::{ResultExt, Snafu};
use strum::{EnumDiscriminants, IntoStaticStr};

use super::store::{self, init_trial, parse_license_secret, trial_verifier};
use crate::{
    client::{self, ErrorKind, ObjectStore},
    finalizer::has_deletion_stamp,
    init::Init,
    kvp::{EULA_ACCEPTED, EULA_ANNOTATION, LICENSE_INVALID_ANNOTATION},
    logging::controller::ReconcilerError,
};

pub const CONTROLLER_NAME: &str = "trial-controller";

pub const EULA_NOT_ACCEPTED: &str =
    r#"Please set the annotation elastic.co/eula to "accepted" to accept the EULA"#;
pub const TRIAL_ALREADY_STARTED: &str = "trial already started";

pub struct Ctx<S> {
    pub store: S,
    pub init: Init,

    /// Size of the key generated when the trial starts.
    pub key_bits: usize,
}

#[derive(Debug, Snafu, EnumDiscriminants)]
#[strum_discriminants(derive(IntoStaticStr))]
pub enum Error {
    #[snafu(display("failed to start the trial"))]
    StartTrial { source: store::Error },

    #[snafu(display("failed to read the trial status"))]
    ReadTrialStatus { source: store::Error },

    #[snafu(display("failed to mark the trial request invalid"))]
    MarkInvalid { source: client::Error },
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::StartTrial { source } | Self::ReadTrialStatus { source } => match source {
                store::Error::Store { source } => source.kind(),
                _ => ErrorKind::Other,
            },
            Self::MarkInvalid { source } => source.kind(),
        }
    }
}

impl ReconcilerError for Error {
    fn category(&self) -> &'static str {
        ErrorDiscriminants::from(self).into()
    }
}

pub async fn reconcile<S: ObjectStore>(
    request: Arc<Secret>,
    ctx: Arc<Ctx<S>>,
) -> Result<Action, Error> {
    reconcile_at(&request, &ctx, Timestamp::now()).await
}

#[tracing::instrument(skip_all, fields(secret = %request.name_any()))]
async fn reconcile_at<S: ObjectStore>(
    request: &Secret,
    ctx: &Ctx<S>,
    now: Timestamp,
) -> Result<Action, Error> {
    if has_deletion_stamp(request) {
        return Ok(Action::await_change());
    }

    let eula_accepted = request
        .annotations()
        .get(EULA_ANNOTATION)
        .is_some_and(|value| value == EULA_ACCEPTED);
    if !eula_accepted {
        mark_invalid(&ctx.store, request, EULA_NOT_ACCEPTED).await?;
        return Ok(Action::await_change());
    }

    let namespace = &ctx.init.operator_namespace;
    match init_trial(&ctx.store, namespace, request, now, ctx.key_bits).await {
        Ok(_) => return Ok(Action::await_change()),
        Err(store::Error::TrialAlreadyStarted) => {}
        Err(source) => return Err(Error::StartTrial { source }),
    }

    // The trial started earlier, possibly from this very request.
    let verifier = trial_verifier(&ctx.store, namespace)
        .await
        .context(ReadTrialStatusSnafu)?;
    let signed_by_trial_key = parse_license_secret(request)
        .ok()
        .zip(verifier)
        .is_some_and(|(license, verifier)| verifier.verify(license.spec()).is_ok());
    if !signed_by_trial_key {
        mark_invalid(&ctx.store, request, TRIAL_ALREADY_STARTED).await?;
    }
    Ok(Action::await_change())
}

/// Records why `request` is not honored, unless it says so already.
async fn mark_invalid<S: ObjectStore>(
    store: &S,
    request: &Secret,
    reason: &str,
) -> Result<(), Error> {
    if request
        .annotations()
        .get(LICENSE_INVALID_ANNOTATION)
        .is_some_and(|current| current == reason)
    {
        return Ok(());
    }

    tracing::info!(reason, "trial request is invalid");
    store
        .merge_patch::<Secret>(
            &request.namespace().unwrap_or_default(),
            &request.name_any(),
            json!({ "metadata": { "annotations": { LICENSE_INVALID_ANNOTATION: reason } } }),
        )
        .await
        .context(MarkInvalidSnafu)?;
    Ok(())
}
