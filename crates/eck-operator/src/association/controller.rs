//! Converges each association towards `Established`: credentials exist on both
//! sides, the CA is reachable from the workload and the workload points at the
//! cluster.
use std::{sync::Arc, time::Duration};

use k8s_openapi::api::core::v1::Secret;
use kube::{Resource, ResourceExt, runtime::controller::Action};
use serde_json::json;
use snafu::{ResultExt, Snafu};
use strum::{EnumDiscriminants, IntoStaticStr};

use super::{ca, credentials, gc};
use crate::{
    client::{self, ErrorKind, ObjectStore, ResourceId},
    crd::{
        association::{Association, AssociationPhase},
        elasticsearch::{Elasticsearch, http_service_url},
        kibana::{BackendElasticsearch, ElasticsearchAuth, Kibana},
        user::User,
    },
    finalizer::{ASSOCIATION_FINALIZER, add_finalizer, has_deletion_stamp, remove_finalizer},
    init::Init,
    kvp::is_paused,
    logging::{
        controller::ReconcilerError,
        k8s_events::{EventPublisher, status_change_event},
    },
    watches::{DynamicWatches, Registration, watch_name},
};

pub const CONTROLLER_NAME: &str = "association-controller";

/// Pending and paused associations are looked at again after this long.
pub const PENDING_REQUEUE: Duration = Duration::from_secs(10);

pub struct Ctx<S> {
    pub store: S,
    pub init: Init,
    pub watches: Arc<DynamicWatches>,
    pub events: Arc<dyn EventPublisher>,
}

#[derive(Debug, Snafu, EnumDiscriminants)]
#[strum_discriminants(derive(IntoStaticStr))]
pub enum Error {
    #[snafu(display("failed to get the association"))]
    GetAssociation { source: client::Error },

    #[snafu(display("failed to add the finalizer"))]
    AddFinalizer { source: client::Error },

    #[snafu(display("failed to remove the finalizer"))]
    RemoveFinalizer { source: client::Error },

    #[snafu(display("failed to delete generated children"))]
    DeleteChildren { source: client::Error },

    #[snafu(display("failed to get the Elasticsearch cluster"))]
    GetElasticsearch { source: client::Error },

    #[snafu(display("failed to reconcile credentials"))]
    Credentials { source: credentials::Error },

    #[snafu(display("failed to reconcile the CA"))]
    Ca { source: ca::Error },

    #[snafu(display("failed to get the Kibana instance"))]
    GetKibana { source: client::Error },

    #[snafu(display("failed to render the Elasticsearch backend"))]
    RenderBackend { source: serde_json::Error },

    #[snafu(display("failed to update the Kibana instance"))]
    PatchKibana { source: client::Error },

    #[snafu(display("failed to update the association status"))]
    UpdateStatus { source: client::Error },
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::GetAssociation { source }
            | Self::AddFinalizer { source }
            | Self::RemoveFinalizer { source }
            | Self::DeleteChildren { source }
            | Self::GetElasticsearch { source }
            | Self::GetKibana { source }
            | Self::PatchKibana { source }
            | Self::UpdateStatus { source } => source.kind(),
            Self::Credentials { source } => source.kind(),
            Self::Ca { source } => source.kind(),
            Self::RenderBackend { .. } => ErrorKind::Other,
        }
    }
}

impl ReconcilerError for Error {
    fn category(&self) -> &'static str {
        ErrorDiscriminants::from(self).into()
    }
}

pub async fn reconcile<S: ObjectStore>(
    association: Arc<Association>,
    ctx: Arc<Ctx<S>>,
) -> Result<Action, Error> {
    reconcile_association(&association, &ctx).await
}

#[tracing::instrument(skip_all, fields(association = %ResourceId::of(observed)))]
async fn reconcile_association<S: ObjectStore>(
    observed: &Association,
    ctx: &Ctx<S>,
) -> Result<Action, Error> {
    let Some(association) = ctx
        .store
        .get_opt::<Association>(&observed.namespace().unwrap_or_default(), &observed.name_any())
        .await
        .context(GetAssociationSnafu)?
    else {
        return Ok(Action::await_change());
    };

    if is_paused(&association) {
        tracing::info!("association is paused");
        return Ok(Action::requeue(PENDING_REQUEUE));
    }

    if has_deletion_stamp(&association) {
        finalize(&association, ctx).await?;
        return Ok(Action::await_change());
    }
    let association = add_finalizer(&ctx.store, &association, ASSOCIATION_FINALIZER)
        .await
        .context(AddFinalizerSnafu)?;

    register_watches(&association, &ctx.watches);

    let (phase, outcome) = match converge(&association, ctx).await {
        Ok(()) => (AssociationPhase::Established, Ok(Action::await_change())),
        Err(error) if error.kind() == ErrorKind::NotFound => {
            tracing::info!(
                error = &error as &dyn std::error::Error,
                "association is pending"
            );
            (
                AssociationPhase::Pending,
                Ok(Action::requeue(PENDING_REQUEUE)),
            )
        }
        Err(error) => (AssociationPhase::Failed, Err(error)),
    };
    update_status(&association, phase, ctx).await?;
    outcome
}

fn es_watch_name(association: &Association) -> String {
    watch_name(
        &association.namespace().unwrap_or_default(),
        &association.name_any(),
        "es",
    )
}

fn dependent_watch_name(association: &Association) -> String {
    watch_name(
        &association.namespace().unwrap_or_default(),
        &association.name_any(),
        "dep",
    )
}

/// Namespaces of the cluster and the dependent workload.
fn target_namespaces(association: &Association) -> (String, String) {
    let spec = &association.spec;
    let namespace_of = |namespace: Option<&str>| namespace.unwrap_or_default().to_owned();
    (
        namespace_of(spec.elasticsearch_ref.namespace_relative_from(association)),
        namespace_of(spec.dependent_ref.namespace_relative_from(association)),
    )
}

fn register_watches(association: &Association, watches: &DynamicWatches) {
    let (es_namespace, dependent_namespace) = target_namespaces(association);
    let watcher = ResourceId::of(association);

    watches.add(
        es_watch_name(association),
        Registration {
            watched: ResourceId::new::<Elasticsearch>(
                &es_namespace,
                &association.spec.elasticsearch_ref.name,
            ),
            watcher: watcher.clone(),
        },
    );
    watches.add(
        dependent_watch_name(association),
        Registration {
            watched: ResourceId::new::<Kibana>(
                &dependent_namespace,
                &association.spec.dependent_ref.name,
            ),
            watcher,
        },
    );
}

/// Cleans up what owner references cannot: the watches and children in
/// other namespaces.
async fn finalize<S: ObjectStore>(association: &Association, ctx: &Ctx<S>) -> Result<(), Error> {
    ctx.watches.remove(&es_watch_name(association));
    ctx.watches.remove(&dependent_watch_name(association));

    gc::delete_orphans(
        &ctx.store,
        association,
        ctx.init.watch_namespace.as_namespace(),
        &[],
    )
    .await
    .context(DeleteChildrenSnafu)?;

    remove_finalizer(&ctx.store, association, ASSOCIATION_FINALIZER)
        .await
        .context(RemoveFinalizerSnafu)?;
    tracing::info!("association finalized");
    Ok(())
}

async fn converge<S: ObjectStore>(association: &Association, ctx: &Ctx<S>) -> Result<(), Error> {
    let store = &ctx.store;
    let (es_namespace, dependent_namespace) = target_namespaces(association);

    let es = store
        .get::<Elasticsearch>(&es_namespace, &association.spec.elasticsearch_ref.name)
        .await
        .context(GetElasticsearchSnafu)?;

    let credential_ref =
        credentials::reconcile_credentials(store, association, &es_namespace, &dependent_namespace)
            .await
            .context(CredentialsSnafu)?;

    let ca_secret = ca::reconcile_ca(store, association, &es, &dependent_namespace)
        .await
        .context(CaSnafu)?;

    let expected = BackendElasticsearch {
        url: http_service_url(&es.name_any(), &es_namespace),
        ca_cert_secret: Some(ca_secret.clone()),
        auth: ElasticsearchAuth {
            credential_ref: Some(credential_ref.clone()),
        },
    };

    let kibana = store
        .get::<Kibana>(&dependent_namespace, &association.spec.dependent_ref.name)
        .await
        .context(GetKibanaSnafu)?;
    if kibana.spec.elasticsearch.as_ref() != Some(&expected) {
        tracing::info!(kibana = %ResourceId::of(&kibana), "updating Elasticsearch backend");
        let backend = serde_json::to_value(&expected).context(RenderBackendSnafu)?;
        store
            .merge_patch::<Kibana>(
                &dependent_namespace,
                &kibana.name_any(),
                json!({ "spec": { "elasticsearch": backend } }),
            )
            .await
            .context(PatchKibanaSnafu)?;
    }

    let expected_children = [
        ResourceId::new::<Secret>(&dependent_namespace, &credential_ref.name),
        ResourceId::new::<User>(&es_namespace, &credential_ref.name),
        ResourceId::new::<Secret>(&dependent_namespace, &ca_secret),
    ];
    if let Err(error) = gc::delete_orphans(
        store,
        association,
        ctx.init.watch_namespace.as_namespace(),
        &expected_children,
    )
    .await
    {
        tracing::warn!(
            error = &error as &dyn std::error::Error,
            "failed to delete orphaned children"
        );
    }

    Ok(())
}

async fn update_status<S: ObjectStore>(
    association: &Association,
    phase: AssociationPhase,
    ctx: &Ctx<S>,
) -> Result<(), Error> {
    let recorded = association.status.as_ref().map(|status| status.association);
    if recorded == Some(phase) {
        return Ok(());
    }

    ctx.store
        .merge_patch_status::<Association>(
            &association.namespace().unwrap_or_default(),
            &association.name_any(),
            json!({ "association": phase }),
        )
        .await
        .context(UpdateStatusSnafu)?;

    let previous = association.phase();
    if previous != phase {
        ctx.events
            .publish(
                &association.object_ref(&()),
                status_change_event(previous, phase),
            )
            .await;
    }
    Ok(())
}
