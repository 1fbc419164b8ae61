//! The credentials a dependent workload uses to talk to its cluster: a clear
//! text password next to the workload, its bcrypt hash next to the cluster.
use std::collections::BTreeMap;

use k8s_openapi::{ByteString, api::core::v1::Secret};
use kube::{ResourceExt, core::ObjectMeta};
use rand::{Rng, distr::Alphanumeric};
use snafu::{OptionExt, ResultExt, Snafu};

use crate::{
    client::{self, ErrorKind, ObjectStore, ResourceId},
    crd::{
        association::Association,
        kibana::SecretKeyRef,
        user::{User, UserSpec},
    },
    kvp::{TYPE_LABEL, USER_TYPE, association_labels},
    reconciler::{self, Policy, reconcile_resource},
};

/// Tags the names of generated credentials, also the key of the password in
/// the credential Secret.
pub const ROLE_TAG: &str = "elastic-internal";

/// Built-in role granted to Kibana users.
pub const KIBANA_SYSTEM_ROLE: &str = "kibana_system";

const PASSWORD_LENGTH: usize = 24;

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("failed to reconcile the credential secret"))]
    ReconcileSecret { source: reconciler::Error },

    #[snafu(display("{secret} holds no password under {ROLE_TAG:?}"))]
    MissingPassword { secret: ResourceId },

    #[snafu(display("failed to read the existing user"))]
    GetUser { source: client::Error },

    #[snafu(display("failed to hash the password"))]
    HashPassword { source: bcrypt::BcryptError },

    #[snafu(display("failed to reconcile the internal user"))]
    ReconcileUser { source: reconciler::Error },
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::ReconcileSecret { source } | Self::ReconcileUser { source } => source.kind(),
            Self::GetUser { source } => source.kind(),
            Self::MissingPassword { .. } | Self::HashPassword { .. } => ErrorKind::Other,
        }
    }
}

/// Name shared by the user and credential Secret of `association`.
pub fn user_name(association: &Association) -> String {
    format!("{}-{ROLE_TAG}", association.name_any())
}

fn random_password() -> String {
    rand::rng()
        .sample_iter(&Alphanumeric)
        .take(PASSWORD_LENGTH)
        .map(char::from)
        .collect()
}

/// Ensures the credential Secret in `dependent_namespace` and the user in
/// `cluster_namespace` exist and agree, returning where the workload finds its
/// password.
///
/// The Secret is written first and an existing password is never replaced,
/// so the hash in the user never gets ahead of the password it was made of.
pub async fn reconcile_credentials<S: ObjectStore>(
    store: &S,
    association: &Association,
    cluster_namespace: &str,
    dependent_namespace: &str,
) -> Result<SecretKeyRef, Error> {
    let name = user_name(association);
    let labels = association_labels(association);

    let expected_secret = Secret {
        metadata: ObjectMeta {
            name: Some(name.clone()),
            namespace: Some(dependent_namespace.to_owned()),
            labels: Some(labels.clone()),
            ..ObjectMeta::default()
        },
        data: Some(BTreeMap::from([(
            ROLE_TAG.to_owned(),
            ByteString(random_password().into_bytes()),
        )])),
        ..Secret::default()
    };
    let secret = reconcile_resource(
        store,
        association,
        &expected_secret,
        &Policy {
            needs_update: |_: &Secret, reconciled: &Secret| password_of(reconciled).is_none(),
            update_reconciled: |expected: &Secret, reconciled: &mut Secret| {
                if let Some(password) = password_of(expected) {
                    reconciled
                        .data
                        .get_or_insert_with(BTreeMap::new)
                        .insert(ROLE_TAG.to_owned(), ByteString(password.to_vec()));
                }
            },
        },
    )
    .await
    .context(ReconcileSecretSnafu)?;
    let password = password_of(&secret).context(MissingPasswordSnafu {
        secret: ResourceId::of(&secret),
    })?;

    // bcrypt salts every hash differently, keep a hash that still matches.
    let existing = store
        .get_opt::<User>(cluster_namespace, &name)
        .await
        .context(GetUserSnafu)?;
    let password_hash = match existing {
        Some(user) if bcrypt::verify(password, &user.spec.password_hash).unwrap_or(false) => {
            user.spec.password_hash
        }
        _ => bcrypt::hash(password, bcrypt::DEFAULT_COST).context(HashPasswordSnafu)?,
    };

    let mut user_labels = labels;
    user_labels.insert(TYPE_LABEL.to_owned(), USER_TYPE.to_owned());
    let mut expected_user = User::new(
        &name,
        UserSpec {
            name: name.clone(),
            password_hash,
            user_roles: vec![KIBANA_SYSTEM_ROLE.to_owned()],
        },
    );
    expected_user.metadata.namespace = Some(cluster_namespace.to_owned());
    expected_user.metadata.labels = Some(user_labels);

    reconcile_resource(
        store,
        association,
        &expected_user,
        &Policy {
            needs_update: |expected: &User, reconciled: &User| {
                expected.spec != reconciled.spec || expected.labels() != reconciled.labels()
            },
            update_reconciled: |expected: &User, reconciled: &mut User| {
                reconciled.spec = expected.spec.clone();
                reconciled.metadata.labels.clone_from(&expected.metadata.labels);
            },
        },
    )
    .await
    .context(ReconcileUserSnafu)?;

    Ok(SecretKeyRef {
        name,
        key: ROLE_TAG.to_owned(),
    })
}

fn password_of(secret: &Secret) -> Option<&[u8]> {
    secret
        .data
        .as_ref()?
        .get(ROLE_TAG)
        .map(|password| password.0.as_slice())
        .filter(|password| !password.is_empty())
}
