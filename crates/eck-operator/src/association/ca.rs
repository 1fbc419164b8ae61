//! Makes the public CA of a cluster available next to the dependent workload.
use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::Secret;
use kube::{ResourceExt, core::ObjectMeta};
use snafu::{OptionExt, ResultExt, Snafu};

use crate::{
    client::{self, ErrorKind, ObjectStore, ResourceId},
    crd::{
        association::Association,
        elasticsearch::{CA_CERT_KEY, Elasticsearch, http_ca_secret_name},
    },
    kvp::association_labels,
    reconciler::{self, Policy, reconcile_resource},
};

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("failed to get the public CA of the cluster"))]
    GetCa { source: client::Error },

    #[snafu(display("{secret} holds no {CA_CERT_KEY}"))]
    MissingCert { secret: ResourceId },

    #[snafu(display("failed to copy the public CA"))]
    CopyCa { source: reconciler::Error },
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::GetCa { source } => source.kind(),
            // The cluster controller has not populated the secret yet.
            Self::MissingCert { .. } => ErrorKind::NotFound,
            Self::CopyCa { source } => source.kind(),
        }
    }
}

/// Name of the copy of the cluster CA made for `association`.
pub fn ca_copy_name(association: &Association) -> String {
    format!("{}-es-ca", association.name_any())
}

/// Returns the name of a Secret in `dependent_namespace` holding the public CA
/// of `es`. Secrets cannot be referenced across namespaces, so a workload
/// outside the cluster namespace gets a copy.
pub async fn reconcile_ca<S: ObjectStore>(
    store: &S,
    association: &Association,
    es: &Elasticsearch,
    dependent_namespace: &str,
) -> Result<String, Error> {
    let cluster_namespace = es.namespace().unwrap_or_default();
    let ca_name = http_ca_secret_name(&es.name_any());
    let ca = store
        .get::<Secret>(&cluster_namespace, &ca_name)
        .await
        .context(GetCaSnafu)?;
    if cluster_namespace == dependent_namespace {
        return Ok(ca_name);
    }

    let cert = ca
        .data
        .as_ref()
        .and_then(|data| data.get(CA_CERT_KEY))
        .context(MissingCertSnafu {
            secret: ResourceId::of(&ca),
        })?;
    let expected = Secret {
        metadata: ObjectMeta {
            name: Some(ca_copy_name(association)),
            namespace: Some(dependent_namespace.to_owned()),
            labels: Some(association_labels(association)),
            ..ObjectMeta::default()
        },
        data: Some(BTreeMap::from([(CA_CERT_KEY.to_owned(), cert.clone())])),
        ..Secret::default()
    };
    let copy = reconcile_resource(
        store,
        association,
        &expected,
        &Policy {
            needs_update: |expected: &Secret, reconciled: &Secret| expected.data != reconciled.data,
            update_reconciled: |expected: &Secret, reconciled: &mut Secret| {
                reconciled.data.clone_from(&expected.data);
            },
        },
    )
    .await
    .context(CopyCaSnafu)?;
    Ok(copy.name_any())
}

#[cfg(test)]
mod tests {
    use k8s_openapi::ByteString;

    use super::*;
    use crate::{
        client::memory::MemoryStore,
        crd::{
            NamespacedRef,
            association::AssociationSpec,
            elasticsearch::{ElasticsearchSpec, HttpConfig},
        },
    };

    fn fixtures(store: &MemoryStore, cert: &[u8]) -> (Association, Elasticsearch) {
        let mut association = Association::new(
            "baz",
            AssociationSpec {
                elasticsearch_ref: NamespacedRef::to_named("foo", Some("data")),
                dependent_ref: NamespacedRef::to_named("bar", None),
            },
        );
        association.metadata.namespace = Some("apps".to_owned());

        let mut es = Elasticsearch::new(
            "foo",
            ElasticsearchSpec {
                version: "7.4.0".to_owned(),
                node_sets: Vec::new(),
                http: HttpConfig::default(),
            },
        );
        es.metadata.namespace = Some("data".to_owned());

        store.insert(Secret {
            metadata: ObjectMeta {
                name: Some("foo-http-ca".to_owned()),
                namespace: Some("data".to_owned()),
                ..ObjectMeta::default()
            },
            data: Some(BTreeMap::from([(
                CA_CERT_KEY.to_owned(),
                ByteString(cert.to_vec()),
            )])),
            ..Secret::default()
        });
        (store.insert(association), store.insert(es))
    }

    #[tokio::test]
    async fn same_namespace_uses_the_cluster_secret() {
        let store = MemoryStore::default();
        let (association, es) = fixtures(&store, b"cert");

        let name = reconcile_ca(&store, &association, &es, "data").await.unwrap();
        assert_eq!(name, "foo-http-ca");
        assert_eq!(store.writes(), 0);
    }

    #[tokio::test]
    async fn other_namespace_gets_a_synced_copy() {
        let store = MemoryStore::default();
        let (association, es) = fixtures(&store, b"cert");

        let name = reconcile_ca(&store, &association, &es, "apps").await.unwrap();
        assert_eq!(name, "baz-es-ca");
        let copy = store.find::<Secret>("apps", "baz-es-ca").unwrap();
        assert_eq!(copy.data.as_ref().unwrap()[CA_CERT_KEY].0, b"cert");
        assert_eq!(copy.labels(), &association_labels(&association));

        let mut ca = store.find::<Secret>("data", "foo-http-ca").unwrap();
        ca.data = Some(BTreeMap::from([(
            CA_CERT_KEY.to_owned(),
            ByteString(b"rotated".to_vec()),
        )]));
        store.replace(&ca).await.unwrap();

        reconcile_ca(&store, &association, &es, "apps").await.unwrap();
        let copy = store.find::<Secret>("apps", "baz-es-ca").unwrap();
        assert_eq!(copy.data.unwrap()[CA_CERT_KEY].0, b"rotated");
    }

    #[tokio::test]
    async fn missing_ca_is_not_found() {
        let store = MemoryStore::default();
        let (association, mut es) = fixtures(&store, b"cert");
        es.metadata.name = Some("other".to_owned());

        let err = reconcile_ca(&store, &association, &es, "apps").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }
}
