//! Custom resources the operator reconciles or generates.
use std::marker::PhantomData;

use educe::Educe;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

pub mod association;
pub mod elasticsearch;
pub mod kibana;
pub mod user;

/// A reference to a namespaced object of kind `K`.
///
/// `namespace` defaults to the namespace of the referring object, see
/// [`NamespacedRef::namespace_relative_from`].
#[derive(Deserialize, Serialize, JsonSchema, Educe)]
#[educe(Clone(bound()), Debug(bound()), PartialEq(bound()), Eq)]
pub struct NamespacedRef<K> {
    /// The name of the referenced object.
    pub name: String,

    /// The namespace of the referenced object.
    ///
    /// This field is optional, and will default to the namespace of the referring object.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,

    #[serde(skip)]
    _kind: PhantomData<K>,
}

impl<K: kube::Resource> NamespacedRef<K> {
    pub fn to_named(name: &str, namespace: Option<&str>) -> Self {
        Self {
            name: name.to_owned(),
            namespace: namespace.map(ToOwned::to_owned),
            _kind: PhantomData,
        }
    }

    pub fn namespace_relative_from<'a, K2: kube::Resource>(
        &'a self,
        container: &'a K2,
    ) -> Option<&'a str> {
        self.namespace
            .as_deref()
            .or(container.meta().namespace.as_deref())
    }
}
