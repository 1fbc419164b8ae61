//! This module provides helpers to deal with the namespaces the operator watches
use k8s_openapi::NamespaceResourceScope;
use kube::{Api, Resource};

#[derive(Clone, Debug, Default, Eq, Ord, PartialEq, PartialOrd)]
pub enum WatchNamespace {
    #[default]
    All,
    One(String),
}

impl From<&str> for WatchNamespace {
    fn from(s: &str) -> Self {
        if s.is_empty() {
            Self::All
        } else {
            Self::One(s.to_owned())
        }
    }
}

impl WatchNamespace {
    /// Gets an API object for the namespace in question or for all namespaces,
    /// depending on which variant we are.
    pub fn get_api<T>(&self, client: &kube::Client) -> Api<T>
    where
        T: Resource<DynamicType = (), Scope = NamespaceResourceScope>,
    {
        match self {
            Self::All => Api::all(client.clone()),
            Self::One(namespace) => Api::namespaced(client.clone(), namespace),
        }
    }

    /// The single watched namespace, [`None`] when watching all of them.
    pub fn as_namespace(&self) -> Option<&str> {
        match self {
            Self::All => None,
            Self::One(namespace) => Some(namespace),
        }
    }
}
