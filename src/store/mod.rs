//! Access to the object store the operator reconciles against.

use std::fmt;

use async_trait::async_trait;
use k8s_openapi::NamespaceResourceScope;
use kube::Resource;
use serde::{Serialize, de::DeserializeOwned};

use crate::{
    crd::SpringBootApplicationStatus,
    error::{Error, Result},
};

mod kube_store;
mod memory;

pub use kube_store::KubeStore;
pub use memory::{MemoryStore, Verb, WriteRecord};

/// Namespaced object kinds the store can hold.
pub trait StoredObject:
    Resource<DynamicType = (), Scope = NamespaceResourceScope>
    + Clone
    + fmt::Debug
    + Serialize
    + DeserializeOwned
    + Send
    + Sync
    + 'static
{
}

impl<K> StoredObject for K where
    K: Resource<DynamicType = (), Scope = NamespaceResourceScope>
        + Clone
        + fmt::Debug
        + Serialize
        + DeserializeOwned
        + Send
        + Sync
        + 'static
{
}

/// Namespace and name of an object.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ObjectKey {
    pub namespace: String,
    pub name: String,
}

impl ObjectKey {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    pub fn of<K: Resource>(object: &K) -> Result<Self> {
        let meta = object.meta();
        Ok(Self {
            namespace: meta
                .namespace
                .clone()
                .ok_or(Error::MissingField("metadata.namespace"))?,
            name: meta.name.clone().ok_or(Error::MissingField("metadata.name"))?,
        })
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

#[async_trait]
pub trait ObjectStore: Send + Sync + 'static {
    /// Returns `None` when the object does not exist.
    async fn get<K: StoredObject>(&self, key: &ObjectKey) -> Result<Option<K>>;

    async fn create<K: StoredObject>(&self, object: &K) -> Result<K>;

    /// Replaces the object. Fails with [`Error::Conflict`] when the stored
    /// resourceVersion no longer matches the one carried by `object`.
    async fn update<K: StoredObject>(&self, object: &K) -> Result<K>;

    async fn write_status(
        &self,
        key: &ObjectKey,
        status: &SpringBootApplicationStatus,
    ) -> Result<()>;
}
