use async_trait::async_trait;
use kube::{
    Api, Resource,
    api::{Patch, PatchParams, PostParams},
    client::Client,
};
use serde_json::json;

use super::{ObjectKey, ObjectStore, StoredObject};
use crate::{
    crd::{SpringBootApplication, SpringBootApplicationStatus},
    error::{Error, Result},
};

/// [`ObjectStore`] backed by the Kubernetes API server.
#[derive(Clone)]
pub struct KubeStore {
    client: Client,
    field_manager: String,
}

impl KubeStore {
    pub fn new(client: Client, field_manager: impl Into<String>) -> Self {
        Self {
            client,
            field_manager: field_manager.into(),
        }
    }

    fn api<K: StoredObject>(&self, namespace: &str) -> Api<K> {
        Api::namespaced(self.client.clone(), namespace)
    }

    fn post_params(&self) -> PostParams {
        PostParams {
            field_manager: Some(self.field_manager.clone()),
            ..Default::default()
        }
    }
}

#[async_trait]
impl ObjectStore for KubeStore {
    async fn get<K: StoredObject>(&self, key: &ObjectKey) -> Result<Option<K>> {
        Ok(self.api::<K>(&key.namespace).get_opt(&key.name).await?)
    }

    async fn create<K: StoredObject>(&self, object: &K) -> Result<K> {
        let key = ObjectKey::of(object)?;
        self.api::<K>(&key.namespace)
            .create(&self.post_params(), object)
            .await
            .map_err(|e| conflict_or::<K>(e, &key))
    }

    async fn update<K: StoredObject>(&self, object: &K) -> Result<K> {
        let key = ObjectKey::of(object)?;
        self.api::<K>(&key.namespace)
            .replace(&key.name, &self.post_params(), object)
            .await
            .map_err(|e| conflict_or::<K>(e, &key))
    }

    async fn write_status(
        &self,
        key: &ObjectKey,
        status: &SpringBootApplicationStatus,
    ) -> Result<()> {
        let apps: Api<SpringBootApplication> = self.api(&key.namespace);
        let pp = PatchParams::apply(&self.field_manager).force();
        let patch = Patch::Apply(json!({
            "apiVersion": SpringBootApplication::api_version(&()),
            "kind": SpringBootApplication::kind(&()),
            "status": status,
        }));

        apps.patch_status(&key.name, &pp, &patch).await?;
        Ok(())
    }
}

// 409 is both "already exists" on create and a stale resourceVersion on replace.
fn conflict_or<K: StoredObject>(err: kube::Error, key: &ObjectKey) -> Error {
    match err {
        kube::Error::Api(response) if response.code == 409 => Error::Conflict {
            kind: K::kind(&()).to_string(),
            name: key.name.clone(),
        },
        other => Error::KubeError(other),
    }
}
