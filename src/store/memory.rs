use std::{
    collections::BTreeMap,
    sync::{Mutex, MutexGuard},
};

use async_trait::async_trait;
use serde_json::Value;

use super::{ObjectKey, ObjectStore, StoredObject};
use crate::{
    crd::{SpringBootApplication, SpringBootApplicationStatus},
    error::{Error, Result},
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Verb {
    Create,
    Update,
    Status,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WriteRecord {
    pub verb: Verb,
    pub kind: String,
    pub key: ObjectKey,
}

/// In-process [`ObjectStore`] with resourceVersion checks.
///
/// Objects are kept as JSON, so a read returns exactly what the last write
/// stored. Writes made through the trait are recorded; `insert` and `modify`
/// stand in for changes made by someone else and are not.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

#[derive(Default)]
struct Inner {
    objects: BTreeMap<(String, ObjectKey), Value>,
    version: u64,
    writes: Vec<WriteRecord>,
}

impl Inner {
    fn next_version(&mut self) -> String {
        self.version += 1;
        self.version.to_string()
    }

    fn record(&mut self, verb: Verb, kind: &str, key: &ObjectKey) {
        self.writes.push(WriteRecord {
            verb,
            kind: kind.to_string(),
            key: key.clone(),
        });
    }

    fn store<K: StoredObject>(&mut self, mut object: K) -> Result<K> {
        let key = ObjectKey::of(&object)?;
        let version = self.next_version();
        let meta = object.meta_mut();
        meta.resource_version = Some(version.clone());
        if meta.uid.is_none() {
            meta.uid = Some(format!("uid-{version}"));
        }
        self.objects
            .insert((K::kind(&()).to_string(), key), serde_json::to_value(&object)?);
        Ok(object)
    }

    fn load<K: StoredObject>(&self, key: &ObjectKey) -> Result<Option<K>> {
        self.objects
            .get(&(K::kind(&()).to_string(), key.clone()))
            .map(|value| serde_json::from_value(value.clone()))
            .transpose()
            .map_err(Error::from)
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Stores `object` as if another client had created it.
    pub fn insert<K: StoredObject>(&self, object: K) -> Result<K> {
        self.lock().store(object)
    }

    /// Changes a stored object as if another client had updated it.
    pub fn modify<K: StoredObject>(
        &self,
        key: &ObjectKey,
        change: impl FnOnce(&mut K),
    ) -> Result<Option<K>> {
        let mut inner = self.lock();
        let Some(mut object) = inner.load::<K>(key)? else {
            return Ok(None);
        };
        change(&mut object);
        inner.store(object).map(Some)
    }

    pub fn object<K: StoredObject>(&self, key: &ObjectKey) -> Result<Option<K>> {
        self.lock().load(key)
    }

    pub fn writes(&self) -> Vec<WriteRecord> {
        self.lock().writes.clone()
    }

    pub fn write_count(&self) -> usize {
        self.lock().writes.len()
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn get<K: StoredObject>(&self, key: &ObjectKey) -> Result<Option<K>> {
        self.lock().load(key)
    }

    async fn create<K: StoredObject>(&self, object: &K) -> Result<K> {
        let key = ObjectKey::of(object)?;
        let kind = K::kind(&()).to_string();
        let mut inner = self.lock();

        if inner.objects.contains_key(&(kind.clone(), key.clone())) {
            return Err(Error::Conflict {
                kind,
                name: key.name,
            });
        }

        let created = inner.store(object.clone())?;
        inner.record(Verb::Create, &kind, &key);
        Ok(created)
    }

    async fn update<K: StoredObject>(&self, object: &K) -> Result<K> {
        let key = ObjectKey::of(object)?;
        let kind = K::kind(&()).to_string();
        let mut inner = self.lock();

        let stored_version = inner
            .objects
            .get(&(kind.clone(), key.clone()))
            .and_then(|value| value["metadata"]["resourceVersion"].as_str())
            .map(str::to_string);

        // a deleted object counts as a stale version too
        if stored_version.is_none() || stored_version != object.meta().resource_version {
            return Err(Error::Conflict {
                kind,
                name: key.name,
            });
        }

        let updated = inner.store(object.clone())?;
        inner.record(Verb::Update, &kind, &key);
        Ok(updated)
    }

    async fn write_status(
        &self,
        key: &ObjectKey,
        status: &SpringBootApplicationStatus,
    ) -> Result<()> {
        let mut inner = self.lock();
        let Some(mut app) = inner.load::<SpringBootApplication>(key)? else {
            return Err(Error::Conflict {
                kind: "SpringBootApplication".to_string(),
                name: key.name.clone(),
            });
        };

        app.status = Some(status.clone());
        inner.store(app)?;
        inner.record(Verb::Status, "SpringBootApplication", key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use k8s_openapi::api::core::v1::ConfigMap;
    use kube::api::ObjectMeta;

    use super::*;

    fn config_map(name: &str) -> ConfigMap {
        ConfigMap {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some("default".to_string()),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn create_assigns_version_and_uid() {
        let store = MemoryStore::new();
        let created = store.create(&config_map("demo")).await.unwrap();

        assert_eq!(created.metadata.resource_version.as_deref(), Some("1"));
        assert!(created.metadata.uid.is_some());

        let key = ObjectKey::new("default", "demo");
        let read: ConfigMap = store.get(&key).await.unwrap().unwrap();
        assert_eq!(read, created);
        assert_eq!(store.write_count(), 1);
    }

    #[tokio::test]
    async fn create_twice_conflicts() {
        let store = MemoryStore::new();
        store.create(&config_map("demo")).await.unwrap();

        let err = store.create(&config_map("demo")).await.unwrap_err();
        assert!(matches!(err, Error::Conflict { .. }));
    }

    #[tokio::test]
    async fn stale_update_conflicts() {
        let store = MemoryStore::new();
        let created = store.create(&config_map("demo")).await.unwrap();
        let key = ObjectKey::new("default", "demo");

        store
            .modify::<ConfigMap>(&key, |cm| {
                cm.data = Some(BTreeMap::from([("k".to_string(), "v".to_string())]));
            })
            .unwrap();

        let err = store.update(&created).await.unwrap_err();
        assert!(err.is_retryable());
        assert!(matches!(err, Error::Conflict { ref kind, .. } if kind == "ConfigMap"));
    }

    #[tokio::test]
    async fn get_missing_is_none() {
        let store = MemoryStore::new();
        let missing: Option<ConfigMap> =
            store.get(&ObjectKey::new("default", "nope")).await.unwrap();
        assert!(missing.is_none());
    }
}
